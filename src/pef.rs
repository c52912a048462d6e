//! Interface to the PEF container loader.
//!
//! `ncmp` decompressors ship as PEF containers of PowerPC code. Loading one
//! is an external collaborator's job; the shim only needs the narrow surface
//! below: load the container into guest memory, enumerate exports, and read
//! the transition vector the single export points at.

use crate::mem::MemoryContext;
use crate::Result;

/// One exported symbol, already relocated into the target context.
#[derive(Debug, Clone)]
pub struct PefExport {
    pub name: String,
    pub addr: u32,
}

/// What the shim needs to know about a loaded container.
#[derive(Debug, Clone, Default)]
pub struct PefImage {
    pub is_ppc: bool,
    pub exports: Vec<PefExport>,
    pub has_init: bool,
    pub has_main: bool,
    pub has_term: bool,
}

/// Loads a PEF container into a memory context. Implemented by the
/// executable-format layer; the shim drives it through this trait.
pub trait PefLoader {
    /// Load `data` into `mem` at (or above) `base` and describe the result.
    fn load_into(&self, name: &str, data: &[u8], mem: &mut MemoryContext, base: u32)
        -> Result<PefImage>;
}

/// A PowerPC function pointer: code address plus the R2 (table of contents)
/// value to install before jumping to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionVector {
    pub code_addr: u32,
    pub r2_value: u32,
}

impl TransitionVector {
    /// Read the two consecutive big-endian words at `addr`.
    pub fn read(mem: &MemoryContext, addr: u32) -> Result<Self> {
        Ok(Self {
            code_addr: mem.read_u32b(addr)?,
            r2_value: mem.read_u32b(addr.wrapping_add(4))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_vector_reads_two_words() {
        let mut mem = MemoryContext::new();
        mem.allocate_at(0x1000, 0x10).unwrap();
        mem.write_u32b(0x1000, 0xF000_0020).unwrap();
        mem.write_u32b(0x1004, 0x0001_2000).unwrap();
        let tv = TransitionVector::read(&mem, 0x1000).unwrap();
        assert_eq!(tv.code_addr, 0xF000_0020);
        assert_eq!(tv.r2_value, 0x0001_2000);
    }
}

//! Interface to the PPC32 engine.
//!
//! The PowerPC interpreter is a symmetrical peer of the M68K core but lives
//! outside this crate; the shim only needs registers it can seed, a syscall
//! hook, and `execute`. The activation-frame constants live here so the
//! frame writer and any engine implementation agree on the layout.

use serde::{Deserialize, Serialize};

use crate::mem::MemoryContext;
use crate::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ppc32Registers {
    pub r: [u32; 32],
    pub lr: u32,
    pub ctr: u32,
    pub cr: u32,
    pub xer: u32,
    pub pc: u32,
}

pub type Ppc32SyscallHandler = Box<dyn FnMut(&mut dyn Ppc32Engine) -> Result<()>>;

/// Capability set the shim drives a PPC32 engine through.
pub trait Ppc32Engine {
    fn registers(&mut self) -> &mut Ppc32Registers;
    fn memory(&mut self) -> &mut MemoryContext;
    fn set_syscall_handler(&mut self, handler: Ppc32SyscallHandler);
    fn execute(&mut self) -> Result<()>;
}

/// `li r2, -1` — the return thunk sets R2 to a value no real transition
/// vector uses, then traps; the syscall handler recognizes it and stops.
pub const SET_R2_OPCODE: u32 = 0x3840_FFFF;
/// `sc`
pub const SYSCALL_OPCODE: u32 = 0x4400_0002;
/// R2 value that marks a return through the thunk.
pub const R2_TERMINATE: u32 = 0xFFFF_FFFF;

/// PPC32 decompressor activation frame, highest stack addresses first.
/// All fields are 32-bit big-endian words.
pub mod frame {
    pub const SAVED_R1: usize = 0x00;
    pub const SAVED_CR: usize = 0x04;
    pub const SAVED_LR: usize = 0x08;
    pub const RESERVED1: usize = 0x0C;
    pub const RESERVED2: usize = 0x10;
    pub const SAVED_R2: usize = 0x14;
    pub const UNUSED0: usize = 0x18;
    pub const UNUSED1: usize = 0x1C;
    pub const SET_R2_OPCODE: usize = 0x20;
    pub const SYSCALL_OPCODE: usize = 0x24;
    pub const SIZE: usize = 0x28;
}

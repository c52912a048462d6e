//! Emulator state import/export.
//!
//! One zip archive per state: `state.json` describes the snapshot (magic,
//! version, architecture, cycle count, region table, symbols), `registers.bin`
//! carries the register file in a fixed big-endian layout, and each region's
//! logical bytes land in their own `region_<BASE>.bin` member. The format is
//! stable within a version; a magic or version mismatch refuses to load.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use zip::read::ZipArchive;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::m68k::M68kRegisters;
use crate::mem::MemoryContext;
use crate::{EmuError, Result};

pub const STATE_MAGIC: &str = "rezemu.state";
pub const STATE_VERSION: u32 = 1;

/// `registers.bin` layout: sixteen 32-bit registers, PC, then SR.
pub const M68K_REGISTER_BYTES: usize = 8 * 4 + 8 * 4 + 4 + 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionInfo {
    pub base: u32,
    pub len: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMetadata {
    pub magic: String,
    pub version: u32,
    pub arch: String,
    pub cycle_count: u64,
    pub regions: Vec<RegionInfo>,
    #[serde(default)]
    pub symbols: HashMap<String, u32>,
    #[serde(default)]
    pub strict_memory: bool,
}

pub struct M68kStateLoad {
    pub regs: M68kRegisters,
    pub mem: MemoryContext,
    pub cycles: u64,
}

pub fn pack_m68k_registers(regs: &M68kRegisters) -> Vec<u8> {
    let mut buf = Vec::with_capacity(M68K_REGISTER_BYTES);
    for v in regs.d.iter().chain(regs.a.iter()) {
        buf.extend_from_slice(&v.to_be_bytes());
    }
    buf.extend_from_slice(&regs.pc.to_be_bytes());
    buf.extend_from_slice(&regs.sr.to_be_bytes());
    buf
}

pub fn unpack_m68k_registers(payload: &[u8]) -> Result<M68kRegisters> {
    if payload.len() != M68K_REGISTER_BYTES {
        return Err(EmuError::InvalidState(format!(
            "registers.bin length mismatch (expected {M68K_REGISTER_BYTES}, got {})",
            payload.len()
        )));
    }
    let mut regs = M68kRegisters::new();
    let mut off = 0usize;
    let mut take_u32 = |off: &mut usize| {
        let v = u32::from_be_bytes([
            payload[*off],
            payload[*off + 1],
            payload[*off + 2],
            payload[*off + 3],
        ]);
        *off += 4;
        v
    };
    for i in 0..8 {
        regs.d[i] = take_u32(&mut off);
    }
    for i in 0..8 {
        regs.a[i] = take_u32(&mut off);
    }
    regs.pc = take_u32(&mut off);
    regs.sr = u16::from_be_bytes([payload[off], payload[off + 1]]);
    Ok(regs)
}

pub fn save_m68k_state(
    path: &Path,
    regs: &M68kRegisters,
    mem: &MemoryContext,
    cycles: u64,
) -> Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let meta = StateMetadata {
        magic: STATE_MAGIC.to_string(),
        version: STATE_VERSION,
        arch: "m68k".to_string(),
        cycle_count: cycles,
        regions: mem
            .region_iter()
            .map(|(base, len, _)| RegionInfo { base, len })
            .collect(),
        symbols: mem.symbols().map(|(k, v)| (k.to_string(), v)).collect(),
        strict_memory: mem.strict(),
    };

    zip.start_file("state.json", options)?;
    zip.write_all(&serde_json::to_vec_pretty(&meta)?)?;

    zip.start_file("registers.bin", options)?;
    zip.write_all(&pack_m68k_registers(regs))?;

    for (base, _, bytes) in mem.region_iter() {
        zip.start_file(format!("region_{base:08X}.bin"), options)?;
        zip.write_all(bytes)?;
    }

    zip.finish()?;
    Ok(())
}

pub fn load_m68k_state(path: &Path) -> Result<M68kStateLoad> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;

    let meta: StateMetadata = {
        let mut buf = Vec::new();
        let mut member = archive
            .by_name("state.json")
            .map_err(|e| EmuError::InvalidState(format!("state.json missing: {e}")))?;
        member.read_to_end(&mut buf)?;
        serde_json::from_slice(&buf)?
    };
    if meta.magic != STATE_MAGIC || meta.version != STATE_VERSION {
        return Err(EmuError::InvalidState(
            "state magic/version mismatch".to_string(),
        ));
    }
    if meta.arch != "m68k" {
        return Err(EmuError::InvalidState(format!(
            "state holds a {} register file",
            meta.arch
        )));
    }

    let regs = {
        let mut buf = Vec::new();
        let mut member = archive
            .by_name("registers.bin")
            .map_err(|e| EmuError::InvalidState(format!("registers.bin missing: {e}")))?;
        member.read_to_end(&mut buf)?;
        unpack_m68k_registers(&buf)?
    };

    let mut mem = MemoryContext::new();
    mem.set_strict(meta.strict_memory);
    for region in &meta.regions {
        mem.allocate_at(region.base, region.len)?;
        let mut buf = Vec::new();
        let name = format!("region_{:08X}.bin", region.base);
        let mut member = archive
            .by_name(&name)
            .map_err(|e| EmuError::InvalidState(format!("{name} missing: {e}")))?;
        member.read_to_end(&mut buf)?;
        if buf.len() != region.len as usize {
            return Err(EmuError::InvalidState(format!(
                "{name} length mismatch (expected {}, got {})",
                region.len,
                buf.len()
            )));
        }
        mem.write(region.base, &buf)?;
    }
    for (name, addr) in &meta.symbols {
        mem.set_symbol_addr(name, *addr);
    }

    Ok(M68kStateLoad {
        regs,
        mem,
        cycles: meta.cycle_count,
    })
}

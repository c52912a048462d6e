//! Runs classic Mac OS resource decompressors against the emulator core.
//!
//! A compressed resource names a decompressor by id; candidates are tried in
//! a fixed priority order (file `dcmp`, file `ncmp`, registered builtin,
//! system `dcmp`, system `ncmp`). A guest decompressor gets a fresh address
//! space, the four data regions the Resource Manager would have provided,
//! and an activation frame whose return address lands on a RESET thunk; the
//! run ends when the guest returns through it.
//!
//! Both the candidate priority and the entry-offset heuristic reproduce
//! observed Resource Manager behavior; falling back across candidates is
//! reported on stderr in verbose mode rather than silently absorbed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use thiserror::Error;

use crate::m68k::M68kEmulator;
use crate::mem::MemoryContext;
use crate::pef::{PefLoader, TransitionVector};
use crate::ppc32::{self, Ppc32Engine, R2_TERMINATE};
use crate::EmuError;

pub const RESOURCE_TYPE_DCMP: u32 = 0x6463_6D70; // 'dcmp'
pub const RESOURCE_TYPE_NCMP: u32 = 0x6E63_6D70; // 'ncmp'

pub const FLAG_COMPRESSED: u8 = 0x01;
pub const FLAG_DECOMPRESSED: u8 = 0x02;
pub const FLAG_DECOMPRESSION_FAILED: u8 = 0x04;

const CODE_BASE: u32 = 0xF000_0000;
const STACK_BASE: u32 = 0x1000_0000;
const OUTPUT_BASE: u32 = 0x2000_0000;
const WORKING_BASE: u32 = 0x8000_0000;
const INPUT_BASE: u32 = 0xC000_0000;
const STACK_SIZE: u32 = 16 * 1024;

const TRAP_BLOCK_MOVE: u16 = 0x002E;
const TRAP_GET_TRAP_ADDRESS: u16 = 0x0046;

pub type DecompressResult<T> = std::result::Result<T, DecompressError>;

#[derive(Debug, Error)]
pub enum DecompressError {
    #[error("compressed resource header invalid: {0}")]
    HeaderInvalid(String),
    #[error("no decompressors are available for this resource")]
    NoDecompressorAvailable,
    #[error("decompressor produced {actual} bytes (expected {expected})")]
    DecompressedSizeMismatch { expected: u32, actual: usize },
    #[error("all decompressors failed; last error: {0}")]
    AllDecompressorsFailed(String),
}

/// Behavior flags for one decompression call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecompressFlags(pub u64);

impl DecompressFlags {
    pub const DISABLED: Self = Self(1 << 0);
    pub const RETRY: Self = Self(1 << 1);
    pub const VERBOSE: Self = Self(1 << 2);
    pub const SKIP_FILE_DCMP: Self = Self(1 << 3);
    pub const SKIP_FILE_NCMP: Self = Self(1 << 4);
    pub const SKIP_INTERNAL: Self = Self(1 << 5);
    pub const SKIP_SYSTEM_DCMP: Self = Self(1 << 6);
    pub const SKIP_SYSTEM_NCMP: Self = Self(1 << 7);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// A resource fork entry, reduced to what the shim needs.
#[derive(Debug, Clone)]
pub struct Resource {
    pub rtype: u32,
    pub id: i16,
    pub flags: u8,
    pub data: Vec<u8>,
}

impl Resource {
    pub fn new(rtype: u32, id: i16, data: Vec<u8>) -> Self {
        Self {
            rtype,
            id,
            flags: 0,
            data,
        }
    }
}

/// Source of `dcmp`/`ncmp` resources, normally the caller's ResourceFile.
pub trait ResourceSource {
    fn get_resource(&self, rtype: u32, id: i16) -> Option<Resource>;
}

/// An in-process decompressor for the standard system algorithms.
pub type BuiltinDecompressor =
    fn(&CompressedResourceHeader, &[u8]) -> std::result::Result<Vec<u8>, String>;

pub type PpcEngineFactory<'a> = Box<dyn Fn(MemoryContext) -> Box<dyn Ppc32Engine> + 'a>;

#[derive(Debug, Clone, Copy, Default)]
pub struct DecompressConfig {
    /// Bound the working buffer by the v8 header's fractional size instead
    /// of the flat 256x over-allocation. No tested guest needs it.
    pub fractional_working_buffer: bool,
}

/// External collaborators for one decompression call. Everything is
/// optional; a missing collaborator just removes candidates.
#[derive(Default)]
pub struct DecompressEnv<'a> {
    pub source: Option<&'a dyn ResourceSource>,
    pub builtins: Vec<(i16, BuiltinDecompressor)>,
    pub pef_loader: Option<&'a dyn PefLoader>,
    pub ppc_engine: Option<PpcEngineFactory<'a>>,
    pub config: DecompressConfig,
}

impl<'a> DecompressEnv<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: &'a dyn ResourceSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_builtin(mut self, id: i16, f: BuiltinDecompressor) -> Self {
        self.builtins.push((id, f));
        self
    }

    pub fn with_ncmp_support(
        mut self,
        loader: &'a dyn PefLoader,
        engine: PpcEngineFactory<'a>,
    ) -> Self {
        self.pef_loader = Some(loader);
        self.ppc_engine = Some(engine);
        self
    }
}

/// Fixed-layout header at the front of every compressed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedResourceHeader {
    pub magic: u32,
    pub header_version: u16,
    pub attributes: u16,
    pub decompressed_size: u32,
    pub dcmp_resource_id: i16,
    pub output_extra_bytes: u16,
    /// v8 only; zero for v9 headers.
    pub working_buffer_fractional_size: u8,
    /// v8 only; zero for v9 headers.
    pub expansion_buffer_size: u8,
}

impl CompressedResourceHeader {
    pub const MAGIC: u32 = 0xA89F_6572;
    /// Fixed fields plus the version-specific tail.
    pub const SIZE: usize = 18;

    /// Parse the header. `Ok(None)` means the magic is absent: the resource
    /// only pretends to be compressed and must be passed through untouched.
    pub fn parse(data: &[u8]) -> DecompressResult<Option<Self>> {
        if data.len() < Self::SIZE {
            return Err(DecompressError::HeaderInvalid(
                "resource marked as compressed but is too small".to_string(),
            ));
        }
        let magic = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        if magic != Self::MAGIC {
            return Ok(None);
        }
        let header_version = u16::from_be_bytes([data[4], data[5]]);
        let attributes = u16::from_be_bytes([data[6], data[7]]);
        let decompressed_size = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
        if attributes & 0x0001 == 0 {
            return Err(DecompressError::HeaderInvalid(
                "compression attribute is not set".to_string(),
            ));
        }
        let header = match header_version {
            8 => Self {
                magic,
                header_version,
                attributes,
                decompressed_size,
                working_buffer_fractional_size: data[12],
                expansion_buffer_size: data[13],
                dcmp_resource_id: i16::from_be_bytes([data[14], data[15]]),
                output_extra_bytes: u16::from_be_bytes([data[16], data[17]]),
            },
            9 => Self {
                magic,
                header_version,
                attributes,
                decompressed_size,
                dcmp_resource_id: i16::from_be_bytes([data[12], data[13]]),
                output_extra_bytes: u16::from_be_bytes([data[14], data[15]]),
                working_buffer_fractional_size: 0,
                expansion_buffer_size: 0,
            },
            v => {
                return Err(DecompressError::HeaderInvalid(format!(
                    "header version {v} is not 8 or 9"
                )))
            }
        };
        Ok(Some(header))
    }

    /// Serialize, for building test fixtures and forwarding v9 headers to
    /// guests that read their own copy out of the input region.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.magic.to_be_bytes());
        out[4..6].copy_from_slice(&self.header_version.to_be_bytes());
        out[6..8].copy_from_slice(&self.attributes.to_be_bytes());
        out[8..12].copy_from_slice(&self.decompressed_size.to_be_bytes());
        if self.header_version == 8 {
            out[12] = self.working_buffer_fractional_size;
            out[13] = self.expansion_buffer_size;
            out[14..16].copy_from_slice(&self.dcmp_resource_id.to_be_bytes());
            out[16..18].copy_from_slice(&self.output_extra_bytes.to_be_bytes());
        } else {
            out[12..14].copy_from_slice(&self.dcmp_resource_id.to_be_bytes());
            out[14..16].copy_from_slice(&self.output_extra_bytes.to_be_bytes());
        }
        out
    }
}

/// 68K decompressor activation frame, placed at the top of the stack with
/// `A7` pointing at its base. One layout definition for writer and tests.
pub mod m68k_frame {
    pub const RETURN_ADDR: u32 = 0x00;
    pub const ARG0: u32 = 0x04;
    pub const ARG1: u32 = 0x08;
    pub const ARG2: u32 = 0x0C;
    pub const ARG3: u32 = 0x10;
    pub const RESET_OPCODE: u32 = 0x14;
    pub const UNUSED: u32 = 0x16;
    pub const SIZE: u32 = 0x18;
}

const RESET_OPCODE_WORD: u16 = 0x4E70;
const RTS_OPCODE_WORD: u16 = 0x4E75;

enum Candidate {
    Resource(Arc<Resource>),
    Builtin(BuiltinDecompressor),
}

/// Process-wide cache of system-shipped decompressor binaries, keyed by
/// resource type and id. Populated lazily, never invalidated.
fn get_system_decompressor(use_ncmp: bool, id: i16) -> Option<Arc<Resource>> {
    static CACHE: OnceLock<Mutex<HashMap<u64, Arc<Resource>>>> = OnceLock::new();
    let rtype = if use_ncmp {
        RESOURCE_TYPE_NCMP
    } else {
        RESOURCE_TYPE_DCMP
    };
    let key = (u64::from(rtype) << 16) | (id as u16 as u64);
    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = cache.lock().ok()?;
    if let Some(res) = cache.get(&key) {
        return Some(res.clone());
    }
    let dir = std::env::var("REZEMU_SYSTEM_DCMPS").unwrap_or_else(|_| "system_dcmps".to_string());
    let filename = format!("{dir}/{}cmp_{id}.bin", if use_ncmp { 'n' } else { 'd' });
    let data = std::fs::read(&filename).ok()?;
    let res = Arc::new(Resource::new(rtype, id, data));
    cache.insert(key, res.clone());
    Some(res)
}

/// Decompress `res` in place: on success the data is replaced and the
/// compressed flag cleared. A resource without the compression magic is
/// passed through untouched (and its compressed flag dropped).
pub fn decompress_resource(
    res: &mut Resource,
    flags: DecompressFlags,
    env: &DecompressEnv,
) -> DecompressResult<()> {
    if res.flags & FLAG_COMPRESSED == 0 {
        return Ok(());
    }
    if !flags.contains(DecompressFlags::RETRY) && res.flags & FLAG_DECOMPRESSION_FAILED != 0 {
        return Ok(());
    }
    if flags.contains(DecompressFlags::DISABLED) {
        return Ok(());
    }
    let verbose = flags.contains(DecompressFlags::VERBOSE);

    let header = match CompressedResourceHeader::parse(&res.data)? {
        Some(header) => header,
        None => {
            // Some resources carry the compressed bit without the header;
            // the Resource Manager treats those as uncompressed.
            res.flags &= !FLAG_COMPRESSED;
            return Ok(());
        }
    };

    let id = header.dcmp_resource_id;
    let mut candidates: Vec<Candidate> = Vec::new();
    if let Some(source) = env.source {
        if !flags.contains(DecompressFlags::SKIP_FILE_DCMP) {
            if let Some(r) = source.get_resource(RESOURCE_TYPE_DCMP, id) {
                candidates.push(Candidate::Resource(Arc::new(r)));
            }
        }
        if !flags.contains(DecompressFlags::SKIP_FILE_NCMP) {
            if let Some(r) = source.get_resource(RESOURCE_TYPE_NCMP, id) {
                candidates.push(Candidate::Resource(Arc::new(r)));
            }
        }
    }
    if !flags.contains(DecompressFlags::SKIP_INTERNAL) && (0..=3).contains(&id) {
        if let Some(&(_, f)) = env.builtins.iter().find(|(bid, _)| *bid == id) {
            candidates.push(Candidate::Builtin(f));
        }
    }
    if !flags.contains(DecompressFlags::SKIP_SYSTEM_DCMP) {
        if let Some(r) = get_system_decompressor(false, id) {
            candidates.push(Candidate::Resource(r));
        }
    }
    if !flags.contains(DecompressFlags::SKIP_SYSTEM_NCMP) {
        if let Some(r) = get_system_decompressor(true, id) {
            candidates.push(Candidate::Resource(r));
        }
    }

    if candidates.is_empty() {
        return Err(DecompressError::NoDecompressorAvailable);
    }
    if verbose {
        eprintln!(
            "using dcmp/ncmp {id} ({} implementation(s) available); \
             data size is {:#X}, decompressed size is {:#X}",
            candidates.len(),
            res.data.len(),
            header.decompressed_size,
        );
    }

    let total = candidates.len();
    let mut last_error = String::new();
    for (z, candidate) in candidates.into_iter().enumerate() {
        if verbose && z > 0 {
            eprintln!("warning: falling back to decompressor implementation {} of {total}", z + 1);
        }
        let attempt = match candidate {
            Candidate::Builtin(f) => run_builtin(f, &header, &res.data),
            Candidate::Resource(dcmp) => {
                run_guest(&dcmp, &header, &res.data, env, verbose)
            }
        };
        match attempt {
            Ok(output) => {
                res.data = output;
                res.flags = (res.flags & !FLAG_COMPRESSED) | FLAG_DECOMPRESSED;
                return Ok(());
            }
            Err(e) => {
                if verbose {
                    eprintln!(
                        "warning: decompressor implementation {} of {total} failed: {e}",
                        z + 1
                    );
                }
                last_error = e;
            }
        }
    }

    res.flags |= FLAG_DECOMPRESSION_FAILED;
    Err(DecompressError::AllDecompressorsFailed(last_error))
}

fn run_builtin(
    f: BuiltinDecompressor,
    header: &CompressedResourceHeader,
    data: &[u8],
) -> std::result::Result<Vec<u8>, String> {
    let payload = &data[CompressedResourceHeader::SIZE..];
    let output = f(header, payload)?;
    if output.len() != header.decompressed_size as usize {
        return Err(DecompressError::DecompressedSizeMismatch {
            expected: header.decompressed_size,
            actual: output.len(),
        }
        .to_string());
    }
    Ok(output)
}

struct GuestRegions {
    output: u32,
    working: u32,
    input: u32,
    frame: u32,
    input_region_size: u32,
}

/// Allocate the stack/output/working/input regions and copy the compressed
/// blob in. Shared by the dcmp and ncmp paths.
fn build_guest_regions(
    mem: &mut MemoryContext,
    header: &CompressedResourceHeader,
    data: &[u8],
    config: &DecompressConfig,
    frame_size: u32,
    verbose: bool,
) -> crate::Result<GuestRegions> {
    let output_size = header.decompressed_size + u32::from(header.output_extra_bytes);
    let input_size = data.len() as u32 + 0x100;
    let working_size = if config.fractional_working_buffer
        && header.header_version == 8
        && header.working_buffer_fractional_size != 0
    {
        (data.len() as u32 * 256).div_ceil(u32::from(header.working_buffer_fractional_size))
    } else {
        // Deliberate over-allocation: output is assumed never to exceed 256x
        // the input.
        data.len() as u32 * 256
    };

    mem.allocate_at(STACK_BASE, STACK_SIZE)?;
    mem.allocate_at(OUTPUT_BASE, output_size.max(1))?;
    mem.allocate_at(WORKING_BASE, working_size.max(1))?;
    mem.allocate_at(INPUT_BASE, input_size)?;
    mem.memcpy(INPUT_BASE, data)?;

    if verbose {
        eprintln!(
            "memory: stack {STACK_BASE:08X}:{STACK_SIZE:X} output {OUTPUT_BASE:08X}:{output_size:X} \
             working {WORKING_BASE:08X}:{working_size:X} input {INPUT_BASE:08X}:{input_size:X}"
        );
    }

    Ok(GuestRegions {
        output: OUTPUT_BASE,
        working: WORKING_BASE,
        input: INPUT_BASE,
        frame: STACK_BASE + STACK_SIZE - frame_size,
        input_region_size: input_size,
    })
}

fn run_guest(
    dcmp: &Resource,
    header: &CompressedResourceHeader,
    data: &[u8],
    env: &DecompressEnv,
    verbose: bool,
) -> std::result::Result<Vec<u8>, String> {
    match dcmp.rtype {
        RESOURCE_TYPE_DCMP => run_m68k_guest(dcmp, header, data, env, verbose).map_err(|e| e.to_string()),
        RESOURCE_TYPE_NCMP => run_ppc_guest(dcmp, header, data, env, verbose),
        _ => Err("decompressor resource is not dcmp or ncmp".to_string()),
    }
}

/// Entry offset inside a `dcmp` resource. Two formats exist in the wild:
/// a `'dcmp'` tag in bytes 4..8 with code starting at byte 0, or three
/// leading function offsets with the main entry at word 1. The heuristic
/// keys on the tag; see the notes in DESIGN.md.
fn dcmp_entry_offset(data: &[u8]) -> std::result::Result<u32, String> {
    if data.len() < 10 {
        return Err("decompressor resource is too short".to_string());
    }
    if &data[4..8] == b"dcmp" {
        Ok(0)
    } else {
        Ok(u32::from(u16::from_be_bytes([data[2], data[3]])))
    }
}

fn run_m68k_guest(
    dcmp: &Resource,
    header: &CompressedResourceHeader,
    data: &[u8],
    env: &DecompressEnv,
    verbose: bool,
) -> crate::Result<Vec<u8>> {
    let entry_offset =
        dcmp_entry_offset(&dcmp.data).map_err(EmuError::HostHandler)?;

    let mut mem = MemoryContext::new();
    mem.allocate_at(CODE_BASE, dcmp.data.len() as u32)?;
    mem.memcpy(CODE_BASE, &dcmp.data)?;
    let entry_pc = CODE_BASE + entry_offset;
    if verbose {
        eprintln!(
            "loaded dcmp code at {CODE_BASE:08X}:{:X}, entry at {entry_pc:08X}",
            dcmp.data.len()
        );
    }

    let regions = build_guest_regions(
        &mut mem,
        header,
        data,
        &env.config,
        m68k_frame::SIZE,
        verbose,
    )?;

    // The frame's return address points at the RESET word below it, so a
    // plain RTS out of the decompressor ends the run.
    let frame = regions.frame;
    let data_size = regions.input_region_size - CompressedResourceHeader::SIZE as u32;
    let source_buffer = regions.input + CompressedResourceHeader::SIZE as u32;
    mem.write_u32b(frame + m68k_frame::RETURN_ADDR, frame + m68k_frame::RESET_OPCODE)?;
    if header.header_version == 9 {
        mem.write_u32b(frame + m68k_frame::ARG0, regions.input)?;
        mem.write_u32b(frame + m68k_frame::ARG1, regions.output)?;
        mem.write_u32b(frame + m68k_frame::ARG2, source_buffer)?;
        mem.write_u32b(frame + m68k_frame::ARG3, data_size)?;
    } else {
        mem.write_u32b(frame + m68k_frame::ARG0, data_size)?;
        mem.write_u32b(frame + m68k_frame::ARG1, regions.working)?;
        mem.write_u32b(frame + m68k_frame::ARG2, regions.output)?;
        mem.write_u32b(frame + m68k_frame::ARG3, source_buffer)?;
    }
    mem.write_u16b(frame + m68k_frame::RESET_OPCODE, RESET_OPCODE_WORD)?;
    mem.write_u16b(frame + m68k_frame::UNUSED, 0)?;

    let mut emu = M68kEmulator::new(mem);
    emu.regs_mut().a[7] = frame;
    emu.regs_mut().pc = entry_pc;
    emu.set_syscall_handler(make_shim_trap_handler(verbose));

    emu.execute()?;

    let output = emu
        .mem()
        .read(regions.output, header.decompressed_size as usize)?;
    Ok(output)
}

/// The minimal trap environment decompressors need: BlockMove, a stub
/// factory for GetTrapAddress, and success-reporting no-ops for the rest.
pub fn make_shim_trap_handler(verbose: bool) -> crate::m68k::SyscallHandler {
    let mut stub_cache: HashMap<u16, u32> = HashMap::new();
    Box::new(move |emu, opcode| {
        let (trap_number, auto_pop, os_flags) = decode_trap_word(opcode);
        match trap_number {
            TRAP_BLOCK_MOVE => {
                let src = emu.regs().a[0];
                let dst = emu.regs().a[1];
                let len = emu.regs().d[0] as usize;
                emu.mem_mut().memmove(dst, src, len)?;
                emu.regs_mut().d[0] = 0;
            }
            TRAP_GET_TRAP_ADDRESS => {
                let mut wanted = (emu.regs().d[0] & 0xFFFF) as u16;
                // Traps above 0x4F are toolbox traps, except two OS
                // stragglers; mirror the dispatcher's classification.
                if wanted > 0x4F && wanted != 0x54 && wanted != 0x57 {
                    wanted |= 0x0800;
                }
                let addr = match stub_cache.get(&wanted) {
                    Some(&addr) => addr,
                    None => {
                        let addr = emu.mem_mut().allocate(4)?;
                        emu.mem_mut().write_u16b(addr, 0xA000 | wanted)?;
                        emu.mem_mut().write_u16b(addr + 2, RTS_OPCODE_WORD)?;
                        stub_cache.insert(wanted, addr);
                        if verbose {
                            eprintln!(
                                "GetTrapAddress: created call stub for trap {wanted:04X} -> {addr:08X}"
                            );
                        }
                        addr
                    }
                };
                emu.regs_mut().a[0] = addr;
            }
            _ => {
                if verbose {
                    if opcode & 0x0800 != 0 {
                        eprintln!(
                            "warning: skipping unimplemented toolbox trap {trap_number:03X} (auto_pop={auto_pop})"
                        );
                    } else {
                        eprintln!(
                            "warning: skipping unimplemented os trap {trap_number:02X} (flags={os_flags})"
                        );
                    }
                }
                // Skipped traps report success.
                emu.regs_mut().d[0] = 0;
            }
        }
        Ok(())
    })
}

/// Split an A-line opcode per the Mac trap dispatcher: bit 11 selects
/// toolbox vs OS, bit 10 is auto-pop (toolbox), bits 9..8 are flags (OS).
pub fn decode_trap_word(opcode: u16) -> (u16, bool, u8) {
    if opcode & 0x0800 != 0 {
        (opcode & 0x0BFF, opcode & 0x0400 != 0, 0)
    } else {
        (opcode & 0x00FF, false, ((opcode >> 9) & 3) as u8)
    }
}

fn run_ppc_guest(
    ncmp: &Resource,
    header: &CompressedResourceHeader,
    data: &[u8],
    env: &DecompressEnv,
    verbose: bool,
) -> std::result::Result<Vec<u8>, String> {
    let loader = env
        .pef_loader
        .ok_or_else(|| "no PEF loader is available for ncmp resources".to_string())?;
    let factory = env
        .ppc_engine
        .as_ref()
        .ok_or_else(|| "no PPC32 engine is available for ncmp resources".to_string())?;

    let mut mem = MemoryContext::new();
    let image = loader
        .load_into("<ncmp>", &ncmp.data, &mut mem, CODE_BASE)
        .map_err(|e| e.to_string())?;
    if !image.is_ppc {
        return Err("ncmp container does not hold PowerPC code".to_string());
    }
    // ncmp decompressors export exactly one symbol and none of the standard
    // init/main/term entry points.
    if image.has_init || image.has_main || image.has_term {
        return Err("ncmp decompressor has init/main/term symbols".to_string());
    }
    if image.exports.len() != 1 {
        return Err("ncmp decompressor does not export exactly one symbol".to_string());
    }
    let tv = TransitionVector::read(&mem, image.exports[0].addr).map_err(|e| e.to_string())?;
    if verbose {
        eprintln!(
            "ncmp entry pc is {:08X} with r2 = {:08X}",
            tv.code_addr, tv.r2_value
        );
    }

    let regions = build_guest_regions(
        &mut mem,
        header,
        data,
        &env.config,
        ppc32::frame::SIZE as u32,
        verbose,
    )
    .map_err(|e| e.to_string())?;

    let frame = regions.frame;
    let return_addr = frame + ppc32::frame::SET_R2_OPCODE as u32;
    let fields = [
        (ppc32::frame::SAVED_R1, 0xAAAA_AAAA),
        (ppc32::frame::SAVED_CR, 0),
        (ppc32::frame::SAVED_LR, return_addr),
        (ppc32::frame::RESERVED1, 0),
        (ppc32::frame::RESERVED2, 0),
        (ppc32::frame::SAVED_R2, tv.r2_value),
        (ppc32::frame::UNUSED0, 0),
        (ppc32::frame::UNUSED1, 0),
        (ppc32::frame::SET_R2_OPCODE, ppc32::SET_R2_OPCODE),
        (ppc32::frame::SYSCALL_OPCODE, ppc32::SYSCALL_OPCODE),
    ];
    for (offset, value) in fields {
        mem.write_u32b(frame + offset as u32, value)
            .map_err(|e| e.to_string())?;
    }

    let mut engine = factory(mem);
    {
        let regs = engine.registers();
        regs.r[1] = frame;
        regs.r[2] = tv.r2_value;
        regs.r[3] = regions.input + CompressedResourceHeader::SIZE as u32;
        regs.r[4] = regions.output;
        regs.r[5] = if header.header_version == 9 {
            regions.input
        } else {
            regions.working
        };
        regs.r[6] = regions.input_region_size - CompressedResourceHeader::SIZE as u32;
        regs.lr = return_addr;
        regs.pc = tv.code_addr;
    }
    engine.set_syscall_handler(Box::new(|engine| {
        // The only expected syscall is the return thunk's, with R2 = -1.
        if engine.registers().r[2] != R2_TERMINATE {
            return Err(EmuError::HostHandler(
                "unimplemented PPC syscall".to_string(),
            ));
        }
        Err(EmuError::Terminated)
    }));

    engine.execute().map_err(|e| e.to_string())?;

    engine
        .memory()
        .read(regions.output, header.decompressed_size as usize)
        .map_err(|e| e.to_string())
}

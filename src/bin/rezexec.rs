//! CLI driver for the M68K engine: set up memory segments and registers,
//! optionally install the basic Mac trap environment, run to termination.
//!
//! All numbers on the command line are hexadecimal.

use std::path::PathBuf;

use clap::Parser;

use rezemu::decompress::decode_trap_word;
use rezemu::m68k::{disassemble_one, BranchTargets, M68kEmulator};
use rezemu::{Emulator, EmuError, MemoryContext};

#[derive(Parser)]
#[command(
    name = "rezexec",
    about = "Run 68K code in an emulated classic Mac environment"
)]
struct Args {
    /// Memory segment: ADDR:SIZE, ADDR+FILE, ADDR:SIZE+FILE, or ADDR/HEXDATA
    #[arg(long = "mem", value_name = "DESCRIPTOR")]
    mem: Vec<String>,

    /// Start execution at this address
    #[arg(long, value_parser = parse_hex32)]
    pc: Option<u32>,

    /// Seed a register, e.g. D0:1F or A0:F0000000
    #[arg(long = "reg", value_name = "REG:VALUE")]
    regs: Vec<String>,

    /// Push a 32-bit value before starting (last one ends up on top)
    #[arg(long, value_parser = parse_hex32, value_name = "VALUE")]
    push: Vec<u32>,

    /// Define a named symbol, ADDR=NAME
    #[arg(long = "symbol", value_name = "ADDR=NAME")]
    symbols: Vec<String>,

    /// Fault on accesses outside logical allocations
    #[arg(long)]
    strict_memory: bool,

    /// Stop after this many instructions
    #[arg(long, value_parser = parse_hex64, value_name = "COUNT")]
    max_cycles: Option<u64>,

    /// Print each instruction and the register state as it executes
    #[arg(long)]
    trace: bool,

    /// Stop at any A-line trap instead of emulating Mac syscalls
    #[arg(long)]
    no_syscalls: bool,

    /// Load emulator state saved with --save-state
    #[arg(long, value_name = "FILE")]
    load_state: Option<PathBuf>,

    /// Save emulator state after the run finishes
    #[arg(long, value_name = "FILE")]
    save_state: Option<PathBuf>,
}

fn parse_hex32(s: &str) -> Result<u32, String> {
    u32::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

fn parse_hex64(s: &str) -> Result<u64, String> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

struct Segment {
    addr: u32,
    size: u32,
    data: Vec<u8>,
}

/// Descriptor grammar: ADDR:SIZE (zeroed), ADDR+FILE, ADDR:SIZE+FILE
/// (truncated or zero-padded to SIZE), ADDR/HEXDATA.
fn parse_segment(desc: &str) -> Result<Segment, String> {
    let addr_end = desc
        .find(|c: char| !c.is_ascii_hexdigit())
        .ok_or_else(|| format!("segment descriptor has no size or data: {desc}"))?;
    let addr = parse_hex32(&desc[..addr_end])?;
    let rest = &desc[addr_end..];

    let (size, rest) = if let Some(tail) = rest.strip_prefix(':') {
        let size_end = tail
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(tail.len());
        (Some(parse_hex32(&tail[..size_end])?), &tail[size_end..])
    } else {
        (None, rest)
    };

    let data = if let Some(filename) = rest.strip_prefix('+') {
        std::fs::read(filename).map_err(|e| format!("{filename}: {e}"))?
    } else if let Some(hex) = rest.strip_prefix('/') {
        parse_hex_data(hex)?
    } else if rest.is_empty() {
        Vec::new()
    } else {
        return Err(format!("invalid field in segment descriptor: {rest}"));
    };

    let size = size.unwrap_or(data.len() as u32);
    if size == 0 {
        return Err(format!("segment at {addr:08X} has zero size"));
    }
    Ok(Segment { addr, size, data })
}

fn parse_hex_data(s: &str) -> Result<Vec<u8>, String> {
    let chars: Vec<u8> = s
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if chars.len() % 2 != 0 {
        return Err("hex data has an odd number of digits".to_string());
    }
    chars
        .chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).map_err(|e| e.to_string())?;
            u8::from_str_radix(s, 16).map_err(|e| e.to_string())
        })
        .collect()
}

/// The basic Mac OS trap environment: memory-manager traps backed by the
/// emulated context, plus BlockMove.
fn mac_syscall_handler() -> rezemu::m68k::SyscallHandler {
    Box::new(|emu, opcode| {
        let (trap_number, auto_pop, os_flags) = decode_trap_word(opcode);
        match trap_number {
            0x001E => {
                // NewPtr: D0 = size, returns pointer in A0
                let size = emu.regs().d[0];
                let addr = emu.mem_mut().allocate(size)?;
                emu.regs_mut().a[0] = addr;
                emu.regs_mut().d[0] = 0;
            }
            0x0022 => {
                // NewHandle: the handle slot lives right before the data it
                // points at, so one allocation covers both.
                let size = emu.regs().d[0];
                let addr = emu.mem_mut().allocate(size + 4)?;
                emu.mem_mut().write_u32b(addr, addr + 4)?;
                emu.regs_mut().a[0] = addr;
                emu.regs_mut().d[0] = 0;
            }
            0x0025 => {
                // GetHandleSize: A0 = handle, D0 = size or negative error
                let handle = emu.regs().a[0];
                let ptr = emu.mem().read_u32b(handle)?;
                emu.regs_mut().d[0] = match emu.mem().get_block_size(ptr) {
                    Ok(size) => size,
                    Err(_) => -111i32 as u32, // memWZErr
                };
            }
            0x0029 | 0x002A => {
                // HLock/HUnlock: blocks never move here.
                emu.regs_mut().d[0] = 0;
            }
            0x002E => {
                // BlockMove: A0 = src, A1 = dst, D0 = size
                let src = emu.regs().a[0];
                let dst = emu.regs().a[1];
                let len = emu.regs().d[0] as usize;
                emu.mem_mut().memmove(dst, src, len)?;
                emu.regs_mut().d[0] = 0;
            }
            _ => {
                return Err(EmuError::HostHandler(if opcode & 0x0800 != 0 {
                    format!("unimplemented toolbox trap {trap_number:03X} (auto_pop={auto_pop})")
                } else {
                    format!("unimplemented os trap {trap_number:02X} (flags={os_flags})")
                }));
            }
        }
        Ok(())
    })
}

fn trace_hook() -> rezemu::m68k::DebugHook {
    Box::new(|emu| {
        let pc = emu.regs().pc;
        let window = emu
            .mem()
            .read(pc, 12)
            .or_else(|_| emu.mem().read(pc, 2))
            .unwrap_or_default();
        let mut targets = BranchTargets::new();
        let (text, _) = disassemble_one(&window, pc, &mut targets);
        eprintln!("{}", emu.regs());
        eprintln!("  {pc:08X}  {text}");
        Ok(())
    })
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut emu = if let Some(path) = &args.load_state {
        let mut emu = M68kEmulator::new(MemoryContext::new());
        emu.import_state(path)?;
        emu
    } else {
        M68kEmulator::new(MemoryContext::new())
    };

    if args.mem.is_empty() && args.load_state.is_none() {
        return Err("nothing to run: give at least one --mem or --load-state".into());
    }

    for desc in &args.mem {
        let seg = parse_segment(desc)?;
        emu.mem_mut().allocate_at(seg.addr, seg.size)?;
        let n = seg.data.len().min(seg.size as usize);
        emu.mem_mut().memcpy(seg.addr, &seg.data[..n])?;
    }

    emu.mem_mut().set_strict(args.strict_memory);

    for sym in &args.symbols {
        let (addr, name) = sym
            .split_once('=')
            .ok_or_else(|| format!("invalid symbol definition: {sym}"))?;
        let addr = parse_hex32(addr)?;
        emu.mem_mut().set_symbol_addr(name, addr);
    }

    for def in &args.regs {
        let (name, value) = def
            .split_once(':')
            .ok_or_else(|| format!("invalid register definition: {def}"))?;
        let value = parse_hex32(value)?;
        emu.regs_mut().set_by_name(name, value)?;
    }

    if let Some(pc) = args.pc {
        emu.regs_mut().pc = pc;
    }

    // Without an explicit stack pointer, give the program a fresh stack.
    if emu.regs().a[7] == 0 {
        const STACK_SIZE: u32 = 0x10000;
        let stack = emu.mem_mut().allocate(STACK_SIZE)?;
        emu.regs_mut().a[7] = stack + STACK_SIZE;
        eprintln!(
            "note: created stack region at {stack:08X}:{STACK_SIZE:X}, sp = {:08X}",
            emu.regs().a[7]
        );
    }

    for value in &args.push {
        emu.push_u32(*value)?;
    }

    if !args.no_syscalls {
        emu.set_syscall_handler(mac_syscall_handler());
    }
    if args.trace {
        emu.set_debug_hook(trace_hook());
    }
    emu.set_max_cycles(args.max_cycles);

    let run_result = emu.execute();

    if let Some(path) = &args.save_state {
        emu.export_state(path)?;
    }

    eprintln!("{}", emu.regs());
    run_result?;
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

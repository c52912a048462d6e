//! CPU emulator toolkit for classic Mac OS resource decompression.
//!
//! The crate is built around three pieces: a sparse 32-bit virtual address
//! space ([`MemoryContext`]), a user-mode Motorola 68000 interpreter
//! ([`m68k::M68kEmulator`]) with a matching disassembler, and a shim
//! ([`decompress::decompress_resource`]) that runs `dcmp`/`ncmp` resource
//! decompressors as guest programs with the activation frame the classic
//! Resource Manager would have built for them.
//!
//! PowerPC execution and PEF loading are external collaborators; [`ppc32`]
//! and [`pef`] define the interfaces the shim drives them through.

pub mod decompress;
pub mod interrupt;
pub mod mem;
pub mod m68k;
pub mod pef;
pub mod ppc32;
pub mod snapshot;

use std::path::Path;

use thiserror::Error;

pub use interrupt::InterruptManager;
pub use mem::{MemoryContext, MemoryError};
pub use m68k::{M68kEmulator, M68kRegisters};

pub type Result<T> = std::result::Result<T, EmuError>;

/// Everything that can go wrong while decoding or executing guest code.
///
/// `Terminated` is a control-flow sentinel, not a failure: syscall handlers
/// return it to stop the interpreter loop, and `execute()` maps it to `Ok`.
#[derive(Debug, Error)]
pub enum EmuError {
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("unimplemented opcode {opcode:#06X} at {pc:#010X}")]
    UnimplementedOpcode { pc: u32, opcode: u16 },
    #[error("invalid addressing mode {mode}:{reg} at {pc:#010X}")]
    InvalidAddressingMode { pc: u32, mode: u8, reg: u8 },
    #[error("invalid extension word {ext:#06X} at {pc:#010X}")]
    InvalidExtensionWord { pc: u32, ext: u16 },
    #[error("privilege violation at {pc:#010X}")]
    PrivilegeViolation { pc: u32 },
    #[error("division by zero at {pc:#010X}")]
    DivideByZero { pc: u32 },
    #[error("CHK violation at {pc:#010X} (value {value:#X})")]
    ChkViolation { pc: u32, value: i32 },
    #[error("unaligned access to {addr:#010X} at {pc:#010X}")]
    UnalignedAccess { pc: u32, addr: u32 },
    #[error("unimplemented trap {opcode:#06X} at {pc:#010X}")]
    UnimplementedTrap { pc: u32, opcode: u16 },
    #[error("syscall handler failed: {0}")]
    HostHandler(String),
    #[error("cycle limit of {0} reached")]
    CycleLimit(u64),
    #[error("emulation terminated")]
    Terminated,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("serialize error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("state error: {0}")]
    InvalidState(String),
}

/// The capability set shared by all architecture engines.
///
/// The engines deliberately share no implementation; call sites that are
/// generic over the architecture dispatch through this trait. Syscall and
/// debug hooks are inherent methods on each engine because their argument
/// shapes differ per architecture.
pub trait Emulator {
    type Registers;

    fn registers(&mut self) -> &mut Self::Registers;
    fn memory(&mut self) -> &mut MemoryContext;
    fn execute(&mut self) -> Result<()>;
    fn export_state(&self, path: &Path) -> Result<()>;
    fn import_state(&mut self, path: &Path) -> Result<()>;
}

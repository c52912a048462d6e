//! Whole-program tests: hand-assembled 68K code through `execute()`, the
//! disassembler walking the same bytes the interpreter consumed, snapshot
//! round-trips, and property tests for the flag and stack helpers.

use proptest::prelude::*;

use rezemu::m68k::{
    disassemble_one, BranchTargets, M68kEmulator, M68kRegisters, FLAG_C, FLAG_N, FLAG_V, FLAG_X,
    FLAG_Z,
};
use rezemu::{Emulator, MemoryContext};

fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    for w in words {
        bytes.extend_from_slice(&w.to_be_bytes());
    }
    bytes
}

fn emu_with_code(words: &[u16]) -> M68kEmulator {
    let mut mem = MemoryContext::new();
    mem.allocate_at(0x1000, 0x1000).unwrap();
    mem.allocate_at(0x8000, 0x2000).unwrap();
    mem.write(0x1000, &words_to_bytes(words)).unwrap();
    let mut emu = M68kEmulator::new(mem);
    emu.regs_mut().pc = 0x1000;
    emu.regs_mut().a[7] = 0x9000;
    emu
}

#[test]
fn disassembler_consumes_what_the_interpreter_executes() {
    // Straight-line code over a spread of addressing modes; every untaken
    // branch still consumes its displacement words.
    let program = [
        0x7001u16, // moveq #1, d0
        0x303C, 0x1234, // move.w #0x1234, d0
        0x2A7C, 0x0000, 0x9000, // movea.l #0x9000, a5
        0x2B40, 0x0010, // move.l d0, 0x10(a5)
        0x1B7C, 0x0042, 0x0020, // move.b #0x42, 0x20(a5)
        0x4A6D, 0x0012, // tst.w 0x12(a5): low word of the stored long

        0x6700, 0x0004, // beq.w (not taken: d0 is nonzero)
        0x203A, 0x0006, // move.l 0x6(pc), d0
        0xE548, // lsl.w #2, d0
        0x0640, 0x0001, // addi.w #1, d0
        0x0680, 0x0000, 0x0001, // addi.l #1, d0
        0x4E70, // reset
    ];
    let bytes = words_to_bytes(&program);
    let mut emu = emu_with_code(&program);

    let mut offset = 0usize;
    loop {
        let before = emu.regs().pc;
        emu.step().unwrap();
        let after = emu.regs().pc;
        let consumed = (after - before) as usize;

        let mut targets = BranchTargets::new();
        let (_, dasm_len) = disassemble_one(&bytes[offset..], before, &mut targets);
        assert_eq!(
            dasm_len, consumed,
            "disassembler and interpreter disagree at {before:#X}"
        );
        offset += consumed;
        if bytes[offset - consumed..offset].starts_with(&0x4E70u16.to_be_bytes()) {
            break;
        }
    }
    assert_eq!(offset, bytes.len());
}

#[test]
fn block_move_trap_copies_bytes() {
    // Exactly the Resource Manager BlockMove contract: A0 = src, A1 = dst,
    // D0 = byte count, success reported in D0.
    let mut mem = MemoryContext::new();
    mem.allocate_at(0x200, 0x200).unwrap();
    mem.allocate_at(0x1000, 0x100).unwrap();
    mem.write(0x200, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
    mem.write(0x1000, &words_to_bytes(&[0xA02E, 0x4E70])).unwrap();

    let mut emu = M68kEmulator::new(mem);
    emu.regs_mut().pc = 0x1000;
    emu.regs_mut().a[0] = 0x200;
    emu.regs_mut().a[1] = 0x300;
    emu.regs_mut().d[0] = 4;
    emu.set_syscall_handler(rezemu::decompress::make_shim_trap_handler(false));
    emu.execute().unwrap();

    assert_eq!(
        emu.mem().read(0x300, 4).unwrap(),
        vec![0xDE, 0xAD, 0xBE, 0xEF]
    );
    assert_eq!(emu.regs().d[0], 0);
}

#[test]
fn get_trap_address_stubs_are_cached_and_callable() {
    let program = [
        0x303Cu16, 0x0023, // move.w #0x23, d0
        0xA046, // GetTrapAddress
        0x2248, // movea.l a0, a1
        0x303C, 0x0023, // move.w #0x23, d0
        0xA046, // GetTrapAddress again
        0x4E90, // jsr (a0): stub runs its A-trap, then rts
        0x4E70, // reset
    ];
    let mut emu = emu_with_code(&program);
    emu.set_syscall_handler(rezemu::decompress::make_shim_trap_handler(false));
    emu.execute().unwrap();

    let stub = emu.regs().a[0];
    assert_eq!(stub, emu.regs().a[1], "second lookup must hit the cache");
    assert_ne!(stub, 0);
    assert_eq!(emu.mem().read_u16b(stub).unwrap(), 0xA023);
    assert_eq!(emu.mem().read_u16b(stub + 2).unwrap(), 0x4E75);
    // The skipped trap inside the stub reported success.
    assert_eq!(emu.regs().d[0], 0);
}

#[test]
fn state_export_import_resumes_execution() {
    let tmp = std::env::temp_dir().join("rezemu_resume_test.zip");
    let _ = std::fs::remove_file(&tmp);

    // moveq #5, d0 ; addq.l #2, d0 ; reset
    let mut emu = emu_with_code(&[0x7005, 0x5480, 0x4E70]);
    emu.step().unwrap();
    emu.export_state(&tmp).unwrap();

    let mut resumed = M68kEmulator::new(MemoryContext::new());
    resumed.import_state(&tmp).unwrap();
    assert_eq!(resumed.regs().d[0], 5);
    resumed.execute().unwrap();
    assert_eq!(resumed.regs().d[0], 7);
}

proptest! {
    #[test]
    fn add_flags_match_wide_model(l in any::<i32>(), r in any::<i32>(), w in prop::sample::select(vec![1u8, 2, 4])) {
        let mut regs = M68kRegisters::new();
        regs.set_ccr_flags_integer_add(l, r, w);

        let bits = u32::from(w) * 8;
        let mask: u128 = (1u128 << bits) - 1;
        let sign: u128 = 1u128 << (bits - 1);
        let lu = l as u32 as u128 & mask;
        let ru = r as u32 as u128 & mask;
        let sum = lu + ru;
        let masked = sum & mask;
        let c = sum > mask;
        let n = masked & sign != 0;
        let z = masked == 0;
        let ls = lu & sign != 0;
        let rs = ru & sign != 0;
        let v = ls == rs && (masked & sign != 0) != ls;

        prop_assert_eq!(regs.flag(FLAG_C), c);
        prop_assert_eq!(regs.flag(FLAG_X), c);
        prop_assert_eq!(regs.flag(FLAG_N), n);
        prop_assert_eq!(regs.flag(FLAG_Z), z);
        prop_assert_eq!(regs.flag(FLAG_V), v);
    }

    #[test]
    fn subtract_flags_match_wide_model(l in any::<i32>(), r in any::<i32>(), w in prop::sample::select(vec![1u8, 2, 4])) {
        let mut regs = M68kRegisters::new();
        regs.set_ccr_flags_integer_subtract(l, r, w);

        let bits = u32::from(w) * 8;
        let mask: u128 = (1u128 << bits) - 1;
        let sign: u128 = 1u128 << (bits - 1);
        let lu = l as u32 as u128 & mask;
        let ru = r as u32 as u128 & mask;
        let masked = lu.wrapping_sub(ru) & mask;
        let c = lu < ru;
        let n = masked & sign != 0;
        let z = masked == 0;
        let ls = lu & sign != 0;
        let rs = ru & sign != 0;
        let v = ls != rs && (masked & sign != 0) != ls;

        prop_assert_eq!(regs.flag(FLAG_C), c);
        prop_assert_eq!(regs.flag(FLAG_X), c);
        prop_assert_eq!(regs.flag(FLAG_N), n);
        prop_assert_eq!(regs.flag(FLAG_Z), z);
        prop_assert_eq!(regs.flag(FLAG_V), v);
    }

    #[test]
    fn stack_push_pop_round_trips(v in any::<u32>()) {
        let mut mem = MemoryContext::new();
        mem.allocate_at(0x4000, 0x1000).unwrap();
        let mut regs = M68kRegisters::new();
        regs.a[7] = 0x4800;

        regs.push_u32(&mut mem, v).unwrap();
        prop_assert_eq!(regs.pop_u32(&mem).unwrap(), v);
        prop_assert_eq!(regs.a[7], 0x4800);

        regs.push_u16(&mut mem, v as u16).unwrap();
        prop_assert_eq!(regs.pop_u16(&mem).unwrap(), v as u16);
        prop_assert_eq!(regs.a[7], 0x4800);

        regs.push_u8(&mut mem, v as u8).unwrap();
        prop_assert_eq!(regs.pop_u8(&mem).unwrap(), v as u8);
        prop_assert_eq!(regs.a[7], 0x4800);
    }

    #[test]
    fn memory_write_read_bijection(offset in 0u32..0x800, data in prop::collection::vec(any::<u8>(), 1..128)) {
        let mut mem = MemoryContext::new();
        mem.allocate_at(0x10000, 0x1000).unwrap();
        let addr = 0x10000 + offset;
        mem.write(addr, &data).unwrap();
        prop_assert_eq!(mem.read(addr, data.len()).unwrap(), data);
    }
}

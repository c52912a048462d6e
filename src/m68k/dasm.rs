//! M68K disassembler.
//!
//! Mirrors the interpreter's family dispatch over a byte cursor. For every
//! instruction the interpreter executes, the disassembler consumes exactly
//! the bytes the interpreter advanced `PC` by; execution traces and listings
//! line up because both sides share the same decode rules.
//!
//! Branch and call targets are collected into a [`BranchTargets`] map so a
//! whole-buffer listing can label them.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::ValueType;

/// Address of a branch target, mapped to whether it is reached by a call.
pub type BranchTargets = BTreeMap<u32, bool>;

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    base: u32,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], base: u32) -> Self {
        Self { data, pos: 0, base }
    }

    fn addr(&self) -> u32 {
        self.base.wrapping_add(self.pos as u32)
    }

    fn u16(&mut self) -> Option<u16> {
        let b = self.data.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }

    fn i16(&mut self) -> Option<i16> {
        self.u16().map(|v| v as i16)
    }

    fn u32(&mut self) -> Option<u32> {
        let hi = self.u16()?;
        let lo = self.u16()?;
        Some((u32::from(hi) << 16) | u32::from(lo))
    }

    fn imm(&mut self, size: u8) -> Option<u32> {
        match size {
            1 => self.u16().map(|v| u32::from(v) & 0xFF),
            2 => self.u16().map(u32::from),
            _ => self.u32(),
        }
    }
}

fn size_suffix(size: u8) -> &'static str {
    match size {
        1 => ValueType::Byte.suffix(),
        2 => ValueType::Word.suffix(),
        _ => ValueType::Long.suffix(),
    }
}

fn decode_size(opcode: u16) -> Option<u8> {
    match (opcode >> 6) & 3 {
        0 => Some(1),
        1 => Some(2),
        2 => Some(4),
        _ => None,
    }
}

fn signed_hex(v: i32) -> String {
    if v < 0 {
        format!("-0x{:X}", -(v as i64))
    } else {
        format!("0x{v:X}")
    }
}

/// Index register name out of a brief/full extension word.
fn index_reg_name(ext: u16) -> String {
    let reg = (ext >> 12) & 0xF;
    let name = if reg < 8 {
        format!("d{reg}")
    } else {
        format!("a{}", reg - 8)
    };
    let width = if ext & 0x0800 != 0 { "l" } else { "w" };
    let scale = 1 << ((ext >> 9) & 3);
    if scale == 1 {
        format!("{name}.{width}")
    } else {
        format!("{name}.{width}*{scale}")
    }
}

/// Format one effective address, consuming exactly the extension bytes the
/// resolver would. `None` means the stream ended mid-instruction.
fn fmt_ea(r: &mut Reader, m: u8, xn: u8, size: u8) -> Option<String> {
    Some(match (m, xn) {
        (0, n) => format!("d{n}"),
        (1, n) => format!("a{n}"),
        (2, n) => format!("(a{n})"),
        (3, n) => format!("(a{n})+"),
        (4, n) => format!("-(a{n})"),
        (5, n) => {
            let disp = r.i16()?;
            format!("{}(a{n})", signed_hex(i32::from(disp)))
        }
        (6, n) => fmt_ea_extension(r, &format!("a{n}"))?,
        (7, 0) => format!("(0x{:X}).w", r.i16()? as i32 as u32),
        (7, 1) => format!("(0x{:08X}).l", r.u32()?),
        (7, 2) => {
            let base = r.addr();
            let disp = r.i16()?;
            let target = (base as i32).wrapping_add(i32::from(disp)) as u32;
            format!("{}(pc) /* 0x{target:08X} */", signed_hex(i32::from(disp)))
        }
        (7, 3) => fmt_ea_extension(r, "pc")?,
        (7, 4) => {
            let v = r.imm(size)?;
            format!("#0x{v:X}")
        }
        _ => format!(".invalid_ea {m}:{xn}"),
    })
}

fn fmt_ea_extension(r: &mut Reader, base: &str) -> Option<String> {
    let ext = r.u16()?;
    let index = index_reg_name(ext);
    if ext & 0x0100 == 0 {
        let disp = i32::from(ext as u8 as i8);
        return Some(format!("{}({base}, {index})", signed_hex(disp)));
    }
    if ext & 0x0007 != 0 {
        return Some(format!(".invalid_ext 0x{ext:04X}"));
    }
    let base = if ext & 0x0080 != 0 { "" } else { base };
    let index = if ext & 0x0040 != 0 {
        String::new()
    } else {
        index
    };
    let bd = match (ext >> 4) & 3 {
        1 => 0,
        2 => i32::from(r.i16()?),
        3 => r.u32()? as i32,
        _ => return Some(format!(".invalid_ext 0x{ext:04X}")),
    };
    let mut out = format!("{}(", signed_hex(bd));
    if !base.is_empty() {
        out.push_str(base);
    }
    if !index.is_empty() {
        if !base.is_empty() {
            out.push_str(", ");
        }
        out.push_str(&index);
    }
    out.push(')');
    Some(out)
}

/// Register list for MOVEM, e.g. `d0-d3/d7/a0-a2`. `reverse` flips the mask
/// for the pre-decrement form.
fn fmt_reg_mask(mask: u16, reverse: bool) -> String {
    let bit_reg = |bit: usize| -> usize { if reverse { 15 - bit } else { bit } };
    let mut regs: Vec<usize> = (0..16).filter(|&b| mask & (1 << b) != 0).map(bit_reg).collect();
    regs.sort_unstable();
    let name = |r: usize| {
        if r < 8 {
            format!("d{r}")
        } else {
            format!("a{}", r - 8)
        }
    };
    let mut parts: Vec<String> = Vec::new();
    let mut i = 0;
    while i < regs.len() {
        let start = regs[i];
        let mut end = start;
        // Ranges never span the d/a banks.
        while i + 1 < regs.len() && regs[i + 1] == end + 1 && (end + 1 < 8) == (start < 8) {
            end = regs[i + 1];
            i += 1;
        }
        if start == end {
            parts.push(name(start));
        } else {
            parts.push(format!("{}-{}", name(start), name(end)));
        }
        i += 1;
    }
    if parts.is_empty() {
        "(none)".to_string()
    } else {
        parts.join("/")
    }
}

fn dasm_0123(r: &mut Reader, opcode: u16, _targets: &mut BranchTargets) -> Option<String> {
    let family = opcode >> 12;
    if family != 0 {
        let size = match family {
            1 => 1,
            3 => 2,
            _ => 4,
        };
        let src = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, size)?;
        let dst_m = ((opcode >> 6) & 7) as u8;
        let dst_xn = ((opcode >> 9) & 7) as u8;
        if dst_m == 1 {
            return Some(format!("movea.{} {src}, a{dst_xn}", size_suffix(size)));
        }
        let dst = fmt_ea(r, dst_m, dst_xn, size)?;
        return Some(format!("move.{} {src}, {dst}", size_suffix(size)));
    }

    if opcode & 0x0100 != 0 {
        if (opcode >> 3) & 7 == 1 {
            // MOVEP consumes one displacement word.
            let disp = r.i16()?;
            let dn = (opcode >> 9) & 7;
            let an = opcode & 7;
            let suffix = if opcode & 0x0040 != 0 { "l" } else { "w" };
            let to_mem = opcode & 0x0080 != 0;
            return Some(if to_mem {
                format!("movep.{suffix} d{dn}, {}(a{an})", signed_hex(i32::from(disp)))
            } else {
                format!("movep.{suffix} {}(a{an}), d{dn}", signed_hex(i32::from(disp)))
            });
        }
        let op = ["btst", "bchg", "bclr", "bset"][((opcode >> 6) & 3) as usize];
        let dn = (opcode >> 9) & 7;
        let m = ((opcode >> 3) & 7) as u8;
        let size = if m == 0 { 4 } else { 1 };
        let ea = fmt_ea(r, m, (opcode & 7) as u8, size)?;
        return Some(format!("{op} d{dn}, {ea}"));
    }

    match (opcode >> 9) & 7 {
        4 => {
            let bit = r.u16()?;
            let op = ["btst", "bchg", "bclr", "bset"][((opcode >> 6) & 3) as usize];
            let m = ((opcode >> 3) & 7) as u8;
            let size = if m == 0 { 4 } else { 1 };
            let ea = fmt_ea(r, m, (opcode & 7) as u8, size)?;
            Some(format!("{op} #{bit}, {ea}"))
        }
        7 => Some(format!(".invalid 0x{opcode:04X}")),
        sub => {
            let op = ["ori", "andi", "subi", "addi", "", "eori", "cmpi"][sub as usize];
            let size = decode_size(opcode)?;
            let imm = r.imm(size)?;
            let m = ((opcode >> 3) & 7) as u8;
            let xn = (opcode & 7) as u8;
            if (m, xn) == (7, 4) && matches!(sub, 0 | 1 | 5) {
                let target = if size == 1 { "ccr" } else { "sr" };
                return Some(format!("{op}.{} #0x{imm:X}, {target}", size_suffix(size)));
            }
            let ea = fmt_ea(r, m, xn, size)?;
            Some(format!("{op}.{} #0x{imm:X}, {ea}", size_suffix(size)))
        }
    }
}

fn dasm_4(r: &mut Reader, opcode: u16, targets: &mut BranchTargets) -> Option<String> {
    match opcode {
        0x4AFC => return Some("illegal".to_string()),
        0x4E70 => return Some("reset".to_string()),
        0x4E71 => return Some("nop".to_string()),
        0x4E72 => {
            let imm = r.u16()?;
            return Some(format!("stop #0x{imm:04X}"));
        }
        0x4E73 => return Some("rte".to_string()),
        0x4E75 => return Some("rts".to_string()),
        0x4E76 => return Some("trapv".to_string()),
        0x4E77 => return Some("rtr".to_string()),
        _ => {}
    }
    if opcode & 0xFFF0 == 0x4E40 {
        return Some(format!("trap #{}", opcode & 0xF));
    }
    if opcode & 0xFFF8 == 0x4E50 {
        let disp = r.i16()?;
        return Some(format!("link a{}, #{}", opcode & 7, signed_hex(i32::from(disp))));
    }
    if opcode & 0xFFF8 == 0x4E58 {
        return Some(format!("unlk a{}", opcode & 7));
    }
    if opcode & 0xFFF0 == 0x4E60 {
        let n = opcode & 7;
        return Some(if opcode & 8 == 0 {
            format!("move a{n}, usp")
        } else {
            format!("move usp, a{n}")
        });
    }
    if opcode & 0xFFC0 == 0x4E80 || opcode & 0xFFC0 == 0x4EC0 {
        let call = opcode & 0xFFC0 == 0x4E80;
        let m = ((opcode >> 3) & 7) as u8;
        let xn = (opcode & 7) as u8;
        // Record statically-known targets.
        let before = r.pos;
        let ea = fmt_ea(r, m, xn, 4)?;
        if let Some(target) = static_target(&r.data[before..r.pos], r.base + before as u32, m, xn)
        {
            let entry = targets.entry(target).or_insert(call);
            if call {
                *entry = true;
            }
        }
        return Some(format!("{} {ea}", if call { "jsr" } else { "jmp" }));
    }
    if opcode & 0xFFC0 == 0x40C0 {
        let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, 2)?;
        return Some(format!("move.w sr, {ea}"));
    }
    if opcode & 0xFFC0 == 0x44C0 {
        let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, 2)?;
        return Some(format!("move.w {ea}, ccr"));
    }
    if opcode & 0xFFC0 == 0x46C0 {
        let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, 2)?;
        return Some(format!("move.w {ea}, sr"));
    }
    if opcode & 0xF1C0 == 0x41C0 {
        let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, 4)?;
        return Some(format!("lea {ea}, a{}", (opcode >> 9) & 7));
    }
    if opcode & 0xF1C0 == 0x4180 {
        let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, 2)?;
        return Some(format!("chk.w {ea}, d{}", (opcode >> 9) & 7));
    }
    if opcode & 0xFFF8 == 0x4840 {
        return Some(format!("swap d{}", opcode & 7));
    }
    if opcode & 0xFFC0 == 0x4840 {
        let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, 4)?;
        return Some(format!("pea {ea}"));
    }
    if opcode & 0xFFB8 == 0x4880 {
        let suffix = if opcode & 0x0040 != 0 { "l" } else { "w" };
        return Some(format!("ext.{suffix} d{}", opcode & 7));
    }
    if opcode & 0xFB80 == 0x4880 {
        let to_regs = opcode & 0x0400 != 0;
        let size = if opcode & 0x0040 != 0 { 4 } else { 2 };
        let mask = r.u16()?;
        let m = ((opcode >> 3) & 7) as u8;
        let regs = fmt_reg_mask(mask, !to_regs && m == 4);
        let ea = fmt_ea(r, m, (opcode & 7) as u8, size)?;
        return Some(if to_regs {
            format!("movem.{} {ea}, {regs}", size_suffix(size))
        } else {
            format!("movem.{} {regs}, {ea}", size_suffix(size))
        });
    }
    if opcode & 0xFFC0 == 0x4AC0 {
        let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, 1)?;
        return Some(format!("tas {ea}"));
    }
    for (pattern, op) in [
        (0x4A00u16, "tst"),
        (0x4200, "clr"),
        (0x4400, "neg"),
        (0x4600, "not"),
        (0x4000, "negx"),
    ] {
        if opcode & 0xFF00 == pattern {
            let size = decode_size(opcode)?;
            let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, size)?;
            return Some(format!("{op}.{} {ea}", size_suffix(size)));
        }
    }
    Some(format!(".invalid 0x{opcode:04X}"))
}

/// Target address of a control EA when it is statically known (absolute or
/// PC-relative with a plain displacement). `ext` holds the already-consumed
/// extension bytes, `ext_addr` their address.
fn static_target(ext: &[u8], ext_addr: u32, m: u8, xn: u8) -> Option<u32> {
    match (m, xn) {
        (7, 0) => {
            let v = i16::from_be_bytes([*ext.first()?, *ext.get(1)?]);
            Some(v as i32 as u32)
        }
        (7, 1) => Some(u32::from_be_bytes([
            *ext.first()?,
            *ext.get(1)?,
            *ext.get(2)?,
            *ext.get(3)?,
        ])),
        (7, 2) => {
            let disp = i16::from_be_bytes([*ext.first()?, *ext.get(1)?]);
            Some((ext_addr as i32).wrapping_add(i32::from(disp)) as u32)
        }
        _ => None,
    }
}

fn dasm_5(r: &mut Reader, opcode: u16, targets: &mut BranchTargets) -> Option<String> {
    if opcode & 0x00C0 == 0x00C0 {
        let cond = super::CONDITION_NAMES[((opcode >> 8) & 0xF) as usize];
        if (opcode >> 3) & 7 == 1 {
            let base = r.addr();
            let disp = r.i16()?;
            let target = (base as i32).wrapping_add(i32::from(disp)) as u32;
            targets.entry(target).or_insert(false);
            return Some(format!("db{cond} d{}, 0x{target:08X}", opcode & 7));
        }
        let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, 1)?;
        return Some(format!("s{cond} {ea}"));
    }
    let size = decode_size(opcode)?;
    let data = {
        let d = (opcode >> 9) & 7;
        if d == 0 { 8 } else { u16::from(d) }
    };
    let op = if opcode & 0x0100 != 0 { "subq" } else { "addq" };
    let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, size)?;
    Some(format!("{op}.{} #{data}, {ea}", size_suffix(size)))
}

fn dasm_6(r: &mut Reader, opcode: u16, targets: &mut BranchTargets) -> Option<String> {
    let base = r.addr();
    let disp8 = opcode as u8 as i8;
    let (disp, suffix): (i32, &str) = match disp8 {
        0 => (i32::from(r.i16()?), "w"),
        -1 => (r.u32()? as i32, "l"),
        d => (i32::from(d), "s"),
    };
    let target = (base as i32).wrapping_add(disp) as u32;
    let (name, is_call) = match (opcode >> 8) & 0xF {
        0 => ("bra".to_string(), false),
        1 => ("bsr".to_string(), true),
        cond => (format!("b{}", super::CONDITION_NAMES[cond as usize]), false),
    };
    let entry = targets.entry(target).or_insert(is_call);
    if is_call {
        *entry = true;
    }
    Some(format!("{name}.{suffix} 0x{target:08X}"))
}

fn dasm_7(_r: &mut Reader, opcode: u16, _targets: &mut BranchTargets) -> Option<String> {
    if opcode & 0x0100 != 0 {
        return Some(format!(".invalid 0x{opcode:04X}"));
    }
    let value = opcode as u8 as i8;
    Some(format!("moveq #{}, d{}", signed_hex(i32::from(value)), (opcode >> 9) & 7))
}

fn dasm_binary(
    r: &mut Reader,
    opcode: u16,
    op: &str,
    mul_div: (&str, &str),
) -> Option<String> {
    let n = (opcode >> 9) & 7;
    match opcode & 0x01C0 {
        0x00C0 => {
            let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, 2)?;
            return Some(format!("{}.w {ea}, d{n}", mul_div.0));
        }
        0x01C0 => {
            let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, 2)?;
            return Some(format!("{}.w {ea}, d{n}", mul_div.1));
        }
        _ => {}
    }
    if opcode & 0x01F0 == 0x0100 {
        return Some(format!(".invalid 0x{opcode:04X}"));
    }
    let size = decode_size(opcode)?;
    let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, size)?;
    Some(if opcode & 0x0100 == 0 {
        format!("{op}.{} {ea}, d{n}", size_suffix(size))
    } else {
        format!("{op}.{} d{n}, {ea}", size_suffix(size))
    })
}

fn dasm_8(r: &mut Reader, opcode: u16, _targets: &mut BranchTargets) -> Option<String> {
    dasm_binary(r, opcode, "or", ("divu", "divs"))
}

fn dasm_9d(r: &mut Reader, opcode: u16, _targets: &mut BranchTargets) -> Option<String> {
    let (op, opa, opx) = if opcode >> 12 == 0xD {
        ("add", "adda", "addx")
    } else {
        ("sub", "suba", "subx")
    };
    let n = (opcode >> 9) & 7;
    if opcode & 0x00C0 == 0x00C0 {
        let size = if opcode & 0x0100 != 0 { 4 } else { 2 };
        let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, size)?;
        return Some(format!("{opa}.{} {ea}, a{n}", size_suffix(size)));
    }
    let size = decode_size(opcode)?;
    if opcode & 0x0130 == 0x0100 {
        let ry = opcode & 7;
        return Some(if opcode & 0x0008 != 0 {
            format!("{opx}.{} -(a{ry}), -(a{n})", size_suffix(size))
        } else {
            format!("{opx}.{} d{ry}, d{n}", size_suffix(size))
        });
    }
    let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, size)?;
    Some(if opcode & 0x0100 == 0 {
        format!("{op}.{} {ea}, d{n}", size_suffix(size))
    } else {
        format!("{op}.{} d{n}, {ea}", size_suffix(size))
    })
}

fn dasm_a(_r: &mut Reader, opcode: u16, _targets: &mut BranchTargets) -> Option<String> {
    // Decode the Mac trap word the way the dispatcher does.
    if opcode & 0x0800 != 0 {
        let trap = opcode & 0x0BFF;
        let auto_pop = if opcode & 0x0400 != 0 { ", auto_pop" } else { "" };
        Some(format!("atrap 0x{opcode:04X} /* toolbox 0x{trap:03X}{auto_pop} */"))
    } else {
        let trap = opcode & 0x00FF;
        let flags = (opcode >> 9) & 3;
        Some(format!("atrap 0x{opcode:04X} /* os 0x{trap:02X}, flags={flags} */"))
    }
}

fn dasm_b(r: &mut Reader, opcode: u16, _targets: &mut BranchTargets) -> Option<String> {
    let n = (opcode >> 9) & 7;
    if opcode & 0x00C0 == 0x00C0 {
        let size = if opcode & 0x0100 != 0 { 4 } else { 2 };
        let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, size)?;
        return Some(format!("cmpa.{} {ea}, a{n}", size_suffix(size)));
    }
    let size = decode_size(opcode)?;
    if opcode & 0x0100 != 0 {
        if (opcode >> 3) & 7 == 1 {
            return Some(format!(
                "cmpm.{} (a{})+, (a{n})+",
                size_suffix(size),
                opcode & 7
            ));
        }
        let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, size)?;
        return Some(format!("eor.{} d{n}, {ea}", size_suffix(size)));
    }
    let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, size)?;
    Some(format!("cmp.{} {ea}, d{n}", size_suffix(size)))
}

fn dasm_c(r: &mut Reader, opcode: u16, _targets: &mut BranchTargets) -> Option<String> {
    match opcode & 0x01F8 {
        0x0140 => {
            return Some(format!("exg d{}, d{}", (opcode >> 9) & 7, opcode & 7));
        }
        0x0148 => {
            return Some(format!("exg a{}, a{}", (opcode >> 9) & 7, opcode & 7));
        }
        0x0188 => {
            return Some(format!("exg d{}, a{}", (opcode >> 9) & 7, opcode & 7));
        }
        _ => {}
    }
    dasm_binary(r, opcode, "and", ("mulu", "muls"))
}

fn dasm_e(r: &mut Reader, opcode: u16, _targets: &mut BranchTargets) -> Option<String> {
    const OPS: [&str; 4] = ["as", "ls", "rox", "ro"];
    if opcode & 0x00C0 == 0x00C0 {
        let op = (opcode >> 9) & 7;
        if op > 3 {
            return Some(format!(".invalid 0x{opcode:04X}"));
        }
        let dir = if opcode & 0x0100 != 0 { "l" } else { "r" };
        let ea = fmt_ea(r, ((opcode >> 3) & 7) as u8, (opcode & 7) as u8, 2)?;
        return Some(format!("{}{dir}.w {ea}", OPS[op as usize]));
    }
    let size = decode_size(opcode)?;
    let op = OPS[((opcode >> 3) & 3) as usize];
    let dir = if opcode & 0x0100 != 0 { "l" } else { "r" };
    let n = opcode & 7;
    let field = (opcode >> 9) & 7;
    let count = if opcode & 0x0020 == 0 {
        let c = if field == 0 { 8 } else { field };
        format!("#{c}")
    } else {
        format!("d{field}")
    };
    Some(format!("{op}{dir}.{} {count}, d{n}", size_suffix(size)))
}

fn dasm_f(_r: &mut Reader, opcode: u16, _targets: &mut BranchTargets) -> Option<String> {
    // Coprocessor space; rendered textually only.
    Some(format!("fline 0x{opcode:04X} /* cp {} */", (opcode >> 9) & 7))
}

type DasmFn = fn(&mut Reader, u16, &mut BranchTargets) -> Option<String>;

const DASM_FNS: [DasmFn; 16] = [
    dasm_0123, dasm_0123, dasm_0123, dasm_0123, dasm_4, dasm_5, dasm_6, dasm_7, dasm_8, dasm_9d,
    dasm_a, dasm_b, dasm_c, dasm_9d, dasm_e, dasm_f,
];

/// Disassemble one instruction at `data[0]` (loaded at `start_address`).
/// Returns the text and the number of bytes consumed.
pub fn disassemble_one(
    data: &[u8],
    start_address: u32,
    targets: &mut BranchTargets,
) -> (String, usize) {
    let mut r = Reader::new(data, start_address);
    let Some(opcode) = r.u16() else {
        return (".incomplete".to_string(), data.len());
    };
    match DASM_FNS[(opcode >> 12) as usize](&mut r, opcode, targets) {
        Some(text) => (text, r.pos),
        None => (format!(".incomplete 0x{opcode:04X}"), data.len()),
    }
}

/// Disassemble a whole buffer, labelling collected branch targets.
pub fn disassemble(data: &[u8], start_address: u32) -> String {
    let mut targets = BranchTargets::new();
    // First pass collects targets so labels can precede their referents.
    let mut offsets = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let (_, len) = disassemble_one(&data[pos..], start_address + pos as u32, &mut targets);
        offsets.push(pos);
        pos += len.max(2);
    }

    let mut out = String::new();
    let mut throwaway = BranchTargets::new();
    for &pos in &offsets {
        let addr = start_address + pos as u32;
        if let Some(&is_call) = targets.get(&addr) {
            let _ = writeln!(
                out,
                "{}_{:08X}:",
                if is_call { "fn" } else { "label" },
                addr
            );
        }
        let (text, len) = disassemble_one(&data[pos..], addr, &mut throwaway);
        let raw: String = data[pos..(pos + len).min(data.len())]
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect();
        let _ = writeln!(out, "  {addr:08X}  {raw:<20} {text}");
    }
    out
}

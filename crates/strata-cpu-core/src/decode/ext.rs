//! Builders for the two-byte (`0F xx`) opcode map.

use strata_x86::{DecodeError, Operand, OperandSize, SegReg};

use super::primary::system_assist;
use super::OpDecoder;
use crate::alu::Cond;
use crate::fault::AssistReason;
use crate::insn::{BitOp, DescTableOp, Insn, ShiftCount, Src};

type Decoded = Result<Insn, DecodeError>;

/// `0F 00`: SLDT/STR/LLDT/LTR/VERR/VERW.
pub(super) fn group6(d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    let reg = (d.cur.peek()? >> 3) & 7;
    let mnemonic = match reg {
        0 => "sldt",
        1 => "str",
        2 => "lldt",
        3 => "ltr",
        4 => "verr",
        5 => "verw",
        _ => return Err(d.invalid()),
    };
    system_assist(d, mnemonic)
}

/// `0F 01`: SGDT/SIDT/LGDT/LIDT/SMSW/LMSW/INVLPG.
pub(super) fn group7(d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    let m = d.modrm()?;
    let size = d.opsize;
    Ok(match m.reg {
        0..=3 => {
            let op = match m.reg {
                0 => DescTableOp::Sgdt,
                1 => DescTableOp::Sidt,
                2 => DescTableOp::Lgdt,
                _ => DescTableOp::Lidt,
            };
            Insn::DescTable {
                op,
                size,
                mem: d.mem(m)?,
            }
        }
        4 => Insn::Smsw {
            size,
            dst: d.rm(m)?,
        },
        6 => Insn::Lmsw { src: d.rm(m)? },
        7 => {
            d.mem(m)?;
            Insn::Assist {
                reason: AssistReason::Invlpg,
                mnemonic: "invlpg",
            }
        }
        _ => return Err(d.invalid()),
    })
}

/// `0F 02 0F 03`: LAR/LSL.
pub(super) fn lar_lsl(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    system_assist(d, if op == 0x02 { "lar" } else { "lsl" })
}

/// `0F 06 08 09 0B 31 A2`: operand-less system instructions.
pub(super) fn system(_d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    Ok(match op {
        0x06 => Insn::Clts,
        0x08 => Insn::CacheFlush { writeback: false },
        0x09 => Insn::CacheFlush { writeback: true },
        0x0B => Insn::Ud2,
        0x31 => Insn::Assist {
            reason: AssistReason::Rdtsc,
            mnemonic: "rdtsc",
        },
        _ => Insn::Assist {
            reason: AssistReason::Cpuid,
            mnemonic: "cpuid",
        },
    })
}

/// `0F 18-1F`: prefetch hints and multi-byte NOP.
pub(super) fn nop_rm(d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    let m = d.modrm()?;
    d.rm(m)?;
    Ok(Insn::Nop)
}

/// `0F 20 0F 22`: MOV to/from CR0/CR2/CR3/CR4. The mod field is ignored.
pub(super) fn mov_cr(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let m = d.modrm()?;
    if !matches!(m.reg, 0 | 2 | 3 | 4) {
        return Err(d.invalid());
    }
    Ok(Insn::MovCr {
        to_cr: op == 0x22,
        cr: m.reg,
        reg: m.rm,
    })
}

/// `0F 21 0F 23`.
pub(super) fn mov_dr(d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    d.modrm()?;
    Ok(Insn::Assist {
        reason: AssistReason::DebugRegister,
        mnemonic: "mov dr",
    })
}

/// `0F 40-4F`.
pub(super) fn cmovcc(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let m = d.modrm()?;
    let src = d.rm(m)?;
    Ok(Insn::Cmovcc {
        cond: Cond::from_opcode(op),
        size: d.opsize,
        dst: m.reg,
        src,
    })
}

/// `0F 80-8F`.
pub(super) fn jcc_near(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    Ok(Insn::Jcc {
        cond: Cond::from_opcode(op),
        target: d.rel()?,
    })
}

/// `0F 90-9F`.
pub(super) fn setcc(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let m = d.modrm()?;
    let dst = d.rm(m)?;
    Ok(Insn::Setcc {
        cond: Cond::from_opcode(op),
        dst,
    })
}

/// `0F A0 A1 A8 A9`: PUSH/POP FS and GS.
pub(super) fn fs_gs(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let seg = if op < 0xA8 { SegReg::Fs } else { SegReg::Gs };
    let size = d.opsize;
    Ok(if op & 1 == 0 {
        Insn::PushSeg { seg, size }
    } else {
        Insn::PopSeg { seg, size }
    })
}

/// `0F A3 AB B3 BB`: BT/BTS/BTR/BTC r/m, r.
pub(super) fn bit_reg(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let bit_op = match op {
        0xA3 => BitOp::Bt,
        0xAB => BitOp::Bts,
        0xB3 => BitOp::Btr,
        _ => BitOp::Btc,
    };
    let m = d.modrm()?;
    let base = d.rm(m)?;
    Ok(Insn::Bit {
        op: bit_op,
        size: d.opsize,
        base,
        bit: Src::Op(Operand::Reg(m.reg)),
    })
}

/// `0F BA /4-7`: BT/BTS/BTR/BTC r/m, imm8.
pub(super) fn group8(d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    let m = d.modrm()?;
    let bit_op = match m.reg {
        4 => BitOp::Bt,
        5 => BitOp::Bts,
        6 => BitOp::Btr,
        7 => BitOp::Btc,
        _ => return Err(d.invalid()),
    };
    let base = d.rm(m)?;
    Ok(Insn::Bit {
        op: bit_op,
        size: d.opsize,
        base,
        bit: Src::Imm(d.imm8()? as u32),
    })
}

/// `0F A4 A5 AC AD`: SHLD/SHRD.
pub(super) fn double_shift(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let m = d.modrm()?;
    let dst = d.rm(m)?;
    let count = if op & 1 == 0 {
        ShiftCount::Imm(d.imm8()?)
    } else {
        ShiftCount::Cl
    };
    Ok(Insn::DoubleShift {
        left: op < 0xA8,
        size: d.opsize,
        dst,
        src: m.reg,
        count,
    })
}

/// `0F AF`.
pub(super) fn imul(d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    let m = d.modrm()?;
    let src = d.rm(m)?;
    Ok(Insn::Imul {
        size: d.opsize,
        dst: m.reg,
        src,
        imm: None,
    })
}

/// `0F B0 B1 C0 C1`: CMPXCHG and XADD.
pub(super) fn rmw_exchange(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let size = d.byte_or(op);
    let m = d.modrm()?;
    let dst = d.rm(m)?;
    Ok(if op < 0xC0 {
        Insn::Cmpxchg {
            size,
            dst,
            reg: m.reg,
        }
    } else {
        Insn::Xadd {
            size,
            dst,
            reg: m.reg,
        }
    })
}

/// `0F B2 B4 B5`: LSS/LFS/LGS.
pub(super) fn load_far_ptr(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let seg = match op {
        0xB2 => SegReg::Ss,
        0xB4 => SegReg::Fs,
        _ => SegReg::Gs,
    };
    let m = d.modrm()?;
    let mem = d.mem(m)?;
    Ok(Insn::LoadFarPtr {
        seg,
        size: d.opsize,
        dst: m.reg,
        mem,
    })
}

/// `0F B6 B7 BE BF`: MOVZX/MOVSX.
pub(super) fn mov_extend(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let from = if op & 1 == 0 {
        OperandSize::Byte
    } else {
        OperandSize::Word
    };
    let m = d.modrm()?;
    let src = d.rm(m)?;
    Ok(Insn::MovExtend {
        signed: op >= 0xBE,
        from,
        size: d.opsize,
        dst: m.reg,
        src,
    })
}

/// `0F BC BD`.
pub(super) fn bit_scan(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let m = d.modrm()?;
    let src = d.rm(m)?;
    Ok(Insn::BitScan {
        reverse: op == 0xBD,
        size: d.opsize,
        dst: m.reg,
        src,
    })
}

/// `0F C8-CF`.
pub(super) fn bswap(_d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    Ok(Insn::Bswap { reg: op & 7 })
}

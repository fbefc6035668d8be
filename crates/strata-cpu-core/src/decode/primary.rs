//! Builders for the one-byte opcode map.

use strata_x86::{DecodeError, MemRef, Operand, OperandSize, SegReg};

use super::OpDecoder;
use crate::alu::Cond;
use crate::fault::AssistReason;
use crate::insn::{
    AluOp, BcdOp, FlagOp, Insn, LoopKind, MulDivOp, Port, ShiftCount, ShiftOp, Src, StrOp,
};
use crate::state::CpuMode;

type Decoded = Result<Insn, DecodeError>;

pub(super) fn invalid(d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    Err(d.invalid())
}

/// `00-3D`: the eight ALU operations in their six encodings each.
pub(super) fn alu(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let alu = AluOp::from_index(op >> 3);
    let size = d.byte_or(op);
    match op & 7 {
        0 | 1 => {
            let m = d.modrm()?;
            let dst = d.rm(m)?;
            Ok(Insn::Alu {
                op: alu,
                size,
                dst,
                src: Src::Op(Operand::Reg(m.reg)),
            })
        }
        2 | 3 => {
            let m = d.modrm()?;
            let src = d.rm(m)?;
            Ok(Insn::Alu {
                op: alu,
                size,
                dst: Operand::Reg(m.reg),
                src: Src::Op(src),
            })
        }
        _ => Ok(Insn::Alu {
            op: alu,
            size,
            dst: Operand::Reg(0),
            src: Src::Imm(d.imm(size)?),
        }),
    }
}

/// `80-83`: ALU r/m, imm.
pub(super) fn group1(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let m = d.modrm()?;
    let dst = d.rm(m)?;
    let (size, imm) = match op {
        0x80 | 0x82 => (OperandSize::Byte, d.imm(OperandSize::Byte)?),
        0x81 => (d.opsize, d.imm(d.opsize)?),
        _ => (d.opsize, d.simm8(d.opsize)?),
    };
    Ok(Insn::Alu {
        op: AluOp::from_index(m.reg),
        size,
        dst,
        src: Src::Imm(imm),
    })
}

fn seg_of(op: u8) -> SegReg {
    match (op >> 3) & 3 {
        0 => SegReg::Es,
        1 => SegReg::Cs,
        2 => SegReg::Ss,
        _ => SegReg::Ds,
    }
}

/// `06 0E 16 1E`.
pub(super) fn push_seg(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    Ok(Insn::PushSeg {
        seg: seg_of(op),
        size: d.opsize,
    })
}

/// `07 17 1F`.
pub(super) fn pop_seg(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    Ok(Insn::PopSeg {
        seg: seg_of(op),
        size: d.opsize,
    })
}

/// `27 2F 37 3F`.
pub(super) fn bcd(_d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    Ok(Insn::Bcd(match op {
        0x27 => BcdOp::Daa,
        0x2F => BcdOp::Das,
        0x37 => BcdOp::Aaa,
        _ => BcdOp::Aas,
    }))
}

/// `40-4F`.
pub(super) fn inc_dec_reg(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    Ok(Insn::IncDec {
        dec: op & 8 != 0,
        size: d.opsize,
        dst: Operand::Reg(op & 7),
    })
}

/// `50-57`.
pub(super) fn push_reg(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    Ok(Insn::Push {
        size: d.opsize,
        src: Src::Op(Operand::Reg(op & 7)),
    })
}

/// `58-5F`.
pub(super) fn pop_reg(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    Ok(Insn::Pop {
        size: d.opsize,
        dst: Operand::Reg(op & 7),
    })
}

pub(super) fn pusha(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    Ok(if op == 0x60 {
        Insn::Pusha { size: d.opsize }
    } else {
        Insn::Popa { size: d.opsize }
    })
}

pub(super) fn bound(d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    let m = d.modrm()?;
    let mem = d.mem(m)?;
    Ok(Insn::Bound {
        size: d.opsize,
        reg: m.reg,
        mem,
    })
}

/// `63`: ARPL is not recognised in real or virtual-8086 mode.
pub(super) fn arpl(d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    if d.mode() != CpuMode::Protected {
        return Err(d.invalid());
    }
    let m = d.modrm()?;
    let dst = d.rm(m)?;
    Ok(Insn::Arpl { dst, reg: m.reg })
}

/// `68 6A`.
pub(super) fn push_imm(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let imm = if op == 0x68 {
        d.imm(d.opsize)?
    } else {
        d.simm8(d.opsize)?
    };
    Ok(Insn::Push {
        size: d.opsize,
        src: Src::Imm(imm),
    })
}

/// `69 6B`: IMUL r, r/m, imm.
pub(super) fn imul_imm(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let m = d.modrm()?;
    let src = d.rm(m)?;
    let imm = if op == 0x69 {
        d.imm(d.opsize)?
    } else {
        d.simm8(d.opsize)?
    };
    Ok(Insn::Imul {
        size: d.opsize,
        dst: m.reg,
        src,
        imm: Some(imm),
    })
}

/// `6C-6F A4-A7 AA-AF`.
pub(super) fn string(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let kind = match op & !1 {
        0x6C => StrOp::Ins,
        0x6E => StrOp::Outs,
        0xA4 => StrOp::Movs,
        0xA6 => StrOp::Cmps,
        0xAA => StrOp::Stos,
        0xAC => StrOp::Lods,
        _ => StrOp::Scas,
    };
    Ok(Insn::Str {
        op: kind,
        size: d.byte_or(op),
        rep: d.prefixes.rep,
        seg: d.string_segment(),
        addr_size: d.addr_size,
        mode: d.mode(),
    })
}

/// `70-7F`.
pub(super) fn jcc_short(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    Ok(Insn::Jcc {
        cond: Cond::from_opcode(op),
        target: d.rel8()?,
    })
}

/// `84 85 86 87 88 89 8A 8B`.
pub(super) fn modrm_pair(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let size = d.byte_or(op);
    let m = d.modrm()?;
    let rm = d.rm(m)?;
    let reg = m.reg;
    Ok(match op {
        0x84 | 0x85 => Insn::Test {
            size,
            dst: rm,
            src: Src::Op(Operand::Reg(reg)),
        },
        0x86 | 0x87 => Insn::Xchg { size, dst: rm, reg },
        0x88 | 0x89 => Insn::Mov {
            size,
            dst: rm,
            src: Src::Op(Operand::Reg(reg)),
        },
        _ => Insn::Mov {
            size,
            dst: Operand::Reg(reg),
            src: Src::Op(rm),
        },
    })
}

/// `8C`: MOV r/m, Sreg.
pub(super) fn mov_from_seg(d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    let m = d.modrm()?;
    let seg = SegReg::from_index(m.reg).ok_or(d.invalid())?;
    let dst = d.rm(m)?;
    Ok(Insn::MovFromSeg {
        seg,
        size: d.opsize,
        dst,
    })
}

/// `8D`.
pub(super) fn lea(d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    let m = d.modrm()?;
    let mem = d.mem(m)?;
    Ok(Insn::Lea {
        size: d.opsize,
        dst: m.reg,
        mem,
    })
}

/// `8E`: MOV Sreg, r/m. CS is not a valid destination.
pub(super) fn mov_to_seg(d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    let m = d.modrm()?;
    let seg = match SegReg::from_index(m.reg) {
        Some(seg) if seg != SegReg::Cs => seg,
        _ => return Err(d.invalid()),
    };
    let src = d.rm(m)?;
    Ok(Insn::MovToSeg { seg, src })
}

/// `8F /0`.
pub(super) fn pop_rm(d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    let m = d.modrm()?;
    if m.reg != 0 {
        return Err(d.invalid());
    }
    let dst = d.rm(m)?;
    Ok(Insn::Pop {
        size: d.opsize,
        dst,
    })
}

/// `90-97`: NOP / PAUSE and XCHG with the accumulator.
pub(super) fn xchg_acc(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    if op == 0x90 {
        return Ok(Insn::Nop);
    }
    Ok(Insn::Xchg {
        size: d.opsize,
        dst: Operand::Reg(op & 7),
        reg: 0,
    })
}

/// `98 99 9B 9C 9D 9E 9F`.
pub(super) fn misc_9x(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let size = d.opsize;
    Ok(match op {
        0x98 => Insn::Cbw { size },
        0x99 => Insn::Cwd { size },
        0x9B => Insn::Wait,
        0x9C => Insn::Pushf {
            size,
            mode: d.mode(),
        },
        0x9D => Insn::Popf {
            size,
            mode: d.mode(),
        },
        0x9E => Insn::Sahf,
        _ => Insn::Lahf,
    })
}

/// `9A EA`: direct far CALL/JMP `ptr16:16/32`.
pub(super) fn far_ptr(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let size = d.opsize;
    let offset = d.imm(size)?;
    let selector = d.imm16()?;
    Ok(if op == 0x9A {
        Insn::CallFar {
            size,
            selector,
            offset,
        }
    } else {
        Insn::JmpFar {
            size,
            selector,
            offset,
        }
    })
}

/// `A0-A3`: MOV with a direct memory offset.
pub(super) fn mov_moffs(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let size = d.byte_or(op);
    let mem = Operand::Mem(d.moffs()?);
    let acc = Operand::Reg(0);
    Ok(if op < 0xA2 {
        Insn::Mov {
            size,
            dst: acc,
            src: Src::Op(mem),
        }
    } else {
        Insn::Mov {
            size,
            dst: mem,
            src: Src::Op(acc),
        }
    })
}

/// `A8 A9`.
pub(super) fn test_acc(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let size = d.byte_or(op);
    Ok(Insn::Test {
        size,
        dst: Operand::Reg(0),
        src: Src::Imm(d.imm(size)?),
    })
}

/// `B0-BF`.
pub(super) fn mov_reg_imm(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let size = if op < 0xB8 {
        OperandSize::Byte
    } else {
        d.opsize
    };
    Ok(Insn::Mov {
        size,
        dst: Operand::Reg(op & 7),
        src: Src::Imm(d.imm(size)?),
    })
}

/// `C0 C1 D0-D3`.
pub(super) fn shift_group(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let size = d.byte_or(op);
    let m = d.modrm()?;
    let dst = d.rm(m)?;
    let count = match op {
        0xC0 | 0xC1 => ShiftCount::Imm(d.imm8()?),
        0xD0 | 0xD1 => ShiftCount::One,
        _ => ShiftCount::Cl,
    };
    Ok(Insn::Shift {
        op: ShiftOp::from_index(m.reg),
        size,
        dst,
        count,
    })
}

/// `C2 C3 CA CB`.
pub(super) fn ret(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let pop = if op & 1 == 0 { d.imm16()? } else { 0 };
    let size = d.opsize;
    Ok(if op < 0xC8 {
        Insn::Ret { size, pop }
    } else {
        Insn::RetFar { size, pop }
    })
}

/// `C4 C5` (LES/LDS).
pub(super) fn load_far_ptr(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let seg = if op == 0xC4 { SegReg::Es } else { SegReg::Ds };
    let m = d.modrm()?;
    let mem = d.mem(m)?;
    Ok(Insn::LoadFarPtr {
        seg,
        size: d.opsize,
        dst: m.reg,
        mem,
    })
}

/// `C6 /0 C7 /0`.
pub(super) fn mov_rm_imm(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let size = d.byte_or(op);
    let m = d.modrm()?;
    if m.reg != 0 {
        return Err(d.invalid());
    }
    let dst = d.rm(m)?;
    Ok(Insn::Mov {
        size,
        dst,
        src: Src::Imm(d.imm(size)?),
    })
}

pub(super) fn enter(d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    let frame = d.imm16()?;
    let level = d.imm8()?;
    Ok(Insn::Enter {
        size: d.opsize,
        frame,
        level,
    })
}

pub(super) fn leave(d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    Ok(Insn::Leave { size: d.opsize })
}

/// `CC CD CE CF F1`.
pub(super) fn interrupt(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let mode = d.mode();
    Ok(match op {
        0xCC => Insn::Int3 { mode },
        0xCD => Insn::Int {
            vector: d.imm8()?,
            mode,
        },
        0xCE => Insn::Into { mode },
        0xCF => Insn::Iret {
            size: d.opsize,
            mode,
        },
        _ => Insn::Int1,
    })
}

/// `D4 D5 D6`.
pub(super) fn ascii_adjust(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    Ok(match op {
        0xD4 => Insn::Bcd(BcdOp::Aam(d.imm8()?)),
        0xD5 => Insn::Bcd(BcdOp::Aad(d.imm8()?)),
        _ => Insn::Salc,
    })
}

/// `D7`: XLAT `seg:[bx+al]`.
pub(super) fn xlat(d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    Ok(Insn::Xlat {
        mem: MemRef {
            segment: d.prefixes.segment_or(SegReg::Ds),
            seg_override: d.prefixes.segment.is_some(),
            base: Some(3),
            index: None,
            scale: 1,
            disp: 0,
            addr_size: d.addr_size,
        },
    })
}

/// `D8-DF`: x87 escapes, decoded for length only.
pub(super) fn fpu(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let m = d.modrm()?;
    d.rm(m)?;
    Ok(Insn::Fpu {
        opcode: op,
        modrm: m.mod_ << 6 | m.reg << 3 | m.rm,
    })
}

/// `E0-E3`.
pub(super) fn loop_(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let kind = match op {
        0xE0 => LoopKind::Loopne,
        0xE1 => LoopKind::Loope,
        0xE2 => LoopKind::Loop,
        _ => LoopKind::Jcxz,
    };
    Ok(Insn::Loop {
        kind,
        addr_size: d.addr_size,
        target: d.rel8()?,
    })
}

/// `E4-E7 EC-EF`.
pub(super) fn in_out(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let size = d.byte_or(op);
    let port = if op < 0xE8 {
        Port::Imm(d.imm8()?)
    } else {
        Port::Dx
    };
    let mode = d.mode();
    Ok(if op & 2 == 0 {
        Insn::In { size, port, mode }
    } else {
        Insn::Out { size, port, mode }
    })
}

/// `E8 E9 EB`.
pub(super) fn rel_transfer(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    Ok(match op {
        0xE8 => Insn::Call {
            size: d.opsize,
            target: d.rel()?,
        },
        0xE9 => Insn::Jmp { target: d.rel()? },
        _ => Insn::Jmp { target: d.rel8()? },
    })
}

pub(super) fn hlt(_d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    Ok(Insn::Hlt)
}

/// `F5 F8-FD`.
pub(super) fn flag(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let op = match op {
        0xF5 => FlagOp::Cmc,
        0xF8 => FlagOp::Clc,
        0xF9 => FlagOp::Stc,
        0xFA => FlagOp::Cli,
        0xFB => FlagOp::Sti,
        0xFC => FlagOp::Cld,
        _ => FlagOp::Std,
    };
    Ok(Insn::Flag {
        op,
        mode: d.mode(),
    })
}

/// `F6 F7`: TEST/NOT/NEG/MUL/IMUL/DIV/IDIV.
pub(super) fn group3(d: &mut OpDecoder<'_, '_>, op: u8) -> Decoded {
    let size = d.byte_or(op);
    let m = d.modrm()?;
    let dst = d.rm(m)?;
    let muldiv = |op| Insn::MulDiv { op, size, src: dst };
    Ok(match m.reg {
        0 | 1 => Insn::Test {
            size,
            dst,
            src: Src::Imm(d.imm(size)?),
        },
        2 => Insn::Not { size, dst },
        3 => Insn::Neg { size, dst },
        4 => muldiv(MulDivOp::Mul),
        5 => muldiv(MulDivOp::Imul),
        6 => muldiv(MulDivOp::Div),
        _ => muldiv(MulDivOp::Idiv),
    })
}

/// `FE`: INC/DEC r/m8.
pub(super) fn group4(d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    let m = d.modrm()?;
    if m.reg > 1 {
        return Err(d.invalid());
    }
    let dst = d.rm(m)?;
    Ok(Insn::IncDec {
        dec: m.reg == 1,
        size: OperandSize::Byte,
        dst,
    })
}

/// `FF`: INC/DEC/CALL/CALLF/JMP/JMPF/PUSH r/m.
pub(super) fn group5(d: &mut OpDecoder<'_, '_>, _op: u8) -> Decoded {
    let m = d.modrm()?;
    let size = d.opsize;
    Ok(match m.reg {
        0 | 1 => Insn::IncDec {
            dec: m.reg == 1,
            size,
            dst: d.rm(m)?,
        },
        2 => Insn::CallIndirect {
            size,
            src: d.rm(m)?,
        },
        3 => Insn::CallFarIndirect {
            size,
            mem: d.mem(m)?,
        },
        4 => Insn::JmpIndirect {
            size,
            src: d.rm(m)?,
        },
        5 => Insn::JmpFarIndirect {
            size,
            mem: d.mem(m)?,
        },
        6 => Insn::Push {
            size,
            src: Src::Op(d.rm(m)?),
        },
        _ => return Err(d.invalid()),
    })
}

/// Protected-mode-only instructions (descriptor tables, selectors) handed to the driver.
pub(super) fn system_assist(d: &mut OpDecoder<'_, '_>, mnemonic: &'static str) -> Decoded {
    if d.mode() != CpuMode::Protected {
        return Err(d.invalid());
    }
    let m = d.modrm()?;
    d.rm(m)?;
    Ok(Insn::Assist {
        reason: AssistReason::SystemInstruction,
        mnemonic,
    })
}

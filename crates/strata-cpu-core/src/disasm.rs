//! Intel-syntax rendering of decoded units, and the pure disassembly and
//! length queries exposed to the control surface.

use std::fmt::{self, Write as _};

use strata_x86::{reg_name, DecodeCursor, DecodeError, Operand, OperandSize, RepPrefix};

use crate::decode::{decode_unit, DecodeCtx};
use crate::insn::{
    AluOp, BcdOp, BitOp, DescTableOp, FlagOp, Insn, LoopKind, MulDivOp, Port, ShiftCount, ShiftOp,
    Src, StrOp, Unit,
};
use crate::state::CpuMode;

fn ctx_for(is_32bit: bool) -> DecodeCtx {
    if is_32bit {
        DecodeCtx::new(CpuMode::Protected, true)
    } else {
        DecodeCtx::new(CpuMode::Real, false)
    }
}

/// Disassemble up to `count` instructions from `bytes` (origin 0), one per line
/// as `address: text`. Stops early at the end of the buffer.
pub fn disassemble(bytes: &[u8], count: usize, is_32bit: bool) -> Result<String, DecodeError> {
    let ctx = ctx_for(is_32bit);
    let mut cursor = DecodeCursor::new(bytes, 0);
    let mut out = String::new();
    for _ in 0..count {
        if cursor.is_empty() {
            break;
        }
        let unit = decode_unit(&mut cursor, ctx)?;
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = write!(out, "{:08x}: {unit}", unit.eip());
    }
    Ok(out)
}

/// Encoded length of the first instruction in `bytes`.
pub fn instruction_length(bytes: &[u8], is_32bit: bool) -> Result<usize, DecodeError> {
    let mut cursor = DecodeCursor::new(bytes, 0);
    decode_unit(&mut cursor, ctx_for(is_32bit)).map(|unit| unit.len() as usize)
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.insn().fmt(f)
    }
}

fn alu_name(op: AluOp) -> &'static str {
    match op {
        AluOp::Add => "add",
        AluOp::Or => "or",
        AluOp::Adc => "adc",
        AluOp::Sbb => "sbb",
        AluOp::And => "and",
        AluOp::Sub => "sub",
        AluOp::Xor => "xor",
        AluOp::Cmp => "cmp",
    }
}

fn shift_name(op: ShiftOp) -> &'static str {
    match op {
        ShiftOp::Rol => "rol",
        ShiftOp::Ror => "ror",
        ShiftOp::Rcl => "rcl",
        ShiftOp::Rcr => "rcr",
        ShiftOp::Shl => "shl",
        ShiftOp::Shr => "shr",
        ShiftOp::Sal => "sal",
        ShiftOp::Sar => "sar",
    }
}

fn size_suffix(size: OperandSize) -> char {
    match size {
        OperandSize::Byte => 'b',
        OperandSize::Word => 'w',
        OperandSize::Dword => 'd',
    }
}

struct SrcDisplay<'a>(&'a Src, OperandSize);

impl fmt::Display for SrcDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Src::Op(op) => op.display(self.1).fmt(f),
            Src::Imm(v) => write!(f, "0x{v:x}"),
        }
    }
}

struct CountDisplay(ShiftCount);

impl fmt::Display for CountDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            ShiftCount::One => f.write_str("1"),
            ShiftCount::Imm(n) => write!(f, "0x{n:x}"),
            ShiftCount::Cl => f.write_str("cl"),
        }
    }
}

fn far(size: OperandSize) -> &'static str {
    match size {
        OperandSize::Dword => "far dword",
        _ => "far word",
    }
}

fn reg(index: u8, size: OperandSize) -> &'static str {
    reg_name(index, size)
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Insn::*;
        match *self {
            Alu { op, size, dst, src } => write!(
                f,
                "{} {}, {}",
                alu_name(op),
                dst.display(size),
                SrcDisplay(&src, size)
            ),
            Test { size, dst, src } => {
                write!(f, "test {}, {}", dst.display(size), SrcDisplay(&src, size))
            }
            IncDec { dec, size, dst } => {
                write!(f, "{} {}", if dec { "dec" } else { "inc" }, dst.display(size))
            }
            Not { size, dst } => write!(f, "not {}", dst.display(size)),
            Neg { size, dst } => write!(f, "neg {}", dst.display(size)),
            MulDiv { op, size, src } => {
                let name = match op {
                    MulDivOp::Mul => "mul",
                    MulDivOp::Imul => "imul",
                    MulDivOp::Div => "div",
                    MulDivOp::Idiv => "idiv",
                };
                write!(f, "{name} {}", src.display(size))
            }
            Imul { size, dst, src, imm } => {
                write!(f, "imul {}, {}", reg(dst, size), src.display(size))?;
                if let Some(imm) = imm {
                    write!(f, ", 0x{imm:x}")?;
                }
                Ok(())
            }
            Shift { op, size, dst, count } => write!(
                f,
                "{} {}, {}",
                shift_name(op),
                dst.display(size),
                CountDisplay(count)
            ),
            DoubleShift { left, size, dst, src, count } => write!(
                f,
                "{} {}, {}, {}",
                if left { "shld" } else { "shrd" },
                dst.display(size),
                reg(src, size),
                CountDisplay(count)
            ),
            Bit { op, size, base, bit } => {
                let name = match op {
                    BitOp::Bt => "bt",
                    BitOp::Bts => "bts",
                    BitOp::Btr => "btr",
                    BitOp::Btc => "btc",
                };
                write!(f, "{name} {}, {}", base.display(size), SrcDisplay(&bit, size))
            }
            BitScan { reverse, size, dst, src } => write!(
                f,
                "{} {}, {}",
                if reverse { "bsr" } else { "bsf" },
                reg(dst, size),
                src.display(size)
            ),
            Bcd(op) => match op {
                BcdOp::Daa => f.write_str("daa"),
                BcdOp::Das => f.write_str("das"),
                BcdOp::Aaa => f.write_str("aaa"),
                BcdOp::Aas => f.write_str("aas"),
                BcdOp::Aam(base) => write!(f, "aam 0x{base:x}"),
                BcdOp::Aad(base) => write!(f, "aad 0x{base:x}"),
            },
            Salc => f.write_str("salc"),

            Mov { size, dst, src } => {
                write!(f, "mov {}, {}", dst.display(size), SrcDisplay(&src, size))
            }
            MovFromSeg { seg, size, dst } => {
                let size = if dst.is_memory() { OperandSize::Word } else { size };
                write!(f, "mov {}, {seg}", dst.display(size))
            }
            MovToSeg { seg, src } => write!(f, "mov {seg}, {}", src.display(OperandSize::Word)),
            MovExtend { signed, from, size, dst, src } => write!(
                f,
                "{} {}, {}",
                if signed { "movsx" } else { "movzx" },
                reg(dst, size),
                src.display(from)
            ),
            Lea { size, dst, mem } => write!(f, "lea {}, {mem}", reg(dst, size)),
            Xchg { size, dst, reg: r } => {
                write!(f, "xchg {}, {}", dst.display(size), reg(r, size))
            }
            Xadd { size, dst, reg: r } => {
                write!(f, "xadd {}, {}", dst.display(size), reg(r, size))
            }
            Cmpxchg { size, dst, reg: r } => {
                write!(f, "cmpxchg {}, {}", dst.display(size), reg(r, size))
            }
            Bswap { reg: r } => write!(f, "bswap {}", reg(r, OperandSize::Dword)),
            Cbw { size } => f.write_str(if size == OperandSize::Dword { "cwde" } else { "cbw" }),
            Cwd { size } => f.write_str(if size == OperandSize::Dword { "cdq" } else { "cwd" }),
            Lahf => f.write_str("lahf"),
            Sahf => f.write_str("sahf"),
            Xlat { mem } => write!(f, "xlat byte ptr {mem}"),
            Setcc { cond, dst } => {
                write!(f, "set{} {}", cond.suffix(), dst.display(OperandSize::Byte))
            }
            Cmovcc { cond, size, dst, src } => write!(
                f,
                "cmov{} {}, {}",
                cond.suffix(),
                reg(dst, size),
                src.display(size)
            ),
            LoadFarPtr { seg, size, dst, mem } => {
                write!(f, "l{seg} {}, {} ptr {mem}", reg(dst, size), far(size))
            }
            Bound { size, reg: r, mem } => write!(f, "bound {}, {mem}", reg(r, size)),
            Arpl { dst, reg: r } => write!(
                f,
                "arpl {}, {}",
                dst.display(OperandSize::Word),
                reg(r, OperandSize::Word)
            ),

            Push { size, src } => match src {
                Src::Imm(v) => write!(f, "push {} 0x{v:x}", size.ptr_name()),
                Src::Op(op) => write!(f, "push {}", op.display(size)),
            },
            Pop { size, dst } => write!(f, "pop {}", dst.display(size)),
            PushSeg { seg, .. } => write!(f, "push {seg}"),
            PopSeg { seg, .. } => write!(f, "pop {seg}"),
            Pusha { size } => f.write_str(if size == OperandSize::Dword { "pushad" } else { "pusha" }),
            Popa { size } => f.write_str(if size == OperandSize::Dword { "popad" } else { "popa" }),
            Pushf { size, .. } => f.write_str(if size == OperandSize::Dword { "pushfd" } else { "pushf" }),
            Popf { size, .. } => f.write_str(if size == OperandSize::Dword { "popfd" } else { "popf" }),
            Enter { frame, level, .. } => write!(f, "enter 0x{frame:x}, 0x{level:x}"),
            Leave { .. } => f.write_str("leave"),

            Jcc { cond, target } => write!(f, "j{} 0x{target:x}", cond.suffix()),
            Jmp { target } => write!(f, "jmp 0x{target:x}"),
            JmpIndirect { size, src } => write!(f, "jmp {}", src.display(size)),
            JmpFar { selector, offset, .. } => write!(f, "jmp 0x{selector:x}:0x{offset:x}"),
            JmpFarIndirect { size, mem } => write!(f, "jmp {} ptr {mem}", far(size)),
            Call { target, .. } => write!(f, "call 0x{target:x}"),
            CallIndirect { size, src } => write!(f, "call {}", src.display(size)),
            CallFar { selector, offset, .. } => write!(f, "call 0x{selector:x}:0x{offset:x}"),
            CallFarIndirect { size, mem } => write!(f, "call {} ptr {mem}", far(size)),
            Ret { pop, .. } | RetFar { pop, .. } => {
                f.write_str(if matches!(self, RetFar { .. }) { "retf" } else { "ret" })?;
                if pop != 0 {
                    write!(f, " 0x{pop:x}")?;
                }
                Ok(())
            }
            Loop { kind, addr_size, target } => {
                let name = match kind {
                    LoopKind::Loop => "loop",
                    LoopKind::Loope => "loope",
                    LoopKind::Loopne => "loopne",
                    LoopKind::Jcxz if addr_size.bits() == 32 => "jecxz",
                    LoopKind::Jcxz => "jcxz",
                };
                write!(f, "{name} 0x{target:x}")
            }
            Int { vector, .. } => write!(f, "int 0x{vector:x}"),
            Int3 { .. } => f.write_str("int3"),
            Int1 => f.write_str("int1"),
            Into { .. } => f.write_str("into"),
            Iret { size, .. } => f.write_str(if size == OperandSize::Dword { "iretd" } else { "iret" }),
            Hlt => f.write_str("hlt"),

            Str { op, size, rep, seg, .. } => {
                let compares = matches!(op, StrOp::Cmps | StrOp::Scas);
                match rep {
                    Some(RepPrefix::Rep) if compares => f.write_str("repe ")?,
                    Some(RepPrefix::Rep) => f.write_str("rep ")?,
                    Some(RepPrefix::Repne) => f.write_str("repne ")?,
                    None => {}
                }
                let name = match op {
                    StrOp::Movs => "movs",
                    StrOp::Cmps => "cmps",
                    StrOp::Stos => "stos",
                    StrOp::Lods => "lods",
                    StrOp::Scas => "scas",
                    StrOp::Ins => "ins",
                    StrOp::Outs => "outs",
                };
                write!(f, "{name}{}", size_suffix(size))?;
                let uses_source = matches!(op, StrOp::Movs | StrOp::Cmps | StrOp::Lods | StrOp::Outs);
                if uses_source && seg != strata_x86::SegReg::Ds {
                    write!(f, " {seg}")?;
                }
                Ok(())
            }
            In { size, port, .. } => match port {
                Port::Imm(p) => write!(f, "in {}, 0x{p:x}", reg(0, size)),
                Port::Dx => write!(f, "in {}, dx", reg(0, size)),
            },
            Out { size, port, .. } => match port {
                Port::Imm(p) => write!(f, "out 0x{p:x}, {}", reg(0, size)),
                Port::Dx => write!(f, "out dx, {}", reg(0, size)),
            },

            Flag { op, .. } => f.write_str(match op {
                FlagOp::Clc => "clc",
                FlagOp::Stc => "stc",
                FlagOp::Cmc => "cmc",
                FlagOp::Cld => "cld",
                FlagOp::Std => "std",
                FlagOp::Cli => "cli",
                FlagOp::Sti => "sti",
            }),
            DescTable { op, mem, .. } => {
                let name = match op {
                    DescTableOp::Sgdt => "sgdt",
                    DescTableOp::Sidt => "sidt",
                    DescTableOp::Lgdt => "lgdt",
                    DescTableOp::Lidt => "lidt",
                };
                write!(f, "{name} {mem}")
            }
            Smsw { size, dst } => {
                let size = if dst.is_memory() { OperandSize::Word } else { size };
                write!(f, "smsw {}", dst.display(size))
            }
            Lmsw { src } => write!(f, "lmsw {}", src.display(OperandSize::Word)),
            MovCr { to_cr, cr, reg: r } => {
                let gpr = Operand::Reg(r);
                let gpr = gpr.display(OperandSize::Dword);
                if to_cr {
                    write!(f, "mov cr{cr}, {gpr}")
                } else {
                    write!(f, "mov {gpr}, cr{cr}")
                }
            }
            Clts => f.write_str("clts"),
            CacheFlush { writeback } => f.write_str(if writeback { "wbinvd" } else { "invd" }),
            Nop => f.write_str("nop"),
            Wait => f.write_str("wait"),
            Fpu { opcode, modrm } => write!(f, "fpu 0x{opcode:02x} 0x{modrm:02x}"),
            Ud2 => f.write_str("ud2"),
            Assist { mnemonic, .. } => f.write_str(mnemonic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_sib_disp32_operand() {
        // mov eax, [ebx+ecx*4+0x10]
        let text = disassemble(&[0x8B, 0x44, 0x8B, 0x10], 1, true).unwrap();
        assert_eq!(text, "00000000: mov eax, dword ptr [ebx+ecx*4+0x10]");
    }

    #[test]
    fn lists_several_instructions() {
        let text = disassemble(&[0x90, 0xF3, 0xA4, 0xC3], 8, false).unwrap();
        assert_eq!(
            text,
            "00000000: nop\n00000001: rep movsb\n00000003: ret"
        );
    }

    #[test]
    fn length_of_prefixed_instruction() {
        assert_eq!(instruction_length(&[0x66, 0x05, 1, 2, 3, 4], false), Ok(6));
        assert_eq!(instruction_length(&[0x0F, 0x0B], true), Ok(2));
        assert_eq!(instruction_length(&[0x0F, 0xFF], true), Err(DecodeError::invalid(0x0FFF)));
        assert_eq!(instruction_length(&[0xB8, 1], true), Err(DecodeError::UnexpectedEof));
    }
}

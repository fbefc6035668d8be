//! Static facts about instructions used by the block assembler and the
//! flag-liveness pass.

use strata_x86::{OperandSize, SegReg};

use super::{AluOp, BcdOp, FlagOp, Insn, LoopKind, MulDivOp, ShiftCount, ShiftOp};
use crate::alu::{ARITH_FLAGS, INCDEC_FLAGS, LOGIC_FLAGS, SZP_FLAGS};
use crate::state::Eflags;

/// Status flags an instruction may write, and those it writes on every
/// non-faulting execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagEffect {
    pub may: Eflags,
    pub must: Eflags,
}

impl FlagEffect {
    const NONE: Self = Self::always(Eflags::empty());

    const fn always(flags: Eflags) -> Self {
        Self {
            may: flags,
            must: flags,
        }
    }

    const fn maybe(flags: Eflags) -> Self {
        Self {
            may: flags,
            must: Eflags::empty(),
        }
    }
}

fn known_count(count: ShiftCount) -> Option<u32> {
    match count {
        ShiftCount::One => Some(1),
        ShiftCount::Imm(n) => Some(n as u32 & 0x1F),
        ShiftCount::Cl => None,
    }
}

fn shift_effect(op: ShiftOp, size: OperandSize, count: ShiftCount) -> FlagEffect {
    let rotate = matches!(op, ShiftOp::Rol | ShiftOp::Ror | ShiftOp::Rcl | ShiftOp::Rcr);
    let base = if rotate {
        Eflags::CF
    } else {
        Eflags::CF | SZP_FLAGS
    };
    let Some(count) = known_count(count) else {
        return FlagEffect::maybe(base | Eflags::OF);
    };
    let effective = match op {
        ShiftOp::Rcl | ShiftOp::Rcr => count % (size.bits() + 1),
        _ => count,
    };
    match effective {
        0 => FlagEffect::NONE,
        1 => FlagEffect::always(base | Eflags::OF),
        _ => FlagEffect::always(base),
    }
}

impl Insn {
    /// Status flags this instruction reads.
    pub fn flags_read(&self) -> Eflags {
        match *self {
            Insn::Alu {
                op: AluOp::Adc | AluOp::Sbb,
                ..
            } => Eflags::CF,
            Insn::Shift {
                op: ShiftOp::Rcl | ShiftOp::Rcr,
                ..
            } => Eflags::CF,
            Insn::Jcc { cond, .. } | Insn::Setcc { cond, .. } | Insn::Cmovcc { cond, .. } => {
                cond.flags_read()
            }
            Insn::Loop {
                kind: LoopKind::Loope | LoopKind::Loopne,
                ..
            } => Eflags::ZF,
            Insn::Bcd(BcdOp::Daa | BcdOp::Das) => Eflags::CF | Eflags::AF,
            Insn::Bcd(BcdOp::Aaa | BcdOp::Aas) => Eflags::AF,
            Insn::Salc | Insn::Flag { op: FlagOp::Cmc, .. } => Eflags::CF,
            Insn::Lahf => Eflags::SF | Eflags::ZF | Eflags::AF | Eflags::PF | Eflags::CF,
            Insn::Into { .. } => Eflags::OF,
            Insn::Pushf { .. } | Insn::Int { .. } | Insn::Int3 { .. } | Insn::Int1 => {
                Eflags::STATUS
            }
            _ => Eflags::empty(),
        }
    }

    /// Status flags this instruction writes.
    pub fn flag_effect(&self) -> FlagEffect {
        match *self {
            Insn::Alu {
                op: AluOp::And | AluOp::Or | AluOp::Xor,
                ..
            }
            | Insn::Test { .. }
            | Insn::Imul { .. }
            | Insn::MulDiv {
                op: MulDivOp::Imul,
                ..
            } => FlagEffect::always(LOGIC_FLAGS),
            Insn::Alu { .. } | Insn::Neg { .. } | Insn::Xadd { .. } | Insn::Cmpxchg { .. } => {
                FlagEffect::always(ARITH_FLAGS)
            }
            Insn::IncDec { .. } => FlagEffect::always(INCDEC_FLAGS),
            Insn::MulDiv {
                op: MulDivOp::Mul, ..
            } => FlagEffect::always(Eflags::CF | Eflags::OF),
            Insn::Shift {
                op, size, count, ..
            } => shift_effect(op, size, count),
            Insn::DoubleShift { count, .. } => match known_count(count) {
                None => FlagEffect::maybe(Eflags::CF | Eflags::OF | SZP_FLAGS),
                Some(0) => FlagEffect::NONE,
                Some(1) => FlagEffect::always(Eflags::CF | Eflags::OF | SZP_FLAGS),
                Some(_) => FlagEffect::always(Eflags::CF | SZP_FLAGS),
            },
            Insn::Bit { .. } => FlagEffect::always(Eflags::CF),
            Insn::BitScan { .. } | Insn::Arpl { .. } => FlagEffect::always(Eflags::ZF),
            Insn::Bcd(BcdOp::Daa | BcdOp::Das) => {
                FlagEffect::always(SZP_FLAGS | Eflags::AF | Eflags::CF)
            }
            Insn::Bcd(BcdOp::Aaa | BcdOp::Aas) => FlagEffect::always(Eflags::AF | Eflags::CF),
            Insn::Bcd(BcdOp::Aam(_) | BcdOp::Aad(_)) => FlagEffect::always(SZP_FLAGS),
            Insn::Sahf => {
                FlagEffect::always(Eflags::SF | Eflags::ZF | Eflags::AF | Eflags::PF | Eflags::CF)
            }
            Insn::Flag {
                op: FlagOp::Clc | FlagOp::Stc | FlagOp::Cmc,
                ..
            } => FlagEffect::always(Eflags::CF),
            Insn::Str { .. } => FlagEffect::maybe(ARITH_FLAGS),
            Insn::Popf { .. } | Insn::Iret { .. } => FlagEffect::maybe(Eflags::STATUS),
            _ => FlagEffect::NONE,
        }
    }

    /// Whether execution may leave the block before the following unit runs
    /// for any reason other than being the block's last unit (fault, assist,
    /// interrupt or a resumable repeat).
    pub fn may_exit_early(&self) -> bool {
        match self {
            Insn::Alu { dst, src, .. }
            | Insn::Test { dst, src, .. }
            | Insn::Mov { dst, src, .. } => dst.is_memory() || src.is_memory(),
            Insn::IncDec { dst, .. }
            | Insn::Not { dst, .. }
            | Insn::Neg { dst, .. }
            | Insn::Shift { dst, .. }
            | Insn::DoubleShift { dst, .. }
            | Insn::MovFromSeg { dst, .. }
            | Insn::Xchg { dst, .. }
            | Insn::Xadd { dst, .. }
            | Insn::Cmpxchg { dst, .. }
            | Insn::Setcc { dst, .. }
            | Insn::Arpl { dst, .. } => dst.is_memory(),
            Insn::MulDiv { op, src, .. } => {
                matches!(op, MulDivOp::Div | MulDivOp::Idiv) || src.is_memory()
            }
            Insn::Imul { src, .. }
            | Insn::BitScan { src, .. }
            | Insn::MovExtend { src, .. }
            | Insn::Cmovcc { src, .. } => src.is_memory(),
            Insn::Bit { base, bit, .. } => base.is_memory() || bit.is_memory(),
            Insn::Bcd(op) => matches!(op, BcdOp::Aam(_)),
            Insn::Flag { op, .. } => matches!(op, FlagOp::Cli | FlagOp::Sti),
            Insn::Salc
            | Insn::Lea { .. }
            | Insn::Bswap { .. }
            | Insn::Cbw { .. }
            | Insn::Cwd { .. }
            | Insn::Lahf
            | Insn::Sahf
            | Insn::Nop => false,
            _ => true,
        }
    }

    /// Whether the block must end after this instruction: control transfers,
    /// and instructions that change the mode, CS/SS or interrupt state.
    pub fn ends_block(&self) -> bool {
        match self {
            Insn::Jcc { .. }
            | Insn::Jmp { .. }
            | Insn::JmpIndirect { .. }
            | Insn::JmpFar { .. }
            | Insn::JmpFarIndirect { .. }
            | Insn::Call { .. }
            | Insn::CallIndirect { .. }
            | Insn::CallFar { .. }
            | Insn::CallFarIndirect { .. }
            | Insn::Ret { .. }
            | Insn::RetFar { .. }
            | Insn::Loop { .. }
            | Insn::Int { .. }
            | Insn::Int3 { .. }
            | Insn::Int1
            | Insn::Into { .. }
            | Insn::Iret { .. }
            | Insn::Hlt
            | Insn::Popf { .. }
            | Insn::Lmsw { .. }
            | Insn::Ud2
            | Insn::Fpu { .. }
            | Insn::Assist { .. } => true,
            Insn::MovToSeg { seg, .. } | Insn::PopSeg { seg, .. } | Insn::LoadFarPtr { seg, .. } => {
                *seg == SegReg::Ss
            }
            Insn::Flag { op, .. } => *op == FlagOp::Sti,
            Insn::MovCr { to_cr, .. } => *to_cr,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use strata_x86::Operand;

    use super::*;
    use crate::insn::Src;

    #[test]
    fn shift_by_cl_defines_nothing_for_certain() {
        let insn = Insn::Shift {
            op: ShiftOp::Shl,
            size: OperandSize::Dword,
            dst: Operand::Reg(0),
            count: ShiftCount::Cl,
        };
        let effect = insn.flag_effect();
        assert!(effect.must.is_empty());
        assert!(effect.may.contains(Eflags::CF | Eflags::OF));
    }

    #[test]
    fn rcr_count_multiple_of_width_plus_one_is_inert() {
        let insn = Insn::Shift {
            op: ShiftOp::Rcr,
            size: OperandSize::Word,
            dst: Operand::Reg(0),
            count: ShiftCount::Imm(17),
        };
        assert_eq!(insn.flag_effect(), FlagEffect::NONE);
        assert_eq!(insn.flags_read(), Eflags::CF);
    }

    #[test]
    fn register_alu_never_exits_early() {
        let insn = Insn::Alu {
            op: AluOp::Add,
            size: OperandSize::Dword,
            dst: Operand::Reg(0),
            src: Src::Imm(1),
        };
        assert!(!insn.may_exit_early());
        assert!(!insn.ends_block());
    }
}

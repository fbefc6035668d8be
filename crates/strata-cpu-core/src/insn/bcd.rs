use strata_x86::OperandSize;

use super::{BcdOp, ExecCtx};
use crate::alu::{szp, SZP_FLAGS};
use crate::fault::Fault;
use crate::state::{CpuState, Eflags};

const AL: u8 = 0;
const AH: u8 = 4;

pub(super) fn bcd(cpu: &mut CpuState, cx: &ExecCtx, op: BcdOp) -> Result<(), Fault> {
    let al = cpu.reg8(AL);
    let af = cpu.flag(Eflags::AF);
    let cf = cpu.cf();
    let mut f = Eflags::empty();
    match op {
        BcdOp::Daa | BcdOp::Das => {
            let mut r = al;
            let mut carry = false;
            if al & 0x0F > 9 || af {
                let (v, c) = if op == BcdOp::Daa {
                    r.overflowing_add(6)
                } else {
                    r.overflowing_sub(6)
                };
                r = v;
                carry = cf || c;
                f.insert(Eflags::AF);
            }
            if al > 0x99 || cf {
                r = if op == BcdOp::Daa {
                    r.wrapping_add(0x60)
                } else {
                    r.wrapping_sub(0x60)
                };
                carry = true;
            }
            cpu.set_reg8(AL, r);
            f.set(Eflags::CF, carry);
            szp(&mut f, r as u32, OperandSize::Byte);
            cx.commit(cpu, f, SZP_FLAGS | Eflags::AF | Eflags::CF);
        }
        BcdOp::Aaa | BcdOp::Aas => {
            if al & 0x0F > 9 || af {
                let ax = cpu.reg16(AL);
                let ax = if op == BcdOp::Aaa {
                    ax.wrapping_add(0x106)
                } else {
                    ax.wrapping_sub(6).wrapping_sub(0x100)
                };
                cpu.set_reg16(AL, ax);
                f.insert(Eflags::AF | Eflags::CF);
            }
            cpu.set_reg8(AL, cpu.reg8(AL) & 0x0F);
            cx.commit(cpu, f, Eflags::AF | Eflags::CF);
        }
        BcdOp::Aam(base) => {
            if base == 0 {
                return Err(Fault::DivideError);
            }
            let r = al % base;
            cpu.set_reg8(AH, al / base);
            cpu.set_reg8(AL, r);
            szp(&mut f, r as u32, OperandSize::Byte);
            cx.commit(cpu, f, SZP_FLAGS);
        }
        BcdOp::Aad(base) => {
            let r = al.wrapping_add(cpu.reg8(AH).wrapping_mul(base));
            cpu.set_reg8(AL, r);
            cpu.set_reg8(AH, 0);
            szp(&mut f, r as u32, OperandSize::Byte);
            cx.commit(cpu, f, SZP_FLAGS);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cx() -> ExecCtx {
        ExecCtx {
            eip: 0,
            next_eip: 1,
            live: Eflags::STATUS,
        }
    }

    #[test]
    fn daa_adjusts_packed_sum() {
        // 0x19 + 0x28 = 0x41 with AF set -> 0x47.
        let mut cpu = CpuState::default();
        cpu.set_reg8(AL, 0x41);
        cpu.set_flag(Eflags::AF, true);
        bcd(&mut cpu, &cx(), BcdOp::Daa).unwrap();
        assert_eq!(cpu.reg8(AL), 0x47);
        assert!(!cpu.cf());
    }

    #[test]
    fn aam_zero_divides() {
        let mut cpu = CpuState::default();
        assert_eq!(bcd(&mut cpu, &cx(), BcdOp::Aam(0)), Err(Fault::DivideError));
    }

    #[test]
    fn aad_folds_ah_into_al() {
        let mut cpu = CpuState::default();
        cpu.set_reg16(AL, 0x0307);
        bcd(&mut cpu, &cx(), BcdOp::Aad(10)).unwrap();
        assert_eq!(cpu.reg16(AL), 37);
    }
}

use strata_x86::{Operand, OperandSize};

use super::{BitOp, ExecCtx, ShiftCount, ShiftOp, Src};
use crate::access::{read_operand, write_operand};
use crate::alu::szp;
use crate::fault::Fault;
use crate::mem::CpuBus;
use crate::state::{CpuState, Eflags};

fn raw_count(cpu: &CpuState, count: ShiftCount) -> u32 {
    match count {
        ShiftCount::One => 1,
        ShiftCount::Imm(n) => n as u32,
        ShiftCount::Cl => cpu.reg8(1) as u32,
    }
}

fn msb(val: u32, size: OperandSize) -> bool {
    val & size.sign_bit() != 0
}

/// Result of a shift or rotate: the new value, the computed flags and which
/// of them the operation defines for this count.
struct Shifted {
    result: u32,
    flags: Eflags,
    defined: Eflags,
}

/// Compute a shift/rotate of `dst` by the already-masked `count` (non-zero).
fn compute(op: ShiftOp, size: OperandSize, dst: u32, count: u32, cf_in: bool) -> Option<Shifted> {
    let bits = size.bits();
    let mask = size.mask();
    let dst = dst & mask;
    let mut flags = Eflags::empty();
    let mut defined = Eflags::CF;

    let (result, cf) = match op {
        ShiftOp::Rol => {
            let n = count % bits;
            let r = if n == 0 {
                dst
            } else {
                ((dst << n) | (dst >> (bits - n))) & mask
            };
            (r, r & 1 != 0)
        }
        ShiftOp::Ror => {
            let n = count % bits;
            let r = if n == 0 {
                dst
            } else {
                ((dst >> n) | (dst << (bits - n))) & mask
            };
            (r, msb(r, size))
        }
        ShiftOp::Rcl | ShiftOp::Rcr => {
            let n = count % (bits + 1);
            if n == 0 {
                return None;
            }
            let width = bits + 1;
            let wmask = (1u64 << width) - 1;
            let val = dst as u64 | (cf_in as u64) << bits;
            let rotated = if op == ShiftOp::Rcl {
                ((val << n) | (val >> (width - n))) & wmask
            } else {
                ((val >> n) | (val << (width - n))) & wmask
            };
            let r = rotated as u32 & mask;
            let cf = (rotated >> bits) & 1 != 0;
            if n == 1 {
                let of = if op == ShiftOp::Rcl {
                    msb(r, size) != cf
                } else {
                    msb(r, size) != (r & (size.sign_bit() >> 1) != 0)
                };
                flags.set(Eflags::OF, of);
                defined |= Eflags::OF;
            }
            flags.set(Eflags::CF, cf);
            return Some(Shifted {
                result: r,
                flags,
                defined,
            });
        }
        ShiftOp::Shl | ShiftOp::Sal => {
            let wide = (dst as u64) << count;
            let r = wide as u32 & mask;
            szp(&mut flags, r, size);
            defined |= Eflags::SF | Eflags::ZF | Eflags::PF;
            (r, (wide >> bits) & 1 != 0)
        }
        ShiftOp::Shr => {
            let r = (dst as u64 >> count) as u32;
            szp(&mut flags, r, size);
            defined |= Eflags::SF | Eflags::ZF | Eflags::PF;
            (r, (dst as u64 >> (count - 1)) & 1 != 0)
        }
        ShiftOp::Sar => {
            let sext = size.sign_extend(dst) as i32 as i64;
            let r = (sext >> count) as u32 & mask;
            szp(&mut flags, r, size);
            defined |= Eflags::SF | Eflags::ZF | Eflags::PF;
            (r, (sext >> (count - 1)) & 1 != 0)
        }
    };
    flags.set(Eflags::CF, cf);

    if count == 1 {
        let of = match op {
            ShiftOp::Rol | ShiftOp::Shl | ShiftOp::Sal => msb(result, size) != cf,
            ShiftOp::Ror => msb(result, size) != (result & (size.sign_bit() >> 1) != 0),
            ShiftOp::Shr => msb(dst, size),
            ShiftOp::Sar | ShiftOp::Rcl | ShiftOp::Rcr => false,
        };
        flags.set(Eflags::OF, of);
        defined |= Eflags::OF;
    }
    Some(Shifted {
        result,
        flags,
        defined,
    })
}

/// Shift or rotate `dst`. A masked count of zero (or a rotate-through-carry
/// count that is a multiple of width + 1) leaves both operand and flags untouched.
pub(super) fn shift<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    op: ShiftOp,
    size: OperandSize,
    dst: &Operand,
    count: ShiftCount,
) -> Result<(), Fault> {
    let count = raw_count(cpu, count) & 0x1F;
    if count == 0 {
        return Ok(());
    }
    let val = read_operand(cpu, bus, dst, size)?;
    let Some(out) = compute(op, size, val, count, cpu.cf()) else {
        return Ok(());
    };
    write_operand(cpu, bus, dst, size, out.result)?;
    cx.commit(cpu, out.flags, out.defined);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(super) fn double_shift<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    left: bool,
    size: OperandSize,
    dst: &Operand,
    src: u8,
    count: ShiftCount,
) -> Result<(), Fault> {
    let count = raw_count(cpu, count) & 0x1F;
    if count == 0 {
        return Ok(());
    }
    let d = read_operand(cpu, bus, dst, size)?;
    let s = cpu.read_gpr(src, size);
    let (result, cf) = match size {
        OperandSize::Dword => {
            if left {
                let val = (d as u64) << 32 | s as u64;
                ((val << count >> 32) as u32, (d >> (32 - count)) & 1 != 0)
            } else {
                let val = (s as u64) << 32 | d as u64;
                ((val >> count) as u32, (d >> (count - 1)) & 1 != 0)
            }
        }
        _ => {
            // Counts above 16 keep shifting in the destination's own bits.
            let val = (d as u64) << 32 | (s as u64) << 16 | d as u64;
            if left {
                (
                    (val << count >> 32) as u32 & 0xFFFF,
                    (val >> (48 - count)) & 1 != 0,
                )
            } else {
                (
                    (val >> count) as u32 & 0xFFFF,
                    (val >> (count - 1)) & 1 != 0,
                )
            }
        }
    };
    write_operand(cpu, bus, dst, size, result)?;

    let mut f = Eflags::empty();
    let mut defined = Eflags::CF | Eflags::SF | Eflags::ZF | Eflags::PF;
    f.set(Eflags::CF, cf);
    szp(&mut f, result, size);
    if count == 1 {
        f.set(Eflags::OF, msb(result, size) != msb(d, size));
        defined |= Eflags::OF;
    }
    cx.commit(cpu, f, defined);
    Ok(())
}

/// BT/BTS/BTR/BTC. Register bit offsets index a bit string for memory
/// operands: the address moves by whole operand-sized units.
pub(super) fn bit<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    op: BitOp,
    size: OperandSize,
    base: &Operand,
    bit: &Src,
) -> Result<(), Fault> {
    let bits = size.bits();
    let (target, index) = match (base, bit) {
        (Operand::Mem(m), Src::Op(Operand::Reg(r))) => {
            let offset = size.sign_extend(cpu.read_gpr(*r, size)) as i32;
            let shift = bits.trailing_zeros();
            let delta = (offset >> shift).wrapping_mul(size.bytes() as i32) as u32;
            (Operand::Mem(m.offset_by(delta)), offset as u32 & (bits - 1))
        }
        _ => (*base, bit.read(cpu, bus, size)? & (bits - 1)),
    };
    let val = read_operand(cpu, bus, &target, size)?;
    let selected = val & (1 << index) != 0;
    let updated = match op {
        BitOp::Bt => None,
        BitOp::Bts => Some(val | 1 << index),
        BitOp::Btr => Some(val & !(1 << index)),
        BitOp::Btc => Some(val ^ 1 << index),
    };
    if let Some(v) = updated {
        write_operand(cpu, bus, &target, size, v)?;
    }
    let mut f = Eflags::empty();
    f.set(Eflags::CF, selected);
    cx.commit(cpu, f, Eflags::CF);
    Ok(())
}

/// BSF/BSR: ZF=1 and the destination untouched for a zero source.
#[allow(clippy::too_many_arguments)]
pub(super) fn bit_scan<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    reverse: bool,
    size: OperandSize,
    dst: u8,
    src: &Operand,
) -> Result<(), Fault> {
    let val = read_operand(cpu, bus, src, size)?;
    let mut f = Eflags::empty();
    if val == 0 {
        f.insert(Eflags::ZF);
    } else {
        let index = if reverse {
            31 - val.leading_zeros()
        } else {
            val.trailing_zeros()
        };
        cpu.write_gpr(dst, size, index);
    }
    cx.commit(cpu, f, Eflags::ZF);
    Ok(())
}

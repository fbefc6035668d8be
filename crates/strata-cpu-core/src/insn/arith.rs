use strata_x86::{Operand, OperandSize};

use super::{AluOp, ExecCtx, Src};
use crate::access::{read_operand, write_operand};
use crate::alu::{
    add_with_flags, dec_with_flags, inc_with_flags, logic_with_flags, sub_with_flags, ARITH_FLAGS,
    INCDEC_FLAGS, LOGIC_FLAGS,
};
use crate::fault::Fault;
use crate::mem::CpuBus;
use crate::state::{CpuState, Eflags};

pub(super) fn alu<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    op: AluOp,
    size: OperandSize,
    dst: &Operand,
    src: &Src,
) -> Result<(), Fault> {
    let a = read_operand(cpu, bus, dst, size)?;
    let b = src.read(cpu, bus, size)?;
    let mut f = Eflags::empty();
    let (result, defined) = match op {
        AluOp::Add => (add_with_flags(&mut f, a, b, false, size), ARITH_FLAGS),
        AluOp::Adc => (add_with_flags(&mut f, a, b, cpu.cf(), size), ARITH_FLAGS),
        AluOp::Sub | AluOp::Cmp => (sub_with_flags(&mut f, a, b, false, size), ARITH_FLAGS),
        AluOp::Sbb => (sub_with_flags(&mut f, a, b, cpu.cf(), size), ARITH_FLAGS),
        AluOp::And => (logic_with_flags(&mut f, a & b, size), LOGIC_FLAGS),
        AluOp::Or => (logic_with_flags(&mut f, a | b, size), LOGIC_FLAGS),
        AluOp::Xor => (logic_with_flags(&mut f, a ^ b, size), LOGIC_FLAGS),
    };
    if op != AluOp::Cmp {
        write_operand(cpu, bus, dst, size, result)?;
    }
    cx.commit(cpu, f, defined);
    Ok(())
}

pub(super) fn test<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    size: OperandSize,
    dst: &Operand,
    src: &Src,
) -> Result<(), Fault> {
    let a = read_operand(cpu, bus, dst, size)?;
    let b = src.read(cpu, bus, size)?;
    let mut f = Eflags::empty();
    logic_with_flags(&mut f, a & b, size);
    cx.commit(cpu, f, LOGIC_FLAGS);
    Ok(())
}

pub(super) fn inc_dec<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    dec: bool,
    size: OperandSize,
    dst: &Operand,
) -> Result<(), Fault> {
    let a = read_operand(cpu, bus, dst, size)?;
    let mut f = Eflags::empty();
    let result = if dec {
        dec_with_flags(&mut f, a, size)
    } else {
        inc_with_flags(&mut f, a, size)
    };
    write_operand(cpu, bus, dst, size, result)?;
    cx.commit(cpu, f, INCDEC_FLAGS);
    Ok(())
}

pub(super) fn not<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    dst: &Operand,
) -> Result<(), Fault> {
    let a = read_operand(cpu, bus, dst, size)?;
    write_operand(cpu, bus, dst, size, !a & size.mask())
}

/// NEG: `0 - dst`, CF set unless the operand was zero.
pub(super) fn neg<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    size: OperandSize,
    dst: &Operand,
) -> Result<(), Fault> {
    let a = read_operand(cpu, bus, dst, size)?;
    let mut f = Eflags::empty();
    let result = sub_with_flags(&mut f, 0, a, false, size);
    write_operand(cpu, bus, dst, size, result)?;
    cx.commit(cpu, f, ARITH_FLAGS);
    Ok(())
}

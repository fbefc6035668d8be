use strata_x86::{Operand, OperandSize};

use super::{ExecCtx, MulDivOp};
use crate::access::read_operand;
use crate::alu::{logic_with_flags, LOGIC_FLAGS};
use crate::fault::Fault;
use crate::mem::CpuBus;
use crate::state::{CpuState, Eflags, Gpr};

const EAX: u8 = Gpr::Eax as u8;
const EDX: u8 = Gpr::Edx as u8;

fn signed(val: u32, size: OperandSize) -> i64 {
    size.sign_extend(val) as i32 as i64
}

/// Read the double-width dividend (AX, DX:AX or EDX:EAX).
fn dividend(cpu: &CpuState, size: OperandSize) -> u64 {
    match size {
        OperandSize::Byte => cpu.reg16(EAX) as u64,
        OperandSize::Word => (cpu.reg16(EDX) as u64) << 16 | cpu.reg16(EAX) as u64,
        OperandSize::Dword => (cpu.reg32(EDX) as u64) << 32 | cpu.reg32(EAX) as u64,
    }
}

/// Store a double-width product (AX, DX:AX or EDX:EAX).
fn store_wide(cpu: &mut CpuState, size: OperandSize, lo: u32, hi: u32) {
    match size {
        OperandSize::Byte => cpu.set_reg16(EAX, (hi as u16 & 0xFF) << 8 | (lo as u16 & 0xFF)),
        _ => {
            cpu.write_gpr(EAX, size, lo);
            cpu.write_gpr(EDX, size, hi);
        }
    }
}

/// Store quotient and remainder (AL/AH, AX/DX or EAX/EDX).
fn store_div(cpu: &mut CpuState, size: OperandSize, quotient: u32, remainder: u32) {
    match size {
        OperandSize::Byte => {
            cpu.set_reg8(0, quotient as u8);
            cpu.set_reg8(4, remainder as u8);
        }
        _ => {
            cpu.write_gpr(EAX, size, quotient);
            cpu.write_gpr(EDX, size, remainder);
        }
    }
}

pub(super) fn mul_div<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    op: MulDivOp,
    size: OperandSize,
    src: &Operand,
) -> Result<(), Fault> {
    let s = read_operand(cpu, bus, src, size)?;
    let bits = size.bits();
    let mask = size.mask() as u64;
    match op {
        MulDivOp::Mul => {
            let product = cpu.read_gpr(EAX, size) as u64 * s as u64;
            let lo = (product & mask) as u32;
            let hi = ((product >> bits) & mask) as u32;
            store_wide(cpu, size, lo, hi);
            // SF/ZF/AF/PF are undefined and left unchanged.
            let mut f = Eflags::empty();
            f.set(Eflags::CF | Eflags::OF, hi != 0);
            cx.commit(cpu, f, Eflags::CF | Eflags::OF);
        }
        MulDivOp::Imul => {
            let product = signed(cpu.read_gpr(EAX, size), size) * signed(s, size);
            let lo = (product as u64 & mask) as u32;
            let hi = ((product as u64 >> bits) & mask) as u32;
            store_wide(cpu, size, lo, hi);
            let mut f = Eflags::empty();
            logic_with_flags(&mut f, lo, size);
            if product != signed(lo, size) {
                f.insert(Eflags::CF | Eflags::OF);
            }
            cx.commit(cpu, f, LOGIC_FLAGS);
        }
        MulDivOp::Div => {
            if s == 0 {
                return Err(Fault::DivideError);
            }
            let n = dividend(cpu, size);
            let q = n / s as u64;
            if q > mask {
                return Err(Fault::DivideError);
            }
            store_div(cpu, size, q as u32, (n % s as u64) as u32);
        }
        MulDivOp::Idiv => {
            if s == 0 {
                return Err(Fault::DivideError);
            }
            let n = match size {
                OperandSize::Byte => cpu.reg16(EAX) as i16 as i64,
                OperandSize::Word => dividend(cpu, size) as u32 as i32 as i64,
                OperandSize::Dword => dividend(cpu, size) as i64,
            };
            let d = signed(s, size);
            let q = n.checked_div(d).ok_or(Fault::DivideError)?;
            let r = n.checked_rem(d).ok_or(Fault::DivideError)?;
            let min = -(size.sign_bit() as i64);
            let max = size.sign_bit() as i64 - 1;
            if q < min || q > max {
                return Err(Fault::DivideError);
            }
            store_div(cpu, size, q as u32 & size.mask(), r as u32 & size.mask());
        }
    }
    Ok(())
}

/// Two- and three-operand IMUL: truncated product into `dst`, CF=OF on signed overflow.
pub(super) fn imul<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    size: OperandSize,
    dst: u8,
    src: &Operand,
    imm: Option<u32>,
) -> Result<(), Fault> {
    let s = read_operand(cpu, bus, src, size)?;
    let other = match imm {
        Some(imm) => imm,
        None => cpu.read_gpr(dst, size),
    };
    let product = signed(s, size) * signed(other, size);
    let result = product as u32 & size.mask();
    cpu.write_gpr(dst, size, result);

    let mut f = Eflags::empty();
    logic_with_flags(&mut f, result, size);
    if product != signed(result, size) {
        f.insert(Eflags::CF | Eflags::OF);
    }
    cx.commit(cpu, f, LOGIC_FLAGS);
    Ok(())
}

use strata_x86::{MemRef, Operand, OperandSize, SegReg};

use super::{ExecCtx, Src};
use crate::access::{effective_address, read_far_pointer, read_mem, read_operand, read_ref, write_operand};
use crate::alu::{add_with_flags, sub_with_flags, Cond, ARITH_FLAGS};
use crate::fault::Fault;
use crate::mem::CpuBus;
use crate::segmentation::load_segment;
use crate::state::{CpuState, Eflags, Gpr};

const EAX: u8 = Gpr::Eax as u8;
const EDX: u8 = Gpr::Edx as u8;

/// Flags LAHF/SAHF transfer through AH.
const AH_FLAGS: Eflags = Eflags::SF
    .union(Eflags::ZF)
    .union(Eflags::AF)
    .union(Eflags::PF)
    .union(Eflags::CF);

pub(super) fn mov<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    dst: &Operand,
    src: &Src,
) -> Result<(), Fault> {
    let v = src.read(cpu, bus, size)?;
    write_operand(cpu, bus, dst, size, v)
}

/// `MOV r/m, Sreg`: registers take the zero-extended selector, memory always 16 bits.
pub(super) fn mov_from_seg<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    seg: SegReg,
    size: OperandSize,
    dst: &Operand,
) -> Result<(), Fault> {
    let sel = cpu.seg(seg).selector as u32;
    let size = if dst.is_memory() { OperandSize::Word } else { size };
    write_operand(cpu, bus, dst, size, sel)
}

pub(super) fn mov_to_seg<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    seg: SegReg,
    src: &Operand,
) -> Result<(), Fault> {
    let sel = read_operand(cpu, bus, src, OperandSize::Word)? as u16;
    load_segment(cpu, bus, seg, sel)
}

pub(super) fn mov_extend<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    signed: bool,
    from: OperandSize,
    size: OperandSize,
    dst: u8,
    src: &Operand,
) -> Result<(), Fault> {
    let v = read_operand(cpu, bus, src, from)?;
    let v = if signed { from.sign_extend(v) } else { v };
    cpu.write_gpr(dst, size, v & size.mask());
    Ok(())
}

pub(super) fn lea(cpu: &mut CpuState, size: OperandSize, dst: u8, mem: &MemRef) -> Result<(), Fault> {
    let ea = effective_address(cpu, mem);
    cpu.write_gpr(dst, size, ea & size.mask());
    Ok(())
}

pub(super) fn xchg<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    dst: &Operand,
    reg: u8,
) -> Result<(), Fault> {
    let a = read_operand(cpu, bus, dst, size)?;
    let b = cpu.read_gpr(reg, size);
    write_operand(cpu, bus, dst, size, b)?;
    cpu.write_gpr(reg, size, a);
    Ok(())
}

pub(super) fn xadd<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    size: OperandSize,
    dst: &Operand,
    reg: u8,
) -> Result<(), Fault> {
    let a = read_operand(cpu, bus, dst, size)?;
    let b = cpu.read_gpr(reg, size);
    let mut f = Eflags::empty();
    let sum = add_with_flags(&mut f, a, b, false, size);
    cpu.write_gpr(reg, size, a);
    write_operand(cpu, bus, dst, size, sum)?;
    cx.commit(cpu, f, ARITH_FLAGS);
    Ok(())
}

/// CMPXCHG: compare the accumulator with `dst`; the destination is always written.
pub(super) fn cmpxchg<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    size: OperandSize,
    dst: &Operand,
    reg: u8,
) -> Result<(), Fault> {
    let acc = cpu.read_gpr(EAX, size);
    let d = read_operand(cpu, bus, dst, size)?;
    let mut f = Eflags::empty();
    sub_with_flags(&mut f, acc, d, false, size);
    if acc == d {
        let src = cpu.read_gpr(reg, size);
        write_operand(cpu, bus, dst, size, src)?;
    } else {
        write_operand(cpu, bus, dst, size, d)?;
        cpu.write_gpr(EAX, size, d);
    }
    cx.commit(cpu, f, ARITH_FLAGS);
    Ok(())
}

/// CBW (word) / CWDE (dword).
pub(super) fn cbw(cpu: &mut CpuState, size: OperandSize) -> Result<(), Fault> {
    match size {
        OperandSize::Dword => cpu.set_reg32(EAX, OperandSize::Word.sign_extend(cpu.reg32(EAX))),
        _ => cpu.set_reg16(EAX, OperandSize::Byte.sign_extend(cpu.reg32(EAX)) as u16),
    }
    Ok(())
}

/// CWD (word) / CDQ (dword).
pub(super) fn cwd(cpu: &mut CpuState, size: OperandSize) -> Result<(), Fault> {
    let negative = cpu.read_gpr(EAX, size) & size.sign_bit() != 0;
    let fill = if negative { size.mask() } else { 0 };
    cpu.write_gpr(EDX, size, fill);
    Ok(())
}

pub(super) fn lahf(cpu: &mut CpuState) -> Result<(), Fault> {
    let low = (cpu.eflags() & (AH_FLAGS | Eflags::RESERVED1).bits()) as u8;
    cpu.set_reg8(4, low);
    Ok(())
}

pub(super) fn sahf(cpu: &mut CpuState) -> Result<(), Fault> {
    let ah = Eflags::from_bits_truncate(cpu.reg8(4) as u32);
    cpu.commit_flags(ah, AH_FLAGS);
    Ok(())
}

pub(super) fn xlat<B: CpuBus>(cpu: &mut CpuState, bus: &mut B, mem: &MemRef) -> Result<(), Fault> {
    let offset = effective_address(cpu, mem).wrapping_add(cpu.reg8(0) as u32) & mem.addr_size.mask();
    let v = read_mem(cpu, bus, mem.segment, offset, OperandSize::Byte)?;
    cpu.set_reg8(0, v as u8);
    Ok(())
}

pub(super) fn setcc<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cond: Cond,
    dst: &Operand,
) -> Result<(), Fault> {
    let v = cond.eval(cpu.flags()) as u32;
    write_operand(cpu, bus, dst, OperandSize::Byte, v)
}

/// CMOVcc reads its source (and may fault on it) whether or not the condition holds.
pub(super) fn cmovcc<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cond: Cond,
    size: OperandSize,
    dst: u8,
    src: &Operand,
) -> Result<(), Fault> {
    let v = read_operand(cpu, bus, src, size)?;
    if cond.eval(cpu.flags()) {
        cpu.write_gpr(dst, size, v);
    }
    Ok(())
}

/// LDS/LES/LSS/LFS/LGS.
pub(super) fn load_far_ptr<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    seg: SegReg,
    size: OperandSize,
    dst: u8,
    mem: &MemRef,
) -> Result<(), Fault> {
    let (offset, selector) = read_far_pointer(cpu, bus, mem, size)?;
    load_segment(cpu, bus, seg, selector)?;
    cpu.write_gpr(dst, size, offset);
    Ok(())
}

pub(super) fn bound<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    reg: u8,
    mem: &MemRef,
) -> Result<(), Fault> {
    let index = size.sign_extend(cpu.read_gpr(reg, size)) as i32;
    let lower = size.sign_extend(read_ref(cpu, bus, mem, size)?) as i32;
    let upper = size.sign_extend(read_ref(cpu, bus, &mem.offset_by(size.bytes()), size)?) as i32;
    if index < lower || index > upper {
        return Err(Fault::BoundRange);
    }
    Ok(())
}

/// ARPL: raise the RPL of `dst` to that of `reg`, ZF reporting whether it changed.
pub(super) fn arpl<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    dst: &Operand,
    reg: u8,
) -> Result<(), Fault> {
    let d = read_operand(cpu, bus, dst, OperandSize::Word)?;
    let s = cpu.reg16(reg) as u32;
    let mut f = Eflags::empty();
    if d & 3 < s & 3 {
        write_operand(cpu, bus, dst, OperandSize::Word, (d & !3) | (s & 3))?;
        f.insert(Eflags::ZF);
    }
    cx.commit(cpu, f, Eflags::ZF);
    Ok(())
}

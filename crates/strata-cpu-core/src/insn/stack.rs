use strata_x86::{Operand, OperandSize, SegReg};

use super::Src;
use crate::access::{peek_stack, pop, push, read_mem, release_stack, write_mem, write_operand};
use crate::fault::Fault;
use crate::mem::CpuBus;
use crate::segmentation::load_segment;
use crate::state::{CpuMode, CpuState, Eflags, Gpr};

pub(super) fn push_src<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    src: &Src,
) -> Result<(), Fault> {
    // PUSH ESP stores the value from before the decrement.
    let v = src.read(cpu, bus, size)?;
    push(cpu, bus, size, v)
}

/// POP r/m: the destination address is computed after SP has moved.
pub(super) fn pop_dst<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    dst: &Operand,
) -> Result<(), Fault> {
    let esp = cpu.gpr(Gpr::Esp);
    let v = pop(cpu, bus, size)?;
    if let Err(fault) = write_operand(cpu, bus, dst, size, v) {
        cpu.set_gpr(Gpr::Esp, esp);
        return Err(fault);
    }
    Ok(())
}

pub(super) fn push_seg<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    seg: SegReg,
    size: OperandSize,
) -> Result<(), Fault> {
    let sel = cpu.seg(seg).selector as u32;
    push(cpu, bus, size, sel)
}

pub(super) fn pop_seg<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    seg: SegReg,
    size: OperandSize,
) -> Result<(), Fault> {
    let sel = peek_stack(cpu, bus, 0, size)? as u16;
    load_segment(cpu, bus, seg, sel)?;
    release_stack(cpu, size.bytes());
    Ok(())
}

pub(super) fn pusha<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
) -> Result<(), Fault> {
    let bytes = size.bytes();
    let mask = cpu.stack_mask();
    let sp = cpu.stack_ptr();
    for i in 0..8u8 {
        let v = cpu.read_gpr(i, size);
        let slot = sp.wrapping_sub(bytes * (i as u32 + 1)) & mask;
        write_mem(cpu, bus, SegReg::Ss, slot, size, v)?;
    }
    cpu.set_stack_ptr(sp.wrapping_sub(bytes * 8) & mask);
    Ok(())
}

/// POPA discards the saved SP/ESP slot.
pub(super) fn popa<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
) -> Result<(), Fault> {
    let bytes = size.bytes();
    let mut vals = [0u32; 8];
    for (i, slot) in vals.iter_mut().enumerate() {
        *slot = peek_stack(cpu, bus, bytes * i as u32, size)?;
    }
    for (i, v) in vals.iter().enumerate() {
        let reg = 7 - i as u8;
        if reg != Gpr::Esp as u8 {
            cpu.write_gpr(reg, size, *v);
        }
    }
    release_stack(cpu, bytes * 8);
    Ok(())
}

pub(super) fn pushf<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    mode: CpuMode,
) -> Result<(), Fault> {
    if mode == CpuMode::Virtual8086 && cpu.iopl() < 3 {
        return Err(Fault::gp0());
    }
    let v = cpu.eflags() & !(Eflags::VM | Eflags::RF).bits();
    push(cpu, bus, size, v)
}

/// POPF with the mode's privilege rules: IOPL only changes at CPL 0, IF only
/// when CPL <= IOPL, and VM/VIF/VIP never change.
pub(super) fn popf<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    mode: CpuMode,
) -> Result<(), Fault> {
    let mut changeable =
        Eflags::all() - Eflags::VM - Eflags::RF - Eflags::VIF - Eflags::VIP - Eflags::RESERVED1;
    match mode {
        CpuMode::Real => {}
        CpuMode::Protected => {
            let cpl = cpu.cpl();
            if cpl > 0 {
                changeable -= Eflags::IOPL;
            }
            if cpl > cpu.iopl() {
                changeable -= Eflags::IF;
            }
        }
        CpuMode::Virtual8086 => {
            if cpu.iopl() < 3 {
                return Err(Fault::gp0());
            }
            changeable -= Eflags::IOPL;
        }
    }
    let mut mask = changeable.bits();
    if size == OperandSize::Word {
        mask &= 0xFFFF;
    }
    let v = peek_stack(cpu, bus, 0, size)?;
    let new = (cpu.eflags() & !mask) | (v & mask);
    cpu.set_eflags(new);
    release_stack(cpu, size.bytes());
    Ok(())
}

pub(super) fn enter<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    frame: u16,
    level: u8,
) -> Result<(), Fault> {
    let esp = cpu.gpr(Gpr::Esp);
    let ebp = cpu.gpr(Gpr::Ebp);
    let r = enter_inner(cpu, bus, size, frame, level & 0x1F);
    if r.is_err() {
        cpu.set_gpr(Gpr::Esp, esp);
        cpu.set_gpr(Gpr::Ebp, ebp);
    }
    r
}

fn enter_inner<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    frame: u16,
    level: u8,
) -> Result<(), Fault> {
    let bytes = size.bytes();
    let mask = cpu.stack_mask();
    let bp = cpu.gpr(Gpr::Ebp);
    push(cpu, bus, size, bp)?;
    let frame_temp = cpu.stack_ptr();

    if level > 0 {
        let mut outer = bp & mask;
        for _ in 1..level {
            outer = outer.wrapping_sub(bytes) & mask;
            let v = read_mem(cpu, bus, SegReg::Ss, outer, size)?;
            push(cpu, bus, size, v)?;
        }
        push(cpu, bus, size, frame_temp)?;
    }

    let new_sp = cpu.stack_ptr().wrapping_sub(frame as u32) & mask;
    // Touch the bottom of the new frame so an overflowing frame faults here.
    if frame > 0 {
        read_mem(cpu, bus, SegReg::Ss, new_sp, OperandSize::Byte)?;
    }
    cpu.write_gpr(Gpr::Ebp as u8, size, frame_temp);
    cpu.set_stack_ptr(new_sp);
    Ok(())
}

pub(super) fn leave<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
) -> Result<(), Fault> {
    let esp = cpu.gpr(Gpr::Esp);
    cpu.set_stack_ptr(cpu.gpr(Gpr::Ebp) & cpu.stack_mask());
    match pop(cpu, bus, size) {
        Ok(bp) => {
            cpu.write_gpr(Gpr::Ebp as u8, size, bp);
            Ok(())
        }
        Err(fault) => {
            cpu.set_gpr(Gpr::Esp, esp);
            Err(fault)
        }
    }
}

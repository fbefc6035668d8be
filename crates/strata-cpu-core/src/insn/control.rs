use strata_x86::{AddressSize, MemRef, Operand, OperandSize, SegReg};

use super::{ExecCtx, LoopKind};
use crate::access::{peek_stack, push, read_far_pointer, read_operand, release_stack};
use crate::fault::{AssistReason, Branch, Fault};
use crate::mem::CpuBus;
use crate::segmentation::{load_code_segment, CodeLoad};
use crate::state::{CpuMode, CpuState, Eflags, Gpr};

/// EFLAGS bits a 32-bit IRET may load outside of v86 mode.
const IRET_REAL_MASK: u32 = 0x0025_7FD5;

/// Near targets must lie inside the code segment limit.
fn near_target(cpu: &CpuState, target: u32) -> Result<Branch, Fault> {
    if target > cpu.seg(SegReg::Cs).limit {
        return Err(Fault::gp0());
    }
    Ok(Branch::Jump(target))
}

fn far_outcome(load: CodeLoad, offset: u32) -> Branch {
    match load {
        CodeLoad::Loaded => Branch::Jump(offset),
        CodeLoad::Gate => Branch::Assist(AssistReason::FarTransferGate),
        CodeLoad::PrivilegeChange => Branch::Assist(AssistReason::PrivilegeTransfer),
    }
}

/// Taken conditional branches are limit-checked; a fall-through never is.
pub(super) fn conditional(cpu: &CpuState, taken: bool, target: u32) -> Result<Branch, Fault> {
    if taken {
        near_target(cpu, target)?;
    }
    Ok(Branch::Conditional { taken, target })
}

pub(super) fn jmp(cpu: &CpuState, target: u32) -> Result<Branch, Fault> {
    near_target(cpu, target)
}

pub(super) fn jmp_indirect<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    src: &Operand,
) -> Result<Branch, Fault> {
    let target = read_operand(cpu, bus, src, size)?;
    near_target(cpu, target)
}

pub(super) fn jmp_far<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    selector: u16,
    offset: u32,
) -> Result<Branch, Fault> {
    let offset = offset & size.mask();
    let load = load_code_segment(cpu, bus, selector, offset)?;
    Ok(far_outcome(load, offset))
}

pub(super) fn jmp_far_indirect<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    mem: &MemRef,
) -> Result<Branch, Fault> {
    let (offset, selector) = read_far_pointer(cpu, bus, mem, size)?;
    jmp_far(cpu, bus, size, selector, offset)
}

pub(super) fn call<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    size: OperandSize,
    target: u32,
) -> Result<Branch, Fault> {
    near_target(cpu, target)?;
    push(cpu, bus, size, cx.next_eip)?;
    Ok(Branch::Jump(target))
}

pub(super) fn call_indirect<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    size: OperandSize,
    src: &Operand,
) -> Result<Branch, Fault> {
    let target = read_operand(cpu, bus, src, size)?;
    near_target(cpu, target)?;
    push(cpu, bus, size, cx.next_eip)?;
    Ok(Branch::Jump(target))
}

/// Far CALL: push CS:EIP then load the new CS. SP is restored when the
/// transfer does not complete.
pub(super) fn call_far<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    size: OperandSize,
    selector: u16,
    offset: u32,
) -> Result<Branch, Fault> {
    let offset = offset & size.mask();
    let esp = cpu.gpr(Gpr::Esp);
    let old_cs = cpu.seg(SegReg::Cs).selector as u32;
    let result = push(cpu, bus, size, old_cs)
        .and_then(|()| push(cpu, bus, size, cx.next_eip))
        .and_then(|()| load_code_segment(cpu, bus, selector, offset));
    match result {
        Ok(CodeLoad::Loaded) => Ok(Branch::Jump(offset)),
        Ok(other) => {
            cpu.set_gpr(Gpr::Esp, esp);
            Ok(far_outcome(other, offset))
        }
        Err(fault) => {
            cpu.set_gpr(Gpr::Esp, esp);
            Err(fault)
        }
    }
}

pub(super) fn call_far_indirect<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    size: OperandSize,
    mem: &MemRef,
) -> Result<Branch, Fault> {
    let (offset, selector) = read_far_pointer(cpu, bus, mem, size)?;
    call_far(cpu, bus, cx, size, selector, offset)
}

pub(super) fn ret<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    pop: u16,
) -> Result<Branch, Fault> {
    let target = peek_stack(cpu, bus, 0, size)?;
    let branch = near_target(cpu, target)?;
    release_stack(cpu, size.bytes() + pop as u32);
    Ok(branch)
}

pub(super) fn ret_far<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    pop: u16,
) -> Result<Branch, Fault> {
    let offset = peek_stack(cpu, bus, 0, size)?;
    let selector = peek_stack(cpu, bus, size.bytes(), size)? as u16;
    if cpu.mode() == CpuMode::Protected && (selector & 3) as u8 > cpu.cpl() {
        return Ok(Branch::Assist(AssistReason::PrivilegeTransfer));
    }
    match load_code_segment(cpu, bus, selector, offset)? {
        CodeLoad::Loaded => {
            release_stack(cpu, 2 * size.bytes() + pop as u32);
            Ok(Branch::Jump(offset))
        }
        CodeLoad::Gate => Err(Fault::GeneralProtection(selector & 0xFFFC)),
        CodeLoad::PrivilegeChange => Ok(Branch::Assist(AssistReason::PrivilegeTransfer)),
    }
}

pub(super) fn loop_(
    cpu: &mut CpuState,
    kind: LoopKind,
    addr_size: AddressSize,
    target: u32,
) -> Result<Branch, Fault> {
    let mask = addr_size.mask();
    let ecx = cpu.gpr(Gpr::Ecx);
    if kind == LoopKind::Jcxz {
        return conditional(cpu, ecx & mask == 0, target);
    }
    let count = ecx.wrapping_sub(1) & mask;
    let zf = cpu.flag(Eflags::ZF);
    let taken = count != 0
        && match kind {
            LoopKind::Loope => zf,
            LoopKind::Loopne => !zf,
            LoopKind::Loop | LoopKind::Jcxz => true,
        };
    let branch = conditional(cpu, taken, target)?;
    // ECX only changes once the branch is known not to fault.
    cpu.set_gpr(Gpr::Ecx, (ecx & !mask) | count);
    Ok(branch)
}

/// Deliver `vector` through the real-mode IVT: push FLAGS, CS, IP and enter
/// the handler with IF/TF/AC clear.
fn deliver_real<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    vector: u8,
    return_ip: u32,
) -> Result<Branch, Fault> {
    let offset = vector as u32 * 4;
    if offset + 3 > cpu.idtr.limit as u32 {
        return Err(Fault::gp0());
    }
    let entry = cpu.idtr.base.wrapping_add(offset);
    let ip = bus.read_u16(entry)? as u32;
    let cs = bus.read_u16(entry.wrapping_add(2))?;

    let esp = cpu.gpr(Gpr::Esp);
    let flags = cpu.eflags();
    let old_cs = cpu.seg(SegReg::Cs).selector as u32;
    let pushed = push(cpu, bus, OperandSize::Word, flags)
        .and_then(|()| push(cpu, bus, OperandSize::Word, old_cs))
        .and_then(|()| push(cpu, bus, OperandSize::Word, return_ip));
    if let Err(fault) = pushed {
        cpu.set_gpr(Gpr::Esp, esp);
        return Err(fault);
    }
    cpu.set_flag(Eflags::IF | Eflags::TF | Eflags::AC, false);
    load_code_segment(cpu, bus, cs, ip)?;
    Ok(Branch::Jump(ip))
}

/// INT n. Real mode vectors inline; v86 mode needs IOPL 3; protected mode
/// hands the vector to the driver.
pub(super) fn int<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    vector: u8,
    mode: CpuMode,
) -> Result<Branch, Fault> {
    match mode {
        CpuMode::Real => deliver_real(cpu, bus, vector, cx.next_eip),
        CpuMode::Virtual8086 if cpu.iopl() < 3 => Err(Fault::gp0()),
        CpuMode::Virtual8086 | CpuMode::Protected => Ok(Branch::Interrupt(vector)),
    }
}

/// INT3 is not IOPL-sensitive in v86 mode.
pub(super) fn int3<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    mode: CpuMode,
) -> Result<Branch, Fault> {
    match mode {
        CpuMode::Real => deliver_real(cpu, bus, 3, cx.next_eip),
        _ => Ok(Branch::Interrupt(3)),
    }
}

pub(super) fn into<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    mode: CpuMode,
) -> Result<Branch, Fault> {
    if !cpu.flag(Eflags::OF) {
        return Ok(Branch::None);
    }
    match mode {
        CpuMode::Real => deliver_real(cpu, bus, 4, cx.next_eip),
        _ => Ok(Branch::Interrupt(4)),
    }
}

pub(super) fn iret<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    mode: CpuMode,
) -> Result<Branch, Fault> {
    if mode == CpuMode::Protected {
        return Ok(Branch::Assist(AssistReason::Iret));
    }
    if mode == CpuMode::Virtual8086 && cpu.iopl() < 3 {
        return Err(Fault::gp0());
    }
    let bytes = size.bytes();
    let ip = peek_stack(cpu, bus, 0, size)?;
    let cs = peek_stack(cpu, bus, bytes, size)? as u16;
    let popped = peek_stack(cpu, bus, 2 * bytes, size)?;

    let mut mask = if size == OperandSize::Word {
        0xFFFF
    } else {
        IRET_REAL_MASK
    };
    if mode == CpuMode::Virtual8086 {
        mask &= !Eflags::IOPL.bits();
    }
    let flags = (cpu.eflags() & !mask) | (popped & mask);

    load_code_segment(cpu, bus, cs, ip)?;
    cpu.set_eflags(flags);
    release_stack(cpu, 3 * bytes);
    Ok(Branch::Jump(ip))
}

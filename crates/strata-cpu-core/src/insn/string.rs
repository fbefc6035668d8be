use strata_x86::{AddressSize, OperandSize, RepPrefix, SegReg};

use super::{ExecCtx, Port, StrOp};
use crate::access::{index_reg, read_mem, step_index_reg, write_mem};
use crate::alu::{sub_with_flags, ARITH_FLAGS};
use crate::fault::{AssistReason, Branch, Fault};
use crate::mem::CpuBus;
use crate::state::{CpuMode, CpuState, Eflags, Gpr};

/// Iterations a repeated string instruction runs before yielding back to the
/// driver; it resumes by re-executing the same instruction.
pub const REP_CHUNK: u32 = 0x1_0000;

/// Whether port I/O may go straight to the bus in `mode`.
fn io_allowed(cpu: &CpuState, mode: CpuMode) -> bool {
    match mode {
        CpuMode::Real => true,
        CpuMode::Protected => cpu.cpl() <= cpu.iopl(),
        // The permission bitmap lives in the TSS, which the core does not model.
        CpuMode::Virtual8086 => false,
    }
}

fn port_number(cpu: &CpuState, port: Port) -> u16 {
    match port {
        Port::Imm(p) => p as u16,
        Port::Dx => cpu.reg16(Gpr::Edx as u8),
    }
}

pub(super) fn port_in<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    port: Port,
    mode: CpuMode,
) -> Result<Branch, Fault> {
    if !io_allowed(cpu, mode) {
        return Ok(Branch::Assist(AssistReason::IoPermission));
    }
    let v = bus.io_read(port_number(cpu, port), size)?;
    cpu.write_gpr(Gpr::Eax as u8, size, v & size.mask());
    Ok(Branch::None)
}

pub(super) fn port_out<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    port: Port,
    mode: CpuMode,
) -> Result<Branch, Fault> {
    if !io_allowed(cpu, mode) {
        return Ok(Branch::Assist(AssistReason::IoPermission));
    }
    let v = cpu.read_gpr(Gpr::Eax as u8, size);
    bus.io_write(port_number(cpu, port), size, v)?;
    Ok(Branch::None)
}

/// One iteration; returns the computed comparison flags for CMPS/SCAS.
fn step<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    op: StrOp,
    size: OperandSize,
    seg: SegReg,
    amask: u32,
) -> Result<Option<Eflags>, Fault> {
    let delta = if cpu.flag(Eflags::DF) {
        size.bytes().wrapping_neg()
    } else {
        size.bytes()
    };
    let si = index_reg(cpu, Gpr::Esi, amask);
    let di = index_reg(cpu, Gpr::Edi, amask);
    let acc = Gpr::Eax as u8;
    let mut flags = None;
    match op {
        StrOp::Movs => {
            let v = read_mem(cpu, bus, seg, si, size)?;
            write_mem(cpu, bus, SegReg::Es, di, size, v)?;
            step_index_reg(cpu, Gpr::Esi, amask, delta);
            step_index_reg(cpu, Gpr::Edi, amask, delta);
        }
        StrOp::Cmps => {
            let a = read_mem(cpu, bus, seg, si, size)?;
            let b = read_mem(cpu, bus, SegReg::Es, di, size)?;
            let mut f = Eflags::empty();
            sub_with_flags(&mut f, a, b, false, size);
            flags = Some(f);
            step_index_reg(cpu, Gpr::Esi, amask, delta);
            step_index_reg(cpu, Gpr::Edi, amask, delta);
        }
        StrOp::Stos => {
            let v = cpu.read_gpr(acc, size);
            write_mem(cpu, bus, SegReg::Es, di, size, v)?;
            step_index_reg(cpu, Gpr::Edi, amask, delta);
        }
        StrOp::Lods => {
            let v = read_mem(cpu, bus, seg, si, size)?;
            cpu.write_gpr(acc, size, v);
            step_index_reg(cpu, Gpr::Esi, amask, delta);
        }
        StrOp::Scas => {
            let b = read_mem(cpu, bus, SegReg::Es, di, size)?;
            let mut f = Eflags::empty();
            sub_with_flags(&mut f, cpu.read_gpr(acc, size), b, false, size);
            flags = Some(f);
            step_index_reg(cpu, Gpr::Edi, amask, delta);
        }
        StrOp::Ins => {
            let port = cpu.reg16(Gpr::Edx as u8);
            let v = bus.io_read(port, size)?;
            write_mem(cpu, bus, SegReg::Es, di, size, v)?;
            step_index_reg(cpu, Gpr::Edi, amask, delta);
        }
        StrOp::Outs => {
            let v = read_mem(cpu, bus, seg, si, size)?;
            let port = cpu.reg16(Gpr::Edx as u8);
            bus.io_write(port, size, v)?;
            step_index_reg(cpu, Gpr::Esi, amask, delta);
        }
    }
    Ok(flags)
}

/// String instruction with optional REP/REPE/REPNE.
///
/// A fault mid-repeat leaves ECX/ESI/EDI describing the completed iterations
/// so that re-executing the instruction resumes it.
#[allow(clippy::too_many_arguments)]
pub(super) fn string_op<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    cx: &ExecCtx,
    op: StrOp,
    size: OperandSize,
    rep: Option<RepPrefix>,
    seg: SegReg,
    addr_size: AddressSize,
    mode: CpuMode,
) -> Result<Branch, Fault> {
    if matches!(op, StrOp::Ins | StrOp::Outs) && !io_allowed(cpu, mode) {
        return Ok(Branch::Assist(AssistReason::IoPermission));
    }
    let amask = addr_size.mask();

    let Some(rep) = rep else {
        if let Some(f) = step(cpu, bus, op, size, seg, amask)? {
            cx.commit(cpu, f, ARITH_FLAGS);
        }
        return Ok(Branch::None);
    };

    let compares = matches!(op, StrOp::Cmps | StrOp::Scas);
    for _ in 0..REP_CHUNK {
        let ecx = cpu.gpr(Gpr::Ecx);
        if ecx & amask == 0 {
            return Ok(Branch::None);
        }
        let flags = step(cpu, bus, op, size, seg, amask)?;
        cpu.set_gpr(Gpr::Ecx, (ecx & !amask) | (ecx.wrapping_sub(1) & amask));
        if let Some(f) = flags {
            cx.commit(cpu, f, ARITH_FLAGS);
            let zf = f.contains(Eflags::ZF);
            if compares && (rep == RepPrefix::Rep) != zf {
                return Ok(Branch::None);
            }
        }
    }
    if cpu.gpr(Gpr::Ecx) & amask == 0 {
        Ok(Branch::None)
    } else {
        Ok(Branch::Jump(cx.eip))
    }
}

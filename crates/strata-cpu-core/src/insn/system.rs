use strata_x86::{MemRef, Operand, OperandSize};

use super::{DescTableOp, ExecCtx, FlagOp};
use crate::access::{read_operand, read_ref, write_operand, write_ref};
use crate::fault::{AssistReason, Branch, Fault};
use crate::mem::CpuBus;
use crate::state::{
    CpuMode, CpuState, Eflags, TableRegister, CR0_EM, CR0_ET, CR0_MP, CR0_PE, CR0_PG, CR0_TS,
};

pub(super) fn require_cpl0(cpu: &CpuState) -> Result<(), Fault> {
    if cpu.cpl() != 0 {
        return Err(Fault::gp0());
    }
    Ok(())
}

pub(super) fn flag_op(
    cpu: &mut CpuState,
    cx: &ExecCtx,
    op: FlagOp,
    mode: CpuMode,
) -> Result<(), Fault> {
    match op {
        FlagOp::Clc | FlagOp::Stc | FlagOp::Cmc => {
            let cf = match op {
                FlagOp::Clc => false,
                FlagOp::Stc => true,
                _ => !cpu.cf(),
            };
            let f = if cf { Eflags::CF } else { Eflags::empty() };
            cx.commit(cpu, f, Eflags::CF);
        }
        FlagOp::Cld => cpu.set_flag(Eflags::DF, false),
        FlagOp::Std => cpu.set_flag(Eflags::DF, true),
        FlagOp::Cli | FlagOp::Sti => {
            let allowed = match mode {
                CpuMode::Real => true,
                CpuMode::Protected => cpu.cpl() <= cpu.iopl(),
                CpuMode::Virtual8086 => cpu.iopl() == 3,
            };
            if !allowed {
                return Err(Fault::gp0());
            }
            cpu.set_flag(Eflags::IF, op == FlagOp::Sti);
        }
    }
    Ok(())
}

/// SGDT/SIDT/LGDT/LIDT. With a 16-bit operand size only 24 bits of base are used.
pub(super) fn desc_table<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    op: DescTableOp,
    size: OperandSize,
    mem: &MemRef,
) -> Result<(), Fault> {
    let base_mask = if size == OperandSize::Word {
        0x00FF_FFFF
    } else {
        0xFFFF_FFFF
    };
    match op {
        DescTableOp::Sgdt | DescTableOp::Sidt => {
            let reg = if op == DescTableOp::Sgdt {
                cpu.gdtr
            } else {
                cpu.idtr
            };
            write_ref(cpu, bus, mem, OperandSize::Word, reg.limit as u32)?;
            write_ref(cpu, bus, &mem.offset_by(2), OperandSize::Dword, reg.base & base_mask)?;
        }
        DescTableOp::Lgdt | DescTableOp::Lidt => {
            require_cpl0(cpu)?;
            let limit = read_ref(cpu, bus, mem, OperandSize::Word)? as u16;
            let base = read_ref(cpu, bus, &mem.offset_by(2), OperandSize::Dword)? & base_mask;
            let reg = TableRegister { base, limit };
            if op == DescTableOp::Lgdt {
                cpu.gdtr = reg;
            } else {
                cpu.idtr = reg;
            }
        }
    }
    Ok(())
}

pub(super) fn smsw<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    dst: &Operand,
) -> Result<(), Fault> {
    let size = if dst.is_memory() { OperandSize::Word } else { size };
    let cr0 = cpu.cr0;
    write_operand(cpu, bus, dst, size, cr0 & size.mask())
}

/// LMSW loads PE/MP/EM/TS but can never clear PE.
pub(super) fn lmsw<B: CpuBus>(cpu: &mut CpuState, bus: &mut B, src: &Operand) -> Result<(), Fault> {
    require_cpl0(cpu)?;
    let v = read_operand(cpu, bus, src, OperandSize::Word)?;
    let low = CR0_PE | CR0_MP | CR0_EM | CR0_TS;
    cpu.cr0 = (cpu.cr0 & !low) | (v & low) | (cpu.cr0 & CR0_PE);
    Ok(())
}

pub(super) fn mov_cr(cpu: &mut CpuState, to_cr: bool, cr: u8, reg: u8) -> Result<Branch, Fault> {
    require_cpl0(cpu)?;
    if !to_cr {
        let v = match cr {
            0 => cpu.cr0,
            2 => cpu.cr2,
            3 => cpu.cr3,
            _ => cpu.cr4,
        };
        cpu.set_reg32(reg, v);
        return Ok(Branch::None);
    }
    let v = cpu.reg32(reg);
    match cr {
        0 => {
            if v & CR0_PG != 0 && v & CR0_PE == 0 {
                return Err(Fault::gp0());
            }
            cpu.cr0 = v | CR0_ET;
        }
        2 => cpu.cr2 = v,
        3 => cpu.cr3 = v,
        _ => cpu.cr4 = v,
    }
    Ok(Branch::None)
}

/// WAIT/FWAIT raises #NM only when both MP and TS are set.
pub(super) fn wait(cpu: &CpuState) -> Result<Branch, Fault> {
    if cpu.cr0 & (CR0_MP | CR0_TS) == CR0_MP | CR0_TS {
        return Err(Fault::DeviceNotAvailable);
    }
    Ok(Branch::None)
}

pub(super) fn fpu_escape(cpu: &CpuState) -> Result<Branch, Fault> {
    if cpu.cr0 & (CR0_EM | CR0_TS) != 0 {
        return Err(Fault::DeviceNotAvailable);
    }
    Ok(Branch::Assist(AssistReason::Fpu))
}

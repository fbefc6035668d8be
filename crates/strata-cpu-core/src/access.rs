//! Live reads and writes through decoded operand references.
//!
//! Every memory access goes through segmentation: the offset is checked
//! against the cached segment limit (and, in protected mode, the segment
//! type), then added to the segment base to form the linear address handed
//! to the bus.

use strata_x86::{MemRef, Operand, OperandSize, SegReg};

use crate::fault::Fault;
use crate::mem::CpuBus;
use crate::state::{CpuMode, CpuState, Gpr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

fn segment_fault(seg: SegReg) -> Fault {
    if seg == SegReg::Ss {
        Fault::StackFault(0)
    } else {
        Fault::gp0()
    }
}

/// Translate `seg:offset` for an access of `len` bytes into a linear address.
pub fn linear_address(
    cpu: &CpuState,
    seg: SegReg,
    offset: u32,
    len: u32,
    access: Access,
) -> Result<u32, Fault> {
    let cache = cpu.seg(seg);
    if cpu.mode() == CpuMode::Protected {
        if !cache.present() {
            return Err(segment_fault(seg));
        }
        let allowed = match access {
            Access::Read => cache.readable(),
            Access::Write => cache.writable(),
        };
        if !allowed {
            return Err(segment_fault(seg));
        }
    }

    let last = offset as u64 + len.saturating_sub(1) as u64;
    let in_limit = if cache.expand_down() {
        let upper = if cache.big() { 0xFFFF_FFFF } else { 0xFFFF };
        offset as u64 > cache.limit as u64 && last <= upper
    } else {
        last <= cache.limit as u64
    };
    if !in_limit {
        return Err(segment_fault(seg));
    }
    Ok(cache.base.wrapping_add(offset))
}

pub fn read_mem<B: CpuBus>(
    cpu: &CpuState,
    bus: &mut B,
    seg: SegReg,
    offset: u32,
    size: OperandSize,
) -> Result<u32, Fault> {
    let addr = linear_address(cpu, seg, offset, size.bytes(), Access::Read)?;
    bus.read_sized(addr, size)
}

pub fn write_mem<B: CpuBus>(
    cpu: &CpuState,
    bus: &mut B,
    seg: SegReg,
    offset: u32,
    size: OperandSize,
    val: u32,
) -> Result<(), Fault> {
    let addr = linear_address(cpu, seg, offset, size.bytes(), Access::Write)?;
    bus.write_sized(addr, size, val)
}

/// Effective address (segment offset) of `mem` against live registers.
pub fn effective_address(cpu: &CpuState, mem: &MemRef) -> u32 {
    mem.effective_address(|r| cpu.reg32(r))
}

pub fn read_ref<B: CpuBus>(
    cpu: &CpuState,
    bus: &mut B,
    mem: &MemRef,
    size: OperandSize,
) -> Result<u32, Fault> {
    read_mem(cpu, bus, mem.segment, effective_address(cpu, mem), size)
}

pub fn write_ref<B: CpuBus>(
    cpu: &CpuState,
    bus: &mut B,
    mem: &MemRef,
    size: OperandSize,
    val: u32,
) -> Result<(), Fault> {
    write_mem(cpu, bus, mem.segment, effective_address(cpu, mem), size, val)
}

pub fn read_operand<B: CpuBus>(
    cpu: &CpuState,
    bus: &mut B,
    op: &Operand,
    size: OperandSize,
) -> Result<u32, Fault> {
    match op {
        Operand::Reg(r) => Ok(cpu.read_gpr(*r, size)),
        Operand::Mem(m) => read_ref(cpu, bus, m, size),
    }
}

pub fn write_operand<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    op: &Operand,
    size: OperandSize,
    val: u32,
) -> Result<(), Fault> {
    match op {
        Operand::Reg(r) => {
            cpu.write_gpr(*r, size, val);
            Ok(())
        }
        Operand::Mem(m) => write_ref(cpu, bus, m, size, val),
    }
}

/// Read an `offset:selector` far pointer (`m16:16` or `m16:32`).
pub fn read_far_pointer<B: CpuBus>(
    cpu: &CpuState,
    bus: &mut B,
    mem: &MemRef,
    size: OperandSize,
) -> Result<(u32, u16), Fault> {
    let offset = read_ref(cpu, bus, mem, size)?;
    let selector = read_ref(cpu, bus, &mem.offset_by(size.bytes()), OperandSize::Word)?;
    Ok((offset, selector as u16))
}

/// Push `val` at `size`. SP is only updated once the write succeeded.
pub fn push<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    size: OperandSize,
    val: u32,
) -> Result<(), Fault> {
    let sp = cpu.stack_ptr().wrapping_sub(size.bytes()) & cpu.stack_mask();
    write_mem(cpu, bus, SegReg::Ss, sp, size, val)?;
    cpu.set_stack_ptr(sp);
    Ok(())
}

/// Read the stack slot `depth` bytes above the top of stack without popping.
pub fn peek_stack<B: CpuBus>(
    cpu: &CpuState,
    bus: &mut B,
    depth: u32,
    size: OperandSize,
) -> Result<u32, Fault> {
    let sp = cpu.stack_ptr().wrapping_add(depth) & cpu.stack_mask();
    read_mem(cpu, bus, SegReg::Ss, sp, size)
}

pub fn pop<B: CpuBus>(cpu: &mut CpuState, bus: &mut B, size: OperandSize) -> Result<u32, Fault> {
    let val = peek_stack(cpu, bus, 0, size)?;
    release_stack(cpu, size.bytes());
    Ok(val)
}

/// Discard `bytes` from the top of the stack.
pub fn release_stack(cpu: &mut CpuState, bytes: u32) {
    let sp = cpu.stack_ptr().wrapping_add(bytes) & cpu.stack_mask();
    cpu.set_stack_ptr(sp);
}

/// The string-instruction index register at `addr_mask` width (SI/ESI or DI/EDI).
pub fn index_reg(cpu: &CpuState, reg: Gpr, addr_mask: u32) -> u32 {
    cpu.gpr(reg) & addr_mask
}

/// Advance SI/DI (or ESI/EDI) by `delta`, preserving the upper half for 16-bit addressing.
pub fn step_index_reg(cpu: &mut CpuState, reg: Gpr, addr_mask: u32, delta: u32) {
    let cur = cpu.gpr(reg);
    let next = (cur & !addr_mask) | (cur.wrapping_add(delta) & addr_mask);
    cpu.set_gpr(reg, next);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::PhysicalMemory;
    use crate::state::{SegmentCache, ACCESS_DC, ACCESS_PRESENT, ACCESS_S, FLAG_DB};

    #[test]
    fn real_mode_word_at_limit_faults() {
        let cpu = CpuState::new(CpuMode::Real);
        assert_eq!(
            linear_address(&cpu, SegReg::Ds, 0xFFFF, 2, Access::Read),
            Err(Fault::gp0())
        );
        assert_eq!(
            linear_address(&cpu, SegReg::Ss, 0xFFFF, 2, Access::Write),
            Err(Fault::StackFault(0))
        );
        assert_eq!(
            linear_address(&cpu, SegReg::Ds, 0xFFFE, 2, Access::Read),
            Ok(0xFFFE)
        );
    }

    #[test]
    fn protected_mode_rejects_writes_to_code() {
        let mut cpu = CpuState::new(CpuMode::Protected);
        let cs = *cpu.seg(SegReg::Cs);
        cpu.set_seg(SegReg::Ds, cs);
        assert_eq!(
            linear_address(&cpu, SegReg::Ds, 0, 4, Access::Write),
            Err(Fault::gp0())
        );
        assert!(linear_address(&cpu, SegReg::Ds, 0, 4, Access::Read).is_ok());
    }

    #[test]
    fn expand_down_segment_inverts_the_limit() {
        let mut cpu = CpuState::new(CpuMode::Protected);
        cpu.set_seg(
            SegReg::Ss,
            SegmentCache {
                selector: 0x18,
                base: 0x1000,
                limit: 0x0FFF,
                access: ACCESS_PRESENT | ACCESS_S | ACCESS_DC | 0x2,
                flags: FLAG_DB,
            },
        );
        assert_eq!(
            linear_address(&cpu, SegReg::Ss, 0x0FFF, 1, Access::Write),
            Err(Fault::StackFault(0))
        );
        assert_eq!(
            linear_address(&cpu, SegReg::Ss, 0x1000, 4, Access::Write),
            Ok(0x2000)
        );
    }

    #[test]
    fn push_pop_16bit_stack_wraps() {
        let mut cpu = CpuState::new(CpuMode::Real);
        let mut bus = PhysicalMemory::new(0x10000);
        cpu.set_gpr(Gpr::Esp, 0xABCD_0000);
        push(&mut cpu, &mut bus, OperandSize::Word, 0x1234).unwrap();
        assert_eq!(cpu.gpr(Gpr::Esp), 0xABCD_FFFE);
        assert_eq!(pop(&mut cpu, &mut bus, OperandSize::Word).unwrap(), 0x1234);
        assert_eq!(cpu.gpr(Gpr::Esp), 0xABCD_0000);
    }
}

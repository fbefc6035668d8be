//! Segment register loads for each processor mode.

use strata_x86::SegReg;

use crate::fault::Fault;
use crate::mem::CpuBus;
use crate::state::{
    CpuMode, CpuState, SegmentCache, ACCESS_CODE, ACCESS_DC, ACCESS_PRESENT, ACCESS_RW, ACCESS_S,
    FLAG_G,
};

/// A decoded 8-byte segment descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub base: u32,
    /// Byte-granular limit (already scaled when G=1).
    pub limit: u32,
    pub access: u8,
    pub flags: u8,
}

impl Descriptor {
    pub fn from_raw(lo: u32, hi: u32) -> Self {
        let base = (lo >> 16) | ((hi & 0xFF) << 16) | (hi & 0xFF00_0000);
        let raw_limit = (lo & 0xFFFF) | (hi & 0x000F_0000);
        let flags = ((hi >> 20) & 0xF) as u8;
        let limit = if flags & FLAG_G != 0 {
            (raw_limit << 12) | 0xFFF
        } else {
            raw_limit
        };
        Self {
            base,
            limit,
            access: (hi >> 8) as u8,
            flags,
        }
    }

    pub fn present(&self) -> bool {
        self.access & ACCESS_PRESENT != 0
    }

    /// System descriptors (TSS, LDT, gates) have S=0.
    pub fn is_system(&self) -> bool {
        self.access & ACCESS_S == 0
    }

    pub fn is_code(&self) -> bool {
        !self.is_system() && self.access & ACCESS_CODE != 0
    }

    pub fn is_data(&self) -> bool {
        !self.is_system() && self.access & ACCESS_CODE == 0
    }

    pub fn conforming(&self) -> bool {
        self.is_code() && self.access & ACCESS_DC != 0
    }

    pub fn dpl(&self) -> u8 {
        (self.access >> 5) & 3
    }

    fn into_cache(self, selector: u16) -> SegmentCache {
        SegmentCache {
            selector,
            base: self.base,
            limit: self.limit,
            access: self.access,
            flags: self.flags,
        }
    }
}

fn selector_error(selector: u16) -> u16 {
    selector & 0xFFFC
}

/// Fetch the GDT descriptor named by `selector`.
///
/// LDT-relative selectors are not supported by the core and raise #GP.
pub fn read_descriptor<B: CpuBus>(
    cpu: &CpuState,
    bus: &mut B,
    selector: u16,
) -> Result<Descriptor, Fault> {
    let err = Fault::GeneralProtection(selector_error(selector));
    if selector & 4 != 0 {
        return Err(err);
    }
    let offset = (selector & !7) as u32;
    if offset + 7 > cpu.gdtr.limit as u32 {
        return Err(err);
    }
    let addr = cpu.gdtr.base.wrapping_add(offset);
    let lo = bus.read_u32(addr)?;
    let hi = bus.read_u32(addr.wrapping_add(4))?;
    Ok(Descriptor::from_raw(lo, hi))
}

/// Load a data segment register (`MOV Sreg`, `POP Sreg`, `LDS`...).
///
/// CS is never loaded this way; see [`load_code_segment`].
pub fn load_segment<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    seg: SegReg,
    selector: u16,
) -> Result<(), Fault> {
    match cpu.mode() {
        CpuMode::Real => {
            let cache = cpu.seg_mut(seg);
            cache.selector = selector;
            cache.base = (selector as u32) << 4;
            Ok(())
        }
        CpuMode::Virtual8086 => {
            cpu.set_seg(seg, SegmentCache::v86(selector, seg == SegReg::Cs));
            Ok(())
        }
        CpuMode::Protected if seg == SegReg::Ss => load_stack_segment(cpu, bus, selector),
        CpuMode::Protected => load_data_segment(cpu, bus, seg, selector),
    }
}

fn load_stack_segment<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    selector: u16,
) -> Result<(), Fault> {
    if selector & 0xFFFC == 0 {
        return Err(Fault::gp0());
    }
    let cpl = cpu.cpl();
    let desc = read_descriptor(cpu, bus, selector)?;
    let writable_data = desc.is_data() && desc.access & ACCESS_RW != 0;
    if (selector & 3) as u8 != cpl || desc.dpl() != cpl || !writable_data {
        return Err(Fault::GeneralProtection(selector_error(selector)));
    }
    if !desc.present() {
        return Err(Fault::StackFault(selector_error(selector)));
    }
    cpu.set_seg(SegReg::Ss, desc.into_cache(selector));
    Ok(())
}

fn load_data_segment<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    seg: SegReg,
    selector: u16,
) -> Result<(), Fault> {
    if selector & 0xFFFC == 0 {
        cpu.set_seg(seg, SegmentCache::unusable(selector));
        return Ok(());
    }
    let desc = read_descriptor(cpu, bus, selector)?;
    let readable = desc.is_data() || (desc.is_code() && desc.access & ACCESS_RW != 0);
    if !readable {
        return Err(Fault::GeneralProtection(selector_error(selector)));
    }
    if !desc.conforming() {
        let rpl = (selector & 3) as u8;
        if desc.dpl() < cpu.cpl().max(rpl) {
            return Err(Fault::GeneralProtection(selector_error(selector)));
        }
    }
    if !desc.present() {
        return Err(Fault::SegmentNotPresent(selector_error(selector)));
    }
    cpu.set_seg(seg, desc.into_cache(selector));
    Ok(())
}

/// Result of loading CS for a protected-mode far transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeLoad {
    Loaded,
    /// The selector names a gate or TSS; the transfer belongs to the driver.
    Gate,
    /// The target runs at a different privilege level.
    PrivilegeChange,
}

/// Load CS for a far `JMP`/`CALL`/`RETF` to `selector:offset`.
///
/// Real and virtual-8086 modes compute the base from the selector. Protected
/// mode loads a same-privilege code descriptor; `offset` is checked against
/// the new limit before anything is committed.
pub fn load_code_segment<B: CpuBus>(
    cpu: &mut CpuState,
    bus: &mut B,
    selector: u16,
    offset: u32,
) -> Result<CodeLoad, Fault> {
    match cpu.mode() {
        CpuMode::Real => {
            let cs = cpu.seg_mut(SegReg::Cs);
            cs.selector = selector;
            cs.base = (selector as u32) << 4;
            Ok(CodeLoad::Loaded)
        }
        CpuMode::Virtual8086 => {
            cpu.set_seg(SegReg::Cs, SegmentCache::v86(selector, true));
            Ok(CodeLoad::Loaded)
        }
        CpuMode::Protected => {
            if selector & 0xFFFC == 0 {
                return Err(Fault::gp0());
            }
            let err = Fault::GeneralProtection(selector_error(selector));
            let desc = read_descriptor(cpu, bus, selector)?;
            if desc.is_system() {
                return Ok(CodeLoad::Gate);
            }
            if !desc.is_code() {
                return Err(err);
            }
            let cpl = cpu.cpl();
            let rpl = (selector & 3) as u8;
            if desc.conforming() {
                if desc.dpl() > cpl {
                    return Err(err);
                }
            } else if rpl > cpl {
                return Ok(CodeLoad::PrivilegeChange);
            } else if desc.dpl() != cpl {
                return Err(err);
            }
            if !desc.present() {
                return Err(Fault::SegmentNotPresent(selector_error(selector)));
            }
            if offset > desc.limit {
                return Err(Fault::gp0());
            }
            let selector = (selector & 0xFFFC) | cpl as u16;
            cpu.set_seg(SegReg::Cs, desc.into_cache(selector));
            Ok(CodeLoad::Loaded)
        }
    }
}

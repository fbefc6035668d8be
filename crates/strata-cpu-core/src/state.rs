use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strata_x86::{OperandSize, SegReg};

bitflags! {
    /// The architectural EFLAGS register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Eflags: u32 {
        const CF = 1 << 0;
        const RESERVED1 = 1 << 1;
        const PF = 1 << 2;
        const AF = 1 << 4;
        const ZF = 1 << 6;
        const SF = 1 << 7;
        const TF = 1 << 8;
        const IF = 1 << 9;
        const DF = 1 << 10;
        const OF = 1 << 11;
        const IOPL = 3 << 12;
        const NT = 1 << 14;
        const RF = 1 << 16;
        const VM = 1 << 17;
        const AC = 1 << 18;
        const VIF = 1 << 19;
        const VIP = 1 << 20;
        const ID = 1 << 21;

        /// The six arithmetic status flags (O/S/Z/A/P/C).
        const STATUS = Self::CF.bits()
            | Self::PF.bits()
            | Self::AF.bits()
            | Self::ZF.bits()
            | Self::SF.bits()
            | Self::OF.bits();
    }
}

pub const CR0_PE: u32 = 1 << 0;
pub const CR0_MP: u32 = 1 << 1;
pub const CR0_EM: u32 = 1 << 2;
pub const CR0_TS: u32 = 1 << 3;
pub const CR0_ET: u32 = 1 << 4;
pub const CR0_PG: u32 = 1 << 31;

/// Processor operating mode, derived from CR0.PE and EFLAGS.VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuMode {
    Real,
    Protected,
    Virtual8086,
}

/// General purpose registers in encoding order.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gpr {
    Eax = 0,
    Ecx = 1,
    Edx = 2,
    Ebx = 3,
    Esp = 4,
    Ebp = 5,
    Esi = 6,
    Edi = 7,
}

// Descriptor access byte.
pub const ACCESS_ACCESSED: u8 = 1 << 0;
pub const ACCESS_RW: u8 = 1 << 1;
pub const ACCESS_DC: u8 = 1 << 2;
pub const ACCESS_CODE: u8 = 1 << 3;
pub const ACCESS_S: u8 = 1 << 4;
pub const ACCESS_PRESENT: u8 = 1 << 7;

// Descriptor flags nibble (byte 6 bits 4-7, stored in the low nibble).
pub const FLAG_DB: u8 = 1 << 2;
pub const FLAG_G: u8 = 1 << 3;

/// A segment register: the visible selector plus its hidden descriptor cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentCache {
    pub selector: u16,
    pub base: u32,
    /// Byte-granular limit.
    pub limit: u32,
    pub access: u8,
    pub flags: u8,
}

impl SegmentCache {
    /// Power-on style real-mode data segment.
    pub const fn real_data(selector: u16) -> Self {
        Self {
            selector,
            base: (selector as u32) << 4,
            limit: 0xFFFF,
            access: ACCESS_PRESENT | ACCESS_S | ACCESS_RW | ACCESS_ACCESSED,
            flags: 0,
        }
    }

    pub const fn real_code(selector: u16) -> Self {
        Self {
            selector,
            base: (selector as u32) << 4,
            limit: 0xFFFF,
            access: ACCESS_PRESENT | ACCESS_S | ACCESS_CODE | ACCESS_RW | ACCESS_ACCESSED,
            flags: 0,
        }
    }

    /// Virtual-8086 segments are always DPL 3 with a 64 KiB limit.
    pub const fn v86(selector: u16, code: bool) -> Self {
        let access = if code {
            ACCESS_PRESENT | (3 << 5) | ACCESS_S | ACCESS_CODE | ACCESS_RW | ACCESS_ACCESSED
        } else {
            ACCESS_PRESENT | (3 << 5) | ACCESS_S | ACCESS_RW | ACCESS_ACCESSED
        };
        Self {
            selector,
            base: (selector as u32) << 4,
            limit: 0xFFFF,
            access,
            flags: 0,
        }
    }

    /// A flat 4 GiB 32-bit segment at DPL 0.
    pub const fn flat(selector: u16, code: bool) -> Self {
        let kind = if code { ACCESS_CODE } else { 0 };
        Self {
            selector,
            base: 0,
            limit: 0xFFFF_FFFF,
            access: ACCESS_PRESENT | ACCESS_S | ACCESS_RW | ACCESS_ACCESSED | kind,
            flags: FLAG_DB | FLAG_G,
        }
    }

    /// State after loading a null selector into a data segment register.
    pub const fn unusable(selector: u16) -> Self {
        Self {
            selector,
            base: 0,
            limit: 0,
            access: 0,
            flags: 0,
        }
    }

    pub fn present(&self) -> bool {
        self.access & ACCESS_PRESENT != 0
    }

    pub fn dpl(&self) -> u8 {
        (self.access >> 5) & 3
    }

    pub fn is_code(&self) -> bool {
        self.access & ACCESS_CODE != 0
    }

    pub fn readable(&self) -> bool {
        !self.is_code() || self.access & ACCESS_RW != 0
    }

    pub fn writable(&self) -> bool {
        !self.is_code() && self.access & ACCESS_RW != 0
    }

    pub fn expand_down(&self) -> bool {
        !self.is_code() && self.access & ACCESS_DC != 0
    }

    /// D bit (code) / B bit (stack, expand-down upper bound).
    pub fn big(&self) -> bool {
        self.flags & FLAG_DB != 0
    }

    /// Attributes packed for snapshots: access byte | flags << 8.
    pub fn attributes(&self) -> u32 {
        self.access as u32 | (self.flags as u32) << 8
    }

    pub fn set_attributes(&mut self, attrs: u32) {
        self.access = attrs as u8;
        self.flags = (attrs >> 8) as u8 & 0x0F;
    }
}

/// GDTR / IDTR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableRegister {
    pub base: u32,
    pub limit: u16,
}

/// Architectural processor state.
///
/// This is the single mutable object every instruction unit executes against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuState {
    gpr: [u32; 8],
    pub eip: u32,
    eflags: u32,
    segs: [SegmentCache; 6],
    pub cr0: u32,
    pub cr2: u32,
    pub cr3: u32,
    pub cr4: u32,
    pub gdtr: TableRegister,
    pub idtr: TableRegister,
    pub halted: bool,
}

impl Default for CpuState {
    fn default() -> Self {
        Self::new(CpuMode::Real)
    }
}

impl CpuState {
    /// Create a state for `mode` with zeroed registers.
    ///
    /// Real mode starts with all selectors 0 and 64 KiB limits. Protected mode
    /// starts with flat 32-bit CPL0 segments (selectors 0x08 code, 0x10 data).
    /// Virtual-8086 mode starts with zero selectors, IOPL 0.
    pub fn new(mode: CpuMode) -> Self {
        let mut state = Self {
            gpr: [0; 8],
            eip: 0,
            eflags: Eflags::RESERVED1.bits(),
            segs: [SegmentCache::real_data(0); 6],
            cr0: CR0_ET,
            cr2: 0,
            cr3: 0,
            cr4: 0,
            gdtr: TableRegister::default(),
            idtr: TableRegister {
                base: 0,
                limit: 0x3FF,
            },
            halted: false,
        };
        match mode {
            CpuMode::Real => {
                state.segs[SegReg::Cs.index()] = SegmentCache::real_code(0);
            }
            CpuMode::Protected => {
                state.cr0 |= CR0_PE;
                for seg in SegReg::ALL {
                    state.segs[seg.index()] = SegmentCache::flat(0x10, false);
                }
                state.segs[SegReg::Cs.index()] = SegmentCache::flat(0x08, true);
            }
            CpuMode::Virtual8086 => {
                state.cr0 |= CR0_PE;
                state.eflags |= Eflags::VM.bits();
                for seg in SegReg::ALL {
                    state.segs[seg.index()] = SegmentCache::v86(0, seg == SegReg::Cs);
                }
            }
        }
        state
    }

    pub fn mode(&self) -> CpuMode {
        if self.cr0 & CR0_PE == 0 {
            CpuMode::Real
        } else if self.eflags & Eflags::VM.bits() != 0 {
            CpuMode::Virtual8086
        } else {
            CpuMode::Protected
        }
    }

    /// Current privilege level.
    pub fn cpl(&self) -> u8 {
        match self.mode() {
            CpuMode::Real => 0,
            CpuMode::Virtual8086 => 3,
            CpuMode::Protected => (self.segs[SegReg::Cs.index()].selector & 3) as u8,
        }
    }

    /// Default operand/address size of the current code segment.
    pub fn default_32(&self) -> bool {
        self.mode() == CpuMode::Protected && self.segs[SegReg::Cs.index()].big()
    }

    /// Whether the stack uses ESP (rather than SP).
    pub fn stack_32(&self) -> bool {
        self.mode() == CpuMode::Protected && self.segs[SegReg::Ss.index()].big()
    }

    pub fn ip_mask(&self) -> u32 {
        if self.default_32() {
            0xFFFF_FFFF
        } else {
            0xFFFF
        }
    }

    /// Linear address of CS:EIP.
    pub fn linear_ip(&self) -> u32 {
        self.segs[SegReg::Cs.index()].base.wrapping_add(self.eip)
    }

    // ---- general registers -------------------------------------------------

    pub fn reg32(&self, index: u8) -> u32 {
        self.gpr[(index & 7) as usize]
    }

    pub fn set_reg32(&mut self, index: u8, val: u32) {
        self.gpr[(index & 7) as usize] = val;
    }

    pub fn reg16(&self, index: u8) -> u16 {
        self.reg32(index) as u16
    }

    pub fn set_reg16(&mut self, index: u8, val: u16) {
        let slot = &mut self.gpr[(index & 7) as usize];
        *slot = (*slot & 0xFFFF_0000) | val as u32;
    }

    /// Byte register by legacy encoding (4-7 are AH/CH/DH/BH).
    pub fn reg8(&self, index: u8) -> u8 {
        let index = index & 7;
        if index < 4 {
            self.gpr[index as usize] as u8
        } else {
            (self.gpr[(index - 4) as usize] >> 8) as u8
        }
    }

    pub fn set_reg8(&mut self, index: u8, val: u8) {
        let index = index & 7;
        if index < 4 {
            let slot = &mut self.gpr[index as usize];
            *slot = (*slot & !0xFF) | val as u32;
        } else {
            let slot = &mut self.gpr[(index - 4) as usize];
            *slot = (*slot & !0xFF00) | (val as u32) << 8;
        }
    }

    pub fn read_gpr(&self, index: u8, size: OperandSize) -> u32 {
        match size {
            OperandSize::Byte => self.reg8(index) as u32,
            OperandSize::Word => self.reg16(index) as u32,
            OperandSize::Dword => self.reg32(index),
        }
    }

    pub fn write_gpr(&mut self, index: u8, size: OperandSize, val: u32) {
        match size {
            OperandSize::Byte => self.set_reg8(index, val as u8),
            OperandSize::Word => self.set_reg16(index, val as u16),
            OperandSize::Dword => self.set_reg32(index, val),
        }
    }

    pub fn gpr(&self, reg: Gpr) -> u32 {
        self.gpr[reg as usize]
    }

    pub fn set_gpr(&mut self, reg: Gpr, val: u32) {
        self.gpr[reg as usize] = val;
    }

    // ---- flags ---------------------------------------------------------------

    pub fn eflags(&self) -> u32 {
        self.eflags
    }

    /// Load EFLAGS, forcing bit 1 and clearing the reserved bits.
    pub fn set_eflags(&mut self, val: u32) {
        self.eflags = (val & Eflags::all().bits()) | Eflags::RESERVED1.bits();
    }

    pub fn flags(&self) -> Eflags {
        Eflags::from_bits_truncate(self.eflags)
    }

    pub fn flag(&self, flag: Eflags) -> bool {
        self.eflags & flag.bits() != 0
    }

    pub fn set_flag(&mut self, flag: Eflags, val: bool) {
        if val {
            self.eflags |= flag.bits();
        } else {
            self.eflags &= !flag.bits();
        }
    }

    pub fn cf(&self) -> bool {
        self.flag(Eflags::CF)
    }

    /// Replace the flags selected by `mask` with the corresponding bits of `computed`.
    #[inline]
    pub fn commit_flags(&mut self, computed: Eflags, mask: Eflags) {
        let mask = mask.bits();
        self.eflags = (self.eflags & !mask) | (computed.bits() & mask);
    }

    pub fn iopl(&self) -> u8 {
        ((self.eflags >> 12) & 3) as u8
    }

    // ---- segments ------------------------------------------------------------

    pub fn seg(&self, seg: SegReg) -> &SegmentCache {
        &self.segs[seg.index()]
    }

    pub fn seg_mut(&mut self, seg: SegReg) -> &mut SegmentCache {
        &mut self.segs[seg.index()]
    }

    pub fn set_seg(&mut self, seg: SegReg, cache: SegmentCache) {
        self.segs[seg.index()] = cache;
    }

    pub fn seg_base(&self, seg: SegReg) -> u32 {
        self.segs[seg.index()].base
    }

    // ---- stack pointer -------------------------------------------------------

    pub fn stack_mask(&self) -> u32 {
        if self.stack_32() {
            0xFFFF_FFFF
        } else {
            0xFFFF
        }
    }

    pub fn stack_ptr(&self) -> u32 {
        self.gpr[Gpr::Esp as usize] & self.stack_mask()
    }

    /// Update SP or ESP according to the stack width (upper half preserved for SP).
    pub fn set_stack_ptr(&mut self, val: u32) {
        if self.stack_32() {
            self.gpr[Gpr::Esp as usize] = val;
        } else {
            self.set_reg16(Gpr::Esp as u8, val as u16);
        }
    }
}

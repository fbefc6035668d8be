use core::fmt;

/// Width of a data operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandSize {
    Byte,
    Word,
    Dword,
}

impl OperandSize {
    pub const fn bits(self) -> u32 {
        match self {
            OperandSize::Byte => 8,
            OperandSize::Word => 16,
            OperandSize::Dword => 32,
        }
    }

    pub const fn bytes(self) -> u32 {
        self.bits() / 8
    }

    pub const fn mask(self) -> u32 {
        match self {
            OperandSize::Byte => 0xFF,
            OperandSize::Word => 0xFFFF,
            OperandSize::Dword => 0xFFFF_FFFF,
        }
    }

    pub const fn sign_bit(self) -> u32 {
        1 << (self.bits() - 1)
    }

    /// Sign-extend the low `self.bits()` bits of `value` to 32 bits.
    pub const fn sign_extend(self, value: u32) -> u32 {
        match self {
            OperandSize::Byte => value as u8 as i8 as i32 as u32,
            OperandSize::Word => value as u16 as i16 as i32 as u32,
            OperandSize::Dword => value,
        }
    }

    pub fn ptr_name(self) -> &'static str {
        match self {
            OperandSize::Byte => "byte",
            OperandSize::Word => "word",
            OperandSize::Dword => "dword",
        }
    }
}

/// Width of effective-address arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSize {
    Bits16,
    Bits32,
}

impl AddressSize {
    pub const fn mask(self) -> u32 {
        match self {
            AddressSize::Bits16 => 0xFFFF,
            AddressSize::Bits32 => 0xFFFF_FFFF,
        }
    }

    pub const fn bits(self) -> u32 {
        match self {
            AddressSize::Bits16 => 16,
            AddressSize::Bits32 => 32,
        }
    }
}

/// Segment registers in ModRM.reg encoding order.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegReg {
    Es = 0,
    Cs = 1,
    Ss = 2,
    Ds = 3,
    Fs = 4,
    Gs = 5,
}

impl SegReg {
    pub const ALL: [SegReg; 6] = [
        SegReg::Es,
        SegReg::Cs,
        SegReg::Ss,
        SegReg::Ds,
        SegReg::Fs,
        SegReg::Gs,
    ];

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            SegReg::Es => "es",
            SegReg::Cs => "cs",
            SegReg::Ss => "ss",
            SegReg::Ds => "ds",
            SegReg::Fs => "fs",
            SegReg::Gs => "gs",
        }
    }
}

impl fmt::Display for SegReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const REG8: [&str; 8] = ["al", "cl", "dl", "bl", "ah", "ch", "dh", "bh"];
const REG16: [&str; 8] = ["ax", "cx", "dx", "bx", "sp", "bp", "si", "di"];
const REG32: [&str; 8] = ["eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi"];

/// Intel name of general register `index` at `size`.
///
/// Byte registers follow the legacy encoding: indices 4-7 are AH/CH/DH/BH.
pub fn reg_name(index: u8, size: OperandSize) -> &'static str {
    let i = (index & 7) as usize;
    match size {
        OperandSize::Byte => REG8[i],
        OperandSize::Word => REG16[i],
        OperandSize::Dword => REG32[i],
    }
}

/// A resolved memory reference.
///
/// The shape (which registers, which displacement, which segment) is fixed at
/// decode time; the effective address is recomputed from live register values
/// every time the owning instruction executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemRef {
    pub segment: SegReg,
    /// Whether `segment` came from an explicit override prefix.
    pub seg_override: bool,
    pub base: Option<u8>,
    pub index: Option<u8>,
    pub scale: u8,
    pub disp: u32,
    pub addr_size: AddressSize,
}

impl MemRef {
    /// An absolute `[disp]` reference (moffs forms, string/xlat helpers).
    pub fn absolute(segment: SegReg, seg_override: bool, disp: u32, addr_size: AddressSize) -> Self {
        Self {
            segment,
            seg_override,
            base: None,
            index: None,
            scale: 1,
            disp: disp & addr_size.mask(),
            addr_size,
        }
    }

    /// Compute the effective address (segment offset) from live register values.
    ///
    /// `reg32` returns the full 32-bit value of general register `index`. For
    /// 16-bit addressing only the low 16 bits of each register participate and
    /// the sum wraps at 64 KiB.
    pub fn effective_address(&self, mut reg32: impl FnMut(u8) -> u32) -> u32 {
        let mask = self.addr_size.mask();
        let mut ea = self.disp;
        if let Some(base) = self.base {
            ea = ea.wrapping_add(reg32(base) & mask);
        }
        if let Some(index) = self.index {
            ea = ea.wrapping_add((reg32(index) & mask).wrapping_mul(self.scale as u32));
        }
        ea & mask
    }

    /// The same reference displaced by `delta` bytes (wrapping at the address size).
    pub fn offset_by(self, delta: u32) -> Self {
        Self {
            disp: self.disp.wrapping_add(delta) & self.addr_size.mask(),
            ..self
        }
    }
}

impl fmt::Display for MemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = match self.addr_size {
            AddressSize::Bits16 => OperandSize::Word,
            AddressSize::Bits32 => OperandSize::Dword,
        };
        if self.seg_override {
            write!(f, "{}:", self.segment)?;
        }
        f.write_str("[")?;
        let mut first = true;
        if let Some(base) = self.base {
            f.write_str(reg_name(base, size))?;
            first = false;
        }
        if let Some(index) = self.index {
            if !first {
                f.write_str("+")?;
            }
            f.write_str(reg_name(index, size))?;
            if self.scale != 1 {
                write!(f, "*{}", self.scale)?;
            }
            first = false;
        }
        if first {
            write!(f, "0x{:x}", self.disp)?;
        } else if self.disp != 0 {
            let signed = match self.addr_size {
                AddressSize::Bits16 => self.disp as u16 as i16 as i64,
                AddressSize::Bits32 => self.disp as i32 as i64,
            };
            if signed < 0 {
                write!(f, "-0x{:x}", -signed)?;
            } else {
                write!(f, "+0x{signed:x}")?;
            }
        }
        f.write_str("]")
    }
}

/// An operand reference ("pointer"): either a general register or memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Reg(u8),
    Mem(MemRef),
}

impl Operand {
    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Mem(_))
    }

    pub fn memory(&self) -> Option<MemRef> {
        match self {
            Operand::Mem(m) => Some(*m),
            Operand::Reg(_) => None,
        }
    }

    /// Format this operand at `size` (register names depend on the width).
    pub fn display(&self, size: OperandSize) -> OperandDisplay<'_> {
        OperandDisplay { op: self, size }
    }
}

pub struct OperandDisplay<'a> {
    op: &'a Operand,
    size: OperandSize,
}

impl fmt::Display for OperandDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Operand::Reg(r) => f.write_str(reg_name(*r, self.size)),
            Operand::Mem(m) => write!(f, "{} ptr {m}", self.size.ptr_name()),
        }
    }
}

use crate::{AddressSize, DecodeCursor, DecodeError, OperandSize, SegReg};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepPrefix {
    /// `F3`: REP / REPE / REPZ.
    Rep,
    /// `F2`: REPNE / REPNZ.
    Repne,
}

/// Legacy prefixes that precede the opcode.
///
/// When a group is repeated the last prefix wins, matching hardware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Prefixes {
    pub segment: Option<SegReg>,
    pub operand_size: bool,
    pub address_size: bool,
    pub lock: bool,
    pub rep: Option<RepPrefix>,
}

impl Prefixes {
    /// Consume every legacy prefix at the cursor.
    ///
    /// Fails with [`DecodeError::TooLong`] if prefixes alone exhaust the
    /// 15-byte instruction limit.
    pub fn scan(cursor: &mut DecodeCursor<'_>) -> Result<Self, DecodeError> {
        let mut p = Prefixes::default();
        loop {
            let b = cursor.peek()?;
            match b {
                0x26 => p.segment = Some(SegReg::Es),
                0x2E => p.segment = Some(SegReg::Cs),
                0x36 => p.segment = Some(SegReg::Ss),
                0x3E => p.segment = Some(SegReg::Ds),
                0x64 => p.segment = Some(SegReg::Fs),
                0x65 => p.segment = Some(SegReg::Gs),
                0x66 => p.operand_size = true,
                0x67 => p.address_size = true,
                0xF0 => p.lock = true,
                0xF2 => p.rep = Some(RepPrefix::Repne),
                0xF3 => p.rep = Some(RepPrefix::Rep),
                _ => return Ok(p),
            }
            cursor.read_u8()?;
        }
    }

    /// Effective operand size for a word/dword instruction.
    pub fn operand_size(&self, default_32: bool) -> OperandSize {
        if default_32 != self.operand_size {
            OperandSize::Dword
        } else {
            OperandSize::Word
        }
    }

    pub fn address_size(&self, default_32: bool) -> AddressSize {
        if default_32 != self.address_size {
            AddressSize::Bits32
        } else {
            AddressSize::Bits16
        }
    }

    /// Segment for a memory operand whose default segment is `default`.
    pub fn segment_or(&self, default: SegReg) -> SegReg {
        self.segment.unwrap_or(default)
    }
}

use crate::{AddressSize, DecodeCursor, DecodeError, MemRef, Operand, Prefixes, SegReg};

const BX: u8 = 3;
const SP: u8 = 4;
const BP: u8 = 5;
const SI: u8 = 6;
const DI: u8 = 7;

/// The three fields of a ModRM byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModRm {
    pub mod_: u8,
    pub reg: u8,
    pub rm: u8,
}

impl ModRm {
    pub const fn from_byte(b: u8) -> Self {
        Self {
            mod_: b >> 6,
            reg: (b >> 3) & 7,
            rm: b & 7,
        }
    }

    pub fn read(cursor: &mut DecodeCursor<'_>) -> Result<Self, DecodeError> {
        Ok(Self::from_byte(cursor.read_u8()?))
    }

    pub fn is_register(&self) -> bool {
        self.mod_ == 3
    }
}

/// Resolve the r/m half of `modrm` into an operand reference.
///
/// Consumes the SIB byte and displacement (if any) from `cursor`. The
/// register half (`modrm.reg`) is left to the caller, which knows whether it
/// names a general register, a segment register, a control register or an
/// opcode extension.
pub fn resolve(
    cursor: &mut DecodeCursor<'_>,
    modrm: ModRm,
    prefixes: &Prefixes,
    addr_size: AddressSize,
) -> Result<Operand, DecodeError> {
    if modrm.is_register() {
        return Ok(Operand::Reg(modrm.rm));
    }
    let mem = match addr_size {
        AddressSize::Bits16 => resolve_16(cursor, modrm, prefixes)?,
        AddressSize::Bits32 => resolve_32(cursor, modrm, prefixes)?,
    };
    Ok(Operand::Mem(mem))
}

fn resolve_16(
    cursor: &mut DecodeCursor<'_>,
    modrm: ModRm,
    prefixes: &Prefixes,
) -> Result<MemRef, DecodeError> {
    let (base, index) = match modrm.rm {
        0 => (Some(BX), Some(SI)),
        1 => (Some(BX), Some(DI)),
        2 => (Some(BP), Some(SI)),
        3 => (Some(BP), Some(DI)),
        4 => (None, Some(SI)),
        5 => (None, Some(DI)),
        6 if modrm.mod_ == 0 => (None, None),
        6 => (Some(BP), None),
        _ => (Some(BX), None),
    };

    let disp = match modrm.mod_ {
        0 if modrm.rm == 6 => cursor.read_u16()? as u32,
        0 => 0,
        1 => cursor.read_i8()? as i16 as u16 as u32,
        _ => cursor.read_u16()? as u32,
    };

    let default_seg = if base == Some(BP) { SegReg::Ss } else { SegReg::Ds };
    Ok(MemRef {
        segment: prefixes.segment_or(default_seg),
        seg_override: prefixes.segment.is_some(),
        base,
        index,
        scale: 1,
        disp,
        addr_size: AddressSize::Bits16,
    })
}

fn resolve_32(
    cursor: &mut DecodeCursor<'_>,
    modrm: ModRm,
    prefixes: &Prefixes,
) -> Result<MemRef, DecodeError> {
    let mut base = Some(modrm.rm);
    let mut index = None;
    let mut scale = 1u8;
    let mut disp32_no_base = modrm.mod_ == 0 && modrm.rm == 5;

    if modrm.rm == SP {
        let sib = cursor.read_u8()?;
        scale = 1 << (sib >> 6);
        let sib_index = (sib >> 3) & 7;
        let sib_base = sib & 7;
        // Index 4 (ESP) encodes "no index".
        index = (sib_index != SP).then_some(sib_index);
        base = Some(sib_base);
        disp32_no_base = modrm.mod_ == 0 && sib_base == BP;
    }
    if disp32_no_base {
        base = None;
    }

    let disp = match modrm.mod_ {
        0 if disp32_no_base => cursor.read_u32()?,
        0 => 0,
        1 => cursor.read_i8()? as i32 as u32,
        _ => cursor.read_u32()?,
    };

    let default_seg = match base {
        Some(SP) | Some(BP) => SegReg::Ss,
        _ => SegReg::Ds,
    };
    if index.is_none() {
        scale = 1;
    }
    Ok(MemRef {
        segment: prefixes.segment_or(default_seg),
        seg_override: prefixes.segment.is_some(),
        base,
        index,
        scale,
        disp,
        addr_size: AddressSize::Bits32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve_bytes(bytes: &[u8], addr_size: AddressSize) -> (Operand, usize) {
        let mut cursor = DecodeCursor::new(bytes, 0);
        let modrm = ModRm::read(&mut cursor).unwrap();
        let op = resolve(&mut cursor, modrm, &Prefixes::default(), addr_size).unwrap();
        (op, cursor.position())
    }

    #[test]
    fn bp_based_16bit_defaults_to_ss() {
        // [bp+di+0x10]
        let (op, len) = resolve_bytes(&[0x43, 0x10], AddressSize::Bits16);
        assert_eq!(len, 2);
        let m = op.memory().unwrap();
        assert_eq!(m.segment, SegReg::Ss);
        assert_eq!(m.base, Some(BP));
        assert_eq!(m.index, Some(DI));
        assert_eq!(m.disp, 0x10);
    }

    #[test]
    fn mod0_rm6_is_absolute_disp16() {
        let (op, len) = resolve_bytes(&[0x06, 0x34, 0x12], AddressSize::Bits16);
        assert_eq!(len, 3);
        let m = op.memory().unwrap();
        assert_eq!(m.base, None);
        assert_eq!(m.segment, SegReg::Ds);
        assert_eq!(m.disp, 0x1234);
    }

    #[test]
    fn negative_disp8_wraps_at_16_bits() {
        // [si-1]
        let (op, _) = resolve_bytes(&[0x44, 0xFF], AddressSize::Bits16);
        let m = op.memory().unwrap();
        assert_eq!(m.disp, 0xFFFF);
        assert_eq!(m.effective_address(|_| 0), 0xFFFF);
        assert_eq!(m.effective_address(|_| 1), 0);
    }

    #[test]
    fn sib_without_base_uses_disp32() {
        // mod=00 rm=100, SIB base=101 index=ecx scale=8 => [ecx*8+disp32]
        let (op, len) = resolve_bytes(&[0x04, 0xCD, 0x00, 0x10, 0x00, 0x00], AddressSize::Bits32);
        assert_eq!(len, 6);
        let m = op.memory().unwrap();
        assert_eq!(m.base, None);
        assert_eq!(m.index, Some(1));
        assert_eq!(m.scale, 8);
        assert_eq!(m.disp, 0x1000);
        assert_eq!(m.segment, SegReg::Ds);
    }
}

use strata_x86::{AddressSize, DecodeCursor, DecodeError, OperandSize, Prefixes, RepPrefix, SegReg};

#[test]
fn last_prefix_in_a_group_wins() {
    let bytes = [0x26, 0x2E, 0xF2, 0xF3, 0x66, 0xA5];
    let mut cursor = DecodeCursor::new(&bytes, 0);
    let p = Prefixes::scan(&mut cursor).unwrap();
    assert_eq!(p.segment, Some(SegReg::Cs));
    assert_eq!(p.rep, Some(RepPrefix::Rep));
    assert!(p.operand_size);
    assert!(!p.address_size);
    assert_eq!(cursor.peek(), Ok(0xA5));
}

#[test]
fn size_overrides_toggle_the_default() {
    let p = Prefixes {
        operand_size: true,
        address_size: true,
        ..Prefixes::default()
    };
    assert_eq!(p.operand_size(false), OperandSize::Dword);
    assert_eq!(p.operand_size(true), OperandSize::Word);
    assert_eq!(p.address_size(false), AddressSize::Bits32);
    assert_eq!(p.address_size(true), AddressSize::Bits16);
    assert_eq!(Prefixes::default().operand_size(true), OperandSize::Dword);
}

#[test]
fn prefix_run_longer_than_fifteen_bytes_is_too_long() {
    let bytes = [0x66u8; 20];
    let mut cursor = DecodeCursor::new(&bytes, 0);
    assert_eq!(Prefixes::scan(&mut cursor), Err(DecodeError::TooLong));
}

#[test]
fn prefixes_only_is_unexpected_eof() {
    let bytes = [0xF0, 0x66];
    let mut cursor = DecodeCursor::new(&bytes, 0);
    assert_eq!(Prefixes::scan(&mut cursor), Err(DecodeError::UnexpectedEof));
}

use strata_x86::{resolve, AddressSize, DecodeCursor, DecodeError, ModRm, Operand, Prefixes, SegReg};

fn regs(values: [u32; 8]) -> impl Fn(u8) -> u32 {
    move |i| values[i as usize]
}

#[test]
fn sib_with_disp32_consumes_six_bytes_and_matches_manual_ea() {
    // mod=10 reg=000 rm=100 | SIB scale=4 index=esi base=ebx | disp32 0x12345678
    // => [ebx+esi*4+0x12345678]
    let bytes = [0x84, 0xB3, 0x78, 0x56, 0x34, 0x12, 0xAA];
    let mut cursor = DecodeCursor::new(&bytes, 0x4000);
    let modrm = ModRm::read(&mut cursor).unwrap();
    let op = resolve(&mut cursor, modrm, &Prefixes::default(), AddressSize::Bits32).unwrap();

    assert_eq!(cursor.position(), 1 + 1 + 4);
    assert_eq!(cursor.peek(), Ok(0xAA));

    let m = op.memory().expect("memory operand");
    assert_eq!(m.base, Some(3));
    assert_eq!(m.index, Some(6));
    assert_eq!(m.scale, 4);
    assert_eq!(m.disp, 0x1234_5678);

    let gpr: [u32; 8] = [0, 0, 0, 0x0010_0000, 0, 0, 0x0000_0020, 0];
    let ebx = gpr[3];
    let esi = gpr[6];
    let manual = ebx.wrapping_add(esi.wrapping_mul(4)).wrapping_add(0x1234_5678);
    assert_eq!(m.effective_address(regs(gpr)), manual);
}

#[test]
fn ebp_base_defaults_to_stack_segment_unless_overridden() {
    // [ebp+0x08]
    let bytes = [0x45, 0x08];
    let mut cursor = DecodeCursor::new(&bytes, 0);
    let modrm = ModRm::read(&mut cursor).unwrap();
    let op = resolve(&mut cursor, modrm, &Prefixes::default(), AddressSize::Bits32).unwrap();
    assert_eq!(op.memory().unwrap().segment, SegReg::Ss);

    let prefixes = Prefixes {
        segment: Some(SegReg::Es),
        ..Prefixes::default()
    };
    let mut cursor = DecodeCursor::new(&bytes, 0);
    let modrm = ModRm::read(&mut cursor).unwrap();
    let op = resolve(&mut cursor, modrm, &prefixes, AddressSize::Bits32).unwrap();
    let m = op.memory().unwrap();
    assert_eq!(m.segment, SegReg::Es);
    assert!(m.seg_override);
}

#[test]
fn register_form_consumes_only_modrm() {
    let bytes = [0xC1, 0xFF];
    let mut cursor = DecodeCursor::new(&bytes, 0);
    let modrm = ModRm::read(&mut cursor).unwrap();
    let op = resolve(&mut cursor, modrm, &Prefixes::default(), AddressSize::Bits16).unwrap();
    assert_eq!(op, Operand::Reg(1));
    assert_eq!(modrm.reg, 0);
    assert_eq!(cursor.position(), 1);
}

#[test]
fn truncated_displacement_is_a_decode_fault() {
    // [bx+disp16] with only one displacement byte present.
    let bytes = [0x87, 0x10];
    let mut cursor = DecodeCursor::new(&bytes, 0);
    let modrm = ModRm::read(&mut cursor).unwrap();
    let err = resolve(&mut cursor, modrm, &Prefixes::default(), AddressSize::Bits16).unwrap_err();
    assert_eq!(err, DecodeError::UnexpectedEof);
}

#[test]
fn sixteen_bit_effective_address_wraps() {
    // [bx+si+0x7fff]
    let bytes = [0x80, 0xFF, 0x7F];
    let mut cursor = DecodeCursor::new(&bytes, 0);
    let modrm = ModRm::read(&mut cursor).unwrap();
    let m = resolve(&mut cursor, modrm, &Prefixes::default(), AddressSize::Bits16)
        .unwrap()
        .memory()
        .unwrap();
    // BX=0x9000, SI=0x1000 with junk in the upper halves that must be ignored.
    let gpr = [0, 0, 0, 0xDEAD_9000, 0, 0, 0xBEEF_1000, 0];
    assert_eq!(m.effective_address(regs(gpr)), (0x9000u32 + 0x1000 + 0x7FFF) & 0xFFFF);
}

#[test]
fn memref_display_uses_intel_syntax() {
    let bytes = [0x84, 0xB3, 0xF8, 0xFF, 0xFF, 0xFF];
    let mut cursor = DecodeCursor::new(&bytes, 0);
    let modrm = ModRm::read(&mut cursor).unwrap();
    let op = resolve(&mut cursor, modrm, &Prefixes::default(), AddressSize::Bits32).unwrap();
    assert_eq!(
        op.display(strata_x86::OperandSize::Dword).to_string(),
        "dword ptr [ebx+esi*4-0x8]"
    );
}

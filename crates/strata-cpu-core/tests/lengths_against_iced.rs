#![cfg(not(target_arch = "wasm32"))]

use iced_x86::{Decoder, DecoderOptions};
use strata_cpu_core::disasm::instruction_length;

const CODE32: &[&[u8]] = &[
    &[0x01, 0xD8],
    &[0x66, 0x05, 0x01, 0x02],
    &[0x8B, 0x84, 0x8B, 0x78, 0x56, 0x34, 0x12],
    &[0x8D, 0x44, 0x24, 0x08],
    &[0x64, 0x8B, 0x05, 0x00, 0x00, 0x00, 0x00],
    &[0x69, 0xC0, 0x00, 0x00, 0x01, 0x00],
    &[0x6B, 0xC0, 0x02],
    &[0xC1, 0xE0, 0x05],
    &[0xF7, 0xF1],
    &[0x0F, 0xAF, 0xC3],
    &[0x0F, 0xA4, 0xC2, 0x04],
    &[0x0F, 0xB6, 0x06],
    &[0x0F, 0xBA, 0xE0, 0x05],
    &[0xF3, 0xA4],
    &[0xEA, 0x00, 0x40, 0x00, 0x00, 0x18, 0x00],
    &[0xCD, 0x80],
    &[0x0F, 0x01, 0x15, 0x00, 0x10, 0x00, 0x00],
    &[0xE8, 0x00, 0x00, 0x00, 0x00],
    &[0x0F, 0x84, 0x00, 0x00, 0x00, 0x00],
    &[0xA1, 0x00, 0x10, 0x00, 0x00],
    &[0xC8, 0x10, 0x00, 0x01],
    &[0xD9, 0xC0],
    &[0xDC, 0x04, 0x24],
    &[0x0F, 0xA2],
];

const CODE16: &[&[u8]] = &[
    &[0x8B, 0x87, 0x34, 0x12],
    &[0xC6, 0x46, 0xFE, 0x05],
    &[0xC7, 0x06, 0x00, 0x02, 0x34, 0x12],
    &[0x81, 0xC3, 0x34, 0x12],
    &[0x66, 0xB8, 0x78, 0x56, 0x34, 0x12],
    &[0x67, 0x8B, 0x04, 0x8B],
    &[0xD1, 0x1F],
    &[0xEA, 0x00, 0x40, 0x18, 0x00],
    &[0x9A, 0x00, 0x00, 0x00, 0x10],
    &[0xE2, 0xFD],
    &[0x26, 0xF3, 0xA5],
    &[0x0F, 0x20, 0xC0],
];

fn iced_len(bytes: &[u8], bitness: u32) -> usize {
    let mut decoder = Decoder::with_ip(bitness, bytes, 0, DecoderOptions::NONE);
    let insn = decoder.decode();
    assert!(!insn.is_invalid(), "iced rejects {bytes:02x?}");
    insn.len()
}

#[test]
fn lengths_match_iced_in_32bit_code() {
    for bytes in CODE32 {
        let ours = instruction_length(bytes, true).unwrap();
        assert_eq!(ours, iced_len(bytes, 32), "{bytes:02x?}");
        assert_eq!(ours, bytes.len());
    }
}

#[test]
fn lengths_match_iced_in_16bit_code() {
    for bytes in CODE16 {
        let ours = instruction_length(bytes, false).unwrap();
        assert_eq!(ours, iced_len(bytes, 16), "{bytes:02x?}");
        assert_eq!(ours, bytes.len());
    }
}

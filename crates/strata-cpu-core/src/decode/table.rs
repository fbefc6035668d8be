//! The two 256-entry opcode dispatch tables.
//!
//! Prefix bytes and `0F` never reach the primary table; they are consumed by
//! [`decode_unit`](super::decode_unit) before dispatch and stay `invalid` here.

use strata_x86::DecodeError;

use super::{ext, primary, OpDecoder};
use crate::insn::Insn;

pub(super) type Build = fn(&mut OpDecoder<'_, '_>, u8) -> Result<Insn, DecodeError>;

pub(super) static PRIMARY: [Build; 256] = primary_table();
pub(super) static EXTENDED: [Build; 256] = extended_table();

macro_rules! fill {
    ($t:ident, $from:expr, $to:expr, $build:expr) => {{
        let mut op = $from;
        while op <= $to {
            $t[op] = $build;
            op += 1;
        }
    }};
}

const fn primary_table() -> [Build; 256] {
    let mut t: [Build; 256] = [primary::invalid as Build; 256];

    // 00-3F: ALU rows, with segment push/pop and BCD adjusts in columns 6 and 7.
    let mut row = 0;
    while row < 8 {
        fill!(t, row * 8, row * 8 + 5, primary::alu as Build);
        row += 1;
    }
    t[0x06] = primary::push_seg;
    t[0x07] = primary::pop_seg;
    t[0x0E] = primary::push_seg;
    t[0x16] = primary::push_seg;
    t[0x17] = primary::pop_seg;
    t[0x1E] = primary::push_seg;
    t[0x1F] = primary::pop_seg;
    t[0x27] = primary::bcd;
    t[0x2F] = primary::bcd;
    t[0x37] = primary::bcd;
    t[0x3F] = primary::bcd;

    fill!(t, 0x40, 0x4F, primary::inc_dec_reg as Build);
    fill!(t, 0x50, 0x57, primary::push_reg as Build);
    fill!(t, 0x58, 0x5F, primary::pop_reg as Build);
    t[0x60] = primary::pusha;
    t[0x61] = primary::pusha;
    t[0x62] = primary::bound;
    t[0x63] = primary::arpl;
    t[0x68] = primary::push_imm;
    t[0x69] = primary::imul_imm;
    t[0x6A] = primary::push_imm;
    t[0x6B] = primary::imul_imm;
    fill!(t, 0x6C, 0x6F, primary::string as Build);
    fill!(t, 0x70, 0x7F, primary::jcc_short as Build);

    fill!(t, 0x80, 0x83, primary::group1 as Build);
    fill!(t, 0x84, 0x8B, primary::modrm_pair as Build);
    t[0x8C] = primary::mov_from_seg;
    t[0x8D] = primary::lea;
    t[0x8E] = primary::mov_to_seg;
    t[0x8F] = primary::pop_rm;
    fill!(t, 0x90, 0x97, primary::xchg_acc as Build);
    t[0x98] = primary::misc_9x;
    t[0x99] = primary::misc_9x;
    t[0x9A] = primary::far_ptr;
    fill!(t, 0x9B, 0x9F, primary::misc_9x as Build);

    fill!(t, 0xA0, 0xA3, primary::mov_moffs as Build);
    fill!(t, 0xA4, 0xA7, primary::string as Build);
    t[0xA8] = primary::test_acc;
    t[0xA9] = primary::test_acc;
    fill!(t, 0xAA, 0xAF, primary::string as Build);
    fill!(t, 0xB0, 0xBF, primary::mov_reg_imm as Build);

    t[0xC0] = primary::shift_group;
    t[0xC1] = primary::shift_group;
    t[0xC2] = primary::ret;
    t[0xC3] = primary::ret;
    t[0xC4] = primary::load_far_ptr;
    t[0xC5] = primary::load_far_ptr;
    t[0xC6] = primary::mov_rm_imm;
    t[0xC7] = primary::mov_rm_imm;
    t[0xC8] = primary::enter;
    t[0xC9] = primary::leave;
    t[0xCA] = primary::ret;
    t[0xCB] = primary::ret;
    fill!(t, 0xCC, 0xCF, primary::interrupt as Build);
    fill!(t, 0xD0, 0xD3, primary::shift_group as Build);
    fill!(t, 0xD4, 0xD6, primary::ascii_adjust as Build);
    t[0xD7] = primary::xlat;
    fill!(t, 0xD8, 0xDF, primary::fpu as Build);

    fill!(t, 0xE0, 0xE3, primary::loop_ as Build);
    fill!(t, 0xE4, 0xE7, primary::in_out as Build);
    t[0xE8] = primary::rel_transfer;
    t[0xE9] = primary::rel_transfer;
    t[0xEA] = primary::far_ptr;
    t[0xEB] = primary::rel_transfer;
    fill!(t, 0xEC, 0xEF, primary::in_out as Build);
    t[0xF1] = primary::interrupt;
    t[0xF4] = primary::hlt;
    t[0xF5] = primary::flag;
    t[0xF6] = primary::group3;
    t[0xF7] = primary::group3;
    fill!(t, 0xF8, 0xFD, primary::flag as Build);
    t[0xFE] = primary::group4;
    t[0xFF] = primary::group5;
    t
}

const fn extended_table() -> [Build; 256] {
    let mut t: [Build; 256] = [primary::invalid as Build; 256];

    t[0x00] = ext::group6;
    t[0x01] = ext::group7;
    t[0x02] = ext::lar_lsl;
    t[0x03] = ext::lar_lsl;
    t[0x06] = ext::system;
    t[0x08] = ext::system;
    t[0x09] = ext::system;
    t[0x0B] = ext::system;
    fill!(t, 0x18, 0x1F, ext::nop_rm as Build);
    t[0x20] = ext::mov_cr;
    t[0x21] = ext::mov_dr;
    t[0x22] = ext::mov_cr;
    t[0x23] = ext::mov_dr;
    t[0x31] = ext::system;
    fill!(t, 0x40, 0x4F, ext::cmovcc as Build);
    fill!(t, 0x80, 0x8F, ext::jcc_near as Build);
    fill!(t, 0x90, 0x9F, ext::setcc as Build);

    t[0xA0] = ext::fs_gs;
    t[0xA1] = ext::fs_gs;
    t[0xA2] = ext::system;
    t[0xA3] = ext::bit_reg;
    t[0xA4] = ext::double_shift;
    t[0xA5] = ext::double_shift;
    t[0xA8] = ext::fs_gs;
    t[0xA9] = ext::fs_gs;
    t[0xAB] = ext::bit_reg;
    t[0xAC] = ext::double_shift;
    t[0xAD] = ext::double_shift;
    t[0xAF] = ext::imul;

    t[0xB0] = ext::rmw_exchange;
    t[0xB1] = ext::rmw_exchange;
    t[0xB2] = ext::load_far_ptr;
    t[0xB3] = ext::bit_reg;
    t[0xB4] = ext::load_far_ptr;
    t[0xB5] = ext::load_far_ptr;
    t[0xB6] = ext::mov_extend;
    t[0xB7] = ext::mov_extend;
    t[0xBA] = ext::group8;
    t[0xBB] = ext::bit_reg;
    t[0xBC] = ext::bit_scan;
    t[0xBD] = ext::bit_scan;
    t[0xBE] = ext::mov_extend;
    t[0xBF] = ext::mov_extend;
    t[0xC0] = ext::rmw_exchange;
    t[0xC1] = ext::rmw_exchange;
    fill!(t, 0xC8, 0xCF, ext::bswap as Build);
    t
}


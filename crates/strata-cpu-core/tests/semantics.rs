mod common;

use std::sync::Arc;

use common::{machine, run_one_block};
use proptest::prelude::*;
use strata_cpu_core::block::BlockKey;
use strata_cpu_core::exec::RunStop;
use strata_cpu_core::fault::Branch;
use strata_cpu_core::state::{CpuMode, Eflags, Gpr};

#[test]
fn rcr_word_memory_by_one_rotates_carry_in() {
    // stc; mov bx, 0x200; rcr word [bx], 1; hlt
    let mut vcpu = machine(
        CpuMode::Real,
        0x100,
        &[0xF9, 0xBB, 0x00, 0x02, 0xD1, 0x1F, 0xF4],
    );
    vcpu.bus.load(0x200, &[0x01, 0x00]).unwrap();

    let exit = vcpu.run(10).unwrap();
    assert_eq!(exit.stop, RunStop::Exit(Branch::Halt));
    assert_eq!(vcpu.bus.slice(0x200, 2), Some(&[0x00, 0x80][..]));
    assert!(vcpu.cpu.flag(Eflags::CF));
    assert!(vcpu.cpu.flag(Eflags::OF));
}

#[test]
fn imul_imm8_overflow_sets_cf_and_of() {
    // mov eax, 0x7fffffff; imul eax, eax, 2; hlt
    let mut vcpu = machine(
        CpuMode::Protected,
        0x1000,
        &[0xB8, 0xFF, 0xFF, 0xFF, 0x7F, 0x6B, 0xC0, 0x02, 0xF4],
    );
    let exit = run_one_block(&mut vcpu.cpu, &mut vcpu.bus, true);
    assert_eq!(exit.outcome, Branch::Halt);
    assert_eq!(exit.instructions, 3);
    assert_eq!(vcpu.cpu.gpr(Gpr::Eax), 0xFFFF_FFFE);
    assert!(vcpu.cpu.flag(Eflags::CF));
    assert!(vcpu.cpu.flag(Eflags::OF));
    assert!(vcpu.cpu.flag(Eflags::SF));
}

#[test]
fn imul_imm32_overflow_sets_cf_and_of() {
    // mov eax, 0x7fffffff; imul eax, eax, 2 (imm32 encoding); hlt
    let mut vcpu = machine(
        CpuMode::Protected,
        0x1000,
        &[
            0xB8, 0xFF, 0xFF, 0xFF, 0x7F, 0x69, 0xC0, 0x02, 0x00, 0x00, 0x00, 0xF4,
        ],
    );
    let exit = run_one_block(&mut vcpu.cpu, &mut vcpu.bus, true);
    assert_eq!(exit.outcome, Branch::Halt);
    assert_eq!(vcpu.cpu.gpr(Gpr::Eax), 0xFFFF_FFFE);
    assert!(vcpu.cpu.flag(Eflags::CF));
    assert!(vcpu.cpu.flag(Eflags::OF));
    assert!(vcpu.cpu.flag(Eflags::SF));
    assert!(!vcpu.cpu.flag(Eflags::ZF));
}

#[test]
fn imul_imm32_without_overflow_clears_cf_and_of() {
    // stc; mov ecx, -3; imul eax, ecx, 1000; hlt
    let mut vcpu = machine(
        CpuMode::Protected,
        0x1000,
        &[
            0xF9, 0xB9, 0xFD, 0xFF, 0xFF, 0xFF, 0x69, 0xC1, 0xE8, 0x03, 0x00, 0x00, 0xF4,
        ],
    );
    run_one_block(&mut vcpu.cpu, &mut vcpu.bus, true);
    assert_eq!(vcpu.cpu.gpr(Gpr::Eax) as i32, -3000);
    assert!(!vcpu.cpu.flag(Eflags::CF));
    assert!(!vcpu.cpu.flag(Eflags::OF));
}

#[test]
fn one_operand_imul_sets_result_flags_from_low_half() {
    // mov eax, 0x10000; mov ebx, 0x10000; imul ebx; hlt
    let mut vcpu = machine(
        CpuMode::Protected,
        0x1000,
        &[
            0xB8, 0x00, 0x00, 0x01, 0x00, 0xBB, 0x00, 0x00, 0x01, 0x00, 0xF7, 0xEB, 0xF4,
        ],
    );
    vcpu.cpu.set_flag(Eflags::SF, true);
    vcpu.cpu.set_flag(Eflags::AF, true);
    run_one_block(&mut vcpu.cpu, &mut vcpu.bus, true);
    assert_eq!(vcpu.cpu.gpr(Gpr::Eax), 0);
    assert_eq!(vcpu.cpu.gpr(Gpr::Edx), 1);
    assert!(vcpu.cpu.flag(Eflags::CF));
    assert!(vcpu.cpu.flag(Eflags::OF));
    assert!(vcpu.cpu.flag(Eflags::ZF));
    assert!(vcpu.cpu.flag(Eflags::PF));
    assert!(!vcpu.cpu.flag(Eflags::SF));
    // AF stays undefined and untouched.
    assert!(vcpu.cpu.flag(Eflags::AF));
}

#[test]
fn rotate_through_carry_by_zero_or_width_plus_one_is_a_no_op() {
    // mov ax, 0x1234; stc; rcl ax, 0; rcr ax, 17; hlt
    let mut vcpu = machine(
        CpuMode::Real,
        0x100,
        &[
            0xB8, 0x34, 0x12, 0xF9, 0xC1, 0xD0, 0x00, 0xC1, 0xD8, 0x11, 0xF4,
        ],
    );
    vcpu.cpu.set_flag(Eflags::OF, true);
    let before = vcpu.cpu.eflags();
    run_one_block(&mut vcpu.cpu, &mut vcpu.bus, false);
    assert_eq!(vcpu.cpu.reg16(0), 0x1234);
    assert_eq!(vcpu.cpu.eflags(), before | Eflags::CF.bits());
}

#[test]
fn rcl_byte_moves_msb_into_carry() {
    // mov al, 0x81; clc; rcl al, 1; hlt
    let mut vcpu = machine(CpuMode::Real, 0x100, &[0xB0, 0x81, 0xF8, 0xD0, 0xD0, 0xF4]);
    run_one_block(&mut vcpu.cpu, &mut vcpu.bus, true);
    assert_eq!(vcpu.cpu.reg8(0), 0x02);
    assert!(vcpu.cpu.flag(Eflags::CF));
    // OF = new MSB xor CF
    assert!(vcpu.cpu.flag(Eflags::OF));
}

#[test]
fn div_by_zero_traps_without_touching_operands() {
    // mov ax, 0x1234; xor cl, cl; div cl; hlt
    let mut vcpu = machine(
        CpuMode::Real,
        0x100,
        &[0xB8, 0x34, 0x12, 0x30, 0xC9, 0xF6, 0xF1, 0xF4],
    );
    let exit = run_one_block(&mut vcpu.cpu, &mut vcpu.bus, true);
    assert_eq!(
        exit.outcome,
        Branch::Trap(strata_cpu_core::fault::Fault::DivideError)
    );
    assert_eq!(exit.instructions, 2);
    assert_eq!(vcpu.cpu.eip, 0x105);
    assert_eq!(vcpu.cpu.reg16(0), 0x1234);
}

#[test]
fn cached_block_matches_fresh_execution() {
    // add eax, ebx; adc ecx, eax; shl edx, 3; sub eax, ecx; hlt
    let code = [0x01, 0xD8, 0x11, 0xC1, 0xC1, 0xE2, 0x03, 0x29, 0xC8, 0xF4];
    let mut vcpu = machine(CpuMode::Protected, 0x1000, &code);
    vcpu.cpu.set_gpr(Gpr::Eax, 0x8000_0001);
    vcpu.cpu.set_gpr(Gpr::Ebx, 0x7FFF_FFFF);
    vcpu.cpu.set_gpr(Gpr::Edx, 0x1357_9BDF);
    let initial = vcpu.cpu.clone();

    let key = BlockKey::current(&vcpu.cpu);
    let first = vcpu.block(key).unwrap();
    let second = vcpu.block(key).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let mut cached = initial.clone();
    second.execute(&mut cached, &mut vcpu.bus);

    let mut fresh = initial;
    run_one_block(&mut fresh, &mut vcpu.bus, false);
    assert_eq!(cached, fresh);
}

/// Operand width in bits, the optional 0x66 prefix and the `C0`/`C1` opcode
/// for a rotate of AL, AX or EAX in 32-bit code.
const ROTATE_FORMS: [(u32, Option<u8>, u8); 3] = [
    (8, None, 0xC0),
    (16, Some(0x66), 0xC1),
    (32, None, 0xC1),
];

/// Rotate `val` (`bits` wide) through `cf` by `count` the way RCL/RCR are
/// architecturally defined: returns the result, CF and OF (None when OF
/// keeps its old value).
fn rotate_through_carry(
    rcl: bool,
    bits: u32,
    val: u32,
    cf: bool,
    count: u8,
) -> Option<(u32, bool, Option<bool>)> {
    let n = (count as u32 & 0x1F) % (bits + 1);
    if n == 0 {
        return None;
    }
    let width = bits + 1;
    let mask = (1u64 << bits) - 1;
    let mut wide = (val as u64 & mask) | (cf as u64) << bits;
    for _ in 0..n {
        wide = if rcl {
            (wide << 1 | wide >> (width - 1)) & ((1 << width) - 1)
        } else {
            (wide >> 1 | (wide & 1) << (width - 1)) & ((1 << width) - 1)
        };
    }
    let result = (wide & mask) as u32;
    let new_cf = wide >> bits & 1 != 0;
    let top = result >> (bits - 1) & 1 != 0;
    let next = result >> (bits - 2) & 1 != 0;
    let of = (n == 1).then(|| if rcl { top != new_cf } else { top != next });
    Some((result, new_cf, of))
}

proptest! {
    #[test]
    fn rcl_rcr_match_reference_rotation(
        form in 0usize..3,
        rcl in any::<bool>(),
        val in any::<u32>(),
        cf in any::<bool>(),
        of in any::<bool>(),
        count in 0u8..=31,
    ) {
        let (bits, prefix, opcode) = ROTATE_FORMS[form];
        let modrm = if rcl { 0xD0 } else { 0xD8 };
        let mut code: Vec<u8> = prefix.into_iter().collect();
        code.extend_from_slice(&[opcode, modrm, count, 0xF4]);

        let mut vcpu = machine(CpuMode::Protected, 0x1000, &code);
        vcpu.cpu.set_gpr(Gpr::Eax, val);
        vcpu.cpu.set_flag(Eflags::CF, cf);
        vcpu.cpu.set_flag(Eflags::OF, of);
        let before = vcpu.cpu.eflags();
        run_one_block(&mut vcpu.cpu, &mut vcpu.bus, true);

        let keep = if bits == 32 { 0 } else { !0u32 << bits };
        match rotate_through_carry(rcl, bits, val, cf, count) {
            None => {
                prop_assert_eq!(vcpu.cpu.gpr(Gpr::Eax), val);
                prop_assert_eq!(vcpu.cpu.eflags(), before);
            }
            Some((result, new_cf, new_of)) => {
                prop_assert_eq!(vcpu.cpu.gpr(Gpr::Eax), (val & keep) | result);
                prop_assert_eq!(vcpu.cpu.flag(Eflags::CF), new_cf);
                prop_assert_eq!(vcpu.cpu.flag(Eflags::OF), new_of.unwrap_or(of));
            }
        }
    }

    #[test]
    fn imul_immediate_forms_match_wide_product(
        src in any::<u32>(),
        imm in any::<i32>(),
        word in any::<bool>(),
        imm8 in any::<bool>(),
    ) {
        // imul eax, ebx, imm (69 /r or 6B /r), optionally with a 16-bit operand size
        let mut code = Vec::new();
        if word {
            code.push(0x66);
        }
        let imm = if imm8 {
            code.extend_from_slice(&[0x6B, 0xC3, imm as u8]);
            imm as i8 as i64
        } else if word {
            code.extend_from_slice(&[0x69, 0xC3]);
            code.extend_from_slice(&(imm as i16).to_le_bytes());
            imm as i16 as i64
        } else {
            code.extend_from_slice(&[0x69, 0xC3]);
            code.extend_from_slice(&imm.to_le_bytes());
            imm as i64
        };
        code.push(0xF4);

        let mut vcpu = machine(CpuMode::Protected, 0x1000, &code);
        vcpu.cpu.set_gpr(Gpr::Eax, 0xDEAD_BEEF);
        vcpu.cpu.set_gpr(Gpr::Ebx, src);
        run_one_block(&mut vcpu.cpu, &mut vcpu.bus, true);

        let eax = vcpu.cpu.gpr(Gpr::Eax);
        let (product, truncated, result) = if word {
            let product = src as u16 as i16 as i64 * imm;
            let truncated = product as i16 as i64;
            prop_assert_eq!(eax >> 16, 0xDEAD);
            (product, truncated, eax & 0xFFFF)
        } else {
            let product = src as i32 as i64 * imm;
            (product, product as i32 as i64, eax)
        };
        let mask = if word { 0xFFFF } else { 0xFFFF_FFFF };
        prop_assert_eq!(result as i64, truncated & mask);
        let overflow = product != truncated;
        prop_assert_eq!(vcpu.cpu.flag(Eflags::CF), overflow);
        prop_assert_eq!(vcpu.cpu.flag(Eflags::OF), overflow);
        prop_assert_eq!(vcpu.cpu.flag(Eflags::ZF), result == 0);
        prop_assert_eq!(vcpu.cpu.flag(Eflags::SF), truncated < 0);
    }

    #[test]
    fn imul_two_operand_matches_wide_product(a in any::<i32>(), b in any::<i32>()) {
        // imul eax, ebx; hlt
        let mut vcpu = machine(CpuMode::Protected, 0x1000, &[0x0F, 0xAF, 0xC3, 0xF4]);
        vcpu.cpu.set_gpr(Gpr::Eax, a as u32);
        vcpu.cpu.set_gpr(Gpr::Ebx, b as u32);
        run_one_block(&mut vcpu.cpu, &mut vcpu.bus, true);

        let wide = a as i64 * b as i64;
        let result = vcpu.cpu.gpr(Gpr::Eax);
        prop_assert_eq!(result, a.wrapping_mul(b) as u32);
        let overflow = wide != result as i32 as i64;
        prop_assert_eq!(vcpu.cpu.flag(Eflags::CF), overflow);
        prop_assert_eq!(vcpu.cpu.flag(Eflags::OF), overflow);
        prop_assert_eq!(vcpu.cpu.flag(Eflags::ZF), result == 0);
    }

    #[test]
    fn add_then_sub_round_trips_registers(a in any::<u32>(), b in any::<u32>()) {
        // add eax, ebx; sub eax, ebx; hlt
        let mut vcpu = machine(CpuMode::Protected, 0x1000, &[0x01, 0xD8, 0x29, 0xD8, 0xF4]);
        vcpu.cpu.set_gpr(Gpr::Eax, a);
        vcpu.cpu.set_gpr(Gpr::Ebx, b);
        run_one_block(&mut vcpu.cpu, &mut vcpu.bus, true);
        prop_assert_eq!(vcpu.cpu.gpr(Gpr::Eax), a);
        // SUB borrows exactly when the ADD carried.
        prop_assert_eq!(vcpu.cpu.flag(Eflags::CF), a.checked_add(b).is_none());
    }
}

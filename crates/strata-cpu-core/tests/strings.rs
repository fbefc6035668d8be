mod common;

use common::machine;
use strata_cpu_core::exec::RunStop;
use strata_cpu_core::fault::Branch;
use strata_cpu_core::state::{CpuMode, Eflags, Gpr};

#[test]
fn rep_movsb_copies_and_advances_indices() {
    // mov si, 0x300; mov di, 0x400; mov cx, 5; rep movsb; hlt
    let mut vcpu = machine(
        CpuMode::Real,
        0x100,
        &[
            0xBE, 0x00, 0x03, 0xBF, 0x00, 0x04, 0xB9, 0x05, 0x00, 0xF3, 0xA4, 0xF4,
        ],
    );
    vcpu.bus.load(0x300, b"hello").unwrap();

    let exit = vcpu.run(10).unwrap();
    assert_eq!(exit.stop, RunStop::Exit(Branch::Halt));
    assert_eq!(vcpu.bus.slice(0x400, 5), Some(&b"hello"[..]));
    assert_eq!(vcpu.cpu.gpr(Gpr::Ecx), 0);
    assert_eq!(vcpu.cpu.gpr(Gpr::Esi), 0x305);
    assert_eq!(vcpu.cpu.gpr(Gpr::Edi), 0x405);
}

#[test]
fn rep_stosw_backwards_with_df() {
    // std; mov ax, 0xbeef; mov di, 0x404; mov cx, 3; rep stosw; hlt
    let mut vcpu = machine(
        CpuMode::Real,
        0x100,
        &[
            0xFD, 0xB8, 0xEF, 0xBE, 0xBF, 0x04, 0x04, 0xB9, 0x03, 0x00, 0xF3, 0xAB, 0xF4,
        ],
    );
    vcpu.run(10).unwrap();
    assert_eq!(
        vcpu.bus.slice(0x400, 6),
        Some(&[0xEF, 0xBE, 0xEF, 0xBE, 0xEF, 0xBE][..])
    );
    assert_eq!(vcpu.cpu.gpr(Gpr::Edi), 0x3FE);
}

#[test]
fn repe_cmpsb_stops_at_first_mismatch() {
    // mov si, 0x300; mov di, 0x400; mov cx, 10; repe cmpsb; hlt
    let mut vcpu = machine(
        CpuMode::Real,
        0x100,
        &[
            0xBE, 0x00, 0x03, 0xBF, 0x00, 0x04, 0xB9, 0x0A, 0x00, 0xF3, 0xA6, 0xF4,
        ],
    );
    vcpu.bus.load(0x300, b"abcX").unwrap();
    vcpu.bus.load(0x400, b"abcY").unwrap();

    vcpu.run(10).unwrap();
    assert_eq!(vcpu.cpu.gpr(Gpr::Ecx), 6);
    assert_eq!(vcpu.cpu.gpr(Gpr::Esi), 0x304);
    assert_eq!(vcpu.cpu.gpr(Gpr::Edi), 0x404);
    assert!(!vcpu.cpu.flag(Eflags::ZF));
    // 'X' < 'Y'
    assert!(vcpu.cpu.flag(Eflags::CF));
}

#[test]
fn repne_scasb_finds_terminator() {
    // xor al, al; mov di, 0x400; mov cx, 0xffff; repne scasb; hlt
    let mut vcpu = machine(
        CpuMode::Real,
        0x100,
        &[
            0x30, 0xC0, 0xBF, 0x00, 0x04, 0xB9, 0xFF, 0xFF, 0xF2, 0xAE, 0xF4,
        ],
    );
    vcpu.bus.load(0x400, b"strata\0").unwrap();

    vcpu.run(10).unwrap();
    assert!(vcpu.cpu.flag(Eflags::ZF));
    assert_eq!(vcpu.cpu.gpr(Gpr::Edi), 0x407);
    assert_eq!(vcpu.cpu.gpr(Gpr::Ecx), 0xFFFF - 7);
}

#[test]
fn rep_with_zero_count_does_nothing() {
    // xor cx, cx; rep movsb; hlt
    let mut vcpu = machine(CpuMode::Real, 0x100, &[0x31, 0xC9, 0xF3, 0xA4, 0xF4]);
    vcpu.cpu.set_gpr(Gpr::Esi, 0x300);
    vcpu.bus.load(0x300, &[0xAA]).unwrap();

    vcpu.run(10).unwrap();
    assert_eq!(vcpu.cpu.gpr(Gpr::Esi), 0x300);
    assert_eq!(vcpu.bus.slice(0, 1), Some(&[0x00][..]));
}

#[test]
fn boot_sector_prints_through_bios_handler() {
    let mut main = vec![
        0xBE, 0x20, 0x7C, // mov si, msg
        0xAC, // l: lodsb
        0x08, 0xC0, // or al, al
        0x74, 0x06, // jz done
        0xB4, 0x0E, // mov ah, 0x0e
        0xCD, 0x10, // int 0x10
        0xEB, 0xF5, // jmp l
        0xF4, // done: hlt
    ];
    main.resize(0x20, 0x90);
    main.extend_from_slice(b"Hi!\0");
    let mut vcpu = machine(CpuMode::Real, 0x7C00, &main);

    // INT 10h handler at 0000:0500: out 0xe9, al; iret
    vcpu.bus.load(0x500, &[0xE6, 0xE9, 0xCF]).unwrap();
    vcpu.bus.load(0x10 * 4, &[0x00, 0x05, 0x00, 0x00]).unwrap();
    vcpu.cpu.set_flag(Eflags::IF, true);

    let exit = vcpu.run(100).unwrap();
    assert_eq!(exit.stop, RunStop::Exit(Branch::Halt));
    assert_eq!(vcpu.bus.debug_output(), b"Hi!");
    assert_eq!(vcpu.cpu.eip, 0x7C0F);
    assert_eq!(vcpu.cpu.gpr(Gpr::Esp) & 0xFFFF, 0xFFFE);
    // IRET restored the caller's IF.
    assert!(vcpu.cpu.flag(Eflags::IF));
}

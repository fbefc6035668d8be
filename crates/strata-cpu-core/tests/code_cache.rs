mod common;

use common::machine;
use strata_cpu_core::block::BlockKey;
use strata_cpu_core::config::CpuConfig;
use strata_cpu_core::exec::{RunStop, Vcpu};
use strata_cpu_core::fault::Branch;
use strata_cpu_core::mem::PhysicalMemory;
use strata_cpu_core::state::{CpuMode, CpuState, Gpr};

fn rerun(vcpu: &mut Vcpu<PhysicalMemory>, entry: u32) {
    vcpu.cpu.eip = entry;
    vcpu.cpu.halted = false;
    let exit = vcpu.run(100).unwrap();
    assert_eq!(exit.stop, RunStop::Exit(Branch::Halt));
}

#[test]
fn unchanged_code_is_served_from_cache() {
    // mov ax, 1; inc ax; hlt
    let mut vcpu = machine(CpuMode::Real, 0x100, &[0xB8, 0x01, 0x00, 0x40, 0xF4]);
    rerun(&mut vcpu, 0x100);
    let key = BlockKey {
        eip: 0x100,
        ..BlockKey::current(&vcpu.cpu)
    };
    assert!(vcpu.cache().contains(&key));
    assert_eq!(vcpu.cache().len(), 1);

    rerun(&mut vcpu, 0x100);
    assert_eq!(vcpu.cache().len(), 1);
    assert_eq!(vcpu.cpu.gpr(Gpr::Eax), 2);
}

#[test]
fn external_write_to_code_page_forces_redecode() {
    let mut vcpu = machine(CpuMode::Real, 0x100, &[0xB8, 0x01, 0x00, 0xF4]);
    rerun(&mut vcpu, 0x100);
    assert_eq!(vcpu.cpu.gpr(Gpr::Eax), 1);

    vcpu.bus.load(0x101, &[0x02]).unwrap();
    rerun(&mut vcpu, 0x100);
    assert_eq!(vcpu.cpu.gpr(Gpr::Eax), 2);
    assert_eq!(vcpu.cache().len(), 1);
}

#[test]
fn self_modifying_loop_sees_its_own_store() {
    let code = [
        0xB9, 0x02, 0x00, // mov cx, 2
        0xB0, 0x01, // l: mov al, 1 (immediate patched below)
        0x00, 0xC4, // add ah, al
        0xC6, 0x06, 0x04, 0x01, 0x05, // mov byte [0x104], 5
        0xE2, 0xF5, // loop l
        0xF4, // hlt
    ];
    let mut vcpu = machine(CpuMode::Real, 0x100, &code);
    rerun(&mut vcpu, 0x100);
    // First pass adds 1, the second pass runs the patched immediate.
    assert_eq!(vcpu.cpu.reg8(4), 6);
    assert_eq!(vcpu.bus.slice(0x104, 1), Some(&[0x05][..]));
}

#[test]
fn invalidate_range_drops_overlapping_blocks() {
    let mut mem = PhysicalMemory::new(0x10000);
    // 0x100: jmp 0x2000 ; 0x2000: hlt
    mem.load(0x100, &[0xE9, 0xFD, 0x1E]).unwrap();
    mem.load(0x2000, &[0xF4]).unwrap();
    let mut cpu = CpuState::new(CpuMode::Real);
    cpu.eip = 0x100;
    let mut vcpu = Vcpu::new(cpu, mem, CpuConfig::default());

    rerun(&mut vcpu, 0x100);
    assert_eq!(vcpu.cpu.eip, 0x2001);
    assert_eq!(vcpu.cache().len(), 2);

    assert_eq!(vcpu.invalidate_range(0x2000, 0x1000), 1);
    assert_eq!(vcpu.cache().len(), 1);
    assert_eq!(vcpu.invalidate_range(0x8000, 0x10), 0);

    vcpu.clear_cache();
    assert!(vcpu.cache().is_empty());
}

#[test]
fn small_cache_evicts_but_still_runs() {
    let config = CpuConfig {
        cache_capacity: 1,
        ..CpuConfig::default()
    };
    let mut mem = PhysicalMemory::new(0x10000);
    // mov cx, 3; l: inc ax; loop l; hlt
    mem.load(0x100, &[0xB9, 0x03, 0x00, 0x40, 0xE2, 0xFD, 0xF4])
        .unwrap();
    let mut cpu = CpuState::new(CpuMode::Real);
    cpu.eip = 0x100;
    let mut vcpu = Vcpu::new(cpu, mem, config);

    rerun(&mut vcpu, 0x100);
    assert_eq!(vcpu.cpu.gpr(Gpr::Eax), 3);
    assert_eq!(vcpu.cache().len(), 1);
}

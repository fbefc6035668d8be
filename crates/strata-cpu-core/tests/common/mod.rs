// Shared test helpers (integration tests compile as separate crates, so put
// common code in a submodule to avoid it becoming its own test target).
#![allow(dead_code)]

use strata_cpu_core::block::{BlockAssembler, BlockExit, BlockKey};
use strata_cpu_core::compiler::{CodeBlockCompiler, OptimisingCompiler};
use strata_cpu_core::config::CpuConfig;
use strata_cpu_core::exec::Vcpu;
use strata_cpu_core::mem::PhysicalMemory;
use strata_cpu_core::state::{CpuMode, CpuState};

pub const MEM_SIZE: usize = 1 << 20;

/// A fresh CPU in `mode` with EIP at `entry` and the code loaded there
/// (linear address = CS base + `entry`, CS base is 0 for every start mode).
pub fn machine(mode: CpuMode, entry: u32, code: &[u8]) -> Vcpu<PhysicalMemory> {
    let mut mem = PhysicalMemory::new(MEM_SIZE);
    mem.load(entry, code).unwrap();
    let mut cpu = CpuState::new(mode);
    cpu.eip = entry;
    if mode == CpuMode::Protected {
        cpu.set_reg32(4, 0x8_0000);
    } else {
        cpu.set_reg32(4, 0xFFFE);
    }
    Vcpu::new(cpu, mem, CpuConfig::default())
}

/// Assemble and run exactly one block at the CPU's current CS:EIP, bypassing the cache.
pub fn run_one_block(cpu: &mut CpuState, mem: &mut PhysicalMemory, flag_elimination: bool) -> BlockExit {
    let block = BlockAssembler::default()
        .assemble(mem, BlockKey::current(cpu))
        .unwrap();
    let compiled = OptimisingCompiler { flag_elimination }.compile(block);
    compiled.execute(cpu, mem)
}

/// Tiny deterministic PRNG for test input generation.
pub struct XorShift64(pub u64);

impl XorShift64 {
    pub fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    pub fn fill(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(8) {
            let v = self.next_u64().to_le_bytes();
            let n = chunk.len();
            chunk.copy_from_slice(&v[..n]);
        }
    }
}

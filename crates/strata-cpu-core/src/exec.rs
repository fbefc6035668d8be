//! Reference execution driver.
//!
//! [`Vcpu`] owns the processor state, the bus and the block cache, and runs
//! one block per step. Interrupt delivery outside real mode, assists and
//! faults are reported back to the embedder rather than handled here.

use std::sync::Arc;

use strata_x86::{DecodeError, SegReg};
use thiserror::Error;

use crate::block::{BlockAssembler, BlockExit, BlockKey, CodeBlock};
use crate::cache::BlockCache;
use crate::compiler::{CodeBlockCompiler, InvalidModeCast, OptimisingCompiler};
use crate::config::CpuConfig;
use crate::fault::Branch;
use crate::mem::CpuBus;
use crate::state::{CpuMode, CpuState};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to decode block at {cs_base:#x}+{eip:#x}")]
    Decode {
        cs_base: u32,
        eip: u32,
        #[source]
        source: DecodeError,
    },
    #[error(transparent)]
    ModeCast(#[from] InvalidModeCast),
}

/// Why [`Vcpu::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStop {
    /// The block budget was used up.
    BlockLimit,
    /// A block ended with an outcome the driver does not handle itself.
    Exit(Branch),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunExit {
    pub blocks: u64,
    pub instructions: u64,
    pub stop: RunStop,
}

pub struct Vcpu<B> {
    pub cpu: CpuState,
    pub bus: B,
    assembler: BlockAssembler,
    compiler: OptimisingCompiler,
    cache: BlockCache,
}

impl<B: CpuBus> Vcpu<B> {
    pub fn new(cpu: CpuState, bus: B, config: CpuConfig) -> Self {
        Self {
            cpu,
            bus,
            assembler: BlockAssembler::new(config.max_block_insts),
            compiler: OptimisingCompiler {
                flag_elimination: config.flag_elimination,
            },
            cache: BlockCache::new(config.cache_capacity),
        }
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    /// Drop cached blocks decoded from pages in `[addr, addr + len)`.
    pub fn invalidate_range(&mut self, addr: u32, len: u32) -> usize {
        self.cache.invalidate_range(addr, len)
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// The compiled block for `key`, decoding and caching it on a miss.
    pub fn block(&mut self, key: BlockKey) -> Result<Arc<CodeBlock>, ExecError> {
        if let Some(block) = self.cache.get(&key, &self.bus) {
            return Ok(block);
        }
        let basic = self
            .assembler
            .assemble(&mut self.bus, key)
            .map_err(|source| ExecError::Decode {
                cs_base: key.cs_base,
                eip: key.eip,
                source,
            })?;
        let compiled = match key.mode {
            CpuMode::Real => CodeBlock::Real(self.compiler.real_mode_block(basic)?),
            CpuMode::Protected => CodeBlock::Protected(self.compiler.protected_mode_block(basic)?),
            CpuMode::Virtual8086 => {
                CodeBlock::Virtual8086(self.compiler.virtual8086_mode_block(basic)?)
            }
        };
        Ok(self.cache.insert(compiled))
    }

    /// Execute the block at the current CS:EIP. A halted CPU does nothing.
    pub fn execute_block(&mut self) -> Result<BlockExit, ExecError> {
        if self.cpu.halted {
            return Ok(BlockExit {
                instructions: 0,
                outcome: Branch::Halt,
            });
        }
        let key = BlockKey::current(&self.cpu);
        let block = self.block(key)?;
        let exit = block.execute(&mut self.cpu, &mut self.bus);
        if let Branch::Assist(reason) = exit.outcome {
            tracing::warn!(
                ?reason,
                cs = self.cpu.seg(SegReg::Cs).selector,
                eip = self.cpu.eip,
                "instruction needs a driver assist"
            );
        }
        Ok(exit)
    }

    /// Run up to `max_blocks` blocks, stopping at the first block that ends
    /// with anything other than a fall-through or branch.
    pub fn run(&mut self, max_blocks: u64) -> Result<RunExit, ExecError> {
        let mut instructions = 0u64;
        for blocks in 0..max_blocks {
            let exit = self.execute_block()?;
            instructions += exit.instructions as u64;
            match exit.outcome {
                Branch::None | Branch::Jump(_) | Branch::Conditional { .. } => {}
                other => {
                    return Ok(RunExit {
                        blocks: blocks + 1,
                        instructions,
                        stop: RunStop::Exit(other),
                    })
                }
            }
        }
        Ok(RunExit {
            blocks: max_blocks,
            instructions,
            stop: RunStop::BlockLimit,
        })
    }
}

//! Block compilation: optimisation passes plus the cast to a mode-specific block.

use thiserror::Error;

use crate::block::{
    BasicBlock, CodeBlock, ProtectedModeBlock, RealModeBlock, Virtual8086ModeBlock,
};
use crate::opt::eliminate_dead_flags;
use crate::state::CpuMode;

/// A block was requested as a mode variant it was not decoded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("block decoded for {actual:?} mode requested as {requested:?}")]
pub struct InvalidModeCast {
    pub requested: CpuMode,
    pub actual: CpuMode,
}

macro_rules! cast {
    ($fn:ident, $variant:ident, $ty:ty, $mode:expr) => {
        fn $fn(&self, block: BasicBlock) -> Result<$ty, InvalidModeCast> {
            match self.compile(block) {
                CodeBlock::$variant(b) => Ok(b),
                other => {
                    let err = InvalidModeCast {
                        requested: $mode,
                        actual: other.mode(),
                    };
                    tracing::debug!(%err, eip = other.block().key().eip, "mode cast failed");
                    Err(err)
                }
            }
        }
    };
}

/// Turns assembled blocks into executable ones.
pub trait CodeBlockCompiler {
    fn compile(&self, block: BasicBlock) -> CodeBlock;

    cast!(real_mode_block, Real, RealModeBlock, CpuMode::Real);
    cast!(protected_mode_block, Protected, ProtectedModeBlock, CpuMode::Protected);
    cast!(
        virtual8086_mode_block,
        Virtual8086,
        Virtual8086ModeBlock,
        CpuMode::Virtual8086
    );
}

/// Applies dead-flag elimination (when enabled) and wraps by mode.
#[derive(Debug, Clone, Copy)]
pub struct OptimisingCompiler {
    pub flag_elimination: bool,
}

impl Default for OptimisingCompiler {
    fn default() -> Self {
        Self {
            flag_elimination: true,
        }
    }
}

impl CodeBlockCompiler for OptimisingCompiler {
    fn compile(&self, mut block: BasicBlock) -> CodeBlock {
        if self.flag_elimination {
            eliminate_dead_flags(&mut block);
        }
        CodeBlock::new(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockAssembler, BlockKey};
    use crate::mem::PhysicalMemory;

    #[test]
    fn mismatched_cast_reports_both_modes() {
        let mut mem = PhysicalMemory::new(0x1000);
        mem.load(0, &[0xF4]).unwrap();
        let key = BlockKey {
            cs_base: 0,
            eip: 0,
            mode: CpuMode::Real,
            default_32: false,
        };
        let asm = BlockAssembler::default();
        let compiler = OptimisingCompiler::default();

        let block = asm.assemble(&mut mem, key).unwrap();
        assert_eq!(
            compiler.protected_mode_block(block).unwrap_err(),
            InvalidModeCast {
                requested: CpuMode::Protected,
                actual: CpuMode::Real,
            }
        );
        let block = asm.assemble(&mut mem, key).unwrap();
        assert!(compiler.real_mode_block(block).is_ok());
    }
}

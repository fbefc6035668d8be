//! Basic blocks: assembling runs of units from guest code and executing them.

use serde::Serialize;
use strata_x86::{DecodeCursor, DecodeError, MAX_INST_LEN};

use crate::decode::{decode_unit, DecodeCtx};
use crate::fault::Branch;
use crate::insn::Unit;
use crate::mem::{CpuBus, PAGE_SHIFT};
use crate::state::{CpuMode, CpuState};

pub const DEFAULT_MAX_BLOCK_INSTS: usize = 64;

/// Identity of a block: where it starts and how its bytes were interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BlockKey {
    pub cs_base: u32,
    pub eip: u32,
    pub mode: CpuMode,
    pub default_32: bool,
}

impl BlockKey {
    /// Key for the block at the current CS:EIP.
    pub fn current(cpu: &CpuState) -> Self {
        Self {
            cs_base: cpu.seg_base(strata_x86::SegReg::Cs),
            eip: cpu.eip,
            mode: cpu.mode(),
            default_32: cpu.default_32(),
        }
    }

    pub fn ctx(&self) -> DecodeCtx {
        DecodeCtx::new(self.mode, self.default_32)
    }

    pub fn linear_entry(&self) -> u32 {
        self.cs_base.wrapping_add(self.eip)
    }
}

/// A code page a block was decoded from, with its version at decode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageVersion {
    pub page: u32,
    pub version: u32,
}

/// How a block execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockExit {
    /// Units that completed (faulting and assisted units are not counted).
    pub instructions: u32,
    /// Outcome of the last unit executed; [`Branch::None`] when the block
    /// ran off its end.
    pub outcome: Branch,
}

/// A non-empty run of units ending at a control transfer or the length bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    key: BlockKey,
    units: Vec<Unit>,
    pages: Vec<PageVersion>,
    byte_len: u32,
}

impl BasicBlock {
    pub fn key(&self) -> BlockKey {
        self.key
    }

    pub fn mode(&self) -> CpuMode {
        self.key.mode
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub(crate) fn units_mut(&mut self) -> &mut [Unit] {
        &mut self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Total encoded length of the block's instructions.
    pub fn byte_len(&self) -> u32 {
        self.byte_len
    }

    pub fn code_pages(&self) -> &[PageVersion] {
        &self.pages
    }

    /// Whether every page the block was decoded from is unchanged.
    pub fn is_current<B: CpuBus>(&self, bus: &B) -> bool {
        self.pages
            .iter()
            .all(|p| bus.code_page_version(p.page) == p.version)
    }

    /// Whether any of the block's code pages intersects `[addr, addr + len)`.
    pub fn overlaps(&self, addr: u32, len: u32) -> bool {
        if len == 0 {
            return false;
        }
        let first = addr >> PAGE_SHIFT;
        let last = addr.saturating_add(len - 1) >> PAGE_SHIFT;
        self.pages.iter().any(|p| (first..=last).contains(&p.page))
    }

    /// Run the units in order, keeping EIP architectural after each one.
    pub fn execute<B: CpuBus>(&self, cpu: &mut CpuState, bus: &mut B) -> BlockExit {
        let mut instructions = 0;
        for unit in &self.units {
            let outcome = unit.execute(cpu, bus);
            match outcome {
                Branch::None => {
                    cpu.eip = unit.next_eip();
                    instructions += 1;
                    continue;
                }
                Branch::Jump(target) => cpu.eip = target,
                Branch::Conditional { taken, target } => {
                    cpu.eip = if taken { target } else { unit.next_eip() };
                }
                Branch::Halt => {
                    cpu.eip = unit.next_eip();
                    cpu.halted = true;
                }
                Branch::Interrupt(_) => cpu.eip = unit.next_eip(),
                Branch::Assist(_) | Branch::Trap(_) => {
                    cpu.eip = unit.eip();
                    return BlockExit {
                        instructions,
                        outcome,
                    };
                }
            }
            return BlockExit {
                instructions: instructions + 1,
                outcome,
            };
        }
        BlockExit {
            instructions,
            outcome: Branch::None,
        }
    }
}

/// Block compiled for real-address mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealModeBlock(BasicBlock);

/// Block compiled for protected mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedModeBlock(BasicBlock);

/// Block compiled for virtual-8086 mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Virtual8086ModeBlock(BasicBlock);

macro_rules! mode_block {
    ($name:ident) => {
        impl $name {
            pub fn block(&self) -> &BasicBlock {
                &self.0
            }

            pub fn into_inner(self) -> BasicBlock {
                self.0
            }

            pub fn execute<B: CpuBus>(&self, cpu: &mut CpuState, bus: &mut B) -> BlockExit {
                self.0.execute(cpu, bus)
            }
        }
    };
}

mode_block!(RealModeBlock);
mode_block!(ProtectedModeBlock);
mode_block!(Virtual8086ModeBlock);

/// A compiled block tagged with the mode it was decoded for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeBlock {
    Real(RealModeBlock),
    Protected(ProtectedModeBlock),
    Virtual8086(Virtual8086ModeBlock),
}

impl CodeBlock {
    pub fn new(block: BasicBlock) -> Self {
        match block.mode() {
            CpuMode::Real => CodeBlock::Real(RealModeBlock(block)),
            CpuMode::Protected => CodeBlock::Protected(ProtectedModeBlock(block)),
            CpuMode::Virtual8086 => CodeBlock::Virtual8086(Virtual8086ModeBlock(block)),
        }
    }

    pub fn block(&self) -> &BasicBlock {
        match self {
            CodeBlock::Real(b) => b.block(),
            CodeBlock::Protected(b) => b.block(),
            CodeBlock::Virtual8086(b) => b.block(),
        }
    }

    pub fn mode(&self) -> CpuMode {
        self.block().mode()
    }

    pub fn execute<B: CpuBus>(&self, cpu: &mut CpuState, bus: &mut B) -> BlockExit {
        match self {
            CodeBlock::Real(b) => b.execute(cpu, bus),
            CodeBlock::Protected(b) => b.execute(cpu, bus),
            CodeBlock::Virtual8086(b) => b.execute(cpu, bus),
        }
    }
}

/// Groups consecutive units into a [`BasicBlock`].
#[derive(Debug, Clone, Copy)]
pub struct BlockAssembler {
    max_insts: usize,
}

impl Default for BlockAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BLOCK_INSTS)
    }
}

impl BlockAssembler {
    pub fn new(max_insts: usize) -> Self {
        Self {
            max_insts: max_insts.max(1),
        }
    }

    pub fn max_insts(&self) -> usize {
        self.max_insts
    }

    /// Decode the block starting at `key`.
    ///
    /// A decode error on the first instruction fails the assembly. A later
    /// one ends the block before the bad instruction; it resurfaces when that
    /// address is itself a block entry.
    pub fn assemble<B: CpuBus>(&self, bus: &mut B, key: BlockKey) -> Result<BasicBlock, DecodeError> {
        let ctx = key.ctx();
        let ip_mask = ctx.ip_mask();
        let mut units = Vec::new();
        let mut pages: Vec<PageVersion> = Vec::new();
        let mut byte_len = 0u32;
        let mut eip = key.eip & ip_mask;
        let mut window = [0u8; MAX_INST_LEN];

        while units.len() < self.max_insts {
            let linear = key.cs_base.wrapping_add(eip);
            let available = bus.fetch(linear, &mut window);
            let mut cursor = DecodeCursor::new(&window[..available], eip);
            let unit = match decode_unit(&mut cursor, ctx) {
                Ok(unit) => unit,
                Err(err) if units.is_empty() => return Err(err),
                Err(_) => break,
            };

            let first_page = linear >> PAGE_SHIFT;
            let last_page = linear.wrapping_add(unit.len() as u32 - 1) >> PAGE_SHIFT;
            for page in [first_page, last_page] {
                if !pages.iter().any(|p| p.page == page) {
                    pages.push(PageVersion {
                        page,
                        version: bus.code_page_version(page),
                    });
                }
            }

            byte_len += unit.len() as u32;
            eip = unit.next_eip();
            let ends = unit.insn().ends_block();
            units.push(unit);
            if ends {
                break;
            }
        }

        tracing::trace!(
            cs_base = key.cs_base,
            eip = key.eip,
            mode = ?key.mode,
            units = units.len(),
            "assembled block"
        );
        Ok(BasicBlock {
            key,
            units,
            pages,
            byte_len,
        })
    }
}

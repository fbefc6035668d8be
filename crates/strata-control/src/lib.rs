#![forbid(unsafe_code)]

//! Command/query surface over a strata CPU.
//!
//! [`EmulatorControl`] is the contract a harness drives: run one block,
//! read or replace the register snapshot, patch and read guest memory by
//! physical, linear or segmented address, and query the decoder. [`LocalControl`] implements it over an
//! in-process [`Vcpu`]; [`server::serve`] exposes any implementation as
//! line-delimited JSON (see [`protocol`]).

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

use serde::{Deserialize, Serialize};
use strata_cpu_core::block::BlockExit;
use strata_cpu_core::exec::Vcpu;
use strata_cpu_core::fault::Branch;
use strata_cpu_core::mem::PhysicalMemory;
use strata_cpu_core::state::CpuState;
use strata_cpu_core::{disasm, StateSnapshot};
use strata_x86::{DecodeError, SegReg};

pub use config::{ConfigError, ControlConfig};
pub use error::ControlError;

/// How a block ended, flattened for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    /// Ran off the end of the block.
    FallThrough,
    Jump,
    Branch,
    Halt,
    Interrupt,
    Assist,
    Fault,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockReport {
    pub instructions: u32,
    pub exit: ExitKind,
    /// Interrupt or exception vector for `interrupt` and `fault` exits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u32>,
    /// Assist reason or fault name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// CS:EIP the next block starts at.
    pub cs: u16,
    pub eip: u32,
}

impl BlockReport {
    pub fn new(exit: BlockExit, cpu: &CpuState) -> Self {
        let (kind, vector, error_code, detail) = match exit.outcome {
            Branch::None => (ExitKind::FallThrough, None, None, None),
            Branch::Jump(_) => (ExitKind::Jump, None, None, None),
            Branch::Conditional { .. } => (ExitKind::Branch, None, None, None),
            Branch::Halt => (ExitKind::Halt, None, None, None),
            Branch::Interrupt(v) => (ExitKind::Interrupt, Some(v), None, None),
            Branch::Assist(reason) => (ExitKind::Assist, None, None, Some(format!("{reason:?}"))),
            Branch::Trap(fault) => (
                ExitKind::Fault,
                fault.vector(),
                fault.error_code(),
                Some(format!("{fault:?}")),
            ),
        };
        Self {
            instructions: exit.instructions,
            exit: kind,
            vector,
            error_code,
            detail,
            cs: cpu.seg(SegReg::Cs).selector,
            eip: cpu.eip,
        }
    }
}

pub trait EmulatorControl {
    /// Execute one block at the current CS:EIP.
    fn execute_block(&mut self) -> Result<BlockReport, ControlError>;

    /// Set EIP (leaving CS alone), wake the processor and execute one block.
    fn execute_block_at(&mut self, eip: u32) -> Result<BlockReport, ControlError>;

    fn get_state(&self) -> StateSnapshot;

    fn set_state(&mut self, snapshot: &StateSnapshot);

    fn set_state_words(&mut self, words: &[u32]) -> Result<(), ControlError> {
        let snapshot = StateSnapshot::try_from(words)?;
        self.set_state(&snapshot);
        Ok(())
    }

    /// Write guest physical memory and drop cached blocks decoded from it.
    fn set_physical_memory(&mut self, addr: u32, bytes: &[u8]) -> Result<(), ControlError>;

    /// The 4 KiB page `page` (a trailing partial page comes back short).
    fn get_physical_page(&self, page: u32) -> Result<Vec<u8>, ControlError>;

    /// The 4 KiB page of linear address space `page`. The core addresses the
    /// bus linearly without paging, so this is the physical page.
    fn get_linear_page(&self, page: u32) -> Result<Vec<u8>, ControlError> {
        self.get_physical_page(page)
    }

    /// `len` bytes at `seg:offset`, through the segment's cached base.
    fn read_segmented(&self, seg: SegReg, offset: u32, len: usize) -> Result<Vec<u8>, ControlError>;

    fn disassemble(&self, bytes: &[u8], count: usize, is_32bit: bool) -> Result<String, DecodeError> {
        disasm::disassemble(bytes, count, is_32bit)
    }

    fn instruction_length(&self, bytes: &[u8], is_32bit: bool) -> Result<usize, DecodeError> {
        disasm::instruction_length(bytes, is_32bit)
    }
}

/// In-process control over a [`Vcpu`] backed by flat physical memory.
pub struct LocalControl {
    vcpu: Vcpu<PhysicalMemory>,
}

impl LocalControl {
    pub fn new(config: &ControlConfig) -> Self {
        let cpu = CpuState::new(config.start_mode);
        let mem = PhysicalMemory::new(config.memory_size);
        tracing::debug!(
            memory_size = config.memory_size,
            mode = ?config.start_mode,
            "created local control"
        );
        Self::from_vcpu(Vcpu::new(cpu, mem, config.cpu))
    }

    pub fn from_vcpu(vcpu: Vcpu<PhysicalMemory>) -> Self {
        Self { vcpu }
    }

    pub fn vcpu(&self) -> &Vcpu<PhysicalMemory> {
        &self.vcpu
    }

    pub fn vcpu_mut(&mut self) -> &mut Vcpu<PhysicalMemory> {
        &mut self.vcpu
    }

    /// Bytes the guest wrote to the debug console port.
    pub fn debug_output(&self) -> &[u8] {
        self.vcpu.bus.debug_output()
    }
}

impl EmulatorControl for LocalControl {
    fn execute_block(&mut self) -> Result<BlockReport, ControlError> {
        let exit = self.vcpu.execute_block()?;
        let report = BlockReport::new(exit, &self.vcpu.cpu);
        tracing::trace!(?report, "block executed");
        Ok(report)
    }

    fn execute_block_at(&mut self, eip: u32) -> Result<BlockReport, ControlError> {
        self.vcpu.cpu.eip = eip;
        self.vcpu.cpu.halted = false;
        self.execute_block()
    }

    fn get_state(&self) -> StateSnapshot {
        self.vcpu.cpu.snapshot()
    }

    fn set_state(&mut self, snapshot: &StateSnapshot) {
        self.vcpu.cpu.restore(snapshot);
    }

    fn set_physical_memory(&mut self, addr: u32, bytes: &[u8]) -> Result<(), ControlError> {
        self.vcpu
            .bus
            .load(addr, bytes)
            .map_err(|_| ControlError::OutOfRange {
                addr,
                len: bytes.len(),
            })?;
        let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        self.vcpu.invalidate_range(addr, len);
        Ok(())
    }

    fn get_physical_page(&self, page: u32) -> Result<Vec<u8>, ControlError> {
        self.vcpu
            .bus
            .page(page)
            .map(<[u8]>::to_vec)
            .ok_or(ControlError::NoSuchPage(page))
    }

    fn read_segmented(&self, seg: SegReg, offset: u32, len: usize) -> Result<Vec<u8>, ControlError> {
        let addr = self.vcpu.cpu.seg_base(seg).wrapping_add(offset);
        self.vcpu
            .bus
            .slice(addr, len)
            .map(<[u8]>::to_vec)
            .ok_or(ControlError::OutOfRange { addr, len })
    }
}

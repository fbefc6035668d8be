#![forbid(unsafe_code)]

//! Architectural state, instruction units and block execution for Strata.
//!
//! Guest code is decoded into immutable [`insn::Unit`]s, grouped into
//! [`block::BasicBlock`]s, compiled (dead-flag elimination plus a cast to the
//! block's mode variant) and executed against [`state::CpuState`] through a
//! [`mem::CpuBus`]. Every unit reports a [`fault::Branch`]; faults and assists
//! are values, never unwinding.
//!
//! [`exec::Vcpu`] is the reference driver tying these together with a
//! [`cache::BlockCache`].

pub mod access;
pub mod alu;
pub mod block;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod decode;
pub mod disasm;
pub mod exec;
pub mod fault;
pub mod insn;
pub mod mem;
pub mod opt;
pub mod segmentation;
pub mod snapshot;
pub mod state;

pub use block::{BasicBlock, BlockAssembler, BlockExit, BlockKey, CodeBlock};
pub use compiler::{CodeBlockCompiler, InvalidModeCast, OptimisingCompiler};
pub use config::CpuConfig;
pub use exec::{ExecError, RunExit, RunStop, Vcpu};
pub use fault::{AssistReason, Branch, Fault};
pub use mem::{CpuBus, PhysicalMemory};
pub use snapshot::{SnapshotLenError, StateSnapshot};
pub use state::{CpuMode, CpuState, Eflags};

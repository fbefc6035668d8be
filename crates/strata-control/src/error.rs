use strata_cpu_core::{ExecError, SnapshotLenError};
use strata_x86::DecodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotLenError),
    #[error("{len} bytes at {addr:#x} fall outside guest memory")]
    OutOfRange { addr: u32, len: usize },
    #[error("page {0:#x} is outside guest memory")]
    NoSuchPage(u32),
    #[error("segment register index {0} does not exist")]
    NoSuchSegment(u8),
}

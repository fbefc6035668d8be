#![forbid(unsafe_code)]

//! x86 instruction-stream decoding primitives for Strata.
//!
//! This crate owns the *shape* of a decoded instruction: the byte cursor the
//! decoder consumes from, the legacy prefix scanner, and ModRM/SIB resolution
//! into [`Operand`] references. It deliberately knows nothing about processor
//! state; `strata-cpu-core` reads and writes operands against live state and
//! owns the opcode dispatch tables.
//!
//! Only the 16-bit and 32-bit encodings are modelled (real, protected and
//! virtual-8086 mode). REX/VEX/EVEX prefixes do not exist in these modes.

mod cursor;
mod error;
mod modrm;
mod operand;
mod prefix;

pub use cursor::DecodeCursor;
pub use error::DecodeError;
pub use modrm::{resolve, ModRm};
pub use operand::{reg_name, AddressSize, MemRef, Operand, OperandDisplay, OperandSize, SegReg};
pub use prefix::{Prefixes, RepPrefix};

/// Maximum x86 instruction length (architectural limit).
pub const MAX_INST_LEN: usize = 15;

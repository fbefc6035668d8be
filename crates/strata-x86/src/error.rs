use thiserror::Error;

/// Decoder error.
///
/// These are construction-time failures: they abort decoding of a single
/// instruction (or block) and are never turned into a default instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The byte stream ended before the instruction could be fully decoded.
    #[error("unexpected end of instruction bytes")]
    UnexpectedEof,
    /// The decoded instruction exceeds the architectural 15-byte length limit.
    #[error("instruction exceeds 15-byte length limit")]
    TooLong,
    /// The encoding is undefined or reserved for the requested mode.
    ///
    /// `opcode` is the primary opcode byte, or `0x0Fxx` for the two-byte map.
    #[error("invalid instruction encoding (opcode {opcode:#06x})")]
    Invalid { opcode: u16 },
}

impl DecodeError {
    pub const fn invalid(opcode: u16) -> Self {
        Self::Invalid { opcode }
    }
}

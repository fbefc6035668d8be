use crate::{DecodeError, MAX_INST_LEN};

/// A peekable, forward-only view over an instruction byte buffer.
///
/// `origin` is the instruction pointer of `bytes[0]`; [`DecodeCursor::ip`]
/// reports the pointer of the next unconsumed byte. Every read is bounded by
/// the backing slice *and* by the 15-byte limit of the instruction currently
/// being decoded (see [`DecodeCursor::begin_instruction`]).
#[derive(Debug, Clone)]
pub struct DecodeCursor<'a> {
    bytes: &'a [u8],
    origin: u32,
    inst_start: usize,
    pos: usize,
}

impl<'a> DecodeCursor<'a> {
    pub fn new(bytes: &'a [u8], origin: u32) -> Self {
        Self {
            bytes,
            origin,
            inst_start: 0,
            pos: 0,
        }
    }

    /// Mark the current position as the first byte of a new instruction.
    pub fn begin_instruction(&mut self) {
        self.inst_start = self.pos;
    }

    /// Bytes consumed since the last [`DecodeCursor::begin_instruction`].
    pub fn instruction_len(&self) -> usize {
        self.pos - self.inst_start
    }

    /// The bytes of the instruction decoded so far.
    pub fn instruction_bytes(&self) -> &'a [u8] {
        &self.bytes[self.inst_start..self.pos]
    }

    pub fn origin(&self) -> u32 {
        self.origin
    }

    /// Offset of the next unconsumed byte from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Instruction pointer of the next unconsumed byte.
    pub fn ip(&self) -> u32 {
        self.origin.wrapping_add(self.pos as u32)
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Return the next byte without consuming it.
    pub fn peek(&self) -> Result<u8, DecodeError> {
        self.bytes
            .get(self.pos)
            .copied()
            .ok_or(DecodeError::UnexpectedEof)
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        if self.instruction_len() + N > MAX_INST_LEN {
            return Err(DecodeError::TooLong);
        }
        let end = self.pos + N;
        let src = self
            .bytes
            .get(self.pos..end)
            .ok_or(DecodeError::UnexpectedEof)?;
        let mut out = [0u8; N];
        out.copy_from_slice(src);
        self.pos = end;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    pub fn read_i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(self.read_u32()? as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_does_not_advance() {
        let bytes = [0xAB, 0xCD];
        let cursor = DecodeCursor::new(&bytes, 0x100);
        assert_eq!(cursor.peek(), Ok(0xAB));
        assert_eq!(cursor.peek(), Ok(0xAB));
        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.ip(), 0x100);
    }

    #[test]
    fn instruction_limit_is_per_instruction() {
        let bytes = [0x90u8; 32];
        let mut cursor = DecodeCursor::new(&bytes, 0);
        for _ in 0..15 {
            cursor.read_u8().unwrap();
        }
        assert_eq!(cursor.read_u8(), Err(DecodeError::TooLong));

        cursor.begin_instruction();
        assert_eq!(cursor.read_u8(), Ok(0x90));
        assert_eq!(cursor.instruction_len(), 1);
    }
}

//! Instruction decoding: bytes to [`Unit`]s.
//!
//! After the legacy prefixes are consumed the opcode byte indexes one of two
//! 256-entry tables (the primary map and the `0F` map). Each entry is a
//! builder that reads exactly the bytes its operands need (ModRM, SIB,
//! displacement, immediates) and returns the matching [`Insn`]. The block
//! mode and default size travel in [`DecodeCtx`] and select mode-specific
//! variants.

mod ext;
mod primary;
mod table;

use strata_x86::{
    resolve, AddressSize, DecodeCursor, DecodeError, MemRef, ModRm, Operand, OperandSize,
    Prefixes, SegReg,
};

use crate::insn::{Insn, Unit};
use crate::state::CpuMode;

/// Mode discriminator for the dispatch tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecodeCtx {
    pub mode: CpuMode,
    /// CS.D: default operand and address size is 32 bits.
    pub default_32: bool,
}

impl DecodeCtx {
    pub fn new(mode: CpuMode, default_32: bool) -> Self {
        Self { mode, default_32 }
    }

    pub fn ip_mask(&self) -> u32 {
        if self.default_32 {
            0xFFFF_FFFF
        } else {
            0xFFFF
        }
    }
}

/// Decoding state for one instruction, handed to the table builders.
pub(crate) struct OpDecoder<'c, 'a> {
    cur: &'c mut DecodeCursor<'a>,
    prefixes: Prefixes,
    ctx: DecodeCtx,
    /// Effective word/dword operand size.
    opsize: OperandSize,
    addr_size: AddressSize,
    /// Opcode for error reporting (`0x0Fxx` in the two-byte map).
    opcode: u16,
}

impl<'c, 'a> OpDecoder<'c, 'a> {
    fn invalid(&self) -> DecodeError {
        DecodeError::invalid(self.opcode)
    }

    fn mode(&self) -> CpuMode {
        self.ctx.mode
    }

    /// Byte size for even opcodes, the effective operand size for odd ones.
    fn byte_or(&self, op: u8) -> OperandSize {
        if op & 1 == 0 {
            OperandSize::Byte
        } else {
            self.opsize
        }
    }

    fn modrm(&mut self) -> Result<ModRm, DecodeError> {
        ModRm::read(self.cur)
    }

    fn rm(&mut self, m: ModRm) -> Result<Operand, DecodeError> {
        resolve(self.cur, m, &self.prefixes, self.addr_size)
    }

    /// Resolve an r/m operand that must name memory.
    fn mem(&mut self, m: ModRm) -> Result<MemRef, DecodeError> {
        match self.rm(m)? {
            Operand::Mem(mem) => Ok(mem),
            Operand::Reg(_) => Err(self.invalid()),
        }
    }

    fn imm8(&mut self) -> Result<u8, DecodeError> {
        self.cur.read_u8()
    }

    fn imm16(&mut self) -> Result<u16, DecodeError> {
        self.cur.read_u16()
    }

    fn imm(&mut self, size: OperandSize) -> Result<u32, DecodeError> {
        match size {
            OperandSize::Byte => self.cur.read_u8().map(u32::from),
            OperandSize::Word => self.cur.read_u16().map(u32::from),
            OperandSize::Dword => self.cur.read_u32(),
        }
    }

    /// Sign-extended imm8, masked to `size`.
    fn simm8(&mut self, size: OperandSize) -> Result<u32, DecodeError> {
        Ok(self.cur.read_i8()? as i32 as u32 & size.mask())
    }

    /// Branch target of a rel8 displacement.
    fn rel8(&mut self) -> Result<u32, DecodeError> {
        let disp = self.cur.read_i8()? as i32 as u32;
        Ok(self.cur.ip().wrapping_add(disp) & self.opsize.mask())
    }

    /// Branch target of a rel16/rel32 displacement (by operand size).
    fn rel(&mut self) -> Result<u32, DecodeError> {
        let disp = match self.opsize {
            OperandSize::Dword => self.cur.read_u32()?,
            _ => self.cur.read_i16()? as i32 as u32,
        };
        Ok(self.cur.ip().wrapping_add(disp) & self.opsize.mask())
    }

    /// `moffs` operand of `MOV A0-A3`.
    fn moffs(&mut self) -> Result<MemRef, DecodeError> {
        let disp = match self.addr_size {
            AddressSize::Bits16 => self.cur.read_u16()? as u32,
            AddressSize::Bits32 => self.cur.read_u32()?,
        };
        Ok(MemRef::absolute(
            self.prefixes.segment_or(SegReg::Ds),
            self.prefixes.segment.is_some(),
            disp,
            self.addr_size,
        ))
    }

    /// Source segment of a string instruction (DS unless overridden).
    fn string_segment(&self) -> SegReg {
        self.prefixes.segment_or(SegReg::Ds)
    }
}

/// Decode the instruction at the cursor into a [`Unit`].
pub fn decode_unit(cursor: &mut DecodeCursor<'_>, ctx: DecodeCtx) -> Result<Unit, DecodeError> {
    cursor.begin_instruction();
    let ip_mask = ctx.ip_mask();
    let eip = cursor.ip() & ip_mask;
    let prefixes = Prefixes::scan(cursor)?;
    let op = cursor.read_u8()?;

    let mut d = OpDecoder {
        cur: cursor,
        prefixes,
        ctx,
        opsize: prefixes.operand_size(ctx.default_32),
        addr_size: prefixes.address_size(ctx.default_32),
        opcode: op as u16,
    };
    let insn = if op == 0x0F {
        let op2 = d.cur.read_u8()?;
        d.opcode = 0x0F00 | op2 as u16;
        (table::EXTENDED[op2 as usize])(&mut d, op2)?
    } else {
        (table::PRIMARY[op as usize])(&mut d, op)?
    };
    if prefixes.lock && !lock_allowed(&insn) {
        return Err(d.invalid());
    }
    let len = d.cur.instruction_len();
    Ok(Unit::new(eip, len as u8, ip_mask, insn))
}

/// LOCK is only valid on read-modify-write instructions with a memory destination.
fn lock_allowed(insn: &Insn) -> bool {
    use crate::insn::{AluOp, BitOp};
    match insn {
        Insn::Alu { op, dst, .. } => *op != AluOp::Cmp && dst.is_memory(),
        Insn::Bit { op, base, .. } => *op != BitOp::Bt && base.is_memory(),
        Insn::IncDec { dst, .. }
        | Insn::Not { dst, .. }
        | Insn::Neg { dst, .. }
        | Insn::Xadd { dst, .. }
        | Insn::Cmpxchg { dst, .. }
        | Insn::Xchg { dst, .. } => dst.is_memory(),
        _ => false,
    }
}

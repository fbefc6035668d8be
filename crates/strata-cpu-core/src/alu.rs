use strata_x86::OperandSize;

use crate::state::Eflags;

/// Flags fully defined by ADD/ADC/SUB/SBB/CMP/NEG.
pub const ARITH_FLAGS: Eflags = Eflags::STATUS;
/// Flags defined by AND/OR/XOR/TEST (AF is undefined and left alone).
pub const LOGIC_FLAGS: Eflags = Eflags::OF
    .union(Eflags::SF)
    .union(Eflags::ZF)
    .union(Eflags::PF)
    .union(Eflags::CF);
/// INC/DEC preserve CF.
pub const INCDEC_FLAGS: Eflags = Eflags::OF
    .union(Eflags::SF)
    .union(Eflags::ZF)
    .union(Eflags::AF)
    .union(Eflags::PF);
pub const SZP_FLAGS: Eflags = Eflags::SF.union(Eflags::ZF).union(Eflags::PF);

pub fn parity(byte: u8) -> bool {
    byte.count_ones() % 2 == 0
}

/// Set SF/ZF/PF from `result` (already masked to `size`).
pub fn szp(flags: &mut Eflags, result: u32, size: OperandSize) {
    flags.set(Eflags::ZF, result & size.mask() == 0);
    flags.set(Eflags::SF, result & size.sign_bit() != 0);
    flags.set(Eflags::PF, parity(result as u8));
}

pub fn add_with_flags(
    flags: &mut Eflags,
    dest: u32,
    src: u32,
    carry_in: bool,
    size: OperandSize,
) -> u32 {
    let mask = size.mask();
    let dest = dest & mask;
    let src = src & mask;
    let full = dest as u64 + src as u64 + carry_in as u64;
    let result = full as u32 & mask;

    let sb = size.sign_bit();
    flags.set(Eflags::CF, full > mask as u64);
    flags.set(Eflags::OF, (dest ^ result) & (src ^ result) & sb != 0);
    flags.set(Eflags::AF, (dest ^ src ^ result) & 0x10 != 0);
    szp(flags, result, size);
    result
}

pub fn sub_with_flags(
    flags: &mut Eflags,
    dest: u32,
    src: u32,
    borrow_in: bool,
    size: OperandSize,
) -> u32 {
    let mask = size.mask();
    let dest = dest & mask;
    let src = src & mask;
    let subtrahend = src as u64 + borrow_in as u64;
    let result = (dest as u64).wrapping_sub(subtrahend) as u32 & mask;

    let sb = size.sign_bit();
    flags.set(Eflags::CF, (dest as u64) < subtrahend);
    flags.set(Eflags::OF, (dest ^ src) & (dest ^ result) & sb != 0);
    flags.set(Eflags::AF, (dest ^ src ^ result) & 0x10 != 0);
    szp(flags, result, size);
    result
}

/// The shared logic-result routine: CF=OF=0, SF/ZF/PF from `result`.
pub fn logic_with_flags(flags: &mut Eflags, result: u32, size: OperandSize) -> u32 {
    let result = result & size.mask();
    flags.remove(Eflags::CF | Eflags::OF);
    szp(flags, result, size);
    result
}

pub fn inc_with_flags(flags: &mut Eflags, dest: u32, size: OperandSize) -> u32 {
    let result = dest.wrapping_add(1) & size.mask();
    flags.set(Eflags::OF, result == size.sign_bit());
    flags.set(Eflags::AF, result & 0xF == 0);
    szp(flags, result, size);
    result
}

pub fn dec_with_flags(flags: &mut Eflags, dest: u32, size: OperandSize) -> u32 {
    let result = dest.wrapping_sub(1) & size.mask();
    flags.set(Eflags::OF, result == size.sign_bit() - 1);
    flags.set(Eflags::AF, result & 0xF == 0xF);
    szp(flags, result, size);
    result
}

/// Condition codes in `Jcc`/`SETcc`/`CMOVcc` encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    O,
    No,
    B,
    Ae,
    E,
    Ne,
    Be,
    A,
    S,
    Ns,
    P,
    Np,
    L,
    Ge,
    Le,
    G,
}

impl Cond {
    const ALL: [Cond; 16] = [
        Cond::O,
        Cond::No,
        Cond::B,
        Cond::Ae,
        Cond::E,
        Cond::Ne,
        Cond::Be,
        Cond::A,
        Cond::S,
        Cond::Ns,
        Cond::P,
        Cond::Np,
        Cond::L,
        Cond::Ge,
        Cond::Le,
        Cond::G,
    ];

    /// Condition encoded in the low nibble of `opcode`.
    pub fn from_opcode(opcode: u8) -> Self {
        Self::ALL[(opcode & 0xF) as usize]
    }

    pub fn eval(self, flags: Eflags) -> bool {
        let cf = flags.contains(Eflags::CF);
        let zf = flags.contains(Eflags::ZF);
        let sf = flags.contains(Eflags::SF);
        let of = flags.contains(Eflags::OF);
        let pf = flags.contains(Eflags::PF);
        match self {
            Cond::O => of,
            Cond::No => !of,
            Cond::B => cf,
            Cond::Ae => !cf,
            Cond::E => zf,
            Cond::Ne => !zf,
            Cond::Be => cf || zf,
            Cond::A => !cf && !zf,
            Cond::S => sf,
            Cond::Ns => !sf,
            Cond::P => pf,
            Cond::Np => !pf,
            Cond::L => sf != of,
            Cond::Ge => sf == of,
            Cond::Le => zf || sf != of,
            Cond::G => !zf && sf == of,
        }
    }

    /// Flags consulted by [`Cond::eval`].
    pub fn flags_read(self) -> Eflags {
        match self {
            Cond::O | Cond::No => Eflags::OF,
            Cond::B | Cond::Ae => Eflags::CF,
            Cond::E | Cond::Ne => Eflags::ZF,
            Cond::Be | Cond::A => Eflags::CF | Eflags::ZF,
            Cond::S | Cond::Ns => Eflags::SF,
            Cond::P | Cond::Np => Eflags::PF,
            Cond::L | Cond::Ge => Eflags::SF | Eflags::OF,
            Cond::Le | Cond::G => Eflags::ZF | Eflags::SF | Eflags::OF,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Cond::O => "o",
            Cond::No => "no",
            Cond::B => "b",
            Cond::Ae => "ae",
            Cond::E => "e",
            Cond::Ne => "ne",
            Cond::Be => "be",
            Cond::A => "a",
            Cond::S => "s",
            Cond::Ns => "ns",
            Cond::P => "p",
            Cond::Np => "np",
            Cond::L => "l",
            Cond::Ge => "ge",
            Cond::Le => "le",
            Cond::G => "g",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sets_carry_and_overflow() {
        let mut f = Eflags::empty();
        let r = add_with_flags(&mut f, 0x7F, 1, false, OperandSize::Byte);
        assert_eq!(r, 0x80);
        assert!(f.contains(Eflags::OF | Eflags::SF | Eflags::AF));
        assert!(!f.contains(Eflags::CF));

        let mut f = Eflags::empty();
        let r = add_with_flags(&mut f, 0xFFFF_FFFF, 0, true, OperandSize::Dword);
        assert_eq!(r, 0);
        assert!(f.contains(Eflags::CF | Eflags::ZF | Eflags::PF));
        assert!(!f.contains(Eflags::OF));
    }

    #[test]
    fn sbb_with_all_ones_source_borrows() {
        let mut f = Eflags::empty();
        let r = sub_with_flags(&mut f, 0, 0xFFFF, true, OperandSize::Word);
        assert_eq!(r, 0);
        assert!(f.contains(Eflags::CF));
        assert!(!f.contains(Eflags::OF));
    }

    #[test]
    fn logic_clears_cf_of_and_leaves_af() {
        let mut f = Eflags::CF | Eflags::OF | Eflags::AF;
        logic_with_flags(&mut f, 0x8000, OperandSize::Word);
        assert!(!f.contains(Eflags::CF));
        assert!(!f.contains(Eflags::OF));
        assert!(f.contains(Eflags::AF | Eflags::SF | Eflags::PF));
    }

    #[test]
    fn signed_conditions() {
        assert!(Cond::L.eval(Eflags::SF));
        assert!(!Cond::L.eval(Eflags::SF | Eflags::OF));
        assert!(Cond::Le.eval(Eflags::ZF));
        assert!(Cond::G.eval(Eflags::empty()));
        assert_eq!(Cond::from_opcode(0x7F), Cond::G);
    }
}

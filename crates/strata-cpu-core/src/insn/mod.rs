//! Instruction units.
//!
//! Every decoded instruction becomes a [`Unit`]: its address and length plus
//! an [`Insn`] variant that owns the immediates and operand references fixed at
//! decode time. Units are immutable; executing one reads and writes live state
//! through [`CpuState`] and the bus and yields a [`Branch`].

mod arith;
mod bcd;
mod control;
mod data;
mod meta;
mod muldiv;
mod shift;
mod stack;
mod string;
mod system;

pub use meta::FlagEffect;

use strata_x86::{AddressSize, MemRef, Operand, OperandSize, RepPrefix, SegReg};

use crate::access::read_operand;
use crate::alu::Cond;
use crate::fault::{AssistReason, Branch, Fault};
use crate::mem::CpuBus;
use crate::state::{CpuMode, CpuState, Eflags};

/// A source operand: a register/memory reference or an immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Src {
    Op(Operand),
    /// Already sign- or zero-extended to the operand size.
    Imm(u32),
}

impl Src {
    pub(crate) fn read<B: CpuBus>(
        &self,
        cpu: &CpuState,
        bus: &mut B,
        size: OperandSize,
    ) -> Result<u32, Fault> {
        match self {
            Src::Op(op) => read_operand(cpu, bus, op, size),
            Src::Imm(v) => Ok(*v & size.mask()),
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Src::Op(op) if op.is_memory())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Add,
    Or,
    Adc,
    Sbb,
    And,
    Sub,
    Xor,
    Cmp,
}

impl AluOp {
    const ALL: [AluOp; 8] = [
        AluOp::Add,
        AluOp::Or,
        AluOp::Adc,
        AluOp::Sbb,
        AluOp::And,
        AluOp::Sub,
        AluOp::Xor,
        AluOp::Cmp,
    ];

    pub fn from_index(index: u8) -> Self {
        Self::ALL[(index & 7) as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftOp {
    Rol,
    Ror,
    Rcl,
    Rcr,
    Shl,
    Shr,
    /// `/6`: an undocumented alias of SHL.
    Sal,
    Sar,
}

impl ShiftOp {
    const ALL: [ShiftOp; 8] = [
        ShiftOp::Rol,
        ShiftOp::Ror,
        ShiftOp::Rcl,
        ShiftOp::Rcr,
        ShiftOp::Shl,
        ShiftOp::Shr,
        ShiftOp::Sal,
        ShiftOp::Sar,
    ];

    pub fn from_index(index: u8) -> Self {
        Self::ALL[(index & 7) as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftCount {
    One,
    Imm(u8),
    Cl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MulDivOp {
    Mul,
    Imul,
    Div,
    Idiv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitOp {
    Bt,
    Bts,
    Btr,
    Btc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BcdOp {
    Daa,
    Das,
    Aaa,
    Aas,
    Aam(u8),
    Aad(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    Loop,
    Loope,
    Loopne,
    Jcxz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrOp {
    Movs,
    Cmps,
    Stos,
    Lods,
    Scas,
    Ins,
    Outs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    Imm(u8),
    Dx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagOp {
    Clc,
    Stc,
    Cmc,
    Cld,
    Std,
    Cli,
    Sti,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescTableOp {
    Sgdt,
    Sidt,
    Lgdt,
    Lidt,
}

/// One decoded instruction with its operands fixed.
///
/// Variants that carry a `mode` are mode-sensitive: the decoder stamps the
/// block's mode into them and execution follows that mode's rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Insn {
    Alu { op: AluOp, size: OperandSize, dst: Operand, src: Src },
    Test { size: OperandSize, dst: Operand, src: Src },
    IncDec { dec: bool, size: OperandSize, dst: Operand },
    Not { size: OperandSize, dst: Operand },
    Neg { size: OperandSize, dst: Operand },

    MulDiv { op: MulDivOp, size: OperandSize, src: Operand },
    /// Two- and three-operand IMUL (`imm` present for the latter).
    Imul { size: OperandSize, dst: u8, src: Operand, imm: Option<u32> },

    Shift { op: ShiftOp, size: OperandSize, dst: Operand, count: ShiftCount },
    /// SHLD (`left`) / SHRD.
    DoubleShift { left: bool, size: OperandSize, dst: Operand, src: u8, count: ShiftCount },
    Bit { op: BitOp, size: OperandSize, base: Operand, bit: Src },
    BitScan { reverse: bool, size: OperandSize, dst: u8, src: Operand },
    Bcd(BcdOp),
    Salc,

    Mov { size: OperandSize, dst: Operand, src: Src },
    MovFromSeg { seg: SegReg, size: OperandSize, dst: Operand },
    MovToSeg { seg: SegReg, src: Operand },
    MovExtend { signed: bool, from: OperandSize, size: OperandSize, dst: u8, src: Operand },
    Lea { size: OperandSize, dst: u8, mem: MemRef },
    Xchg { size: OperandSize, dst: Operand, reg: u8 },
    Xadd { size: OperandSize, dst: Operand, reg: u8 },
    Cmpxchg { size: OperandSize, dst: Operand, reg: u8 },
    Bswap { reg: u8 },
    /// CBW / CWDE.
    Cbw { size: OperandSize },
    /// CWD / CDQ.
    Cwd { size: OperandSize },
    Lahf,
    Sahf,
    /// `mem` is `seg:[bx]` / `seg:[ebx]`; AL is added at execution.
    Xlat { mem: MemRef },
    Setcc { cond: Cond, dst: Operand },
    Cmovcc { cond: Cond, size: OperandSize, dst: u8, src: Operand },
    LoadFarPtr { seg: SegReg, size: OperandSize, dst: u8, mem: MemRef },
    Bound { size: OperandSize, reg: u8, mem: MemRef },
    Arpl { dst: Operand, reg: u8 },

    Push { size: OperandSize, src: Src },
    Pop { size: OperandSize, dst: Operand },
    PushSeg { seg: SegReg, size: OperandSize },
    PopSeg { seg: SegReg, size: OperandSize },
    Pusha { size: OperandSize },
    Popa { size: OperandSize },
    Pushf { size: OperandSize, mode: CpuMode },
    Popf { size: OperandSize, mode: CpuMode },
    Enter { size: OperandSize, frame: u16, level: u8 },
    Leave { size: OperandSize },

    Jcc { cond: Cond, target: u32 },
    Jmp { target: u32 },
    JmpIndirect { size: OperandSize, src: Operand },
    JmpFar { size: OperandSize, selector: u16, offset: u32 },
    JmpFarIndirect { size: OperandSize, mem: MemRef },
    Call { size: OperandSize, target: u32 },
    CallIndirect { size: OperandSize, src: Operand },
    CallFar { size: OperandSize, selector: u16, offset: u32 },
    CallFarIndirect { size: OperandSize, mem: MemRef },
    Ret { size: OperandSize, pop: u16 },
    RetFar { size: OperandSize, pop: u16 },
    Loop { kind: LoopKind, addr_size: AddressSize, target: u32 },
    Int { vector: u8, mode: CpuMode },
    Int3 { mode: CpuMode },
    /// `F1` (ICEBP): a #DB trap.
    Int1,
    Into { mode: CpuMode },
    Iret { size: OperandSize, mode: CpuMode },
    Hlt,

    Str {
        op: StrOp,
        size: OperandSize,
        rep: Option<RepPrefix>,
        /// Source segment for MOVS/CMPS/LODS/OUTS (overridable); ES:DI is fixed.
        seg: SegReg,
        addr_size: AddressSize,
        mode: CpuMode,
    },
    In { size: OperandSize, port: Port, mode: CpuMode },
    Out { size: OperandSize, port: Port, mode: CpuMode },

    Flag { op: FlagOp, mode: CpuMode },
    DescTable { op: DescTableOp, size: OperandSize, mem: MemRef },
    Smsw { size: OperandSize, dst: Operand },
    Lmsw { src: Operand },
    MovCr { to_cr: bool, cr: u8, reg: u8 },
    Clts,
    /// INVD / WBINVD: caches are not modelled.
    CacheFlush { writeback: bool },
    Nop,
    Wait,
    Fpu { opcode: u8, modrm: u8 },
    Ud2,
    /// An instruction whose effect belongs to the driver.
    Assist { reason: AssistReason, mnemonic: &'static str },
}

/// Per-execution context: where the unit sits and which flags are still observed.
#[derive(Debug, Clone, Copy)]
pub struct ExecCtx {
    pub eip: u32,
    pub next_eip: u32,
    pub live: Eflags,
}

impl ExecCtx {
    /// Commit the live subset of `defined` from `computed`.
    #[inline]
    pub(crate) fn commit(&self, cpu: &mut CpuState, computed: Eflags, defined: Eflags) {
        cpu.commit_flags(computed, defined & self.live);
    }
}

/// An executable instruction: position, length, live-flag mask and operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    eip: u32,
    next_eip: u32,
    len: u8,
    live_flags: Eflags,
    insn: Insn,
}

impl Unit {
    /// `ip_mask` is 0xFFFF for 16-bit code (the next EIP wraps at 64 KiB).
    pub fn new(eip: u32, len: u8, ip_mask: u32, insn: Insn) -> Self {
        Self {
            eip,
            next_eip: eip.wrapping_add(len as u32) & ip_mask,
            len,
            live_flags: Eflags::STATUS,
            insn,
        }
    }

    pub fn eip(&self) -> u32 {
        self.eip
    }

    pub fn next_eip(&self) -> u32 {
        self.next_eip
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insn(&self) -> &Insn {
        &self.insn
    }

    /// Status flags this unit must still produce (all six unless optimised).
    pub fn live_flags(&self) -> Eflags {
        self.live_flags
    }

    pub(crate) fn set_live_flags(&mut self, live: Eflags) {
        self.live_flags = live & Eflags::STATUS;
    }

    /// Execute against live state. The caller owns EIP: it advances to
    /// [`Unit::next_eip`] on [`Branch::None`].
    pub fn execute<B: CpuBus>(&self, cpu: &mut CpuState, bus: &mut B) -> Branch {
        let cx = ExecCtx {
            eip: self.eip,
            next_eip: self.next_eip,
            live: self.live_flags,
        };
        match self.insn.execute(cpu, bus, &cx) {
            Ok(branch) => branch,
            Err(fault) => Branch::Trap(fault),
        }
    }
}

fn done(r: Result<(), Fault>) -> Result<Branch, Fault> {
    r.map(|()| Branch::None)
}

impl Insn {
    fn execute<B: CpuBus>(
        &self,
        cpu: &mut CpuState,
        bus: &mut B,
        cx: &ExecCtx,
    ) -> Result<Branch, Fault> {
        use Insn::*;
        match *self {
            Alu { op, size, dst, src } => done(arith::alu(cpu, bus, cx, op, size, &dst, &src)),
            Test { size, dst, src } => done(arith::test(cpu, bus, cx, size, &dst, &src)),
            IncDec { dec, size, dst } => done(arith::inc_dec(cpu, bus, cx, dec, size, &dst)),
            Not { size, dst } => done(arith::not(cpu, bus, size, &dst)),
            Neg { size, dst } => done(arith::neg(cpu, bus, cx, size, &dst)),

            MulDiv { op, size, src } => done(muldiv::mul_div(cpu, bus, cx, op, size, &src)),
            Imul { size, dst, src, imm } => done(muldiv::imul(cpu, bus, cx, size, dst, &src, imm)),

            Shift { op, size, dst, count } => done(shift::shift(cpu, bus, cx, op, size, &dst, count)),
            DoubleShift { left, size, dst, src, count } => {
                done(shift::double_shift(cpu, bus, cx, left, size, &dst, src, count))
            }
            Bit { op, size, base, bit } => done(shift::bit(cpu, bus, cx, op, size, &base, &bit)),
            BitScan { reverse, size, dst, src } => {
                done(shift::bit_scan(cpu, bus, cx, reverse, size, dst, &src))
            }
            Bcd(op) => done(bcd::bcd(cpu, cx, op)),
            Salc => {
                let al = if cpu.cf() { 0xFF } else { 0 };
                cpu.set_reg8(0, al);
                Ok(Branch::None)
            }

            Mov { size, dst, src } => done(data::mov(cpu, bus, size, &dst, &src)),
            MovFromSeg { seg, size, dst } => done(data::mov_from_seg(cpu, bus, seg, size, &dst)),
            MovToSeg { seg, src } => done(data::mov_to_seg(cpu, bus, seg, &src)),
            MovExtend { signed, from, size, dst, src } => {
                done(data::mov_extend(cpu, bus, signed, from, size, dst, &src))
            }
            Lea { size, dst, mem } => done(data::lea(cpu, size, dst, &mem)),
            Xchg { size, dst, reg } => done(data::xchg(cpu, bus, size, &dst, reg)),
            Xadd { size, dst, reg } => done(data::xadd(cpu, bus, cx, size, &dst, reg)),
            Cmpxchg { size, dst, reg } => done(data::cmpxchg(cpu, bus, cx, size, &dst, reg)),
            Bswap { reg } => {
                cpu.set_reg32(reg, cpu.reg32(reg).swap_bytes());
                Ok(Branch::None)
            }
            Cbw { size } => done(data::cbw(cpu, size)),
            Cwd { size } => done(data::cwd(cpu, size)),
            Lahf => done(data::lahf(cpu)),
            Sahf => done(data::sahf(cpu)),
            Xlat { mem } => done(data::xlat(cpu, bus, &mem)),
            Setcc { cond, dst } => done(data::setcc(cpu, bus, cond, &dst)),
            Cmovcc { cond, size, dst, src } => done(data::cmovcc(cpu, bus, cond, size, dst, &src)),
            LoadFarPtr { seg, size, dst, mem } => {
                done(data::load_far_ptr(cpu, bus, seg, size, dst, &mem))
            }
            Bound { size, reg, mem } => done(data::bound(cpu, bus, size, reg, &mem)),
            Arpl { dst, reg } => done(data::arpl(cpu, bus, cx, &dst, reg)),

            Push { size, src } => done(stack::push_src(cpu, bus, size, &src)),
            Pop { size, dst } => done(stack::pop_dst(cpu, bus, size, &dst)),
            PushSeg { seg, size } => done(stack::push_seg(cpu, bus, seg, size)),
            PopSeg { seg, size } => done(stack::pop_seg(cpu, bus, seg, size)),
            Pusha { size } => done(stack::pusha(cpu, bus, size)),
            Popa { size } => done(stack::popa(cpu, bus, size)),
            Pushf { size, mode } => done(stack::pushf(cpu, bus, size, mode)),
            Popf { size, mode } => done(stack::popf(cpu, bus, size, mode)),
            Enter { size, frame, level } => done(stack::enter(cpu, bus, size, frame, level)),
            Leave { size } => done(stack::leave(cpu, bus, size)),

            Jcc { cond, target } => control::conditional(cpu, cond.eval(cpu.flags()), target),
            Jmp { target } => control::jmp(cpu, target),
            JmpIndirect { size, src } => control::jmp_indirect(cpu, bus, size, &src),
            JmpFar { size, selector, offset } => control::jmp_far(cpu, bus, size, selector, offset),
            JmpFarIndirect { size, mem } => control::jmp_far_indirect(cpu, bus, size, &mem),
            Call { size, target } => control::call(cpu, bus, cx, size, target),
            CallIndirect { size, src } => control::call_indirect(cpu, bus, cx, size, &src),
            CallFar { size, selector, offset } => {
                control::call_far(cpu, bus, cx, size, selector, offset)
            }
            CallFarIndirect { size, mem } => control::call_far_indirect(cpu, bus, cx, size, &mem),
            Ret { size, pop } => control::ret(cpu, bus, size, pop),
            RetFar { size, pop } => control::ret_far(cpu, bus, size, pop),
            Loop { kind, addr_size, target } => control::loop_(cpu, kind, addr_size, target),
            Int { vector, mode } => control::int(cpu, bus, cx, vector, mode),
            Int3 { mode } => control::int3(cpu, bus, cx, mode),
            Int1 => Ok(Branch::Interrupt(1)),
            Into { mode } => control::into(cpu, bus, cx, mode),
            Iret { size, mode } => control::iret(cpu, bus, size, mode),
            Hlt => {
                if cpu.cpl() != 0 {
                    return Err(Fault::gp0());
                }
                Ok(Branch::Halt)
            }

            Str { op, size, rep, seg, addr_size, mode } => {
                string::string_op(cpu, bus, cx, op, size, rep, seg, addr_size, mode)
            }
            In { size, port, mode } => string::port_in(cpu, bus, size, port, mode),
            Out { size, port, mode } => string::port_out(cpu, bus, size, port, mode),

            Flag { op, mode } => done(system::flag_op(cpu, cx, op, mode)),
            DescTable { op, size, mem } => done(system::desc_table(cpu, bus, op, size, &mem)),
            Smsw { size, dst } => done(system::smsw(cpu, bus, size, &dst)),
            Lmsw { src } => done(system::lmsw(cpu, bus, &src)),
            MovCr { to_cr, cr, reg } => system::mov_cr(cpu, to_cr, cr, reg),
            Clts => {
                system::require_cpl0(cpu)?;
                cpu.cr0 &= !crate::state::CR0_TS;
                Ok(Branch::None)
            }
            CacheFlush { .. } => {
                system::require_cpl0(cpu)?;
                Ok(Branch::None)
            }
            Nop => Ok(Branch::None),
            Wait => system::wait(cpu),
            Fpu { .. } => system::fpu_escape(cpu),
            Ud2 => Err(Fault::InvalidOpcode),
            Assist { reason, .. } => Ok(Branch::Assist(reason)),
        }
    }
}

//! Architectural faults and the per-instruction branch outcome.
//!
//! Faults are plain values carried by [`Branch::Trap`]: an instruction that
//! faults returns immediately and the block executor leaves EIP at the
//! faulting instruction.

/// A synchronous exception raised by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// #DE: zero divisor or quotient overflow.
    DivideError,
    /// #DB.
    Debug,
    /// #BP (`INT3` in modes where the driver delivers it).
    Breakpoint,
    /// #OF (`INTO` with OF set, when delivered by the driver).
    Overflow,
    /// #BR (`BOUND` out of range).
    BoundRange,
    /// #UD.
    InvalidOpcode,
    /// #NM (x87 escape with CR0.EM or CR0.TS set).
    DeviceNotAvailable,
    /// #TS with the offending selector.
    InvalidTss(u16),
    /// #NP with the offending selector.
    SegmentNotPresent(u16),
    /// #SS with its error code.
    StackFault(u16),
    /// #GP with its error code.
    GeneralProtection(u16),
    /// #PF raised by a paging-aware bus.
    PageFault { linear: u32, error_code: u32 },
    /// Access outside the memory the bus can back. Has no architectural vector.
    MemoryViolation { addr: u32 },
}

impl Fault {
    pub const fn gp0() -> Self {
        Fault::GeneralProtection(0)
    }

    /// Interrupt vector used to deliver this fault.
    pub fn vector(&self) -> Option<u8> {
        Some(match self {
            Fault::DivideError => 0,
            Fault::Debug => 1,
            Fault::Breakpoint => 3,
            Fault::Overflow => 4,
            Fault::BoundRange => 5,
            Fault::InvalidOpcode => 6,
            Fault::DeviceNotAvailable => 7,
            Fault::InvalidTss(_) => 10,
            Fault::SegmentNotPresent(_) => 11,
            Fault::StackFault(_) => 12,
            Fault::GeneralProtection(_) => 13,
            Fault::PageFault { .. } => 14,
            Fault::MemoryViolation { .. } => return None,
        })
    }

    /// Error code pushed when the fault is delivered in protected mode.
    pub fn error_code(&self) -> Option<u32> {
        match *self {
            Fault::InvalidTss(code)
            | Fault::SegmentNotPresent(code)
            | Fault::StackFault(code)
            | Fault::GeneralProtection(code) => Some(code as u32),
            Fault::PageFault { error_code, .. } => Some(error_code),
            _ => None,
        }
    }
}

/// Work an instruction hands to the surrounding machine instead of performing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssistReason {
    /// `CPUID`: the identification leaves belong to the machine model.
    Cpuid,
    /// `RDTSC`: the time source belongs to the machine model.
    Rdtsc,
    /// x87 escape opcode with the FPU available.
    Fpu,
    /// Protected-mode `IRET` (task and privilege transitions).
    Iret,
    /// Port access that needs the TSS I/O permission bitmap.
    IoPermission,
    /// Far transfer through a call/task gate or TSS descriptor.
    FarTransferGate,
    /// Far return or transfer to a different privilege level.
    PrivilegeTransfer,
    /// Descriptor-table instructions handled by the machine (`LLDT`, `LTR`, `LAR`, ...).
    SystemInstruction,
    /// Debug register access.
    DebugRegister,
    /// `INVLPG`: TLB management lives with the paging-aware bus.
    Invlpg,
}

/// Outcome of executing one instruction unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    /// Fall through to the next instruction.
    None,
    /// Unconditional transfer to `EIP = target` (CS may also have changed).
    Jump(u32),
    /// Conditional transfer; `target` is the taken destination.
    Conditional { taken: bool, target: u32 },
    /// `HLT`.
    Halt,
    /// Software interrupt to be delivered by the driver; EIP is already past the instruction.
    Interrupt(u8),
    /// The instruction must be completed by the driver; EIP stays at the instruction.
    Assist(AssistReason),
    /// The instruction faulted; EIP stays at the instruction.
    Trap(Fault),
}

impl Branch {
    /// Whether this outcome ends the enclosing block.
    pub fn exits_block(&self) -> bool {
        !matches!(self, Branch::None)
    }
}

impl From<Fault> for Branch {
    fn from(fault: Fault) -> Self {
        Branch::Trap(fault)
    }
}

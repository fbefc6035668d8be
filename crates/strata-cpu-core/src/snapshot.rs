//! Fixed-layout register snapshot used by the control surface.
//!
//! | words | contents |
//! |---|---|
//! | 0-7 | EAX ECX EDX EBX ESP EBP ESI EDI |
//! | 8 | EIP |
//! | 9 | EFLAGS |
//! | 10-15 | ES CS SS DS FS GS selectors |
//! | 16-21 | segment bases |
//! | 22-27 | segment limits |
//! | 28-33 | segment attributes (access byte, flags nibble << 8) |
//! | 34-37 | CR0 CR2 CR3 CR4 |
//! | 38 | GDTR base |
//! | 39 | GDTR limit, IDTR limit << 16 |
//! | 40 | IDTR base |
//! | 41 | halted (0 or 1) |

use serde::{Deserialize, Serialize};
use strata_x86::SegReg;
use thiserror::Error;

use crate::state::{CpuState, TableRegister};

pub const SNAPSHOT_WORDS: usize = 42;

const EIP: usize = 8;
const EFLAGS: usize = 9;
const SELECTORS: usize = 10;
const BASES: usize = 16;
const LIMITS: usize = 22;
const ATTRS: usize = 28;
const CR0: usize = 34;
const GDTR_BASE: usize = 38;
const TABLE_LIMITS: usize = 39;
const IDTR_BASE: usize = 40;
const HALTED: usize = 41;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("state snapshot must have {SNAPSHOT_WORDS} words, got {0}")]
pub struct SnapshotLenError(pub usize);

/// Processor state as a flat word array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<u32>", try_from = "Vec<u32>")]
pub struct StateSnapshot(pub [u32; SNAPSHOT_WORDS]);

impl StateSnapshot {
    pub fn words(&self) -> &[u32; SNAPSHOT_WORDS] {
        &self.0
    }
}

impl From<StateSnapshot> for Vec<u32> {
    fn from(s: StateSnapshot) -> Self {
        s.0.to_vec()
    }
}

impl TryFrom<Vec<u32>> for StateSnapshot {
    type Error = SnapshotLenError;

    fn try_from(v: Vec<u32>) -> Result<Self, Self::Error> {
        Self::try_from(v.as_slice())
    }
}

impl TryFrom<&[u32]> for StateSnapshot {
    type Error = SnapshotLenError;

    fn try_from(v: &[u32]) -> Result<Self, Self::Error> {
        let words: [u32; SNAPSHOT_WORDS] =
            v.try_into().map_err(|_| SnapshotLenError(v.len()))?;
        Ok(Self(words))
    }
}

impl CpuState {
    pub fn snapshot(&self) -> StateSnapshot {
        let mut w = [0u32; SNAPSHOT_WORDS];
        for i in 0..8u8 {
            w[i as usize] = self.reg32(i);
        }
        w[EIP] = self.eip;
        w[EFLAGS] = self.eflags();
        for seg in SegReg::ALL {
            let i = seg.index();
            let cache = self.seg(seg);
            w[SELECTORS + i] = cache.selector as u32;
            w[BASES + i] = cache.base;
            w[LIMITS + i] = cache.limit;
            w[ATTRS + i] = cache.attributes();
        }
        w[CR0] = self.cr0;
        w[CR0 + 1] = self.cr2;
        w[CR0 + 2] = self.cr3;
        w[CR0 + 3] = self.cr4;
        w[GDTR_BASE] = self.gdtr.base;
        w[TABLE_LIMITS] = self.gdtr.limit as u32 | (self.idtr.limit as u32) << 16;
        w[IDTR_BASE] = self.idtr.base;
        w[HALTED] = self.halted as u32;
        StateSnapshot(w)
    }

    /// Load every field from `snapshot`. The mode follows from the restored CR0.PE and
    /// EFLAGS.VM.
    pub fn restore(&mut self, snapshot: &StateSnapshot) {
        let w = &snapshot.0;
        for i in 0..8u8 {
            self.set_reg32(i, w[i as usize]);
        }
        self.eip = w[EIP];
        self.set_eflags(w[EFLAGS]);
        for seg in SegReg::ALL {
            let i = seg.index();
            let cache = self.seg_mut(seg);
            cache.selector = w[SELECTORS + i] as u16;
            cache.base = w[BASES + i];
            cache.limit = w[LIMITS + i];
            cache.set_attributes(w[ATTRS + i]);
        }
        self.cr0 = w[CR0];
        self.cr2 = w[CR0 + 1];
        self.cr3 = w[CR0 + 2];
        self.cr4 = w[CR0 + 3];
        self.gdtr = TableRegister {
            base: w[GDTR_BASE],
            limit: w[TABLE_LIMITS] as u16,
        };
        self.idtr = TableRegister {
            base: w[IDTR_BASE],
            limit: (w[TABLE_LIMITS] >> 16) as u16,
        };
        self.halted = w[HALTED] != 0;
    }
}

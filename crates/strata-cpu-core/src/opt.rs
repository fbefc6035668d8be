//! Dead status-flag elimination over a basic block.

use crate::block::BasicBlock;
use crate::state::Eflags;

/// Narrow each unit's live-flag mask to the flags some later observer reads.
///
/// The block exit, and every unit that may leave the block early, observe all
/// six status flags. Only flags a unit defines on every execution kill
/// liveness. Returns whether any mask changed.
pub fn eliminate_dead_flags(block: &mut BasicBlock) -> bool {
    let mut changed = false;
    let mut live = Eflags::STATUS;

    for unit in block.units_mut().iter_mut().rev() {
        let insn = *unit.insn();
        let effect = insn.flag_effect();
        let early = insn.may_exit_early();

        let needed = if early {
            effect.may
        } else {
            effect.may & live
        };
        if needed != unit.live_flags() {
            changed = true;
            unit.set_live_flags(needed);
        }

        live = if early {
            Eflags::STATUS
        } else {
            (live - effect.must) | insn.flags_read()
        };
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockAssembler, BlockKey};
    use crate::mem::PhysicalMemory;
    use crate::state::CpuMode;

    fn assemble(code: &[u8]) -> BasicBlock {
        let mut mem = PhysicalMemory::new(0x10000);
        mem.load(0x1000, code).unwrap();
        BlockAssembler::default()
            .assemble(
                &mut mem,
                BlockKey {
                    cs_base: 0,
                    eip: 0x1000,
                    mode: CpuMode::Protected,
                    default_32: true,
                },
            )
            .unwrap()
    }

    #[test]
    fn overwritten_flags_are_dead() {
        // add eax, ebx; sub eax, ecx; jz +0
        let mut block = assemble(&[0x01, 0xD8, 0x29, 0xC8, 0x74, 0x00]);
        assert!(eliminate_dead_flags(&mut block));
        let units = block.units();
        assert_eq!(units[0].live_flags(), Eflags::empty());
        assert_eq!(units[1].live_flags(), Eflags::STATUS);
    }

    #[test]
    fn carry_consumer_keeps_cf_alive() {
        // add eax, ebx; adc edx, 0 (83 D2 00); inc ecx; ret
        let mut block = assemble(&[0x01, 0xD8, 0x83, 0xD2, 0x00, 0x41, 0xC3]);
        eliminate_dead_flags(&mut block);
        let units = block.units();
        assert_eq!(units[0].live_flags(), Eflags::CF);
        // INC leaves CF untouched, so ADC's CF stays live to the exit.
        assert_eq!(units[1].live_flags(), Eflags::CF);
        assert_eq!(units[2].live_flags(), crate::alu::INCDEC_FLAGS);
    }

    #[test]
    fn memory_access_pins_all_flags() {
        // add eax, ebx; mov ecx, [eax]; xor eax, eax; ret
        let mut block = assemble(&[0x01, 0xD8, 0x8B, 0x08, 0x31, 0xC0, 0xC3]);
        eliminate_dead_flags(&mut block);
        assert_eq!(block.units()[0].live_flags(), Eflags::STATUS);
    }
}

#![cfg(not(target_arch = "wasm32"))]

use proptest::prelude::*;
use strata_x86::{resolve, AddressSize, DecodeCursor, ModRm, Prefixes};

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 2048,
        .. ProptestConfig::default()
    })]

    #[test]
    fn resolve_never_panics_and_respects_length_limits(
        bytes in proptest::collection::vec(any::<u8>(), 1..=15),
        addr32 in any::<bool>(),
    ) {
        let addr_size = if addr32 { AddressSize::Bits32 } else { AddressSize::Bits16 };
        let mut cursor = DecodeCursor::new(&bytes, 0);
        let Ok(prefixes) = Prefixes::scan(&mut cursor) else { return Ok(()); };
        let Ok(modrm) = ModRm::read(&mut cursor) else { return Ok(()); };
        if let Ok(op) = resolve(&mut cursor, modrm, &prefixes, addr_size) {
            prop_assert!(cursor.position() <= bytes.len());
            prop_assert!(cursor.instruction_len() <= strata_x86::MAX_INST_LEN);
            if let Some(m) = op.memory() {
                prop_assert_eq!(m.disp & !addr_size.mask(), 0, "disp={:#x} {:?}", m.disp, addr_size);
                let ea = m.effective_address(|_| u32::MAX);
                prop_assert_eq!(ea & !addr_size.mask(), 0);
            }
        }
    }
}

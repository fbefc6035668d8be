use serde::{Deserialize, Serialize};

use crate::block::DEFAULT_MAX_BLOCK_INSTS;

pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Tunables for block assembly, compilation and caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Upper bound on units per block.
    pub max_block_insts: usize,
    /// Number of compiled blocks kept before the oldest is evicted.
    pub cache_capacity: usize,
    /// Run dead-flag elimination when compiling blocks.
    pub flag_elimination: bool,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            max_block_insts: DEFAULT_MAX_BLOCK_INSTS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            flag_elimination: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: CpuConfig = serde_json::from_str(r#"{"max_block_insts": 8}"#).unwrap();
        assert_eq!(cfg.max_block_insts, 8);
        assert_eq!(cfg.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert!(cfg.flag_elimination);
    }
}

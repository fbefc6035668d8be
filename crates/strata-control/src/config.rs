//! Control-surface configuration, read from `STRATA_*` environment variables.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strata_cpu_core::config::CpuConfig;
use strata_cpu_core::state::CpuMode;
use thiserror::Error;

pub const DEFAULT_MEMORY_SIZE: usize = 16 * 1024 * 1024;

pub const ENV_MEMORY_SIZE: &str = "STRATA_MEMORY_SIZE";
pub const ENV_MAX_BLOCK_INSTS: &str = "STRATA_MAX_BLOCK_INSTS";
pub const ENV_CACHE_CAPACITY: &str = "STRATA_CACHE_CAPACITY";
pub const ENV_FLAG_ELIMINATION: &str = "STRATA_FLAG_ELIMINATION";
pub const ENV_START_MODE: &str = "STRATA_START_MODE";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for env var {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Guest physical memory in bytes.
    pub memory_size: usize,
    pub cpu: CpuConfig,
    /// Mode the processor state is created in.
    pub start_mode: CpuMode,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
            cpu: CpuConfig::default(),
            start_mode: CpuMode::Real,
        }
    }
}

impl ControlConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from an arbitrary variable source; unset variables keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(size) = parse_var(&lookup, ENV_MEMORY_SIZE, parse_size)? {
            config.memory_size = size;
        }
        if let Some(n) = parse_var(&lookup, ENV_MAX_BLOCK_INSTS, |s| s.parse().ok())? {
            config.cpu.max_block_insts = n;
        }
        if let Some(n) = parse_var(&lookup, ENV_CACHE_CAPACITY, |s| s.parse().ok())? {
            config.cpu.cache_capacity = n;
        }
        if let Some(on) = parse_var(&lookup, ENV_FLAG_ELIMINATION, parse_bool)? {
            config.cpu.flag_elimination = on;
        }
        if let Some(mode) = parse_var(&lookup, ENV_START_MODE, parse_mode)? {
            config.start_mode = mode;
        }
        Ok(config)
    }
}

fn parse_var<F, T>(
    lookup: &F,
    var: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    parse(trimmed)
        .map(Some)
        .ok_or(ConfigError::InvalidEnv { var, value: raw })
}

/// Byte count with an optional `K`/`M`/`G` suffix or `0x` prefix.
pub fn parse_size(s: &str) -> Option<usize> {
    let (digits, shift) = match s.as_bytes().last()? {
        b'k' | b'K' => (&s[..s.len() - 1], 10),
        b'm' | b'M' => (&s[..s.len() - 1], 20),
        b'g' | b'G' => (&s[..s.len() - 1], 30),
        _ => (s, 0),
    };
    let value = match digits.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16).ok()?,
        None => usize::from_str(digits).ok()?,
    };
    value.checked_mul(1usize << shift)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_mode(s: &str) -> Option<CpuMode> {
    match s.to_ascii_lowercase().as_str() {
        "real" => Some(CpuMode::Real),
        "protected" | "pm" => Some(CpuMode::Protected),
        "v86" | "vm86" | "virtual8086" => Some(CpuMode::Virtual8086),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = ControlConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ControlConfig::default());
    }

    #[test]
    fn reads_every_variable() {
        let config = ControlConfig::from_lookup(lookup(&[
            (ENV_MEMORY_SIZE, "2M"),
            (ENV_MAX_BLOCK_INSTS, "16"),
            (ENV_CACHE_CAPACITY, "32"),
            (ENV_FLAG_ELIMINATION, "off"),
            (ENV_START_MODE, "protected"),
        ]))
        .unwrap();
        assert_eq!(config.memory_size, 2 << 20);
        assert_eq!(config.cpu.max_block_insts, 16);
        assert_eq!(config.cpu.cache_capacity, 32);
        assert!(!config.cpu.flag_elimination);
        assert_eq!(config.start_mode, CpuMode::Protected);
    }

    #[test]
    fn rejects_garbage() {
        let err = ControlConfig::from_lookup(lookup(&[(ENV_FLAG_ELIMINATION, "maybe")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidEnv {
                var: ENV_FLAG_ELIMINATION,
                value: "maybe".into()
            }
        );
    }

    #[test]
    fn sizes_accept_suffixes_and_hex() {
        assert_eq!(parse_size("4096"), Some(4096));
        assert_eq!(parse_size("0x1000"), Some(0x1000));
        assert_eq!(parse_size("64k"), Some(64 << 10));
        assert_eq!(parse_size("1G"), Some(1 << 30));
        assert_eq!(parse_size("M"), None);
    }
}

use crate::{MemoError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

pub const SWEEP_THRESHOLD_ENV: &str = "WEAKMEMO_SWEEP_THRESHOLD";
pub const ENABLE_STATS_ENV: &str = "WEAKMEMO_ENABLE_STATS";

/// Tuning knobs shared by private and shared memo caches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoConfig {
    /// Number of weakly-keyed entries a store may hold before `set` sweeps stale ones
    pub sweep_threshold: usize,
    /// Record hit/miss counters
    pub enable_stats: bool,
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            sweep_threshold: 64,
            enable_stats: true,
        }
    }
}

impl MemoConfig {
    /// Build a config from defaults overridden by `WEAKMEMO_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(threshold) = read_env::<usize>(SWEEP_THRESHOLD_ENV)? {
            config.sweep_threshold = threshold;
        }
        if let Some(enabled) = read_env::<bool>(ENABLE_STATS_ENV)? {
            config.enable_stats = enabled;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_threshold == 0 {
            return Err(MemoError::InvalidConfig(
                "sweep_threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_env<T: FromStr>(name: &'static str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| MemoError::EnvVar { name, value: raw }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MemoConfig::default();
        assert_eq!(config.sweep_threshold, 64);
        assert!(config.enable_stats);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let config = MemoConfig {
            sweep_threshold: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MemoError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MemoConfig = serde_json::from_str(r#"{"enable_stats": false}"#).unwrap();
        assert_eq!(config.sweep_threshold, 64);
        assert!(!config.enable_stats);
    }

    #[test]
    fn test_env_overrides() {
        // Only this test touches the WEAKMEMO_* variables.
        env::set_var(SWEEP_THRESHOLD_ENV, "128");
        env::set_var(ENABLE_STATS_ENV, "false");
        let config = MemoConfig::from_env().unwrap();
        assert_eq!(config.sweep_threshold, 128);
        assert!(!config.enable_stats);

        env::set_var(SWEEP_THRESHOLD_ENV, "lots");
        let err = MemoConfig::from_env().unwrap_err();
        assert!(matches!(err, MemoError::EnvVar { name, .. } if name == SWEEP_THRESHOLD_ENV));

        env::remove_var(SWEEP_THRESHOLD_ENV);
        env::remove_var(ENABLE_STATS_ENV);
    }
}

//! Engine configuration
//!
//! Priority: CLI `--config FILE` → `FRAMEDEX_CONFIG` environment variable →
//! built-in defaults. Files are JSON; missing fields fall back to defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Environment variable holding a config file path
pub const CONFIG_ENV: &str = "FRAMEDEX_CONFIG";

/// Tunables for indexing, seeking and shutdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bounded wait for the first two PTS before extrapolation gives up
    pub index_wait_ms: u64,
    /// Bounded join for builder threads and the streaming worker
    pub join_timeout_ms: u64,
    /// Dynamic-mode FrameIndex publish interval (frames)
    pub flush_every: usize,
    /// Recent PTS steps averaged when extrapolating
    pub extrapolation_window: usize,
    /// Leading keyframes used to estimate keyframe spacing for scrubbing
    pub keyframe_sample: usize,
    /// Decimal digits for decoded-time comparisons; derived from the time base when unset
    pub time_digits: Option<u32>,
    /// Decoder threads, 0 = automatic
    pub decode_threads: usize,
    /// Spawn a streaming worker in `start_streaming`
    pub streaming: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_wait_ms: 2000,
            join_timeout_ms: 500,
            flush_every: 64,
            extrapolation_window: 10,
            keyframe_sample: 5,
            time_digits: None,
            decode_threads: 0,
            streaming: true,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file and validate
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// CLI path if given, else `FRAMEDEX_CONFIG`, else defaults
    pub fn resolve(cli_path: Option<PathBuf>) -> Result<Self> {
        let path = cli_path.or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from));
        match path {
            Some(p) => Self::load(&p),
            None => Ok(Self::default()),
        }
    }

    /// Same as `resolve(None)`
    pub fn from_env_or_default() -> Result<Self> {
        Self::resolve(None)
    }

    pub fn validate(&self) -> Result<()> {
        if self.flush_every == 0 {
            return Err(EngineError::Config("flush_every must be > 0".into()));
        }
        if self.extrapolation_window == 0 {
            return Err(EngineError::Config("extrapolation_window must be > 0".into()));
        }
        if self.keyframe_sample < 2 {
            return Err(EngineError::Config("keyframe_sample must be >= 2".into()));
        }
        if let Some(d) = self.time_digits {
            if d > 9 {
                return Err(EngineError::Config("time_digits must be <= 9".into()));
            }
        }
        Ok(())
    }

    pub fn index_wait(&self) -> Duration {
        Duration::from_millis(self.index_wait_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Test: partial JSON fills the rest from defaults
    #[test]
    fn test_load_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "index_wait_ms": 50, "time_digits": 3 }}"#).unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.index_wait(), Duration::from_millis(50));
        assert_eq!(config.time_digits, Some(3));
        assert_eq!(config.flush_every, EngineConfig::default().flush_every);
    }

    /// Test: invalid values are rejected at load time
    #[test]
    fn test_load_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "flush_every": 0 }}"#).unwrap();
        assert!(matches!(
            EngineConfig::load(file.path()),
            Err(EngineError::Config(_))
        ));

        let mut bad_json = tempfile::NamedTempFile::new().unwrap();
        write!(bad_json, "not json").unwrap();
        assert!(EngineConfig::load(bad_json.path()).is_err());
    }

    /// Test: CLI path wins over defaults
    #[test]
    fn test_resolve_cli() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "streaming": false }}"#).unwrap();
        let config = EngineConfig::resolve(Some(file.path().to_path_buf())).unwrap();
        assert!(!config.streaming);
    }
}

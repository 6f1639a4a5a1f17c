use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::remote::RetryPolicy;
use crate::{klog_debug, Error, Result};

fn default_submit_max_attempts() -> u32 {
    3
}

fn default_submit_base_delay_ms() -> u64 {
    500
}

fn default_submit_max_delay_ms() -> u64 {
    30_000
}

fn default_event_capacity() -> usize {
    256
}

/// Coordinator tuning knobs, loaded from ~/.kiln/kiln.toml.
///
/// Everything has a default; a missing config file is not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Attempts before a transiently failing submission becomes SYSTEM_ERROR.
    #[serde(default = "default_submit_max_attempts")]
    pub submit_max_attempts: u32,
    /// First retry delay; doubles per attempt.
    #[serde(default = "default_submit_base_delay_ms")]
    pub submit_base_delay_ms: u64,
    /// Backoff delay cap.
    #[serde(default = "default_submit_max_delay_ms")]
    pub submit_max_delay_ms: u64,
    /// Capacity of the coordination event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            submit_max_attempts: default_submit_max_attempts(),
            submit_base_delay_ms: default_submit_base_delay_ms(),
            submit_max_delay_ms: default_submit_max_delay_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Config {
    pub fn kiln_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".kiln"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::kiln_dir()?.join("kiln.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from an explicit path, falling back to defaults when absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        klog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            klog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        klog_debug!(
            "Config loaded: attempts={}, base_delay_ms={}, max_delay_ms={}",
            config.submit_max_attempts,
            config.submit_base_delay_ms,
            config.submit_max_delay_ms
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let kiln_dir = Self::kiln_dir()?;
        if !kiln_dir.exists() {
            fs::create_dir_all(&kiln_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        klog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// Derive the remote submission retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.submit_max_attempts,
            base_delay: Duration::from_millis(self.submit_base_delay_ms),
            max_delay: Duration::from_millis(self.submit_max_delay_ms),
        }
    }
}

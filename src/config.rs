//! Per-device configuration.
//!
//! Every field has a default, so a minimal JSON document only needs a host:
//!
//! ```json
//! {
//!   "host": "192.168.1.50",
//!   "polling": { "mode": "adaptive", "active_secs": 5, "idle_secs": 15, "off_secs": 30 },
//!   "burst": { "enabled": true },
//!   "max_failures": 10,
//!   "command_preset": "mcs7"
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fields::{CommandPreset, CommandSpec, FieldSpec, FieldTable};
use crate::logger::MessageLogMode;
use crate::protocol::{DEFAULT_PORT, normalize_host};
use crate::scheduler::{AdaptiveIntervals, BurstSettings, PollScheduler, PollingMode};
use crate::{Error, Result};

pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_ADAPTIVE_ACTIVE_SECS: u64 = 5;
pub const DEFAULT_ADAPTIVE_IDLE_SECS: u64 = 15;
pub const DEFAULT_ADAPTIVE_OFF_SECS: u64 = 30;
pub const DEFAULT_MAX_FAILURES: u32 = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PollingConfig {
    Fixed {
        #[serde(default = "default_scan_interval")]
        interval_secs: u64,
    },
    Adaptive {
        #[serde(default = "default_active")]
        active_secs: u64,
        #[serde(default = "default_idle")]
        idle_secs: u64,
        #[serde(default = "default_off")]
        off_secs: u64,
    },
}

fn default_scan_interval() -> u64 {
    DEFAULT_SCAN_INTERVAL_SECS
}

fn default_active() -> u64 {
    DEFAULT_ADAPTIVE_ACTIVE_SECS
}

fn default_idle() -> u64 {
    DEFAULT_ADAPTIVE_IDLE_SECS
}

fn default_off() -> u64 {
    DEFAULT_ADAPTIVE_OFF_SECS
}

impl Default for PollingConfig {
    fn default() -> Self {
        PollingConfig::Fixed {
            interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
        }
    }
}

impl PollingConfig {
    pub fn to_mode(&self) -> PollingMode {
        match *self {
            PollingConfig::Fixed { interval_secs } => {
                PollingMode::Fixed(Duration::from_secs(interval_secs))
            }
            PollingConfig::Adaptive {
                active_secs,
                idle_secs,
                off_secs,
            } => PollingMode::Adaptive(AdaptiveIntervals {
                active: Duration::from_secs(active_secs),
                idle: Duration::from_secs(idle_secs),
                off: Duration::from_secs(off_secs),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub polls: u32,
}

impl Default for BurstConfig {
    fn default() -> Self {
        let defaults = BurstSettings::default();
        Self {
            enabled: defaults.enabled,
            interval_secs: defaults.interval.as_secs(),
            polls: defaults.polls,
        }
    }
}

impl BurstConfig {
    pub fn to_settings(&self) -> BurstSettings {
        BurstSettings {
            enabled: self.enabled,
            interval: Duration::from_secs(self.interval_secs),
            polls: self.polls,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageLogConfig {
    pub path: String,
    #[serde(default)]
    pub mode: MessageLogMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,
    pub polling: PollingConfig,
    pub burst: BurstConfig,
    /// Consecutive failed polls tolerated before the device is unavailable.
    pub max_failures: u32,
    pub timeout_secs: u64,
    pub command_preset: CommandPreset,
    /// Explicit command map; replaces the preset when set.
    pub commands: Option<CommandSpec>,
    /// Explicit field table; replaces the built-in table when set.
    pub fields: Option<Vec<FieldSpec>>,
    pub message_log: Option<MessageLogConfig>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            polling: PollingConfig::default(),
            burst: BurstConfig::default(),
            max_failures: DEFAULT_MAX_FAILURES,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            command_preset: CommandPreset::default(),
            commands: None,
            fields: None,
            message_log: None,
        }
    }
}

impl DeviceConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("invalid device config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if normalize_host(&self.host).is_empty() {
            return Err(Error::Configuration("host must not be empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Configuration(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.burst.enabled && (self.burst.polls == 0 || self.burst.interval_secs == 0) {
            return Err(Error::Configuration(
                "burst mode needs a non-zero interval and poll count".to_string(),
            ));
        }
        if let Some(ref fields) = self.fields {
            let mut seen = HashSet::new();
            for spec in fields {
                if !seen.insert(spec.key.as_str()) {
                    return Err(Error::Configuration(format!(
                        "field '{}' is defined more than once",
                        spec.key
                    )));
                }
                spec.validate()?;
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn command_spec(&self) -> CommandSpec {
        self.commands
            .clone()
            .unwrap_or_else(|| CommandSpec::preset(self.command_preset))
    }

    pub fn field_table(&self) -> FieldTable {
        self.fields
            .clone()
            .map(FieldTable::from)
            .unwrap_or_default()
    }

    pub fn scheduler(&self) -> PollScheduler {
        PollScheduler::new(self.polling.to_mode(), self.burst.to_settings())
    }

    /// Name used in logs, `host` or `host:port`.
    pub fn display_name(&self) -> String {
        let host = normalize_host(&self.host);
        if self.port == DEFAULT_PORT {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

//! Agent configuration file.
//!
//! Loaded from TOML; every field has a default and a missing file yields
//! the defaults. Default location: /etc/vswitch-agent/agent.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vswitch_orch_common::{ColdStartPolicy, PersistConfig};

use crate::error::{AgentError, AgentResult};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/vswitch-agent/agent.toml";

/// Identity registry persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceSection {
    #[serde(default = "default_persistence_enabled")]
    pub enabled: bool,

    /// Directory holding one JSON file per persisted registry
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Interval between persistence cycles
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Upper bound of the random delay before the first write
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

/// Resync behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncSection {
    /// What to do with dumped interfaces when nothing was persisted
    #[serde(default)]
    pub cold_start_policy: ColdStartPolicy,

    /// Skip correlation when the dataplane holds nothing configurable
    #[serde(default = "default_skip_if_dataplane_empty")]
    pub skip_if_dataplane_empty: bool,
}

/// Interface configurator settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InterfacesSection {
    /// MTU applied when an interface config leaves it unset; 0 keeps the
    /// dataplane default
    #[serde(default)]
    pub default_mtu: u32,

    /// Whether host-side interfaces are managed alongside the dataplane.
    /// When false AF-Packet interfaces are created without waiting for
    /// their host interface.
    #[serde(default)]
    pub linux_interfaces: bool,
}

/// Complete agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub persistence: PersistenceSection,

    #[serde(default)]
    pub resync: ResyncSection,

    #[serde(default)]
    pub interfaces: InterfacesSection,
}

fn default_persistence_enabled() -> bool {
    true
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/vswitch-agent")
}

fn default_interval_ms() -> u64 {
    300
}

fn default_max_jitter_ms() -> u64 {
    3000
}

fn default_skip_if_dataplane_empty() -> bool {
    true
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            enabled: default_persistence_enabled(),
            state_dir: default_state_dir(),
            interval_ms: default_interval_ms(),
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

impl Default for ResyncSection {
    fn default() -> Self {
        Self {
            cold_start_policy: ColdStartPolicy::default(),
            skip_if_dataplane_empty: default_skip_if_dataplane_empty(),
        }
    }
}

impl AgentConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(content: &str) -> AgentResult<Self> {
        toml::from_str(content).map_err(|e| AgentError::InvalidAgentConfig(e.to_string()))
    }

    /// Loads configuration from file, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> AgentResult<Self> {
        let path = path.as_ref();

        let config: AgentConfig = match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| AgentError::ConfigLoad {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            Err(e) => return Err(AgentError::Io(e)),
        };
        config.validate()?;
        Ok(config)
    }

    /// Timing of the registry persistence loops.
    pub fn persist_config(&self) -> PersistConfig {
        PersistConfig {
            interval: Duration::from_millis(self.persistence.interval_ms),
            max_jitter: Duration::from_millis(self.persistence.max_jitter_ms),
        }
    }

    pub fn validate(&self) -> AgentResult<()> {
        if self.persistence.enabled && self.persistence.interval_ms == 0 {
            return Err(AgentError::InvalidAgentConfig(
                "persistence.interval_ms must be > 0".to_string(),
            ));
        }
        if self.persistence.enabled && self.persistence.state_dir.as_os_str().is_empty() {
            return Err(AgentError::InvalidAgentConfig(
                "persistence.state_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

//! Desired state documents and keyed data changes.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use vswitch_orch_common::{ConfigResult, Configurator};

use crate::bfd::{BfdEchoConfig, BfdKeyConfig, BfdSessionConfig};
use crate::error::{AgentError, AgentResult};
use crate::intf::InterfaceConfig;
use crate::nat::{DNatConfig, Nat44GlobalConfig};
use crate::srv6::{LocalSidConfig, PolicyConfig, SteeringConfig};
use crate::stn::StnConfig;

/// Full desired configuration, as handed to a resync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesiredState {
    /// Host interfaces known to exist, for af-packet interfaces.
    pub linux_interfaces: Vec<String>,
    pub interfaces: Vec<InterfaceConfig>,
    pub bfd_keys: Vec<BfdKeyConfig>,
    pub bfd_sessions: Vec<BfdSessionConfig>,
    pub bfd_echo: Option<BfdEchoConfig>,
    pub stn_rules: Vec<StnConfig>,
    pub nat_global: Option<Nat44GlobalConfig>,
    pub dnats: Vec<DNatConfig>,
    pub local_sids: Vec<LocalSidConfig>,
    pub sr_policies: Vec<PolicyConfig>,
    pub sr_steerings: Vec<SteeringConfig>,
}

impl DesiredState {
    pub fn from_json_str(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Loads a JSON document.
    pub fn load(path: impl AsRef<Path>) -> AgentResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| AgentError::DesiredLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&content).map_err(|e| AgentError::DesiredLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Previous and new value of one key. `None` means absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change<T> {
    pub prev: Option<T>,
    pub new: Option<T>,
}

impl<T> Change<T> {
    pub fn create(new: T) -> Self {
        Self {
            prev: None,
            new: Some(new),
        }
    }

    pub fn update(prev: T, new: T) -> Self {
        Self {
            prev: Some(prev),
            new: Some(new),
        }
    }

    pub fn remove(prev: T) -> Self {
        Self {
            prev: Some(prev),
            new: None,
        }
    }

    /// Routes the change to configure, modify or delete.
    pub fn apply_to<C>(self, configurator: &mut C) -> ConfigResult<()>
    where
        C: Configurator<T>,
    {
        match (self.prev, self.new) {
            (None, Some(new)) => configurator.configure(&new),
            (Some(prev), Some(new)) => configurator.modify(&prev, &new),
            (Some(prev), None) => configurator.delete(&prev),
            (None, None) => Ok(()),
        }
    }
}

/// A keyed change delivered to a running agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataChange {
    Interface(Change<InterfaceConfig>),
    BfdKey(Change<BfdKeyConfig>),
    BfdSession(Change<BfdSessionConfig>),
    BfdEcho(Change<BfdEchoConfig>),
    Stn(Change<StnConfig>),
    Nat(Change<Nat44GlobalConfig>),
    DNat(Change<DNatConfig>),
    LocalSid(Change<LocalSidConfig>),
    SrPolicy(Change<PolicyConfig>),
    SrSteering(Change<SteeringConfig>),
    /// A host interface appeared or disappeared.
    LinuxInterface { name: String, present: bool },
}

impl DataChange {
    /// Resource family, for logs.
    pub fn family(&self) -> &'static str {
        match self {
            DataChange::Interface(_) => "interface",
            DataChange::BfdKey(_) => "bfd-key",
            DataChange::BfdSession(_) => "bfd-session",
            DataChange::BfdEcho(_) => "bfd-echo",
            DataChange::Stn(_) => "stn",
            DataChange::Nat(_) => "nat44",
            DataChange::DNat(_) => "nat44-dnat",
            DataChange::LocalSid(_) => "sr-localsid",
            DataChange::SrPolicy(_) => "sr-policy",
            DataChange::SrSteering(_) => "sr-steering",
            DataChange::LinuxInterface { .. } => "linux-interface",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intf::InterfaceKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_document() {
        let desired = DesiredState::from_json_str(
            r#"{
                "interfaces": [ { "name": "loop1", "kind": "loopback" } ],
                "stn_rules": [ { "interface": "loop1", "ip_address": "10.0.0.1/24" } ]
            }"#,
        )
        .unwrap();
        assert_eq!(desired.interfaces[0].kind, InterfaceKind::Loopback);
        assert_eq!(desired.stn_rules.len(), 1);
        assert!(desired.nat_global.is_none());
        assert!(desired.bfd_sessions.is_empty());
    }

    #[test]
    fn test_dnat_document() {
        let desired = DesiredState::from_json_str(
            r#"{
                "dnats": [ {
                    "label": "web",
                    "st_mappings": [ {
                        "external_ip": "80.80.80.80",
                        "external_port": 8080,
                        "protocol": "udp",
                        "local_ips": [ { "local_ip": "10.0.0.1", "local_port": 80 } ]
                    } ],
                    "id_mappings": [ { "addressed_interface": "loop1" } ]
                } ]
            }"#,
        )
        .unwrap();
        let dnat = &desired.dnats[0];
        assert_eq!(dnat.label, "web");
        assert!(dnat.validate().is_ok());
        assert_eq!(dnat.st_mappings[0].protocol, vswitch_dpapi::api::nat::NatProtocol::Udp);
        assert_eq!(dnat.id_mappings[0].addressed_interface.as_deref(), Some("loop1"));
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("desired.json");
        fs::write(&path, "{ not json").unwrap();
        match DesiredState::load(&path) {
            Err(AgentError::DesiredLoad { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_family() {
        let change = DataChange::Stn(Change::create(StnConfig::new("loop1", "10.0.0.1")));
        assert_eq!(change.family(), "stn");
    }
}

//! BFD types.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use vswitch_dpapi::api::bfd::{BfdAuthKey, BfdAuthType, BfdSessionAuth, BfdUdpSession};
use vswitch_orch_common::{ConfigError, ConfigResult};

/// Key reference of an authenticated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BfdSessionAuthentication {
    /// Id of a configured [`BfdKeyConfig`].
    pub key_id: u32,
    /// Key id advertised to the peer.
    pub advertised_key_id: u8,
}

/// A single-hop BFD session, keyed by its interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BfdSessionConfig {
    pub interface: String,
    pub source_address: IpAddr,
    pub destination_address: IpAddr,
    /// Microseconds.
    pub desired_min_tx_interval: u32,
    /// Microseconds.
    pub required_min_rx_interval: u32,
    pub detect_multiplier: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<BfdSessionAuthentication>,
}

impl BfdSessionConfig {
    pub fn new(interface: impl Into<String>, source: IpAddr, destination: IpAddr) -> Self {
        Self {
            interface: interface.into(),
            source_address: source,
            destination_address: destination,
            desired_min_tx_interval: 1_000_000,
            required_min_rx_interval: 1_000_000,
            detect_multiplier: 3,
            authentication: None,
        }
    }

    pub fn with_timers(mut self, desired_min_tx: u32, required_min_rx: u32, detect_mult: u8) -> Self {
        self.desired_min_tx_interval = desired_min_tx;
        self.required_min_rx_interval = required_min_rx;
        self.detect_multiplier = detect_mult;
        self
    }

    pub fn with_authentication(mut self, key_id: u32, advertised_key_id: u8) -> Self {
        self.authentication = Some(BfdSessionAuthentication {
            key_id,
            advertised_key_id,
        });
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.interface.is_empty() {
            return Err(ConfigError::invalid("bfd session", "interface name is empty"));
        }
        if self.source_address.is_ipv4() != self.destination_address.is_ipv4() {
            return Err(ConfigError::invalid(
                self.interface.clone(),
                "source and destination address families differ",
            ));
        }
        if self.detect_multiplier == 0 {
            return Err(ConfigError::invalid(
                self.interface.clone(),
                "detect multiplier must be non-zero",
            ));
        }
        Ok(())
    }

    /// Dataplane form of the session on interface `index`.
    pub fn to_session(&self, index: u32) -> BfdUdpSession {
        BfdUdpSession {
            index,
            local_addr: self.source_address,
            peer_addr: self.destination_address,
            desired_min_tx: self.desired_min_tx_interval,
            required_min_rx: self.required_min_rx_interval,
            detect_mult: self.detect_multiplier,
            auth: self.authentication.map(|a| BfdSessionAuth {
                conf_key_id: a.key_id,
                bfd_key_id: a.advertised_key_id,
            }),
        }
    }

    /// Returns true if only the timers differ, which the dataplane can
    /// change in place.
    pub fn timers_only_differ(&self, other: &BfdSessionConfig) -> bool {
        self.interface == other.interface
            && self.source_address == other.source_address
            && self.destination_address == other.destination_address
            && self.authentication == other.authentication
    }
}

/// A BFD authentication key, keyed by its numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BfdKeyConfig {
    pub id: u32,
    #[serde(default)]
    pub authentication_type: BfdAuthType,
    pub secret: String,
}

impl BfdKeyConfig {
    pub fn new(id: u32, authentication_type: BfdAuthType, secret: impl Into<String>) -> Self {
        Self {
            id,
            authentication_type,
            secret: secret.into(),
        }
    }

    pub fn key(&self) -> String {
        self.id.to_string()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.secret.is_empty() {
            return Err(ConfigError::invalid(
                format!("bfd key {}", self.id),
                "secret is empty",
            ));
        }
        Ok(())
    }

    pub fn to_key(&self) -> BfdAuthKey {
        BfdAuthKey {
            conf_key_id: self.id,
            auth_type: self.authentication_type,
            secret: self.secret.clone(),
        }
    }
}

/// The BFD echo function. At most one exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BfdEchoConfig {
    pub echo_source_interface: String,
}

impl BfdEchoConfig {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            echo_source_interface: interface.into(),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.echo_source_interface.is_empty() {
            return Err(ConfigError::invalid("bfd echo", "source interface is empty"));
        }
        Ok(())
    }
}

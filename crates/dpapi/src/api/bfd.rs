//! BFD messages: UDP sessions, authentication keys and the echo source.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::types::InterfaceIndex;

/// Message names used by BFD configuration.
pub const MESSAGES: &[&str] = &[
    "bfd_udp_add",
    "bfd_udp_mod",
    "bfd_udp_del",
    "bfd_auth_set_key",
    "bfd_auth_del_key",
    "bfd_udp_set_echo_source",
    "bfd_udp_del_echo_source",
    "bfd_udp_session_dump",
    "bfd_auth_keys_dump",
    "bfd_udp_get_echo_source",
];

/// Key reference carried by an authenticated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BfdSessionAuth {
    /// Configured key id (see [`BfdAuthKey::conf_key_id`]).
    pub conf_key_id: u32,
    /// Key id advertised on the wire.
    pub bfd_key_id: u8,
}

/// A single-hop BFD session over UDP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BfdUdpSession {
    pub index: InterfaceIndex,
    pub local_addr: IpAddr,
    pub peer_addr: IpAddr,
    pub desired_min_tx: u32,
    pub required_min_rx: u32,
    pub detect_mult: u8,
    pub auth: Option<BfdSessionAuth>,
}

/// BFD authentication type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BfdAuthType {
    #[default]
    KeyedSha1,
    MeticulousKeyedSha1,
}

/// A BFD authentication key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BfdAuthKey {
    pub conf_key_id: u32,
    pub auth_type: BfdAuthType,
    pub secret: String,
}

/// One entry of the key dump. The secret is never reported back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BfdAuthKeyDetails {
    pub conf_key_id: u32,
    pub auth_type: BfdAuthType,
    pub use_count: u32,
}

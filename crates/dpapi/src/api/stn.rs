//! STN (steal-the-NIC) rule messages.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::types::InterfaceIndex;

/// Message names used by STN configuration.
pub const MESSAGES: &[&str] = &["stn_add_del_rule", "stn_rules_dump"];

/// Punts traffic for `address` to the interface at `index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StnRule {
    pub address: IpAddr,
    pub index: InterfaceIndex,
}

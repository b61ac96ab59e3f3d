//! STN types.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use vswitch_dpapi::parse_address_strip_mask;
use vswitch_orch_common::{ConfigError, ConfigResult};

/// Steal-the-NIC rule: traffic for `ip_address` not claimed by the
/// dataplane is punted to `interface`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StnConfig {
    pub interface: String,
    /// Address, optionally with a mask which is ignored.
    pub ip_address: String,
}

impl StnConfig {
    pub fn new(interface: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            ip_address: ip_address.into(),
        }
    }

    /// Registry key of the rule.
    pub fn key(&self) -> String {
        rule_key(&self.interface)
    }

    /// Validates the rule and returns its address without mask.
    pub fn address(&self) -> ConfigResult<IpAddr> {
        if self.interface.is_empty() {
            return Err(ConfigError::invalid("stn rule", "interface name is empty"));
        }
        parse_address_strip_mask(&self.ip_address)
            .map_err(|e| ConfigError::invalid(self.key(), e.to_string()))
    }
}

/// Returns the registry key of the rule bound to `interface`.
pub fn rule_key(interface: &str) -> String {
    format!("stn-iface-{}", interface)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_is_stripped() {
        let rule = StnConfig::new("tap1", "10.1.1.3/24");
        assert_eq!(rule.address().unwrap(), "10.1.1.3".parse::<IpAddr>().unwrap());
        assert_eq!(rule.key(), "stn-iface-tap1");
    }

    #[test]
    fn test_invalid_rules() {
        assert!(StnConfig::new("tap1", "not-an-ip").address().unwrap_err().is_precondition());
        assert!(StnConfig::new("", "10.0.0.1").address().is_err());
    }
}

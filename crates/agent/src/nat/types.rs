//! NAT44 configuration types: the global settings and DNAT mappings.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;

use vswitch_dpapi::api::nat::{Nat44AddressRange, Nat44LocalAddress, NatProtocol, TwiceNat};
use vswitch_orch_common::{ConfigError, ConfigResult};

/// An interface with the NAT44 feature enabled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NatInterface {
    pub name: String,
    #[serde(default)]
    pub is_inside: bool,
}

impl NatInterface {
    pub fn inside(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_inside: true,
        }
    }

    pub fn outside(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_inside: false,
        }
    }
}

/// A pool of outside addresses. A pool given only one end is a single
/// address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPool {
    #[serde(default)]
    pub first_ip: Option<Ipv4Addr>,
    #[serde(default)]
    pub last_ip: Option<Ipv4Addr>,
    #[serde(default)]
    pub vrf_id: u32,
    #[serde(default)]
    pub twice_nat: bool,
}

impl AddressPool {
    pub fn range(first: Ipv4Addr, last: Ipv4Addr) -> Self {
        Self {
            first_ip: Some(first),
            last_ip: Some(last),
            ..Default::default()
        }
    }

    pub fn to_range(&self) -> ConfigResult<Nat44AddressRange> {
        let (first, last) = match (self.first_ip, self.last_ip) {
            (Some(first), Some(last)) => (first, last),
            (Some(one), None) | (None, Some(one)) => (one, one),
            (None, None) => {
                return Err(ConfigError::invalid("nat44 address pool", "pool has no address"))
            }
        };
        if u32::from(first) > u32::from(last) {
            return Err(ConfigError::invalid(
                "nat44 address pool",
                format!("first address {} is above last address {}", first, last),
            ));
        }
        Ok(Nat44AddressRange {
            first,
            last,
            vrf_id: self.vrf_id,
            twice_nat: self.twice_nat,
        })
    }
}

impl From<Nat44AddressRange> for AddressPool {
    fn from(range: Nat44AddressRange) -> Self {
        Self {
            first_ip: Some(range.first),
            last_ip: Some(range.last),
            vrf_id: range.vrf_id,
            twice_nat: range.twice_nat,
        }
    }
}

/// Global NAT44 configuration. A single instance exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nat44GlobalConfig {
    #[serde(default)]
    pub forwarding: bool,
    #[serde(default)]
    pub nat_interfaces: Vec<NatInterface>,
    #[serde(default)]
    pub address_pools: Vec<AddressPool>,
}

impl Nat44GlobalConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for interface in &self.nat_interfaces {
            if interface.name.is_empty() {
                return Err(ConfigError::invalid("nat44 global", "interface name is empty"));
            }
            if !seen.insert(interface.name.as_str()) {
                return Err(ConfigError::invalid(
                    "nat44 global",
                    format!("interface {} listed twice", interface.name),
                ));
            }
        }
        self.ranges().map(|_| ())
    }

    /// Address ranges of every pool, in order.
    pub fn ranges(&self) -> ConfigResult<Vec<Nat44AddressRange>> {
        self.address_pools.iter().map(AddressPool::to_range).collect()
    }
}

/// One backend address of a static mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalAddress {
    pub local_ip: Ipv4Addr,
    #[serde(default)]
    pub local_port: u16,
    /// Relative weight among the backends of a load-balanced mapping
    #[serde(default)]
    pub probability: u8,
}

impl LocalAddress {
    pub fn new(local_ip: Ipv4Addr, local_port: u16) -> Self {
        Self {
            local_ip,
            local_port,
            probability: 0,
        }
    }
}

/// A DNAT static mapping. One local address makes a plain mapping, several
/// make a load-balanced one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StaticMapping {
    /// Takes precedence over `external_ip`
    #[serde(default)]
    pub external_interface: Option<String>,
    #[serde(default)]
    pub external_ip: Option<Ipv4Addr>,
    #[serde(default)]
    pub external_port: u16,
    #[serde(default)]
    pub local_ips: Vec<LocalAddress>,
    #[serde(default)]
    pub protocol: NatProtocol,
    #[serde(default)]
    pub vrf_id: u32,
    #[serde(default)]
    pub twice_nat: TwiceNat,
}

impl StaticMapping {
    pub fn is_load_balanced(&self) -> bool {
        self.local_ips.len() > 1
    }

    /// Identifier of the mapping within the agent.
    pub fn id(&self) -> String {
        let external = match (&self.external_interface, self.external_ip) {
            (Some(name), _) => name.clone(),
            (None, Some(ip)) => ip.to_string(),
            (None, None) => "-".to_string(),
        };
        let local = self
            .local_ips
            .first()
            .map(|l| format!("{}:{}", l.local_ip, l.local_port))
            .unwrap_or_default();
        format!(
            "st:{}:{}/{:?}->{}@{}",
            external, self.external_port, self.protocol, local, self.vrf_id
        )
    }

    pub fn validate(&self, label: &str) -> ConfigResult<()> {
        let resource = format!("dnat {}", label);
        match self.local_ips.len() {
            0 => Err(ConfigError::invalid(resource, "static mapping has no local address")),
            1 => {
                if self.external_interface.is_none() && self.external_ip.is_none() {
                    return Err(ConfigError::invalid(
                        resource,
                        "static mapping needs an external address or interface",
                    ));
                }
                Ok(())
            }
            _ => {
                if self.external_ip.is_none() {
                    return Err(ConfigError::invalid(
                        resource,
                        "load-balanced mapping needs an external address",
                    ));
                }
                if self.external_port == 0 {
                    return Err(ConfigError::invalid(
                        resource,
                        "load-balanced mapping needs an external port",
                    ));
                }
                if let Some(local) = self.local_ips.iter().find(|l| l.local_port == 0) {
                    return Err(ConfigError::invalid(
                        resource,
                        format!("backend {} has no port", local.local_ip),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Backends of a load-balanced mapping as sent to the dataplane.
    pub fn backends(&self) -> Vec<Nat44LocalAddress> {
        self.local_ips
            .iter()
            .map(|l| Nat44LocalAddress {
                ip: l.local_ip,
                port: l.local_port,
                probability: l.probability,
            })
            .collect()
    }
}

/// A DNAT identity mapping: an address, or the address of an interface,
/// excluded from translation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityMapping {
    /// Takes precedence over `ip_address`
    #[serde(default)]
    pub addressed_interface: Option<String>,
    #[serde(default)]
    pub ip_address: Option<Ipv4Addr>,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub protocol: NatProtocol,
    #[serde(default)]
    pub vrf_id: u32,
}

impl IdentityMapping {
    pub fn id(&self) -> String {
        let address = match (&self.addressed_interface, self.ip_address) {
            (Some(name), _) => name.clone(),
            (None, Some(ip)) => ip.to_string(),
            (None, None) => "-".to_string(),
        };
        format!("id:{}:{}/{:?}@{}", address, self.port, self.protocol, self.vrf_id)
    }

    pub fn validate(&self, label: &str) -> ConfigResult<()> {
        if self.addressed_interface.is_none() && self.ip_address.is_none() {
            return Err(ConfigError::invalid(
                format!("dnat {}", label),
                "identity mapping needs an address or interface",
            ));
        }
        Ok(())
    }
}

/// A labelled group of DNAT mappings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DNatConfig {
    pub label: String,
    #[serde(default)]
    pub st_mappings: Vec<StaticMapping>,
    #[serde(default)]
    pub id_mappings: Vec<IdentityMapping>,
}

impl DNatConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_static(mut self, mapping: StaticMapping) -> Self {
        self.st_mappings.push(mapping);
        self
    }

    pub fn with_identity(mut self, mapping: IdentityMapping) -> Self {
        self.id_mappings.push(mapping);
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.label.is_empty() {
            return Err(ConfigError::invalid("dnat", "label is empty"));
        }
        for mapping in &self.st_mappings {
            mapping.validate(&self.label)?;
        }
        for mapping in &self.id_mappings {
            mapping.validate(&self.label)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_ended_pool() {
        let pool = AddressPool {
            last_ip: Some("1.2.3.4".parse().unwrap()),
            ..Default::default()
        };
        let range = pool.to_range().unwrap();
        assert_eq!(range.first, range.last);
        assert!(AddressPool::default().to_range().is_err());
    }

    #[test]
    fn test_inverted_pool_rejected() {
        let pool = AddressPool::range("10.0.0.9".parse().unwrap(), "10.0.0.1".parse().unwrap());
        assert!(pool.to_range().unwrap_err().is_precondition());
    }

    #[test]
    fn test_duplicate_interface_rejected() {
        let config = Nat44GlobalConfig {
            nat_interfaces: vec![NatInterface::inside("a"), NatInterface::outside("a")],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_defaults() {
        let config: Nat44GlobalConfig =
            serde_json::from_str(r#"{ "nat_interfaces": [ { "name": "tap1" } ] }"#).unwrap();
        assert!(!config.forwarding);
        assert!(!config.nat_interfaces[0].is_inside);
        assert!(config.address_pools.is_empty());
    }

    fn web() -> StaticMapping {
        StaticMapping {
            external_ip: Some("80.80.80.80".parse().unwrap()),
            external_port: 80,
            local_ips: vec![LocalAddress::new("10.0.0.1".parse().unwrap(), 8080)],
            ..Default::default()
        }
    }

    #[test]
    fn test_dnat_validation() {
        assert!(DNatConfig::new("web").with_static(web()).validate().is_ok());
        assert!(DNatConfig::new("").validate().is_err());
        assert!(DNatConfig::new("web")
            .with_identity(IdentityMapping::default())
            .validate()
            .is_err());

        let mut balanced = web();
        balanced
            .local_ips
            .push(LocalAddress::new("10.0.0.2".parse().unwrap(), 0));
        let err = balanced.validate("web").unwrap_err();
        assert!(err.to_string().contains("10.0.0.2"), "{}", err);
    }

    #[test]
    fn test_mapping_ids_distinguish_protocols() {
        let mut udp = web();
        udp.protocol = NatProtocol::Udp;
        assert_ne!(web().id(), udp.id());
        assert!(web().id().starts_with("st:80.80.80.80:80"));
        let identity = IdentityMapping {
            addressed_interface: Some("tap1".to_string()),
            ..Default::default()
        };
        assert_eq!(identity.id(), "id:tap1:0/Tcp@0");
    }
}

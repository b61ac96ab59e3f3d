//! NAT44 messages: global configuration and DNAT mappings.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::types::InterfaceIndex;

/// Message names used by NAT44 global configuration.
pub const MESSAGES: &[&str] = &[
    "nat44_forwarding_enable_disable",
    "nat44_interface_add_del_feature",
    "nat44_add_del_address_range",
    "nat44_forwarding_is_enabled",
    "nat44_interface_dump",
    "nat44_address_dump",
    "nat44_add_del_static_mapping",
    "nat44_add_del_lb_static_mapping",
    "nat44_add_del_identity_mapping",
    "nat44_static_mapping_dump",
    "nat44_lb_static_mapping_dump",
    "nat44_identity_mapping_dump",
];

/// NAT44 feature enabled on an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nat44Interface {
    pub index: InterfaceIndex,
    pub inside: bool,
}

/// A range of NAT44 pool addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nat44AddressRange {
    pub first: Ipv4Addr,
    pub last: Ipv4Addr,
    pub vrf_id: u32,
    pub twice_nat: bool,
}

/// L4 protocol of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NatProtocol {
    #[default]
    Tcp,
    Udp,
    Icmp,
}

impl NatProtocol {
    /// IANA protocol number as carried on the wire.
    pub fn number(self) -> u8 {
        match self {
            NatProtocol::Tcp => 6,
            NatProtocol::Udp => 17,
            NatProtocol::Icmp => 1,
        }
    }
}

/// Twice-NAT mode of a static mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwiceNat {
    #[default]
    Disabled,
    Enabled,
    /// Twice-NAT only for traffic looping back to the same local host
    SelfTwice,
}

/// Static 1:1 mapping. The tag is informational: add and delete match
/// mappings on every other field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nat44StaticMapping {
    pub tag: String,
    pub local_ip: Ipv4Addr,
    pub local_port: u16,
    /// Unspecified when `external_index` is set.
    pub external_ip: Ipv4Addr,
    pub external_port: u16,
    /// Interface whose address is the external address.
    pub external_index: Option<InterfaceIndex>,
    pub protocol: NatProtocol,
    pub vrf_id: u32,
    pub twice_nat: TwiceNat,
    /// Ports are ignored when set.
    pub address_only: bool,
}

impl Nat44StaticMapping {
    pub fn same_entry(&self, other: &Self) -> bool {
        Self {
            tag: String::new(),
            ..self.clone()
        } == Self {
            tag: String::new(),
            ..other.clone()
        }
    }
}

/// One backend of a load-balanced mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nat44LocalAddress {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub probability: u8,
}

/// Static mapping spreading one external address over several backends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nat44LbStaticMapping {
    pub tag: String,
    pub external_ip: Ipv4Addr,
    pub external_port: u16,
    pub protocol: NatProtocol,
    pub locals: Vec<Nat44LocalAddress>,
    pub vrf_id: u32,
    pub twice_nat: TwiceNat,
}

impl Nat44LbStaticMapping {
    pub fn same_entry(&self, other: &Self) -> bool {
        self.external_ip == other.external_ip
            && self.external_port == other.external_port
            && self.protocol == other.protocol
            && self.vrf_id == other.vrf_id
            && self.twice_nat == other.twice_nat
            && self.locals == other.locals
    }
}

/// Identity mapping: traffic to the address (or the interface address) is
/// left untranslated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nat44IdentityMapping {
    pub tag: String,
    pub ip: Option<Ipv4Addr>,
    pub index: Option<InterfaceIndex>,
    pub port: u16,
    pub protocol: NatProtocol,
    pub vrf_id: u32,
}

impl Nat44IdentityMapping {
    pub fn same_entry(&self, other: &Self) -> bool {
        self.ip == other.ip
            && self.index == other.index
            && self.port == other.port
            && self.protocol == other.protocol
            && self.vrf_id == other.vrf_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(tag: &str) -> Nat44StaticMapping {
        Nat44StaticMapping {
            tag: tag.to_string(),
            local_ip: "10.0.0.1".parse().unwrap(),
            local_port: 8080,
            external_ip: "80.80.80.80".parse().unwrap(),
            external_port: 80,
            external_index: None,
            protocol: NatProtocol::Tcp,
            vrf_id: 0,
            twice_nat: TwiceNat::Disabled,
            address_only: false,
        }
    }

    #[test]
    fn test_tag_does_not_identify_mapping() {
        assert!(mapping("web-static-0").same_entry(&mapping("dummy-tag")));
        let mut other = mapping("web-static-0");
        other.protocol = NatProtocol::Udp;
        assert!(!mapping("web-static-0").same_entry(&other));
    }

    #[test]
    fn test_protocol_serde() {
        let protocol: NatProtocol = serde_json::from_str("\"udp\"").unwrap();
        assert_eq!(protocol, NatProtocol::Udp);
        assert_eq!(protocol.number(), 17);
        let mode: TwiceNat = serde_json::from_str("\"self_twice\"").unwrap();
        assert_eq!(mode, TwiceNat::SelfTwice);
    }
}

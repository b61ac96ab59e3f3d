//! Interface configuration types and the recreate-vs-modify policy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use vswitch_dpapi::api::interface::MemifMode;
use vswitch_dpapi::{IpNetwork, MacAddress};
use vswitch_orch_common::{ConfigError, ConfigResult, Correlated};

/// Interface type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceKind {
    /// Built-in local interface; reported by dumps, never configured.
    Local,
    #[default]
    Loopback,
    /// Physical NIC. Never created or removed by the agent.
    Ethernet,
    Memif,
    Tap,
    Vxlan,
    AfPacket,
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InterfaceKind::Local => "local",
            InterfaceKind::Loopback => "loopback",
            InterfaceKind::Ethernet => "ethernet",
            InterfaceKind::Memif => "memif",
            InterfaceKind::Tap => "tap",
            InterfaceKind::Vxlan => "vxlan",
            InterfaceKind::AfPacket => "af_packet",
        };
        write!(f, "{}", s)
    }
}

/// Memif link parameters. All of them are fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemifLink {
    pub id: u32,
    pub socket_filename: String,
    pub master: bool,
    pub mode: MemifMode,
    pub ring_size: u32,
    pub buffer_size: u32,
    pub rx_queues: u32,
    pub tx_queues: u32,
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TapLink {
    pub host_if_name: String,
    pub rx_ring_size: u32,
    pub tx_ring_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VxlanLink {
    pub src_address: IpAddr,
    pub dst_address: IpAddr,
    pub vni: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AfPacketLink {
    /// Host-side interface the af-packet socket binds to.
    pub host_if_name: String,
}

/// Type-specific link parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InterfaceLink {
    #[default]
    None,
    Memif(MemifLink),
    Tap(TapLink),
    Vxlan(VxlanLink),
    AfPacket(AfPacketLink),
}

/// Desired configuration of one dataplane interface.
///
/// Also stored as the interface registry metadata, so dependent families
/// can read the addresses of a registered interface.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    pub kind: InterfaceKind,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<MacAddress>,
    /// 0 falls back to the configured default MTU.
    #[serde(default)]
    pub mtu: u32,
    /// VRF table; for vxlan the encapsulation VRF.
    #[serde(default)]
    pub vrf: u32,
    #[serde(default)]
    pub ip_addresses: Vec<IpNetwork>,
    #[serde(default)]
    pub link: InterfaceLink,
}

impl InterfaceConfig {
    pub fn new(name: impl Into<String>, kind: InterfaceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Default::default()
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_vrf(mut self, vrf: u32) -> Self {
        self.vrf = vrf;
        self
    }

    pub fn with_mac(mut self, mac: MacAddress) -> Self {
        self.mac = Some(mac);
        self
    }

    pub fn with_addresses(mut self, addresses: Vec<IpNetwork>) -> Self {
        self.ip_addresses = addresses;
        self
    }

    pub fn with_link(mut self, link: InterfaceLink) -> Self {
        self.link = link;
        self
    }

    /// MTU to program, 0 meaning leave the dataplane default.
    pub fn effective_mtu(&self, default_mtu: u32) -> u32 {
        if self.mtu != 0 {
            self.mtu
        } else {
            default_mtu
        }
    }

    /// Host interface an af-packet interface depends on.
    pub fn host_interface(&self) -> Option<&str> {
        match &self.link {
            InterfaceLink::AfPacket(af) if self.kind == InterfaceKind::AfPacket => {
                Some(&af.host_if_name)
            }
            _ => None,
        }
    }

    /// Addresses the agent may remove; link-local ones belong to the
    /// dataplane.
    pub fn removable_addresses(&self) -> impl Iterator<Item = &IpNetwork> {
        self.ip_addresses.iter().filter(|a| !a.is_link_local())
    }

    /// Rejects configs that cannot be realized, before any dataplane call.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.is_empty() {
            return Err(ConfigError::invalid("interface", "name is empty"));
        }
        let invalid =
            |reason: &str| -> ConfigResult<()> { Err(ConfigError::invalid(self.name.clone(), reason)) };
        match (self.kind, &self.link) {
            (InterfaceKind::Local, _) => invalid("the local interface cannot be configured"),
            (InterfaceKind::Loopback | InterfaceKind::Ethernet, InterfaceLink::None) => Ok(()),
            (InterfaceKind::Memif, InterfaceLink::Memif(memif)) => {
                if memif.socket_filename.is_empty() {
                    invalid("memif socket filename is empty")
                } else {
                    Ok(())
                }
            }
            (InterfaceKind::Tap, InterfaceLink::Tap(_)) => Ok(()),
            (InterfaceKind::Vxlan, InterfaceLink::Vxlan(vxlan)) => {
                if vxlan.src_address.is_ipv4() != vxlan.dst_address.is_ipv4() {
                    invalid("vxlan endpoints mix address families")
                } else {
                    Ok(())
                }
            }
            (InterfaceKind::AfPacket, InterfaceLink::AfPacket(af)) => {
                if af.host_if_name.is_empty() {
                    invalid("af-packet host interface name is empty")
                } else {
                    Ok(())
                }
            }
            (kind, _) => Err(ConfigError::invalid(
                self.name.clone(),
                format!("link parameters do not match kind {}", kind),
            )),
        }
    }
}

impl Correlated for InterfaceConfig {
    type Kind = InterfaceKind;

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> InterfaceKind {
        self.kind
    }
}

/// Returns true if moving from `old` to `new` requires destroying the
/// interface and creating it again.
pub fn needs_recreate(old: &InterfaceConfig, new: &InterfaceConfig) -> bool {
    if old.kind != new.kind {
        return true;
    }
    match new.kind {
        InterfaceKind::Memif | InterfaceKind::Tap | InterfaceKind::AfPacket => old.link != new.link,
        InterfaceKind::Vxlan => old.link != new.link || old.vrf != new.vrf,
        InterfaceKind::Local | InterfaceKind::Loopback | InterfaceKind::Ethernet => false,
    }
}

/// Returns true if a dumped interface already matches a desired one.
///
/// Unset optional fields of the desired config match anything.
pub fn same_config(observed: &InterfaceConfig, desired: &InterfaceConfig, default_mtu: u32) -> bool {
    let addresses = |c: &InterfaceConfig| -> BTreeSet<IpNetwork> {
        c.removable_addresses().copied().collect()
    };
    let mtu = desired.effective_mtu(default_mtu);
    observed.kind == desired.kind
        && observed.link == desired.link
        && observed.enabled == desired.enabled
        && observed.vrf == desired.vrf
        && desired.mac.map_or(true, |mac| observed.mac == Some(mac))
        && (mtu == 0 || observed.mtu == mtu)
        && addresses(observed) == addresses(desired)
}

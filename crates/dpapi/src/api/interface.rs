//! Interface messages.
//!
//! Covers creation and removal of software interfaces (loopback, memif, tap,
//! vxlan, af-packet), their runtime attributes and the interface dump.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::types::{InterfaceIndex, IpNetwork, MacAddress};

/// Message names used by interface configuration.
pub const MESSAGES: &[&str] = &[
    "create_loopback",
    "delete_loopback",
    "memif_create",
    "memif_delete",
    "memif_socket_filename_add_del",
    "memif_socket_filename_dump",
    "tap_create_v2",
    "tap_delete_v2",
    "vxlan_add_del_tunnel",
    "af_packet_create",
    "af_packet_delete",
    "sw_interface_tag_add_del",
    "sw_interface_set_flags",
    "sw_interface_set_mac_address",
    "sw_interface_set_mtu",
    "sw_interface_set_table",
    "sw_interface_add_del_address",
    "sw_interface_dump",
];

/// Interface type as reported by the dataplane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceType {
    /// The built-in local interface at index 0.
    Local,
    /// Physical NIC, owned by the dataplane.
    Ethernet,
    Loopback,
    Memif,
    Tap,
    Vxlan,
    AfPacket,
}

impl InterfaceType {
    /// Returns true if the agent can create and remove interfaces of this type.
    pub fn is_creatable(self) -> bool {
        !matches!(self, InterfaceType::Local | InterfaceType::Ethernet)
    }
}

/// Memif operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemifMode {
    #[default]
    Ethernet,
    Ip,
    PuntInject,
}

/// Memif creation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemifCreate {
    pub id: u32,
    pub socket_id: u32,
    pub master: bool,
    pub mode: MemifMode,
    pub ring_size: u32,
    pub buffer_size: u32,
    pub rx_queues: u32,
    pub tx_queues: u32,
    pub secret: String,
}

/// Tap creation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapCreate {
    pub host_if_name: String,
    pub rx_ring_size: u32,
    pub tx_ring_size: u32,
}

/// Vxlan tunnel parameters. Deletion repeats the creation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VxlanTunnel {
    pub src_address: IpAddr,
    pub dst_address: IpAddr,
    pub vni: u32,
    pub encap_vrf_id: u32,
}

/// Af-packet creation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AfPacketCreate {
    pub host_if_name: String,
}

/// Type-specific link parameters reported in an interface dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkDetails {
    None,
    Memif(MemifCreate),
    Tap(TapCreate),
    Vxlan(VxlanTunnel),
    AfPacket(AfPacketCreate),
}

/// One entry of the interface dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDetails {
    pub index: InterfaceIndex,
    /// Name generated by the dataplane (e.g. `loop0`, `memif1/2`).
    pub internal_name: String,
    /// Tag set by the agent, empty if never tagged.
    pub tag: String,
    pub if_type: InterfaceType,
    pub admin_up: bool,
    pub mac: Option<MacAddress>,
    pub mtu: u32,
    pub vrf_id: u32,
    pub addresses: Vec<IpNetwork>,
    pub link: LinkDetails,
}

impl InterfaceDetails {
    /// Returns the tag if set, otherwise the internal name.
    pub fn reported_name(&self) -> &str {
        if self.tag.is_empty() {
            &self.internal_name
        } else {
            &self.tag
        }
    }
}

/// One entry of the memif socket dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemifSocketDetails {
    pub socket_id: u32,
    pub filename: String,
}

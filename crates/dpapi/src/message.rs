//! Request, reply and dump message envelopes.

use std::net::Ipv6Addr;

use crate::api::bfd::{BfdAuthKey, BfdAuthKeyDetails, BfdUdpSession};
use crate::api::interface::{
    AfPacketCreate, InterfaceDetails, MemifCreate, MemifSocketDetails, TapCreate, VxlanTunnel,
};
use crate::api::nat::{
    Nat44AddressRange, Nat44IdentityMapping, Nat44Interface, Nat44LbStaticMapping,
    Nat44StaticMapping,
};
use crate::api::srv6::{
    LocalSid, SrPolicyAdd, SrPolicyDetails, SrPolicyModOp, SrSteering, SrSteeringDetails,
};
use crate::api::stn::StnRule;
use crate::types::{InterfaceIndex, IpNetwork, MacAddress};

/// A single write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CreateLoopback { mac: Option<MacAddress> },
    DeleteLoopback { index: InterfaceIndex },
    MemifSocketFilenameAdd { socket_id: u32, filename: String },
    CreateMemif(MemifCreate),
    DeleteMemif { index: InterfaceIndex },
    CreateTap(TapCreate),
    DeleteTap { index: InterfaceIndex },
    CreateVxlan(VxlanTunnel),
    DeleteVxlan(VxlanTunnel),
    CreateAfPacket(AfPacketCreate),
    DeleteAfPacket(AfPacketCreate),
    SetInterfaceTag { index: InterfaceIndex, tag: String },
    SetAdminState { index: InterfaceIndex, up: bool },
    SetMac { index: InterfaceIndex, mac: MacAddress },
    SetMtu { index: InterfaceIndex, mtu: u32 },
    SetVrf { index: InterfaceIndex, vrf_id: u32 },
    AddIpAddress { index: InterfaceIndex, address: IpNetwork },
    DelIpAddress { index: InterfaceIndex, address: IpNetwork },

    BfdUdpAdd(BfdUdpSession),
    BfdUdpMod(BfdUdpSession),
    BfdUdpDel(BfdUdpSession),
    BfdAuthSetKey(BfdAuthKey),
    BfdAuthDelKey { conf_key_id: u32 },
    BfdSetEchoSource { index: InterfaceIndex },
    BfdDelEchoSource,

    StnAddRule(StnRule),
    StnDelRule(StnRule),

    Nat44Forwarding { enable: bool },
    Nat44InterfaceFeature { interface: Nat44Interface, is_add: bool },
    Nat44AddressRange { range: Nat44AddressRange, is_add: bool },
    Nat44StaticMapping { mapping: Nat44StaticMapping, is_add: bool },
    Nat44LbStaticMapping { mapping: Nat44LbStaticMapping, is_add: bool },
    Nat44IdentityMapping { mapping: Nat44IdentityMapping, is_add: bool },

    SrLocalSidAdd(LocalSid),
    SrLocalSidDel { sid: Ipv6Addr },
    SrPolicyAdd(SrPolicyAdd),
    SrPolicyMod { bsid: Ipv6Addr, op: SrPolicyModOp },
    SrPolicyDel { bsid: Ipv6Addr },
    SrSteeringAdd(SrSteering),
    SrSteeringDel(SrSteering),
}

impl Request {
    /// Returns the dataplane message name of this request.
    pub fn name(&self) -> &'static str {
        match self {
            Request::CreateLoopback { .. } => "create_loopback",
            Request::DeleteLoopback { .. } => "delete_loopback",
            Request::MemifSocketFilenameAdd { .. } => "memif_socket_filename_add_del",
            Request::CreateMemif(_) => "memif_create",
            Request::DeleteMemif { .. } => "memif_delete",
            Request::CreateTap(_) => "tap_create_v2",
            Request::DeleteTap { .. } => "tap_delete_v2",
            Request::CreateVxlan(_) | Request::DeleteVxlan(_) => "vxlan_add_del_tunnel",
            Request::CreateAfPacket(_) => "af_packet_create",
            Request::DeleteAfPacket(_) => "af_packet_delete",
            Request::SetInterfaceTag { .. } => "sw_interface_tag_add_del",
            Request::SetAdminState { .. } => "sw_interface_set_flags",
            Request::SetMac { .. } => "sw_interface_set_mac_address",
            Request::SetMtu { .. } => "sw_interface_set_mtu",
            Request::SetVrf { .. } => "sw_interface_set_table",
            Request::AddIpAddress { .. } | Request::DelIpAddress { .. } => {
                "sw_interface_add_del_address"
            }
            Request::BfdUdpAdd(_) => "bfd_udp_add",
            Request::BfdUdpMod(_) => "bfd_udp_mod",
            Request::BfdUdpDel(_) => "bfd_udp_del",
            Request::BfdAuthSetKey(_) => "bfd_auth_set_key",
            Request::BfdAuthDelKey { .. } => "bfd_auth_del_key",
            Request::BfdSetEchoSource { .. } => "bfd_udp_set_echo_source",
            Request::BfdDelEchoSource => "bfd_udp_del_echo_source",
            Request::StnAddRule(_) | Request::StnDelRule(_) => "stn_add_del_rule",
            Request::Nat44Forwarding { .. } => "nat44_forwarding_enable_disable",
            Request::Nat44InterfaceFeature { .. } => "nat44_interface_add_del_feature",
            Request::Nat44AddressRange { .. } => "nat44_add_del_address_range",
            Request::Nat44StaticMapping { .. } => "nat44_add_del_static_mapping",
            Request::Nat44LbStaticMapping { .. } => "nat44_add_del_lb_static_mapping",
            Request::Nat44IdentityMapping { .. } => "nat44_add_del_identity_mapping",
            Request::SrLocalSidAdd(_) | Request::SrLocalSidDel { .. } => "sr_localsid_add_del",
            Request::SrPolicyAdd(_) => "sr_policy_add",
            Request::SrPolicyMod { .. } => "sr_policy_mod",
            Request::SrPolicyDel { .. } => "sr_policy_del",
            Request::SrSteeringAdd(_) | Request::SrSteeringDel(_) => "sr_steering_add_del",
        }
    }

    /// Returns true if this request creates a resource with a runtime index.
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Request::CreateLoopback { .. }
                | Request::CreateMemif(_)
                | Request::CreateTap(_)
                | Request::CreateVxlan(_)
                | Request::CreateAfPacket(_)
        )
    }

    /// Returns true if this request destroys an interface.
    pub fn is_interface_delete(&self) -> bool {
        matches!(
            self,
            Request::DeleteLoopback { .. }
                | Request::DeleteMemif { .. }
                | Request::DeleteTap { .. }
                | Request::DeleteVxlan(_)
                | Request::DeleteAfPacket(_)
        )
    }
}

/// Reply to a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reply {
    /// Raw return value, zero on success.
    pub retval: i32,
    /// Index allocated by the request, if it allocates one.
    pub index: Option<u32>,
}

impl Reply {
    /// A successful reply without an index.
    pub const OK: Reply = Reply {
        retval: 0,
        index: None,
    };

    /// A successful reply carrying an allocated index.
    pub fn with_index(index: u32) -> Self {
        Reply {
            retval: 0,
            index: Some(index),
        }
    }
}

/// A bulk dump request answered by a stream of [`Detail`] messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DumpRequest {
    Interfaces,
    MemifSockets,
    BfdSessions,
    BfdAuthKeys,
    BfdEchoSource,
    StnRules,
    Nat44Forwarding,
    Nat44Interfaces,
    Nat44AddressRanges,
    Nat44StaticMappings,
    Nat44LbStaticMappings,
    Nat44IdentityMappings,
    SrLocalSids,
    SrPolicies,
    SrSteerings,
}

impl DumpRequest {
    /// Returns the dataplane message name of this dump.
    pub fn name(&self) -> &'static str {
        match self {
            DumpRequest::Interfaces => "sw_interface_dump",
            DumpRequest::MemifSockets => "memif_socket_filename_dump",
            DumpRequest::BfdSessions => "bfd_udp_session_dump",
            DumpRequest::BfdAuthKeys => "bfd_auth_keys_dump",
            DumpRequest::BfdEchoSource => "bfd_udp_get_echo_source",
            DumpRequest::StnRules => "stn_rules_dump",
            DumpRequest::Nat44Forwarding => "nat44_forwarding_is_enabled",
            DumpRequest::Nat44Interfaces => "nat44_interface_dump",
            DumpRequest::Nat44AddressRanges => "nat44_address_dump",
            DumpRequest::Nat44StaticMappings => "nat44_static_mapping_dump",
            DumpRequest::Nat44LbStaticMappings => "nat44_lb_static_mapping_dump",
            DumpRequest::Nat44IdentityMappings => "nat44_identity_mapping_dump",
            DumpRequest::SrLocalSids => "sr_localsids_dump",
            DumpRequest::SrPolicies => "sr_policies_dump",
            DumpRequest::SrSteerings => "sr_steering_pol_dump",
        }
    }
}

/// One detail message of a dump stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detail {
    Interface(InterfaceDetails),
    MemifSocket(MemifSocketDetails),
    BfdSession(BfdUdpSession),
    BfdAuthKey(BfdAuthKeyDetails),
    BfdEchoSource { index: InterfaceIndex },
    StnRule(StnRule),
    Nat44Forwarding { enabled: bool },
    Nat44Interface(Nat44Interface),
    Nat44AddressRange(Nat44AddressRange),
    Nat44StaticMapping(Nat44StaticMapping),
    Nat44LbStaticMapping(Nat44LbStaticMapping),
    Nat44IdentityMapping(Nat44IdentityMapping),
    SrLocalSid(LocalSid),
    SrPolicy(SrPolicyDetails),
    SrSteering(SrSteeringDetails),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api;

    #[test]
    fn test_request_names_are_declared() {
        let requests = vec![
            Request::CreateLoopback { mac: None },
            Request::SetMtu { index: 1, mtu: 1500 },
            Request::BfdDelEchoSource,
            Request::Nat44Forwarding { enable: true },
            Request::SrPolicyDel {
                bsid: "a::e".parse().unwrap(),
            },
        ];
        let declared: Vec<&str> = api::interface::MESSAGES
            .iter()
            .chain(api::bfd::MESSAGES)
            .chain(api::nat::MESSAGES)
            .chain(api::srv6::MESSAGES)
            .copied()
            .collect();
        for request in requests {
            assert!(
                declared.contains(&request.name()),
                "{} not declared",
                request.name()
            );
        }
    }

    #[test]
    fn test_create_classification() {
        assert!(Request::CreateLoopback { mac: None }.is_create());
        assert!(!Request::SetAdminState { index: 1, up: true }.is_create());
        assert!(Request::DeleteMemif { index: 1 }.is_interface_delete());
        assert!(!Request::SetVrf { index: 1, vrf_id: 2 }.is_interface_delete());
    }
}

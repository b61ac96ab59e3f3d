//! SRv6 messages: local SIDs, policies with their segment lists, and
//! steering of traffic into policies.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::types::{InterfaceIndex, IpNetwork};

/// Message names used by SRv6 configuration.
pub const MESSAGES: &[&str] = &[
    "sr_localsid_add_del",
    "sr_policy_add",
    "sr_policy_mod",
    "sr_policy_del",
    "sr_steering_add_del",
    "sr_localsids_dump",
    "sr_policies_dump",
    "sr_steering_pol_dump",
];

/// Behavior bound to a local SID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalSidBehavior {
    End { psp: bool },
    EndX {
        psp: bool,
        index: InterfaceIndex,
        next_hop: IpAddr,
    },
    EndDx2 { index: InterfaceIndex, vlan_tag: u32 },
    EndDx4 { index: InterfaceIndex, next_hop: Ipv4Addr },
    EndDx6 { index: InterfaceIndex, next_hop: Ipv6Addr },
    EndDt4 { vrf_id: u32 },
    EndDt6 { vrf_id: u32 },
}

/// A local SID entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSid {
    pub sid: Ipv6Addr,
    pub fib_table: u32,
    pub behavior: LocalSidBehavior,
}

/// A weighted segment list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentList {
    pub weight: u32,
    pub segments: Vec<Ipv6Addr>,
}

/// Policy creation. A policy always carries at least one segment list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrPolicyAdd {
    pub bsid: Ipv6Addr,
    pub fib_table: u32,
    pub is_spray: bool,
    pub is_encap: bool,
    pub first: SegmentList,
}

/// In-place change of one policy's segment lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SrPolicyModOp {
    /// Adds a segment list; the reply carries its index.
    AddSegmentList(SegmentList),
    /// Removes the segment list at the given index.
    DelSegmentList { sl_index: u32 },
}

/// One entry of the policy dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrPolicyDetails {
    pub index: u32,
    pub bsid: Ipv6Addr,
    pub fib_table: u32,
    pub is_spray: bool,
    pub is_encap: bool,
    /// Segment lists keyed by their dataplane index.
    pub segment_lists: Vec<(u32, SegmentList)>,
}

/// Traffic matched by a steering entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SteeringTraffic {
    L3 { fib_table: u32, prefix: IpNetwork },
    L2 { index: InterfaceIndex },
}

/// Steers traffic into a policy referenced by BSID or policy index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrSteering {
    pub bsid: Option<Ipv6Addr>,
    pub policy_index: Option<u32>,
    pub traffic: SteeringTraffic,
}

/// One entry of the steering dump. Always reports the policy BSID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrSteeringDetails {
    pub bsid: Ipv6Addr,
    pub traffic: SteeringTraffic,
}

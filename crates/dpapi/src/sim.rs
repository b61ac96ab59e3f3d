//! In-memory simulated dataplane.
//!
//! `SimDataplane` answers every request the agent issues with the same
//! constraints a real dataplane enforces (indices must exist, duplicates are
//! rejected, keys in use cannot be removed, ...). It records every write
//! request in order and supports failure injection, which makes call counts
//! and orderings directly observable.

use log::debug;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::net::Ipv6Addr;

use crate::api::bfd::{BfdAuthKey, BfdAuthKeyDetails, BfdUdpSession};
use crate::api::interface::{
    InterfaceDetails, InterfaceType, LinkDetails, MemifSocketDetails, VxlanTunnel,
};
use crate::api::nat::{
    Nat44AddressRange, Nat44IdentityMapping, Nat44Interface, Nat44LbStaticMapping,
    Nat44StaticMapping,
};
use crate::api::srv6::{
    LocalSid, SegmentList, SrPolicyAdd, SrPolicyDetails, SrPolicyModOp, SrSteering,
    SrSteeringDetails,
};
use crate::api::stn::StnRule;
use crate::channel::{DataplaneApi, MultiReply};
use crate::error::{ApiError, ApiResult, ApiStatus};
use crate::message::{Detail, DumpRequest, Reply, Request};
use crate::types::{InterfaceIndex, MacAddress, LOCAL_INTERFACE_INDEX};

/// Default memif socket registered at startup under id 0.
pub const DEFAULT_MEMIF_SOCKET: &str = "/run/vpp/memif.sock";

/// MTU reported for freshly created interfaces.
pub const DEFAULT_MTU: u32 = 9000;

#[derive(Debug, Clone)]
struct SimPolicy {
    index: u32,
    fib_table: u32,
    is_spray: bool,
    is_encap: bool,
    lists: BTreeMap<u32, SegmentList>,
}

#[derive(Debug, Default)]
struct SimState {
    interfaces: BTreeMap<InterfaceIndex, InterfaceDetails>,
    next_index: InterfaceIndex,
    physical: Vec<String>,
    name_counters: HashMap<&'static str, u32>,
    memif_sockets: BTreeMap<u32, String>,
    bfd_sessions: Vec<BfdUdpSession>,
    bfd_keys: BTreeMap<u32, (BfdAuthKey, u32)>,
    echo_source: Option<InterfaceIndex>,
    stn_rules: Vec<StnRule>,
    nat_forwarding: bool,
    nat_interfaces: Vec<Nat44Interface>,
    nat_ranges: Vec<Nat44AddressRange>,
    static_mappings: Vec<Nat44StaticMapping>,
    lb_static_mappings: Vec<Nat44LbStaticMapping>,
    identity_mappings: Vec<Nat44IdentityMapping>,
    local_sids: BTreeMap<Ipv6Addr, LocalSid>,
    policies: BTreeMap<Ipv6Addr, SimPolicy>,
    steerings: Vec<SrSteeringDetails>,
    requests: Vec<Request>,
    failures: HashMap<String, ApiStatus>,
    dump_faults: HashMap<DumpRequest, usize>,
    unknown_messages: HashSet<String>,
}

/// Adds `entry`, or removes the entry at `position`, the way the NAT
/// add/del messages do.
fn add_or_remove<T>(
    entries: &mut Vec<T>,
    position: Option<usize>,
    entry: T,
    is_add: bool,
) -> Result<Reply, ApiStatus> {
    match (is_add, position) {
        (true, Some(_)) => Err(ApiStatus::EntryAlreadyExists),
        (false, None) => Err(ApiStatus::NoSuchEntry),
        (true, None) => {
            entries.push(entry);
            Ok(Reply::OK)
        }
        (false, Some(position)) => {
            entries.remove(position);
            Ok(Reply::OK)
        }
    }
}

fn smallest_free<'a>(used: impl Iterator<Item = &'a u32>) -> u32 {
    let used: HashSet<u32> = used.copied().collect();
    (0..).find(|i| !used.contains(i)).unwrap_or_default()
}

impl SimState {
    fn boot(physical: Vec<String>) -> Self {
        let mut state = SimState {
            next_index: 1,
            ..Default::default()
        };
        state.interfaces.insert(
            LOCAL_INTERFACE_INDEX,
            InterfaceDetails {
                index: LOCAL_INTERFACE_INDEX,
                internal_name: "local0".to_string(),
                tag: String::new(),
                if_type: InterfaceType::Local,
                admin_up: false,
                mac: None,
                mtu: 0,
                vrf_id: 0,
                addresses: Vec::new(),
                link: LinkDetails::None,
            },
        );
        state
            .memif_sockets
            .insert(0, DEFAULT_MEMIF_SOCKET.to_string());
        for name in physical {
            state.add_interface(name.clone(), InterfaceType::Ethernet, None, LinkDetails::None);
            state.physical.push(name);
        }
        state
    }

    fn next_name(&mut self, prefix: &'static str) -> String {
        let counter = self.name_counters.entry(prefix).or_insert(0);
        let name = format!("{}{}", prefix, counter);
        *counter += 1;
        name
    }

    fn add_interface(
        &mut self,
        internal_name: String,
        if_type: InterfaceType,
        mac: Option<MacAddress>,
        link: LinkDetails,
    ) -> InterfaceIndex {
        let index = self.next_index;
        self.next_index += 1;
        // Index bytes keep generated addresses unique per interface.
        let [_, b1, b2, b3] = index.to_be_bytes();
        let mac = mac.unwrap_or(MacAddress::new([0x02, 0xfe, 0x00, b1, b2, b3]));
        self.interfaces.insert(
            index,
            InterfaceDetails {
                index,
                internal_name,
                tag: String::new(),
                if_type,
                admin_up: false,
                mac: Some(mac),
                mtu: DEFAULT_MTU,
                vrf_id: 0,
                addresses: Vec::new(),
                link,
            },
        );
        index
    }

    fn interface_mut(&mut self, index: InterfaceIndex) -> Result<&mut InterfaceDetails, ApiStatus> {
        self.interfaces
            .get_mut(&index)
            .ok_or(ApiStatus::InvalidInterfaceIndex)
    }

    fn require_interface(&self, index: InterfaceIndex) -> Result<(), ApiStatus> {
        if self.interfaces.contains_key(&index) {
            Ok(())
        } else {
            Err(ApiStatus::InvalidInterfaceIndex)
        }
    }

    fn remove_interface(&mut self, index: InterfaceIndex, if_type: InterfaceType) -> Result<(), ApiStatus> {
        match self.interfaces.get(&index) {
            Some(details) if details.if_type == if_type => {
                self.interfaces.remove(&index);
                self.drop_interface_state(index);
                Ok(())
            }
            _ => Err(ApiStatus::InvalidInterfaceIndex),
        }
    }

    /// Removes features bound to a destroyed interface.
    fn drop_interface_state(&mut self, index: InterfaceIndex) {
        if self.echo_source == Some(index) {
            self.echo_source = None;
        }
        let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.bfd_sessions)
            .into_iter()
            .partition(|s| s.index == index);
        self.bfd_sessions = kept;
        for auth in gone.iter().filter_map(|s| s.auth) {
            if let Some((_, use_count)) = self.bfd_keys.get_mut(&auth.conf_key_id) {
                *use_count = use_count.saturating_sub(1);
            }
        }
        self.stn_rules.retain(|r| r.index != index);
        self.nat_interfaces.retain(|i| i.index != index);
        self.static_mappings
            .retain(|m| m.external_index != Some(index));
        self.identity_mappings.retain(|m| m.index != Some(index));
        self.steerings.retain(|s| {
            !matches!(s.traffic, crate::api::srv6::SteeringTraffic::L2 { index: i } if i == index)
        });
    }

    fn find_link(&self, pred: impl Fn(&LinkDetails) -> bool) -> Option<InterfaceIndex> {
        self.interfaces
            .values()
            .find(|d| pred(&d.link))
            .map(|d| d.index)
    }

    fn resolve_policy(&self, bsid: Option<Ipv6Addr>, index: Option<u32>) -> Option<Ipv6Addr> {
        match (bsid, index) {
            (Some(bsid), _) if self.policies.contains_key(&bsid) => Some(bsid),
            (None, Some(index)) => self
                .policies
                .iter()
                .find(|(_, p)| p.index == index)
                .map(|(bsid, _)| *bsid),
            _ => None,
        }
    }

    fn apply(&mut self, request: Request) -> Result<Reply, ApiStatus> {
        match request {
            Request::CreateLoopback { mac } => {
                let name = self.next_name("loop");
                let index = self.add_interface(name, InterfaceType::Loopback, mac, LinkDetails::None);
                Ok(Reply::with_index(index))
            }
            Request::DeleteLoopback { index } => {
                self.remove_interface(index, InterfaceType::Loopback)?;
                Ok(Reply::OK)
            }
            Request::MemifSocketFilenameAdd {
                socket_id,
                filename,
            } => match self.memif_sockets.get(&socket_id) {
                Some(existing) if *existing != filename => Err(ApiStatus::EntryAlreadyExists),
                _ => {
                    self.memif_sockets.insert(socket_id, filename);
                    Ok(Reply::OK)
                }
            },
            Request::CreateMemif(memif) => {
                if !self.memif_sockets.contains_key(&memif.socket_id) {
                    return Err(ApiStatus::InvalidArgument);
                }
                let taken = self.find_link(|link| {
                    matches!(link, LinkDetails::Memif(m) if m.socket_id == memif.socket_id && m.id == memif.id)
                });
                if taken.is_some() {
                    return Err(ApiStatus::EntryAlreadyExists);
                }
                let name = format!("memif{}/{}", memif.socket_id, memif.id);
                let index = self.add_interface(name, InterfaceType::Memif, None, LinkDetails::Memif(memif));
                Ok(Reply::with_index(index))
            }
            Request::DeleteMemif { index } => {
                self.remove_interface(index, InterfaceType::Memif)?;
                Ok(Reply::OK)
            }
            Request::CreateTap(tap) => {
                let taken = self.find_link(
                    |link| matches!(link, LinkDetails::Tap(t) if t.host_if_name == tap.host_if_name),
                );
                if taken.is_some() {
                    return Err(ApiStatus::EntryAlreadyExists);
                }
                let name = self.next_name("tap");
                let index = self.add_interface(name, InterfaceType::Tap, None, LinkDetails::Tap(tap));
                Ok(Reply::with_index(index))
            }
            Request::DeleteTap { index } => {
                self.remove_interface(index, InterfaceType::Tap)?;
                Ok(Reply::OK)
            }
            Request::CreateVxlan(tunnel) => {
                if self.find_vxlan(&tunnel).is_some() {
                    return Err(ApiStatus::EntryAlreadyExists);
                }
                let name = self.next_name("vxlan_tunnel");
                let index = self.add_interface(name, InterfaceType::Vxlan, None, LinkDetails::Vxlan(tunnel));
                Ok(Reply::with_index(index))
            }
            Request::DeleteVxlan(tunnel) => {
                let index = self.find_vxlan(&tunnel).ok_or(ApiStatus::NoSuchEntry)?;
                self.remove_interface(index, InterfaceType::Vxlan)?;
                Ok(Reply::OK)
            }
            Request::CreateAfPacket(af) => {
                let taken = self.find_link(
                    |link| matches!(link, LinkDetails::AfPacket(a) if a.host_if_name == af.host_if_name),
                );
                if taken.is_some() {
                    return Err(ApiStatus::EntryAlreadyExists);
                }
                let name = format!("host-{}", af.host_if_name);
                let index = self.add_interface(name, InterfaceType::AfPacket, None, LinkDetails::AfPacket(af));
                Ok(Reply::with_index(index))
            }
            Request::DeleteAfPacket(af) => {
                let index = self
                    .find_link(
                        |link| matches!(link, LinkDetails::AfPacket(a) if a.host_if_name == af.host_if_name),
                    )
                    .ok_or(ApiStatus::NoSuchEntry)?;
                self.remove_interface(index, InterfaceType::AfPacket)?;
                Ok(Reply::OK)
            }
            Request::SetInterfaceTag { index, tag } => {
                self.interface_mut(index)?.tag = tag;
                Ok(Reply::OK)
            }
            Request::SetAdminState { index, up } => {
                self.interface_mut(index)?.admin_up = up;
                Ok(Reply::OK)
            }
            Request::SetMac { index, mac } => {
                self.interface_mut(index)?.mac = Some(mac);
                Ok(Reply::OK)
            }
            Request::SetMtu { index, mtu } => {
                self.interface_mut(index)?.mtu = mtu;
                Ok(Reply::OK)
            }
            Request::SetVrf { index, vrf_id } => {
                let details = self.interface_mut(index)?;
                if details.vrf_id != vrf_id && !details.addresses.is_empty() {
                    return Err(ApiStatus::AddressInUse);
                }
                details.vrf_id = vrf_id;
                Ok(Reply::OK)
            }
            Request::AddIpAddress { index, address } => {
                let details = self.interface_mut(index)?;
                if details.addresses.contains(&address) {
                    return Err(ApiStatus::EntryAlreadyExists);
                }
                details.addresses.push(address);
                Ok(Reply::OK)
            }
            Request::DelIpAddress { index, address } => {
                let details = self.interface_mut(index)?;
                let before = details.addresses.len();
                details.addresses.retain(|a| *a != address);
                if details.addresses.len() == before {
                    return Err(ApiStatus::NoSuchEntry);
                }
                Ok(Reply::OK)
            }

            Request::BfdUdpAdd(session) => {
                self.require_interface(session.index)?;
                if self.find_bfd_session(&session).is_some() {
                    return Err(ApiStatus::EntryAlreadyExists);
                }
                if let Some(auth) = session.auth {
                    let (_, use_count) = self
                        .bfd_keys
                        .get_mut(&auth.conf_key_id)
                        .ok_or(ApiStatus::NoSuchEntry)?;
                    *use_count += 1;
                }
                self.bfd_sessions.push(session);
                Ok(Reply::OK)
            }
            Request::BfdUdpMod(session) => {
                let pos = self.find_bfd_session(&session).ok_or(ApiStatus::NoSuchEntry)?;
                let existing = &mut self.bfd_sessions[pos];
                existing.desired_min_tx = session.desired_min_tx;
                existing.required_min_rx = session.required_min_rx;
                existing.detect_mult = session.detect_mult;
                Ok(Reply::OK)
            }
            Request::BfdUdpDel(session) => {
                let pos = self.find_bfd_session(&session).ok_or(ApiStatus::NoSuchEntry)?;
                let removed = self.bfd_sessions.remove(pos);
                if let Some(auth) = removed.auth {
                    if let Some((_, use_count)) = self.bfd_keys.get_mut(&auth.conf_key_id) {
                        *use_count = use_count.saturating_sub(1);
                    }
                }
                Ok(Reply::OK)
            }
            Request::BfdAuthSetKey(key) => {
                match self.bfd_keys.get(&key.conf_key_id) {
                    Some((_, use_count)) if *use_count > 0 => Err(ApiStatus::EntryAlreadyExists),
                    _ => {
                        self.bfd_keys.insert(key.conf_key_id, (key, 0));
                        Ok(Reply::OK)
                    }
                }
            }
            Request::BfdAuthDelKey { conf_key_id } => match self.bfd_keys.get(&conf_key_id) {
                None => Err(ApiStatus::NoSuchEntry),
                Some((_, use_count)) if *use_count > 0 => Err(ApiStatus::InvalidValue),
                Some(_) => {
                    self.bfd_keys.remove(&conf_key_id);
                    Ok(Reply::OK)
                }
            },
            Request::BfdSetEchoSource { index } => {
                self.require_interface(index)?;
                self.echo_source = Some(index);
                Ok(Reply::OK)
            }
            Request::BfdDelEchoSource => {
                self.echo_source = None;
                Ok(Reply::OK)
            }

            Request::StnAddRule(rule) => {
                self.require_interface(rule.index)?;
                if self.stn_rules.iter().any(|r| r.address == rule.address) {
                    return Err(ApiStatus::EntryAlreadyExists);
                }
                self.stn_rules.push(rule);
                Ok(Reply::OK)
            }
            Request::StnDelRule(rule) => {
                let before = self.stn_rules.len();
                self.stn_rules.retain(|r| *r != rule);
                if self.stn_rules.len() == before {
                    return Err(ApiStatus::NoSuchEntry);
                }
                Ok(Reply::OK)
            }

            Request::Nat44Forwarding { enable } => {
                self.nat_forwarding = enable;
                Ok(Reply::OK)
            }
            Request::Nat44InterfaceFeature { interface, is_add } => {
                self.require_interface(interface.index)?;
                let present = self.nat_interfaces.contains(&interface);
                match (is_add, present) {
                    (true, true) => Err(ApiStatus::EntryAlreadyExists),
                    (false, false) => Err(ApiStatus::NoSuchEntry),
                    (true, false) => {
                        self.nat_interfaces.push(interface);
                        Ok(Reply::OK)
                    }
                    (false, true) => {
                        self.nat_interfaces.retain(|i| *i != interface);
                        Ok(Reply::OK)
                    }
                }
            }
            Request::Nat44AddressRange { range, is_add } => {
                let present = self.nat_ranges.contains(&range);
                match (is_add, present) {
                    (true, true) => Err(ApiStatus::EntryAlreadyExists),
                    (false, false) => Err(ApiStatus::NoSuchEntry),
                    (true, false) => {
                        self.nat_ranges.push(range);
                        Ok(Reply::OK)
                    }
                    (false, true) => {
                        self.nat_ranges.retain(|r| *r != range);
                        Ok(Reply::OK)
                    }
                }
            }
            Request::Nat44StaticMapping { mapping, is_add } => {
                if let Some(index) = mapping.external_index {
                    self.require_interface(index)?;
                }
                let position = self
                    .static_mappings
                    .iter()
                    .position(|m| m.same_entry(&mapping));
                add_or_remove(&mut self.static_mappings, position, mapping, is_add)
            }
            Request::Nat44LbStaticMapping { mapping, is_add } => {
                if is_add && mapping.locals.len() < 2 {
                    return Err(ApiStatus::InvalidValue);
                }
                let position = self
                    .lb_static_mappings
                    .iter()
                    .position(|m| m.same_entry(&mapping));
                add_or_remove(&mut self.lb_static_mappings, position, mapping, is_add)
            }
            Request::Nat44IdentityMapping { mapping, is_add } => {
                if let Some(index) = mapping.index {
                    self.require_interface(index)?;
                }
                let position = self
                    .identity_mappings
                    .iter()
                    .position(|m| m.same_entry(&mapping));
                add_or_remove(&mut self.identity_mappings, position, mapping, is_add)
            }

            Request::SrLocalSidAdd(sid) => {
                if self.local_sids.contains_key(&sid.sid) {
                    return Err(ApiStatus::EntryAlreadyExists);
                }
                self.local_sids.insert(sid.sid, sid);
                Ok(Reply::OK)
            }
            Request::SrLocalSidDel { sid } => {
                self.local_sids
                    .remove(&sid)
                    .map(|_| Reply::OK)
                    .ok_or(ApiStatus::NoSuchEntry)
            }
            Request::SrPolicyAdd(SrPolicyAdd {
                bsid,
                fib_table,
                is_spray,
                is_encap,
                first,
            }) => {
                if self.policies.contains_key(&bsid) {
                    return Err(ApiStatus::EntryAlreadyExists);
                }
                let index = smallest_free(self.policies.values().map(|p| &p.index));
                let mut lists = BTreeMap::new();
                lists.insert(0, first);
                self.policies.insert(
                    bsid,
                    SimPolicy {
                        index,
                        fib_table,
                        is_spray,
                        is_encap,
                        lists,
                    },
                );
                Ok(Reply::with_index(index))
            }
            Request::SrPolicyMod { bsid, op } => {
                let policy = self.policies.get_mut(&bsid).ok_or(ApiStatus::NoSuchEntry)?;
                match op {
                    SrPolicyModOp::AddSegmentList(list) => {
                        let sl_index = smallest_free(policy.lists.keys());
                        policy.lists.insert(sl_index, list);
                        Ok(Reply::with_index(sl_index))
                    }
                    SrPolicyModOp::DelSegmentList { sl_index } => {
                        if !policy.lists.contains_key(&sl_index) {
                            return Err(ApiStatus::NoSuchEntry);
                        }
                        if policy.lists.len() == 1 {
                            return Err(ApiStatus::InvalidValue);
                        }
                        policy.lists.remove(&sl_index);
                        Ok(Reply::OK)
                    }
                }
            }
            Request::SrPolicyDel { bsid } => {
                if !self.policies.contains_key(&bsid) {
                    return Err(ApiStatus::NoSuchEntry);
                }
                if self.steerings.iter().any(|s| s.bsid == bsid) {
                    return Err(ApiStatus::InvalidValue);
                }
                self.policies.remove(&bsid);
                Ok(Reply::OK)
            }
            Request::SrSteeringAdd(SrSteering {
                bsid,
                policy_index,
                traffic,
            }) => {
                let bsid = self
                    .resolve_policy(bsid, policy_index)
                    .ok_or(ApiStatus::NoSuchEntry)?;
                if self.steerings.iter().any(|s| s.traffic == traffic) {
                    return Err(ApiStatus::EntryAlreadyExists);
                }
                if let crate::api::srv6::SteeringTraffic::L2 { index } = traffic {
                    self.require_interface(index)?;
                }
                self.steerings.push(SrSteeringDetails { bsid, traffic });
                Ok(Reply::OK)
            }
            Request::SrSteeringDel(SrSteering {
                bsid,
                policy_index,
                traffic,
            }) => {
                let bsid = self
                    .resolve_policy(bsid, policy_index)
                    .ok_or(ApiStatus::NoSuchEntry)?;
                let before = self.steerings.len();
                self.steerings
                    .retain(|s| !(s.bsid == bsid && s.traffic == traffic));
                if self.steerings.len() == before {
                    return Err(ApiStatus::NoSuchEntry);
                }
                Ok(Reply::OK)
            }
        }
    }

    fn find_vxlan(&self, tunnel: &VxlanTunnel) -> Option<InterfaceIndex> {
        self.find_link(|link| {
            matches!(link, LinkDetails::Vxlan(t)
                if t.src_address == tunnel.src_address
                    && t.dst_address == tunnel.dst_address
                    && t.vni == tunnel.vni)
        })
    }

    fn find_bfd_session(&self, session: &BfdUdpSession) -> Option<usize> {
        self.bfd_sessions.iter().position(|s| {
            s.index == session.index
                && s.local_addr == session.local_addr
                && s.peer_addr == session.peer_addr
        })
    }

    fn policy_details(&self) -> Vec<SrPolicyDetails> {
        self.policies
            .iter()
            .map(|(bsid, p)| SrPolicyDetails {
                index: p.index,
                bsid: *bsid,
                fib_table: p.fib_table,
                is_spray: p.is_spray,
                is_encap: p.is_encap,
                segment_lists: p.lists.iter().map(|(i, l)| (*i, l.clone())).collect(),
            })
            .collect()
    }

    fn dump(&self, request: DumpRequest) -> Vec<Detail> {
        match request {
            DumpRequest::Interfaces => self
                .interfaces
                .values()
                .cloned()
                .map(Detail::Interface)
                .collect(),
            DumpRequest::MemifSockets => self
                .memif_sockets
                .iter()
                .map(|(socket_id, filename)| {
                    Detail::MemifSocket(MemifSocketDetails {
                        socket_id: *socket_id,
                        filename: filename.clone(),
                    })
                })
                .collect(),
            DumpRequest::BfdSessions => self
                .bfd_sessions
                .iter()
                .cloned()
                .map(Detail::BfdSession)
                .collect(),
            DumpRequest::BfdAuthKeys => self
                .bfd_keys
                .values()
                .map(|(key, use_count)| {
                    Detail::BfdAuthKey(BfdAuthKeyDetails {
                        conf_key_id: key.conf_key_id,
                        auth_type: key.auth_type,
                        use_count: *use_count,
                    })
                })
                .collect(),
            DumpRequest::BfdEchoSource => self
                .echo_source
                .map(|index| Detail::BfdEchoSource { index })
                .into_iter()
                .collect(),
            DumpRequest::StnRules => self.stn_rules.iter().cloned().map(Detail::StnRule).collect(),
            DumpRequest::Nat44Forwarding => vec![Detail::Nat44Forwarding {
                enabled: self.nat_forwarding,
            }],
            DumpRequest::Nat44Interfaces => self
                .nat_interfaces
                .iter()
                .copied()
                .map(Detail::Nat44Interface)
                .collect(),
            DumpRequest::Nat44AddressRanges => self
                .nat_ranges
                .iter()
                .copied()
                .map(Detail::Nat44AddressRange)
                .collect(),
            DumpRequest::Nat44StaticMappings => self
                .static_mappings
                .iter()
                .cloned()
                .map(Detail::Nat44StaticMapping)
                .collect(),
            DumpRequest::Nat44LbStaticMappings => self
                .lb_static_mappings
                .iter()
                .cloned()
                .map(Detail::Nat44LbStaticMapping)
                .collect(),
            DumpRequest::Nat44IdentityMappings => self
                .identity_mappings
                .iter()
                .cloned()
                .map(Detail::Nat44IdentityMapping)
                .collect(),
            DumpRequest::SrLocalSids => self
                .local_sids
                .values()
                .cloned()
                .map(Detail::SrLocalSid)
                .collect(),
            DumpRequest::SrPolicies => self.policy_details().into_iter().map(Detail::SrPolicy).collect(),
            DumpRequest::SrSteerings => self
                .steerings
                .iter()
                .cloned()
                .map(Detail::SrSteering)
                .collect(),
        }
    }
}

struct SimStream {
    items: VecDeque<ApiResult<Detail>>,
}

impl MultiReply for SimStream {
    fn receive(&mut self) -> ApiResult<Option<Detail>> {
        self.items.pop_front().transpose()
    }
}

/// Simulated dataplane.
#[derive(Debug)]
pub struct SimDataplane {
    state: Mutex<SimState>,
}

impl Default for SimDataplane {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDataplane {
    /// Creates a dataplane with only the local interface present.
    pub fn new() -> Self {
        Self::with_physical(Vec::<String>::new())
    }

    /// Creates a dataplane with the given physical interfaces at indices 1..
    pub fn with_physical<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names.into_iter().map(Into::into).collect();
        Self {
            state: Mutex::new(SimState::boot(names)),
        }
    }

    /// Simulates a dataplane restart: all agent-created state is lost and
    /// index allocation starts over.
    pub fn restart(&self) {
        let mut state = self.state.lock();
        let physical = std::mem::take(&mut state.physical);
        let failures = std::mem::take(&mut state.failures);
        let unknown = std::mem::take(&mut state.unknown_messages);
        *state = SimState::boot(physical);
        state.failures = failures;
        state.unknown_messages = unknown;
    }

    /// Places an interface at a fixed index, as if it survived an agent restart.
    pub fn seed_interface(&self, details: InterfaceDetails) {
        let mut state = self.state.lock();
        if details.index >= state.next_index {
            state.next_index = details.index + 1;
        }
        state.interfaces.insert(details.index, details);
    }

    /// Makes every subsequent request with this message name fail.
    pub fn inject_failure(&self, message: &str, status: ApiStatus) {
        self.state.lock().failures.insert(message.to_string(), status);
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Makes the next dump of this kind report an error after `after` details.
    pub fn inject_dump_error(&self, request: DumpRequest, after: usize) {
        self.state.lock().dump_faults.insert(request, after);
    }

    /// Marks a message as unknown to this dataplane version.
    pub fn remove_message(&self, message: &str) {
        self.state.lock().unknown_messages.insert(message.to_string());
    }

    /// Returns every write request received so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().requests.clone()
    }

    /// Returns the number of recorded requests with the given message name.
    pub fn count(&self, message: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.name() == message)
            .count()
    }

    /// Forgets recorded requests.
    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    /// Returns the interface at `index`.
    pub fn interface(&self, index: InterfaceIndex) -> Option<InterfaceDetails> {
        self.state.lock().interfaces.get(&index).cloned()
    }

    /// Returns all interfaces.
    pub fn interfaces(&self) -> Vec<InterfaceDetails> {
        self.state.lock().interfaces.values().cloned().collect()
    }

    /// Returns the interface carrying `tag`.
    pub fn interface_by_tag(&self, tag: &str) -> Option<InterfaceDetails> {
        self.state
            .lock()
            .interfaces
            .values()
            .find(|d| d.tag == tag)
            .cloned()
    }

    pub fn bfd_sessions(&self) -> Vec<BfdUdpSession> {
        self.state.lock().bfd_sessions.clone()
    }

    pub fn bfd_key_ids(&self) -> Vec<u32> {
        self.state.lock().bfd_keys.keys().copied().collect()
    }

    pub fn echo_source(&self) -> Option<InterfaceIndex> {
        self.state.lock().echo_source
    }

    pub fn stn_rules(&self) -> Vec<StnRule> {
        self.state.lock().stn_rules.clone()
    }

    pub fn nat_forwarding(&self) -> bool {
        self.state.lock().nat_forwarding
    }

    pub fn nat_interfaces(&self) -> Vec<Nat44Interface> {
        self.state.lock().nat_interfaces.clone()
    }

    pub fn nat_ranges(&self) -> Vec<Nat44AddressRange> {
        self.state.lock().nat_ranges.clone()
    }

    pub fn nat_static_mappings(&self) -> Vec<Nat44StaticMapping> {
        self.state.lock().static_mappings.clone()
    }

    pub fn nat_lb_static_mappings(&self) -> Vec<Nat44LbStaticMapping> {
        self.state.lock().lb_static_mappings.clone()
    }

    pub fn nat_identity_mappings(&self) -> Vec<Nat44IdentityMapping> {
        self.state.lock().identity_mappings.clone()
    }

    pub fn local_sids(&self) -> Vec<LocalSid> {
        self.state.lock().local_sids.values().cloned().collect()
    }

    pub fn policies(&self) -> Vec<SrPolicyDetails> {
        self.state.lock().policy_details()
    }

    pub fn steerings(&self) -> Vec<SrSteeringDetails> {
        self.state.lock().steerings.clone()
    }
}

impl DataplaneApi for SimDataplane {
    fn send_request(&self, request: Request) -> ApiResult<Reply> {
        let mut state = self.state.lock();
        let name = request.name();
        if state.unknown_messages.contains(name) {
            return Err(ApiError::Incompatible {
                messages: vec![name.to_string()],
            });
        }
        state.requests.push(request.clone());
        if let Some(status) = state.failures.get(name).copied() {
            debug!("sim: injected failure for {}: {}", name, status);
            return Ok(Reply {
                retval: status.raw(),
                index: None,
            });
        }
        match state.apply(request) {
            Ok(reply) => Ok(reply),
            Err(status) => {
                debug!("sim: {} rejected: {}", name, status);
                Ok(Reply {
                    retval: status.raw(),
                    index: None,
                })
            }
        }
    }

    fn send_multi_request(&self, request: DumpRequest) -> ApiResult<Box<dyn MultiReply + '_>> {
        let mut state = self.state.lock();
        if state.unknown_messages.contains(request.name()) {
            return Err(ApiError::Incompatible {
                messages: vec![request.name().to_string()],
            });
        }
        let mut items: VecDeque<ApiResult<Detail>> = state.dump(request).into_iter().map(Ok).collect();
        if let Some(after) = state.dump_faults.remove(&request) {
            let at = after.min(items.len());
            items.insert(
                at,
                Err(ApiError::MalformedDetail {
                    message: request.name(),
                    reason: "injected".to_string(),
                }),
            );
        }
        Ok(Box::new(SimStream { items }))
    }

    fn check_message_compatibility(&self, messages: &[&str]) -> ApiResult<()> {
        let state = self.state.lock();
        let unknown: Vec<String> = messages
            .iter()
            .filter(|m| state.unknown_messages.contains(**m))
            .map(|m| m.to_string())
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Incompatible { messages: unknown })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::interface::MemifCreate;
    use crate::channel::drain_dump;
    use pretty_assertions::assert_eq;

    fn memif(id: u32) -> MemifCreate {
        MemifCreate {
            id,
            socket_id: 0,
            master: true,
            mode: Default::default(),
            ring_size: 1024,
            buffer_size: 2048,
            rx_queues: 1,
            tx_queues: 1,
            secret: String::new(),
        }
    }

    #[test]
    fn test_boot_state() {
        let sim = SimDataplane::with_physical(["GigabitEthernet0/8/0"]);
        let interfaces = sim.interfaces();
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0].internal_name, "local0");
        assert_eq!(interfaces[1].index, 1);
        assert_eq!(interfaces[1].if_type, InterfaceType::Ethernet);
    }

    #[test]
    fn test_create_and_delete_loopback() {
        let sim = SimDataplane::new();
        let index = sim.request_index(Request::CreateLoopback { mac: None }).unwrap();
        assert_eq!(index, 1);
        assert_eq!(sim.interface(index).unwrap().internal_name, "loop0");

        sim.request(Request::DeleteLoopback { index }).unwrap();
        assert!(sim.interface(index).is_none());

        let err = sim.request(Request::DeleteLoopback { index }).unwrap_err();
        assert_eq!(err.api_status(), Some(ApiStatus::InvalidInterfaceIndex));
        assert_eq!(sim.count("delete_loopback"), 2);
    }

    #[test]
    fn test_memif_requires_socket_and_unique_id() {
        let sim = SimDataplane::new();
        sim.request_index(Request::CreateMemif(memif(1))).unwrap();
        let err = sim.request(Request::CreateMemif(memif(1))).unwrap_err();
        assert_eq!(err.api_status(), Some(ApiStatus::EntryAlreadyExists));

        let mut other = memif(2);
        other.socket_id = 5;
        let err = sim.request(Request::CreateMemif(other)).unwrap_err();
        assert_eq!(err.api_status(), Some(ApiStatus::InvalidArgument));
    }

    #[test]
    fn test_vrf_change_rejected_with_addresses() {
        let sim = SimDataplane::new();
        let index = sim.request_index(Request::CreateLoopback { mac: None }).unwrap();
        sim.request(Request::AddIpAddress {
            index,
            address: "10.0.0.1/24".parse().unwrap(),
        })
        .unwrap();
        let err = sim.request(Request::SetVrf { index, vrf_id: 3 }).unwrap_err();
        assert_eq!(err.api_status(), Some(ApiStatus::AddressInUse));
    }

    #[test]
    fn test_interface_removal_drops_bound_features() {
        let sim = SimDataplane::new();
        let index = sim.request_index(Request::CreateLoopback { mac: None }).unwrap();
        sim.request(Request::StnAddRule(StnRule {
            address: "10.1.1.1".parse().unwrap(),
            index,
        }))
        .unwrap();
        sim.request(Request::Nat44InterfaceFeature {
            interface: Nat44Interface { index, inside: true },
            is_add: true,
        })
        .unwrap();
        sim.request(Request::BfdSetEchoSource { index }).unwrap();

        sim.request(Request::DeleteLoopback { index }).unwrap();
        assert!(sim.stn_rules().is_empty());
        assert!(sim.nat_interfaces().is_empty());
        assert_eq!(sim.echo_source(), None);
    }

    #[test]
    fn test_static_mappings_match_without_tag() {
        use crate::api::nat::{NatProtocol, TwiceNat};

        let sim = SimDataplane::new();
        let index = sim.request_index(Request::CreateLoopback { mac: None }).unwrap();
        let mapping = Nat44StaticMapping {
            tag: "web-static-0".to_string(),
            local_ip: "10.0.0.1".parse().unwrap(),
            local_port: 8080,
            external_ip: "0.0.0.0".parse().unwrap(),
            external_port: 80,
            external_index: Some(index),
            protocol: NatProtocol::Tcp,
            vrf_id: 0,
            twice_nat: TwiceNat::Disabled,
            address_only: false,
        };
        sim.request(Request::Nat44StaticMapping {
            mapping: mapping.clone(),
            is_add: true,
        })
        .unwrap();
        let err = sim
            .request(Request::Nat44StaticMapping {
                mapping: Nat44StaticMapping {
                    tag: "other".to_string(),
                    ..mapping.clone()
                },
                is_add: true,
            })
            .unwrap_err();
        assert_eq!(err.api_status(), Some(ApiStatus::EntryAlreadyExists));

        // Mappings on a destroyed interface go with it.
        sim.request(Request::DeleteLoopback { index }).unwrap();
        assert!(sim.nat_static_mappings().is_empty());
        let err = sim
            .request(Request::Nat44StaticMapping {
                mapping,
                is_add: false,
            })
            .unwrap_err();
        assert_eq!(err.api_status(), Some(ApiStatus::InvalidInterfaceIndex));
    }

    #[test]
    fn test_injected_failure_is_recorded() {
        let sim = SimDataplane::new();
        sim.inject_failure("create_loopback", ApiStatus::Unspecified);
        assert!(sim.request(Request::CreateLoopback { mac: None }).is_err());
        assert_eq!(sim.count("create_loopback"), 1);
        sim.clear_failures();
        assert!(sim.request(Request::CreateLoopback { mac: None }).is_ok());
    }

    #[test]
    fn test_restart_resets_indices() {
        let sim = SimDataplane::with_physical(["eth0"]);
        let index = sim.request_index(Request::CreateLoopback { mac: None }).unwrap();
        assert_eq!(index, 2);
        sim.restart();
        assert!(sim.interface(index).is_none());
        assert_eq!(sim.interfaces().len(), 2);
        let again = sim.request_index(Request::CreateLoopback { mac: None }).unwrap();
        assert_eq!(again, 2);
    }

    #[test]
    fn test_dump_fault_is_one_shot() {
        let sim = SimDataplane::with_physical(["eth0", "eth1"]);
        sim.inject_dump_error(DumpRequest::Interfaces, 1);
        assert!(drain_dump(&sim, DumpRequest::Interfaces).is_err());
        assert_eq!(drain_dump(&sim, DumpRequest::Interfaces).unwrap().len(), 3);
    }

    #[test]
    fn test_compatibility_check() {
        let sim = SimDataplane::new();
        assert!(sim
            .check_message_compatibility(crate::api::srv6::MESSAGES)
            .is_ok());
        sim.remove_message("sr_policy_mod");
        let err = sim
            .check_message_compatibility(crate::api::srv6::MESSAGES)
            .unwrap_err();
        assert_eq!(
            err,
            ApiError::Incompatible {
                messages: vec!["sr_policy_mod".to_string()]
            }
        );
    }

    #[test]
    fn test_policy_segment_lists() {
        let sim = SimDataplane::new();
        let bsid: Ipv6Addr = "a::e".parse().unwrap();
        let list = SegmentList {
            weight: 1,
            segments: vec!["b::1".parse().unwrap()],
        };
        let index = sim
            .request_index(Request::SrPolicyAdd(SrPolicyAdd {
                bsid,
                fib_table: 0,
                is_spray: false,
                is_encap: true,
                first: list.clone(),
            }))
            .unwrap();
        assert_eq!(index, 0);
        let sl = sim
            .request_index(Request::SrPolicyMod {
                bsid,
                op: SrPolicyModOp::AddSegmentList(list),
            })
            .unwrap();
        assert_eq!(sl, 1);
        sim.request(Request::SrPolicyMod {
            bsid,
            op: SrPolicyModOp::DelSegmentList { sl_index: 0 },
        })
        .unwrap();
        let err = sim
            .request(Request::SrPolicyMod {
                bsid,
                op: SrPolicyModOp::DelSegmentList { sl_index: 1 },
            })
            .unwrap_err();
        assert_eq!(err.api_status(), Some(ApiStatus::InvalidValue));
    }
}

//! Srv6Configurator implementation.

use std::net::Ipv6Addr;
use std::sync::Arc;

use vswitch_dpapi::api::srv6::{
    self, LocalSid, SegmentList, SrPolicyDetails, SrPolicyModOp, SrSteering, SrSteeringDetails,
    SteeringTraffic,
};
use vswitch_dpapi::{drain_dump, DataplaneApi, Detail, DumpRequest, IpNetwork, Request};
use vswitch_orch_common::{
    match_by_key, BlockingReason, ConfigError, ConfigResult, Configurator, DeferredIndex,
    ErrorList, NameToIdx, PrerequisiteKind, PrerequisiteListener, ResourceState,
};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::bus::BusHandle;
use crate::intf::InterfaceConfig;
use crate::{audit_log, debug_log, info_log, warn_log};

use super::types::{
    index_key, LocalSidConfig, PolicyConfig, PolicyRef, SteeringConfig, SteeringTrafficConfig,
};

const SOURCE: &str = "Srv6Configurator";

/// Registry metadata of a programmed policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyEntry {
    pub config: PolicyConfig,
    pub bsid: Ipv6Addr,
    /// Segment lists by their dataplane index, ascending.
    pub segment_lists: Vec<(u32, SegmentList)>,
}

/// Registry metadata of a programmed steering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SteeringEntry {
    pub config: SteeringConfig,
    /// Binding SID of the policy the steering was bound to.
    pub bsid: Ipv6Addr,
    pub steering: SrSteering,
}

/// Configures local SIDs, policies and steerings.
///
/// Policies are announced on the bus as [`PrerequisiteKind::Srv6Policy`]
/// under their canonical BSID, with the policy index as handle. Steerings
/// wait for their policy in a deferred index keyed by the same BSID, or by
/// `index:<n>` when they reference the policy by index.
pub struct Srv6Configurator {
    api: Arc<dyn DataplaneApi>,
    interfaces: Arc<NameToIdx<InterfaceConfig>>,
    bus: BusHandle,
    local_sids: NameToIdx<LocalSidConfig>,
    /// Keyed by canonical BSID; the index is the dataplane policy index.
    policies: NameToIdx<PolicyEntry>,
    steerings: NameToIdx<SteeringEntry>,
    pending: DeferredIndex<SteeringConfig>,
    next_id: u32,
}

impl std::fmt::Debug for Srv6Configurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Srv6Configurator")
            .field("local_sids", &self.local_sids.len())
            .field("policies", &self.policies.len())
            .field("steerings", &self.steerings.len())
            .field("pending", &self.pending.keys())
            .finish()
    }
}

impl Srv6Configurator {
    pub fn new(
        api: Arc<dyn DataplaneApi>,
        interfaces: Arc<NameToIdx<InterfaceConfig>>,
        bus: BusHandle,
    ) -> Self {
        Self {
            api,
            interfaces,
            bus,
            local_sids: NameToIdx::new("sr-localsids"),
            policies: NameToIdx::new("sr-policies"),
            steerings: NameToIdx::new("sr-steerings"),
            pending: DeferredIndex::new(),
            next_id: 0,
        }
    }

    pub fn init(&self) -> ConfigResult<()> {
        self.api
            .check_message_compatibility(srv6::MESSAGES)
            .map_err(|source| ConfigError::Incompatible {
                configurator: "srv6".to_string(),
                source,
            })
    }

    pub fn local_sids(&self) -> &NameToIdx<LocalSidConfig> {
        &self.local_sids
    }

    pub fn policies(&self) -> &NameToIdx<PolicyEntry> {
        &self.policies
    }

    pub fn steerings(&self) -> &NameToIdx<SteeringEntry> {
        &self.steerings
    }

    /// Names of steerings waiting for their policy.
    pub fn pending_steerings(&self) -> Vec<String> {
        self.pending.keys()
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    // ---- local SIDs ----

    fn add_local_sid(&mut self, config: &LocalSidConfig) -> ConfigResult<()> {
        let key = config.key()?;
        let sid = config.to_local_sid(|name| self.interfaces.lookup_index(name))?;
        self.api
            .request(Request::SrLocalSidAdd(sid))
            .map_err(|e| ConfigError::dataplane(key.clone(), e))?;
        let id = self.next_id();
        self.local_sids.register_name(key, id, config.clone());
        Ok(())
    }

    fn del_local_sid(&self, sid: Ipv6Addr) -> ConfigResult<()> {
        match self.api.request(Request::SrLocalSidDel { sid }) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug_log!(SOURCE, sid = %sid, "local sid already gone");
                Ok(())
            }
            Err(e) => Err(ConfigError::dataplane(sid.to_string(), e)),
        }
    }

    // ---- policies ----

    fn dump_policies(&self) -> ConfigResult<Vec<SrPolicyDetails>> {
        let details = drain_dump(self.api.as_ref(), DumpRequest::SrPolicies)
            .map_err(|e| ConfigError::dataplane("sr policies", e))?;
        Ok(details
            .into_iter()
            .filter_map(|d| match d {
                Detail::SrPolicy(policy) => Some(policy),
                _ => None,
            })
            .collect())
    }

    fn dump_steerings(&self) -> ConfigResult<Vec<SrSteeringDetails>> {
        let details = drain_dump(self.api.as_ref(), DumpRequest::SrSteerings)
            .map_err(|e| ConfigError::dataplane("sr steerings", e))?;
        Ok(details
            .into_iter()
            .filter_map(|d| match d {
                Detail::SrSteering(steering) => Some(steering),
                _ => None,
            })
            .collect())
    }

    fn add_policy(&mut self, config: &PolicyConfig) -> ConfigResult<()> {
        let key = config.key()?;
        let bsid = config.address()?;
        let mut lists = config.lists()?.into_iter();
        let Some(first) = lists.next() else {
            return Err(ConfigError::invalid(key, "policy has no segment list"));
        };
        let index = self
            .api
            .request_index(Request::SrPolicyAdd(config.to_add(first)?))
            .map_err(|e| ConfigError::dataplane(key.clone(), e))?;

        let mut errors = ErrorList::new();
        let mut known = Vec::new();
        for list in lists {
            let op = SrPolicyModOp::AddSegmentList(list.clone());
            match self.api.request_index(Request::SrPolicyMod { bsid, op }) {
                Ok(sl_index) => known.push((sl_index, list)),
                Err(e) => errors.push(ConfigError::dataplane(key.clone(), e)),
            }
        }

        // The first list's index is only visible in the dump.
        let segment_lists = match self.dump_policies() {
            Ok(dumped) => dumped
                .into_iter()
                .find(|p| p.bsid == bsid)
                .map(|p| p.segment_lists)
                .unwrap_or(known),
            Err(e) => {
                errors.push(e);
                known
            }
        };
        self.policies.register_name(
            key.clone(),
            index,
            PolicyEntry {
                config: config.clone(),
                bsid,
                segment_lists,
            },
        );
        self.bus.created(PrerequisiteKind::Srv6Policy, key, index);
        errors.into_result()
    }

    fn del_policy(&self, bsid: Ipv6Addr) -> ConfigResult<()> {
        match self.api.request(Request::SrPolicyDel { bsid }) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug_log!(SOURCE, bsid = %bsid, "policy already gone");
                Ok(())
            }
            Err(e) => Err(ConfigError::dataplane(bsid.to_string(), e)),
        }
    }

    fn remove_policy(&mut self, key: &str) -> ConfigResult<()> {
        let Some((_, entry)) = self.policies.unregister_name(key) else {
            return Err(ConfigError::not_found("sr policy", key));
        };
        // The dataplane refuses to delete a policy that still steers traffic.
        let mut errors = self.park_steerings(entry.bsid);
        errors.record(self.del_policy(entry.bsid));
        self.bus.deleted(PrerequisiteKind::Srv6Policy, key);
        errors.into_result()
    }

    /// Changes segment lists in place: new lists are added before stale ones
    /// are removed so the policy never runs empty.
    fn update_lists(
        &mut self,
        key: &str,
        index: u32,
        entry: PolicyEntry,
        new: &PolicyConfig,
    ) -> ConfigResult<()> {
        let wanted = new.lists()?;
        let bsid = entry.bsid;
        let mut stale = entry.segment_lists;
        let mut kept = Vec::new();
        let mut added = Vec::new();
        for list in wanted {
            match stale.iter().position(|(_, l)| *l == list) {
                Some(pos) => kept.push(stale.remove(pos)),
                None => added.push(list),
            }
        }

        let mut errors = ErrorList::new();
        for list in added {
            let op = SrPolicyModOp::AddSegmentList(list.clone());
            match self.api.request_index(Request::SrPolicyMod { bsid, op }) {
                Ok(sl_index) => kept.push((sl_index, list)),
                Err(e) => errors.push(ConfigError::dataplane(key, e)),
            }
        }
        for (sl_index, list) in stale {
            let op = SrPolicyModOp::DelSegmentList { sl_index };
            match self.api.request(Request::SrPolicyMod { bsid, op }) {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    errors.push(ConfigError::dataplane(key, e));
                    kept.push((sl_index, list));
                }
            }
        }
        kept.sort_by_key(|(sl_index, _)| *sl_index);

        self.policies.register_name(
            key,
            index,
            PolicyEntry {
                config: new.clone(),
                bsid,
                segment_lists: kept,
            },
        );
        errors.into_result()
    }

    /// Removes every steering bound to `bsid` and defers it on its policy
    /// reference.
    fn park_steerings(&mut self, bsid: Ipv6Addr) -> ErrorList {
        let mut errors = ErrorList::new();
        for entry in self.steerings.snapshot() {
            if entry.metadata.bsid != bsid {
                continue;
            }
            let name = entry.name;
            let steering = entry.metadata;
            self.steerings.unregister_name(&name);
            errors.record(self.del_steering(steering.steering, &name));
            match steering.config.policy.key() {
                Ok(prerequisite) => {
                    info_log!(SOURCE, steering = %name, policy = %prerequisite, "policy removed, steering pending");
                    self.pending.defer(
                        name,
                        prerequisite,
                        steering.config,
                        BlockingReason::MissingPrerequisite,
                    );
                }
                Err(e) => errors.push(e),
            }
        }
        errors
    }

    // ---- steerings ----

    fn resolve_policy(&self, policy: &PolicyRef) -> ConfigResult<Option<(Ipv6Addr, u32)>> {
        Ok(match policy {
            PolicyRef::Bsid(_) => {
                let key = policy.key()?;
                self.policies
                    .lookup_idx(&key)
                    .map(|(index, entry)| (entry.bsid, index))
            }
            PolicyRef::Index(index) => self
                .policies
                .lookup_name(*index)
                .map(|(_, entry)| (entry.bsid, *index)),
        })
    }

    fn resolve_traffic(&self, traffic: &SteeringTrafficConfig) -> ConfigResult<SteeringTraffic> {
        match traffic {
            SteeringTrafficConfig::L3 {
                installation_vrf_id,
                prefix_address,
            } => {
                let prefix = prefix_address
                    .parse::<IpNetwork>()
                    .map_err(|e| ConfigError::invalid("sr steering", e.to_string()))?;
                Ok(SteeringTraffic::L3 {
                    fib_table: *installation_vrf_id,
                    prefix,
                })
            }
            SteeringTrafficConfig::L2 { interface_name } => self
                .interfaces
                .lookup_index(interface_name)
                .map(|index| SteeringTraffic::L2 { index })
                .ok_or_else(|| ConfigError::not_found("interface", interface_name.clone())),
        }
    }

    fn to_steering(config: &SteeringConfig, bsid: Ipv6Addr, index: u32, traffic: SteeringTraffic) -> SrSteering {
        match config.policy {
            PolicyRef::Bsid(_) => SrSteering {
                bsid: Some(bsid),
                policy_index: None,
                traffic,
            },
            PolicyRef::Index(_) => SrSteering {
                bsid: None,
                policy_index: Some(index),
                traffic,
            },
        }
    }

    fn add_steering(&mut self, config: &SteeringConfig) -> ConfigResult<()> {
        config.validate()?;
        let Some((bsid, index)) = self.resolve_policy(&config.policy)? else {
            let prerequisite = config.policy.key()?;
            debug_log!(SOURCE, steering = %config.name, policy = %prerequisite, "policy missing, deferring");
            self.pending.defer(
                config.name.clone(),
                prerequisite,
                config.clone(),
                BlockingReason::MissingPrerequisite,
            );
            let record = AuditRecord::new(AuditCategory::Dependency, SOURCE, "defer")
                .with_outcome(AuditOutcome::InProgress)
                .with_object_id(config.name.clone())
                .with_object_type("sr_steering");
            audit_log!(record);
            return Ok(());
        };
        let traffic = self.resolve_traffic(&config.traffic)?;
        let steering = Self::to_steering(config, bsid, index, traffic);
        self.api
            .request(Request::SrSteeringAdd(steering.clone()))
            .map_err(|e| ConfigError::dataplane(config.name.clone(), e))?;
        let id = self.next_id();
        self.steerings.register_name(
            config.name.clone(),
            id,
            SteeringEntry {
                config: config.clone(),
                bsid,
                steering,
            },
        );
        Ok(())
    }

    fn del_steering(&self, steering: SrSteering, name: &str) -> ConfigResult<()> {
        match self.api.request(Request::SrSteeringDel(steering)) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug_log!(SOURCE, steering = name, "steering already gone");
                Ok(())
            }
            Err(e) => Err(ConfigError::dataplane(name, e)),
        }
    }

    fn release_steerings(&mut self, policy_key: &str, index: u32) -> ConfigResult<()> {
        let mut released = self.pending.take_blocked_on(policy_key);
        released.extend(self.pending.take_blocked_on(&index_key(index)));
        let mut errors = ErrorList::new();
        for entry in released {
            debug_log!(SOURCE, steering = %entry.key, "policy available, configuring");
            errors.record(self.add_steering(&entry.config));
        }
        errors.into_result()
    }

    fn audit(&self, category: AuditCategory, action: &str, object_type: &str, key: &str, result: &ConfigResult<()>) {
        let record = AuditRecord::new(category, SOURCE, action)
            .with_object_id(key)
            .with_object_type(object_type)
            .with_result(result);
        audit_log!(record);
    }

    fn audit_resync(&self, object_type: &str, registered: usize, result: &ConfigResult<()>) {
        let record = AuditRecord::new(AuditCategory::Resync, SOURCE, "resync")
            .with_object_type(object_type)
            .with_details(serde_json::json!({
                "registered": registered,
                "pending": self.pending.len(),
            }))
            .with_result(result);
        audit_log!(record);
    }
}

impl Configurator<LocalSidConfig> for Srv6Configurator {
    fn configure(&mut self, config: &LocalSidConfig) -> ConfigResult<()> {
        let result = self.add_local_sid(config);
        self.audit(AuditCategory::ResourceCreate, "configure", "sr_localsid", &config.sid, &result);
        result
    }

    fn modify(&mut self, old: &LocalSidConfig, new: &LocalSidConfig) -> ConfigResult<()> {
        new.key()?;
        let mut errors = ErrorList::new();
        match Configurator::<LocalSidConfig>::delete(self, old) {
            Err(ConfigError::NotFound { .. }) | Ok(()) => {}
            Err(e) => errors.push(e),
        }
        errors.record(self.add_local_sid(new));
        let result = errors.into_result();
        self.audit(AuditCategory::ResourceModify, "modify", "sr_localsid", &new.sid, &result);
        result
    }

    fn delete(&mut self, config: &LocalSidConfig) -> ConfigResult<()> {
        let key = config.key()?;
        if self.local_sids.unregister_name(&key).is_none() {
            return Err(ConfigError::not_found("local sid", key));
        }
        let result = self.del_local_sid(config.address()?);
        self.audit(AuditCategory::ResourceDelete, "delete", "sr_localsid", &key, &result);
        result
    }

    fn resync(&mut self, desired: &[LocalSidConfig]) -> ConfigResult<()> {
        let details = drain_dump(self.api.as_ref(), DumpRequest::SrLocalSids)
            .map_err(|e| ConfigError::dataplane("sr localsids", e))?;
        let dumped: Vec<LocalSid> = details
            .into_iter()
            .filter_map(|d| match d {
                Detail::SrLocalSid(sid) => Some(sid),
                _ => None,
            })
            .collect();

        self.local_sids.clear();
        let mut errors = ErrorList::new();
        let mut resolved = Vec::new();
        for config in desired {
            let sid = config.to_local_sid(|name| self.interfaces.lookup_index(name));
            if let Some(sid) = errors.record(sid) {
                resolved.push((config.clone(), sid));
            }
        }

        let diff = match_by_key(resolved, dumped, |(_, s)| s.sid, |s| s.sid);
        for ((config, wanted), observed) in diff.matched {
            if wanted == observed {
                let id = self.next_id();
                self.local_sids.register_name(wanted.sid.to_string(), id, config);
            } else {
                errors.record(self.del_local_sid(observed.sid));
                errors.record(self.add_local_sid(&config));
            }
        }
        for sid in diff.obsolete {
            errors.record(self.del_local_sid(sid.sid));
        }
        for (config, _) in diff.missing {
            errors.record(self.add_local_sid(&config));
        }

        let result = errors.into_result();
        self.audit_resync("sr_localsid", self.local_sids.len(), &result);
        result
    }

    fn resource_state(&self, key: &str) -> ResourceState {
        if self.local_sids.contains(key) {
            ResourceState::Configured
        } else {
            ResourceState::Unconfigured
        }
    }
}

impl Configurator<PolicyConfig> for Srv6Configurator {
    fn configure(&mut self, config: &PolicyConfig) -> ConfigResult<()> {
        let result = self.add_policy(config);
        self.audit(AuditCategory::ResourceCreate, "configure", "sr_policy", &config.bsid, &result);
        result
    }

    fn modify(&mut self, old: &PolicyConfig, new: &PolicyConfig) -> ConfigResult<()> {
        new.lists()?;
        let new_key = new.key()?;
        let registered = old
            .key()
            .ok()
            .and_then(|key| self.policies.lookup_idx(&key).map(|(i, e)| (key, i, e)));

        let result = match registered {
            Some((key, index, entry)) if !old.needs_recreate(new) => {
                self.update_lists(&key, index, entry, new)
            }
            registered => {
                info_log!(SOURCE, policy = %new_key, "policy attributes changed, recreating");
                let mut errors = ErrorList::new();
                if let Some((key, _, _)) = registered {
                    errors.record(self.remove_policy(&key));
                }
                errors.record(self.add_policy(new));
                errors.into_result()
            }
        };
        self.audit(AuditCategory::ResourceModify, "modify", "sr_policy", &new_key, &result);
        result
    }

    fn delete(&mut self, config: &PolicyConfig) -> ConfigResult<()> {
        let key = config.key()?;
        let result = self.remove_policy(&key);
        self.audit(AuditCategory::ResourceDelete, "delete", "sr_policy", &key, &result);
        result
    }

    fn resync(&mut self, desired: &[PolicyConfig]) -> ConfigResult<()> {
        let dumped = self.dump_policies()?;
        let dumped_steerings = self.dump_steerings()?;
        self.policies.clear();
        let mut errors = ErrorList::new();

        let mut resolved = Vec::new();
        for config in desired {
            if let Some(bsid) = errors.record(config.lists().and_then(|_| config.address())) {
                resolved.push((bsid, config.clone()));
            }
        }

        // Steerings block policy deletion, so they go first. The steering
        // resync that follows puts back the ones still wanted.
        let unsteer = |this: &Self, bsid: Ipv6Addr, errors: &mut ErrorList| {
            for steering in dumped_steerings.iter().filter(|s| s.bsid == bsid) {
                let request = SrSteering {
                    bsid: Some(steering.bsid),
                    policy_index: None,
                    traffic: steering.traffic.clone(),
                };
                errors.record(this.del_steering(request, &bsid.to_string()));
            }
        };

        let diff = match_by_key(resolved, dumped, |(bsid, _)| *bsid, |p| p.bsid);
        for ((bsid, config), observed) in diff.matched {
            let key = bsid.to_string();
            let same_attributes = observed.fib_table == config.installation_vrf_id
                && observed.is_spray == config.spray_behaviour
                && observed.is_encap == config.srh_encapsulation;
            if same_attributes {
                let entry = PolicyEntry {
                    config: config.clone(),
                    bsid,
                    segment_lists: observed.segment_lists,
                };
                errors.record(self.update_lists(&key, observed.index, entry, &config));
                self.bus
                    .created(PrerequisiteKind::Srv6Policy, key, observed.index);
            } else {
                info_log!(SOURCE, policy = %key, "dumped policy differs, recreating");
                unsteer(self, bsid, &mut errors);
                errors.record(self.del_policy(bsid));
                errors.record(self.add_policy(&config));
            }
        }
        for observed in diff.obsolete {
            unsteer(self, observed.bsid, &mut errors);
            errors.record(self.del_policy(observed.bsid));
        }
        for (_, config) in diff.missing {
            errors.record(self.add_policy(&config));
        }

        let result = errors.into_result();
        self.audit_resync("sr_policy", self.policies.len(), &result);
        result
    }

    fn resource_state(&self, key: &str) -> ResourceState {
        if self.policies.contains(key) {
            ResourceState::Configured
        } else {
            ResourceState::Unconfigured
        }
    }
}

impl Configurator<SteeringConfig> for Srv6Configurator {
    fn configure(&mut self, config: &SteeringConfig) -> ConfigResult<()> {
        let result = self.add_steering(config);
        self.audit(AuditCategory::ResourceCreate, "configure", "sr_steering", &config.name, &result);
        result
    }

    fn modify(&mut self, old: &SteeringConfig, new: &SteeringConfig) -> ConfigResult<()> {
        new.validate()?;
        let mut errors = ErrorList::new();
        match Configurator::<SteeringConfig>::delete(self, old) {
            Err(ConfigError::NotFound { .. }) | Ok(()) => {}
            Err(e) => errors.push(e),
        }
        errors.record(self.add_steering(new));
        let result = errors.into_result();
        self.audit(AuditCategory::ResourceModify, "modify", "sr_steering", &new.name, &result);
        result
    }

    fn delete(&mut self, config: &SteeringConfig) -> ConfigResult<()> {
        if self.pending.remove(&config.name).is_some() {
            return Ok(());
        }
        let Some((_, entry)) = self.steerings.unregister_name(&config.name) else {
            return Err(ConfigError::not_found("sr steering", config.name.clone()));
        };
        let result = self.del_steering(entry.steering, &config.name);
        self.audit(AuditCategory::ResourceDelete, "delete", "sr_steering", &config.name, &result);
        result
    }

    fn resync(&mut self, desired: &[SteeringConfig]) -> ConfigResult<()> {
        let mut dumped = self.dump_steerings()?;
        self.steerings.clear();
        self.pending.clear();
        let mut errors = ErrorList::new();

        for config in desired {
            if errors.record(config.validate()).is_none() {
                continue;
            }
            let Some(resolved) = errors.record(self.resolve_policy(&config.policy)) else {
                continue;
            };
            let Some((bsid, index)) = resolved else {
                errors.record(self.add_steering(config));
                continue;
            };
            let Some(traffic) = errors.record(self.resolve_traffic(&config.traffic)) else {
                continue;
            };
            match dumped
                .iter()
                .position(|d| d.bsid == bsid && d.traffic == traffic)
            {
                Some(pos) => {
                    dumped.remove(pos);
                    let steering = Self::to_steering(config, bsid, index, traffic);
                    let id = self.next_id();
                    self.steerings.register_name(
                        config.name.clone(),
                        id,
                        SteeringEntry {
                            config: config.clone(),
                            bsid,
                            steering,
                        },
                    );
                }
                None => {
                    errors.record(self.add_steering(config));
                }
            }
        }

        for obsolete in dumped {
            let name = format!("steering@{}", obsolete.bsid);
            let request = SrSteering {
                bsid: Some(obsolete.bsid),
                policy_index: None,
                traffic: obsolete.traffic,
            };
            errors.record(self.del_steering(request, &name));
        }

        let result = errors.into_result();
        self.audit_resync("sr_steering", self.steerings.len(), &result);
        result
    }

    fn resource_state(&self, key: &str) -> ResourceState {
        if let Some(entry) = self.pending.get(key) {
            ResourceState::Pending(entry.reason.clone())
        } else if self.steerings.contains(key) {
            ResourceState::Configured
        } else {
            ResourceState::Unconfigured
        }
    }
}

impl PrerequisiteListener for Srv6Configurator {
    fn listener_name(&self) -> &str {
        SOURCE
    }

    fn interested_in(&self, kind: PrerequisiteKind) -> bool {
        kind == PrerequisiteKind::Srv6Policy
    }

    fn resolve_created(&mut self, _kind: PrerequisiteKind, name: &str, handle: u32) -> ConfigResult<()> {
        // A stale event for a policy deleted since is harmless: nothing
        // resolves, so the steerings are deferred again.
        self.release_steerings(name, handle)
    }

    fn resolve_deleted(&mut self, _kind: PrerequisiteKind, name: &str) -> ConfigResult<()> {
        if self.policies.contains(name) {
            return Ok(());
        }
        let Ok(bsid) = name.parse::<Ipv6Addr>() else {
            warn_log!(SOURCE, policy = name, "deletion event with malformed bsid");
            return Ok(());
        };
        self.park_steerings(bsid).into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::NotificationBus;
    use crate::intf::{InterfaceConfigurator, InterfaceConfiguratorConfig, InterfaceKind};
    use crate::srv6::{LocalSidFunction, SegmentListConfig};
    use pretty_assertions::assert_eq;
    use vswitch_dpapi::api::srv6::{LocalSidBehavior, SrPolicyAdd};
    use vswitch_dpapi::SimDataplane;

    struct Fixture {
        sim: Arc<SimDataplane>,
        interfaces: InterfaceConfigurator,
        bus: NotificationBus,
        srv6: Srv6Configurator,
    }

    fn setup() -> Fixture {
        let sim = Arc::new(SimDataplane::new());
        let interfaces = InterfaceConfigurator::new(sim.clone(), InterfaceConfiguratorConfig::default());
        let bus = NotificationBus::new(interfaces.registry());
        let srv6 = Srv6Configurator::new(sim.clone(), interfaces.registry(), bus.handle());
        Fixture {
            sim,
            interfaces,
            bus,
            srv6,
        }
    }

    impl Fixture {
        fn dispatch(&mut self) {
            let errors = self.bus.dispatch(&mut [&mut self.srv6]);
            assert!(errors.is_empty(), "{:?}", errors);
        }
    }

    fn policy(bsid: &str, lists: &[&[&str]]) -> PolicyConfig {
        PolicyConfig::new(
            bsid,
            lists
                .iter()
                .map(|segments| SegmentListConfig::new(1, segments))
                .collect(),
        )
    }

    fn segments(sim: &SimDataplane) -> Vec<Vec<Ipv6Addr>> {
        sim.policies()[0]
            .segment_lists
            .iter()
            .map(|(_, l)| l.segments.clone())
            .collect()
    }

    #[test]
    fn test_local_sid_lifecycle() {
        let mut f = setup();
        let dt4 = LocalSidConfig::new("a::2", LocalSidFunction::EndDt4 { vrf_id: 10 });
        f.srv6.configure(&dt4).unwrap();
        assert_eq!(
            f.sim.local_sids()[0].behavior,
            LocalSidBehavior::EndDt4 { vrf_id: 10 }
        );
        assert_eq!(
            Configurator::<LocalSidConfig>::resource_state(&f.srv6, "a::2"),
            ResourceState::Configured
        );

        f.sim.clear_requests();
        let end = LocalSidConfig::new("a::2", LocalSidFunction::End { psp: true });
        f.srv6.modify(&dt4, &end).unwrap();
        assert_eq!(f.sim.count("sr_localsid_add_del"), 2);
        assert_eq!(f.sim.local_sids()[0].behavior, LocalSidBehavior::End { psp: true });

        f.srv6.delete(&end).unwrap();
        assert!(f.sim.local_sids().is_empty());
    }

    #[test]
    fn test_local_sid_needs_interface() {
        let mut f = setup();
        let dx2 = LocalSidConfig::new(
            "a::3",
            LocalSidFunction::EndDx2 {
                outgoing_interface: "loop1".to_string(),
                vlan_tag: 0,
            },
        );
        let err = f.srv6.configure(&dx2).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
        assert_eq!(f.sim.count("sr_localsid_add_del"), 0);

        f.interfaces
            .configure(&InterfaceConfig::new("loop1", InterfaceKind::Loopback))
            .unwrap();
        f.srv6.configure(&dx2).unwrap();
        let index = f.interfaces.registry().lookup_index("loop1").unwrap();
        assert_eq!(
            f.sim.local_sids()[0].behavior,
            LocalSidBehavior::EndDx2 { index, vlan_tag: 0 }
        );
    }

    #[test]
    fn test_policy_learns_segment_list_indices() {
        let mut f = setup();
        f.srv6
            .configure(&policy("a::e", &[&["b::1"], &["c::1", "c::2"]]))
            .unwrap();
        let (index, entry) = f.srv6.policies().lookup_idx("a::e").unwrap();
        assert_eq!(index, f.sim.policies()[0].index);
        assert_eq!(entry.segment_lists, f.sim.policies()[0].segment_lists);
        assert_eq!(entry.segment_lists.len(), 2);
        f.dispatch();
    }

    #[test]
    fn test_segment_lists_diffed_in_place() {
        let mut f = setup();
        let old = policy("a::e", &[&["b::1"], &["c::1"]]);
        f.srv6.configure(&old).unwrap();
        f.sim.clear_requests();

        let new = policy("a::e", &[&["c::1"], &["d::1"]]);
        f.srv6.modify(&old, &new).unwrap();
        assert_eq!(f.sim.count("sr_policy_mod"), 2);
        assert_eq!(f.sim.count("sr_policy_del"), 0);
        let requests = f.sim.requests();
        assert!(matches!(
            &requests[0],
            Request::SrPolicyMod {
                op: SrPolicyModOp::AddSegmentList(_),
                ..
            }
        ));

        let mut lists = segments(&f.sim);
        lists.sort();
        assert_eq!(
            lists,
            vec![vec!["c::1".parse::<Ipv6Addr>().unwrap()], vec!["d::1".parse().unwrap()]]
        );
        let (_, entry) = f.srv6.policies().lookup_idx("a::e").unwrap();
        assert_eq!(entry.segment_lists, f.sim.policies()[0].segment_lists);
    }

    #[test]
    fn test_recreate_parks_and_restores_steering() {
        let mut f = setup();
        let old = policy("a::e", &[&["b::1"]]);
        f.srv6.configure(&old).unwrap();
        let steering = SteeringConfig::l3("s1", PolicyRef::Bsid("a::e".into()), "10.0.0.0/24");
        f.srv6.configure(&steering).unwrap();
        f.dispatch();
        assert_eq!(f.sim.steerings().len(), 1);

        let mut new = old.clone();
        new.spray_behaviour = true;
        f.srv6.modify(&old, &new).unwrap();
        assert_eq!(f.sim.count("sr_policy_del"), 1);
        assert!(Configurator::<SteeringConfig>::resource_state(&f.srv6, "s1").is_pending());

        f.dispatch();
        assert_eq!(
            Configurator::<SteeringConfig>::resource_state(&f.srv6, "s1"),
            ResourceState::Configured
        );
        assert_eq!(f.sim.steerings().len(), 1);
        assert!(f.sim.policies()[0].is_spray);
    }

    #[test]
    fn test_steering_waits_for_policy_index() {
        let mut f = setup();
        let steering = SteeringConfig::l3("s1", PolicyRef::Index(0), "10.0.0.0/24");
        f.srv6.configure(&steering).unwrap();
        assert_eq!(f.srv6.pending_steerings(), vec!["s1".to_string()]);
        assert_eq!(f.sim.count("sr_steering_add_del"), 0);

        f.srv6.configure(&policy("a::e", &[&["b::1"]])).unwrap();
        f.dispatch();
        assert!(f.srv6.pending_steerings().is_empty());
        let (_, entry) = f.srv6.steerings().lookup_idx("s1").unwrap();
        assert_eq!(entry.steering.policy_index, Some(0));
        assert_eq!(f.sim.steerings()[0].bsid, "a::e".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn test_invalid_bsid_rejected() {
        let mut f = setup();
        let steering = SteeringConfig::l3("s1", PolicyRef::Bsid("zz".into()), "10.0.0.0/24");
        let err = f.srv6.configure(&steering).unwrap_err();
        assert!(err.is_precondition());
        assert!(f.srv6.pending_steerings().is_empty());
        assert!(f.sim.requests().is_empty());
    }

    #[test]
    fn test_policy_delete_makes_steering_pending() {
        let mut f = setup();
        let p = policy("a::e", &[&["b::1"]]);
        f.srv6.configure(&p).unwrap();
        let steering = SteeringConfig::l3("s1", PolicyRef::Bsid("A::E".into()), "10.0.0.0/24");
        f.srv6.configure(&steering).unwrap();

        Configurator::<PolicyConfig>::delete(&mut f.srv6, &p).unwrap();
        f.dispatch();
        assert!(f.sim.policies().is_empty());
        assert!(f.sim.steerings().is_empty());
        assert!(Configurator::<SteeringConfig>::resource_state(&f.srv6, "s1").is_pending());

        Configurator::<SteeringConfig>::delete(&mut f.srv6, &steering).unwrap();
        assert_eq!(
            Configurator::<SteeringConfig>::resource_state(&f.srv6, "s1"),
            ResourceState::Unconfigured
        );
    }

    #[test]
    fn test_resync() {
        let mut f = setup();
        let bsid: Ipv6Addr = "a::e".parse().unwrap();
        let first = SegmentListConfig::new(1, &["b::1"]).to_segment_list().unwrap();
        f.sim
            .request(Request::SrPolicyAdd(SrPolicyAdd {
                bsid,
                fib_table: 0,
                is_spray: false,
                is_encap: false,
                first,
            }))
            .unwrap();
        f.sim
            .request(Request::SrSteeringAdd(SrSteering {
                bsid: Some(bsid),
                policy_index: None,
                traffic: SteeringTraffic::L3 {
                    fib_table: 0,
                    prefix: "10.0.0.0/24".parse().unwrap(),
                },
            }))
            .unwrap();
        f.sim
            .request(Request::SrLocalSidAdd(LocalSid {
                sid: "a::9".parse().unwrap(),
                fib_table: 0,
                behavior: LocalSidBehavior::End { psp: false },
            }))
            .unwrap();
        f.sim.clear_requests();

        let local_sids = [LocalSidConfig::new("a::2", LocalSidFunction::End { psp: false })];
        Configurator::<LocalSidConfig>::resync(&mut f.srv6, &local_sids).unwrap();
        let policies = [policy("a::e", &[&["b::1"], &["c::1"]])];
        Configurator::<PolicyConfig>::resync(&mut f.srv6, &policies).unwrap();
        let steerings = [SteeringConfig::l3("s1", PolicyRef::Bsid("a::e".into()), "10.0.0.0/24")];
        Configurator::<SteeringConfig>::resync(&mut f.srv6, &steerings).unwrap();
        f.dispatch();

        assert_eq!(f.sim.local_sids().len(), 1);
        assert_eq!(f.sim.local_sids()[0].sid, "a::2".parse::<Ipv6Addr>().unwrap());
        assert_eq!(f.sim.count("sr_policy_add"), 0);
        assert_eq!(f.sim.count("sr_policy_del"), 0);
        assert_eq!(f.sim.count("sr_steering_add_del"), 0);
        assert_eq!(f.sim.policies()[0].segment_lists.len(), 2);
        assert!(f.srv6.steerings().contains("s1"));
    }

    #[test]
    fn test_resync_recreates_changed_policy() {
        let mut f = setup();
        let old = policy("a::e", &[&["b::1"]]);
        f.srv6.configure(&old).unwrap();
        f.srv6
            .configure(&SteeringConfig::l3("s1", PolicyRef::Bsid("a::e".into()), "10.0.0.0/24"))
            .unwrap();
        f.dispatch();
        f.sim.clear_requests();

        let mut new = old.clone();
        new.srh_encapsulation = true;
        Configurator::<PolicyConfig>::resync(&mut f.srv6, &[new]).unwrap();
        let steerings = [SteeringConfig::l3("s1", PolicyRef::Bsid("a::e".into()), "10.0.0.0/24")];
        Configurator::<SteeringConfig>::resync(&mut f.srv6, &steerings).unwrap();
        f.dispatch();

        assert_eq!(f.sim.count("sr_policy_del"), 1);
        assert_eq!(f.sim.count("sr_policy_add"), 1);
        assert!(f.sim.policies()[0].is_encap);
        assert_eq!(f.sim.steerings().len(), 1);
    }
}

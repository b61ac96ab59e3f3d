//! NatConfigurator implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use vswitch_dpapi::api::nat::{self, Nat44AddressRange, Nat44Interface};
use vswitch_dpapi::{drain_dump, DataplaneApi, Detail, DumpRequest, Request};
use vswitch_orch_common::{
    BlockingReason, ConfigError, ConfigResult, Configurator, DeferredIndex, ErrorList, NameToIdx,
    PrerequisiteKind, PrerequisiteListener, ResourceState,
};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::intf::InterfaceConfig;
use crate::{audit_log, debug_log, info_log, warn_log};

use super::dnat::DNatState;
use super::types::{AddressPool, Nat44GlobalConfig, NatInterface};

const SOURCE: &str = "NatConfigurator";

/// Configures the global NAT44 settings and the DNAT mappings.
pub struct NatConfigurator {
    pub(super) api: Arc<dyn DataplaneApi>,
    pub(super) interfaces: Arc<NameToIdx<InterfaceConfig>>,
    /// Last configuration applied.
    applied: Option<Nat44GlobalConfig>,
    /// Interfaces with the feature enabled: name -> (index, inside).
    enabled: HashMap<String, (u32, bool)>,
    pending: DeferredIndex<NatInterface>,
    pub(super) dnat: DNatState,
}

impl std::fmt::Debug for NatConfigurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatConfigurator")
            .field("applied", &self.applied.is_some())
            .field("enabled", &self.enabled)
            .field("pending", &self.pending.keys())
            .field("dnat_labels", &self.dnat_labels())
            .field("pending_mappings", &self.dnat.pending_keys())
            .finish()
    }
}

impl NatConfigurator {
    pub fn new(api: Arc<dyn DataplaneApi>, interfaces: Arc<NameToIdx<InterfaceConfig>>) -> Self {
        Self {
            api,
            interfaces,
            applied: None,
            enabled: HashMap::new(),
            pending: DeferredIndex::new(),
            dnat: DNatState::new(),
        }
    }

    pub fn init(&self) -> ConfigResult<()> {
        self.api
            .check_message_compatibility(nat::MESSAGES)
            .map_err(|source| ConfigError::Incompatible {
                configurator: "nat44".to_string(),
                source,
            })
    }

    pub fn applied(&self) -> Option<&Nat44GlobalConfig> {
        self.applied.as_ref()
    }

    /// Names of interfaces with the feature enabled, sorted.
    pub fn enabled_interfaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.enabled.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn pending_interfaces(&self) -> Vec<String> {
        self.pending.keys()
    }

    pub(super) fn call(&self, resource: &str, request: Request) -> ConfigResult<()> {
        self.api
            .request(request)
            .map(|_| ())
            .map_err(|e| ConfigError::dataplane(resource, e))
    }

    fn enable_interface(&mut self, interface: &NatInterface) -> ConfigResult<()> {
        let Some(index) = self.interfaces.lookup_index(&interface.name) else {
            debug_log!(SOURCE, interface = %interface.name, "interface missing, deferring");
            self.pending.defer(
                interface.name.clone(),
                interface.name.clone(),
                interface.clone(),
                BlockingReason::MissingPrerequisite,
            );
            let record = AuditRecord::new(AuditCategory::Dependency, SOURCE, "defer")
                .with_outcome(AuditOutcome::InProgress)
                .with_object_id(interface.name.clone())
                .with_object_type("nat44_interface");
            audit_log!(record);
            return Ok(());
        };
        self.call(
            &interface.name,
            Request::Nat44InterfaceFeature {
                interface: Nat44Interface {
                    index,
                    inside: interface.is_inside,
                },
                is_add: true,
            },
        )?;
        self.enabled
            .insert(interface.name.clone(), (index, interface.is_inside));
        Ok(())
    }

    fn disable_interface(&mut self, name: &str) -> ConfigResult<()> {
        if self.pending.remove(name).is_some() {
            return Ok(());
        }
        let Some((index, inside)) = self.enabled.remove(name) else {
            return Ok(());
        };
        let request = Request::Nat44InterfaceFeature {
            interface: Nat44Interface { index, inside },
            is_add: false,
        };
        match self.api.request(request) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug_log!(SOURCE, interface = name, "feature already gone");
                Ok(())
            }
            Err(e) => Err(ConfigError::dataplane(name, e)),
        }
    }

    fn set_range(&self, range: Nat44AddressRange, is_add: bool) -> ConfigResult<()> {
        self.call(
            &format!("{}-{}", range.first, range.last),
            Request::Nat44AddressRange { range, is_add },
        )
    }

    /// Applies `new` over the current state. Forwarding and pools are
    /// diffed against `old`; interfaces against what is enabled or pending.
    fn apply(&mut self, old: &Nat44GlobalConfig, new: &Nat44GlobalConfig) -> ConfigResult<()> {
        new.validate()?;
        let mut errors = ErrorList::new();

        if old.forwarding != new.forwarding {
            errors.record(self.call(
                "nat44 forwarding",
                Request::Nat44Forwarding {
                    enable: new.forwarding,
                },
            ));
        }

        let wanted: HashMap<&str, bool> = new
            .nat_interfaces
            .iter()
            .map(|i| (i.name.as_str(), i.is_inside))
            .collect();
        let mut current: Vec<(String, bool)> = self
            .enabled
            .iter()
            .map(|(name, (_, inside))| (name.clone(), *inside))
            .collect();
        current.extend(
            self.pending
                .dump()
                .into_iter()
                .map(|e| (e.key, e.config.is_inside)),
        );
        let present: HashSet<(String, bool)> = current.iter().cloned().collect();

        for (name, inside) in &current {
            if wanted.get(name.as_str()) != Some(inside) {
                errors.record(self.disable_interface(name));
            }
        }
        for interface in &new.nat_interfaces {
            if !present.contains(&(interface.name.clone(), interface.is_inside)) {
                errors.record(self.enable_interface(interface));
            }
        }

        // Pools from an old config were validated when it was applied.
        let old_ranges: Vec<Nat44AddressRange> =
            old.address_pools.iter().filter_map(|p| p.to_range().ok()).collect();
        let new_ranges = new.ranges()?;
        for range in old_ranges.iter().filter(|r| !new_ranges.contains(r)) {
            errors.record(self.set_range(*range, false));
        }
        for range in new_ranges.iter().filter(|r| !old_ranges.contains(r)) {
            errors.record(self.set_range(*range, true));
        }

        self.applied = Some(new.clone());
        errors.into_result()
    }

    fn reconcile_interface(&mut self, name: &str) -> ConfigResult<()> {
        let current = self.interfaces.lookup_index(name);
        let mut errors = ErrorList::new();

        if let Some((index, inside)) = self.enabled.get(name).copied() {
            if current != Some(index) {
                info_log!(SOURCE, interface = name, "interface changed under nat feature");
                errors.record(self.disable_interface(name));
                errors.record(self.enable_interface(&NatInterface {
                    name: name.to_string(),
                    is_inside: inside,
                }));
            }
        }
        if current.is_some() {
            for entry in self.pending.take_blocked_on(name) {
                errors.record(self.enable_interface(&entry.config));
            }
        }
        errors.record(self.reconcile_dnat_interface(name));
        errors.into_result()
    }

    /// Reads the NAT44 state back from the dataplane. Interfaces the
    /// registry does not know are named `unnamed-<index>`.
    pub fn dump(&self) -> ConfigResult<Nat44GlobalConfig> {
        let dump = |request: DumpRequest| {
            drain_dump(self.api.as_ref(), request)
                .map_err(|e| ConfigError::dataplane("nat44 global", e))
        };
        let mut config = Nat44GlobalConfig::default();
        for detail in dump(DumpRequest::Nat44Forwarding)?
            .into_iter()
            .chain(dump(DumpRequest::Nat44Interfaces)?)
            .chain(dump(DumpRequest::Nat44AddressRanges)?)
        {
            match detail {
                Detail::Nat44Forwarding { enabled } => config.forwarding = enabled,
                Detail::Nat44Interface(i) => config.nat_interfaces.push(NatInterface {
                    name: self.interface_name(i.index),
                    is_inside: i.inside,
                }),
                Detail::Nat44AddressRange(range) => config.address_pools.push(AddressPool::from(range)),
                _ => {}
            }
        }
        Ok(config)
    }

    pub(super) fn interface_name(&self, index: u32) -> String {
        self.interfaces
            .lookup_name(index)
            .map(|(name, _)| name)
            .unwrap_or_else(|| format!("unnamed-{}", index))
    }

    fn audit(&self, category: AuditCategory, action: &str, result: &ConfigResult<()>) {
        let record = AuditRecord::new(category, SOURCE, action)
            .with_object_id("nat44-global")
            .with_object_type("nat44_global")
            .with_result(result);
        audit_log!(record);
    }
}

impl Configurator<Nat44GlobalConfig> for NatConfigurator {
    fn configure(&mut self, config: &Nat44GlobalConfig) -> ConfigResult<()> {
        let result = self.apply(&Nat44GlobalConfig::default(), config);
        self.audit(AuditCategory::ResourceCreate, "configure", &result);
        result
    }

    fn modify(&mut self, old: &Nat44GlobalConfig, new: &Nat44GlobalConfig) -> ConfigResult<()> {
        let result = self.apply(old, new);
        self.audit(AuditCategory::ResourceModify, "modify", &result);
        result
    }

    fn delete(&mut self, config: &Nat44GlobalConfig) -> ConfigResult<()> {
        let result = self.apply(config, &Nat44GlobalConfig::default());
        self.applied = None;
        self.audit(AuditCategory::ResourceDelete, "delete", &result);
        result
    }

    fn resync(&mut self, desired: &[Nat44GlobalConfig]) -> ConfigResult<()> {
        if desired.len() > 1 {
            warn_log!(SOURCE, count = desired.len(), "only one nat44 global config is supported, using the first");
        }
        let dumped = self.dump()?;

        self.pending.clear();
        self.enabled.clear();
        for interface in &dumped.nat_interfaces {
            let index = match self.interfaces.lookup_index(&interface.name) {
                Some(index) => index,
                None => match interface.name.strip_prefix("unnamed-").map(str::parse::<u32>) {
                    Some(Ok(index)) => index,
                    _ => continue,
                },
            };
            self.enabled
                .insert(interface.name.clone(), (index, interface.is_inside));
        }

        let wanted = desired.first().cloned().unwrap_or_default();
        let result = self.apply(&dumped, &wanted);
        if desired.is_empty() {
            self.applied = None;
        }
        self.audit(AuditCategory::Resync, "resync", &result);
        result
    }

    fn resource_state(&self, interface: &str) -> ResourceState {
        if let Some(entry) = self.pending.get(interface) {
            ResourceState::Pending(entry.reason.clone())
        } else if self.enabled.contains_key(interface) {
            ResourceState::Configured
        } else {
            ResourceState::Unconfigured
        }
    }
}

impl PrerequisiteListener for NatConfigurator {
    fn listener_name(&self) -> &str {
        SOURCE
    }

    fn interested_in(&self, kind: PrerequisiteKind) -> bool {
        kind == PrerequisiteKind::Interface
    }

    fn resolve_created(&mut self, _kind: PrerequisiteKind, name: &str, _handle: u32) -> ConfigResult<()> {
        self.reconcile_interface(name)
    }

    fn resolve_deleted(&mut self, _kind: PrerequisiteKind, name: &str) -> ConfigResult<()> {
        self.reconcile_interface(name)
    }
}

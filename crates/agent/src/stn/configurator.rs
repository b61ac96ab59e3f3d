//! StnConfigurator implementation.

use std::net::IpAddr;
use std::sync::Arc;

use vswitch_dpapi::api::stn::{self, StnRule};
use vswitch_dpapi::{drain_dump, DataplaneApi, Detail, DumpRequest, Request};
use vswitch_orch_common::{
    match_by_key, BlockingReason, ConfigError, ConfigResult, Configurator, DeferredIndex,
    ErrorList, NameToIdx, PrerequisiteKind, PrerequisiteListener, ResourceState,
};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::intf::InterfaceConfig;
use crate::{audit_log, debug_log, info_log, warn_log};

use super::types::{rule_key, StnConfig};

const SOURCE: &str = "StnConfigurator";

/// Registry metadata of a programmed rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StnEntry {
    pub config: StnConfig,
    pub rule: StnRule,
}

/// Configures STN rules.
pub struct StnConfigurator {
    api: Arc<dyn DataplaneApi>,
    interfaces: Arc<NameToIdx<InterfaceConfig>>,
    /// Keyed by rule key; the index is the interface index of the rule.
    rules: NameToIdx<StnEntry>,
    pending: DeferredIndex<StnConfig>,
}

impl std::fmt::Debug for StnConfigurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StnConfigurator")
            .field("rules", &self.rules.len())
            .field("pending", &self.pending.keys())
            .finish()
    }
}

impl StnConfigurator {
    pub fn new(api: Arc<dyn DataplaneApi>, interfaces: Arc<NameToIdx<InterfaceConfig>>) -> Self {
        Self {
            api,
            interfaces,
            rules: NameToIdx::new("stn-rules"),
            pending: DeferredIndex::new(),
        }
    }

    pub fn init(&self) -> ConfigResult<()> {
        self.api
            .check_message_compatibility(stn::MESSAGES)
            .map_err(|source| ConfigError::Incompatible {
                configurator: "stn".to_string(),
                source,
            })
    }

    pub fn rules(&self) -> &NameToIdx<StnEntry> {
        &self.rules
    }

    pub fn pending_keys(&self) -> Vec<String> {
        self.pending.keys()
    }

    fn add_rule(&mut self, config: &StnConfig, address: IpAddr) -> ConfigResult<()> {
        let key = config.key();
        let Some(index) = self.interfaces.lookup_index(&config.interface) else {
            debug_log!(SOURCE, rule = %key, interface = %config.interface, "interface missing, deferring");
            self.pending.defer(
                key.clone(),
                config.interface.clone(),
                config.clone(),
                BlockingReason::MissingPrerequisite,
            );
            let record = AuditRecord::new(AuditCategory::Dependency, SOURCE, "defer")
                .with_outcome(AuditOutcome::InProgress)
                .with_object_id(key)
                .with_object_type("stn_rule");
            audit_log!(record);
            return Ok(());
        };
        let rule = StnRule { address, index };
        self.api
            .request(Request::StnAddRule(rule.clone()))
            .map_err(|e| ConfigError::dataplane(key.clone(), e))?;
        self.rules.register_name(
            key,
            index,
            StnEntry {
                config: config.clone(),
                rule,
            },
        );
        Ok(())
    }

    fn del_rule(&self, rule: StnRule, resource: &str) -> ConfigResult<()> {
        match self.api.request(Request::StnDelRule(rule)) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug_log!(SOURCE, rule = resource, "rule already gone");
                Ok(())
            }
            Err(e) => Err(ConfigError::dataplane(resource, e)),
        }
    }

    fn reconcile_interface(&mut self, interface: &str) -> ConfigResult<()> {
        let current = self.interfaces.lookup_index(interface);
        let key = rule_key(interface);
        let mut errors = ErrorList::new();

        if let Some((index, entry)) = self.rules.lookup_idx(&key) {
            if current != Some(index) {
                info_log!(SOURCE, rule = %key, "interface changed under rule");
                self.rules.unregister_name(&key);
                errors.record(self.del_rule(entry.rule.clone(), &key));
                errors.record(self.add_rule(&entry.config, entry.rule.address));
            }
        }
        if current.is_some() {
            for pending in self.pending.take_blocked_on(interface) {
                let result = pending
                    .config
                    .address()
                    .and_then(|address| self.add_rule(&pending.config, address));
                if let Err(e) = &result {
                    // Retried the next time the interface is (re)created.
                    warn_log!(SOURCE, rule = %pending.key, error = %e, "released rule failed, deferring again");
                    self.pending.defer(
                        pending.key.clone(),
                        interface,
                        pending.config.clone(),
                        BlockingReason::ApplyError(e.to_string()),
                    );
                }
                errors.record(result);
            }
        }
        errors.into_result()
    }

    fn audit(&self, category: AuditCategory, action: &str, key: &str, result: &ConfigResult<()>) {
        let record = AuditRecord::new(category, SOURCE, action)
            .with_object_id(key)
            .with_object_type("stn_rule")
            .with_result(result);
        audit_log!(record);
    }
}

impl Configurator<StnConfig> for StnConfigurator {
    fn configure(&mut self, config: &StnConfig) -> ConfigResult<()> {
        let address = config.address()?;
        let result = self.add_rule(config, address);
        self.audit(AuditCategory::ResourceCreate, "configure", &config.key(), &result);
        result
    }

    fn modify(&mut self, old: &StnConfig, new: &StnConfig) -> ConfigResult<()> {
        let address = new.address()?;
        let mut errors = ErrorList::new();
        match self.delete(old) {
            Err(ConfigError::NotFound { .. }) | Ok(()) => {}
            Err(e) => errors.push(e),
        }
        errors.record(self.add_rule(new, address));
        let result = errors.into_result();
        self.audit(AuditCategory::ResourceModify, "modify", &new.key(), &result);
        result
    }

    fn delete(&mut self, config: &StnConfig) -> ConfigResult<()> {
        let key = config.key();
        if self.pending.remove(&key).is_some() {
            return Ok(());
        }
        let Some((_, entry)) = self.rules.unregister_name(&key) else {
            return Err(ConfigError::not_found("stn rule", key));
        };
        let result = self.del_rule(entry.rule, &key);
        self.audit(AuditCategory::ResourceDelete, "delete", &key, &result);
        result
    }

    fn resync(&mut self, desired: &[StnConfig]) -> ConfigResult<()> {
        let details = drain_dump(self.api.as_ref(), DumpRequest::StnRules)
            .map_err(|e| ConfigError::dataplane("stn rules", e))?;
        let dumped: Vec<StnRule> = details
            .into_iter()
            .filter_map(|d| match d {
                Detail::StnRule(rule) => Some(rule),
                _ => None,
            })
            .collect();

        self.rules.clear();
        self.pending.clear();
        let mut errors = ErrorList::new();

        // Rules on interfaces the registry does not know cannot be matched.
        let (known, unknown): (Vec<_>, Vec<_>) = dumped
            .into_iter()
            .partition(|r| self.interfaces.lookup_name(r.index).is_some());
        for rule in unknown {
            let name = format!("{}@{}", rule.address, rule.index);
            errors.record(self.del_rule(rule, &name));
        }

        let mut resolved = Vec::new();
        for config in desired {
            let Some(address) = errors.record(config.address()) else {
                continue;
            };
            match self.interfaces.lookup_index(&config.interface) {
                Some(index) => resolved.push((config.clone(), StnRule { address, index })),
                None => {
                    errors.record(self.add_rule(config, address));
                }
            }
        }

        let diff = match_by_key(
            resolved,
            known,
            |(_, r)| (r.address, r.index),
            |r| (r.address, r.index),
        );
        for ((config, rule), _) in diff.matched {
            self.rules
                .register_name(config.key(), rule.index, StnEntry { config, rule });
        }
        for rule in diff.obsolete {
            let name = format!("{}@{}", rule.address, rule.index);
            errors.record(self.del_rule(rule, &name));
        }
        for (config, rule) in diff.missing {
            errors.record(self.add_rule(&config, rule.address));
        }

        let result = errors.into_result();
        let record = AuditRecord::new(AuditCategory::Resync, SOURCE, "resync")
            .with_object_type("stn_rule")
            .with_details(serde_json::json!({
                "registered": self.rules.len(),
                "pending": self.pending.len(),
            }))
            .with_result(&result);
        audit_log!(record);
        result
    }

    fn resource_state(&self, key: &str) -> ResourceState {
        if let Some(entry) = self.pending.get(key) {
            ResourceState::Pending(entry.reason.clone())
        } else if self.rules.contains(key) {
            ResourceState::Configured
        } else {
            ResourceState::Unconfigured
        }
    }
}

impl PrerequisiteListener for StnConfigurator {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intf::{InterfaceConfigurator, InterfaceConfiguratorConfig, InterfaceKind};
    use pretty_assertions::assert_eq;
    use vswitch_dpapi::{ApiStatus, SimDataplane};

    fn setup() -> (Arc<SimDataplane>, InterfaceConfigurator, StnConfigurator) {
        let sim = Arc::new(SimDataplane::new());
        let interfaces = InterfaceConfigurator::new(sim.clone(), InterfaceConfiguratorConfig::default());
        let stn = StnConfigurator::new(sim.clone(), interfaces.registry());
        (sim, interfaces, stn)
    }

    fn loopback(name: &str) -> InterfaceConfig {
        InterfaceConfig::new(name, InterfaceKind::Loopback)
    }

    #[test]
    fn test_rule_programmed_without_mask() {
        let (sim, mut interfaces, mut stn) = setup();
        interfaces.configure(&loopback("loop1")).unwrap();
        stn.configure(&StnConfig::new("loop1", "10.1.1.3/24")).unwrap();

        let index = interfaces.registry().lookup_index("loop1").unwrap();
        assert_eq!(
            sim.stn_rules(),
            vec![StnRule {
                address: "10.1.1.3".parse().unwrap(),
                index
            }]
        );
        assert_eq!(stn.resource_state("stn-iface-loop1"), ResourceState::Configured);
    }

    #[test]
    fn test_pending_until_interface() {
        let (sim, mut interfaces, mut stn) = setup();
        let rule = StnConfig::new("loop1", "10.1.1.3");
        stn.configure(&rule).unwrap();
        assert!(stn.resource_state(&rule.key()).is_pending());

        interfaces.configure(&loopback("loop1")).unwrap();
        stn.resolve_created(PrerequisiteKind::Interface, "loop1", 0)
            .unwrap();
        assert_eq!(sim.stn_rules().len(), 1);

        interfaces.delete(&loopback("loop1")).unwrap();
        stn.resolve_deleted(PrerequisiteKind::Interface, "loop1")
            .unwrap();
        assert!(stn.resource_state(&rule.key()).is_pending());

        stn.delete(&rule).unwrap();
        assert_eq!(stn.resource_state(&rule.key()), ResourceState::Unconfigured);
    }

    #[test]
    fn test_released_rule_failure_stays_pending_with_error() {
        let (sim, mut interfaces, mut stn) = setup();
        let rule = StnConfig::new("loop1", "10.1.1.3");
        stn.configure(&rule).unwrap();

        sim.inject_failure("stn_add_del_rule", ApiStatus::InvalidValue);
        interfaces.configure(&loopback("loop1")).unwrap();
        assert!(stn
            .resolve_created(PrerequisiteKind::Interface, "loop1", 0)
            .is_err());
        match stn.resource_state(&rule.key()) {
            ResourceState::Pending(BlockingReason::ApplyError(e)) => {
                assert!(e.contains("stn-iface-loop1"), "{}", e)
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert!(sim.stn_rules().is_empty());

        sim.clear_failures();
        stn.resolve_created(PrerequisiteKind::Interface, "loop1", 0)
            .unwrap();
        assert_eq!(stn.resource_state(&rule.key()), ResourceState::Configured);
        assert_eq!(sim.stn_rules().len(), 1);
    }

    #[test]
    fn test_modify_is_delete_then_add() {
        let (sim, mut interfaces, mut stn) = setup();
        interfaces.configure(&loopback("loop1")).unwrap();
        let old = StnConfig::new("loop1", "10.1.1.3");
        stn.configure(&old).unwrap();
        sim.clear_requests();

        stn.modify(&old, &StnConfig::new("loop1", "10.1.1.4")).unwrap();
        let requests = sim.requests();
        assert_eq!(requests.len(), 2);
        assert!(matches!(requests[0], Request::StnDelRule(_)));
        assert!(matches!(requests[1], Request::StnAddRule(_)));
    }

    #[test]
    fn test_resync() {
        let (sim, mut interfaces, mut stn) = setup();
        interfaces.configure(&loopback("loop1")).unwrap();
        interfaces.configure(&loopback("loop2")).unwrap();
        let loop1 = interfaces.registry().lookup_index("loop1").unwrap();
        let loop2 = interfaces.registry().lookup_index("loop2").unwrap();
        for (address, index) in [("10.0.0.1", loop1), ("10.0.0.9", loop2)] {
            sim.request(Request::StnAddRule(StnRule {
                address: address.parse().unwrap(),
                index,
            }))
            .unwrap();
        }
        sim.clear_requests();

        stn.resync(&[
            StnConfig::new("loop1", "10.0.0.1/32"),
            StnConfig::new("loop3", "10.0.0.3"),
        ])
        .unwrap();

        assert_eq!(sim.count("stn_add_del_rule"), 1);
        assert_eq!(sim.stn_rules().len(), 1);
        assert!(stn.rules().contains("stn-iface-loop1"));
        assert_eq!(stn.pending_keys(), vec!["stn-iface-loop3".to_string()]);
    }
}

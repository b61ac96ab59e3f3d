//! SRv6 configuration types.
//!
//! Addresses are kept as strings the way they arrive from the northbound
//! side and parsed on use, so an invalid SID surfaces as a precondition
//! error on the resource that carries it.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use vswitch_dpapi::api::srv6::{LocalSid, LocalSidBehavior, SegmentList, SrPolicyAdd};
use vswitch_dpapi::{parse_sid, IpNetwork};
use vswitch_orch_common::{ConfigError, ConfigResult};

/// Behavior of a local SID. Interfaces are referenced by logical name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum LocalSidFunction {
    End {
        #[serde(default)]
        psp: bool,
    },
    EndX {
        #[serde(default)]
        psp: bool,
        outgoing_interface: String,
        next_hop: IpAddr,
    },
    EndDx2 {
        outgoing_interface: String,
        #[serde(default)]
        vlan_tag: u32,
    },
    EndDx4 {
        outgoing_interface: String,
        next_hop: Ipv4Addr,
    },
    EndDx6 {
        outgoing_interface: String,
        next_hop: Ipv6Addr,
    },
    EndDt4 {
        vrf_id: u32,
    },
    EndDt6 {
        vrf_id: u32,
    },
}

impl LocalSidFunction {
    /// Interface the behavior forwards to, if any.
    pub fn outgoing_interface(&self) -> Option<&str> {
        match self {
            LocalSidFunction::EndX {
                outgoing_interface, ..
            }
            | LocalSidFunction::EndDx2 {
                outgoing_interface, ..
            }
            | LocalSidFunction::EndDx4 {
                outgoing_interface, ..
            }
            | LocalSidFunction::EndDx6 {
                outgoing_interface, ..
            } => Some(outgoing_interface),
            LocalSidFunction::End { .. }
            | LocalSidFunction::EndDt4 { .. }
            | LocalSidFunction::EndDt6 { .. } => None,
        }
    }

    /// Converts to the dataplane behavior using the resolved interface
    /// index. `index` is ignored by behaviors without an interface.
    fn to_behavior(&self, index: u32) -> LocalSidBehavior {
        match self {
            LocalSidFunction::End { psp } => LocalSidBehavior::End { psp: *psp },
            LocalSidFunction::EndX { psp, next_hop, .. } => LocalSidBehavior::EndX {
                psp: *psp,
                index,
                next_hop: *next_hop,
            },
            LocalSidFunction::EndDx2 { vlan_tag, .. } => LocalSidBehavior::EndDx2 {
                index,
                vlan_tag: *vlan_tag,
            },
            LocalSidFunction::EndDx4 { next_hop, .. } => LocalSidBehavior::EndDx4 {
                index,
                next_hop: *next_hop,
            },
            LocalSidFunction::EndDx6 { next_hop, .. } => LocalSidBehavior::EndDx6 {
                index,
                next_hop: *next_hop,
            },
            LocalSidFunction::EndDt4 { vrf_id } => LocalSidBehavior::EndDt4 { vrf_id: *vrf_id },
            LocalSidFunction::EndDt6 { vrf_id } => LocalSidBehavior::EndDt6 { vrf_id: *vrf_id },
        }
    }
}

/// A local SID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSidConfig {
    pub sid: String,
    #[serde(default)]
    pub installation_vrf_id: u32,
    pub function: LocalSidFunction,
}

impl LocalSidConfig {
    pub fn new(sid: impl Into<String>, function: LocalSidFunction) -> Self {
        Self {
            sid: sid.into(),
            installation_vrf_id: 0,
            function,
        }
    }

    pub fn address(&self) -> ConfigResult<Ipv6Addr> {
        parse_sid(&self.sid).map_err(|e| ConfigError::invalid("local sid", e.to_string()))
    }

    /// Registry key: the canonical form of the SID.
    pub fn key(&self) -> ConfigResult<String> {
        self.address().map(|a| a.to_string())
    }

    /// Builds the dataplane entry. `lookup` resolves interface names.
    pub fn to_local_sid(&self, lookup: impl Fn(&str) -> Option<u32>) -> ConfigResult<LocalSid> {
        let sid = self.address()?;
        let index = match self.function.outgoing_interface() {
            Some(name) => lookup(name).ok_or_else(|| ConfigError::not_found("interface", name))?,
            None => 0,
        };
        Ok(LocalSid {
            sid,
            fib_table: self.installation_vrf_id,
            behavior: self.function.to_behavior(index),
        })
    }
}

/// A weighted list of segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentListConfig {
    #[serde(default)]
    pub weight: u32,
    pub segments: Vec<String>,
}

impl SegmentListConfig {
    pub fn new(weight: u32, segments: &[&str]) -> Self {
        Self {
            weight,
            segments: segments.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn to_segment_list(&self) -> ConfigResult<SegmentList> {
        if self.segments.is_empty() {
            return Err(ConfigError::invalid("segment list", "no segments"));
        }
        let segments = self
            .segments
            .iter()
            .map(|s| parse_sid(s).map_err(|e| ConfigError::invalid("segment list", e.to_string())))
            .collect::<ConfigResult<Vec<_>>>()?;
        Ok(SegmentList {
            weight: self.weight,
            segments,
        })
    }
}

/// An SR policy keyed by its binding SID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub bsid: String,
    #[serde(default)]
    pub installation_vrf_id: u32,
    #[serde(default)]
    pub srh_encapsulation: bool,
    #[serde(default)]
    pub spray_behaviour: bool,
    pub segment_lists: Vec<SegmentListConfig>,
}

impl PolicyConfig {
    pub fn new(bsid: impl Into<String>, segment_lists: Vec<SegmentListConfig>) -> Self {
        Self {
            bsid: bsid.into(),
            installation_vrf_id: 0,
            srh_encapsulation: false,
            spray_behaviour: false,
            segment_lists,
        }
    }

    pub fn address(&self) -> ConfigResult<Ipv6Addr> {
        parse_sid(&self.bsid).map_err(|e| ConfigError::invalid("sr policy", e.to_string()))
    }

    pub fn key(&self) -> ConfigResult<String> {
        self.address().map(|a| a.to_string())
    }

    /// Parses every segment list. A policy needs at least one.
    pub fn lists(&self) -> ConfigResult<Vec<SegmentList>> {
        if self.segment_lists.is_empty() {
            return Err(ConfigError::invalid(
                self.bsid.clone(),
                "policy has no segment list",
            ));
        }
        self.segment_lists
            .iter()
            .map(SegmentListConfig::to_segment_list)
            .collect()
    }

    /// Creation request carrying the first segment list.
    pub fn to_add(&self, first: SegmentList) -> ConfigResult<SrPolicyAdd> {
        Ok(SrPolicyAdd {
            bsid: self.address()?,
            fib_table: self.installation_vrf_id,
            is_spray: self.spray_behaviour,
            is_encap: self.srh_encapsulation,
            first,
        })
    }

    /// Whether `other` can only be reached by deleting and re-adding the
    /// policy. Segment lists alone are changed in place.
    pub fn needs_recreate(&self, other: &PolicyConfig) -> bool {
        self.key().ok() != other.key().ok()
            || self.installation_vrf_id != other.installation_vrf_id
            || self.spray_behaviour != other.spray_behaviour
            || self.srh_encapsulation != other.srh_encapsulation
    }
}

/// Reference from a steering to its policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRef {
    Bsid(String),
    Index(u32),
}

impl PolicyRef {
    /// Prerequisite key the steering waits on while the policy is missing.
    pub fn key(&self) -> ConfigResult<String> {
        match self {
            PolicyRef::Bsid(bsid) => parse_sid(bsid)
                .map(|a| a.to_string())
                .map_err(|e| ConfigError::invalid("sr steering", e.to_string())),
            PolicyRef::Index(index) => Ok(index_key(*index)),
        }
    }
}

/// Prerequisite key of a policy referenced by index.
pub fn index_key(index: u32) -> String {
    format!("index:{}", index)
}

/// Traffic steered into a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SteeringTrafficConfig {
    L3 {
        #[serde(default)]
        installation_vrf_id: u32,
        prefix_address: String,
    },
    L2 {
        interface_name: String,
    },
}

/// A named steering entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SteeringConfig {
    pub name: String,
    pub policy: PolicyRef,
    pub traffic: SteeringTrafficConfig,
}

impl SteeringConfig {
    pub fn l3(name: impl Into<String>, policy: PolicyRef, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy,
            traffic: SteeringTrafficConfig::L3 {
                installation_vrf_id: 0,
                prefix_address: prefix.into(),
            },
        }
    }

    pub fn l2(name: impl Into<String>, policy: PolicyRef, interface: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy,
            traffic: SteeringTrafficConfig::L2 {
                interface_name: interface.into(),
            },
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.is_empty() {
            return Err(ConfigError::invalid("sr steering", "name is empty"));
        }
        self.policy.key()?;
        if let SteeringTrafficConfig::L3 { prefix_address, .. } = &self.traffic {
            prefix_address
                .parse::<IpNetwork>()
                .map_err(|e| ConfigError::invalid(self.name.clone(), e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_sid_resolves_interface() {
        let config = LocalSidConfig::new(
            "a::1",
            LocalSidFunction::EndDx2 {
                outgoing_interface: "memif1".to_string(),
                vlan_tag: 5,
            },
        );
        let sid = config.to_local_sid(|_| Some(4)).unwrap();
        assert_eq!(sid.behavior, LocalSidBehavior::EndDx2 { index: 4, vlan_tag: 5 });

        let err = config.to_local_sid(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_keys_are_canonical() {
        let config = LocalSidConfig::new("A:0:0::1", LocalSidFunction::End { psp: false });
        assert_eq!(config.key().unwrap(), "a::1");
        assert_eq!(PolicyRef::Bsid("B::0001".into()).key().unwrap(), "b::1");
        assert_eq!(PolicyRef::Index(3).key().unwrap(), "index:3");
    }

    #[test]
    fn test_invalid_bsid_is_precondition() {
        let steering = SteeringConfig::l3("s1", PolicyRef::Bsid("nope".into()), "10.0.0.0/24");
        assert!(steering.validate().unwrap_err().is_precondition());
    }

    #[test]
    fn test_policy_needs_lists() {
        let policy = PolicyConfig::new("a::e", vec![]);
        assert!(policy.lists().is_err());
        let policy = PolicyConfig::new("a::e", vec![SegmentListConfig::new(1, &[])]);
        assert!(policy.lists().is_err());
    }

    #[test]
    fn test_recreate_policy() {
        let base = PolicyConfig::new("a::e", vec![SegmentListConfig::new(1, &["b::1"])]);
        let mut lists = base.clone();
        lists.segment_lists.push(SegmentListConfig::new(2, &["c::1"]));
        assert!(!base.needs_recreate(&lists));

        let mut spray = base.clone();
        spray.spray_behaviour = true;
        assert!(base.needs_recreate(&spray));
    }

    #[test]
    fn test_function_json() {
        let config: LocalSidConfig = serde_json::from_str(
            r#"{ "sid": "a::2", "function": { "type": "end_dt4", "vrf_id": 10 } }"#,
        )
        .unwrap();
        assert_eq!(config.function, LocalSidFunction::EndDt4 { vrf_id: 10 });
    }
}

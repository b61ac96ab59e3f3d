//! Resync correlation.
//!
//! Resync reconciles three views of a resource family: the desired set, the
//! name to index snapshot persisted by the previous run, and a fresh
//! inventory dumped from the dataplane. [`correlate`] turns them into a
//! [`ResyncPlan`]; [`execute`] applies the plan through a [`ResyncTarget`]
//! with best-effort failure handling.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use crate::persist::PersistedSnapshot;
use crate::task::{ConfigResult, ErrorList};

/// A resource config that resync can correlate.
pub trait Correlated {
    /// Resource kind. A kind mismatch at a persisted index means the index
    /// was reused and identity does not carry over.
    type Kind: PartialEq + Copy + fmt::Debug;

    fn name(&self) -> &str;
    fn kind(&self) -> Self::Kind;
}

/// One dumped dataplane resource.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryItem<C> {
    pub index: u32,
    pub internal_name: String,
    /// Config reconstructed from the dump; its name is the name the
    /// dataplane reports.
    pub observed: C,
    /// False for default or physical resources, which are registered as-is
    /// and never created or deleted.
    pub configurable: bool,
}

/// What to do with dumped resources when nothing was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColdStartPolicy {
    /// Delete everything configurable, then create the desired set.
    #[default]
    DeleteAll,
    /// Keep dumped resources whose config equals a desired one.
    CompareByValue,
}

impl fmt::Display for ColdStartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColdStartPolicy::DeleteAll => write!(f, "delete-all"),
            ColdStartPolicy::CompareByValue => write!(f, "compare-by-value"),
        }
    }
}

/// A desired resource matched to a dumped one.
#[derive(Debug, Clone, PartialEq)]
pub struct Matched<C> {
    pub desired: C,
    pub index: u32,
    pub observed: C,
}

/// Convergence plan for one resource family.
#[derive(Debug, Clone, PartialEq)]
pub struct ResyncPlan<C> {
    pub register_existing: Vec<InventoryItem<C>>,
    pub to_modify: Vec<Matched<C>>,
    pub to_create: Vec<C>,
    pub to_delete: Vec<InventoryItem<C>>,
    /// Set when nothing was persisted but the dataplane had configurable
    /// resources; deletions then run before creations.
    pub cold_start: bool,
}

impl<C> Default for ResyncPlan<C> {
    fn default() -> Self {
        Self {
            register_existing: Vec::new(),
            to_modify: Vec::new(),
            to_create: Vec::new(),
            to_delete: Vec::new(),
            cold_start: false,
        }
    }
}

/// Returns true if the inventory holds anything configurable.
///
/// Callers may skip the destructive cold start path entirely when this is
/// false.
pub fn verify_dataplane_presence<C>(inventory: &[InventoryItem<C>]) -> bool {
    inventory.iter().any(|item| item.configurable)
}

/// Computes the convergence plan.
///
/// `same_config` is only consulted by [`ColdStartPolicy::CompareByValue`].
pub fn correlate<C, M, F>(
    desired: &[C],
    persisted: &PersistedSnapshot<M>,
    inventory: Vec<InventoryItem<C>>,
    policy: ColdStartPolicy,
    same_config: F,
) -> ResyncPlan<C>
where
    C: Correlated + Clone,
    F: Fn(&C, &C) -> bool,
{
    let mut plan = ResyncPlan::default();
    let (existing, mut working): (Vec<_>, Vec<_>) =
        inventory.into_iter().partition(|item| !item.configurable);
    plan.register_existing = existing;

    if persisted.is_empty() && !working.is_empty() {
        info!(
            "cold start with {} configurable resources, policy {}",
            working.len(),
            policy
        );
        plan.cold_start = true;
        for d in desired {
            let found = match policy {
                ColdStartPolicy::DeleteAll => None,
                ColdStartPolicy::CompareByValue => working.iter().position(|item| {
                    item.observed.kind() == d.kind() && same_config(&item.observed, d)
                }),
            };
            match found {
                Some(pos) => {
                    let item = working.remove(pos);
                    plan.to_modify.push(Matched {
                        desired: d.clone(),
                        index: item.index,
                        observed: item.observed,
                    });
                }
                None => plan.to_create.push(d.clone()),
            }
        }
        plan.to_delete = working;
        return plan;
    }

    let by_index: HashMap<u32, usize> = working
        .iter()
        .enumerate()
        .map(|(pos, item)| (item.index, pos))
        .collect();
    let mut matched: HashSet<usize> = HashSet::new();

    for d in desired {
        let candidate = persisted
            .index_of(d.name())
            .and_then(|index| by_index.get(&index).copied())
            .filter(|pos| !matched.contains(pos));
        match candidate {
            Some(pos) if working[pos].observed.kind() == d.kind() => {
                matched.insert(pos);
                plan.to_modify.push(Matched {
                    desired: d.clone(),
                    index: working[pos].index,
                    observed: working[pos].observed.clone(),
                });
            }
            Some(pos) => {
                debug!(
                    "{}: index {} now holds a {:?}, expected {:?}",
                    d.name(),
                    working[pos].index,
                    working[pos].observed.kind(),
                    d.kind()
                );
                plan.to_create.push(d.clone());
            }
            None => plan.to_create.push(d.clone()),
        }
    }

    plan.to_delete = working
        .into_iter()
        .enumerate()
        .filter(|(pos, _)| !matched.contains(pos))
        .map(|(_, item)| item)
        .collect();
    plan
}

/// Operations a family exposes to [`execute`].
pub trait ResyncTarget<C> {
    /// Registers a default or physical resource under its reported name.
    fn register_existing(&mut self, item: &InventoryItem<C>);

    /// Carries the identity forward, then modifies observed into desired.
    fn adopt(&mut self, matched: &Matched<C>) -> ConfigResult<()>;

    fn create(&mut self, desired: &C) -> ConfigResult<()>;

    /// Registers the resource transiently, then deletes it.
    fn remove_obsolete(&mut self, item: &InventoryItem<C>) -> ConfigResult<()>;
}

/// Counters of one resync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResyncSummary {
    pub registered: usize,
    pub modified: usize,
    pub created: usize,
    pub deleted: usize,
    pub failed: usize,
}

impl ResyncSummary {
    pub fn merge(&mut self, other: ResyncSummary) {
        self.registered += other.registered;
        self.modified += other.modified;
        self.created += other.created;
        self.deleted += other.deleted;
        self.failed += other.failed;
    }
}

/// Applies a plan, attempting every step independently.
///
/// On a cold start obsolete resources are deleted before anything is
/// created. Otherwise deletions run last so that an index the dataplane
/// reuses cannot be attributed to a resource that is still desired.
pub fn execute<C, T>(plan: ResyncPlan<C>, target: &mut T) -> (ResyncSummary, ErrorList)
where
    T: ResyncTarget<C> + ?Sized,
{
    let mut summary = ResyncSummary::default();
    let mut errors = ErrorList::new();

    for item in &plan.register_existing {
        target.register_existing(item);
        summary.registered += 1;
    }

    let mut step = |result: ConfigResult<()>, counter: &mut usize, failed: &mut usize| {
        match result {
            Ok(()) => *counter += 1,
            Err(e) => {
                *failed += e.failure_count();
                errors.push(e);
            }
        }
    };

    let mut failed = 0;
    if plan.cold_start {
        for item in &plan.to_delete {
            step(target.remove_obsolete(item), &mut summary.deleted, &mut failed);
        }
    }
    for matched in &plan.to_modify {
        step(target.adopt(matched), &mut summary.modified, &mut failed);
    }
    for desired in &plan.to_create {
        step(target.create(desired), &mut summary.created, &mut failed);
    }
    if !plan.cold_start {
        for item in &plan.to_delete {
            step(target.remove_obsolete(item), &mut summary.deleted, &mut failed);
        }
    }
    summary.failed = failed;

    (summary, errors)
}

/// Key-matched diff of a desired set against a dumped set.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedDiff<D, A> {
    pub matched: Vec<(D, A)>,
    pub missing: Vec<D>,
    pub obsolete: Vec<A>,
}

/// Pairs desired and actual entries by key, for families whose dumps carry
/// identifying keys and need no persisted identity.
///
/// Output orders follow the inputs. A desired key seen twice only matches
/// once.
pub fn match_by_key<D, A, K, FD, FA>(
    desired: Vec<D>,
    actual: Vec<A>,
    desired_key: FD,
    actual_key: FA,
) -> KeyedDiff<D, A>
where
    K: Eq + Hash,
    FD: Fn(&D) -> K,
    FA: Fn(&A) -> K,
{
    let mut slots: Vec<Option<A>> = actual.into_iter().map(Some).collect();
    let mut by_key: HashMap<K, usize> = HashMap::new();
    for (pos, slot) in slots.iter().enumerate() {
        if let Some(a) = slot {
            by_key.entry(actual_key(a)).or_insert(pos);
        }
    }

    let mut matched = Vec::new();
    let mut missing = Vec::new();
    for d in desired {
        let found = by_key
            .remove(&desired_key(&d))
            .and_then(|pos| slots[pos].take());
        match found {
            Some(a) => matched.push((d, a)),
            None => missing.push(d),
        }
    }

    KeyedDiff {
        matched,
        missing,
        obsolete: slots.into_iter().flatten().collect(),
    }
}

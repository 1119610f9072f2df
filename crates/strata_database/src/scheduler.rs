//! System ordering.
//!
//! [`system_order`] turns `before`/`after` constraints into tiers: every
//! system lands in the earliest tier whose dependencies are all placed in
//! earlier tiers, and systems within a tier are sorted by name. Soft
//! `during` constraints then pull a system into the tier of its targets when
//! the hard constraints still hold there.

use std::collections::{BTreeMap, BTreeSet};

use strata_foundation::{Error, ErrorKind, Name, Result};
use tracing::debug;

/// Scheduling constraints of one system.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schedule {
    /// Systems this one must run before.
    pub before: Vec<Name>,
    /// Systems this one must run after.
    pub after: Vec<Name>,
    /// Systems this one would like to share a tier with.
    pub during: Vec<Name>,
}

impl Schedule {
    /// Creates an unconstrained schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a system this one must run before.
    #[must_use]
    pub fn before(mut self, system: impl Into<Name>) -> Self {
        self.before.push(system.into());
        self
    }

    /// Adds a system this one must run after.
    #[must_use]
    pub fn after(mut self, system: impl Into<Name>) -> Self {
        self.after.push(system.into());
        self
    }

    /// Adds a system this one prefers to run alongside.
    #[must_use]
    pub fn during(mut self, system: impl Into<Name>) -> Self {
        self.during.push(system.into());
        self
    }
}

type Graph = BTreeMap<Name, BTreeSet<Name>>;

/// Computes execution tiers for a set of systems.
///
/// # Errors
///
/// Returns `UnknownSystem` if a `before`/`after` constraint names a system
/// that is not in the set, `CircularDependency` if the hard constraints form
/// a cycle, and `UnresolvedSchedule` if tiers cannot be built.
pub fn system_order(systems: &BTreeMap<Name, Schedule>) -> Result<Vec<Vec<Name>>> {
    if systems.is_empty() {
        return Ok(Vec::new());
    }
    let depends_on = dependency_graph(systems)?;
    detect_cycles(&depends_on)?;
    let mut tiers = build_tiers(&depends_on)?;
    apply_during(&mut tiers, systems, &depends_on);
    tiers.retain(|tier| !tier.is_empty());
    debug!(systems = systems.len(), tiers = tiers.len(), "system order computed");
    Ok(tiers)
}

/// Maps every system to the systems that must run before it.
fn dependency_graph(systems: &BTreeMap<Name, Schedule>) -> Result<Graph> {
    let mut depends_on: Graph = systems
        .keys()
        .map(|name| (name.clone(), BTreeSet::new()))
        .collect();
    let known = |name: &Name| {
        if systems.contains_key(name) {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::UnknownSystem(name.clone())))
        }
    };

    for (name, schedule) in systems {
        for dependency in &schedule.after {
            known(dependency)?;
            depends_on
                .entry(name.clone())
                .or_default()
                .insert(dependency.clone());
        }
        for dependent in &schedule.before {
            known(dependent)?;
            depends_on
                .entry(dependent.clone())
                .or_default()
                .insert(name.clone());
        }
    }
    Ok(depends_on)
}

fn detect_cycles(depends_on: &Graph) -> Result<()> {
    fn visit<'a>(
        node: &'a Name,
        depends_on: &'a Graph,
        visited: &mut BTreeSet<&'a Name>,
        stack: &mut BTreeSet<&'a Name>,
    ) -> bool {
        if stack.contains(node) {
            return true;
        }
        if !visited.insert(node) {
            return false;
        }
        stack.insert(node);
        let cyclic = depends_on
            .get(node)
            .is_some_and(|deps| deps.iter().any(|dep| visit(dep, depends_on, visited, stack)));
        stack.remove(node);
        cyclic
    }

    let mut visited = BTreeSet::new();
    let mut stack = BTreeSet::new();
    for name in depends_on.keys() {
        if visit(name, depends_on, &mut visited, &mut stack) {
            return Err(Error::new(ErrorKind::CircularDependency));
        }
    }
    Ok(())
}

fn build_tiers(depends_on: &Graph) -> Result<Vec<Vec<Name>>> {
    let mut tiers = Vec::new();
    let mut placed: BTreeSet<&Name> = BTreeSet::new();

    while placed.len() < depends_on.len() {
        let tier: Vec<Name> = depends_on
            .iter()
            .filter(|(name, deps)| !placed.contains(name) && deps.iter().all(|d| placed.contains(d)))
            .map(|(name, _)| name.clone())
            .collect();
        if tier.is_empty() {
            return Err(Error::new(ErrorKind::UnresolvedSchedule));
        }
        for name in &tier {
            if let Some((key, _)) = depends_on.get_key_value(name) {
                placed.insert(key);
            }
        }
        tiers.push(tier);
    }
    Ok(tiers)
}

fn tier_of(tiers: &[Vec<Name>], system: &Name) -> Option<usize> {
    tiers.iter().position(|tier| tier.contains(system))
}

/// Picks the tier holding the most `during` targets. Earlier targets win ties.
fn best_target_tier(targets: &[Name], tiers: &[Vec<Name>]) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for target in targets {
        let Some(index) = tier_of(tiers, target) else {
            continue;
        };
        let count = targets
            .iter()
            .filter(|t| tier_of(tiers, t) == Some(index))
            .count();
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((index, count));
        }
    }
    best.map(|(index, _)| index)
}

fn can_move(system: &Name, target: usize, tiers: &[Vec<Name>], depends_on: &Graph) -> bool {
    let deps_before = depends_on.get(system).is_none_or(|deps| {
        deps.iter()
            .all(|dep| tier_of(tiers, dep).is_some_and(|tier| tier < target))
    });
    let dependents_after = depends_on
        .iter()
        .filter(|(_, deps)| deps.contains(system))
        .all(|(dependent, _)| tier_of(tiers, dependent).is_some_and(|tier| tier > target));
    deps_before && dependents_after
}

fn apply_during(tiers: &mut [Vec<Name>], systems: &BTreeMap<Name, Schedule>, depends_on: &Graph) {
    for (system, schedule) in systems {
        if schedule.during.is_empty() {
            continue;
        }
        let (Some(current), Some(target)) = (
            tier_of(tiers, system),
            best_target_tier(&schedule.during, tiers),
        ) else {
            continue;
        };
        if current == target || !can_move(system, target, tiers, depends_on) {
            continue;
        }
        tiers[current].retain(|name| name != system);
        tiers[target].push(system.clone());
        tiers[target].sort();
    }
}

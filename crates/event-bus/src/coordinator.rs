//! In-process consumer group coordination.
//!
//! Every member of a group receives a disjoint subset of the stream's
//! partitions. Membership changes bump the group generation; members holding
//! an older generation are fenced off from committing.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, RwLock};

use crate::{EventBusError, Partition, Result};

#[derive(Debug, Default)]
struct GroupState {
    generation: u64,
    partitions: u32,
    members: BTreeSet<String>,
    assignments: HashMap<String, Vec<Partition>>,
}

impl GroupState {
    /// Round-robin over members sorted by id: partition `i` goes to member `i % n`.
    fn rebalance(&mut self) {
        self.generation += 1;
        self.assignments.clear();

        let members: Vec<&String> = self.members.iter().collect();
        if members.is_empty() {
            return;
        }
        for member in &members {
            self.assignments.insert((*member).clone(), Vec::new());
        }
        for index in 0..self.partitions {
            let member = members[index as usize % members.len()];
            if let Some(owned) = self.assignments.get_mut(member) {
                owned.push(Partition::new(index));
            }
        }
    }
}

/// Partitions owned by a member for one group generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub generation: u64,
    pub partitions: Vec<Partition>,
}

/// Proof that a member's generation was current when taken.
///
/// While held, no rebalance of any group can complete. Consumers hold it
/// across handling a record and committing its offset.
pub struct CommitFence {
    _guard: OwnedRwLockReadGuard<HashMap<String, GroupState>>,
}

/// Assigns stream partitions to the members of consumer groups.
#[derive(Clone, Default)]
pub struct GroupCoordinator {
    groups: Arc<RwLock<HashMap<String, GroupState>>>,
}

impl GroupCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member to a group and rebalances.
    ///
    /// `partitions` is the stream's partition count; a group keeps the largest
    /// count any member reported.
    #[tracing::instrument(skip(self))]
    pub async fn join(&self, group: &str, member: &str, partitions: u32) -> Assignment {
        let mut groups = self.groups.write().await;
        let state = groups.entry(group.to_string()).or_default();

        state.partitions = state.partitions.max(partitions);
        state.members.insert(member.to_string());
        state.rebalance();

        tracing::info!(
            generation = state.generation,
            members = state.members.len(),
            "consumer group rebalanced after join"
        );

        Assignment {
            generation: state.generation,
            partitions: state.assignments.get(member).cloned().unwrap_or_default(),
        }
    }

    /// Removes a member from a group and rebalances. Leaving twice is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn leave(&self, group: &str, member: &str) {
        let mut groups = self.groups.write().await;
        let Some(state) = groups.get_mut(group) else {
            return;
        };
        if state.members.remove(member) {
            state.rebalance();
            tracing::info!(
                generation = state.generation,
                members = state.members.len(),
                "consumer group rebalanced after leave"
            );
        }
    }

    /// Returns the member's current assignment.
    pub async fn assignment(&self, group: &str, member: &str) -> Result<Assignment> {
        let groups = self.groups.read().await;
        let state = Self::member_state(&groups, group, member)?;
        Ok(Assignment {
            generation: state.generation,
            partitions: state.assignments.get(member).cloned().unwrap_or_default(),
        })
    }

    /// Checks that `generation` is still current for the member and holds the
    /// group table until the returned fence is dropped.
    pub async fn fence(&self, group: &str, member: &str, generation: u64) -> Result<CommitFence> {
        let guard = self.groups.clone().read_owned().await;
        let state = Self::member_state(&guard, group, member)?;
        if state.generation != generation {
            return Err(EventBusError::StaleGeneration {
                group: group.to_string(),
                member: member.to_string(),
                held: generation,
                current: state.generation,
            });
        }
        Ok(CommitFence { _guard: guard })
    }

    /// Returns the current generation of a group (0 if it never had members).
    pub async fn generation(&self, group: &str) -> u64 {
        self.groups
            .read()
            .await
            .get(group)
            .map(|s| s.generation)
            .unwrap_or(0)
    }

    /// Returns the sorted member ids of a group.
    pub async fn members(&self, group: &str) -> Vec<String> {
        self.groups
            .read()
            .await
            .get(group)
            .map(|s| s.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn member_state<'a>(
        groups: &'a HashMap<String, GroupState>,
        group: &str,
        member: &str,
    ) -> Result<&'a GroupState> {
        groups
            .get(group)
            .filter(|state| state.members.contains(member))
            .ok_or_else(|| EventBusError::UnknownMember {
                group: group.to_string(),
                member: member.to_string(),
            })
    }
}

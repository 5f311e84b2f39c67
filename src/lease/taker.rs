use std::collections::{BTreeMap, BTreeSet};

use rand::{seq::SliceRandom, Rng};

use super::Lease;

/// What one scan should do to move this host toward its fair share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TakeAction {
    /// Take a lease nobody holds, or whose holder let it expire.
    Acquire(Lease),
    /// Take a fresh lease from the host that holds the most.
    Steal(Lease),
    Idle,
}

/// Decides which lease, if any, this host should take next, from one snapshot of every lease.
pub(crate) struct LeaseTaker {
    host_name: String,
    owned: Vec<Lease>,
    available: Vec<Lease>,
    others: Vec<Lease>,
}

impl LeaseTaker {
    pub(crate) fn new(host_name: impl Into<String>, leases: Vec<Lease>) -> Self {
        let host_name = host_name.into();
        let mut owned = Vec::new();
        let mut available = Vec::new();
        let mut others = Vec::new();

        for lease in leases {
            if lease.is_owned_by(&host_name) {
                owned.push(lease);
            } else if !lease.is_owned() || lease.is_expired() {
                available.push(lease);
            } else {
                others.push(lease);
            }
        }

        Self {
            host_name,
            owned,
            available,
            others,
        }
    }

    /// Leases recorded as ours, expired or not.
    pub(crate) fn owned_leases(&self) -> &[Lease] {
        &self.owned
    }

    /// Hosts that currently count toward the split, never less than one.
    pub(crate) fn host_count(&self) -> usize {
        let mut hosts: BTreeSet<&str> = self.others.iter().map(Lease::owner).collect();
        if !self.owned.is_empty() {
            hosts.insert(&self.host_name);
        }
        hosts.len().max(1)
    }

    pub(crate) fn target_count(&self, total: usize) -> usize {
        let hosts = self.host_count();
        (total + hosts - 1) / hosts
    }

    /// `owned` is how many leases this host still holds after renewing.
    pub(crate) fn next_action<R: Rng + ?Sized>(
        &self,
        total: usize,
        owned: usize,
        rng: &mut R,
    ) -> TakeAction {
        if owned >= self.target_count(total) {
            return TakeAction::Idle;
        }
        if let Some(lease) = self.available.choose(rng) {
            return TakeAction::Acquire(lease.clone());
        }

        match self.steal_candidate(owned) {
            Some(lease) => TakeAction::Steal(lease),
            None => TakeAction::Idle,
        }
    }

    /// The lowest partition of the busiest other host, if it holds at least two more leases than
    /// we do. Ties between busiest hosts go to the lexically smallest name.
    fn steal_candidate(&self, owned: usize) -> Option<Lease> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for lease in &self.others {
            *counts.entry(lease.owner()).or_default() += 1;
        }

        let (biggest, count) = counts.into_iter().rev().max_by_key(|(_, count)| *count)?;
        if count < owned + 2 {
            return None;
        }

        self.others
            .iter()
            .filter(|lease| lease.owner() == biggest)
            .min_by(|a, b| a.partition_id().cmp(b.partition_id()))
            .cloned()
    }
}

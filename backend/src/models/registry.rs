//! Agent registry
//!
//! Tracks which agents currently hold a position (`active`) and which are
//! available to open one (`inactive`). The active list is kept sorted by
//! target ratio so it mirrors the ledger's risk ordering closely enough to
//! pick insertion-hint candidates.
//!
//! # Critical Invariants
//!
//! 1. Every active entry corresponds to exactly one open position
//! 2. An agent is in exactly one of the two collections
//! 3. `active` is sorted by `target_ratio` ascending; a new entry goes before
//!    existing entries with the same target ratio

use crate::ledger::{AccountId, PositionId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One agent with an open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveEntry {
    pub agent: AccountId,
    /// Target collateral ratio `CR*`, fixed for the position's lifetime
    pub target_ratio: f64,
    /// Rational-inattention tolerance `τ`
    pub inattention: f64,
    pub position_id: PositionId,
}

/// Candidate neighbours for a position about to be (re)inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HintCandidates {
    pub upper: Option<PositionId>,
    pub lower: Option<PositionId>,
    /// Insertion index into the active list
    pub index: usize,
}

/// Active and inactive agent pools.
///
/// # Example
/// ```
/// use cdp_simulator_core_rs::ledger::PositionId;
/// use cdp_simulator_core_rs::models::AgentRegistry;
///
/// let mut registry = AgentRegistry::new(3);
/// let agent = registry.activate(1.6, 0.2, PositionId(7)).unwrap();
/// assert_eq!(agent, 1);
/// assert_eq!(registry.active_len(), 1);
/// assert_eq!(registry.inactive_len(), 2);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRegistry {
    active: Vec<ActiveEntry>,
    inactive: VecDeque<AccountId>,
}

impl AgentRegistry {
    /// Registry with agents `1..=num_agents` inactive. Account 0 is the whale
    /// and never enters the registry.
    pub fn new(num_agents: usize) -> Self {
        Self {
            active: Vec::new(),
            inactive: (1..=num_agents).collect(),
        }
    }

    pub fn active(&self) -> &[ActiveEntry] {
        &self.active
    }

    pub fn inactive(&self) -> impl Iterator<Item = AccountId> + '_ {
        self.inactive.iter().copied()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn inactive_len(&self) -> usize {
        self.inactive.len()
    }

    /// First index whose target ratio is not below `ratio`.
    fn bisect_left(&self, ratio: f64) -> usize {
        self.active.partition_point(|e| e.target_ratio < ratio)
    }

    /// Neighbour candidates for a position whose ratio is `ratio`.
    pub fn hint_candidates(&self, ratio: f64) -> HintCandidates {
        if self.active.is_empty() {
            return HintCandidates {
                upper: None,
                lower: None,
                index: 0,
            };
        }
        let n = self.active.len();
        let index = self.bisect_left(ratio);
        HintCandidates {
            upper: Some(self.active[index.min(n - 1)].position_id),
            lower: Some(self.active[index.saturating_sub(1)].position_id),
            index,
        }
    }

    /// Move the next inactive agent into the active list. Returns the agent,
    /// or `None` when the inactive pool is empty.
    pub fn activate(
        &mut self,
        target_ratio: f64,
        inattention: f64,
        position_id: PositionId,
    ) -> Option<AccountId> {
        let agent = self.inactive.pop_front()?;
        let index = self.bisect_left(target_ratio);
        self.active.insert(
            index,
            ActiveEntry {
                agent,
                target_ratio,
                inattention,
                position_id,
            },
        );
        Some(agent)
    }

    /// Next agent that `activate` would take.
    pub fn next_inactive(&self) -> Option<AccountId> {
        self.inactive.front().copied()
    }

    /// Remove the entry holding `position_id` and return its agent to the
    /// inactive pool.
    pub fn remove_by_position(&mut self, position_id: PositionId) -> Option<ActiveEntry> {
        let idx = self
            .active
            .iter()
            .position(|e| e.position_id == position_id)?;
        let entry = self.active.remove(idx);
        self.inactive.push_back(entry.agent);
        Some(entry)
    }

    pub fn find_by_position(&self, position_id: PositionId) -> Option<&ActiveEntry> {
        self.active.iter().find(|e| e.position_id == position_id)
    }
}

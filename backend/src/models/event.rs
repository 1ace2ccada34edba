//! Event logging for simulation replay and auditing.
//!
//! This module defines the Event enum which captures every significant state
//! change during a run. Events enable:
//! - Debugging (understand what happened and when)
//! - Auditing (check ledger effects against agent decisions)
//! - Analysis (liquidation waves, stabilizer activity)
//!
//! # Event Types
//!
//! Events are categorized by simulation phase:
//! - **Cascade**: liquidation batches
//! - **Decisions**: positions opened, closed, adjusted; unresolved shortfalls
//! - **Reserve**: stability-reserve demand updates
//! - **Stabilizers**: ceiling and floor arbitrage, redemptions
//!
//! # Example
//!
//! ```rust
//! use cdp_simulator_core_rs::ledger::PositionId;
//! use cdp_simulator_core_rs::models::Event;
//!
//! let event = Event::PositionClosed {
//!     period: 10,
//!     agent: 4,
//!     position_id: PositionId(42),
//!     debt: 2500.0,
//! };
//!
//! assert_eq!(event.period(), 10);
//! assert_eq!(event.event_type(), "PositionClosed");
//! ```

use crate::ledger::{AccountId, PositionId};
use serde::{Deserialize, Serialize};

/// How an out-of-band position was brought back to target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustAction {
    RepayDebt,
    WithdrawDebt,
    AddCollateral,
    WithdrawCollateral,
}

/// Simulation event capturing a state change.
///
/// All events include a period number for temporal ordering.
/// Events are logged in the order they occur within a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// Agent opened a position through the Open decision model
    PositionOpened {
        period: usize,
        agent: AccountId,
        position_id: PositionId,
        debt: f64,
        collateral: f64,
        target_ratio: f64,
        inattention: f64,
    },

    /// Agent repaid its debt in full and closed the position
    PositionClosed {
        period: usize,
        agent: AccountId,
        position_id: PositionId,
        debt: f64,
    },

    /// Agent moved an out-of-band position back to its target ratio
    PositionAdjusted {
        period: usize,
        agent: AccountId,
        position_id: PositionId,
        action: AdjustAction,
        amount: f64,
    },

    /// Agent could not source enough synthetic asset; the action was skipped
    ShortfallUnresolved {
        period: usize,
        agent: AccountId,
        position_id: PositionId,
        shortfall: f64,
    },

    /// One `liquidate_batch` call
    LiquidationBatch {
        period: usize,
        positions: Vec<PositionId>,
        debt: f64,
        collateral: f64,
    },

    /// Stability-reserve demand updated
    ReserveAdjusted {
        period: usize,
        previous: f64,
        target: f64,
    },

    /// Ceiling arbitrageur minted supply through a new position
    CeilingArbitrage {
        period: usize,
        position_id: PositionId,
        minted: f64,
        price_before: f64,
        price_after: f64,
    },

    /// Floor arbitrage budget decided
    FloorArbitrage {
        period: usize,
        budget: f64,
        price_before: f64,
        price_after: f64,
    },

    /// One `redeem` call
    Redemption {
        period: usize,
        redeemed: f64,
        collateral_drawn: f64,
        fully_redeemed: Vec<PositionId>,
    },
}

impl Event {
    /// Get the period when this event occurred
    pub fn period(&self) -> usize {
        match self {
            Event::PositionOpened { period, .. }
            | Event::PositionClosed { period, .. }
            | Event::PositionAdjusted { period, .. }
            | Event::ShortfallUnresolved { period, .. }
            | Event::LiquidationBatch { period, .. }
            | Event::ReserveAdjusted { period, .. }
            | Event::CeilingArbitrage { period, .. }
            | Event::FloorArbitrage { period, .. }
            | Event::Redemption { period, .. } => *period,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::PositionOpened { .. } => "PositionOpened",
            Event::PositionClosed { .. } => "PositionClosed",
            Event::PositionAdjusted { .. } => "PositionAdjusted",
            Event::ShortfallUnresolved { .. } => "ShortfallUnresolved",
            Event::LiquidationBatch { .. } => "LiquidationBatch",
            Event::ReserveAdjusted { .. } => "ReserveAdjusted",
            Event::CeilingArbitrage { .. } => "CeilingArbitrage",
            Event::FloorArbitrage { .. } => "FloorArbitrage",
            Event::Redemption { .. } => "Redemption",
        }
    }

    /// Get the agent if the event relates to a single agent
    pub fn agent(&self) -> Option<AccountId> {
        match self {
            Event::PositionOpened { agent, .. }
            | Event::PositionClosed { agent, .. }
            | Event::PositionAdjusted { agent, .. }
            | Event::ShortfallUnresolved { agent, .. } => Some(*agent),
            _ => None,
        }
    }
}

/// Event log for storing and querying simulation events.
///
/// This is a simple wrapper around `Vec<Event>` with convenience methods.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    /// Create a new empty event log
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Add an event to the log
    pub fn log(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Get events for a specific period
    pub fn events_at_period(&self, period: usize) -> Vec<&Event> {
        self.events.iter().filter(|e| e.period() == period).collect()
    }

    /// Get events of a specific type
    pub fn events_of_type(&self, event_type: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Get events for a specific agent
    pub fn events_for_agent(&self, agent: AccountId) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.agent() == Some(agent))
            .collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed(period: usize, agent: AccountId) -> Event {
        Event::PositionClosed {
            period,
            agent,
            position_id: PositionId(period as u64),
            debt: 2000.0,
        }
    }

    #[test]
    fn test_filters_by_period_and_type() {
        let mut log = EventLog::new();
        log.log(closed(1, 3));
        log.log(Event::ReserveAdjusted {
            period: 1,
            previous: 0.0,
            target: 1000.0,
        });
        log.log(closed(2, 3));

        assert_eq!(log.len(), 3);
        assert_eq!(log.events_at_period(1).len(), 2);
        assert_eq!(log.events_of_type("PositionClosed").len(), 2);
        assert_eq!(log.events_for_agent(3).len(), 2);
    }

    #[test]
    fn test_system_events_have_no_agent() {
        let event = Event::LiquidationBatch {
            period: 4,
            positions: vec![PositionId(1)],
            debt: 10.0,
            collateral: 1.0,
        };
        assert_eq!(event.agent(), None);
    }
}

//! Governance-token valuation model

pub mod governance;

pub use governance::{GovernanceConfig, GovernanceValuation, Valuation};

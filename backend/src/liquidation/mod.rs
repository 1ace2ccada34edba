//! Liquidation cascade and reserve return accounting

pub mod cascade;
pub mod returns;

pub use cascade::{pending_liquidations, run_cascade, CascadeConfig, CascadeOutcome};
pub use returns::{stability_return, stability_return_or_fallback, ReturnInputs};

//! Deterministic random number generation
//!
//! Uses xorshift64* for fast, deterministic random number generation.
//! All randomness in the simulator goes through this module: every draw site
//! gets its own generator from [`SeedSchedule`].

mod seeds;
mod xorshift;

pub use seeds::{SeedSchedule, Stream};
pub use xorshift::RngManager;

//! Synthetic-asset market: equilibrium price, stabilizers, stability reserve

pub mod equilibrium;
pub mod reserve;
pub mod stabilizer;

pub use equilibrium::{solve_price, supply_for_price, Equilibrium, LiquidityConfig, LiquidityMarket};
pub use reserve::{ReserveConfig, ReserveDemand, ReserveOutcome};
pub use stabilizer::{PriceStabilizer, StabilizerConfig, StabilizerOutcome};

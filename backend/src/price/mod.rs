//! Exogenous price process (collateral price and natural rate)

pub mod process;

pub use process::{CollateralPriceConfig, NaturalRateConfig, PricePaths, PriceRegime};

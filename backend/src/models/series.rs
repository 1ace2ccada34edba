//! Per-period market series
//!
//! Append-only columns indexed by period number. The valuation model and the
//! stability-return calculation read trailing windows from here.

use serde::{Deserialize, Serialize};

/// Which column of [`MarketSeries`] to read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeriesKind {
    LiquidationGain,
    AirdropGain,
    IssuanceFee,
    RedemptionFee,
}

/// Rolling revenue and gain history owned by the orchestrator.
///
/// # Example
/// ```
/// use cdp_simulator_core_rs::models::{MarketSeries, SeriesKind};
///
/// let mut series = MarketSeries::new();
/// series.record(SeriesKind::IssuanceFee, 1, 2.0);
/// series.record(SeriesKind::IssuanceFee, 2, 3.0);
/// assert_eq!(series.window_sum(SeriesKind::IssuanceFee, 3, 720), 5.0);
/// assert_eq!(series.window_sum(SeriesKind::IssuanceFee, 2, 720), 2.0);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSeries {
    liquidation_gain: Vec<f64>,
    airdrop_gain: Vec<f64>,
    issuance_fee: Vec<f64>,
    redemption_fee: Vec<f64>,
}

impl MarketSeries {
    pub fn new() -> Self {
        Self::default()
    }

    fn column(&self, kind: SeriesKind) -> &Vec<f64> {
        match kind {
            SeriesKind::LiquidationGain => &self.liquidation_gain,
            SeriesKind::AirdropGain => &self.airdrop_gain,
            SeriesKind::IssuanceFee => &self.issuance_fee,
            SeriesKind::RedemptionFee => &self.redemption_fee,
        }
    }

    fn column_mut(&mut self, kind: SeriesKind) -> &mut Vec<f64> {
        match kind {
            SeriesKind::LiquidationGain => &mut self.liquidation_gain,
            SeriesKind::AirdropGain => &mut self.airdrop_gain,
            SeriesKind::IssuanceFee => &mut self.issuance_fee,
            SeriesKind::RedemptionFee => &mut self.redemption_fee,
        }
    }

    /// Store `value` for `period`. Skipped periods read as zero.
    pub fn record(&mut self, kind: SeriesKind, period: usize, value: f64) {
        let column = self.column_mut(kind);
        if column.len() <= period {
            column.resize(period + 1, 0.0);
        }
        column[period] = value;
    }

    pub fn get(&self, kind: SeriesKind, period: usize) -> f64 {
        self.column(kind).get(period).copied().unwrap_or(0.0)
    }

    /// Sum over periods `[end - len, end)`, clamped at period 0.
    pub fn window_sum(&self, kind: SeriesKind, end: usize, len: usize) -> f64 {
        let column = self.column(kind);
        let stop = end.min(column.len());
        let start = end.saturating_sub(len).min(stop);
        column[start..stop].iter().sum()
    }
}

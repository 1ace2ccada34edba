//! Stability-reserve return
//!
//! Annualized return on the reserve from liquidation and airdrop gains:
//!
//! ```text
//! t < month:  R^s = (year / t)     · Σ_{τ<t} gain_τ        / (P^s · SP_{t-1})
//! otherwise:  R^s = (year / month) · Σ_{τ∈[t-month,t)} gain_τ / (P^s · SP_{t-1})
//! ```
//!
//! Period 0 has no history and returns the configured initial value. A zero
//! reserve baseline yields [`ActionError::DegenerateReturn`]; the caller
//! substitutes its fallback.

use crate::decisions::ActionError;
use crate::models::{MarketSeries, SeriesKind};

/// Inputs of one return computation.
#[derive(Debug, Clone, Copy)]
pub struct ReturnInputs {
    pub period: usize,
    pub month: usize,
    pub year: usize,
    pub synthetic_price: f64,
    /// Reserve balance at the end of the previous period
    pub reserve_previous: f64,
    pub initial_return: f64,
}

/// Sum of liquidation and airdrop gains over `[end - len, end)`.
pub fn gains_window(series: &MarketSeries, end: usize, len: usize) -> f64 {
    series.window_sum(SeriesKind::LiquidationGain, end, len)
        + series.window_sum(SeriesKind::AirdropGain, end, len)
}

pub fn stability_return(inputs: &ReturnInputs, series: &MarketSeries) -> Result<f64, ActionError> {
    let t = inputs.period;
    if t == 0 {
        return Ok(inputs.initial_return);
    }
    let denominator = inputs.synthetic_price * inputs.reserve_previous;
    if !(denominator > 0.0) {
        return Err(ActionError::DegenerateReturn);
    }
    let year = inputs.year as f64;
    if t < inputs.month {
        Ok((year / t as f64) * gains_window(series, t, t) / denominator)
    } else {
        Ok((year / inputs.month as f64) * gains_window(series, t, inputs.month) / denominator)
    }
}

/// [`stability_return`] with [`ActionError::DegenerateReturn`], its only
/// error, recovered as `2 × initial`.
pub fn stability_return_or_fallback(inputs: &ReturnInputs, series: &MarketSeries) -> f64 {
    stability_return(inputs, series).unwrap_or(2.0 * inputs.initial_return)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(period: usize, reserve_previous: f64) -> ReturnInputs {
        ReturnInputs {
            period,
            month: 720,
            year: 8760,
            synthetic_price: 1.0,
            reserve_previous,
            initial_return: 0.2,
        }
    }

    #[test]
    fn test_first_period_returns_initial_value() {
        let series = MarketSeries::new();
        assert_eq!(stability_return(&inputs(0, 0.0), &series), Ok(0.2));
    }

    #[test]
    fn test_empty_reserve_is_degenerate() {
        let series = MarketSeries::new();
        assert_eq!(
            stability_return(&inputs(5, 0.0), &series),
            Err(ActionError::DegenerateReturn)
        );
        assert_eq!(stability_return_or_fallback(&inputs(5, 0.0), &series), 0.4);
    }

    #[test]
    fn test_early_return_annualizes_elapsed_history() {
        let mut series = MarketSeries::new();
        series.record(SeriesKind::LiquidationGain, 2, 10.0);
        series.record(SeriesKind::AirdropGain, 3, 5.0);
        let r = stability_return(&inputs(4, 1000.0), &series).unwrap();
        assert!((r - (8760.0 / 4.0) * 15.0 / 1000.0).abs() < 1e-12);
    }

    #[test]
    fn test_late_return_uses_trailing_month() {
        let mut series = MarketSeries::new();
        series.record(SeriesKind::LiquidationGain, 10, 1e6);
        series.record(SeriesKind::LiquidationGain, 1000, 100.0);
        let r = stability_return(&inputs(1500, 1000.0), &series).unwrap();
        assert!((r - (8760.0 / 720.0) * 100.0 / 1000.0).abs() < 1e-12);
    }

    #[test]
    fn test_fallback_passes_computed_return_through() {
        let mut series = MarketSeries::new();
        series.record(SeriesKind::LiquidationGain, 1, 20.0);
        let computed = stability_return(&inputs(2, 500.0), &series).unwrap();
        assert_eq!(stability_return_or_fallback(&inputs(2, 500.0), &series), computed);
        assert_eq!(stability_return_or_fallback(&inputs(2, f64::NAN), &series), 0.4);
    }
}

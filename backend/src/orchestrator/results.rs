//! Results export
//!
//! One [`PeriodRecord`] per simulated period, collected into a
//! [`ResultsTable`] stamped with a hash of the configuration that produced it.
//! The table is written as CSV (header plus one row per period) or JSON.
//!
//! # Config Matching
//!
//! The hash is SHA-256 over the configuration serialized as canonical JSON
//! (object keys sorted), so two tables with the same hash came from the same
//! parameters and seed.

use crate::orchestrator::SimulationError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{self, Write};

/// CSV column names, in output order.
pub const CSV_HEADER: [&str; 17] = [
    "iteration",
    "collateral_price",
    "synthetic_price",
    "governance_price",
    "num_positions",
    "total_collateral",
    "total_debt",
    "tcr",
    "recovery_mode",
    "worst_icr",
    "reserve_balance",
    "reserve_collateral",
    "total_collateral_added",
    "total_collateral_liquidated",
    "total_redeemed",
    "natural_rate",
    "stability_return",
];

/// Market and ledger state at the end of one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodRecord {
    pub period: usize,
    pub collateral_price: f64,
    pub synthetic_price: f64,
    pub governance_price: f64,
    pub position_count: usize,
    pub total_collateral: f64,
    pub total_debt: f64,
    pub total_collateral_ratio: f64,
    pub recovery_mode: bool,
    /// Collateral ratio of the riskiest position, if any
    pub worst_ratio: Option<f64>,
    pub reserve_balance: f64,
    pub reserve_collateral: f64,
    pub total_collateral_added: f64,
    pub total_collateral_liquidated: f64,
    pub total_redeemed: f64,
    pub natural_rate: f64,
    pub stability_return: f64,
}

impl PeriodRecord {
    fn write_csv_row<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let worst = self.worst_ratio.map(|r| r.to_string()).unwrap_or_default();
        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            self.period,
            self.collateral_price,
            self.synthetic_price,
            self.governance_price,
            self.position_count,
            self.total_collateral,
            self.total_debt,
            self.total_collateral_ratio,
            self.recovery_mode,
            worst,
            self.reserve_balance,
            self.reserve_collateral,
            self.total_collateral_added,
            self.total_collateral_liquidated,
            self.total_redeemed,
            self.natural_rate,
            self.stability_return,
        )
    }
}

/// Every period record of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsTable {
    /// SHA-256 of the canonical config JSON
    pub config_hash: String,
    records: Vec<PeriodRecord>,
}

impl ResultsTable {
    pub fn new(config_hash: String) -> Self {
        Self {
            config_hash,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: PeriodRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[PeriodRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&PeriodRecord> {
        self.records.last()
    }

    pub fn write_csv<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", CSV_HEADER.join(","))?;
        for record in &self.records {
            record.write_csv_row(out)?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, SimulationError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SimulationError::Serialization(format!("Results serialization failed: {}", e)))
    }
}

/// Compute SHA256 hash of configuration
///
/// Uses canonical JSON serialization with sorted keys to ensure
/// deterministic hashing regardless of map iteration order.
pub fn compute_config_hash<T: Serialize>(config: &T) -> Result<String, SimulationError> {
    use serde_json::Value;
    use std::collections::BTreeMap;

    let value = serde_json::to_value(config).map_err(|e| {
        SimulationError::Serialization(format!("Config serialization failed: {}", e))
    })?;

    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let json = serde_json::to_string(&canonicalize(value)).map_err(|e| {
        SimulationError::Serialization(format!("Config serialization failed: {}", e))
    })?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::OrchestratorConfig;

    fn record(period: usize, worst_ratio: Option<f64>) -> PeriodRecord {
        PeriodRecord {
            period,
            collateral_price: 2000.0,
            synthetic_price: 1.0,
            governance_price: 0.4,
            position_count: 3,
            total_collateral: 100.0,
            total_debt: 50_000.0,
            total_collateral_ratio: 4.0,
            recovery_mode: false,
            worst_ratio,
            reserve_balance: 1000.0,
            reserve_collateral: 0.0,
            total_collateral_added: 100.0,
            total_collateral_liquidated: 0.0,
            total_redeemed: 0.0,
            natural_rate: 0.2,
            stability_return: 0.4,
        }
    }

    #[test]
    fn test_csv_has_header_and_one_row_per_period() {
        let mut table = ResultsTable::new("abc".to_string());
        table.push(record(1, Some(1.5)));
        table.push(record(2, None));
        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("iteration,collateral_price"));
        assert_eq!(lines[1].split(',').count(), CSV_HEADER.len());
        assert!(lines[1].starts_with("1,2000,1,0.4,3,"));
        assert_eq!(lines[2].split(',').nth(9), Some(""));
    }

    #[test]
    fn test_config_hash_is_stable_and_sensitive() {
        let config = OrchestratorConfig::default();
        let a = compute_config_hash(&config).unwrap();
        let b = compute_config_hash(&config.clone()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let other = OrchestratorConfig {
            rng_seed: config.rng_seed + 1,
            ..config
        };
        assert_ne!(a, compute_config_hash(&other).unwrap());
    }

    #[test]
    fn test_json_round_trips_table() {
        let mut table = ResultsTable::new("abc".to_string());
        table.push(record(1, Some(1.5)));
        let json = table.to_json().unwrap();
        let back: ResultsTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }
}

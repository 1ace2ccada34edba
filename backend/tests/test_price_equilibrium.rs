//! Liquidity-pool price equilibrium
//!
//! Property tests over the isoelastic clearing rule, plus the market's view
//! of a live ledger.

use cdp_simulator_core_rs::ledger::{InsertHints, Ledger, LedgerParams, MemoryLedger, WHALE};
use cdp_simulator_core_rs::market::{solve_price, supply_for_price, LiquidityConfig, LiquidityMarket};
use cdp_simulator_core_rs::SeedSchedule;
use proptest::prelude::*;

fn seeded_ledger() -> MemoryLedger {
    let mut ledger = MemoryLedger::new(LedgerParams::default(), 2000.0);
    ledger
        .open_position(WHALE, 1_000_000.0, InsertHints::default(), 3000.0)
        .unwrap();
    ledger.provide_to_reserve(WHALE, 100_000.0).unwrap();
    ledger
}

proptest! {
    #[test]
    fn prop_price_stays_positive(
        previous in 0.01f64..10.0,
        pool in 1.0f64..1e9,
        demand in 1.0f64..1e9,
        elasticity in -100.0f64..=-1.0,
    ) {
        let price = solve_price(previous, pool, demand, elasticity);
        prop_assert!(price.is_finite());
        prop_assert!(price > 0.0);
    }

    #[test]
    fn prop_more_supply_never_raises_price(
        previous in 0.5f64..2.0,
        pool in 1_000.0f64..1e7,
        extra in 0.0f64..1e6,
        demand in 1_000.0f64..1e7,
        elasticity in -50.0f64..=-1.0,
    ) {
        let base = solve_price(previous, pool, demand, elasticity);
        let flooded = solve_price(previous, pool + extra, demand, elasticity);
        prop_assert!(flooded <= base * (1.0 + 1e-12));
    }

    #[test]
    fn prop_unchanged_demand_keeps_price(
        previous in 0.01f64..10.0,
        pool in 1.0f64..1e9,
        elasticity in -100.0f64..=-1.0,
    ) {
        let price = solve_price(previous, pool, pool, elasticity);
        prop_assert!((price - previous).abs() <= 1e-12 * previous);
    }

    #[test]
    fn prop_supply_for_price_inverts_clearing(
        previous in 0.5f64..2.0,
        reserve in 0.0f64..1e6,
        pool in 1_000.0f64..1e7,
        shock in -0.05f64..0.05,
        elasticity in -40.0f64..=-1.0,
    ) {
        let demand = pool * (1.0 + shock);
        let price = solve_price(previous, pool, demand, elasticity);
        let supply = supply_for_price(reserve, demand, price, previous, elasticity);
        let expected = reserve + pool;
        prop_assert!((supply - expected).abs() <= 1e-6 * expected);
    }
}

#[test]
fn test_empty_pool_carries_price_over() {
    assert_eq!(solve_price(1.03, 0.0, 500.0, -20.0), 1.03);
    assert_eq!(solve_price(1.03, 500.0, 0.0, -20.0), 1.03);
    assert_eq!(solve_price(1.03, -5.0, 500.0, -20.0), 1.03);
}

#[test]
fn test_elasticity_above_minus_one_rejected() {
    let config = LiquidityConfig {
        elasticity: -0.5,
        ..Default::default()
    };
    assert!(LiquidityMarket::new(&config).is_err());
}

#[test]
fn test_clear_reads_pool_from_ledger() {
    let ledger = seeded_ledger();
    let market = LiquidityMarket::new(&LiquidityConfig {
        volatility: 0.0,
        ..Default::default()
    })
    .unwrap();
    let schedule = SeedSchedule::new(3);

    let eq = market.clear(&ledger, 1.0, &schedule, 1);
    assert_eq!(eq.reserve, 100_000.0);
    assert!((eq.supply - ledger.total_supply()).abs() < 1e-9);
    assert!((eq.pool - (eq.supply - eq.reserve)).abs() < 1e-9);
    assert_eq!(eq.pool_next, eq.pool);
    assert_eq!(eq.price, 1.0);
}

#[test]
fn test_growing_demand_lifts_price() {
    let ledger = seeded_ledger();
    let market = LiquidityMarket::new(&LiquidityConfig {
        volatility: 0.0,
        drift: 1.01,
        elasticity: -20.0,
    })
    .unwrap();
    let eq = market.clear(&ledger, 1.0, &SeedSchedule::new(3), 1);
    assert!(eq.pool_next > eq.pool);
    assert!(eq.price > 1.0);
    // (1/1.01)^(-1/20)
    assert!((eq.price - 1.01f64.powf(0.05)).abs() < 1e-12);
}

#[test]
fn test_demand_shock_is_deterministic_per_period() {
    let market = LiquidityMarket::new(&LiquidityConfig::default()).unwrap();
    let schedule = SeedSchedule::new(11);
    let a = market.pool_next(50_000.0, &schedule, 12);
    let b = market.pool_next(50_000.0, &schedule, 12);
    let c = market.pool_next(50_000.0, &schedule, 13);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a > 0.0);
}

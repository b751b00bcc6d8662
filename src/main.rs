//! vAMM Perpetuals Simulation.
//!
//! Walks the curve and margin lifecycle scenario by scenario, then replays a seeded
//! GBM index path against a book of levered traders and reports the liquidations.

use clap::Parser;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use vamm_core::*;

type SimResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(name = "vamm-sim")]
#[command(about = "Simulate a vAMM perpetual market with cross-margin liquidations")]
struct Args {
    /// JSON config file; overrides --preset
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "default")]
    preset: Preset,

    /// Seed for the index path
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Replay at most this many index points
    #[arg(long)]
    steps: Option<usize>,

    /// Traders in the replay book
    #[arg(long, default_value = "8")]
    traders: usize,

    /// Skip the walkthrough and only run the replay
    #[arg(long)]
    replay_only: bool,
}

fn main() -> SimResult {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => SimulationConfig::load(path)?,
        None => args.preset.config(),
    };
    config.validate()?;

    println!("vAMM Perpetuals Simulation");
    println!("Constant-Product Curve, Cross Margin, Two-Stage Liquidation\n");

    if !args.replay_only {
        scenario_1_round_trip()?;
        scenario_2_repeg_pnl()?;
        scenario_3_leverage_cap()?;
        scenario_4_partial_liquidation()?;
        scenario_5_full_liquidation()?;
    }
    scenario_6_index_replay(&config, &args)?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

fn eth_engine() -> Result<(Engine, MarketId), EngineError> {
    let mut engine = Engine::new(EngineConfig::default());
    let market = engine.add_market(MarketConfig::eth_perp())?;
    Ok((engine, market))
}

/// A long and an equal short on the same curve cancel out.
fn scenario_1_round_trip() -> SimResult {
    println!("Scenario 1: Long Then Short Restores Spot\n");

    let (mut engine, eth) = eth_engine()?;
    let trader = engine.create_trader(Quote::new(dec!(100)))?;
    let spot_before = engine.spot_price(eth)?;
    println!("  k = 1,000,000, peg = 2000, spot ${}", spot_before);

    let long = engine.open_position(trader, eth, dec!(10))?;
    println!(
        "  Long $10: {} ETH @ ${}, spot now ${}",
        long.size(),
        long.entry_price().map_or(Decimal::ZERO, |p| p.value()).round_dp(4),
        engine.spot_price(eth)?.value().round_dp(6)
    );

    let short = engine.open_position(trader, eth, dec!(-10))?;
    println!(
        "  Short $10: {} ETH, spot back to ${}\n",
        short.size(),
        engine.spot_price(eth)?
    );
    Ok(())
}

/// Repegging moves every position's value without touching reserves.
fn scenario_2_repeg_pnl() -> SimResult {
    println!("Scenario 2: Repeg and PnL\n");

    let (mut engine, eth) = eth_engine()?;
    let bull = engine.create_trader(Quote::new(dec!(1000)))?;
    let bear = engine.create_trader(Quote::new(dec!(1000)))?;
    engine.open_position(bull, eth, dec!(2000))?;
    engine.open_position(bear, eth, dec!(-2000))?;

    for peg in [dec!(2100), dec!(1900)] {
        engine.repeg(eth, peg)?;
        println!("  Peg -> {}", peg);
        print_pnl(&engine, bull, bear)?;
    }

    let pnl = engine.close_position(bull, 0)?;
    println!(
        "  Bull closes: realized ${}, margin ${}\n",
        pnl.value().round_dp(4),
        engine.trader(bull)?.margin().value().round_dp(4)
    );
    Ok(())
}

fn print_pnl(engine: &Engine, long_id: TraderId, short_id: TraderId) -> SimResult {
    let long = engine.margin_summary(long_id)?;
    let short = engine.margin_summary(short_id)?;
    println!(
        "    Long PnL: ${}, Short PnL: ${}",
        long.unrealized_pnl.value().round_dp(4),
        short.unrealized_pnl.value().round_dp(4)
    );
    Ok(())
}

/// Cross-margin leverage is capped below 10x.
fn scenario_3_leverage_cap() -> SimResult {
    println!("Scenario 3: Leverage Cap\n");

    let (mut engine, eth) = eth_engine()?;
    let trader = engine.create_trader(Quote::new(dec!(100)))?;

    engine.open_position(trader, eth, dec!(600))?;
    println!("  $600 long on $100 margin: accepted (6x)");

    match engine.open_position(trader, eth, dec!(-400)) {
        Ok(_) => println!("  $400 short: accepted"),
        Err(e) => println!("  $400 short: rejected ({})", e),
    }
    match engine.withdraw_margin(trader, Quote::new(dec!(50))) {
        Ok(m) => println!("  Withdraw $50: accepted, margin ${}", m),
        Err(e) => println!("  Withdraw $50: rejected ({})", e),
    }
    println!();
    Ok(())
}

/// Ratio between 5% and 6.25%: a quarter of the book is unwound.
fn scenario_4_partial_liquidation() -> SimResult {
    println!("Scenario 4: Partial Liquidation\n");

    let (mut engine, eth) = eth_engine()?;
    let trader = engine.create_trader(Quote::new(dec!(100)))?;
    engine.open_position(trader, eth, dec!(900))?;
    engine.repeg(eth, dec!(1890))?;

    let ratio = engine.margin_summary(trader)?.margin_ratio;
    println!("  $900 long on $100, peg drops 5.5%: ratio {}", ratio.round_dp(5));

    for report in engine.check_liquidations() {
        println!(
            "  {:?} liquidation: pnl ${}, penalty ${}",
            report.kind,
            report.realized_pnl.value().round_dp(4),
            report.penalty.value().round_dp(4)
        );
    }
    let summary = engine.margin_summary(trader)?;
    println!(
        "  After: margin ${}, notional ${}, ratio {}\n",
        summary.margin.value().round_dp(4),
        summary.notional.value().round_dp(4),
        summary.margin_ratio.round_dp(5)
    );
    Ok(())
}

/// Ratio under 5%: everything closes and the margin goes to the fund.
fn scenario_5_full_liquidation() -> SimResult {
    println!("Scenario 5: Full Liquidation and Bad Debt\n");

    let (mut engine, eth) = eth_engine()?;
    engine.fund_insurance(Quote::new(dec!(50)));
    let wobbly = engine.create_trader(Quote::new(dec!(100)))?;
    let sunk = engine.create_trader(Quote::new(dec!(100)))?;
    engine.open_position(wobbly, eth, dec!(500))?;
    engine.open_position(sunk, eth, dec!(900))?;
    engine.repeg(eth, dec!(1750))?;

    for report in engine.check_liquidations() {
        println!(
            "  {} {:?}: forfeited ${}, bad debt ${}, covered ${}",
            report.trader_id,
            report.kind,
            report.forfeited.value().round_dp(4),
            report.bad_debt.value().round_dp(4),
            report.covered_by_insurance.value().round_dp(4)
        );
    }
    let fund = engine.insurance_fund();
    println!(
        "  Insurance fund: ${}, uncovered debt ${}\n",
        fund.balance.value().round_dp(4),
        fund.uncovered_debt.value().round_dp(4)
    );
    Ok(())
}

/// Seeded GBM index path replayed against a book of traders at rising leverage.
fn scenario_6_index_replay(config: &SimulationConfig, args: &Args) -> SimResult {
    println!("Scenario 6: Index Replay (seed {})\n", args.seed);

    let mut engine = Engine::from_config(config)?;
    let market_id = config.markets[0].id;
    let spot = engine.spot_price(market_id)?.value();

    let mut params = config.price_path.clone();
    params.initial_price = spot.to_f64().unwrap_or(params.initial_price);
    let path = generate_gbm(&params, &mut seeded_rng(args.seed))?;
    let prices: Vec<Decimal> = match args.steps {
        Some(n) => path.prices.iter().copied().take(n).collect(),
        None => path.prices.clone(),
    };

    let max_leverage = config.max_leverage();
    for i in 0..args.traders {
        let trader = engine.create_trader(Quote::new(dec!(1000)))?;
        // spread leverage from 1x up to just under the cap, alternating sides
        let leverage = Decimal::ONE
            + (max_leverage - dec!(1.5)) * Decimal::from(i as u64)
                / Decimal::from(args.traders.max(2) as u64 - 1);
        let size = dec!(1000) * leverage;
        let signed = if i % 2 == 0 { size } else { -size };
        if let Err(e) = engine.open_position(trader, market_id, signed) {
            println!("  {} skipped: {}", trader, e);
        }
    }

    let report = engine.replay_index_path(market_id, &prices)?;
    let low = prices.iter().copied().min().unwrap_or(Decimal::ZERO);
    let high = prices.iter().copied().max().unwrap_or(Decimal::ZERO);

    println!("  {} steps, index range ${} - ${}", report.steps.len(), low.round_dp(2), high.round_dp(2));
    println!(
        "  Liquidations: {} partial, {} full",
        report.partial_liquidations(),
        report.full_liquidations()
    );
    println!(
        "  Bad debt ${}, insurance ${}",
        report.total_bad_debt().value().round_dp(4),
        report.insurance_balance.value().round_dp(4)
    );

    let survivors = engine.traders().filter(|t| !t.positions().is_empty()).count();
    println!("  Traders still open: {}/{}", survivors, args.traders);
    if let Some(last) = report.steps.last() {
        println!("  Final spot ${}, peg {}", last.spot_price.value().round_dp(2), last.peg_multiplier.round_dp(4));
    }

    let mut audit = EventCollector::new();
    engine.forward_events(&mut audit);
    let liquidation_events = audit
        .events()
        .iter()
        .filter(|e| e.payload.kind().ends_with("_liquidation"))
        .count();
    println!(
        "  Events logged: {} ({} liquidation)",
        audit.events().len(),
        liquidation_events
    );
    Ok(())
}

use std::sync::Arc;

use anchor_amm::{
    engine::{QuoteService, TradeEngine},
    execution::{TradeExecutor, TradeOrder},
    types::{PoolId, TokenInfo, TradeEvent, TradeRequest, Wad},
    utils::{
        clock::SystemClock,
        config::{Config, PoolConfig},
        logger::init,
    },
};
use anyhow::{Context, bail};
use rust_decimal_macros::dec;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

const DEADLINE_MS: u64 = 60_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;
    init(config.logging_config());
    info!("Starting Anchor AMM");
    config.validate()?;

    if !config.execution_config().dry_run {
        bail!("no settlement client is configured; set execution.dry_run = true");
    }

    let engine = Arc::new(TradeEngine::from_config(&config, Arc::new(SystemClock))?);
    if engine.pool_ids().is_empty() {
        warn!("No pools configured, seeding the demo DAI/ETH pool");
        engine.create_pool(&demo_pool())?;
    }

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Event log skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let quotes = QuoteService::new(engine.clone());
    let executor = TradeExecutor::dry_run(engine.clone(), config.execution_config().clone());

    run_until_shutdown(run_script(&quotes, &executor)).await?;

    let stats = executor.stats();
    info!(
        "Anchor AMM shutdown complete: {} settled, {} reverted, {} rejected",
        stats.settled, stats.reverted, stats.rejected
    );
    Ok(())
}

fn demo_pool() -> PoolConfig {
    PoolConfig {
        token: TokenInfo::new("DAI").with_name("Dai Stablecoin"),
        eth_reserve: dec!(1000),
        token_reserve: dec!(3200000),
        spot_price: Some(dec!(3200)),
        buy_anchor: Some(dec!(3250)),
        sell_anchor: Some(dec!(3150)),
        relaxation_half_life_secs: None,
        provider: "treasury".into(),
    }
}

fn log_event(event: &TradeEvent) {
    match event {
        TradeEvent::Rejected(_) | TradeEvent::Reverted(_) => warn!("{}", event.description()),
        _ => debug!("{}", event.description()),
    }
}

/// Preview and execute a fixed set of trades on every pool
async fn run_script(quotes: &QuoteService, executor: &TradeExecutor) -> anyhow::Result<()> {
    let engine = executor.engine();
    for pool_id in engine.pool_ids() {
        for request in scripted_requests(engine, &pool_id)? {
            let quote = match quotes.quote(&request) {
                Ok(quote) => quote,
                Err(e) => {
                    warn!("Skipping {}: {}", request.description(), e);
                    continue;
                }
            };
            info!(
                "Quote {}: out {} (impact {:.4}%, price {})",
                request.description(),
                quote.amount_out,
                quote.price_impact_percent(),
                quote.effective_price
            );

            let min_amount_out = quotes.suggest_min_amount_out(&quote, dec!(0.005))?;
            let order = TradeOrder::new(request, min_amount_out, engine.now() + DEADLINE_MS);
            let result = executor.execute(order).await?;
            info!("{}", result.summary());
        }

        let prices = engine.effective_prices(&pool_id)?;
        info!(
            "{} anchors: buy {} / spot {} / sell {}",
            pool_id, prices.buy, prices.spot, prices.sell
        );
    }
    Ok(())
}

fn scripted_requests(engine: &TradeEngine, pool_id: &PoolId) -> anyhow::Result<Vec<TradeRequest>> {
    let pool = engine.pool_snapshot(pool_id)?;
    let Some(ratio) = pool.reserve_ratio()? else {
        return Ok(Vec::new());
    };

    let eth = Wad::from_units(1);
    let tokens = Wad::from_decimal(ratio)?;
    let lp_share = Wad::from_decimal(pool.lp_total_supply().to_decimal()? / dec!(1000))?;
    let provider = pool.lp_accounts().next().map(|(account, _)| account.clone());

    let mut requests = vec![
        TradeRequest::buy(pool_id.clone(), Wad::from_units(10)),
        TradeRequest::sell(pool_id.clone(), tokens),
        TradeRequest::deposit(pool_id.clone(), "demo-lp", eth, tokens),
    ];
    if let Some(provider) = provider {
        requests.push(TradeRequest::withdraw(pool_id.clone(), provider, lp_share));
    }
    Ok(requests)
}

/// Run `work` until it finishes or the process is asked to stop
async fn run_until_shutdown<F>(work: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = anyhow::Result<()>>,
{
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl-C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
        result = work => {
            if let Err(e) = &result {
                error!("Demo script stopped with error: {}", e);
            }
            return result;
        }
    }
    Ok(())
}

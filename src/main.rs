use anyhow::{bail, Context};
use chrono::{DateTime, Datelike, Utc};
use clap::{Parser, Subcommand};
use quantdesk::backtest::{BacktestRequest, BacktestService, MarketScenario, SyntheticDataGenerator};
use quantdesk::collector::{
    month_range, BackfillHandler, BackfillRequest, BackfillService, CandleCollector,
    PollingTrigger, BACKFILL_TASK, DEFAULT_TIMEFRAMES,
};
use quantdesk::config::{AppConfig, TriggerConfig};
use quantdesk::execution::{
    Exchange, ExchangeConnector, OrderService, PaperExchange, PaperExchangeFactory, PaperMarket,
    TaskQueue,
};
use quantdesk::ledger::PositionLedger;
use quantdesk::live::{SignalLoop, LOOKBACK_CANDLES};
use quantdesk::persistence::{
    CandleStore, FillStore, MemoryStore, OrderStore, PositionStore, PostgresStore,
    RedisCandleStore, RiskPolicyStore, StaticCredentials,
};
use quantdesk::risk::RiskService;
use quantdesk::strategy::StrategyConfig;
use quantdesk::{MarketKey, Timeframe};
use std::sync::Arc;

/// Upper bound on how often strategy markets are polled
const STRATEGY_POLL_SECS: u64 = 300;

#[derive(Parser)]
#[command(name = "quantdesk", version, about = "Crypto trading signals, orders and backtests")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect candles, evaluate strategies and trade (paper exchange)
    Run,

    /// Replay a strategy over stored candles
    Backtest {
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value = "1h")]
        timeframe: Timeframe,
        /// rsi, macd, ma_crossover or bollinger
        #[arg(long, default_value = "rsi")]
        strategy: String,
        /// Strategy parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
        #[arg(long)]
        from: DateTime<Utc>,
        #[arg(long)]
        to: DateTime<Utc>,
        #[arg(long)]
        capital: Option<f64>,
        /// Fill the window with seeded synthetic candles first
        #[arg(long)]
        synthetic: Option<u64>,
    },

    /// Load historical candles month by month
    Backfill {
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value = "1h")]
        timeframe: Timeframe,
        #[arg(long)]
        start_year: i32,
        #[arg(long)]
        start_month: u32,
        #[arg(long)]
        end_year: Option<i32>,
        #[arg(long)]
        end_month: Option<u32>,
        /// Backfill seeded synthetic candles (paper mode has no history source)
        #[arg(long)]
        synthetic: Option<u64>,
    },

    /// Rebuild a position from its fill history
    Reconcile {
        #[arg(long)]
        account: String,
        #[arg(long)]
        symbol: String,
    },
}

struct Stores {
    candles: Arc<dyn CandleStore>,
    orders: Arc<dyn OrderStore>,
    fills: Arc<dyn FillStore>,
    positions: Arc<dyn PositionStore>,
    policies: Arc<dyn RiskPolicyStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = AppConfig::load().context("loading configuration")?;
    let stores = open_stores(&config).await?;

    match cli.command {
        Command::Run => run(config, stores).await,
        Command::Backtest {
            symbol,
            timeframe,
            strategy,
            params,
            from,
            to,
            capital,
            synthetic,
        } => {
            let params: serde_json::Value = match params {
                Some(raw) => serde_json::from_str(&raw).context("parsing --params")?,
                None => serde_json::Value::Null,
            };
            let Some(strategy) = StrategyConfig::from_parts(&strategy, &params) else {
                bail!("unknown strategy or invalid parameters: {}", strategy);
            };

            if let Some(seed) = synthetic {
                let count = ((to - from).num_milliseconds() / timeframe.duration_ms()).max(0) as usize + 1;
                let candles = SyntheticDataGenerator::new(seed)
                    .with_start(from)
                    .generate(MarketScenario::Sideways, count, timeframe);
                let key = MarketKey::new(&config.exchange_id, &symbol, timeframe);
                stores.candles.upsert_candles(&key, &candles).await?;
            }

            let service = BacktestService::new(stores.candles, &config.exchange_id, config.backtest.clone());
            let result = service
                .run(&BacktestRequest {
                    symbol,
                    timeframe,
                    strategy,
                    from,
                    to,
                    initial_capital: capital,
                })
                .await?;

            println!(
                "{}: {} candles, {} signals, {} trades",
                result.strategy,
                result.candles,
                result.signals,
                result.trades.len()
            );
            result.metrics.print_report();
            Ok(())
        }
        Command::Backfill {
            symbol,
            timeframe,
            start_year,
            start_month,
            end_year,
            end_month,
            synthetic,
        } => {
            let Some(seed) = synthetic else {
                bail!("the paper exchange has no candle history to backfill from; pass --synthetic <seed>");
            };

            let now = Utc::now();
            let (from, _) = month_range(start_year, start_month)?;
            let (_, month_end) = month_range(
                end_year.unwrap_or_else(|| now.year()),
                end_month.unwrap_or_else(|| now.month()),
            )?;
            let to = month_end.min(now);
            let count = ((to - from).num_milliseconds() / timeframe.duration_ms()).max(0) as usize;

            let paper = Arc::new(PaperExchange::new(&config.exchange_id));
            let candles = SyntheticDataGenerator::new(seed)
                .with_start(from)
                .generate(MarketScenario::Sideways, count, timeframe);
            paper.load_candles(&symbol, timeframe, candles).await;

            let exchange: Arc<dyn Exchange> = paper;
            let collector = Arc::new(CandleCollector::new(exchange, stores.candles));

            let queue = TaskQueue::new(
                "backfill",
                config.queue.backfill_workers,
                config.queue.capacity,
                config.retry.policy(),
            );
            queue
                .on_task(
                    BACKFILL_TASK,
                    Arc::new(BackfillHandler::new(
                        collector,
                        config.collector.backfill_batch_size,
                        config.collector.backfill_requests_per_second,
                    )),
                )
                .await;
            queue.start().await?;

            let service = BackfillService::new(queue.clone());
            let ids = service
                .start(&BackfillRequest {
                    symbol,
                    timeframe,
                    start_year,
                    start_month,
                    end_year,
                    end_month,
                })
                .await?;

            for id in &ids {
                queue.wait_until_settled(id).await;
            }
            for status in service.list().await {
                println!(
                    "{} {:?} {}%{}",
                    status.job_id,
                    status.state,
                    status.progress,
                    status.error.map(|e| format!(" ({})", e)).unwrap_or_default()
                );
            }
            Ok(())
        }
        Command::Reconcile { account, symbol } => {
            let ledger = PositionLedger::new(stores.positions, stores.fills);
            let position = ledger.rebuild(&account, &symbol).await?;
            println!("{}", serde_json::to_string_pretty(&position)?);
            Ok(())
        }
    }
}

async fn run(config: AppConfig, stores: Stores) -> anyhow::Result<()> {
    tracing::info!(exchange = %config.exchange_id, "🚀 quantdesk starting (paper trading)");

    let exchange = Arc::new(PaperExchange::new(&config.exchange_id).with_fee_rate(config.paper.fee_rate));
    let market = Arc::new(PaperMarket::new(exchange.clone(), config.paper.seed));
    open_paper_markets(&config, &stores, &market).await?;

    let connector = Arc::new(ExchangeConnector::new(
        &config.exchange_id,
        Arc::new(PaperExchangeFactory::new(exchange.clone())),
        Arc::new(StaticCredentials::new(config.credentials.clone())),
    ));

    let risk = Arc::new(RiskService::new(
        stores.policies.clone(),
        stores.positions.clone(),
        stores.orders.clone(),
        config.risk.policy.clone(),
        config.risk.cache_ttl(),
    ));
    let ledger = Arc::new(PositionLedger::new(stores.positions.clone(), stores.fills.clone()));

    let order_queue = TaskQueue::new(
        "orders",
        config.queue.order_workers,
        config.queue.capacity,
        config.retry.policy(),
    );
    let orders = Arc::new(OrderService::new(
        stores.orders.clone(),
        stores.fills.clone(),
        risk,
        ledger.clone(),
        connector,
        order_queue.clone(),
    ));
    orders.register().await;
    let queue_task = order_queue.start().await?;

    let collector = Arc::new(CandleCollector::new(exchange, stores.candles.clone()));
    collector.warm_up(&config.collector.symbols).await;
    for instance in &config.strategies {
        for symbol in &instance.symbols {
            if let Err(e) = collector
                .fetch_and_save(symbol, instance.timeframe, None, LOOKBACK_CANDLES)
                .await
            {
                tracing::warn!(strategy = %instance.id, symbol = %symbol, error = %e, "Strategy warm-up failed");
            }
        }
    }

    let mut collector_tasks = Vec::new();

    let ticker = PollingTrigger::new("paper-market", config.paper.tick());
    collector_tasks.push(tokio::spawn(ticker.run(move || {
        let market = market.clone();
        async move {
            market.advance(Utc::now()).await;
        }
    })));

    for (name, symbols, trigger_config) in collection_plan(&config) {
        let trigger = PollingTrigger::new(name, trigger_config.every());
        let collector = collector.clone();
        let timeframe = trigger_config.timeframe;
        let limit = trigger_config.limit;

        collector_tasks.push(tokio::spawn(trigger.run(move || {
            let collector = collector.clone();
            let symbols = symbols.clone();
            async move {
                collector.collect(&symbols, timeframe, limit).await;
            }
        })));
    }

    let signal_loop = Arc::new(SignalLoop::new(
        stores.candles,
        orders,
        ledger,
        config.strategies.clone(),
    ));
    let signal_task = tokio::spawn(signal_loop.clone().run(config.live.interval()));

    tracing::info!(
        symbols = config.collector.symbols.len(),
        collectors = collector_tasks.len(),
        strategies = signal_loop.instances().len(),
        "✅ All loops spawned"
    );
    tracing::info!("Press Ctrl+C to stop...");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("⚠️  Received Ctrl+C, shutting down...");
        }
        result = queue_task => {
            tracing::error!("Order queue exited: {:?}", result);
        }
        result = signal_task => {
            tracing::error!("Signal loop exited: {:?}", result);
        }
    }

    for task in collector_tasks {
        task.abort();
    }
    tracing::info!("👋 quantdesk stopped");
    Ok(())
}

/// Configured collectors, plus one per strategy instance so every
/// strategy timeframe keeps getting fresh candles
fn collection_plan(config: &AppConfig) -> Vec<(String, Vec<String>, TriggerConfig)> {
    let mut plan: Vec<(String, Vec<String>, TriggerConfig)> = config
        .collector
        .triggers
        .iter()
        .map(|t| (format!("collect-{}", t.timeframe), config.collector.symbols.clone(), t.clone()))
        .collect();

    for instance in &config.strategies {
        plan.push((
            format!("collect-{}-{}", instance.id, instance.timeframe),
            instance.symbols.clone(),
            TriggerConfig {
                timeframe: instance.timeframe,
                every_secs: (instance.timeframe.duration_ms() as u64 / 1000).min(STRATEGY_POLL_SECS),
                limit: 5,
            },
        ));
    }
    plan
}

/// Start a simulated series for every market the collectors and strategies
/// use, continuing from stored candles where there are any
async fn open_paper_markets(config: &AppConfig, stores: &Stores, market: &PaperMarket) -> anyhow::Result<()> {
    let mut markets: Vec<(String, Timeframe)> = Vec::new();
    let timeframes: Vec<Timeframe> = DEFAULT_TIMEFRAMES
        .into_iter()
        .chain(config.collector.triggers.iter().map(|t| t.timeframe))
        .collect();
    for symbol in &config.collector.symbols {
        for timeframe in &timeframes {
            markets.push((symbol.clone(), *timeframe));
        }
    }
    for instance in &config.strategies {
        for symbol in &instance.symbols {
            markets.push((symbol.clone(), instance.timeframe));
        }
    }
    markets.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.duration_ms().cmp(&b.1.duration_ms())));
    markets.dedup();

    let now = Utc::now();
    for (symbol, timeframe) in markets {
        let key = MarketKey::new(&config.exchange_id, &symbol, timeframe);
        let history = stores
            .candles
            .latest_candles(&key, config.paper.history)
            .await
            .with_context(|| format!("loading stored candles for {}", key))?;
        market
            .open(&symbol, timeframe, history, config.paper.history, now)
            .await;
    }
    market.advance(now).await;
    Ok(())
}

async fn open_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    let memory = Arc::new(MemoryStore::new());

    let mut stores = Stores {
        candles: memory.clone(),
        orders: memory.clone(),
        fills: memory.clone(),
        positions: memory.clone(),
        policies: memory,
    };

    if let Some(url) = &config.database_url {
        let postgres = Arc::new(
            PostgresStore::connect(url)
                .await
                .context("connecting to Postgres")?,
        );
        tracing::info!("Postgres persistence enabled");
        stores.candles = postgres.clone();
        stores.orders = postgres.clone();
        stores.fills = postgres.clone();
        stores.positions = postgres.clone();
        stores.policies = postgres;
    } else {
        tracing::warn!("No database_url configured, using in-memory storage");
    }

    if let Some(url) = &config.redis_url {
        let redis = RedisCandleStore::connect(url)
            .await
            .context("connecting to Redis")?;
        tracing::info!("Redis candle store enabled");
        stores.candles = Arc::new(redis);
    }

    Ok(stores)
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("quantdesk=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

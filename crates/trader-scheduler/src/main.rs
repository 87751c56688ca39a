//! 예약 주문 스케줄러 CLI.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use trader_core::{init_logging, AppConfig, LogConfig, PaperConfig, SymbolFilters};
use trader_data::{InMemoryStore, PgStore, Store};
use trader_exchange::{FuturesExchange, SimulatedConfig, SimulatedFuturesExchange};
use trader_execution::{
    BackgroundTasks, MarginModeManager, OrderBuilder, OrderExecutor, ProfitScalingManager,
    Reconciler,
};
use trader_risk::PositionSizer;
use trader_scheduler::{install_panic_logger, StrategyOrchestrator, TickScheduler};
use trader_strategy::StrategyRegistry;

#[derive(Parser)]
#[command(name = "trader-scheduler")]
#[command(about = "Scheduled order executor and strategy orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 설정 파일 경로 (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 로그 레벨 (trace, debug, info, warn, error). 설정 파일보다 우선
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// 데몬 모드: 틱 스케줄러와 오케스트레이터를 함께 실행
    Run,

    /// 틱 한 번 실행 후 주문 완료까지 대기
    TickOnce,

    /// 오케스트레이터 패스 한 번 실행 후 전략 실행 완료까지 대기
    OrchestrateOnce,
}

/// 실행에 필요한 구성 요소 묶음.
struct Components {
    tick: TickScheduler,
    orchestrator: Arc<StrategyOrchestrator>,
    tasks: BackgroundTasks,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let mut config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_logging(LogConfig::from_settings(&config.logging))
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;
    install_panic_logger();

    tracing::info!("Trader scheduler 시작");

    let shutdown = CancellationToken::new();
    let components = build(&config, shutdown.clone()).await?;

    match cli.command {
        Commands::Run => {
            tracing::info!("=== 데몬 모드 시작 ===");

            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("종료 신호 수신, 스케줄러 종료 중...");
                }
                signal_token.cancel();
            });

            let orchestrator = components.orchestrator.clone().run(shutdown.clone());
            let (tick, orchestrator) =
                tokio::join!(components.tick.run(shutdown.clone()), orchestrator);
            tick?;
            orchestrator?;
        }
        Commands::TickOnce => {
            let stats = components.tick.run_once(chrono::Utc::now()).await?;
            components.tick.wait_idle().await;
            stats.log_summary();
        }
        Commands::OrchestrateOnce => {
            let outcome = components.orchestrator.run_pass(chrono::Utc::now()).await?;
            for run in outcome.runs {
                if let Err(e) = run.await {
                    tracing::error!(error = %e, "Strategy run task aborted");
                }
            }
            outcome.stats.log_summary();
        }
    }

    if !components.tasks.shutdown(std::time::Duration::from_secs(5)).await {
        tracing::warn!("Background tasks did not stop in time");
    }
    tracing::info!("Trader scheduler 종료");
    Ok(())
}

async fn build(config: &AppConfig, shutdown: CancellationToken) -> anyhow::Result<Components> {
    let store: Arc<dyn Store> = match &config.database.url {
        Some(url) => {
            let store = PgStore::connect(url, &config.database)
                .await
                .context("database connection failed")?;
            if config.database.run_migrations {
                store.migrate().await.context("migration failed")?;
            }
            tracing::info!("데이터베이스 연결 성공");
            Arc::new(store)
        }
        None => {
            tracing::warn!("database.url not set, using in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    let exchange: Arc<dyn FuturesExchange> = Arc::new(paper_exchange(&config.paper).await);

    let (tasks, mut failures) = BackgroundTasks::new();
    tokio::spawn(async move {
        while let Some(failure) = failures.recv().await {
            tracing::debug!(task = %failure.name, error = %failure.error, "Background task failure reported");
        }
    });

    let executor = OrderExecutor::new(exchange.clone(), store.clone(), config.execution.clone())?
        .with_cancel_token(shutdown.clone());
    let tick = TickScheduler::new(
        store.clone(),
        Arc::new(executor),
        config.tick.clone(),
        tasks.clone(),
    );

    let margin = Arc::new(MarginModeManager::from_settings(exchange.clone(), &config.execution));
    let builder = OrderBuilder::new(store.clone(), PositionSizer::new(), margin, tasks.clone());
    let scaling = ProfitScalingManager::new(exchange.clone(), store.clone(), PositionSizer::new());
    let reconciler = Reconciler::new(exchange.clone(), store.clone());

    let orchestrator = StrategyOrchestrator::new(
        store,
        exchange,
        Arc::new(StrategyRegistry::with_defaults()),
        Arc::new(builder),
        Arc::new(scaling),
        Arc::new(reconciler),
        config.orchestrator.clone(),
    );

    Ok(Components {
        tick,
        orchestrator: Arc::new(orchestrator),
        tasks,
    })
}

/// 설정된 시장으로 모의 거래소를 구성합니다.
async fn paper_exchange(paper: &PaperConfig) -> SimulatedFuturesExchange {
    let exchange = SimulatedFuturesExchange::new(SimulatedConfig {
        initial_balance: paper.initial_balance,
        fee_rate: paper.fee_rate,
        ..SimulatedConfig::default()
    });
    for market in &paper.markets {
        let filters = SymbolFilters::new(
            &market.symbol,
            market.step_size,
            market.tick_size,
            market.min_notional,
        );
        exchange.add_market(filters, market.mark_price).await;
        exchange
            .set_ticker_stats(&market.symbol, market.price_change_pct, market.quote_volume)
            .await;
    }
    tracing::info!(markets = paper.markets.len(), "Paper exchange ready");
    exchange
}

//! Integration tests for the tick scheduler and the strategy orchestrator.

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;
use trader_core::{
    ExecutionConfig, ExecutionResults, ExecutionSettings, ExecutionStatus, NewScheduledOrder,
    OrchestratorConfig, OrderSide, ScheduledOrderStatus, StepOutcome, Strategy,
    StrategyExecution, StrategyType, SymbolFilters, TickConfig,
};
use trader_data::{ExecutionStore, InMemoryStore, OrderStore, StrategyStore};
use trader_exchange::{ExchangeError, SimOperation, SimulatedFuturesExchange};
use trader_execution::{
    BackgroundTasks, MarginModeManager, OrderBuilder, OrderExecutor, ProfitScalingManager,
    Reconciler,
};
use trader_risk::PositionSizer;
use trader_scheduler::{PassOutcome, StrategyOrchestrator, TickScheduler};
use trader_strategy::{StrategyKind, StrategyRegistry};

struct Harness {
    exchange: Arc<SimulatedFuturesExchange>,
    store: Arc<InMemoryStore>,
    orchestrator: Arc<StrategyOrchestrator>,
}

async fn exchange() -> Arc<SimulatedFuturesExchange> {
    let exchange = Arc::new(SimulatedFuturesExchange::default());
    exchange
        .add_market(SymbolFilters::new("BTCUSDT", dec!(0.001), dec!(0.1), dec!(5)), dec!(100))
        .await;
    exchange.set_ticker_stats("BTCUSDT", dec!(5), dec!(5000000)).await;
    exchange
        .add_market(SymbolFilters::new("ETHUSDT", dec!(0.001), dec!(0.01), dec!(5)), dec!(2000))
        .await;
    exchange.set_ticker_stats("ETHUSDT", dec!(0.5), dec!(3000000)).await;
    exchange
}

async fn harness_with(registry: StrategyRegistry) -> Harness {
    let exchange = exchange().await;
    let store = Arc::new(InMemoryStore::new());
    let (tasks, _failures) = BackgroundTasks::new();
    let margin = Arc::new(MarginModeManager::new(exchange.clone(), 1, std::time::Duration::ZERO));
    let builder = OrderBuilder::new(store.clone(), PositionSizer::new(), margin, tasks);
    let scaling = ProfitScalingManager::new(exchange.clone(), store.clone(), PositionSizer::new());
    let reconciler = Reconciler::new(exchange.clone(), store.clone());

    let orchestrator = StrategyOrchestrator::new(
        store.clone(),
        exchange.clone(),
        Arc::new(registry),
        Arc::new(builder),
        Arc::new(scaling),
        Arc::new(reconciler),
        OrchestratorConfig::default(),
    );
    Harness {
        exchange,
        store,
        orchestrator: Arc::new(orchestrator),
    }
}

async fn harness() -> Harness {
    harness_with(StrategyRegistry::with_defaults()).await
}

async fn finish(outcome: PassOutcome) -> trader_scheduler::PassStats {
    for run in outcome.runs {
        run.await.unwrap();
    }
    outcome.stats
}

fn execution(id: i64, strategy_id: i64, status: ExecutionStatus, created_ago: Duration) -> StrategyExecution {
    let created_at = Utc::now() - created_ago;
    StrategyExecution {
        id,
        strategy_id,
        status,
        total_symbols: 0,
        processed_symbols: 0,
        config: ExecutionConfig::default(),
        results: ExecutionResults::default(),
        error_message: None,
        started_at: (status == ExecutionStatus::Running).then_some(created_at),
        completed_at: None,
        created_at,
        updated_at: created_at,
    }
}

fn whitelist(id: i64) -> Strategy {
    Strategy::new(id, "momentum", StrategyType::Momentum)
        .with_symbols(vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()])
}

// ==== 오케스트레이터 ====

#[tokio::test]
async fn test_whitelist_run_creates_orders_and_completes() {
    let h = harness().await;
    h.store.save_strategy(whitelist(1)).await.unwrap();

    let now = Utc::now();
    let stats = finish(h.orchestrator.run_pass(now).await.unwrap()).await;
    assert_eq!(stats.strategies, 1);
    assert_eq!(stats.started, 1);

    let executions = h.store.list_executions(1, &[]).await.unwrap();
    assert_eq!(executions.len(), 1);
    let execution = &executions[0];
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.total_symbols, 2);
    assert_eq!(execution.processed_symbols, 2);
    assert_eq!(execution.results.orders_created, 1);

    let steps = h.store.list_execution_steps(execution.id).await.unwrap();
    assert_eq!(steps.len(), 2);
    let btc = steps.iter().find(|s| s.symbol == "BTCUSDT").unwrap();
    assert_eq!(btc.outcome, StepOutcome::OrderCreated);
    assert_eq!(btc.action, "buy");
    let eth = steps.iter().find(|s| s.symbol == "ETHUSDT").unwrap();
    assert_eq!(eth.outcome, StepOutcome::NoAction);

    let orders = h.store.all_orders().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].symbol, "BTCUSDT");
    assert_eq!(orders[0].side, OrderSide::Buy);
    assert_eq!(orders[0].execution_id, Some(execution.id));
    assert_eq!(orders[0].status, ScheduledOrderStatus::Pending);

    let strategy = h.store.get_strategy(1).await.unwrap().unwrap();
    assert_eq!(strategy.run_count, 1);
    assert!(strategy.last_run_at.is_some());
    assert!(strategy.is_running);

    // 실행 주기 전에는 다시 실행하지 않음
    let stats = finish(h.orchestrator.run_pass(now).await.unwrap()).await;
    assert_eq!(stats.not_due, 1);
    assert_eq!(stats.started, 0);
}

#[tokio::test]
async fn test_mark_price_outage_sizes_from_fallback_table() {
    let h = harness().await;
    h.exchange
        .fail_next(SimOperation::GetMarkPrice, ExchangeError::Network("timeout".into()))
        .await;
    let strategy = Strategy::new(4, "momentum", StrategyType::Momentum)
        .with_symbols(vec!["BTCUSDT".to_string()]);
    h.store.save_strategy(strategy).await.unwrap();

    finish(h.orchestrator.run_pass(Utc::now()).await.unwrap()).await;

    let execution = h.store.list_executions(4, &[]).await.unwrap().remove(0);
    let steps = h.store.list_execution_steps(execution.id).await.unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].outcome, StepOutcome::OrderCreated);

    let orders = h.store.all_orders().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].quantity, dec!(0.001));
    assert_eq!(h.exchange.call_count(SimOperation::GetMarkPrice).await, 1);
}

#[tokio::test]
async fn test_scan_selects_movers_only() {
    let h = harness().await;
    h.store
        .save_strategy(Strategy::new(2, "scanner", StrategyType::Momentum))
        .await
        .unwrap();

    finish(h.orchestrator.run_pass(Utc::now()).await.unwrap()).await;

    let execution = h.store.list_executions(2, &[]).await.unwrap().remove(0);
    let steps = h.store.list_execution_steps(execution.id).await.unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].symbol, "BTCUSDT");
}

#[tokio::test]
async fn test_auto_create_disabled_records_skip() {
    let h = harness().await;
    let mut strategy = whitelist(3);
    strategy.execution.auto_create_orders = false;
    h.store.save_strategy(strategy).await.unwrap();

    finish(h.orchestrator.run_pass(Utc::now()).await.unwrap()).await;

    assert!(h.store.all_orders().await.is_empty());
    let execution = h.store.list_executions(3, &[]).await.unwrap().remove(0);
    let steps = h.store.list_execution_steps(execution.id).await.unwrap();
    let btc = steps.iter().find(|s| s.symbol == "BTCUSDT").unwrap();
    assert_eq!(btc.outcome, StepOutcome::Skipped);
}

#[tokio::test]
async fn test_zombie_execution_failed_and_strategy_stopped() {
    let h = harness().await;
    h.store.save_strategy(whitelist(4)).await.unwrap();
    h.store
        .insert_execution(execution(40, 4, ExecutionStatus::Running, Duration::hours(2)))
        .await;

    let stats = finish(h.orchestrator.run_pass(Utc::now()).await.unwrap()).await;
    assert_eq!(stats.zombies_failed, 1);
    assert_eq!(stats.auto_stopped, 1);
    assert_eq!(stats.started, 0);

    let zombie = h.store.get_execution(40).await.unwrap().unwrap();
    assert_eq!(zombie.status, ExecutionStatus::Failed);
    assert!(zombie.error_message.unwrap().contains("zombie"));
    assert!(!h.store.get_strategy(4).await.unwrap().unwrap().is_running);
}

#[tokio::test]
async fn test_zombie_with_pending_execution_keeps_running() {
    let h = harness().await;
    h.store.save_strategy(whitelist(5)).await.unwrap();
    h.store
        .insert_execution(execution(50, 5, ExecutionStatus::Running, Duration::hours(2)))
        .await;
    h.store
        .insert_execution(execution(51, 5, ExecutionStatus::Pending, Duration::minutes(1)))
        .await;

    let stats = finish(h.orchestrator.run_pass(Utc::now()).await.unwrap()).await;
    assert_eq!(stats.zombies_failed, 1);
    assert_eq!(stats.auto_stopped, 0);
    assert_eq!(stats.started, 1);

    let reused = h.store.get_execution(51).await.unwrap().unwrap();
    assert_eq!(reused.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_duplicate_pending_executions_pruned() {
    let h = harness().await;
    h.store.save_strategy(whitelist(6)).await.unwrap();
    h.store
        .insert_execution(execution(60, 6, ExecutionStatus::Pending, Duration::minutes(10)))
        .await;
    h.store
        .insert_execution(execution(61, 6, ExecutionStatus::Pending, Duration::minutes(5)))
        .await;

    let stats = finish(h.orchestrator.run_pass(Utc::now()).await.unwrap()).await;
    assert_eq!(stats.duplicates_pruned, 1);

    assert!(h.store.get_execution(60).await.unwrap().is_none());
    let kept = h.store.get_execution(61).await.unwrap().unwrap();
    assert_eq!(kept.status, ExecutionStatus::Completed);
    assert_eq!(h.store.list_executions(6, &[]).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_max_runs_auto_stop() {
    let h = harness().await;
    let mut strategy = whitelist(7);
    strategy.execution.max_runs = Some(1);
    strategy.execution.auto_stop = true;
    h.store.save_strategy(strategy).await.unwrap();

    finish(h.orchestrator.run_pass(Utc::now()).await.unwrap()).await;

    let strategy = h.store.get_strategy(7).await.unwrap().unwrap();
    assert_eq!(strategy.run_count, 1);
    assert!(!strategy.is_running);
}

#[tokio::test]
async fn test_stale_strategy_auto_stopped() {
    let h = harness().await;
    let mut strategy = whitelist(8);
    strategy.last_run_at = Some(Utc::now() - Duration::days(2));
    strategy.run_count = 3;
    h.store.save_strategy(strategy).await.unwrap();

    let stats = finish(h.orchestrator.run_pass(Utc::now()).await.unwrap()).await;
    assert_eq!(stats.auto_stopped, 1);
    assert_eq!(stats.started, 0);
    assert!(!h.store.get_strategy(8).await.unwrap().unwrap().is_running);
}

#[tokio::test]
async fn test_long_interval_strategy_not_stale_before_due() {
    let h = harness().await;
    let mut strategy = whitelist(11).with_interval_secs(48 * 60 * 60);
    strategy.last_run_at = Some(Utc::now() - Duration::hours(25));
    strategy.run_count = 1;
    h.store.save_strategy(strategy).await.unwrap();

    let stats = finish(h.orchestrator.run_pass(Utc::now()).await.unwrap()).await;
    assert_eq!(stats.auto_stopped, 0);
    assert_eq!(stats.not_due, 1);
    assert!(h.store.get_strategy(11).await.unwrap().unwrap().is_running);

    // 주기 + 유예 시간을 넘기면 중지
    let later = Utc::now() + Duration::hours(48);
    let stats = finish(h.orchestrator.run_pass(later).await.unwrap()).await;
    assert_eq!(stats.auto_stopped, 1);
    assert!(!h.store.get_strategy(11).await.unwrap().unwrap().is_running);
}

#[tokio::test]
async fn test_locked_strategy_skipped() {
    let h = harness().await;
    h.store.save_strategy(whitelist(9)).await.unwrap();

    let guard = h.orchestrator.strategy_lock(9).await.lock_owned().await;
    let stats = finish(h.orchestrator.run_pass(Utc::now()).await.unwrap()).await;
    assert_eq!(stats.skipped_locked, 1);
    assert_eq!(stats.started, 0);
    assert!(h.store.list_executions(9, &[]).await.unwrap().is_empty());

    drop(guard);
    let stats = finish(h.orchestrator.run_pass(Utc::now()).await.unwrap()).await;
    assert_eq!(stats.started, 1);
}

#[tokio::test]
async fn test_unregistered_kind_fails_execution() {
    let registry =
        StrategyRegistry::new().with(StrategyKind::default_for(StrategyType::Momentum));
    let h = harness_with(registry).await;
    h.store
        .save_strategy(
            Strategy::new(10, "reverter", StrategyType::MeanReversion)
                .with_symbols(vec!["BTCUSDT".to_string()]),
        )
        .await
        .unwrap();

    let stats = finish(h.orchestrator.run_pass(Utc::now()).await.unwrap()).await;
    assert_eq!(stats.started, 1);

    let execution = h.store.list_executions(10, &[]).await.unwrap().remove(0);
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution
        .error_message
        .unwrap()
        .contains("no strategy implementation"));

    let strategy = h.store.get_strategy(10).await.unwrap().unwrap();
    assert_eq!(strategy.run_count, 0);
    assert!(strategy.last_run_at.is_some());
}

// ==== 틱 스케줄러 ====

async fn tick_scheduler(store: Arc<InMemoryStore>) -> TickScheduler {
    let exchange = exchange().await;
    let executor = OrderExecutor::new(exchange, store.clone(), ExecutionSettings::default()).unwrap();
    let (tasks, _failures) = BackgroundTasks::new();
    TickScheduler::new(store, Arc::new(executor), TickConfig::default(), tasks)
}

#[tokio::test]
async fn test_tick_dispatches_due_orders() {
    let store = Arc::new(InMemoryStore::new());
    let scheduler = tick_scheduler(store.clone()).await;
    let order = store
        .create_order(NewScheduledOrder::market("BTCUSDT", OrderSide::Buy, dec!(0.1)))
        .await
        .unwrap();

    let stats = scheduler.run_once(Utc::now()).await.unwrap();
    assert_eq!(stats.dispatched, 1);
    scheduler.wait_idle().await;

    let order = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, ScheduledOrderStatus::Filled);

    // 이미 처리된 주문은 다시 조회되지 않음
    let stats = scheduler.run_once(Utc::now()).await.unwrap();
    assert!(stats.is_idle());
}

#[tokio::test]
async fn test_stale_processing_recovered_as_failed() {
    let store = Arc::new(InMemoryStore::new());
    let scheduler = tick_scheduler(store.clone()).await;
    let stale = store
        .create_order(NewScheduledOrder::market("BTCUSDT", OrderSide::Buy, dec!(0.1)))
        .await
        .unwrap();
    let fresh = store
        .create_order(NewScheduledOrder::market("BTCUSDT", OrderSide::Buy, dec!(0.1)))
        .await
        .unwrap();
    let now = Utc::now();
    store
        .force_order_status(stale.id, ScheduledOrderStatus::Processing, now - Duration::hours(1))
        .await;
    store
        .force_order_status(fresh.id, ScheduledOrderStatus::Processing, now)
        .await;

    let recovered = scheduler.recover_stale_processing(now).await.unwrap();
    assert_eq!(recovered, 1);

    let stale = store.get_order(stale.id).await.unwrap().unwrap();
    assert_eq!(stale.status, ScheduledOrderStatus::Failed);
    assert!(stale.result.unwrap().contains("interrupted"));
    let fresh = store.get_order(fresh.id).await.unwrap().unwrap();
    assert_eq!(fresh.status, ScheduledOrderStatus::Processing);
}

//! Integration tests for profit scaling and overall close.

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;
use trader_core::{
    BracketSpec, BracketStatus, ExecutionSettings, NewScheduledOrder, OrderKind, OrderPurpose,
    OrderSide, OrderUpdate, ScheduledOrder, ScheduledOrderStatus, Strategy, StrategyType,
    SymbolFilters,
};
use trader_data::{BracketStore, InMemoryStore, OrderStore, StrategyStore};
use trader_exchange::{AlgoOrderStatus, FuturesExchange, SimulatedFuturesExchange};
use trader_execution::{OrderExecutor, ProfitScalingManager, Reconciler, ScalingAction};
use trader_risk::PositionSizer;

const STRATEGY_ID: i64 = 7;

async fn setup() -> (ProfitScalingManager, Arc<InMemoryStore>, Arc<SimulatedFuturesExchange>, Strategy) {
    let exchange = Arc::new(SimulatedFuturesExchange::default());
    exchange
        .add_market(SymbolFilters::new("BTCUSDT", dec!(0.001), dec!(0.1), dec!(5)), dec!(100))
        .await;
    exchange.open_position("BTCUSDT", dec!(1), dec!(100), 1).await;

    let store = Arc::new(InMemoryStore::new());
    let entry = store
        .create_order(
            NewScheduledOrder::market("BTCUSDT", OrderSide::Buy, dec!(1))
                .with_strategy(STRATEGY_ID, None),
        )
        .await
        .unwrap();
    store
        .update_order(
            entry.id,
            OrderUpdate::status(ScheduledOrderStatus::Filled).with_fill(Some(dec!(100)), dec!(1)),
        )
        .await
        .unwrap();

    let mut strategy = Strategy::new(STRATEGY_ID, "scaler", StrategyType::Momentum);
    strategy.scaling.enabled = true;

    let manager = ProfitScalingManager::new(exchange.clone(), store.clone(), PositionSizer::new());
    (manager, store, exchange, strategy)
}

/// 주문을 processing으로 가져온 뒤 실행하고 갱신된 행을 반환합니다.
async fn execute(executor: &OrderExecutor, store: &InMemoryStore, order_id: i64) -> ScheduledOrder {
    assert!(store.claim_order(order_id).await.unwrap());
    let claimed = store.get_order(order_id).await.unwrap().unwrap();
    executor.execute(&claimed).await.unwrap();
    store.get_order(order_id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_disabled_scaling_does_nothing() {
    let (manager, store, exchange, mut strategy) = setup().await;
    strategy.scaling.enabled = false;
    exchange.set_mark_price("BTCUSDT", dec!(125)).await;

    let actions = manager.evaluate_strategy(&strategy, None, Utc::now()).await.unwrap();
    assert!(actions.is_empty());
    assert_eq!(store.all_orders().await.len(), 1);
}

#[tokio::test]
async fn test_scale_in_then_overall_close() {
    let (manager, store, exchange, strategy) = setup().await;

    // 25% 수익: 추가 진입
    exchange.set_mark_price("BTCUSDT", dec!(125)).await;
    let actions = manager.evaluate_strategy(&strategy, Some(3), Utc::now()).await.unwrap();
    assert_eq!(actions.len(), 1);
    let ScalingAction::ScaleIn { order_id, count, .. } = actions[0].1.clone() else {
        panic!("expected scale-in, got {:?}", actions[0].1);
    };
    assert_eq!(count, 1);
    let scale_in = store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(scale_in.purpose, OrderPurpose::ScaleIn);
    assert_eq!(scale_in.side, OrderSide::Buy);
    // 10 USDT × 1배 / 125
    assert_eq!(scale_in.quantity, dec!(0.08));
    assert_eq!(scale_in.execution_id, Some(3));
    assert_eq!(store.get_scale_in_count(STRATEGY_ID, "BTCUSDT").await.unwrap(), 1);

    // 대기 중인 추가 진입이 있으면 건너뜀
    let actions = manager.evaluate_strategy(&strategy, Some(3), Utc::now()).await.unwrap();
    assert!(matches!(actions[0].1, ScalingAction::Skipped(_)));

    // 50% 수익: 전체 청산
    exchange.set_mark_price("BTCUSDT", dec!(150)).await;
    let actions = manager.evaluate_strategy(&strategy, Some(3), Utc::now()).await.unwrap();
    let ScalingAction::OverallClose { order_id, .. } = actions[0].1.clone() else {
        panic!("expected overall close, got {:?}", actions[0].1);
    };
    let close = store.get_order(order_id).await.unwrap().unwrap();
    assert!(close.reduce_only);
    assert_eq!(close.side, OrderSide::Sell);
    assert_eq!(close.quantity, dec!(1));
    assert_eq!(close.purpose, OrderPurpose::OverallClose);
    assert_eq!(store.get_scale_in_count(STRATEGY_ID, "BTCUSDT").await.unwrap(), 0);
}

#[tokio::test]
async fn test_overall_stop_loss() {
    let (manager, _, exchange, strategy) = setup().await;
    exchange.set_mark_price("BTCUSDT", dec!(70)).await;

    let actions = manager.evaluate_strategy(&strategy, None, Utc::now()).await.unwrap();
    assert!(matches!(actions[0].1, ScalingAction::OverallClose { .. }));
}

#[tokio::test]
async fn test_recent_close_skips_symbol() {
    let (manager, store, exchange, strategy) = setup().await;
    let close = store
        .create_order(
            NewScheduledOrder::close_position("BTCUSDT", OrderSide::Sell, dec!(0.5))
                .with_strategy(STRATEGY_ID, None),
        )
        .await
        .unwrap();
    store
        .force_order_status(close.id, ScheduledOrderStatus::Filled, Utc::now() - Duration::seconds(60))
        .await;
    exchange.set_mark_price("BTCUSDT", dec!(125)).await;

    let actions = manager.evaluate_strategy(&strategy, None, Utc::now()).await.unwrap();
    assert_eq!(actions[0].1, ScalingAction::Skipped("closed recently".to_string()));

    // 창이 지나면 다시 평가
    let later = Utc::now() + Duration::seconds(600);
    let actions = manager.evaluate_strategy(&strategy, None, later).await.unwrap();
    assert!(matches!(actions[0].1, ScalingAction::ScaleIn { .. }));
}

#[tokio::test]
async fn test_below_threshold_is_no_action() {
    let (manager, _, exchange, strategy) = setup().await;
    exchange.set_mark_price("BTCUSDT", dec!(105)).await;

    let actions = manager.evaluate_strategy(&strategy, None, Utc::now()).await.unwrap();
    assert_eq!(actions[0].1, ScalingAction::NoAction { profit_pct: dec!(5) });
}

#[tokio::test]
async fn test_resting_bracket_leg_does_not_block_scale_in() {
    let (manager, store, exchange, strategy) = setup().await;
    let entry_id = store.all_orders().await[0].id;
    store
        .create_order(
            NewScheduledOrder::market("BTCUSDT", OrderSide::Sell, dec!(1))
                .with_strategy(STRATEGY_ID, None)
                .submitted_leg(entry_id, OrderKind::StopMarket, dec!(90), "sl-leg".to_string()),
        )
        .await
        .unwrap();
    exchange.set_mark_price("BTCUSDT", dec!(125)).await;

    let actions = manager.evaluate_strategy(&strategy, None, Utc::now()).await.unwrap();
    assert!(
        matches!(actions[0].1, ScalingAction::ScaleIn { .. }),
        "got {:?}",
        actions[0].1
    );
}

#[tokio::test]
async fn test_overall_close_releases_bracket_legs() {
    let exchange = Arc::new(SimulatedFuturesExchange::default());
    exchange
        .add_market(SymbolFilters::new("BTCUSDT", dec!(0.001), dec!(0.1), dec!(5)), dec!(100))
        .await;
    let store = Arc::new(InMemoryStore::new());
    let executor = OrderExecutor::new(exchange.clone(), store.clone(), ExecutionSettings::default())
        .unwrap();

    let entry = store
        .create_order(
            NewScheduledOrder::market("BTCUSDT", OrderSide::Buy, dec!(1))
                .with_strategy(STRATEGY_ID, None)
                .with_leverage(10)
                .with_bracket(BracketSpec::margin_return(dec!(20), dec!(10))),
        )
        .await
        .unwrap();
    let entry = execute(&executor, &store, entry.id).await;
    assert_eq!(entry.status, ScheduledOrderStatus::Filled);
    let link = store.get_bracket_link_by_entry(entry.id).await.unwrap().unwrap();
    assert_eq!(link.status, BracketStatus::Active);

    let mut strategy = Strategy::new(STRATEGY_ID, "scaler", StrategyType::Momentum);
    strategy.scaling.enabled = true;
    let manager = ProfitScalingManager::new(exchange.clone(), store.clone(), PositionSizer::new());

    // 레버리지 10배, 6% 상승 → 60% 수익으로 전체 익절
    exchange.set_mark_price("BTCUSDT", dec!(106)).await;
    let actions = manager.evaluate_strategy(&strategy, None, Utc::now()).await.unwrap();
    assert!(matches!(actions[0].1, ScalingAction::OverallClose { .. }));

    let link = store.get_bracket_link_by_entry(entry.id).await.unwrap().unwrap();
    assert_eq!(link.status, BracketStatus::Closed);
    for client_id in [link.tp_client_id.unwrap(), link.sl_client_id.unwrap()] {
        let (_, status) = exchange.algo_order(&client_id).await.unwrap();
        assert_eq!(status, AlgoOrderStatus::Canceled);
        let leg = store.find_order_by_client_id(&client_id).await.unwrap().unwrap();
        assert_eq!(leg.status, ScheduledOrderStatus::Canceled);
    }
}

#[tokio::test]
async fn test_overall_close_fill_realizes_entry_pnl() {
    let (manager, store, exchange, strategy) = setup().await;
    let executor = OrderExecutor::new(exchange.clone(), store.clone(), ExecutionSettings::default())
        .unwrap();
    let reconciler = Reconciler::new(exchange.clone(), store.clone());

    exchange.set_mark_price("BTCUSDT", dec!(150)).await;
    let actions = manager.evaluate_strategy(&strategy, None, Utc::now()).await.unwrap();
    let ScalingAction::OverallClose { order_id, .. } = actions[0].1.clone() else {
        panic!("expected overall close, got {:?}", actions[0].1);
    };
    let close = execute(&executor, &store, order_id).await;
    assert_eq!(close.status, ScheduledOrderStatus::Filled);
    assert!(exchange.get_position("BTCUSDT").await.unwrap().is_none());

    // 청산 이후 시세 변화는 손익에 반영되지 않음
    exchange.set_mark_price("BTCUSDT", dec!(200)).await;
    let pnl = reconciler.strategy_pnl(STRATEGY_ID).await.unwrap();
    assert_eq!(pnl.realized, dec!(50));
    assert!(pnl.unrealized.is_zero());
    assert_eq!(pnl.wins, 1);
}

//! StrategyKind 통합 테스트.
//!
//! 레지스트리 조회, 설정 역직렬화, scan → decide 흐름을 검증합니다.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use trader_core::{AgentState, MarketSnapshot, StrategyAction, StrategyType};
use trader_strategy::{
    MeanReversionConfig, MeanReversionStrategy, StrategyKind, StrategyRegistry,
};

// ================================================================================================
// 헬퍼 함수
// ================================================================================================

fn snapshot(symbol: &str, change: Decimal, volume: Decimal) -> MarketSnapshot {
    MarketSnapshot {
        symbol: symbol.to_string(),
        mark_price: Some(dec!(50)),
        price_change_pct: change,
        quote_volume: volume,
        observed_at: Utc::now(),
    }
}

fn market() -> Vec<MarketSnapshot> {
    vec![
        snapshot("BTCUSDT", dec!(1.2), dec!(900_000_000)),
        snapshot("ETHUSDT", dec!(4.5), dec!(400_000_000)),
        snapshot("SOLUSDT", dec!(-11), dec!(150_000_000)),
        snapshot("PEPEUSDT", dec!(25), dec!(50_000)),
    ]
}

// ================================================================================================
// 테스트
// ================================================================================================

#[test]
fn test_scan_then_decide_momentum() {
    let registry = StrategyRegistry::with_defaults();
    let kind = registry.get(StrategyType::Momentum).unwrap();
    let snapshots = market();

    let symbols = kind.scan(&snapshots, 10);
    assert_eq!(symbols, vec!["SOLUSDT", "ETHUSDT"]);

    let actions: Vec<StrategyAction> = symbols
        .iter()
        .filter_map(|symbol| snapshots.iter().find(|s| &s.symbol == symbol))
        .map(|s| kind.decide(s, &AgentState::flat()).action)
        .collect();
    assert_eq!(actions, vec![StrategyAction::Short, StrategyAction::Buy]);
}

#[test]
fn test_scan_then_decide_mean_reversion() {
    let registry = StrategyRegistry::with_defaults();
    let kind = registry.get(StrategyType::MeanReversion).unwrap();
    let snapshots = market();

    let symbols = kind.scan(&snapshots, 10);
    assert_eq!(symbols, vec!["SOLUSDT", "PEPEUSDT"]);

    let sol = kind.decide(&snapshots[2], &AgentState::flat());
    assert_eq!(sol.action, StrategyAction::Buy);
    assert!(sol.is_actionable());
}

#[test]
fn test_config_from_json_with_defaults() {
    let config: MeanReversionConfig = serde_json::from_value(json!({ "band_pct": "5" })).unwrap();
    assert_eq!(config.band_pct, dec!(5));
    assert_eq!(config.take_profit_pct, dec!(3));

    let kind = StrategyKind::MeanReversion(MeanReversionStrategy::new(config));
    assert_eq!(kind.strategy_type(), StrategyType::MeanReversion);
    let decision = kind.decide(&snapshot("XUSDT", dec!(6), dec!(1)), &AgentState::flat());
    assert_eq!(decision.action, StrategyAction::Short);
}

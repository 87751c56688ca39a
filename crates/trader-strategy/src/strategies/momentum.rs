//! 24시간 모멘텀 추종 전략.
//!
//! 24시간 변동률이 임계값을 넘으면 같은 방향으로 진입합니다.
//! 보유 중 반대 방향으로 강하게 움직이면 청산 방향 결정을 냅니다.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use trader_core::{AgentState, MarketSnapshot, OrderSide, StrategyAction, StrategyDecision};

// ================================================================================================
// 설정
// ================================================================================================

fn default_entry_threshold() -> Decimal {
    dec!(3)
}

fn default_min_quote_volume() -> Decimal {
    dec!(1_000_000)
}

/// 모멘텀 전략 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumConfig {
    /// 진입 변동률 임계값 (%, 기본: 3).
    #[serde(default = "default_entry_threshold")]
    pub entry_threshold_pct: Decimal,
    /// 스캔 대상 최소 24시간 거래대금 (기본: 1,000,000).
    #[serde(default = "default_min_quote_volume")]
    pub min_quote_volume: Decimal,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            entry_threshold_pct: default_entry_threshold(),
            min_quote_volume: default_min_quote_volume(),
        }
    }
}

// ================================================================================================
// 전략
// ================================================================================================

/// 모멘텀 추종 전략.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MomentumStrategy {
    config: MomentumConfig,
}

impl MomentumStrategy {
    pub fn new(config: MomentumConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MomentumConfig {
        &self.config
    }

    /// 변동 폭이 클수록 높은 신뢰도 (0.5 ~ 1.0).
    fn confidence(&self, change_pct: Decimal) -> f64 {
        let threshold = self.config.entry_threshold_pct;
        if threshold <= Decimal::ZERO {
            return 0.5;
        }
        let ratio = (change_pct.abs() / (threshold * dec!(4))).to_f64().unwrap_or(0.0);
        (0.5 + ratio).min(1.0)
    }

    pub fn decide(&self, snapshot: &MarketSnapshot, state: &AgentState) -> StrategyDecision {
        let change = snapshot.price_change_pct;
        let threshold = self.config.entry_threshold_pct;

        if state.has_position {
            return match state.position_side {
                Some(OrderSide::Buy) if change <= -threshold => StrategyDecision::new(
                    StrategyAction::Sell,
                    self.confidence(change),
                    format!("momentum reversal {change}% against long"),
                ),
                Some(OrderSide::Sell) if change >= threshold => StrategyDecision::new(
                    StrategyAction::Cover,
                    self.confidence(change),
                    format!("momentum reversal {change}% against short"),
                ),
                _ => StrategyDecision::hold("position open, trend intact"),
            };
        }

        if change >= threshold {
            StrategyDecision::new(
                StrategyAction::Buy,
                self.confidence(change),
                format!("24h change {change}% >= {threshold}%"),
            )
        } else if change <= -threshold {
            StrategyDecision::new(
                StrategyAction::Short,
                self.confidence(change),
                format!("24h change {change}% <= -{threshold}%"),
            )
        } else {
            StrategyDecision::hold(format!("24h change {change}% inside ±{threshold}%"))
        }
    }

    /// 변동 폭이 임계값 이상인 유동성 있는 심볼을 변동 폭 순으로 고릅니다.
    pub fn scan(&self, snapshots: &[MarketSnapshot], limit: usize) -> Vec<String> {
        let mut candidates: Vec<&MarketSnapshot> = snapshots
            .iter()
            .filter(|s| s.quote_volume >= self.config.min_quote_volume)
            .filter(|s| s.price_change_pct.abs() >= self.config.entry_threshold_pct)
            .collect();
        candidates.sort_by(|a, b| {
            b.price_change_pct
                .abs()
                .cmp(&a.price_change_pct.abs())
                .then_with(|| b.quote_volume.cmp(&a.quote_volume))
        });
        candidates
            .into_iter()
            .take(limit)
            .map(|s| s.symbol.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(symbol: &str, change: Decimal, volume: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            symbol: symbol.to_string(),
            mark_price: Some(dec!(100)),
            price_change_pct: change,
            quote_volume: volume,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_entry_directions() {
        let strategy = MomentumStrategy::default();
        let flat = AgentState::flat();

        let up = strategy.decide(&snapshot("AUSDT", dec!(6), dec!(5_000_000)), &flat);
        assert_eq!(up.action, StrategyAction::Buy);
        assert_eq!(up.confidence, 1.0);

        let down = strategy.decide(&snapshot("AUSDT", dec!(-3), dec!(5_000_000)), &flat);
        assert_eq!(down.action, StrategyAction::Short);
        assert_eq!(down.confidence, 0.75);

        let quiet = strategy.decide(&snapshot("AUSDT", dec!(1), dec!(5_000_000)), &flat);
        assert_eq!(quiet.action, StrategyAction::Hold);
    }

    #[test]
    fn test_reversal_with_position() {
        let strategy = MomentumStrategy::default();
        let long = AgentState {
            has_position: true,
            position_side: Some(OrderSide::Buy),
            entry_price: Some(dec!(100)),
            position_qty: dec!(1),
            ..Default::default()
        };
        let decision = strategy.decide(&snapshot("AUSDT", dec!(-4), dec!(5_000_000)), &long);
        assert_eq!(decision.action, StrategyAction::Sell);

        let decision = strategy.decide(&snapshot("AUSDT", dec!(4), dec!(5_000_000)), &long);
        assert_eq!(decision.action, StrategyAction::Hold);
    }

    #[test]
    fn test_scan_orders_by_move() {
        let strategy = MomentumStrategy::default();
        let snapshots = vec![
            snapshot("AUSDT", dec!(4), dec!(2_000_000)),
            snapshot("BUSDT", dec!(-9), dec!(3_000_000)),
            snapshot("CUSDT", dec!(12), dec!(10)),
            snapshot("DUSDT", dec!(1), dec!(9_000_000)),
        ];
        assert_eq!(strategy.scan(&snapshots, 5), vec!["BUSDT", "AUSDT"]);
        assert_eq!(strategy.scan(&snapshots, 1), vec!["BUSDT"]);
    }
}

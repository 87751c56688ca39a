//! 전략 결정과 결정 입력(시장 스냅샷, 에이전트 상태).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::OrderSide;

/// 전략이 내리는 행동.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyAction {
    Buy,
    Sell,
    Short,
    Cover,
    Hold,
}

impl StrategyAction {
    /// 주문으로 변환되는 방향. `cover`와 `hold`는 주문을 만들지 않습니다.
    pub fn order_side(&self) -> Option<OrderSide> {
        match self {
            StrategyAction::Buy => Some(OrderSide::Buy),
            StrategyAction::Sell | StrategyAction::Short => Some(OrderSide::Sell),
            StrategyAction::Cover | StrategyAction::Hold => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyAction::Buy => "buy",
            StrategyAction::Sell => "sell",
            StrategyAction::Short => "short",
            StrategyAction::Cover => "cover",
            StrategyAction::Hold => "hold",
        }
    }
}

impl fmt::Display for StrategyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 전략 결정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDecision {
    pub action: StrategyAction,
    /// 0.0 ~ 1.0
    pub confidence: f64,
    pub reason: String,
}

impl StrategyDecision {
    pub fn new(action: StrategyAction, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            action,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
        }
    }

    pub fn hold(reason: impl Into<String>) -> Self {
        Self::new(StrategyAction::Hold, 0.0, reason)
    }

    pub fn is_actionable(&self) -> bool {
        self.action.order_side().is_some()
    }
}

/// 결정 시점의 시장 스냅샷.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    /// 마크 가격 (조회 실패 시 None)
    pub mark_price: Option<Decimal>,
    /// 24시간 가격 변동률 (%)
    pub price_change_pct: Decimal,
    /// 24시간 거래대금
    pub quote_volume: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// 심볼별 에이전트 상태.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentState {
    pub has_position: bool,
    pub position_side: Option<OrderSide>,
    pub entry_price: Option<Decimal>,
    pub position_qty: Decimal,
    /// 포지션 보유 시간 (초)
    pub hold_time_secs: i64,
    pub last_action: Option<StrategyAction>,
}

impl AgentState {
    pub fn flat() -> Self {
        Self::default()
    }

    /// 현재 포지션 기준 미실현 수익률 (%, 레버리지 미반영).
    pub fn unrealized_pct(&self, mark_price: Decimal) -> Option<Decimal> {
        let entry = self.entry_price.filter(|p| !p.is_zero())?;
        let side = self.position_side?;
        Some((mark_price - entry) / entry * Decimal::from(100) * side.sign())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_action_mapping() {
        assert_eq!(StrategyAction::Buy.order_side(), Some(OrderSide::Buy));
        assert_eq!(StrategyAction::Sell.order_side(), Some(OrderSide::Sell));
        assert_eq!(StrategyAction::Short.order_side(), Some(OrderSide::Sell));
        assert_eq!(StrategyAction::Cover.order_side(), None);
        assert_eq!(StrategyAction::Hold.order_side(), None);
    }

    #[test]
    fn test_confidence_clamped() {
        let decision = StrategyDecision::new(StrategyAction::Buy, 1.7, "breakout");
        assert_eq!(decision.confidence, 1.0);
        assert!(decision.is_actionable());
        assert!(!StrategyDecision::hold("quiet").is_actionable());
    }

    #[test]
    fn test_unrealized_pct() {
        let state = AgentState {
            has_position: true,
            position_side: Some(OrderSide::Sell),
            entry_price: Some(dec!(200)),
            position_qty: dec!(1),
            ..Default::default()
        };
        assert_eq!(state.unrealized_pct(dec!(190)), Some(dec!(5)));
        assert_eq!(AgentState::flat().unrealized_pct(dec!(1)), None);
    }
}

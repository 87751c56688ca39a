//! 과도한 변동 이후 되돌림을 노리는 평균회귀 전략.
//!
//! # 진입
//!
//! - 24시간 변동률이 `+band` 이상이면 숏, `-band` 이하면 롱
//!
//! # 청산
//!
//! - 미실현 수익률이 `take_profit_pct` 이상이거나 보유 시간이 `max_hold_secs`를 넘으면
//!   보유 방향의 반대 결정을 냅니다

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use trader_core::{AgentState, MarketSnapshot, OrderSide, StrategyAction, StrategyDecision};

// ================================================================================================
// 설정
// ================================================================================================

fn default_band() -> Decimal {
    dec!(8)
}

fn default_take_profit() -> Decimal {
    dec!(3)
}

fn default_max_hold_secs() -> i64 {
    6 * 3600
}

/// 평균회귀 전략 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanReversionConfig {
    /// 진입 밴드 (%, 기본: 8).
    #[serde(default = "default_band")]
    pub band_pct: Decimal,
    /// 청산 수익률 (%, 기본: 3).
    #[serde(default = "default_take_profit")]
    pub take_profit_pct: Decimal,
    /// 최대 보유 시간 (초, 기본: 6시간).
    #[serde(default = "default_max_hold_secs")]
    pub max_hold_secs: i64,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            band_pct: default_band(),
            take_profit_pct: default_take_profit(),
            max_hold_secs: default_max_hold_secs(),
        }
    }
}

// ================================================================================================
// 전략
// ================================================================================================

/// 평균회귀 전략.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeanReversionStrategy {
    config: MeanReversionConfig,
}

impl MeanReversionStrategy {
    pub fn new(config: MeanReversionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MeanReversionConfig {
        &self.config
    }

    /// 밴드를 많이 벗어날수록 높은 신뢰도 (0.4 ~ 0.9).
    fn confidence(&self, change_pct: Decimal) -> f64 {
        let band = self.config.band_pct;
        if band <= Decimal::ZERO {
            return 0.4;
        }
        let excess = ((change_pct.abs() - band) / band).to_f64().unwrap_or(0.0);
        (0.4 + excess.max(0.0)).min(0.9)
    }

    fn exit_action(side: OrderSide) -> StrategyAction {
        match side {
            OrderSide::Buy => StrategyAction::Sell,
            OrderSide::Sell => StrategyAction::Cover,
        }
    }

    pub fn decide(&self, snapshot: &MarketSnapshot, state: &AgentState) -> StrategyDecision {
        if state.has_position {
            let Some(side) = state.position_side else {
                return StrategyDecision::hold("position side unknown");
            };
            if let Some(pct) = snapshot.mark_price.and_then(|mark| state.unrealized_pct(mark)) {
                if pct >= self.config.take_profit_pct {
                    return StrategyDecision::new(
                        Self::exit_action(side),
                        0.8,
                        format!("reverted {pct}% >= {}%", self.config.take_profit_pct),
                    );
                }
            }
            if state.hold_time_secs > self.config.max_hold_secs {
                return StrategyDecision::new(
                    Self::exit_action(side),
                    0.6,
                    format!("held {}s > {}s", state.hold_time_secs, self.config.max_hold_secs),
                );
            }
            return StrategyDecision::hold("waiting for reversion");
        }

        let change = snapshot.price_change_pct;
        let band = self.config.band_pct;
        if change >= band {
            StrategyDecision::new(
                StrategyAction::Short,
                self.confidence(change),
                format!("overextended +{change}%"),
            )
        } else if change <= -band {
            StrategyDecision::new(
                StrategyAction::Buy,
                self.confidence(change),
                format!("oversold {change}%"),
            )
        } else {
            StrategyDecision::hold(format!("24h change {change}% inside ±{band}%"))
        }
    }

    /// 밴드를 벗어난 심볼을 거래대금 순으로 고릅니다.
    pub fn scan(&self, snapshots: &[MarketSnapshot], limit: usize) -> Vec<String> {
        let mut candidates: Vec<&MarketSnapshot> = snapshots
            .iter()
            .filter(|s| s.price_change_pct.abs() >= self.config.band_pct)
            .collect();
        candidates.sort_by(|a, b| b.quote_volume.cmp(&a.quote_volume));
        candidates
            .into_iter()
            .take(limit)
            .map(|s| s.symbol.clone())
            .collect()
    }
}

//! 주문 수량과 레버리지 계산.
//!
//! 제공 기능:
//! - 증거금 금액 → 수량 변환 (`margin × leverage / price`)
//! - 가격을 알 수 없을 때 심볼별 고정 수량 테이블
//! - 결정 신뢰도에 따른 레버리지 조정

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::collections::HashMap;
use trader_core::{Price, Quantity, RiskSettings};

/// 가격 없이 주문할 때 사용하는 심볼별 기본 수량.
fn default_fallback_table() -> HashMap<String, Quantity> {
    [
        ("BTCUSDT", dec!(0.001)),
        ("ETHUSDT", dec!(0.01)),
        ("BNBUSDT", dec!(0.05)),
        ("SOLUSDT", dec!(0.5)),
        ("XRPUSDT", dec!(10)),
        ("DOGEUSDT", dec!(100)),
    ]
    .into_iter()
    .map(|(symbol, qty)| (symbol.to_string(), qty))
    .collect()
}

/// 증거금 기반 포지션 사이저.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    fallback_quantities: HashMap<String, Quantity>,
    default_quantity: Quantity,
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self {
            fallback_quantities: default_fallback_table(),
            default_quantity: Decimal::ONE,
        }
    }
}

impl PositionSizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 심볼별 기본 수량을 추가하거나 덮어씁니다.
    pub fn with_fallback(mut self, symbol: impl Into<String>, quantity: Quantity) -> Self {
        self.fallback_quantities.insert(symbol.into(), quantity);
        self
    }

    pub fn with_default_quantity(mut self, quantity: Quantity) -> Self {
        self.default_quantity = quantity;
        self
    }

    /// 증거금과 레버리지로 주문 수량을 계산합니다.
    ///
    /// 가격이 없거나 0 이하면 고정 수량 테이블을 사용합니다.
    /// 거래소 스텝 정렬은 하지 않습니다.
    pub fn quantity_for_margin(
        &self,
        symbol: &str,
        margin: Decimal,
        leverage: u32,
        price: Option<Price>,
    ) -> Quantity {
        match price.filter(|p| *p > Decimal::ZERO) {
            Some(price) if margin > Decimal::ZERO => {
                margin * Decimal::from(leverage.max(1)) / price
            }
            _ => self.fallback_quantity(symbol),
        }
    }

    pub fn fallback_quantity(&self, symbol: &str) -> Quantity {
        self.fallback_quantities
            .get(symbol)
            .copied()
            .unwrap_or(self.default_quantity)
    }

    /// 신뢰도 구간별 레버리지 배수.
    pub fn confidence_multiplier(confidence: f64) -> Decimal {
        if confidence >= 0.8 {
            dec!(1.5)
        } else if confidence >= 0.6 {
            Decimal::ONE
        } else {
            dec!(0.5)
        }
    }

    /// `clamp(default_leverage × 배수, 1, max_leverage)`. 소수점은 반올림합니다.
    pub fn leverage_for(risk: &RiskSettings, confidence: f64) -> u32 {
        let scaled = (Decimal::from(risk.default_leverage) * Self::confidence_multiplier(confidence))
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        let max = risk.max_leverage.max(1);
        scaled.to_u32().map(|v| v.clamp(1, max)).unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_from_margin() {
        let sizer = PositionSizer::new();
        // 20 USDT × 5배 / 100 = 1
        assert_eq!(
            sizer.quantity_for_margin("ABCUSDT", dec!(20), 5, Some(dec!(100))),
            dec!(1)
        );
    }

    #[test]
    fn test_fallback_without_price() {
        let sizer = PositionSizer::new().with_fallback("ABCUSDT", dec!(3));
        assert_eq!(sizer.quantity_for_margin("BTCUSDT", dec!(20), 5, None), dec!(0.001));
        assert_eq!(sizer.quantity_for_margin("ABCUSDT", dec!(20), 5, Some(Decimal::ZERO)), dec!(3));
        assert_eq!(sizer.quantity_for_margin("ZZZUSDT", dec!(20), 5, None), Decimal::ONE);
    }

    #[test]
    fn test_leverage_from_confidence() {
        let risk = RiskSettings {
            default_leverage: 5,
            max_leverage: 20,
            ..Default::default()
        };
        assert_eq!(PositionSizer::leverage_for(&risk, 0.9), 8);
        assert_eq!(PositionSizer::leverage_for(&risk, 0.7), 5);
        assert_eq!(PositionSizer::leverage_for(&risk, 0.1), 3);
    }

    #[test]
    fn test_leverage_clamped() {
        let risk = RiskSettings {
            default_leverage: 20,
            max_leverage: 25,
            ..Default::default()
        };
        assert_eq!(PositionSizer::leverage_for(&risk, 0.95), 25);

        let low = RiskSettings {
            default_leverage: 1,
            max_leverage: 10,
            ..Default::default()
        };
        assert_eq!(PositionSizer::leverage_for(&low, 0.0), 1);
    }
}

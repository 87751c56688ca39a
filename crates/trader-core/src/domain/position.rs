//! 거래소 선물 포지션.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::OrderSide;
use crate::error::TraderError;
use crate::types::{Price, Quantity};

/// 증거금 모드.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarginMode {
    #[default]
    Isolated,
    Cross,
}

impl MarginMode {
    /// 거래소 API 표기 (`ISOLATED`, `CROSSED`).
    pub fn as_exchange_str(&self) -> &'static str {
        match self {
            MarginMode::Isolated => "ISOLATED",
            MarginMode::Cross => "CROSSED",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarginMode::Isolated => "isolated",
            MarginMode::Cross => "cross",
        }
    }
}

impl fmt::Display for MarginMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarginMode {
    type Err = TraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "isolated" => Ok(MarginMode::Isolated),
            "cross" | "crossed" => Ok(MarginMode::Cross),
            other => Err(TraderError::InvalidInput(format!("unknown margin mode: {other}"))),
        }
    }
}

/// 거래소가 보고하는 포지션 (단방향 모드).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    /// 부호 있는 수량 (롱 > 0, 숏 < 0)
    pub position_amt: Quantity,
    pub entry_price: Price,
    pub mark_price: Price,
    pub unrealized_pnl: Decimal,
    pub leverage: u32,
    pub margin_mode: MarginMode,
}

impl ExchangePosition {
    /// 포지션이 열려 있는지 확인합니다.
    pub fn is_open(&self) -> bool {
        !self.position_amt.is_zero()
    }

    /// 포지션 방향. 수량이 0이면 None.
    pub fn side(&self) -> Option<OrderSide> {
        if self.position_amt > Decimal::ZERO {
            Some(OrderSide::Buy)
        } else if self.position_amt < Decimal::ZERO {
            Some(OrderSide::Sell)
        } else {
            None
        }
    }

    pub fn abs_quantity(&self) -> Quantity {
        self.position_amt.abs()
    }

    /// 레버리지를 반영한 수익률 (%).
    ///
    /// 가격 변동률 × 레버리지 × 방향.
    pub fn leveraged_profit_pct(&self) -> Decimal {
        let Some(side) = self.side() else {
            return Decimal::ZERO;
        };
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let change = (self.mark_price - self.entry_price) / self.entry_price;
        change * Decimal::from(100) * Decimal::from(self.leverage.max(1)) * side.sign()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(amt: Decimal, entry: Decimal, mark: Decimal, leverage: u32) -> ExchangePosition {
        ExchangePosition {
            symbol: "BTCUSDT".to_string(),
            position_amt: amt,
            entry_price: entry,
            mark_price: mark,
            unrealized_pnl: Decimal::ZERO,
            leverage,
            margin_mode: MarginMode::Isolated,
        }
    }

    #[test]
    fn test_leveraged_profit_long() {
        let pos = position(dec!(1), dec!(100), dec!(101), 10);
        assert_eq!(pos.leveraged_profit_pct(), dec!(10));
    }

    #[test]
    fn test_leveraged_profit_short() {
        let pos = position(dec!(-1), dec!(100), dec!(101), 10);
        assert_eq!(pos.leveraged_profit_pct(), dec!(-10));
        assert_eq!(pos.side(), Some(OrderSide::Sell));
    }

    #[test]
    fn test_flat_position() {
        let pos = position(dec!(0), dec!(100), dec!(120), 5);
        assert!(!pos.is_open());
        assert_eq!(pos.leveraged_profit_pct(), Decimal::ZERO);
    }

    #[test]
    fn test_margin_mode_parse() {
        assert_eq!("CROSSED".parse::<MarginMode>().unwrap(), MarginMode::Cross);
        assert_eq!(MarginMode::Isolated.as_exchange_str(), "ISOLATED");
    }
}

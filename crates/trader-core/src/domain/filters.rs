//! 거래소 심볼 필터 메타데이터 (수량 단위, 호가 단위, 최소 주문 금액).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{TraderError, TraderResult};

/// 단위 라운딩 방법.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundMethod {
    /// 가장 가까운 단위
    Round,
    /// 내림
    Floor,
    /// 올림
    Ceil,
}

/// 값을 증분 단위의 배수로 라운딩합니다.
///
/// 결과는 증분 단위의 소수 자릿수로 정규화되므로 같은 입력에 다시 적용해도 변하지 않습니다.
pub fn round_to_increment(value: Decimal, increment: Decimal, method: RoundMethod) -> Decimal {
    if increment <= Decimal::ZERO {
        return value;
    }

    let units = value / increment;
    let rounded = match method {
        RoundMethod::Round => units.round(),
        RoundMethod::Floor => units.floor(),
        RoundMethod::Ceil => units.ceil(),
    };

    let scale = increment.normalize().scale();
    (rounded * increment).round_dp(scale).normalize()
}

/// 심볼별 거래 규칙.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub symbol: String,
    /// 수량 단위
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    /// 최소 주문 금액 (USDT)
    pub min_notional: Decimal,
    /// 호가 단위
    pub tick_size: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
}

impl SymbolFilters {
    /// 최소 필드만으로 필터를 생성합니다. 나머지 한도는 제한 없음으로 둡니다.
    pub fn new(
        symbol: impl Into<String>,
        step_size: Decimal,
        tick_size: Decimal,
        min_notional: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            step_size,
            min_qty: Decimal::ZERO,
            max_qty: Decimal::MAX,
            min_notional,
            tick_size,
            min_price: Decimal::ZERO,
            max_price: Decimal::MAX,
        }
    }

    pub fn with_qty_bounds(mut self, min_qty: Decimal, max_qty: Decimal) -> Self {
        self.min_qty = min_qty;
        self.max_qty = max_qty;
        self
    }

    pub fn with_price_bounds(mut self, min_price: Decimal, max_price: Decimal) -> Self {
        self.min_price = min_price;
        self.max_price = max_price;
        self
    }

    /// 형식 검증. 0 이하 단위나 뒤집힌 범위는 거부합니다.
    pub fn validate(&self) -> TraderResult<()> {
        if self.step_size <= Decimal::ZERO {
            return Err(TraderError::InvalidInput(format!(
                "{}: step size must be positive (got {})",
                self.symbol, self.step_size
            )));
        }
        if self.tick_size <= Decimal::ZERO {
            return Err(TraderError::InvalidInput(format!(
                "{}: tick size must be positive (got {})",
                self.symbol, self.tick_size
            )));
        }
        if self.min_qty < Decimal::ZERO || self.min_qty > self.max_qty {
            return Err(TraderError::InvalidInput(format!(
                "{}: invalid quantity bounds [{}, {}]",
                self.symbol, self.min_qty, self.max_qty
            )));
        }
        if self.min_price < Decimal::ZERO || self.min_price > self.max_price {
            return Err(TraderError::InvalidInput(format!(
                "{}: invalid price bounds [{}, {}]",
                self.symbol, self.min_price, self.max_price
            )));
        }
        if self.min_notional < Decimal::ZERO {
            return Err(TraderError::InvalidInput(format!(
                "{}: negative min notional",
                self.symbol
            )));
        }
        Ok(())
    }
}

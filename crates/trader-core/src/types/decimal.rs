//! 정밀한 금융 계산을 위한 Decimal 유틸리티.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// 가격 타입.
pub type Price = Decimal;

/// 주문 수량 타입.
pub type Quantity = Decimal;

/// 퍼센트 타입 (5 = 5%).
pub type Percent = Decimal;

/// Decimal 연산을 위한 확장 트레이트.
pub trait DecimalExt {
    /// `pct`%만큼 비율을 곱합니다 (예: 100.pct_of(5) = 5).
    fn pct_of(&self, pct: Percent) -> Decimal;

    /// 정규화된 소수 자릿수.
    fn decimal_places(&self) -> u32;

    /// 통계용 f64 변환. 표현할 수 없으면 0.
    fn to_f64_lossy(&self) -> f64;
}

impl DecimalExt for Decimal {
    fn pct_of(&self, pct: Percent) -> Decimal {
        *self * pct / Decimal::ONE_HUNDRED
    }

    fn decimal_places(&self) -> u32 {
        self.normalize().scale()
    }

    fn to_f64_lossy(&self) -> f64 {
        self.to_f64().unwrap_or(0.0)
    }
}

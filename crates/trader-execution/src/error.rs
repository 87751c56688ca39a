//! 실행 오류 유형.

use rust_decimal::Decimal;
use thiserror::Error;
use trader_data::StoreError;
use trader_exchange::{ExchangeError, RejectionKind};
use trader_risk::RiskError;

/// 주문 실행 오류.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Risk error: {0}")]
    Risk(#[from] RiskError),

    /// 심볼 필터를 어디서도 구할 수 없음
    #[error("filters unavailable for {0}")]
    FiltersUnavailable(String),

    /// 형식이 잘못된 필터
    #[error("invalid filters: {0}")]
    InvalidFilters(String),

    /// 최소 주문 금액을 맞추려면 최대 수량을 넘어야 함
    #[error("notional floor {floor} unreachable: needs {required} > max qty {max_qty}")]
    NotionalUnreachable {
        floor: Decimal,
        required: Decimal,
        max_qty: Decimal,
    },

    #[error("unsupported symbol: {0}")]
    UnsupportedSymbol(String),

    #[error("insufficient margin: required {required}, available {available}")]
    InsufficientMargin { required: Decimal, available: Decimal },

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("order not found: {0}")]
    OrderNotFound(i64),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("canceled by shutdown")]
    Canceled,

    /// 정밀도 재시도 체인 소진
    #[error("precision retries exhausted: {0}")]
    RetriesExhausted(String),
}

impl ExecutionError {
    /// 거래소 거부 사유. 거래소 오류가 아니면 None.
    pub fn rejection_kind(&self) -> Option<RejectionKind> {
        match self {
            ExecutionError::Exchange(e) => Some(e.kind()),
            _ => None,
        }
    }

    pub fn is_precision_rejection(&self) -> bool {
        self.rejection_kind() == Some(RejectionKind::Precision)
    }

    /// 주문 행에 기록할 실패 사유.
    pub fn order_reason(&self) -> String {
        match self.rejection_kind() {
            Some(RejectionKind::MinNotional) => format!("min notional rejected: {self}"),
            Some(RejectionKind::InsufficientMargin) => format!("insufficient margin: {self}"),
            Some(RejectionKind::UnsupportedSymbol) => format!("unsupported symbol: {self}"),
            _ => self.to_string(),
        }
    }
}

pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_kind_passthrough() {
        let err = ExecutionError::from(ExchangeError::api(-1111, "Precision is over the maximum"));
        assert!(err.is_precision_rejection());

        let err = ExecutionError::from(ExchangeError::api(-2019, "Margin is insufficient."));
        assert_eq!(err.rejection_kind(), Some(RejectionKind::InsufficientMargin));
        assert!(err.order_reason().starts_with("insufficient margin"));

        assert_eq!(ExecutionError::Canceled.rejection_kind(), None);
    }
}

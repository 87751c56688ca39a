//! 리스크 계산 오류.

use rust_decimal::Decimal;
use thiserror::Error;

/// 리스크 계산 오류.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RiskError {
    /// 진입가가 0 이하
    #[error("유효하지 않은 진입가: {0}")]
    InvalidEntryPrice(Decimal),

    /// 수수료율이 1 이상이거나 음수
    #[error("유효하지 않은 수수료율: {0}")]
    InvalidFeeRate(Decimal),

    /// TP/SL 순서가 진입가 기준으로 맞지 않음
    #[error("TP/SL 순서 위반 ({side}): entry={entry}, tp={tp:?}, sl={sl:?}")]
    InvalidOrdering {
        side: &'static str,
        entry: Decimal,
        tp: Option<Decimal>,
        sl: Option<Decimal>,
    },
}

pub type RiskResult<T> = std::result::Result<T, RiskError>;

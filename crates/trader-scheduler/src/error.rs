//! 스케줄러 에러 타입.

use thiserror::Error;
use trader_core::StrategyType;
use trader_data::StoreError;
use trader_exchange::ExchangeError;
use trader_execution::ExecutionError;

/// 스케줄러 에러.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// 레지스트리에 구현이 없는 전략 종류
    #[error("no strategy implementation registered for {0}")]
    UnknownStrategy(StrategyType),

    /// 전략 실행 중 패닉
    #[error("strategy run panicked: {0}")]
    Panicked(String),

    #[error("task join error: {0}")]
    Join(String),
}

/// Result 타입 별칭
pub type SchedulerResult<T> = Result<T, SchedulerError>;

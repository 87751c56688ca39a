//! 예약 주문 실행.
//!
//! 이 crate는 다음을 제공합니다:
//! - 거래소 필터에 맞춘 수량/가격 보정 (`PrecisionAdjuster`)
//! - 진입과 TP/SL 조건부 청산을 묶은 브라켓 실행 (`OrderExecutor`)
//! - 증거금 모드 적용 (`MarginModeManager`)
//! - 거래소 상태 동기화와 손익 집계 (`Reconciler`)
//! - 전략 결정의 주문 변환 (`OrderBuilder`)과 수익 기반 추가 진입 (`ProfitScalingManager`)
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_execution::OrderExecutor;
//!
//! let executor = OrderExecutor::new(exchange, store, settings)?;
//! let status = executor.execute(&order).await?;
//! ```

pub mod builder;
pub mod client_id;
pub mod engine;
pub mod error;
pub mod margin_mode;
pub mod precision;
pub mod reconcile;
pub mod scaling;
pub mod tasks;

// 주요 타입 재내보내기
pub use builder::{bracket_from_risk, OrderBuilder};
pub use client_id::{ClientIdGenerator, MAX_CLIENT_ID_LEN};
pub use engine::{ack_status, algo_status_update, OrderExecutor, RetryStep, Submission};
pub use error::{ExecutionError, ExecutionResult};
pub use margin_mode::{MarginModeManager, MarginModeOutcome};
pub use precision::{AdjustRequest, AdjustedOrder, PrecisionAdjuster};
pub use reconcile::{
    entry_pnl, overall_close_for, summarize, EntryPnl, PnlSummary, Reconciler, SyncReport,
};
pub use scaling::{decide_scaling, ProfitScalingManager, ScalingAction, ScalingDecision};
pub use tasks::{BackgroundTasks, TaskFailure};

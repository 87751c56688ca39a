//! # Trader Scheduler
//!
//! 예약 주문 틱 스케줄러와 전략 실행 오케스트레이터.
//!
//! - `TickScheduler`: 만기 예약 주문을 선점해 제한된 작업 풀에서 실행
//! - `StrategyOrchestrator`: 실행 주기가 된 전략을 평가해 예약 주문 생성
//!
//! 두 루프는 같은 `CancellationToken`으로 종료됩니다.

pub mod error;
pub mod orchestrator;
pub mod stats;
pub mod tick;

pub use error::{SchedulerError, SchedulerResult};
pub use orchestrator::{failure_reason, install_panic_logger, PassOutcome, StrategyOrchestrator};
pub use stats::{PassStats, TickStats};
pub use tick::TickScheduler;

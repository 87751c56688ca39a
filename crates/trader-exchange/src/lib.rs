//! 선물 거래소 연동 계약.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - `FuturesExchange` trait: 주문, 조건부 청산, 레버리지/증거금 모드, 포지션 조회
//! - `ExchangeError`와 `RejectionKind`: 거부 응답 분류
//! - 시뮬레이션 선물 거래소 (모의투자 및 테스트용)

pub mod error;
pub mod simulated;
pub mod traits;

pub use error::*;
pub use simulated::{SimOperation, SimulatedConfig, SimulatedFuturesExchange};
pub use traits::*;

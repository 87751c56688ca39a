//! # Trader Core
//!
//! 주문 스케줄링/실행 엔진의 핵심 도메인 모델과 공통 인프라를 제공합니다:
//! - 예약 주문, 브라켓 연결, 전략 실행 기록
//! - 전략 정의와 위험/스케일링 설정
//! - 거래소 심볼 필터와 포지션
//! - 설정 및 로깅

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;

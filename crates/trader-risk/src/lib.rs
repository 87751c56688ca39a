//! 주문 리스크 계산.
//!
//! 이 crate는 다음 기능을 제공합니다:
//! - 증거금 수익률/가격 변동률 기반 TP/SL 목표가 계산
//! - TP/SL 순서 검증
//! - 증거금 기반 포지션 사이징과 신뢰도 기반 레버리지
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_risk::MarginRiskCalculator;
//!
//! let calc = MarginRiskCalculator::default();
//! let targets = calc.margin_return_targets(OrderSide::Buy, dec!(100), 10, Some(dec!(20)), Some(dec!(10)))?;
//! assert_eq!(targets.take_profit, Some(dec!(102)));
//! ```

pub mod error;
pub mod margin;
pub mod position_sizing;

pub use error::{RiskError, RiskResult};
pub use margin::{BracketTargets, MarginRiskCalculator};
pub use position_sizing::PositionSizer;

//! 트레이딩 전략.
//!
//! 이 크레이트가 제공하는 기능:
//! - 닫힌 전략 종류 열거형 (`StrategyKind`) - `scan`/`decide`
//! - 시작 시 구성하는 전략 레지스트리 (`StrategyRegistry`)
//! - 내장 전략 (모멘텀, 평균회귀)
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_strategy::StrategyRegistry;
//!
//! let registry = StrategyRegistry::with_defaults();
//! let kind = registry.get(StrategyType::Momentum).unwrap();
//! let decision = kind.decide(&snapshot, &AgentState::flat());
//! ```

pub mod kind;
pub mod registry;
pub mod strategies;

pub use kind::StrategyKind;
pub use registry::StrategyRegistry;
pub use strategies::{MeanReversionConfig, MeanReversionStrategy, MomentumConfig, MomentumStrategy};

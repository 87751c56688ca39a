//! 내장 전략.
//!
//! - **Momentum**: 24시간 변동 방향 추종
//! - **Mean Reversion**: 과도한 변동 이후 되돌림

pub mod mean_reversion;
pub mod momentum;

pub use mean_reversion::{MeanReversionConfig, MeanReversionStrategy};
pub use momentum::{MomentumConfig, MomentumStrategy};

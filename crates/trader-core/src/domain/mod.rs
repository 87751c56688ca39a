//! 주문 스케줄링과 실행을 위한 도메인 모델.

mod bracket;
mod decision;
mod execution;
mod filters;
mod order;
mod position;
mod strategy;

pub use bracket::*;
pub use decision::*;
pub use execution::*;
pub use filters::*;
pub use order::*;
pub use position::*;
pub use strategy::*;

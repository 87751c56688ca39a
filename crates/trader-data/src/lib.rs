//! 예약 주문 영속성.
//!
//! 이 crate는 다음을 제공합니다:
//! - 저장소 계약 (`OrderStore`, `BracketStore`, `ExecutionStore`, `StrategyStore`, `FilterStore`)
//! - PostgreSQL 구현 (`PgStore`)
//! - 테스트와 페이퍼 모드용 메모리 구현 (`InMemoryStore`)

pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use postgres::{PgStore, ScheduledOrderRecord};
pub use repository::{
    BracketStore, ExecutionStore, FilterStore, OrderStore, Store, StrategyStore,
};

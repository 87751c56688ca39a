//! 영속성 계약.
//!
//! 스케줄러와 실행 엔진은 이 trait들만 사용합니다. 메모리 구현과 PostgreSQL 구현이 있습니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use trader_core::{
    BracketLink, BracketStatus, ExecutionConfig, ExecutionStatus, ExecutionStep,
    ExecutionUpdate, NewScheduledOrder, OrderUpdate, ScheduledOrder, ScheduledOrderStatus,
    Strategy, StrategyExecution, SymbolFilters,
};

use crate::error::StoreResult;

/// 예약 주문 저장소.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create_order(&self, order: NewScheduledOrder) -> StoreResult<ScheduledOrder>;

    async fn get_order(&self, id: i64) -> StoreResult<Option<ScheduledOrder>>;

    async fn find_order_by_client_id(&self, client_order_id: &str)
        -> StoreResult<Option<ScheduledOrder>>;

    /// 실행 시점이 지난 `pending` 주문을 trigger_time 순으로 조회합니다.
    async fn list_due_orders(&self, now: DateTime<Utc>, limit: usize)
        -> StoreResult<Vec<ScheduledOrder>>;

    /// `pending → processing` 조건부 갱신. 다른 워커가 먼저 가져갔으면 false.
    async fn claim_order(&self, id: i64) -> StoreResult<bool>;

    async fn update_order(&self, id: i64, update: OrderUpdate) -> StoreResult<()>;

    /// 상태별 조회. `updated_before`가 있으면 그 이전에 갱신된 행만 반환합니다.
    async fn list_orders_by_status(
        &self,
        status: ScheduledOrderStatus,
        updated_before: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<ScheduledOrder>>;

    async fn list_orders_by_execution(&self, execution_id: i64) -> StoreResult<Vec<ScheduledOrder>>;

    async fn list_strategy_orders(
        &self,
        strategy_id: i64,
        symbol: Option<&str>,
    ) -> StoreResult<Vec<ScheduledOrder>>;

    async fn list_child_orders(&self, parent_order_id: i64) -> StoreResult<Vec<ScheduledOrder>>;
}

/// 브라켓 연결 저장소.
#[async_trait]
pub trait BracketStore: Send + Sync {
    async fn create_bracket_link(&self, link: BracketLink) -> StoreResult<()>;

    async fn get_bracket_link_by_entry(&self, entry_order_id: i64)
        -> StoreResult<Option<BracketLink>>;

    /// `active` 또는 `partial` 상태의 연결.
    async fn list_open_bracket_links(&self) -> StoreResult<Vec<BracketLink>>;

    async fn update_bracket_status(&self, group_id: &str, status: BracketStatus)
        -> StoreResult<()>;
}

/// 전략 실행 기록 저장소.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_execution(
        &self,
        strategy_id: i64,
        config: ExecutionConfig,
    ) -> StoreResult<StrategyExecution>;

    async fn get_execution(&self, id: i64) -> StoreResult<Option<StrategyExecution>>;

    /// 전략의 실행 기록을 최신순으로 조회합니다. `statuses`가 비어 있으면 전체.
    async fn list_executions(
        &self,
        strategy_id: i64,
        statuses: &[ExecutionStatus],
    ) -> StoreResult<Vec<StrategyExecution>>;

    /// 상태 전이 규칙을 위반하면 `StoreError::InvalidTransition`.
    async fn update_execution(&self, id: i64, update: ExecutionUpdate) -> StoreResult<()>;

    async fn delete_execution(&self, id: i64) -> StoreResult<()>;

    async fn add_execution_step(&self, step: ExecutionStep) -> StoreResult<()>;

    async fn list_execution_steps(&self, execution_id: i64) -> StoreResult<Vec<ExecutionStep>>;
}

/// 전략 저장소.
#[async_trait]
pub trait StrategyStore: Send + Sync {
    async fn list_running_strategies(&self) -> StoreResult<Vec<Strategy>>;

    async fn get_strategy(&self, id: i64) -> StoreResult<Option<Strategy>>;

    /// 전략을 생성하거나 덮어씁니다.
    async fn save_strategy(&self, strategy: Strategy) -> StoreResult<()>;

    async fn set_strategy_running(&self, id: i64, running: bool) -> StoreResult<()>;

    async fn record_strategy_run(
        &self,
        id: i64,
        ran_at: DateTime<Utc>,
        run_count: u32,
    ) -> StoreResult<()>;

    async fn get_scale_in_count(&self, strategy_id: i64, symbol: &str) -> StoreResult<u32>;

    async fn set_scale_in_count(&self, strategy_id: i64, symbol: &str, count: u32)
        -> StoreResult<()>;
}

/// 심볼 필터 저장소.
#[async_trait]
pub trait FilterStore: Send + Sync {
    async fn get_symbol_filters(&self, symbol: &str) -> StoreResult<Option<SymbolFilters>>;

    async fn upsert_symbol_filters(&self, filters: SymbolFilters) -> StoreResult<()>;
}

/// 모든 저장소 계약을 묶은 trait.
pub trait Store: OrderStore + BracketStore + ExecutionStore + StrategyStore + FilterStore {}

impl<T> Store for T where T: OrderStore + BracketStore + ExecutionStore + StrategyStore + FilterStore {}

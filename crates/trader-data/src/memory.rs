//! 메모리 저장소.
//!
//! 모의투자 실행과 테스트에 사용합니다. 모든 갱신은 하나의 쓰기 잠금 안에서 수행되므로
//! `claim_order`의 조건부 갱신은 원자적입니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use trader_core::{
    BracketLink, BracketStatus, ExecutionConfig, ExecutionResults, ExecutionStatus,
    ExecutionStep, ExecutionUpdate, NewScheduledOrder, OrderUpdate, ScheduledOrder,
    ScheduledOrderStatus, Strategy, StrategyExecution, SymbolFilters,
};

use crate::error::{StoreError, StoreResult};
use crate::repository::{BracketStore, ExecutionStore, FilterStore, OrderStore, StrategyStore};

#[derive(Debug, Default)]
struct MemoryState {
    orders: HashMap<i64, ScheduledOrder>,
    brackets: HashMap<String, BracketLink>,
    executions: HashMap<i64, StrategyExecution>,
    steps: Vec<ExecutionStep>,
    strategies: HashMap<i64, Strategy>,
    scale_ins: HashMap<(i64, String), u32>,
    filters: HashMap<String, SymbolFilters>,
    next_order_id: i64,
    next_execution_id: i64,
}

/// 메모리 기반 `Store` 구현.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 모든 주문 (테스트 검증용).
    pub async fn all_orders(&self) -> Vec<ScheduledOrder> {
        let state = self.state.read().await;
        let mut orders: Vec<_> = state.orders.values().cloned().collect();
        orders.sort_by_key(|o| o.id);
        orders
    }

    /// 실행 기록을 직접 삽입합니다 (복구 시나리오 테스트용).
    pub async fn insert_execution(&self, execution: StrategyExecution) {
        let mut state = self.state.write().await;
        state.next_execution_id = state.next_execution_id.max(execution.id);
        state.executions.insert(execution.id, execution);
    }

    /// 주문 상태를 직접 덮어씁니다 (복구 시나리오 테스트용).
    pub async fn force_order_status(
        &self,
        id: i64,
        status: ScheduledOrderStatus,
        updated_at: DateTime<Utc>,
    ) {
        let mut state = self.state.write().await;
        if let Some(order) = state.orders.get_mut(&id) {
            order.status = status;
            order.updated_at = updated_at;
        }
    }
}

fn sorted_by_id(mut orders: Vec<ScheduledOrder>) -> Vec<ScheduledOrder> {
    orders.sort_by_key(|o| o.id);
    orders
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn create_order(&self, new: NewScheduledOrder) -> StoreResult<ScheduledOrder> {
        let mut state = self.state.write().await;
        state.next_order_id += 1;
        let now = Utc::now();
        let order = ScheduledOrder {
            id: state.next_order_id,
            strategy_id: new.strategy_id,
            execution_id: new.execution_id,
            symbol: new.symbol,
            side: new.side,
            order_type: new.order_type,
            quantity: new.quantity,
            price: new.price,
            leverage: new.leverage.max(1),
            reduce_only: new.reduce_only,
            bracket: new.bracket,
            working_type: new.working_type,
            purpose: new.purpose,
            trigger_time: new.trigger_time,
            status: new.initial_status,
            exchange_order_id: None,
            client_order_id: new.client_order_id,
            parent_order_id: new.parent_order_id,
            close_order_ids: Vec::new(),
            avg_price: None,
            executed_qty: None,
            result: None,
            created_at: now,
            updated_at: now,
        };
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: i64) -> StoreResult<Option<ScheduledOrder>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn find_order_by_client_id(
        &self,
        client_order_id: &str,
    ) -> StoreResult<Option<ScheduledOrder>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .find(|o| o.client_order_id.as_deref() == Some(client_order_id))
            .cloned())
    }

    async fn list_due_orders(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<ScheduledOrder>> {
        let state = self.state.read().await;
        let mut due: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.status == ScheduledOrderStatus::Pending && o.trigger_time <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.trigger_time.cmp(&b.trigger_time).then(a.id.cmp(&b.id)));
        due.truncate(limit);
        Ok(due)
    }

    async fn claim_order(&self, id: i64) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state.orders.get_mut(&id) {
            Some(order) if order.status == ScheduledOrderStatus::Pending => {
                order.status = ScheduledOrderStatus::Processing;
                order.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("scheduled order {id}"))),
        }
    }

    async fn update_order(&self, id: i64, update: OrderUpdate) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("scheduled order {id}")))?;

        order.status = update.status;
        if let Some(v) = update.exchange_order_id {
            order.exchange_order_id = Some(v);
        }
        if let Some(v) = update.client_order_id {
            order.client_order_id = Some(v);
        }
        if let Some(v) = update.avg_price {
            order.avg_price = Some(v);
        }
        if let Some(v) = update.executed_qty {
            order.executed_qty = Some(v);
        }
        if let Some(v) = update.quantity {
            order.quantity = v;
        }
        if let Some(v) = update.close_order_ids {
            order.close_order_ids = v;
        }
        if let Some(v) = update.result {
            order.result = Some(v);
        }
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn list_orders_by_status(
        &self,
        status: ScheduledOrderStatus,
        updated_before: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<ScheduledOrder>> {
        let state = self.state.read().await;
        Ok(sorted_by_id(
            state
                .orders
                .values()
                .filter(|o| o.status == status)
                .filter(|o| updated_before.map_or(true, |t| o.updated_at < t))
                .cloned()
                .collect(),
        ))
    }

    async fn list_orders_by_execution(&self, execution_id: i64) -> StoreResult<Vec<ScheduledOrder>> {
        let state = self.state.read().await;
        Ok(sorted_by_id(
            state
                .orders
                .values()
                .filter(|o| o.execution_id == Some(execution_id))
                .cloned()
                .collect(),
        ))
    }

    async fn list_strategy_orders(
        &self,
        strategy_id: i64,
        symbol: Option<&str>,
    ) -> StoreResult<Vec<ScheduledOrder>> {
        let state = self.state.read().await;
        Ok(sorted_by_id(
            state
                .orders
                .values()
                .filter(|o| o.strategy_id == Some(strategy_id))
                .filter(|o| symbol.map_or(true, |s| o.symbol == s))
                .cloned()
                .collect(),
        ))
    }

    async fn list_child_orders(&self, parent_order_id: i64) -> StoreResult<Vec<ScheduledOrder>> {
        let state = self.state.read().await;
        Ok(sorted_by_id(
            state
                .orders
                .values()
                .filter(|o| o.parent_order_id == Some(parent_order_id))
                .cloned()
                .collect(),
        ))
    }
}

#[async_trait]
impl BracketStore for InMemoryStore {
    async fn create_bracket_link(&self, link: BracketLink) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.brackets.insert(link.group_id.clone(), link);
        Ok(())
    }

    async fn get_bracket_link_by_entry(
        &self,
        entry_order_id: i64,
    ) -> StoreResult<Option<BracketLink>> {
        let state = self.state.read().await;
        Ok(state
            .brackets
            .values()
            .find(|l| l.entry_order_id == entry_order_id)
            .cloned())
    }

    async fn list_open_bracket_links(&self) -> StoreResult<Vec<BracketLink>> {
        let state = self.state.read().await;
        let mut links: Vec<_> = state
            .brackets
            .values()
            .filter(|l| l.status.is_open())
            .cloned()
            .collect();
        links.sort_by_key(|l| l.entry_order_id);
        Ok(links)
    }

    async fn update_bracket_status(&self, group_id: &str, status: BracketStatus) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let link = state
            .brackets
            .get_mut(group_id)
            .ok_or_else(|| StoreError::NotFound(format!("bracket {group_id}")))?;
        link.status = status;
        link.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn create_execution(
        &self,
        strategy_id: i64,
        config: ExecutionConfig,
    ) -> StoreResult<StrategyExecution> {
        let mut state = self.state.write().await;
        state.next_execution_id += 1;
        let now = Utc::now();
        let execution = StrategyExecution {
            id: state.next_execution_id,
            strategy_id,
            status: ExecutionStatus::Pending,
            total_symbols: 0,
            processed_symbols: 0,
            config,
            results: ExecutionResults::default(),
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        state.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn get_execution(&self, id: i64) -> StoreResult<Option<StrategyExecution>> {
        Ok(self.state.read().await.executions.get(&id).cloned())
    }

    async fn list_executions(
        &self,
        strategy_id: i64,
        statuses: &[ExecutionStatus],
    ) -> StoreResult<Vec<StrategyExecution>> {
        let state = self.state.read().await;
        let mut executions: Vec<_> = state
            .executions
            .values()
            .filter(|e| e.strategy_id == strategy_id)
            .filter(|e| statuses.is_empty() || statuses.contains(&e.status))
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(executions)
    }

    async fn update_execution(&self, id: i64, update: ExecutionUpdate) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let execution = state
            .executions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("execution {id}")))?;

        if !ExecutionStatus::allowed_predecessors(update.status).contains(&execution.status) {
            return Err(StoreError::InvalidTransition(format!(
                "execution {id}: {} -> {}",
                execution.status, update.status
            )));
        }

        execution.status = update.status;
        if let Some(v) = update.total_symbols {
            execution.total_symbols = v;
        }
        if let Some(v) = update.processed_symbols {
            execution.processed_symbols = v;
        }
        if let Some(v) = update.results {
            execution.results = v;
        }
        if let Some(v) = update.error_message {
            execution.error_message = Some(v);
        }
        if let Some(v) = update.started_at {
            execution.started_at = Some(v);
        }
        if let Some(v) = update.completed_at {
            execution.completed_at = Some(v);
        }
        execution.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_execution(&self, id: i64) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.executions.remove(&id);
        state.steps.retain(|s| s.execution_id != id);
        Ok(())
    }

    async fn add_execution_step(&self, step: ExecutionStep) -> StoreResult<()> {
        self.state.write().await.steps.push(step);
        Ok(())
    }

    async fn list_execution_steps(&self, execution_id: i64) -> StoreResult<Vec<ExecutionStep>> {
        let state = self.state.read().await;
        Ok(state
            .steps
            .iter()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StrategyStore for InMemoryStore {
    async fn list_running_strategies(&self) -> StoreResult<Vec<Strategy>> {
        let state = self.state.read().await;
        let mut strategies: Vec<_> = state
            .strategies
            .values()
            .filter(|s| s.is_running)
            .cloned()
            .collect();
        strategies.sort_by_key(|s| s.id);
        Ok(strategies)
    }

    async fn get_strategy(&self, id: i64) -> StoreResult<Option<Strategy>> {
        Ok(self.state.read().await.strategies.get(&id).cloned())
    }

    async fn save_strategy(&self, strategy: Strategy) -> StoreResult<()> {
        self.state
            .write()
            .await
            .strategies
            .insert(strategy.id, strategy);
        Ok(())
    }

    async fn set_strategy_running(&self, id: i64, running: bool) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let strategy = state
            .strategies
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("strategy {id}")))?;
        strategy.is_running = running;
        Ok(())
    }

    async fn record_strategy_run(
        &self,
        id: i64,
        ran_at: DateTime<Utc>,
        run_count: u32,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let strategy = state
            .strategies
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("strategy {id}")))?;
        strategy.last_run_at = Some(ran_at);
        strategy.run_count = run_count;
        Ok(())
    }

    async fn get_scale_in_count(&self, strategy_id: i64, symbol: &str) -> StoreResult<u32> {
        let state = self.state.read().await;
        Ok(state
            .scale_ins
            .get(&(strategy_id, symbol.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn set_scale_in_count(&self, strategy_id: i64, symbol: &str, count: u32) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.scale_ins.insert((strategy_id, symbol.to_string()), count);
        Ok(())
    }
}

#[async_trait]
impl FilterStore for InMemoryStore {
    async fn get_symbol_filters(&self, symbol: &str) -> StoreResult<Option<SymbolFilters>> {
        Ok(self.state.read().await.filters.get(symbol).cloned())
    }

    async fn upsert_symbol_filters(&self, filters: SymbolFilters) -> StoreResult<()> {
        self.state
            .write()
            .await
            .filters
            .insert(filters.symbol.clone(), filters);
        Ok(())
    }
}

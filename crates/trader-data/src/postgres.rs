//! PostgreSQL 저장소 구현.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use std::time::Duration;
use tracing::{debug, info, instrument};
use trader_core::{
    BracketLink, BracketSpec, BracketStatus, DatabaseConfig, ExecutionConfig, ExecutionResults,
    ExecutionStatus, ExecutionStep, ExecutionUpdate, NewScheduledOrder, OrderUpdate,
    RiskSettings, ScalingSettings, ScheduledOrder, ScheduledOrderStatus, Strategy,
    StrategyExecution, SymbolFilters, SymbolSelection,
};

use crate::error::{StoreError, StoreResult};
use crate::repository::{BracketStore, ExecutionStore, FilterStore, OrderStore, StrategyStore};

/// PostgreSQL 기반 `Store` 구현.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// 연결 풀을 생성합니다.
    pub async fn connect(url: &str, config: &DatabaseConfig) -> StoreResult<Self> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        info!("Database connection established");
        Ok(Self { pool })
    }

    /// 기존 풀을 재사용합니다.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 스키마 마이그레이션을 실행합니다.
    pub async fn migrate(&self) -> StoreResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        info!("Migrations completed successfully");
        Ok(())
    }
}

// =============================================================================
// Records
// =============================================================================

/// 예약 주문 레코드.
#[derive(Debug, Clone, FromRow)]
pub struct ScheduledOrderRecord {
    pub id: i64,
    pub strategy_id: Option<i64>,
    pub execution_id: Option<i64>,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub leverage: i32,
    pub reduce_only: bool,
    pub bracket: Json<BracketSpec>,
    pub working_type: String,
    pub purpose: String,
    pub trigger_time: DateTime<Utc>,
    pub status: String,
    pub exchange_order_id: Option<String>,
    pub client_order_id: Option<String>,
    pub parent_order_id: Option<i64>,
    pub close_order_ids: Vec<i64>,
    pub avg_price: Option<Decimal>,
    pub executed_qty: Option<Decimal>,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ScheduledOrderRecord> for ScheduledOrder {
    type Error = StoreError;

    fn try_from(r: ScheduledOrderRecord) -> Result<Self, Self::Error> {
        Ok(ScheduledOrder {
            id: r.id,
            strategy_id: r.strategy_id,
            execution_id: r.execution_id,
            symbol: r.symbol,
            side: r.side.parse()?,
            order_type: r.order_type.parse()?,
            quantity: r.quantity,
            price: r.price,
            leverage: u32::try_from(r.leverage.max(1)).unwrap_or(1),
            reduce_only: r.reduce_only,
            bracket: r.bracket.0,
            working_type: r.working_type.parse()?,
            purpose: r.purpose.parse()?,
            trigger_time: r.trigger_time,
            status: r.status.parse()?,
            exchange_order_id: r.exchange_order_id,
            client_order_id: r.client_order_id,
            parent_order_id: r.parent_order_id,
            close_order_ids: r.close_order_ids,
            avg_price: r.avg_price,
            executed_qty: r.executed_qty,
            result: r.result,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

fn into_orders(records: Vec<ScheduledOrderRecord>) -> StoreResult<Vec<ScheduledOrder>> {
    records.into_iter().map(ScheduledOrder::try_from).collect()
}

#[derive(Debug, Clone, FromRow)]
struct BracketLinkRecord {
    group_id: String,
    symbol: String,
    entry_order_id: i64,
    entry_client_id: String,
    tp_client_id: Option<String>,
    sl_client_id: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BracketLinkRecord> for BracketLink {
    type Error = StoreError;

    fn try_from(r: BracketLinkRecord) -> Result<Self, Self::Error> {
        Ok(BracketLink {
            group_id: r.group_id,
            symbol: r.symbol,
            entry_order_id: r.entry_order_id,
            entry_client_id: r.entry_client_id,
            tp_client_id: r.tp_client_id,
            sl_client_id: r.sl_client_id,
            status: r.status.parse()?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct ExecutionRecord {
    id: i64,
    strategy_id: i64,
    status: String,
    total_symbols: i32,
    processed_symbols: i32,
    config: Json<ExecutionConfig>,
    results: Json<ExecutionResults>,
    error_message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ExecutionRecord> for StrategyExecution {
    type Error = StoreError;

    fn try_from(r: ExecutionRecord) -> Result<Self, Self::Error> {
        Ok(StrategyExecution {
            id: r.id,
            strategy_id: r.strategy_id,
            status: r.status.parse()?,
            total_symbols: r.total_symbols.max(0) as u32,
            processed_symbols: r.processed_symbols.max(0) as u32,
            config: r.config.0,
            results: r.results.0,
            error_message: r.error_message,
            started_at: r.started_at,
            completed_at: r.completed_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct StrategyRecord {
    id: i64,
    name: String,
    kind: String,
    is_running: bool,
    run_interval_secs: i64,
    last_run_at: Option<DateTime<Utc>>,
    run_count: i32,
    symbols: Json<SymbolSelection>,
    risk: Json<RiskSettings>,
    scaling: Json<ScalingSettings>,
    execution: Json<ExecutionConfig>,
}

impl TryFrom<StrategyRecord> for Strategy {
    type Error = StoreError;

    fn try_from(r: StrategyRecord) -> Result<Self, Self::Error> {
        Ok(Strategy {
            id: r.id,
            name: r.name,
            kind: r.kind.parse()?,
            is_running: r.is_running,
            run_interval_secs: r.run_interval_secs,
            last_run_at: r.last_run_at,
            run_count: r.run_count.max(0) as u32,
            symbols: r.symbols.0,
            risk: r.risk.0,
            scaling: r.scaling.0,
            execution: r.execution.0,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct StepRecord {
    execution_id: i64,
    symbol: String,
    action: String,
    outcome: String,
    message: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct FilterRecord {
    symbol: String,
    step_size: Decimal,
    min_qty: Decimal,
    max_qty: Decimal,
    min_notional: Decimal,
    tick_size: Decimal,
    min_price: Decimal,
    max_price: Decimal,
}

impl From<FilterRecord> for SymbolFilters {
    fn from(r: FilterRecord) -> Self {
        SymbolFilters {
            symbol: r.symbol,
            step_size: r.step_size,
            min_qty: r.min_qty,
            max_qty: r.max_qty,
            min_notional: r.min_notional,
            tick_size: r.tick_size,
            min_price: r.min_price,
            max_price: r.max_price,
        }
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

// =============================================================================
// Orders
// =============================================================================

#[async_trait]
impl OrderStore for PgStore {
    #[instrument(skip(self, order), fields(symbol = %order.symbol))]
    async fn create_order(&self, order: NewScheduledOrder) -> StoreResult<ScheduledOrder> {
        let record: ScheduledOrderRecord = sqlx::query_as(
            r#"
            INSERT INTO scheduled_orders (
                strategy_id, execution_id, symbol, side, order_type, quantity, price,
                leverage, reduce_only, bracket, working_type, purpose, trigger_time,
                status, client_order_id, parent_order_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(order.strategy_id)
        .bind(order.execution_id)
        .bind(&order.symbol)
        .bind(order.side.as_str())
        .bind(order.order_type.as_str())
        .bind(order.quantity)
        .bind(order.price)
        .bind(to_i32(order.leverage.max(1)))
        .bind(order.reduce_only)
        .bind(Json(&order.bracket))
        .bind(order.working_type.as_str())
        .bind(order.purpose.as_str())
        .bind(order.trigger_time)
        .bind(order.initial_status.as_str())
        .bind(&order.client_order_id)
        .bind(order.parent_order_id)
        .fetch_one(&self.pool)
        .await?;

        debug!(order_id = record.id, "Scheduled order inserted");
        record.try_into()
    }

    async fn get_order(&self, id: i64) -> StoreResult<Option<ScheduledOrder>> {
        let record: Option<ScheduledOrderRecord> =
            sqlx::query_as("SELECT * FROM scheduled_orders WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        record.map(ScheduledOrder::try_from).transpose()
    }

    async fn find_order_by_client_id(
        &self,
        client_order_id: &str,
    ) -> StoreResult<Option<ScheduledOrder>> {
        let record: Option<ScheduledOrderRecord> =
            sqlx::query_as("SELECT * FROM scheduled_orders WHERE client_order_id = $1")
                .bind(client_order_id)
                .fetch_optional(&self.pool)
                .await?;
        record.map(ScheduledOrder::try_from).transpose()
    }

    async fn list_due_orders(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<ScheduledOrder>> {
        let records: Vec<ScheduledOrderRecord> = sqlx::query_as(
            r#"
            SELECT * FROM scheduled_orders
            WHERE status = 'pending' AND trigger_time <= $1
            ORDER BY trigger_time ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        into_orders(records)
    }

    #[instrument(skip(self))]
    async fn claim_order(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_orders
            SET status = 'processing', updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, update), fields(status = %update.status))]
    async fn update_order(&self, id: i64, update: OrderUpdate) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_orders SET
                status = $2,
                exchange_order_id = COALESCE($3, exchange_order_id),
                client_order_id = COALESCE($4, client_order_id),
                avg_price = COALESCE($5, avg_price),
                executed_qty = COALESCE($6, executed_qty),
                quantity = COALESCE($7, quantity),
                close_order_ids = COALESCE($8, close_order_ids),
                result = COALESCE($9, result),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.status.as_str())
        .bind(update.exchange_order_id)
        .bind(update.client_order_id)
        .bind(update.avg_price)
        .bind(update.executed_qty)
        .bind(update.quantity)
        .bind(update.close_order_ids)
        .bind(update.result)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("scheduled order {id}")));
        }
        Ok(())
    }

    async fn list_orders_by_status(
        &self,
        status: ScheduledOrderStatus,
        updated_before: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<ScheduledOrder>> {
        let records: Vec<ScheduledOrderRecord> = sqlx::query_as(
            r#"
            SELECT * FROM scheduled_orders
            WHERE status = $1 AND ($2::timestamptz IS NULL OR updated_at < $2)
            ORDER BY id ASC
            "#,
        )
        .bind(status.as_str())
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await?;
        into_orders(records)
    }

    async fn list_orders_by_execution(&self, execution_id: i64) -> StoreResult<Vec<ScheduledOrder>> {
        let records: Vec<ScheduledOrderRecord> =
            sqlx::query_as("SELECT * FROM scheduled_orders WHERE execution_id = $1 ORDER BY id ASC")
                .bind(execution_id)
                .fetch_all(&self.pool)
                .await?;
        into_orders(records)
    }

    async fn list_strategy_orders(
        &self,
        strategy_id: i64,
        symbol: Option<&str>,
    ) -> StoreResult<Vec<ScheduledOrder>> {
        let records: Vec<ScheduledOrderRecord> = sqlx::query_as(
            r#"
            SELECT * FROM scheduled_orders
            WHERE strategy_id = $1 AND ($2::text IS NULL OR symbol = $2)
            ORDER BY id ASC
            "#,
        )
        .bind(strategy_id)
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;
        into_orders(records)
    }

    async fn list_child_orders(&self, parent_order_id: i64) -> StoreResult<Vec<ScheduledOrder>> {
        let records: Vec<ScheduledOrderRecord> = sqlx::query_as(
            "SELECT * FROM scheduled_orders WHERE parent_order_id = $1 ORDER BY id ASC",
        )
        .bind(parent_order_id)
        .fetch_all(&self.pool)
        .await?;
        into_orders(records)
    }
}

// =============================================================================
// Bracket links
// =============================================================================

#[async_trait]
impl BracketStore for PgStore {
    async fn create_bracket_link(&self, link: BracketLink) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bracket_links (
                group_id, symbol, entry_order_id, entry_client_id,
                tp_client_id, sl_client_id, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&link.group_id)
        .bind(&link.symbol)
        .bind(link.entry_order_id)
        .bind(&link.entry_client_id)
        .bind(&link.tp_client_id)
        .bind(&link.sl_client_id)
        .bind(link.status.as_str())
        .bind(link.created_at)
        .bind(link.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_bracket_link_by_entry(
        &self,
        entry_order_id: i64,
    ) -> StoreResult<Option<BracketLink>> {
        let record: Option<BracketLinkRecord> =
            sqlx::query_as("SELECT * FROM bracket_links WHERE entry_order_id = $1")
                .bind(entry_order_id)
                .fetch_optional(&self.pool)
                .await?;
        record.map(BracketLink::try_from).transpose()
    }

    async fn list_open_bracket_links(&self) -> StoreResult<Vec<BracketLink>> {
        let records: Vec<BracketLinkRecord> = sqlx::query_as(
            "SELECT * FROM bracket_links WHERE status IN ('active', 'partial') ORDER BY entry_order_id",
        )
        .fetch_all(&self.pool)
        .await?;
        records.into_iter().map(BracketLink::try_from).collect()
    }

    async fn update_bracket_status(&self, group_id: &str, status: BracketStatus) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE bracket_links SET status = $2, updated_at = NOW() WHERE group_id = $1",
        )
        .bind(group_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("bracket {group_id}")));
        }
        Ok(())
    }
}

// =============================================================================
// Executions
// =============================================================================

#[async_trait]
impl ExecutionStore for PgStore {
    async fn create_execution(
        &self,
        strategy_id: i64,
        config: ExecutionConfig,
    ) -> StoreResult<StrategyExecution> {
        let record: ExecutionRecord = sqlx::query_as(
            r#"
            INSERT INTO strategy_executions (strategy_id, status, config, results)
            VALUES ($1, 'pending', $2, $3)
            RETURNING *
            "#,
        )
        .bind(strategy_id)
        .bind(Json(&config))
        .bind(Json(ExecutionResults::default()))
        .fetch_one(&self.pool)
        .await?;
        record.try_into()
    }

    async fn get_execution(&self, id: i64) -> StoreResult<Option<StrategyExecution>> {
        let record: Option<ExecutionRecord> =
            sqlx::query_as("SELECT * FROM strategy_executions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        record.map(StrategyExecution::try_from).transpose()
    }

    async fn list_executions(
        &self,
        strategy_id: i64,
        statuses: &[ExecutionStatus],
    ) -> StoreResult<Vec<StrategyExecution>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let records: Vec<ExecutionRecord> = sqlx::query_as(
            r#"
            SELECT * FROM strategy_executions
            WHERE strategy_id = $1 AND (cardinality($2::text[]) = 0 OR status = ANY($2))
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(strategy_id)
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await?;
        records.into_iter().map(StrategyExecution::try_from).collect()
    }

    #[instrument(skip(self, update), fields(status = %update.status))]
    async fn update_execution(&self, id: i64, update: ExecutionUpdate) -> StoreResult<()> {
        let allowed: Vec<String> = ExecutionStatus::allowed_predecessors(update.status)
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let result = sqlx::query(
            r#"
            UPDATE strategy_executions SET
                status = $2,
                total_symbols = COALESCE($3, total_symbols),
                processed_symbols = COALESCE($4, processed_symbols),
                results = COALESCE($5, results),
                error_message = COALESCE($6, error_message),
                started_at = COALESCE($7, started_at),
                completed_at = COALESCE($8, completed_at),
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($9)
            "#,
        )
        .bind(id)
        .bind(update.status.as_str())
        .bind(update.total_symbols.map(to_i32))
        .bind(update.processed_symbols.map(to_i32))
        .bind(update.results.map(Json))
        .bind(update.error_message)
        .bind(update.started_at)
        .bind(update.completed_at)
        .bind(&allowed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_execution(id).await? {
                Some(current) => Err(StoreError::InvalidTransition(format!(
                    "execution {id}: {} -> {}",
                    current.status, update.status
                ))),
                None => Err(StoreError::NotFound(format!("execution {id}"))),
            };
        }
        Ok(())
    }

    async fn delete_execution(&self, id: i64) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM execution_steps WHERE execution_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM strategy_executions WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_execution_step(&self, step: ExecutionStep) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_steps (execution_id, symbol, action, outcome, message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(step.execution_id)
        .bind(&step.symbol)
        .bind(&step.action)
        .bind(step.outcome.as_str())
        .bind(&step.message)
        .bind(step.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_execution_steps(&self, execution_id: i64) -> StoreResult<Vec<ExecutionStep>> {
        let records: Vec<StepRecord> = sqlx::query_as(
            r#"
            SELECT execution_id, symbol, action, outcome, message, created_at
            FROM execution_steps WHERE execution_id = $1 ORDER BY id ASC
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        records
            .into_iter()
            .map(|r| {
                Ok(ExecutionStep {
                    execution_id: r.execution_id,
                    symbol: r.symbol,
                    action: r.action,
                    outcome: r.outcome.parse()?,
                    message: r.message,
                    created_at: r.created_at,
                })
            })
            .collect()
    }
}

// =============================================================================
// Strategies
// =============================================================================

#[async_trait]
impl StrategyStore for PgStore {
    async fn list_running_strategies(&self) -> StoreResult<Vec<Strategy>> {
        let records: Vec<StrategyRecord> =
            sqlx::query_as("SELECT * FROM strategies WHERE is_running ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        records.into_iter().map(Strategy::try_from).collect()
    }

    async fn get_strategy(&self, id: i64) -> StoreResult<Option<Strategy>> {
        let record: Option<StrategyRecord> =
            sqlx::query_as("SELECT * FROM strategies WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        record.map(Strategy::try_from).transpose()
    }

    async fn save_strategy(&self, strategy: Strategy) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO strategies (
                id, name, kind, is_running, run_interval_secs, last_run_at, run_count,
                symbols, risk, scaling, execution
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                kind = EXCLUDED.kind,
                is_running = EXCLUDED.is_running,
                run_interval_secs = EXCLUDED.run_interval_secs,
                last_run_at = EXCLUDED.last_run_at,
                run_count = EXCLUDED.run_count,
                symbols = EXCLUDED.symbols,
                risk = EXCLUDED.risk,
                scaling = EXCLUDED.scaling,
                execution = EXCLUDED.execution
            "#,
        )
        .bind(strategy.id)
        .bind(&strategy.name)
        .bind(strategy.kind.as_str())
        .bind(strategy.is_running)
        .bind(strategy.run_interval_secs)
        .bind(strategy.last_run_at)
        .bind(to_i32(strategy.run_count))
        .bind(Json(&strategy.symbols))
        .bind(Json(&strategy.risk))
        .bind(Json(&strategy.scaling))
        .bind(Json(&strategy.execution))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_strategy_running(&self, id: i64, running: bool) -> StoreResult<()> {
        let result = sqlx::query("UPDATE strategies SET is_running = $2 WHERE id = $1")
            .bind(id)
            .bind(running)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("strategy {id}")));
        }
        Ok(())
    }

    async fn record_strategy_run(
        &self,
        id: i64,
        ran_at: DateTime<Utc>,
        run_count: u32,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE strategies SET last_run_at = $2, run_count = $3 WHERE id = $1")
            .bind(id)
            .bind(ran_at)
            .bind(to_i32(run_count))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_scale_in_count(&self, strategy_id: i64, symbol: &str) -> StoreResult<u32> {
        let count: Option<(i32,)> = sqlx::query_as(
            "SELECT count FROM strategy_scale_ins WHERE strategy_id = $1 AND symbol = $2",
        )
        .bind(strategy_id)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        Ok(count.map(|(c,)| c.max(0) as u32).unwrap_or(0))
    }

    async fn set_scale_in_count(&self, strategy_id: i64, symbol: &str, count: u32) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO strategy_scale_ins (strategy_id, symbol, count)
            VALUES ($1, $2, $3)
            ON CONFLICT (strategy_id, symbol) DO UPDATE SET count = EXCLUDED.count
            "#,
        )
        .bind(strategy_id)
        .bind(symbol)
        .bind(to_i32(count))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// =============================================================================
// Filters
// =============================================================================

#[async_trait]
impl FilterStore for PgStore {
    async fn get_symbol_filters(&self, symbol: &str) -> StoreResult<Option<SymbolFilters>> {
        let record: Option<FilterRecord> =
            sqlx::query_as("SELECT * FROM symbol_filters WHERE symbol = $1")
                .bind(symbol)
                .fetch_optional(&self.pool)
                .await?;
        Ok(record.map(SymbolFilters::from))
    }

    async fn upsert_symbol_filters(&self, filters: SymbolFilters) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO symbol_filters (
                symbol, step_size, min_qty, max_qty, min_notional, tick_size, min_price, max_price
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (symbol) DO UPDATE SET
                step_size = EXCLUDED.step_size,
                min_qty = EXCLUDED.min_qty,
                max_qty = EXCLUDED.max_qty,
                min_notional = EXCLUDED.min_notional,
                tick_size = EXCLUDED.tick_size,
                min_price = EXCLUDED.min_price,
                max_price = EXCLUDED.max_price
            "#,
        )
        .bind(&filters.symbol)
        .bind(filters.step_size)
        .bind(filters.min_qty)
        .bind(filters.max_qty)
        .bind(filters.min_notional)
        .bind(filters.tick_size)
        .bind(filters.min_price)
        .bind(filters.max_price)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record() -> ScheduledOrderRecord {
        let now = Utc::now();
        ScheduledOrderRecord {
            id: 9,
            strategy_id: Some(1),
            execution_id: Some(2),
            symbol: "BTCUSDT".to_string(),
            side: "SELL".to_string(),
            order_type: "TAKE_PROFIT_MARKET".to_string(),
            quantity: dec!(0.01),
            price: Some(dec!(102)),
            leverage: 10,
            reduce_only: true,
            bracket: Json(BracketSpec::disabled()),
            working_type: "CONTRACT_PRICE".to_string(),
            purpose: "take_profit".to_string(),
            trigger_time: now,
            status: "success".to_string(),
            exchange_order_id: Some("77".to_string()),
            client_order_id: Some("sch-8-tp-1".to_string()),
            parent_order_id: Some(8),
            close_order_ids: vec![],
            avg_price: None,
            executed_qty: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_record_conversion() {
        let order = ScheduledOrder::try_from(record()).unwrap();
        assert!(order.is_conditional_leg());
        assert_eq!(order.status, ScheduledOrderStatus::Success);
        assert_eq!(order.leverage, 10);
    }

    #[test]
    fn test_record_conversion_rejects_unknown_status() {
        let mut bad = record();
        bad.status = "exploded".to_string();
        assert!(matches!(
            ScheduledOrder::try_from(bad),
            Err(StoreError::InvalidData(_))
        ));
    }
}

//! 전략 실행 오케스트레이터.
//!
//! 패스마다 실행 중인 전략을 순회하며:
//! 1. 좀비 실행과 장기 미실행 전략을 정리하고
//! 2. 실행 주기가 된 전략에 대해 대기 실행 1건을 보장한 뒤
//! 3. 전략별 잠금을 잡은 상태로 실행을 별도 작업으로 시작합니다.
//!
//! 실행 작업 안의 에러와 패닉은 실행 기록을 `failed`로 남기며 패스 밖으로 전파되지 않습니다.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use trader_core::{
    AgentState, ExecutionResults, ExecutionStatus, ExecutionStep, ExecutionUpdate,
    MarketSnapshot, OrchestratorConfig, OrderSide, ScheduledOrderStatus, StepOutcome,
    Strategy, StrategyAction, StrategyExecution, SymbolSelection,
};
use trader_data::Store;
use trader_exchange::FuturesExchange;
use trader_execution::{OrderBuilder, ProfitScalingManager, Reconciler, ScalingAction};
use trader_strategy::{StrategyKind, StrategyRegistry};

use crate::error::{SchedulerError, SchedulerResult};
use crate::stats::PassStats;

/// 패스 결과. 시작한 전략 실행 작업의 핸들을 포함합니다.
pub struct PassOutcome {
    pub stats: PassStats,
    pub runs: Vec<JoinHandle<()>>,
}

/// 전략 실행 오케스트레이터.
pub struct StrategyOrchestrator {
    store: Arc<dyn Store>,
    exchange: Arc<dyn FuturesExchange>,
    registry: Arc<StrategyRegistry>,
    builder: Arc<OrderBuilder>,
    scaling: Arc<ProfitScalingManager>,
    reconciler: Arc<Reconciler>,
    config: OrchestratorConfig,
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl StrategyOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        exchange: Arc<dyn FuturesExchange>,
        registry: Arc<StrategyRegistry>,
        builder: Arc<OrderBuilder>,
        scaling: Arc<ProfitScalingManager>,
        reconciler: Arc<Reconciler>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            exchange,
            registry,
            builder,
            scaling,
            reconciler,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 전략별 실행 잠금. 처음 요청될 때 생성됩니다.
    pub async fn strategy_lock(&self, strategy_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(strategy_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 패스 한 번을 실행합니다.
    pub async fn run_pass(self: &Arc<Self>, now: DateTime<Utc>) -> SchedulerResult<PassOutcome> {
        let started = Instant::now();
        let mut stats = PassStats::new();
        let mut runs = Vec::new();

        stats.reconciled = self.reconcile().await;

        let strategies = self.store.list_running_strategies().await?;
        stats.strategies = strategies.len();

        for strategy in strategies {
            match self.check_consistency(&strategy, now, &mut stats).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    stats.errors += 1;
                    error!(strategy_id = strategy.id, error = %e, "Consistency check failed");
                    continue;
                }
            }

            if !strategy.is_due(now) {
                stats.not_due += 1;
                continue;
            }

            let Ok(guard) = self.strategy_lock(strategy.id).await.try_lock_owned() else {
                stats.skipped_locked += 1;
                debug!(strategy_id = strategy.id, "Previous run still holds the lock");
                continue;
            };

            let execution = match self.ensure_pending_execution(&strategy, &mut stats).await {
                Ok(execution) => execution,
                Err(e) => {
                    stats.errors += 1;
                    error!(strategy_id = strategy.id, error = %e, "Failed to prepare execution");
                    continue;
                }
            };

            let this = Arc::clone(self);
            let span = tracing::info_span!(
                "strategy_run",
                strategy_id = strategy.id,
                execution_id = execution.id
            );
            runs.push(tokio::spawn(
                async move {
                    let _guard = guard;
                    let execution_id = execution.id;
                    let run = tokio::spawn(
                        Arc::clone(&this)
                            .run_strategy(strategy.clone(), execution)
                            .in_current_span(),
                    );
                    let outcome = run.await;
                    this.finish_run(&strategy, execution_id, outcome).await;
                }
                .instrument(span),
            ));
            stats.started += 1;
        }

        stats.elapsed = started.elapsed();
        Ok(PassOutcome { stats, runs })
    }

    /// 종료 토큰이 취소될 때까지 패스를 반복합니다. 실행 작업은 분리됩니다.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> SchedulerResult<()> {
        info!(
            interval_secs = self.config.interval_secs,
            zombie_timeout_secs = self.config.zombie_timeout_secs,
            "Strategy orchestrator started"
        );

        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Strategy orchestrator stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.run_pass(Utc::now()).await {
                        Ok(outcome) => outcome.stats.log_summary(),
                        Err(e) => error!(error = %e, "Orchestrator pass failed"),
                    }
                }
            }
        }
        Ok(())
    }

    /// 주문/브라켓 상태를 거래소와 동기화합니다. 변경된 건수를 반환합니다.
    async fn reconcile(&self) -> usize {
        let mut changed = 0;
        match self.reconciler.sync_open_orders().await {
            Ok(report) => changed += report.changed,
            Err(e) => warn!(error = %e, "Order sync failed"),
        }
        match self.reconciler.sync_brackets().await {
            Ok(report) => changed += report.changed,
            Err(e) => warn!(error = %e, "Bracket sync failed"),
        }
        changed
    }

    /// 좀비 실행을 실패 처리하고 장기 미실행 전략을 중지합니다.
    ///
    /// 마지막 성공 이후 실행 주기와 유예 시간을 모두 넘긴 전략만 중지합니다.
    /// 전략이 계속 실행 상태이면 true.
    async fn check_consistency(
        &self,
        strategy: &Strategy,
        now: DateTime<Utc>,
        stats: &mut PassStats,
    ) -> SchedulerResult<bool> {
        let threshold = self.config.zombie_timeout();
        let running = self
            .store
            .list_executions(strategy.id, &[ExecutionStatus::Running])
            .await?;

        let mut zombies = 0;
        for execution in running.iter().filter(|e| e.is_zombie(now, threshold)) {
            let reason = format!(
                "zombie: running longer than {}s",
                self.config.zombie_timeout_secs
            );
            self.store
                .update_execution(execution.id, ExecutionUpdate::failed(now, reason))
                .await?;
            zombies += 1;
            warn!(
                strategy_id = strategy.id,
                execution_id = execution.id,
                "Zombie execution marked failed"
            );
        }
        stats.zombies_failed += zombies;

        let active = self
            .store
            .list_executions(strategy.id, &[ExecutionStatus::Pending, ExecutionStatus::Running])
            .await?;
        if !active.is_empty() {
            return Ok(true);
        }

        if zombies > 0 {
            self.stop_strategy(strategy.id, "no active execution after zombie cleanup", stats)
                .await?;
            return Ok(false);
        }

        if strategy.last_run_at.is_some() {
            let last_success = self
                .store
                .list_executions(strategy.id, &[ExecutionStatus::Completed])
                .await?
                .first()
                .and_then(|e| e.completed_at)
                .or(strategy.last_run_at);
            let cutoff = strategy.run_interval() + self.config.stale_strategy_grace();
            if last_success.is_some_and(|t| now - t > cutoff) {
                self.stop_strategy(strategy.id, "no successful run within grace window", stats)
                    .await?;
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn stop_strategy(
        &self,
        strategy_id: i64,
        reason: &str,
        stats: &mut PassStats,
    ) -> SchedulerResult<()> {
        self.store.set_strategy_running(strategy_id, false).await?;
        stats.auto_stopped += 1;
        warn!(strategy_id, reason, "Strategy auto-stopped");
        Ok(())
    }

    /// 전략의 대기 실행을 정확히 1건으로 맞춥니다. 중복은 최신 1건만 남기고 삭제합니다.
    async fn ensure_pending_execution(
        &self,
        strategy: &Strategy,
        stats: &mut PassStats,
    ) -> SchedulerResult<StrategyExecution> {
        let mut pending = self
            .store
            .list_executions(strategy.id, &[ExecutionStatus::Pending])
            .await?
            .into_iter();

        let Some(newest) = pending.next() else {
            let execution = self
                .store
                .create_execution(strategy.id, strategy.execution.clone())
                .await?;
            debug!(strategy_id = strategy.id, execution_id = execution.id, "Execution created");
            return Ok(execution);
        };

        for duplicate in pending {
            self.store.delete_execution(duplicate.id).await?;
            stats.duplicates_pruned += 1;
            debug!(
                strategy_id = strategy.id,
                execution_id = duplicate.id,
                "Duplicate pending execution pruned"
            );
        }
        Ok(newest)
    }

    /// 전략 실행 한 번: 심볼 평가, 스케일링, 결과 집계.
    async fn run_strategy(
        self: Arc<Self>,
        strategy: Strategy,
        execution: StrategyExecution,
    ) -> SchedulerResult<()> {
        let kind = self
            .registry
            .get(strategy.kind)
            .ok_or(SchedulerError::UnknownStrategy(strategy.kind))?;

        let symbols = self.resolve_symbols(&strategy, kind).await?;
        self.store
            .update_execution(
                execution.id,
                ExecutionUpdate::started(Utc::now(), symbols.len() as u32),
            )
            .await?;
        info!(symbols = symbols.len(), kind = %strategy.kind, "Strategy run started");

        let delay = execution.config.execution_delay();
        for (index, symbol) in symbols.iter().enumerate() {
            let step = self.evaluate_symbol(&strategy, &execution, kind, symbol).await;
            self.store.add_execution_step(step).await?;
            self.store
                .update_execution(execution.id, ExecutionUpdate::progress(index as u32 + 1))
                .await?;

            if !delay.is_zero() && index + 1 < symbols.len() {
                tokio::time::sleep(delay).await;
            }
        }

        match self
            .scaling
            .evaluate_strategy(&strategy, Some(execution.id), Utc::now())
            .await
        {
            Ok(actions) => {
                let queued = actions
                    .iter()
                    .filter(|(_, a)| {
                        matches!(a, ScalingAction::ScaleIn { .. } | ScalingAction::OverallClose { .. })
                    })
                    .count();
                if queued > 0 {
                    info!(queued, "Scaling orders queued");
                }
            }
            Err(e) => warn!(error = %e, "Profit scaling failed"),
        }

        let results = self.collect_results(execution.id).await?;
        let now = Utc::now();
        self.store
            .update_execution(
                execution.id,
                ExecutionUpdate::completed(now, symbols.len() as u32, results.clone()),
            )
            .await?;

        let run_count = strategy.run_count + 1;
        self.store
            .record_strategy_run(strategy.id, now, run_count)
            .await?;
        info!(
            run_count,
            orders_created = results.orders_created,
            total_pnl = %results.total_pnl,
            "Strategy run completed"
        );

        if execution.config.should_stop_after(run_count) {
            self.store.set_strategy_running(strategy.id, false).await?;
            info!(run_count, "Strategy stopped after reaching max runs");
        }
        Ok(())
    }

    /// 화이트리스트 또는 전략 종류별 스캔으로 평가 대상 심볼을 정합니다.
    async fn resolve_symbols(
        &self,
        strategy: &Strategy,
        kind: &StrategyKind,
    ) -> SchedulerResult<Vec<String>> {
        match &strategy.symbols {
            SymbolSelection::Whitelist { symbols } => Ok(symbols.clone()),
            SymbolSelection::Scan { limit } => {
                let now = Utc::now();
                let mut snapshots = Vec::new();
                for symbol in self.exchange.list_symbols().await? {
                    match self.exchange.get_ticker(&symbol).await {
                        Ok(ticker) => snapshots.push(MarketSnapshot {
                            symbol: ticker.symbol,
                            mark_price: Some(ticker.last_price),
                            price_change_pct: ticker.price_change_pct,
                            quote_volume: ticker.quote_volume,
                            observed_at: now,
                        }),
                        Err(e) => debug!(symbol = %symbol, error = %e, "Ticker unavailable"),
                    }
                }
                let selected = kind.scan(&snapshots, *limit);
                debug!(scanned = snapshots.len(), selected = selected.len(), "Symbol scan finished");
                Ok(selected)
            }
        }
    }

    /// 심볼 하나를 평가하고 그 결과를 실행 단계로 반환합니다. 실패도 단계로 기록됩니다.
    async fn evaluate_symbol(
        &self,
        strategy: &Strategy,
        execution: &StrategyExecution,
        kind: &StrategyKind,
        symbol: &str,
    ) -> ExecutionStep {
        let step = |action: String, outcome: StepOutcome, message: Option<String>| ExecutionStep {
            execution_id: execution.id,
            symbol: symbol.to_string(),
            action,
            outcome,
            message,
            created_at: Utc::now(),
        };

        let now = Utc::now();
        let (snapshot, state) = match self.observe(strategy.id, symbol, now).await {
            Ok(observed) => observed,
            Err(e) => {
                warn!(symbol, error = %e, "Symbol observation failed");
                return step("none".to_string(), StepOutcome::Error, Some(e.to_string()));
            }
        };

        let decision = kind.decide(&snapshot, &state);
        let action = decision.action.to_string();
        debug!(symbol, action = %action, confidence = decision.confidence, "Decision made");

        if !decision.is_actionable() {
            return step(action, StepOutcome::NoAction, Some(decision.reason));
        }
        if !execution.config.auto_create_orders {
            return step(
                action,
                StepOutcome::Skipped,
                Some("automatic order creation disabled".to_string()),
            );
        }

        match self
            .builder
            .build_and_insert(strategy, Some(execution.id), &decision, &snapshot)
            .await
        {
            Ok(Some(order)) => step(
                action,
                StepOutcome::OrderCreated,
                Some(format!("order {}: {}", order.id, decision.reason)),
            ),
            Ok(None) => step(action, StepOutcome::NoAction, Some(decision.reason)),
            Err(e) => {
                warn!(symbol, error = %e, "Order creation failed");
                step(action, StepOutcome::Error, Some(e.to_string()))
            }
        }
    }

    /// 시세 스냅샷과 포지션 기반 에이전트 상태를 구성합니다.
    async fn observe(
        &self,
        strategy_id: i64,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> SchedulerResult<(MarketSnapshot, AgentState)> {
        let ticker = self.exchange.get_ticker(symbol).await?;
        // 마크 가격이 없으면 수량은 심볼별 기본 수량으로 정해집니다
        let mark_price = match self.exchange.get_mark_price(symbol).await {
            Ok(price) => Some(price),
            Err(e) => {
                warn!(symbol, error = %e, "Mark price unavailable");
                None
            }
        };
        let snapshot = MarketSnapshot {
            symbol: symbol.to_string(),
            mark_price,
            price_change_pct: ticker.price_change_pct,
            quote_volume: ticker.quote_volume,
            observed_at: now,
        };

        let Some(position) = self.exchange.get_position(symbol).await? else {
            return Ok((snapshot, AgentState::flat()));
        };

        let orders = self.store.list_strategy_orders(strategy_id, Some(symbol)).await?;
        let last_entry = orders
            .iter()
            .filter(|o| !o.reduce_only && o.parent_order_id.is_none())
            .filter(|o| {
                matches!(
                    o.status,
                    ScheduledOrderStatus::Success | ScheduledOrderStatus::Filled
                )
            })
            .max_by_key(|o| o.updated_at);

        let state = AgentState {
            has_position: position.side().is_some(),
            position_side: position.side(),
            entry_price: Some(position.entry_price),
            position_qty: position.abs_quantity(),
            hold_time_secs: last_entry
                .map(|o| (now - o.updated_at).num_seconds().max(0))
                .unwrap_or(0),
            last_action: last_entry.map(|o| match o.side {
                OrderSide::Buy => StrategyAction::Buy,
                OrderSide::Sell => StrategyAction::Short,
            }),
        };
        Ok((snapshot, state))
    }

    /// 실행 기록에 속한 주문과 손익을 집계합니다.
    async fn collect_results(&self, execution_id: i64) -> SchedulerResult<ExecutionResults> {
        let orders = self.store.list_orders_by_execution(execution_id).await?;
        let entries: Vec<_> = orders.iter().filter(|o| o.parent_order_id.is_none()).collect();

        let mut results = ExecutionResults {
            orders_created: entries.len() as u32,
            orders_succeeded: entries
                .iter()
                .filter(|o| {
                    matches!(
                        o.status,
                        ScheduledOrderStatus::Success | ScheduledOrderStatus::Filled
                    )
                })
                .count() as u32,
            orders_failed: entries
                .iter()
                .filter(|o| o.status == ScheduledOrderStatus::Failed)
                .count() as u32,
            ..ExecutionResults::default()
        };

        match self.reconciler.pnl_summary(&orders).await {
            Ok(pnl) => {
                results.total_pnl = pnl.total;
                results.win_rate = pnl.win_rate;
            }
            Err(e) => warn!(execution_id, error = %e, "PnL aggregation failed"),
        }
        Ok(results)
    }

    /// 실행 작업의 종료 결과를 기록합니다. 실패와 패닉은 실행을 `failed`로 남깁니다.
    async fn finish_run(
        &self,
        strategy: &Strategy,
        execution_id: i64,
        outcome: Result<SchedulerResult<()>, JoinError>,
    ) {
        let Some(reason) = failure_reason(outcome) else {
            return;
        };
        error!(reason = %reason, "Strategy run failed");

        let now = Utc::now();
        if let Err(e) = self
            .store
            .update_execution(execution_id, ExecutionUpdate::failed(now, &reason))
            .await
        {
            error!(error = %e, "Failed to record execution failure");
        }
        // 실패한 실행도 주기를 지키도록 실행 시각만 갱신
        if let Err(e) = self
            .store
            .record_strategy_run(strategy.id, now, strategy.run_count)
            .await
        {
            error!(error = %e, "Failed to record strategy run time");
        }
    }
}

/// 실행 작업 결과를 실패 사유로 변환합니다. 성공이면 None.
pub fn failure_reason(outcome: Result<SchedulerResult<()>, JoinError>) -> Option<String> {
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            Some(SchedulerError::Panicked(message).to_string())
        }
        Err(e) => Some(SchedulerError::Join(e.to_string()).to_string()),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// 패닉을 backtrace와 함께 tracing으로 기록하는 훅을 설치합니다.
pub fn install_panic_logger() {
    std::panic::set_hook(Box::new(|info| {
        let backtrace = Backtrace::force_capture();
        error!(panic = %info, backtrace = %backtrace, "Panic captured");
    }));
}

//! 틱 스케줄러.
//!
//! 매 틱마다 실행 시각이 지난 `pending` 주문을 조회하고, 작업 풀 허가를 얻은 뒤
//! 조건부 선점(`pending → processing`)에 성공한 주문만 실행기에 넘깁니다.
//! 허가를 얻지 못한 주문은 `pending`으로 남아 다음 틱에 다시 조회됩니다.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trader_core::{OrderUpdate, ScheduledOrderStatus, TickConfig};
use trader_data::Store;
use trader_execution::{BackgroundTasks, OrderExecutor};

use crate::error::SchedulerResult;
use crate::stats::TickStats;

const RECOVERY_REASON: &str = "interrupted before completion";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// 예약 주문 틱 스케줄러.
pub struct TickScheduler {
    store: Arc<dyn Store>,
    executor: Arc<OrderExecutor>,
    config: TickConfig,
    permits: Arc<Semaphore>,
    tasks: BackgroundTasks,
}

impl TickScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<OrderExecutor>,
        config: TickConfig,
        tasks: BackgroundTasks,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            store,
            executor,
            config,
            permits,
            tasks,
        }
    }

    /// 남은 작업 풀 허가 수.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// 오래 `processing`에 머문 주문을 `failed`로 정리합니다.
    ///
    /// 재실행하지 않으므로 재시작 후에도 주문당 최대 1회 제출이 유지됩니다.
    pub async fn recover_stale_processing(&self, now: DateTime<Utc>) -> SchedulerResult<usize> {
        let cutoff = now - chrono::Duration::seconds(self.config.stale_processing_secs);
        let stale = self
            .store
            .list_orders_by_status(ScheduledOrderStatus::Processing, Some(cutoff))
            .await?;

        for order in &stale {
            self.store
                .update_order(order.id, OrderUpdate::failed(RECOVERY_REASON))
                .await?;
            warn!(order_id = order.id, symbol = %order.symbol, "Stale processing order marked failed");
        }
        Ok(stale.len())
    }

    /// 한 틱을 처리합니다. 실행은 백그라운드로 진행되며 완료를 기다리지 않습니다.
    pub async fn run_once(&self, now: DateTime<Utc>) -> SchedulerResult<TickStats> {
        let started = Instant::now();
        let mut stats = TickStats::new();

        let due = self.store.list_due_orders(now, self.config.batch_size).await?;
        stats.listed = due.len();

        for (index, order) in due.iter().enumerate() {
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                stats.deferred = due.len() - index;
                debug!(deferred = stats.deferred, "Worker pool saturated");
                break;
            };

            match self.store.claim_order(order.id).await {
                Ok(true) => {}
                Ok(false) => {
                    stats.lost_claims += 1;
                    continue;
                }
                Err(e) => {
                    stats.errors += 1;
                    error!(order_id = order.id, error = %e, "Failed to claim order");
                    continue;
                }
            }

            let mut claimed = order.clone();
            claimed.status = ScheduledOrderStatus::Processing;
            let executor = self.executor.clone();
            self.tasks.spawn(format!("order:{}", order.id), async move {
                let _permit = permit;
                let status = executor.execute(&claimed).await?;
                debug!(order_id = claimed.id, status = %status, "Order dispatch finished");
                Ok::<(), trader_execution::ExecutionError>(())
            });
            stats.dispatched += 1;
        }

        stats.elapsed = started.elapsed();
        Ok(stats)
    }

    /// 진행 중인 주문 실행이 모두 끝날 때까지 기다립니다.
    pub async fn wait_idle(&self) {
        self.tasks.wait_idle().await;
    }

    /// 종료 토큰이 취소될 때까지 틱을 반복합니다.
    pub async fn run(&self, shutdown: CancellationToken) -> SchedulerResult<()> {
        let recovered = self.recover_stale_processing(Utc::now()).await?;
        if recovered > 0 {
            info!(recovered, "Recovered stale processing orders");
        }

        info!(
            interval_ms = self.config.interval_ms,
            max_concurrency = self.config.max_concurrency,
            "Tick scheduler started"
        );

        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Tick scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.run_once(Utc::now()).await {
                        Ok(stats) => stats.log_summary(),
                        Err(e) => error!(error = %e, "Tick failed"),
                    }
                }
            }
        }

        if tokio::time::timeout(SHUTDOWN_GRACE, self.tasks.wait_idle())
            .await
            .is_err()
        {
            warn!("In-flight orders did not finish before shutdown grace period");
        }
        self.tasks.shutdown(Duration::from_secs(1)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trader_core::{ExecutionSettings, NewScheduledOrder, OrderSide, SymbolFilters};
    use trader_data::{InMemoryStore, OrderStore};
    use trader_exchange::SimulatedFuturesExchange;

    async fn scheduler(max_concurrency: usize) -> (TickScheduler, Arc<InMemoryStore>) {
        let exchange = Arc::new(SimulatedFuturesExchange::default());
        exchange
            .add_market(SymbolFilters::new("BTCUSDT", dec!(0.001), dec!(0.1), dec!(5)), dec!(100))
            .await;
        let store = Arc::new(InMemoryStore::new());
        let executor = OrderExecutor::new(exchange, store.clone(), ExecutionSettings::default()).unwrap();
        let (tasks, _failures) = BackgroundTasks::new();
        let config = TickConfig {
            max_concurrency,
            ..TickConfig::default()
        };
        (
            TickScheduler::new(store.clone(), Arc::new(executor), config, tasks),
            store,
        )
    }

    #[tokio::test]
    async fn test_future_orders_not_dispatched() {
        let (scheduler, store) = scheduler(4).await;
        store
            .create_order(
                NewScheduledOrder::market("BTCUSDT", OrderSide::Buy, dec!(0.1))
                    .with_trigger_time(Utc::now() + chrono::Duration::hours(1)),
            )
            .await
            .unwrap();

        let stats = scheduler.run_once(Utc::now()).await.unwrap();
        assert!(stats.is_idle());
        assert_eq!(stats.dispatched, 0);
    }

    #[tokio::test]
    async fn test_pool_saturation_defers_rest() {
        let (scheduler, store) = scheduler(1).await;
        for _ in 0..3 {
            store
                .create_order(NewScheduledOrder::market("BTCUSDT", OrderSide::Buy, dec!(0.1)))
                .await
                .unwrap();
        }

        let stats = scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(stats.listed, 3);
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.deferred, 2);

        scheduler.wait_idle().await;
        let orders = store.all_orders().await;
        let pending = orders
            .iter()
            .filter(|o| o.status == ScheduledOrderStatus::Pending)
            .count();
        assert_eq!(pending, 2);
        assert_eq!(scheduler.available_permits(), 1);
    }
}

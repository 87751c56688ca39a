//! 거래소 상태 동기화와 손익 집계.
//!
//! - `sync_order`: 접수(`success`) 주문을 거래소 조회 결과로 `filled`/`canceled` 전환
//! - `sync_bracket`: 한쪽 레그가 체결되면 반대편을 취소하고 연결 종료,
//!   진입이 체결 전 취소되었으면 `orphaned`
//! - 진입 주문별 실현/미실현 손익과 승률 집계. 전체 청산은 이전 진입의 남은 수량을 모두 닫습니다.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use trader_core::{
    BracketLink, BracketStatus, OrderPurpose, OrderUpdate, ScheduledOrder, ScheduledOrderStatus,
};
use trader_data::Store;
use trader_exchange::{FuturesExchange, RejectionKind};

use crate::engine::{ack_status, algo_status_update};
use crate::error::ExecutionResult;

/// 진입 주문 하나의 손익.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryPnl {
    pub order_id: i64,
    pub symbol: String,
    pub realized: Decimal,
    pub unrealized: Decimal,
    pub open_quantity: Decimal,
}

impl EntryPnl {
    pub fn total(&self) -> Decimal {
        self.realized + self.unrealized
    }
}

/// 손익 요약.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PnlSummary {
    pub total: Decimal,
    pub realized: Decimal,
    pub unrealized: Decimal,
    pub wins: u32,
    pub losses: u32,
    /// 승률 (0.0 ~ 100.0)
    pub win_rate: f64,
}

/// 동기화 결과 집계.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SyncReport {
    pub checked: usize,
    pub changed: usize,
    pub errors: usize,
}

/// 손익 집계 대상인 진입 주문인지 확인합니다.
fn is_filled_entry(order: &ScheduledOrder) -> bool {
    if order.reduce_only || order.purpose.is_closing() {
        return false;
    }
    match order.status {
        ScheduledOrderStatus::Filled => true,
        ScheduledOrderStatus::Success => order.executed_qty.is_some_and(|q| q > Decimal::ZERO),
        _ => false,
    }
}

/// 진입 이후 처음 체결된 전체 청산 주문을 찾습니다.
///
/// 전체 청산은 부모 주문 없이 포지션 전량을 닫으므로, 그보다 먼저 생성된 같은 심볼의
/// 반대 방향 진입은 남은 수량이 모두 이 주문으로 청산된 것으로 봅니다.
pub fn overall_close_for<'a>(
    entry: &ScheduledOrder,
    candidates: &'a [ScheduledOrder],
) -> Option<&'a ScheduledOrder> {
    candidates
        .iter()
        .filter(|c| c.purpose == OrderPurpose::OverallClose)
        .filter(|c| c.status == ScheduledOrderStatus::Filled)
        .filter(|c| c.symbol == entry.symbol && c.side == entry.side.opposite())
        .filter(|c| c.id > entry.id)
        .min_by_key(|c| c.id)
}

/// 진입 주문의 손익을 계산합니다.
///
/// 실현 손익은 체결된 청산 주문의 체결가 기준, 미실현 손익은 남은 수량의 마크 가격 기준입니다.
/// 진입가를 알 수 없으면 None.
pub fn entry_pnl(
    entry: &ScheduledOrder,
    closes: &[ScheduledOrder],
    mark_price: Option<Decimal>,
) -> Option<EntryPnl> {
    let entry_price = entry.avg_price.or(entry.price).filter(|p| *p > Decimal::ZERO)?;
    let sign = entry.side.sign();
    let mut remaining = entry.filled_quantity();
    let mut realized = Decimal::ZERO;

    for close in closes
        .iter()
        .filter(|c| c.status == ScheduledOrderStatus::Filled)
    {
        let Some(close_price) = close.avg_price.or(close.price) else {
            continue;
        };
        let quantity = close.filled_quantity().min(remaining);
        realized += (close_price - entry_price) * quantity * sign;
        remaining -= quantity;
    }

    let unrealized = mark_price
        .map(|mark| (mark - entry_price) * remaining * sign)
        .unwrap_or(Decimal::ZERO);

    Some(EntryPnl {
        order_id: entry.id,
        symbol: entry.symbol.clone(),
        realized,
        unrealized,
        open_quantity: remaining,
    })
}

/// 진입별 손익을 요약합니다. 손익 0은 승패에 포함하지 않습니다.
pub fn summarize(entries: &[EntryPnl]) -> PnlSummary {
    let mut summary = PnlSummary::default();
    for entry in entries {
        summary.realized += entry.realized;
        summary.unrealized += entry.unrealized;
        let total = entry.total();
        if total > Decimal::ZERO {
            summary.wins += 1;
        } else if total < Decimal::ZERO {
            summary.losses += 1;
        }
    }
    summary.total = summary.realized + summary.unrealized;
    let decided = summary.wins + summary.losses;
    if decided > 0 {
        summary.win_rate = summary.wins as f64 / decided as f64 * 100.0;
    }
    summary
}

/// 거래소 상태 동기화와 손익 집계.
pub struct Reconciler {
    exchange: Arc<dyn FuturesExchange>,
    store: Arc<dyn Store>,
}

impl Reconciler {
    pub fn new(exchange: Arc<dyn FuturesExchange>, store: Arc<dyn Store>) -> Self {
        Self { exchange, store }
    }

    /// 접수 상태 주문을 거래소 상태로 갱신합니다. 갱신 후 상태를 반환합니다.
    pub async fn sync_order(&self, order: &ScheduledOrder) -> ExecutionResult<ScheduledOrderStatus> {
        if order.status != ScheduledOrderStatus::Success {
            return Ok(order.status);
        }
        let Some(client_id) = order.client_order_id.as_deref() else {
            return Ok(order.status);
        };

        let update = if order.order_type.is_conditional() {
            let status = self.exchange.query_algo_order(&order.symbol, client_id).await?;
            algo_status_update(&status)
        } else {
            let remote = self.exchange.query_order(&order.symbol, client_id).await?;
            let mut update = OrderUpdate::status(ack_status(remote.status));
            if remote.executed_qty > Decimal::ZERO {
                update = update.with_fill(remote.avg_price, remote.executed_qty);
            }
            update
        };

        let fill_changed = update.executed_qty.is_some() && update.executed_qty != order.executed_qty;
        if update.status == order.status && !fill_changed {
            return Ok(order.status);
        }

        let status = update.status;
        self.store.update_order(order.id, update).await?;
        debug!(order_id = order.id, status = %status, "Order synced");
        Ok(status)
    }

    /// 모든 접수 상태 주문을 동기화합니다. 개별 실패는 기록하고 계속합니다.
    pub async fn sync_open_orders(&self) -> ExecutionResult<SyncReport> {
        let orders = self
            .store
            .list_orders_by_status(ScheduledOrderStatus::Success, None)
            .await?;

        let mut report = SyncReport::default();
        for order in &orders {
            report.checked += 1;
            match self.sync_order(order).await {
                Ok(status) if status != order.status => report.changed += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(order_id = order.id, symbol = %order.symbol, error = %e, "Order sync failed");
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }

    /// 브라켓 연결을 거래소 상태와 맞춥니다.
    pub async fn sync_bracket(&self, link: &BracketLink) -> ExecutionResult<BracketStatus> {
        if !link.status.is_open() {
            return Ok(link.status);
        }

        if let Some(entry) = self.store.get_order(link.entry_order_id).await? {
            let unfilled = entry.executed_qty.map_or(true, |q| q.is_zero());
            if entry.status == ScheduledOrderStatus::Canceled && unfilled {
                self.store
                    .update_bracket_status(&link.group_id, BracketStatus::Orphaned)
                    .await?;
                info!(group_id = %link.group_id, "Bracket orphaned, entry canceled before fill");
                return Ok(BracketStatus::Orphaned);
            }
        }

        let legs = link.leg_client_ids();
        let mut all_completed = !legs.is_empty();
        let mut executed = None;
        for client_id in &legs {
            let status = self.exchange.query_algo_order(&link.symbol, client_id).await?;
            if status.is_executed() {
                executed = Some(*client_id);
                break;
            }
            if !status.is_completed_without_fill() {
                all_completed = false;
            }
        }

        if let Some(client_id) = executed {
            if let Some(sibling) = link.sibling_of(client_id) {
                self.cancel_sibling(&link.symbol, sibling).await?;
            }
            self.mark_leg(client_id, ScheduledOrderStatus::Filled, "leg executed")
                .await?;
            self.store
                .update_bracket_status(&link.group_id, BracketStatus::Closed)
                .await?;
            info!(group_id = %link.group_id, leg = client_id, "Bracket closed by executed leg");
            return Ok(BracketStatus::Closed);
        }

        if all_completed {
            for client_id in &legs {
                self.mark_leg(client_id, ScheduledOrderStatus::Canceled, "leg canceled or expired")
                    .await?;
            }
            self.store
                .update_bracket_status(&link.group_id, BracketStatus::Closed)
                .await?;
            return Ok(BracketStatus::Closed);
        }

        Ok(link.status)
    }

    /// 열린 브라켓 연결을 모두 동기화합니다.
    pub async fn sync_brackets(&self) -> ExecutionResult<SyncReport> {
        let links = self.store.list_open_bracket_links().await?;
        let mut report = SyncReport::default();
        for link in &links {
            report.checked += 1;
            match self.sync_bracket(link).await {
                Ok(status) if status != link.status => report.changed += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(group_id = %link.group_id, error = %e, "Bracket sync failed");
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }

    async fn cancel_sibling(&self, symbol: &str, client_id: &str) -> ExecutionResult<()> {
        match self.exchange.cancel_order(symbol, client_id).await {
            Ok(()) => {}
            // 이미 체결/취소된 레그
            Err(e) if e.kind() == RejectionKind::UnknownOrder => {
                debug!(client_id, "Sibling leg already gone");
            }
            Err(e) => return Err(e.into()),
        }
        self.mark_leg(client_id, ScheduledOrderStatus::Canceled, "sibling leg executed")
            .await
    }

    async fn mark_leg(
        &self,
        client_id: &str,
        status: ScheduledOrderStatus,
        reason: &str,
    ) -> ExecutionResult<()> {
        let Some(leg) = self.store.find_order_by_client_id(client_id).await? else {
            return Ok(());
        };
        if leg.status.is_final() {
            return Ok(());
        }
        let mut update = OrderUpdate::status(status).with_result(reason);
        if status == ScheduledOrderStatus::Filled {
            update = update.with_fill(leg.price, leg.quantity);
        }
        self.store.update_order(leg.id, update).await?;
        Ok(())
    }

    /// 주문 목록의 진입 주문별 손익을 요약합니다.
    pub async fn pnl_summary(&self, orders: &[ScheduledOrder]) -> ExecutionResult<PnlSummary> {
        let mut marks: HashMap<String, Option<Decimal>> = HashMap::new();
        let mut overall_closes: HashMap<(i64, String), Vec<ScheduledOrder>> = HashMap::new();
        let mut entries = Vec::new();

        for entry in orders.iter().filter(|o| is_filled_entry(o)) {
            if !marks.contains_key(&entry.symbol) {
                let mark = match self.exchange.get_mark_price(&entry.symbol).await {
                    Ok(price) => Some(price),
                    Err(e) => {
                        warn!(symbol = %entry.symbol, error = %e, "Mark price unavailable, unrealized PnL skipped");
                        None
                    }
                };
                marks.insert(entry.symbol.clone(), mark);
            }
            let mark = marks.get(&entry.symbol).copied().flatten();

            let mut closes = self.store.list_child_orders(entry.id).await?;
            if let Some(strategy_id) = entry.strategy_id {
                let key = (strategy_id, entry.symbol.clone());
                if !overall_closes.contains_key(&key) {
                    let candidates = self
                        .store
                        .list_strategy_orders(strategy_id, Some(&entry.symbol))
                        .await?
                        .into_iter()
                        .filter(|o| o.purpose == OrderPurpose::OverallClose)
                        .collect();
                    overall_closes.insert(key.clone(), candidates);
                }
                let overall = overall_closes
                    .get(&key)
                    .and_then(|candidates| overall_close_for(entry, candidates));
                if let Some(close) = overall {
                    closes.push(close.clone());
                }
            }

            if let Some(pnl) = entry_pnl(entry, &closes, mark) {
                entries.push(pnl);
            }
        }

        Ok(summarize(&entries))
    }

    /// 실행 기록에 속한 주문의 손익 요약.
    pub async fn execution_pnl(&self, execution_id: i64) -> ExecutionResult<PnlSummary> {
        let orders = self.store.list_orders_by_execution(execution_id).await?;
        self.pnl_summary(&orders).await
    }

    /// 전략의 전체 손익 요약 (수동 주문 제외).
    pub async fn strategy_pnl(&self, strategy_id: i64) -> ExecutionResult<PnlSummary> {
        let orders: Vec<ScheduledOrder> = self
            .store
            .list_strategy_orders(strategy_id, None)
            .await?
            .into_iter()
            .filter(|o| o.purpose != OrderPurpose::Manual)
            .collect();
        self.pnl_summary(&orders).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use trader_core::{BracketSpec, OrderKind, OrderSide, WorkingType};

    fn order(id: i64, side: OrderSide, qty: Decimal, avg: Option<Decimal>) -> ScheduledOrder {
        let now = Utc::now();
        ScheduledOrder {
            id,
            strategy_id: Some(1),
            execution_id: Some(1),
            symbol: "BTCUSDT".to_string(),
            side,
            order_type: OrderKind::Market,
            quantity: qty,
            price: None,
            leverage: 10,
            reduce_only: false,
            bracket: BracketSpec::disabled(),
            working_type: WorkingType::MarkPrice,
            purpose: OrderPurpose::Entry,
            trigger_time: now,
            status: ScheduledOrderStatus::Filled,
            exchange_order_id: None,
            client_order_id: None,
            parent_order_id: None,
            close_order_ids: vec![],
            avg_price: avg,
            executed_qty: Some(qty),
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_realized_and_unrealized() {
        let entry = order(1, OrderSide::Buy, dec!(2), Some(dec!(100)));
        let mut tp = order(2, OrderSide::Sell, dec!(1), Some(dec!(110)));
        tp.reduce_only = true;
        tp.parent_order_id = Some(1);

        let pnl = entry_pnl(&entry, &[tp], Some(dec!(95))).unwrap();
        assert_eq!(pnl.realized, dec!(10));
        assert_eq!(pnl.unrealized, dec!(-5));
        assert_eq!(pnl.open_quantity, dec!(1));
        assert_eq!(pnl.total(), dec!(5));
    }

    #[test]
    fn test_short_direction() {
        let entry = order(1, OrderSide::Sell, dec!(1), Some(dec!(100)));
        let pnl = entry_pnl(&entry, &[], Some(dec!(90))).unwrap();
        assert_eq!(pnl.unrealized, dec!(10));
    }

    #[test]
    fn test_unfilled_close_ignored_and_missing_price() {
        let entry = order(1, OrderSide::Buy, dec!(1), Some(dec!(100)));
        let mut sl = order(2, OrderSide::Sell, dec!(1), Some(dec!(90)));
        sl.status = ScheduledOrderStatus::Success;
        let pnl = entry_pnl(&entry, &[sl], None).unwrap();
        assert_eq!(pnl.realized, Decimal::ZERO);
        assert_eq!(pnl.open_quantity, dec!(1));

        let no_price = order(3, OrderSide::Buy, dec!(1), None);
        assert!(entry_pnl(&no_price, &[], Some(dec!(1))).is_none());
    }

    #[test]
    fn test_overall_close_settles_earlier_entries() {
        let first = order(1, OrderSide::Buy, dec!(1), Some(dec!(100)));
        let scale_in = order(2, OrderSide::Buy, dec!(0.5), Some(dec!(120)));
        let mut close = order(3, OrderSide::Sell, dec!(1.5), Some(dec!(150)));
        close.reduce_only = true;
        close.purpose = OrderPurpose::OverallClose;
        let later = order(4, OrderSide::Buy, dec!(1), Some(dec!(150)));

        let candidates = vec![close.clone()];
        assert_eq!(overall_close_for(&first, &candidates).map(|c| c.id), Some(3));
        assert!(overall_close_for(&later, &candidates).is_none());

        let pnl = entry_pnl(&first, &[close.clone()], Some(dec!(200))).unwrap();
        assert_eq!(pnl.realized, dec!(50));
        assert_eq!(pnl.unrealized, Decimal::ZERO);
        assert_eq!(pnl.open_quantity, Decimal::ZERO);

        let pnl = entry_pnl(&scale_in, &[close.clone()], Some(dec!(200))).unwrap();
        assert_eq!(pnl.realized, dec!(15));

        let mut pending = close;
        pending.status = ScheduledOrderStatus::Pending;
        assert!(overall_close_for(&first, &[pending]).is_none());
    }

    #[test]
    fn test_summary_win_rate() {
        let pnl = |id, realized| EntryPnl {
            order_id: id,
            symbol: "BTCUSDT".to_string(),
            realized,
            unrealized: Decimal::ZERO,
            open_quantity: Decimal::ZERO,
        };
        let summary = summarize(&[pnl(1, dec!(10)), pnl(2, dec!(-4)), pnl(3, dec!(6)), pnl(4, dec!(0))]);
        assert_eq!(summary.total, dec!(12));
        assert_eq!(summary.wins, 2);
        assert_eq!(summary.losses, 1);
        assert!((summary.win_rate - 200.0 / 3.0).abs() < 1e-9);

        assert_eq!(summarize(&[]).win_rate, 0.0);
    }

    #[test]
    fn test_is_filled_entry() {
        let entry = order(1, OrderSide::Buy, dec!(1), Some(dec!(100)));
        assert!(is_filled_entry(&entry));

        let mut close = entry.clone();
        close.reduce_only = true;
        assert!(!is_filled_entry(&close));

        let mut pending = entry.clone();
        pending.status = ScheduledOrderStatus::Pending;
        assert!(!is_filled_entry(&pending));
    }
}

//! 수익 기반 추가 진입과 전체 청산.
//!
//! 전략의 체결된 진입 주문이 있는 심볼마다 실제 거래소 포지션을 확인하고,
//! 레버리지 반영 수익률로 다음 중 하나를 결정합니다:
//! 1. 전체 손절/익절 도달 → 포지션 전량 reduce-only 청산, 추가 진입 횟수 초기화
//! 2. 수익률 ≥ 기준, 횟수 < 최대, 대기 중인 추가 진입 없음 → 추가 진입 1건
//!
//! 최근 청산 주문이 실제로 체결된 심볼은 건너뜁니다. 대기 중인 TP/SL 레그는 청산으로 보지 않습니다.
//! 전체 청산을 예약하면 그 심볼의 열린 브라켓 레그를 취소하고 연결을 종료합니다.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use trader_core::{
    BracketStatus, ExchangePosition, NewScheduledOrder, OrderPurpose, OrderUpdate,
    ScheduledOrder, ScheduledOrderStatus, ScalingSettings, Strategy,
};
use trader_data::Store;
use trader_exchange::{FuturesExchange, RejectionKind};
use trader_risk::PositionSizer;

use crate::error::ExecutionResult;

/// 심볼별 스케일링 평가 결과.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalingAction {
    /// 전체 청산 주문 생성
    OverallClose { order_id: i64, profit_pct: Decimal },
    /// 추가 진입 주문 생성
    ScaleIn { order_id: i64, profit_pct: Decimal, count: u32 },
    /// 조건 미충족
    NoAction { profit_pct: Decimal },
    Skipped(String),
}

/// 수익률로 취할 행동 (주문 생성 전 판단).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingDecision {
    OverallClose,
    ScaleIn,
    Hold,
}

/// 레버리지 반영 수익률로 행동을 결정합니다.
///
/// 전체 손절이 전체 익절보다, 둘 다 추가 진입보다 우선합니다.
pub fn decide_scaling(settings: &ScalingSettings, profit_pct: Decimal, scale_in_count: u32) -> ScalingDecision {
    if settings.overall_sl_pct.is_some_and(|sl| profit_pct <= -sl) {
        return ScalingDecision::OverallClose;
    }
    if settings.overall_tp_pct.is_some_and(|tp| profit_pct >= tp) {
        return ScalingDecision::OverallClose;
    }
    if profit_pct >= settings.profit_threshold_pct && scale_in_count < settings.max_scale_ins {
        return ScalingDecision::ScaleIn;
    }
    ScalingDecision::Hold
}

/// 실제로 체결된 청산 주문인지 확인합니다.
///
/// 브라켓 레그는 제출 시 `success`로 기록되므로 `filled`만 청산으로 봅니다.
fn is_executed_close(order: &ScheduledOrder) -> bool {
    order.status == ScheduledOrderStatus::Filled
        && (order.reduce_only || order.purpose.is_closing())
}

/// 수익 기반 추가 진입/전체 청산 관리자.
pub struct ProfitScalingManager {
    exchange: Arc<dyn FuturesExchange>,
    store: Arc<dyn Store>,
    sizer: PositionSizer,
}

impl ProfitScalingManager {
    pub fn new(exchange: Arc<dyn FuturesExchange>, store: Arc<dyn Store>, sizer: PositionSizer) -> Self {
        Self {
            exchange,
            store,
            sizer,
        }
    }

    /// 전략의 모든 보유 심볼을 평가합니다. 스케일링이 꺼져 있으면 빈 목록.
    pub async fn evaluate_strategy(
        &self,
        strategy: &Strategy,
        execution_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> ExecutionResult<Vec<(String, ScalingAction)>> {
        if !strategy.scaling.enabled {
            return Ok(Vec::new());
        }

        let orders = self.store.list_strategy_orders(strategy.id, None).await?;
        let symbols: BTreeSet<&str> = orders
            .iter()
            .filter(|o| o.status == ScheduledOrderStatus::Filled && !o.reduce_only)
            .map(|o| o.symbol.as_str())
            .collect();

        let mut actions = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let symbol_orders: Vec<&ScheduledOrder> =
                orders.iter().filter(|o| o.symbol == symbol).collect();
            let action = self
                .evaluate_symbol(strategy, execution_id, symbol, &symbol_orders, now)
                .await?;
            debug!(strategy_id = strategy.id, symbol, action = ?action, "Scaling evaluated");
            actions.push((symbol.to_string(), action));
        }
        Ok(actions)
    }

    async fn evaluate_symbol(
        &self,
        strategy: &Strategy,
        execution_id: Option<i64>,
        symbol: &str,
        orders: &[&ScheduledOrder],
        now: DateTime<Utc>,
    ) -> ExecutionResult<ScalingAction> {
        let settings = &strategy.scaling;

        let Some(position) = self.exchange.get_position(symbol).await? else {
            return Ok(ScalingAction::Skipped("no exchange position".to_string()));
        };

        let window_start = now - settings.recent_close_window();
        let recently_closed = orders
            .iter()
            .any(|o| is_executed_close(o) && o.updated_at >= window_start);
        if recently_closed {
            return Ok(ScalingAction::Skipped("closed recently".to_string()));
        }

        let count = self.store.get_scale_in_count(strategy.id, symbol).await?;
        let profit_pct = position.leveraged_profit_pct();

        match decide_scaling(settings, profit_pct, count) {
            ScalingDecision::OverallClose => {
                let order_id = self
                    .enqueue_overall_close(strategy, execution_id, &position)
                    .await?;
                self.store.set_scale_in_count(strategy.id, symbol, 0).await?;
                let released = self.release_brackets(symbol).await?;
                info!(
                    strategy_id = strategy.id,
                    symbol,
                    profit_pct = %profit_pct,
                    order_id,
                    released,
                    "Overall close queued"
                );
                Ok(ScalingAction::OverallClose { order_id, profit_pct })
            }
            ScalingDecision::ScaleIn => {
                let pending_scale_in = orders.iter().any(|o| {
                    o.purpose == OrderPurpose::ScaleIn
                        && matches!(
                            o.status,
                            ScheduledOrderStatus::Pending | ScheduledOrderStatus::Processing
                        )
                });
                if pending_scale_in {
                    return Ok(ScalingAction::Skipped("scale-in already pending".to_string()));
                }

                let order_id = self
                    .enqueue_scale_in(strategy, execution_id, &position)
                    .await?;
                let count = count + 1;
                self.store.set_scale_in_count(strategy.id, symbol, count).await?;
                info!(
                    strategy_id = strategy.id,
                    symbol,
                    profit_pct = %profit_pct,
                    count,
                    order_id,
                    "Scale-in queued"
                );
                Ok(ScalingAction::ScaleIn {
                    order_id,
                    profit_pct,
                    count,
                })
            }
            ScalingDecision::Hold if count >= settings.max_scale_ins
                && profit_pct >= settings.profit_threshold_pct =>
            {
                Ok(ScalingAction::Skipped("max scale-ins reached".to_string()))
            }
            ScalingDecision::Hold => Ok(ScalingAction::NoAction { profit_pct }),
        }
    }

    async fn enqueue_overall_close(
        &self,
        strategy: &Strategy,
        execution_id: Option<i64>,
        position: &ExchangePosition,
    ) -> ExecutionResult<i64> {
        let Some(side) = position.side() else {
            return Err(crate::error::ExecutionError::InvalidOrder(format!(
                "{}: flat position cannot be closed",
                position.symbol
            )));
        };
        let new = NewScheduledOrder::close_position(&position.symbol, side.opposite(), position.abs_quantity())
            .with_strategy(strategy.id, execution_id)
            .with_leverage(position.leverage)
            .with_working_type(strategy.risk.working_type);
        Ok(self.store.create_order(new).await?.id)
    }

    /// 심볼의 열린 브라켓 레그를 취소하고 연결을 종료합니다. 종료한 연결 수를 반환합니다.
    ///
    /// 취소에 실패한 레그가 있는 연결은 열린 상태로 남깁니다.
    async fn release_brackets(&self, symbol: &str) -> ExecutionResult<usize> {
        let links = self.store.list_open_bracket_links().await?;
        let mut closed = 0;

        for link in links.iter().filter(|l| l.symbol == symbol) {
            let mut all_released = true;
            for client_id in link.leg_client_ids() {
                match self.exchange.cancel_order(symbol, client_id).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == RejectionKind::UnknownOrder => {
                        debug!(client_id, "Bracket leg already gone");
                    }
                    Err(e) => {
                        warn!(group_id = %link.group_id, client_id, error = %e, "Failed to cancel bracket leg");
                        all_released = false;
                        continue;
                    }
                }

                if let Some(leg) = self.store.find_order_by_client_id(client_id).await? {
                    if !leg.status.is_final() {
                        let update = OrderUpdate::status(ScheduledOrderStatus::Canceled)
                            .with_result("canceled by overall close");
                        self.store.update_order(leg.id, update).await?;
                    }
                }
            }

            if all_released {
                self.store
                    .update_bracket_status(&link.group_id, BracketStatus::Closed)
                    .await?;
                closed += 1;
            }
        }
        Ok(closed)
    }

    async fn enqueue_scale_in(
        &self,
        strategy: &Strategy,
        execution_id: Option<i64>,
        position: &ExchangePosition,
    ) -> ExecutionResult<i64> {
        let Some(side) = position.side() else {
            return Err(crate::error::ExecutionError::InvalidOrder(format!(
                "{}: flat position cannot be scaled",
                position.symbol
            )));
        };
        let quantity = self.sizer.quantity_for_margin(
            &position.symbol,
            strategy.scaling.scale_in_margin,
            position.leverage,
            Some(position.mark_price),
        );
        let new = NewScheduledOrder::market(&position.symbol, side, quantity)
            .with_purpose(OrderPurpose::ScaleIn)
            .with_strategy(strategy.id, execution_id)
            .with_leverage(position.leverage)
            .with_working_type(strategy.risk.working_type);
        Ok(self.store.create_order(new).await?.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trader_core::{OrderKind, OrderSide};

    fn settings() -> ScalingSettings {
        ScalingSettings {
            enabled: true,
            profit_threshold_pct: dec!(10),
            max_scale_ins: 2,
            scale_in_margin: dec!(10),
            overall_tp_pct: Some(dec!(50)),
            overall_sl_pct: Some(dec!(30)),
            recent_close_window_secs: 300,
        }
    }

    #[test]
    fn test_decide_scaling() {
        let s = settings();
        assert_eq!(decide_scaling(&s, dec!(-30), 0), ScalingDecision::OverallClose);
        assert_eq!(decide_scaling(&s, dec!(55), 0), ScalingDecision::OverallClose);
        assert_eq!(decide_scaling(&s, dec!(12), 1), ScalingDecision::ScaleIn);
        assert_eq!(decide_scaling(&s, dec!(12), 2), ScalingDecision::Hold);
        assert_eq!(decide_scaling(&s, dec!(5), 0), ScalingDecision::Hold);
    }

    #[test]
    fn test_resting_leg_is_not_executed_close() {
        let now = Utc::now();
        let leg = NewScheduledOrder::market("BTCUSDT", OrderSide::Sell, dec!(1))
            .submitted_leg(1, OrderKind::StopMarket, dec!(90), "sl".to_string());
        let mut order = ScheduledOrder {
            id: 2,
            strategy_id: Some(1),
            execution_id: None,
            symbol: leg.symbol,
            side: leg.side,
            order_type: leg.order_type,
            quantity: leg.quantity,
            price: leg.price,
            leverage: 1,
            reduce_only: leg.reduce_only,
            bracket: leg.bracket,
            working_type: leg.working_type,
            purpose: leg.purpose,
            trigger_time: now,
            status: leg.initial_status,
            exchange_order_id: None,
            client_order_id: leg.client_order_id,
            parent_order_id: leg.parent_order_id,
            close_order_ids: vec![],
            avg_price: None,
            executed_qty: None,
            result: None,
            created_at: now,
            updated_at: now,
        };
        assert!(!is_executed_close(&order));

        order.status = ScheduledOrderStatus::Filled;
        assert!(is_executed_close(&order));
    }

    #[test]
    fn test_no_overall_limits() {
        let s = ScalingSettings {
            overall_tp_pct: None,
            overall_sl_pct: None,
            ..settings()
        };
        assert_eq!(decide_scaling(&s, dec!(-90), 0), ScalingDecision::Hold);
        assert_eq!(decide_scaling(&s, dec!(90), 0), ScalingDecision::ScaleIn);
    }
}

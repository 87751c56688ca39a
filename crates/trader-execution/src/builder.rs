//! 전략 결정으로부터 예약 주문 생성.

use std::sync::Arc;
use tracing::{debug, info};
use trader_core::{
    BracketSpec, MarketSnapshot, NewScheduledOrder, RiskSettings, ScheduledOrder, Strategy,
    StrategyDecision,
};
use trader_data::Store;
use trader_risk::PositionSizer;

use crate::error::ExecutionResult;
use crate::margin_mode::MarginModeManager;
use crate::tasks::BackgroundTasks;

/// 위험 설정의 TP/SL 방식을 브라켓으로 변환합니다. 증거금 기준이 가격 기준보다 우선합니다.
pub fn bracket_from_risk(risk: &RiskSettings) -> BracketSpec {
    if risk.margin_tp_sl_enabled {
        BracketSpec::margin_return(risk.margin_tp_percent, risk.margin_sl_percent)
    } else if risk.price_tp_sl_enabled {
        BracketSpec::price_percent(risk.tp_percent, risk.sl_percent)
    } else {
        BracketSpec::disabled()
    }
}

/// 결정 → 예약 주문 변환기.
pub struct OrderBuilder {
    store: Arc<dyn Store>,
    sizer: PositionSizer,
    margin: Arc<MarginModeManager>,
    tasks: BackgroundTasks,
}

impl OrderBuilder {
    pub fn new(
        store: Arc<dyn Store>,
        sizer: PositionSizer,
        margin: Arc<MarginModeManager>,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            store,
            sizer,
            margin,
            tasks,
        }
    }

    /// 저장할 주문을 구성합니다. `cover`와 `hold`는 None.
    pub fn plan(
        &self,
        strategy: &Strategy,
        execution_id: Option<i64>,
        decision: &StrategyDecision,
        snapshot: &MarketSnapshot,
    ) -> Option<NewScheduledOrder> {
        let side = decision.action.order_side()?;
        let risk = &strategy.risk;
        let leverage = PositionSizer::leverage_for(risk, decision.confidence);
        let quantity = self.sizer.quantity_for_margin(
            &snapshot.symbol,
            risk.margin_per_order,
            leverage,
            snapshot.mark_price,
        );

        Some(
            NewScheduledOrder::market(&snapshot.symbol, side, quantity)
                .with_strategy(strategy.id, execution_id)
                .with_leverage(leverage)
                .with_bracket(bracket_from_risk(risk))
                .with_working_type(risk.working_type),
        )
    }

    /// 결정을 주문으로 저장합니다.
    ///
    /// 증거금 모드는 백그라운드 작업으로 적용하며, 그 실패가 주문 생성을 막지 않습니다.
    pub async fn build_and_insert(
        &self,
        strategy: &Strategy,
        execution_id: Option<i64>,
        decision: &StrategyDecision,
        snapshot: &MarketSnapshot,
    ) -> ExecutionResult<Option<ScheduledOrder>> {
        let Some(new) = self.plan(strategy, execution_id, decision, snapshot) else {
            debug!(symbol = %snapshot.symbol, action = %decision.action, "Decision creates no order");
            return Ok(None);
        };

        let margin = self.margin.clone();
        let symbol = new.symbol.clone();
        let mode = strategy.risk.margin_mode;
        self.tasks.spawn(format!("margin-mode:{symbol}"), async move {
            let outcome = margin.ensure(&symbol, mode).await?;
            debug!(symbol = %symbol, outcome = ?outcome, "Margin mode applied");
            Ok::<(), crate::error::ExecutionError>(())
        });

        let order = self.store.create_order(new).await?;
        info!(
            order_id = order.id,
            symbol = %order.symbol,
            side = %order.side,
            quantity = %order.quantity,
            leverage = order.leverage,
            strategy_id = strategy.id,
            "Scheduled order created from decision"
        );
        Ok(Some(order))
    }
}

//! 예약 주문 실행 엔진.
//!
//! 제공 기능:
//! - 일반 주문: 사전 점검(심볼, 레버리지, 필터, 증거금) 후 제출
//! - 브라켓 주문: 진입 후 TP/SL 조건부 청산 레그 등록, 연결 기록
//! - 조건부 주문: 기존 레그 상태 조회 또는 신규 제출
//! - 정밀도 거부 시 단계별 재시도 체인
//! - 진입 주문 취소와 브라켓 연결 정리

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use trader_core::{
    order_span, BracketLink, BracketStatus, ExecutionSettings, NewScheduledOrder, OrderKind,
    OrderUpdate, ScheduledOrder, ScheduledOrderStatus, SymbolFilters, WorkingType,
};
use trader_data::Store;
use trader_exchange::{
    AlgoOrderStatus, ConditionalCloseRequest, ExchangeOrderStatus, FuturesExchange, OrderAck,
    PlaceOrderRequest,
};
use trader_risk::{BracketTargets, MarginRiskCalculator};

use crate::client_id::ClientIdGenerator;
use crate::error::{ExecutionError, ExecutionResult};
use crate::precision::{
    coarser_price, quantize_price, sanitize_filters, AdjustRequest, AdjustedOrder,
    PrecisionAdjuster,
};

// ==================== 제출 단위 ====================

/// 거래소로 보내는 요청.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Order(PlaceOrderRequest),
    Conditional(ConditionalCloseRequest),
}

impl Submission {
    pub fn symbol(&self) -> &str {
        match self {
            Submission::Order(r) => &r.symbol,
            Submission::Conditional(r) => &r.symbol,
        }
    }

    pub fn client_order_id(&self) -> &str {
        match self {
            Submission::Order(r) => &r.client_order_id,
            Submission::Conditional(r) => &r.client_order_id,
        }
    }

    pub fn quantity(&self) -> Decimal {
        match self {
            Submission::Order(r) => r.quantity,
            Submission::Conditional(r) => r.quantity,
        }
    }

    /// 지정가 또는 트리거 가격.
    pub fn price(&self) -> Option<Decimal> {
        match self {
            Submission::Order(r) => r.price,
            Submission::Conditional(r) => Some(r.stop_price),
        }
    }

    pub fn working_type(&self) -> WorkingType {
        match self {
            Submission::Order(r) => r.working_type,
            Submission::Conditional(r) => r.working_type,
        }
    }

    pub fn reduce_only(&self) -> bool {
        match self {
            Submission::Order(r) => r.reduce_only,
            Submission::Conditional(_) => true,
        }
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self, Submission::Conditional(_))
    }

    fn with_client_order_id(mut self, client_order_id: String) -> Self {
        match &mut self {
            Submission::Order(r) => r.client_order_id = client_order_id,
            Submission::Conditional(r) => r.client_order_id = client_order_id,
        }
        self
    }

    fn with_quantity_and_price(mut self, quantity: Decimal, price: Option<Decimal>) -> Self {
        match &mut self {
            Submission::Order(r) => {
                r.quantity = quantity;
                if r.price.is_some() {
                    r.price = price;
                }
            }
            Submission::Conditional(r) => {
                r.quantity = quantity;
                if let Some(price) = price {
                    r.stop_price = price;
                }
            }
        }
        self
    }

    fn with_working_type(mut self, working_type: WorkingType) -> Self {
        match &mut self {
            Submission::Order(r) => r.working_type = working_type,
            Submission::Conditional(r) => r.working_type = working_type,
        }
        self
    }
}

/// 정밀도 거부 시 재시도 단계.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    /// 필터를 새로 받아 수량을 step 자릿수로 절삭
    RefreshFilters,
    /// 한 자리 거친 호가 단위 (가격 없는 주문은 건너뜀)
    CoarserPrice,
    /// 트리거 기준 가격 전환 (조건부 주문만)
    ToggleWorkingType,
}

impl RetryStep {
    pub const CHAIN: [RetryStep; 3] = [
        RetryStep::RefreshFilters,
        RetryStep::CoarserPrice,
        RetryStep::ToggleWorkingType,
    ];

    /// client id 접미사.
    pub fn suffix(&self) -> &'static str {
        match self {
            RetryStep::RefreshFilters => "r1",
            RetryStep::CoarserPrice => "r2",
            RetryStep::ToggleWorkingType => "r3",
        }
    }
}

/// 거래소 주문 상태를 예약 주문 상태로 변환합니다.
pub fn ack_status(status: ExchangeOrderStatus) -> ScheduledOrderStatus {
    match status {
        ExchangeOrderStatus::Filled => ScheduledOrderStatus::Filled,
        ExchangeOrderStatus::New | ExchangeOrderStatus::PartiallyFilled => {
            ScheduledOrderStatus::Success
        }
        ExchangeOrderStatus::Canceled | ExchangeOrderStatus::Expired => {
            ScheduledOrderStatus::Canceled
        }
        ExchangeOrderStatus::Rejected => ScheduledOrderStatus::Failed,
    }
}

/// 조건부 주문 상태를 예약 주문 갱신으로 변환합니다.
///
/// 취소/만료는 생명주기가 끝난 것으로 보고 `canceled`, 알 수 없는 상태는 `failed`.
pub fn algo_status_update(status: &AlgoOrderStatus) -> OrderUpdate {
    match status {
        AlgoOrderStatus::New | AlgoOrderStatus::Working => {
            OrderUpdate::status(ScheduledOrderStatus::Success)
        }
        AlgoOrderStatus::Executed | AlgoOrderStatus::Finished => {
            OrderUpdate::status(ScheduledOrderStatus::Filled)
        }
        AlgoOrderStatus::Canceled | AlgoOrderStatus::Expired => {
            OrderUpdate::status(ScheduledOrderStatus::Canceled)
                .with_result(format!("conditional order completed: {status}"))
        }
        AlgoOrderStatus::Other(s) => OrderUpdate::failed(format!("unexpected conditional status: {s}")),
    }
}

fn ack_update(submitted: &Submission, ack: &OrderAck) -> OrderUpdate {
    let status = ack_status(ack.status);
    let mut update = OrderUpdate::status(status)
        .with_exchange_ids(ack.exchange_order_id.clone(), ack.client_order_id.clone())
        .with_quantity(submitted.quantity());
    if ack.executed_qty > Decimal::ZERO {
        update = update.with_fill(ack.avg_price, ack.executed_qty);
    }
    if status == ScheduledOrderStatus::Failed {
        update = update.with_result("rejected by exchange");
    }
    update
}

fn retry_suffix(leg: Option<&str>, step: RetryStep) -> String {
    match leg {
        Some(leg) => format!("{leg}-{}", step.suffix()),
        None => step.suffix().to_string(),
    }
}

/// 사전 점검을 통과한 주문.
struct Prepared {
    filters: SymbolFilters,
    adjusted: AdjustedOrder,
}

/// 등록된 브라켓 레그.
struct PlacedLeg {
    client_id: String,
    row_id: Option<i64>,
}

// ==================== OrderExecutor ====================

/// 예약 주문 실행기.
pub struct OrderExecutor {
    exchange: Arc<dyn FuturesExchange>,
    store: Arc<dyn Store>,
    adjuster: PrecisionAdjuster,
    client_ids: ClientIdGenerator,
    risk: MarginRiskCalculator,
    settings: ExecutionSettings,
    cancel: CancellationToken,
}

impl OrderExecutor {
    pub fn new(
        exchange: Arc<dyn FuturesExchange>,
        store: Arc<dyn Store>,
        settings: ExecutionSettings,
    ) -> ExecutionResult<Self> {
        let risk = MarginRiskCalculator::new(settings.fee_rate)?;
        Ok(Self {
            adjuster: PrecisionAdjuster::new(exchange.clone(), store.clone(), settings.clone()),
            client_ids: ClientIdGenerator::new(&settings.client_id_prefix),
            exchange,
            store,
            risk,
            settings,
            cancel: CancellationToken::new(),
        })
    }

    /// 종료 토큰을 연결합니다. 취소되면 대기 중인 조건부 제출이 중단됩니다.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    pub fn adjuster(&self) -> &PrecisionAdjuster {
        &self.adjuster
    }

    /// 처리 중(`processing`) 주문을 실행하고 결과를 저장합니다.
    ///
    /// 주문 단위 실패는 `failed`와 사유로 기록되며 에러로 전파되지 않습니다.
    /// 저장 실패만 에러로 반환합니다.
    pub async fn execute(&self, order: &ScheduledOrder) -> ExecutionResult<ScheduledOrderStatus> {
        let span = order_span!("execute_order", order.id, order.symbol, order.strategy_id);
        self.execute_and_record(order).instrument(span).await
    }

    async fn execute_and_record(&self, order: &ScheduledOrder) -> ExecutionResult<ScheduledOrderStatus> {
        let outcome = if order.order_type.is_conditional() {
            self.execute_conditional(order).await
        } else if order.is_bracket() {
            self.execute_bracket(order).await
        } else {
            self.execute_regular(order).await
        };

        let update = match outcome {
            Ok(update) => update,
            Err(e) => {
                warn!(error = %e, "Order execution failed");
                OrderUpdate::failed(e.order_reason())
            }
        };
        let status = update.status;
        self.store.update_order(order.id, update).await?;
        info!(status = %status, "Order processed");
        Ok(status)
    }

    // ==================== 경로별 실행 ====================

    async fn execute_regular(&self, order: &ScheduledOrder) -> ExecutionResult<OrderUpdate> {
        let prepared = self.prepare(order).await?;
        let request = self.order_request(order, &prepared.adjusted);
        let (submitted, ack) = self
            .place_with_retries(order.id, Submission::Order(request), None)
            .await?;

        let mut update = ack_update(&submitted, &ack);
        if prepared.adjusted.bumped && update.result.is_none() {
            update = update.with_result(format!(
                "quantity raised to {} to meet min notional",
                submitted.quantity()
            ));
        }
        Ok(update)
    }

    async fn execute_bracket(&self, order: &ScheduledOrder) -> ExecutionResult<OrderUpdate> {
        let prepared = self.prepare(order).await?;
        let request = self.order_request(order, &prepared.adjusted);
        let (submitted, ack) = self
            .place_with_retries(order.id, Submission::Order(request), None)
            .await?;

        let update = ack_update(&submitted, &ack);
        if matches!(
            update.status,
            ScheduledOrderStatus::Failed | ScheduledOrderStatus::Canceled
        ) {
            return Ok(update);
        }

        let entry_price = ack
            .avg_price
            .filter(|p| *p > Decimal::ZERO)
            .unwrap_or(prepared.adjusted.reference_price);
        let quantity = if ack.executed_qty > Decimal::ZERO {
            ack.executed_qty
        } else {
            submitted.quantity()
        };

        let targets = match self
            .risk
            .targets_for(order.side, entry_price, order.leverage, &order.bracket)
        {
            Ok(targets) => targets.map(|p| quantize_price(&prepared.filters, p)),
            Err(e) => {
                warn!(error = %e, "Bracket targets unavailable");
                BracketTargets::default()
            }
        };
        if targets.is_empty() {
            return Ok(update.with_result("bracket requested without targets"));
        }

        let (tp, sl) = match targets.validate(order.side, entry_price) {
            Ok(()) => {
                let tp = match targets.take_profit {
                    Some(price) => self
                        .place_leg(order, OrderKind::TakeProfitMarket, price, quantity, "tp")
                        .await,
                    None => None,
                };
                let sl = match targets.stop_loss {
                    Some(price) => self
                        .place_leg(order, OrderKind::StopMarket, price, quantity, "sl")
                        .await,
                    None => None,
                };
                (tp, sl)
            }
            Err(e) => {
                warn!(entry = %entry_price, error = %e, "Bracket targets out of order");
                (None, None)
            }
        };

        if tp.is_none() && sl.is_none() {
            let reason = self.emergency_close(order, &submitted, quantity).await;
            let mut failed = OrderUpdate::failed(reason)
                .with_exchange_ids(ack.exchange_order_id.clone(), ack.client_order_id.clone())
                .with_quantity(submitted.quantity());
            if ack.executed_qty > Decimal::ZERO {
                failed = failed.with_fill(ack.avg_price, ack.executed_qty);
            }
            return Ok(failed);
        }

        let close_ids: Vec<i64> = tp.iter().chain(sl.iter()).filter_map(|l| l.row_id).collect();
        let link = BracketLink::new(
            self.client_ids.group_id(order.id),
            &order.symbol,
            order.id,
            ack.client_order_id.clone(),
            tp.as_ref().map(|l| l.client_id.clone()),
            sl.as_ref().map(|l| l.client_id.clone()),
        );
        let link_status = link.status;
        if let Err(e) = self.store.create_bracket_link(link).await {
            error!(error = %e, "Failed to record bracket link");
        }

        info!(
            entry = %entry_price,
            take_profit = ?targets.take_profit,
            stop_loss = ?targets.stop_loss,
            status = %link_status,
            "Bracket registered"
        );

        let mut update = update.with_close_orders(close_ids);
        if link_status == BracketStatus::Partial {
            let missing = if tp.is_none() { "take-profit" } else { "stop-loss" };
            update = update.with_result(format!("bracket partial: {missing} leg failed"));
        }
        Ok(update)
    }

    async fn execute_conditional(&self, order: &ScheduledOrder) -> ExecutionResult<OrderUpdate> {
        if let Some(client_id) = order.client_order_id.as_deref() {
            let status = self.exchange.query_algo_order(&order.symbol, client_id).await?;
            debug!(client_id, status = %status, "Conditional order status");
            return Ok(algo_status_update(&status));
        }

        let stop_price = order.price.ok_or_else(|| {
            ExecutionError::InvalidOrder("conditional order without trigger price".to_string())
        })?;
        let mark = self.exchange.get_mark_price(&order.symbol).await?;
        let (_, adjusted) = self
            .adjuster
            .adjust(
                &order.symbol,
                AdjustRequest {
                    quantity: order.quantity,
                    price: Some(stop_price),
                    reference_price: mark,
                    reduce_only: true,
                },
                false,
            )
            .await?;

        let request = ConditionalCloseRequest {
            symbol: order.symbol.clone(),
            side: order.side,
            kind: order.order_type,
            quantity: adjusted.quantity,
            stop_price: adjusted.price.unwrap_or(stop_price),
            working_type: order.working_type,
            client_order_id: self.client_ids.generate(order.id, None),
        };
        let (submitted, ack) = self
            .place_with_retries(order.id, Submission::Conditional(request), None)
            .await?;

        Ok(OrderUpdate::status(ScheduledOrderStatus::Success)
            .with_exchange_ids(ack.exchange_order_id, ack.client_order_id)
            .with_quantity(submitted.quantity()))
    }

    // ==================== 사전 점검 ====================

    async fn prepare(&self, order: &ScheduledOrder) -> ExecutionResult<Prepared> {
        if !self.exchange.is_symbol_supported(&order.symbol).await? {
            return Err(ExecutionError::UnsupportedSymbol(order.symbol.clone()));
        }

        if !order.reduce_only {
            if let Err(e) = self.exchange.set_leverage(&order.symbol, order.leverage).await {
                warn!(leverage = order.leverage, error = %e, "Failed to set leverage");
            }
        }

        let limit_price = if order.order_type.requires_price() {
            Some(order.price.filter(|p| *p > Decimal::ZERO).ok_or_else(|| {
                ExecutionError::InvalidOrder(format!("{} order without price", order.order_type))
            })?)
        } else {
            None
        };
        let reference_price = match order.price.filter(|p| *p > Decimal::ZERO) {
            Some(price) => price,
            None => self.exchange.get_mark_price(&order.symbol).await?,
        };

        let (filters, adjusted) = self
            .adjuster
            .adjust(
                &order.symbol,
                AdjustRequest {
                    quantity: order.quantity,
                    price: limit_price,
                    reference_price,
                    reduce_only: order.reduce_only,
                },
                false,
            )
            .await?;

        if !order.reduce_only {
            self.check_margin(order, &adjusted).await?;
        }

        Ok(Prepared { filters, adjusted })
    }

    /// 가용 잔고 ≥ 주문 금액 / 레버리지 × (1 + 여유분).
    async fn check_margin(&self, order: &ScheduledOrder, adjusted: &AdjustedOrder) -> ExecutionResult<()> {
        let account = self.exchange.get_account_info().await?;
        let buffer = Decimal::ONE + self.settings.margin_buffer_pct / Decimal::ONE_HUNDRED;
        let required = adjusted.notional / Decimal::from(order.leverage.max(1)) * buffer;
        if account.available_balance < required {
            return Err(ExecutionError::InsufficientMargin {
                required,
                available: account.available_balance,
            });
        }
        Ok(())
    }

    fn order_request(&self, order: &ScheduledOrder, adjusted: &AdjustedOrder) -> PlaceOrderRequest {
        PlaceOrderRequest {
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            quantity: adjusted.quantity,
            price: if order.order_type.requires_price() {
                adjusted.price
            } else {
                None
            },
            reduce_only: order.reduce_only,
            working_type: order.working_type,
            client_order_id: self.client_ids.generate(order.id, None),
        }
    }

    // ==================== 제출과 재시도 ====================

    async fn send(&self, submission: &Submission) -> ExecutionResult<OrderAck> {
        match submission {
            Submission::Order(request) => Ok(self.exchange.place_order(request).await?),
            Submission::Conditional(request) => {
                let timeout = self.settings.conditional_timeout();
                tokio::select! {
                    _ = self.cancel.cancelled() => Err(ExecutionError::Canceled),
                    result = tokio::time::timeout(timeout, self.exchange.place_conditional_close(request)) => {
                        match result {
                            Ok(ack) => Ok(ack?),
                            Err(_) => Err(ExecutionError::Timeout(format!(
                                "conditional order {} not acknowledged within {:?}",
                                request.client_order_id, timeout
                            ))),
                        }
                    }
                }
            }
        }
    }

    /// 제출하고, 정밀도 거부면 재시도 체인을 따라 다시 제출합니다.
    ///
    /// 정밀도 외의 거부는 즉시 반환합니다. 성공 시 실제 제출된 요청을 함께 반환합니다.
    async fn place_with_retries(
        &self,
        order_id: i64,
        submission: Submission,
        leg: Option<&str>,
    ) -> ExecutionResult<(Submission, OrderAck)> {
        let mut last_err = match self.send(&submission).await {
            Ok(ack) => return Ok((submission, ack)),
            Err(e) if e.is_precision_rejection() => e,
            Err(e) => return Err(e),
        };
        let mut current = submission;

        for step in RetryStep::CHAIN {
            let Some(next) = self.apply_retry_step(step, &current).await? else {
                debug!(step = ?step, "Retry step not applicable");
                continue;
            };
            let next = next.with_client_order_id(
                self.client_ids.generate(order_id, Some(&retry_suffix(leg, step))),
            );
            warn!(
                step = ?step,
                quantity = %next.quantity(),
                price = ?next.price(),
                error = %last_err,
                "Precision rejected, retrying"
            );

            match self.send(&next).await {
                Ok(ack) => return Ok((next, ack)),
                Err(e) if e.is_precision_rejection() => {
                    last_err = e;
                    current = next;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ExecutionError::RetriesExhausted(last_err.to_string()))
    }

    async fn apply_retry_step(
        &self,
        step: RetryStep,
        current: &Submission,
    ) -> ExecutionResult<Option<Submission>> {
        let symbol = current.symbol();
        let next = match step {
            RetryStep::RefreshFilters => {
                let filters = self.adjuster.load_filters(symbol, true).await?;
                let reference_price = match current.price() {
                    Some(price) => price,
                    None => self.exchange.get_mark_price(symbol).await?,
                };
                let adjusted = self.adjuster.adjust_with(
                    &filters,
                    AdjustRequest {
                        quantity: current.quantity(),
                        price: current.price(),
                        reference_price,
                        reduce_only: current.reduce_only(),
                    },
                    true,
                )?;
                Some(current.clone().with_quantity_and_price(adjusted.quantity, adjusted.price))
            }
            RetryStep::CoarserPrice => match current.price() {
                Some(price) => {
                    let filters = self.adjuster.load_filters(symbol, false).await?;
                    let filters = sanitize_filters(&filters, price, self.settings.min_price_ceiling)?;
                    let coarse = coarser_price(&filters, price);
                    Some(current.clone().with_quantity_and_price(current.quantity(), Some(coarse)))
                }
                None => None,
            },
            RetryStep::ToggleWorkingType => current
                .is_conditional()
                .then(|| current.clone().with_working_type(current.working_type().toggled())),
        };
        Ok(next)
    }

    // ==================== 브라켓 레그 ====================

    /// 조건부 청산 레그를 제출하고 자식 주문 행을 기록합니다. 실패하면 None.
    async fn place_leg(
        &self,
        entry: &ScheduledOrder,
        kind: OrderKind,
        stop_price: Decimal,
        quantity: Decimal,
        suffix: &str,
    ) -> Option<PlacedLeg> {
        let request = ConditionalCloseRequest {
            symbol: entry.symbol.clone(),
            side: entry.side.opposite(),
            kind,
            quantity,
            stop_price,
            working_type: entry.working_type,
            client_order_id: self.client_ids.generate(entry.id, Some(suffix)),
        };

        let (submitted, ack) = match self
            .place_with_retries(entry.id, Submission::Conditional(request), Some(suffix))
            .await
        {
            Ok(placed) => placed,
            Err(e) => {
                warn!(leg = suffix, stop = %stop_price, error = %e, "Bracket leg failed");
                return None;
            }
        };

        let client_id = submitted.client_order_id().to_string();
        let mut new = NewScheduledOrder::market(&entry.symbol, entry.side.opposite(), submitted.quantity())
            .with_leverage(entry.leverage)
            .with_working_type(submitted.working_type())
            .submitted_leg(
                entry.id,
                kind,
                submitted.price().unwrap_or(stop_price),
                client_id.clone(),
            );
        new.strategy_id = entry.strategy_id;
        new.execution_id = entry.execution_id;

        let row_id = match self.store.create_order(new).await {
            Ok(row) => {
                let ids = OrderUpdate::status(ScheduledOrderStatus::Success)
                    .with_exchange_ids(ack.exchange_order_id, client_id.clone());
                if let Err(e) = self.store.update_order(row.id, ids).await {
                    warn!(leg = suffix, error = %e, "Failed to record leg exchange id");
                }
                Some(row.id)
            }
            Err(e) => {
                error!(leg = suffix, client_id = %client_id, error = %e, "Failed to record bracket leg");
                None
            }
        };

        Some(PlacedLeg { client_id, row_id })
    }

    /// 보호 주문 없이 포지션이 남지 않도록 진입 수량을 시장가로 청산합니다.
    async fn emergency_close(
        &self,
        entry: &ScheduledOrder,
        submitted: &Submission,
        quantity: Decimal,
    ) -> String {
        let request = PlaceOrderRequest {
            symbol: entry.symbol.clone(),
            side: entry.side.opposite(),
            order_type: OrderKind::Market,
            quantity,
            price: None,
            reduce_only: true,
            working_type: submitted.working_type(),
            client_order_id: self.client_ids.generate(entry.id, Some("ec")),
        };

        match self.exchange.place_order(&request).await {
            Ok(_) => {
                error!(quantity = %quantity, "Both bracket legs failed, entry closed at market");
                "bracket legs failed, entry closed at market".to_string()
            }
            Err(e) => {
                error!(quantity = %quantity, error = %e, "Both bracket legs failed and emergency close failed");
                format!("bracket legs failed, emergency close failed: {e}")
            }
        }
    }

    // ==================== 취소 ====================

    /// 주문을 취소합니다.
    ///
    /// `pending`은 저장소에서만 취소하고, `success`는 거래소 주문을 취소합니다.
    /// 체결 전 취소된 진입 주문의 브라켓 연결은 `orphaned`가 되며 레그는 다시 취소하지 않습니다.
    pub async fn cancel_order(&self, order_id: i64) -> ExecutionResult<ScheduledOrderStatus> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(ExecutionError::OrderNotFound(order_id))?;

        match order.status {
            ScheduledOrderStatus::Pending => {
                self.store
                    .update_order(
                        order_id,
                        OrderUpdate::status(ScheduledOrderStatus::Canceled)
                            .with_result("canceled before submission"),
                    )
                    .await?;
            }
            ScheduledOrderStatus::Success => {
                if let Some(client_id) = order.client_order_id.as_deref() {
                    self.exchange.cancel_order(&order.symbol, client_id).await?;
                }
                self.store
                    .update_order(
                        order_id,
                        OrderUpdate::status(ScheduledOrderStatus::Canceled).with_result("canceled"),
                    )
                    .await?;

                let unfilled = order.executed_qty.map_or(true, |q| q.is_zero());
                if let Some(link) = self.store.get_bracket_link_by_entry(order_id).await? {
                    if unfilled && link.status.is_open() {
                        self.store
                            .update_bracket_status(&link.group_id, BracketStatus::Orphaned)
                            .await?;
                        info!(order_id, group_id = %link.group_id, "Bracket orphaned by entry cancel");
                    }
                }
            }
            other => {
                return Err(ExecutionError::InvalidOrder(format!(
                    "order {order_id} cannot be canceled in status {other}"
                )))
            }
        }

        Ok(ScheduledOrderStatus::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_status_mapping() {
        assert_eq!(ack_status(ExchangeOrderStatus::Filled), ScheduledOrderStatus::Filled);
        assert_eq!(ack_status(ExchangeOrderStatus::New), ScheduledOrderStatus::Success);
        assert_eq!(
            ack_status(ExchangeOrderStatus::PartiallyFilled),
            ScheduledOrderStatus::Success
        );
        assert_eq!(ack_status(ExchangeOrderStatus::Expired), ScheduledOrderStatus::Canceled);
        assert_eq!(ack_status(ExchangeOrderStatus::Rejected), ScheduledOrderStatus::Failed);
    }

    #[test]
    fn test_algo_status_mapping() {
        let cases = [
            ("NEW", ScheduledOrderStatus::Success),
            ("WORKING", ScheduledOrderStatus::Success),
            ("EXECUTED", ScheduledOrderStatus::Filled),
            ("FINISHED", ScheduledOrderStatus::Filled),
            ("CANCELED", ScheduledOrderStatus::Canceled),
            ("EXPIRED", ScheduledOrderStatus::Canceled),
            ("REJECTED", ScheduledOrderStatus::Failed),
        ];
        for (raw, expected) in cases {
            assert_eq!(algo_status_update(&AlgoOrderStatus::parse(raw)).status, expected, "{raw}");
        }
    }

    #[test]
    fn test_retry_suffixes() {
        assert_eq!(retry_suffix(None, RetryStep::RefreshFilters), "r1");
        assert_eq!(retry_suffix(Some("tp"), RetryStep::ToggleWorkingType), "tp-r3");
    }

    #[test]
    fn test_submission_updates() {
        let conditional = Submission::Conditional(ConditionalCloseRequest {
            symbol: "ABCUSDT".to_string(),
            side: trader_core::OrderSide::Sell,
            kind: OrderKind::StopMarket,
            quantity: Decimal::new(25, 1),
            stop_price: Decimal::new(19, 1),
            working_type: WorkingType::MarkPrice,
            client_order_id: "a".to_string(),
        });
        assert!(conditional.reduce_only());

        let toggled = conditional.clone().with_working_type(WorkingType::ContractPrice);
        assert_eq!(toggled.working_type(), WorkingType::ContractPrice);

        let market = Submission::Order(PlaceOrderRequest {
            symbol: "ABCUSDT".to_string(),
            side: trader_core::OrderSide::Buy,
            order_type: OrderKind::Market,
            quantity: Decimal::ONE,
            price: None,
            reduce_only: false,
            working_type: WorkingType::MarkPrice,
            client_order_id: "b".to_string(),
        });
        let requantized = market.with_quantity_and_price(Decimal::TWO, Some(Decimal::TEN));
        assert_eq!(requantized.quantity(), Decimal::TWO);
        assert_eq!(requantized.price(), None);
    }
}

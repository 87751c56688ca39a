//! 시뮬레이션 선물 거래소.
//!
//! 모의투자와 테스트에 사용합니다. 심볼 필터(수량/호가 단위, 최소 주문 금액),
//! 증거금, reduce-only, 증거금 모드 변경 제약을 실제 거래소와 같은 에러 코드로 재현하고,
//! 특정 호출에 실패를 주입할 수 있습니다.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use trader_core::{
    ExchangePosition, MarginMode, OrderKind, OrderSide, SymbolFilters, WorkingType,
};

use crate::error::{ExchangeError, ExchangeResult};
use crate::traits::{
    AccountInfo, AlgoOrderStatus, ConditionalCloseRequest, ExchangeOrder, ExchangeOrderStatus,
    FuturesExchange, OrderAck, PlaceOrderRequest, Ticker24h,
};

/// 시뮬레이션 거래소 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedConfig {
    /// 초기 지갑 잔고 (USDT)
    pub initial_balance: Decimal,
    /// 거래 수수료율 (0.0004 = 0.04%)
    pub fee_rate: Decimal,
    /// 심볼 필터 위반을 거부할지 여부
    pub enforce_filters: bool,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10000),
            fee_rate: dec!(0.0004),
            enforce_filters: true,
        }
    }
}

impl SimulatedConfig {
    pub fn with_initial_balance(mut self, amount: Decimal) -> Self {
        self.initial_balance = amount;
        self
    }

    pub fn with_fee_rate(mut self, rate: Decimal) -> Self {
        self.fee_rate = rate;
        self
    }
}

/// 실패 주입 대상 작업.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOperation {
    PlaceOrder,
    PlaceConditional,
    CancelOrder,
    QueryOrder,
    QueryAlgoOrder,
    SetLeverage,
    SetMarginType,
    GetPositions,
    GetMarkPrice,
    AccountInfo,
    ExchangeInfo,
}

#[derive(Debug, Clone)]
struct SimMarket {
    filters: SymbolFilters,
    mark_price: Decimal,
    price_change_pct: Decimal,
    quote_volume: Decimal,
}

#[derive(Debug, Clone)]
struct SimPosition {
    amount: Decimal,
    entry_price: Decimal,
    leverage: u32,
}

#[derive(Debug, Clone)]
struct SimOrder {
    exchange_order_id: String,
    request: PlaceOrderRequest,
    status: ExchangeOrderStatus,
    avg_price: Option<Decimal>,
    executed_qty: Decimal,
}

#[derive(Debug, Clone)]
struct SimAlgoOrder {
    request: ConditionalCloseRequest,
    status: AlgoOrderStatus,
}

#[derive(Debug, Default)]
struct SimState {
    markets: HashMap<String, SimMarket>,
    positions: HashMap<String, SimPosition>,
    leverage: HashMap<String, u32>,
    margin_modes: HashMap<String, MarginMode>,
    orders: HashMap<String, SimOrder>,
    algo_orders: HashMap<String, SimAlgoOrder>,
    wallet_balance: Decimal,
    failures: HashMap<SimOperation, VecDeque<ExchangeError>>,
    calls: HashMap<SimOperation, usize>,
    next_order_id: u64,
}

impl SimState {
    fn record(&mut self, op: SimOperation) -> ExchangeResult<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn market(&self, symbol: &str) -> ExchangeResult<&SimMarket> {
        self.markets
            .get(symbol)
            .ok_or_else(|| ExchangeError::api(-1121, "Invalid symbol."))
    }

    fn leverage_of(&self, symbol: &str) -> u32 {
        self.leverage.get(symbol).copied().unwrap_or(20)
    }

    fn used_margin(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| p.amount.abs() * p.entry_price / Decimal::from(p.leverage.max(1)))
            .sum()
    }

    fn has_open_orders(&self, symbol: &str) -> bool {
        self.orders
            .values()
            .any(|o| o.request.symbol == symbol && o.status == ExchangeOrderStatus::New)
            || self.algo_orders.values().any(|o| {
                o.request.symbol == symbol
                    && matches!(o.status, AlgoOrderStatus::New | AlgoOrderStatus::Working)
            })
    }

    fn next_id(&mut self) -> String {
        self.next_order_id += 1;
        self.next_order_id.to_string()
    }

    /// 포지션에 체결을 반영하고 실현 손익을 지갑에 더합니다.
    fn apply_fill(&mut self, symbol: &str, side: OrderSide, qty: Decimal, price: Decimal, fee_rate: Decimal) {
        let leverage = self.leverage_of(symbol);
        let signed = qty * side.sign();
        let fee = qty * price * fee_rate;
        self.wallet_balance -= fee;

        let position = self.positions.entry(symbol.to_string()).or_insert(SimPosition {
            amount: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            leverage,
        });

        let same_direction = position.amount.is_zero()
            || (position.amount > Decimal::ZERO) == (signed > Decimal::ZERO);

        if same_direction {
            let new_amount = position.amount + signed;
            position.entry_price = (position.amount.abs() * position.entry_price + qty * price)
                / new_amount.abs();
            position.amount = new_amount;
            position.leverage = leverage;
        } else {
            let closing = qty.min(position.amount.abs());
            let direction = if position.amount > Decimal::ZERO {
                Decimal::ONE
            } else {
                Decimal::NEGATIVE_ONE
            };
            let realized = (price - position.entry_price) * closing * direction;
            self.wallet_balance += realized;

            let remaining = position.amount + signed;
            if remaining.is_zero() {
                self.positions.remove(symbol);
            } else if (remaining > Decimal::ZERO) != (direction > Decimal::ZERO) {
                // 반대 방향으로 뒤집힘
                position.amount = remaining;
                position.entry_price = price;
            } else {
                position.amount = remaining;
            }
        }
    }

    fn check_filters(
        &self,
        symbol: &str,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> ExchangeResult<()> {
        let market = self.market(symbol)?;
        let filters = &market.filters;
        if quantity <= Decimal::ZERO || !(quantity % filters.step_size).is_zero() {
            return Err(ExchangeError::api(
                -1111,
                "Precision is over the maximum defined for this asset.",
            ));
        }
        if quantity < filters.min_qty || quantity > filters.max_qty {
            return Err(ExchangeError::api(-4005, "Quantity out of allowed range."));
        }
        if let Some(price) = price {
            if !(price % filters.tick_size).is_zero() {
                return Err(ExchangeError::api(
                    -1111,
                    "Precision is over the maximum defined for this asset.",
                ));
            }
        }
        Ok(())
    }
}

/// 모의투자 및 테스트용 시뮬레이션 선물 거래소.
#[derive(Clone)]
pub struct SimulatedFuturesExchange {
    config: SimulatedConfig,
    state: Arc<RwLock<SimState>>,
}

impl SimulatedFuturesExchange {
    pub fn new(config: SimulatedConfig) -> Self {
        let state = SimState {
            wallet_balance: config.initial_balance,
            ..Default::default()
        };
        Self {
            config,
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// 거래 가능한 심볼을 등록합니다.
    pub async fn add_market(&self, filters: SymbolFilters, mark_price: Decimal) {
        let mut state = self.state.write().await;
        state.markets.insert(
            filters.symbol.clone(),
            SimMarket {
                filters,
                mark_price,
                price_change_pct: Decimal::ZERO,
                quote_volume: Decimal::ZERO,
            },
        );
    }

    /// 24시간 통계를 설정합니다 (스캔 테스트용).
    pub async fn set_ticker_stats(&self, symbol: &str, change_pct: Decimal, quote_volume: Decimal) {
        let mut state = self.state.write().await;
        if let Some(market) = state.markets.get_mut(symbol) {
            market.price_change_pct = change_pct;
            market.quote_volume = quote_volume;
        }
    }

    /// 심볼 필터를 교체합니다 (거래소 규칙 변경 재현용).
    pub async fn set_filters(&self, filters: SymbolFilters) {
        let mut state = self.state.write().await;
        if let Some(market) = state.markets.get_mut(&filters.symbol) {
            market.filters = filters;
        }
    }

    pub async fn set_mark_price(&self, symbol: &str, price: Decimal) {
        let mut state = self.state.write().await;
        if let Some(market) = state.markets.get_mut(symbol) {
            market.mark_price = price;
        }
    }

    /// 포지션을 직접 설정합니다.
    pub async fn open_position(&self, symbol: &str, amount: Decimal, entry_price: Decimal, leverage: u32) {
        let mut state = self.state.write().await;
        state.leverage.insert(symbol.to_string(), leverage);
        state.positions.insert(
            symbol.to_string(),
            SimPosition {
                amount,
                entry_price,
                leverage,
            },
        );
    }

    /// 다음 호출에 실패를 주입합니다. 여러 번 호출하면 순서대로 소비됩니다.
    pub async fn fail_next(&self, op: SimOperation, error: ExchangeError) {
        let mut state = self.state.write().await;
        state.failures.entry(op).or_default().push_back(error);
    }

    /// 작업 호출 횟수.
    pub async fn call_count(&self, op: SimOperation) -> usize {
        let state = self.state.read().await;
        state.calls.get(&op).copied().unwrap_or(0)
    }

    /// 조건부 주문을 트리거하여 스톱 가격에 체결시킵니다.
    pub async fn trigger_algo(&self, client_order_id: &str) -> ExchangeResult<()> {
        let mut state = self.state.write().await;
        let request = match state.algo_orders.get_mut(client_order_id) {
            Some(algo) if algo.status == AlgoOrderStatus::New => {
                algo.status = AlgoOrderStatus::Finished;
                algo.request.clone()
            }
            Some(_) => return Err(ExchangeError::api(-2011, "Unknown order sent.")),
            None => return Err(ExchangeError::OrderNotFound(client_order_id.to_string())),
        };
        let fee_rate = self.config.fee_rate;
        state.apply_fill(
            &request.symbol,
            request.side,
            request.quantity,
            request.stop_price,
            fee_rate,
        );
        Ok(())
    }

    /// 대기 중인 지정가 주문을 체결시킵니다.
    pub async fn fill_resting_order(&self, client_order_id: &str) -> ExchangeResult<()> {
        let mut state = self.state.write().await;
        let (request, price) = match state.orders.get_mut(client_order_id) {
            Some(order) if order.status == ExchangeOrderStatus::New => {
                let price = order.request.price.unwrap_or_default();
                order.status = ExchangeOrderStatus::Filled;
                order.avg_price = Some(price);
                order.executed_qty = order.request.quantity;
                (order.request.clone(), price)
            }
            _ => return Err(ExchangeError::OrderNotFound(client_order_id.to_string())),
        };
        let fee_rate = self.config.fee_rate;
        state.apply_fill(&request.symbol, request.side, request.quantity, price, fee_rate);
        Ok(())
    }

    /// 등록된 조건부 주문 요청 (테스트 검증용).
    pub async fn algo_order(&self, client_order_id: &str) -> Option<(ConditionalCloseRequest, AlgoOrderStatus)> {
        let state = self.state.read().await;
        state
            .algo_orders
            .get(client_order_id)
            .map(|a| (a.request.clone(), a.status.clone()))
    }

    pub async fn margin_mode(&self, symbol: &str) -> Option<MarginMode> {
        self.state.read().await.margin_modes.get(symbol).copied()
    }

    pub async fn wallet_balance(&self) -> Decimal {
        self.state.read().await.wallet_balance
    }
}

impl Default for SimulatedFuturesExchange {
    fn default() -> Self {
        Self::new(SimulatedConfig::default())
    }
}

#[async_trait]
impl FuturesExchange for SimulatedFuturesExchange {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn place_order(&self, request: &PlaceOrderRequest) -> ExchangeResult<OrderAck> {
        let mut state = self.state.write().await;
        state.record(SimOperation::PlaceOrder)?;

        let mark_price = state.market(&request.symbol)?.mark_price;
        if self.config.enforce_filters {
            state.check_filters(&request.symbol, request.quantity, request.price)?;
        }
        if state.orders.contains_key(&request.client_order_id) {
            return Err(ExchangeError::api(-4015, "Client order id is duplicated."));
        }

        let ref_price = request.price.unwrap_or(mark_price);
        let notional = request.quantity * ref_price;

        if request.reduce_only {
            let closes_position = state.positions.get(&request.symbol).is_some_and(|p| {
                !p.amount.is_zero() && (p.amount > Decimal::ZERO) != (request.side == OrderSide::Buy)
            });
            if !closes_position {
                return Err(ExchangeError::api(-2022, "ReduceOnly Order is rejected."));
            }
        } else {
            let min_notional = state.market(&request.symbol)?.filters.min_notional;
            if self.config.enforce_filters && notional < min_notional {
                return Err(ExchangeError::api(
                    -4164,
                    &format!("Order's notional must be no smaller than {min_notional} (unless you choose reduce only)."),
                ));
            }
            let leverage = Decimal::from(state.leverage_of(&request.symbol).max(1));
            let available = state.wallet_balance - state.used_margin();
            if notional / leverage > available {
                return Err(ExchangeError::api(-2019, "Margin is insufficient."));
            }
        }

        let exchange_order_id = state.next_id();
        let (status, avg_price, executed_qty) = match request.order_type {
            OrderKind::Market => (
                ExchangeOrderStatus::Filled,
                Some(mark_price),
                request.quantity,
            ),
            _ => (ExchangeOrderStatus::New, None, Decimal::ZERO),
        };

        if status == ExchangeOrderStatus::Filled {
            let fee_rate = self.config.fee_rate;
            state.apply_fill(&request.symbol, request.side, request.quantity, mark_price, fee_rate);
        }

        state.orders.insert(
            request.client_order_id.clone(),
            SimOrder {
                exchange_order_id: exchange_order_id.clone(),
                request: request.clone(),
                status,
                avg_price,
                executed_qty,
            },
        );

        debug!(
            symbol = %request.symbol,
            side = %request.side,
            qty = %request.quantity,
            client_id = %request.client_order_id,
            "simulated order accepted"
        );

        Ok(OrderAck {
            exchange_order_id,
            client_order_id: request.client_order_id.clone(),
            status,
            avg_price,
            executed_qty,
        })
    }

    async fn place_conditional_close(
        &self,
        request: &ConditionalCloseRequest,
    ) -> ExchangeResult<OrderAck> {
        let mut state = self.state.write().await;
        state.record(SimOperation::PlaceConditional)?;

        let market = state.market(&request.symbol)?;
        let mark = market.mark_price;
        let last = mark;
        if self.config.enforce_filters {
            state.check_filters(&request.symbol, request.quantity, Some(request.stop_price))?;
        }

        let reference = match request.working_type {
            WorkingType::MarkPrice => mark,
            WorkingType::ContractPrice => last,
        };
        // 롱 청산(SELL): TP는 위, SL은 아래. 숏 청산(BUY)은 반대.
        let triggers_now = match (request.side, request.kind) {
            (OrderSide::Sell, OrderKind::TakeProfitMarket) => request.stop_price <= reference,
            (OrderSide::Sell, OrderKind::StopMarket) => request.stop_price >= reference,
            (OrderSide::Buy, OrderKind::TakeProfitMarket) => request.stop_price >= reference,
            (OrderSide::Buy, OrderKind::StopMarket) => request.stop_price <= reference,
            _ => false,
        };
        if triggers_now {
            return Err(ExchangeError::api(-2021, "Order would immediately trigger."));
        }

        let exchange_order_id = state.next_id();
        state.algo_orders.insert(
            request.client_order_id.clone(),
            SimAlgoOrder {
                request: request.clone(),
                status: AlgoOrderStatus::New,
            },
        );

        Ok(OrderAck {
            exchange_order_id,
            client_order_id: request.client_order_id.clone(),
            status: ExchangeOrderStatus::New,
            avg_price: None,
            executed_qty: Decimal::ZERO,
        })
    }

    async fn cancel_order(&self, _symbol: &str, client_order_id: &str) -> ExchangeResult<()> {
        let mut state = self.state.write().await;
        state.record(SimOperation::CancelOrder)?;

        if let Some(order) = state.orders.get_mut(client_order_id) {
            if order.status == ExchangeOrderStatus::New {
                order.status = ExchangeOrderStatus::Canceled;
                return Ok(());
            }
        } else if let Some(algo) = state.algo_orders.get_mut(client_order_id) {
            if matches!(algo.status, AlgoOrderStatus::New | AlgoOrderStatus::Working) {
                algo.status = AlgoOrderStatus::Canceled;
                return Ok(());
            }
        }
        Err(ExchangeError::api(-2011, "Unknown order sent."))
    }

    async fn query_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> ExchangeResult<ExchangeOrder> {
        let mut state = self.state.write().await;
        state.record(SimOperation::QueryOrder)?;

        let order = state
            .orders
            .get(client_order_id)
            .filter(|o| o.request.symbol == symbol)
            .ok_or_else(|| ExchangeError::api(-2013, "Order does not exist."))?;

        Ok(ExchangeOrder {
            exchange_order_id: order.exchange_order_id.clone(),
            client_order_id: client_order_id.to_string(),
            symbol: symbol.to_string(),
            side: order.request.side,
            status: order.status,
            avg_price: order.avg_price,
            executed_qty: order.executed_qty,
        })
    }

    async fn query_algo_order(
        &self,
        _symbol: &str,
        client_order_id: &str,
    ) -> ExchangeResult<AlgoOrderStatus> {
        let mut state = self.state.write().await;
        state.record(SimOperation::QueryAlgoOrder)?;

        state
            .algo_orders
            .get(client_order_id)
            .map(|a| a.status.clone())
            .ok_or_else(|| ExchangeError::api(-2013, "Order does not exist."))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        let mut state = self.state.write().await;
        state.record(SimOperation::SetLeverage)?;
        state.market(symbol)?;
        state.leverage.insert(symbol.to_string(), leverage.clamp(1, 125));
        Ok(())
    }

    async fn set_margin_type(&self, symbol: &str, mode: MarginMode) -> ExchangeResult<()> {
        let mut state = self.state.write().await;
        state.record(SimOperation::SetMarginType)?;
        state.market(symbol)?;

        let current = state.margin_modes.get(symbol).copied().unwrap_or(MarginMode::Cross);
        if current == mode {
            return Err(ExchangeError::api(-4046, "No need to change margin type."));
        }
        if state.has_open_orders(symbol) {
            return Err(ExchangeError::api(
                -4047,
                "Margin type cannot be changed if there exists open orders.",
            ));
        }
        if state.positions.get(symbol).is_some_and(|p| !p.amount.is_zero()) {
            return Err(ExchangeError::api(
                -4048,
                "Margin type cannot be changed if there exists position.",
            ));
        }
        state.margin_modes.insert(symbol.to_string(), mode);
        Ok(())
    }

    async fn get_positions(&self) -> ExchangeResult<Vec<ExchangePosition>> {
        let mut state = self.state.write().await;
        state.record(SimOperation::GetPositions)?;

        let positions = state
            .positions
            .iter()
            .filter(|(_, p)| !p.amount.is_zero())
            .map(|(symbol, p)| {
                let mark_price = state
                    .markets
                    .get(symbol)
                    .map(|m| m.mark_price)
                    .unwrap_or(p.entry_price);
                ExchangePosition {
                    symbol: symbol.clone(),
                    position_amt: p.amount,
                    entry_price: p.entry_price,
                    mark_price,
                    unrealized_pnl: (mark_price - p.entry_price) * p.amount,
                    leverage: p.leverage,
                    margin_mode: state
                        .margin_modes
                        .get(symbol)
                        .copied()
                        .unwrap_or(MarginMode::Cross),
                }
            })
            .collect();
        Ok(positions)
    }

    async fn get_mark_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let mut state = self.state.write().await;
        state.record(SimOperation::GetMarkPrice)?;
        Ok(state.market(symbol)?.mark_price)
    }

    async fn is_symbol_supported(&self, symbol: &str) -> ExchangeResult<bool> {
        Ok(self.state.read().await.markets.contains_key(symbol))
    }

    async fn get_symbol_filters(&self, symbol: &str) -> ExchangeResult<SymbolFilters> {
        let mut state = self.state.write().await;
        state.record(SimOperation::ExchangeInfo)?;
        Ok(state.market(symbol)?.filters.clone())
    }

    async fn get_account_info(&self) -> ExchangeResult<AccountInfo> {
        let mut state = self.state.write().await;
        state.record(SimOperation::AccountInfo)?;
        let available = state.wallet_balance - state.used_margin();
        Ok(AccountInfo {
            total_wallet_balance: state.wallet_balance,
            available_balance: available.max(Decimal::ZERO),
            can_trade: true,
        })
    }

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker24h> {
        let state = self.state.read().await;
        let market = state.market(symbol)?;
        Ok(Ticker24h {
            symbol: symbol.to_string(),
            last_price: market.mark_price,
            price_change_pct: market.price_change_pct,
            quote_volume: market.quote_volume,
        })
    }

    async fn list_symbols(&self) -> ExchangeResult<Vec<String>> {
        let state = self.state.read().await;
        let mut symbols: Vec<(&String, Decimal)> = state
            .markets
            .iter()
            .map(|(s, m)| (s, m.quote_volume))
            .collect();
        symbols.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        Ok(symbols.into_iter().map(|(s, _)| s.clone()).collect())
    }
}

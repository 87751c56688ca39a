//! 예약 주문 도메인 모델.
//!
//! 전략이 생성하고 스케줄러가 실행하는 `ScheduledOrder`와 관련 열거형을 정의합니다.
//! 상태 전이는 스케줄러만 수행하며, 전략 계층은 행을 생성하기만 합니다.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TraderError;

/// 주문 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// 반대 방향을 반환합니다.
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// 롱 방향이면 1, 숏 방향이면 -1.
    pub fn sign(&self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = TraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(TraderError::InvalidInput(format!("unknown order side: {other}"))),
        }
    }
}

/// 주문 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    Market,
    Limit,
    /// 손절 조건부 시장가
    StopMarket,
    /// 익절 조건부 시장가
    TakeProfitMarket,
}

impl OrderKind {
    /// 조건부(트리거) 주문인지 확인합니다.
    pub fn is_conditional(&self) -> bool {
        matches!(self, OrderKind::StopMarket | OrderKind::TakeProfitMarket)
    }

    /// 지정가가 필요한 주문인지 확인합니다.
    pub fn requires_price(&self) -> bool {
        matches!(self, OrderKind::Limit)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "MARKET",
            OrderKind::Limit => "LIMIT",
            OrderKind::StopMarket => "STOP_MARKET",
            OrderKind::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderKind {
    type Err = TraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MARKET" => Ok(OrderKind::Market),
            "LIMIT" => Ok(OrderKind::Limit),
            "STOP_MARKET" => Ok(OrderKind::StopMarket),
            "TAKE_PROFIT_MARKET" => Ok(OrderKind::TakeProfitMarket),
            other => Err(TraderError::InvalidInput(format!("unknown order type: {other}"))),
        }
    }
}

/// 조건부 주문 트리거 기준 가격.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkingType {
    #[default]
    MarkPrice,
    ContractPrice,
}

impl WorkingType {
    /// 다른 기준 가격으로 전환합니다 (정밀도 재시도 마지막 단계).
    pub fn toggled(&self) -> Self {
        match self {
            WorkingType::MarkPrice => WorkingType::ContractPrice,
            WorkingType::ContractPrice => WorkingType::MarkPrice,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkingType::MarkPrice => "MARK_PRICE",
            WorkingType::ContractPrice => "CONTRACT_PRICE",
        }
    }
}

impl fmt::Display for WorkingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkingType {
    type Err = TraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MARK_PRICE" => Ok(WorkingType::MarkPrice),
            "CONTRACT_PRICE" => Ok(WorkingType::ContractPrice),
            other => Err(TraderError::InvalidInput(format!("unknown working type: {other}"))),
        }
    }
}

/// 예약 주문 상태.
///
/// `pending → processing → success | filled | failed | canceled`.
/// `success`는 거래소가 접수했지만 아직 체결이 확인되지 않은 상태입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledOrderStatus {
    Pending,
    Processing,
    Success,
    Filled,
    Failed,
    Canceled,
}

impl ScheduledOrderStatus {
    /// 더 이상 전이가 없는 최종 상태인지 확인합니다.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ScheduledOrderStatus::Filled
                | ScheduledOrderStatus::Failed
                | ScheduledOrderStatus::Canceled
        )
    }

    /// 허용되는 상태 전이인지 확인합니다.
    pub fn can_transition_to(&self, next: ScheduledOrderStatus) -> bool {
        use ScheduledOrderStatus::*;
        match (self, next) {
            (Pending, Processing) | (Pending, Canceled) => true,
            (Processing, Success | Filled | Failed | Canceled) => true,
            (Success, Filled | Canceled | Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduledOrderStatus::Pending => "pending",
            ScheduledOrderStatus::Processing => "processing",
            ScheduledOrderStatus::Success => "success",
            ScheduledOrderStatus::Filled => "filled",
            ScheduledOrderStatus::Failed => "failed",
            ScheduledOrderStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for ScheduledOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduledOrderStatus {
    type Err = TraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "filled" => Ok(Self::Filled),
            "failed" => Ok(Self::Failed),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            other => Err(TraderError::InvalidInput(format!("unknown order status: {other}"))),
        }
    }
}

/// 주문 생성 목적.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPurpose {
    #[default]
    Entry,
    ScaleIn,
    OverallClose,
    TakeProfit,
    StopLoss,
    Manual,
}

impl OrderPurpose {
    /// 포지션을 줄이는 목적인지 확인합니다.
    pub fn is_closing(&self) -> bool {
        matches!(
            self,
            OrderPurpose::OverallClose | OrderPurpose::TakeProfit | OrderPurpose::StopLoss
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderPurpose::Entry => "entry",
            OrderPurpose::ScaleIn => "scale_in",
            OrderPurpose::OverallClose => "overall_close",
            OrderPurpose::TakeProfit => "take_profit",
            OrderPurpose::StopLoss => "stop_loss",
            OrderPurpose::Manual => "manual",
        }
    }
}

impl fmt::Display for OrderPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderPurpose {
    type Err = TraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entry" => Ok(Self::Entry),
            "scale_in" => Ok(Self::ScaleIn),
            "overall_close" => Ok(Self::OverallClose),
            "take_profit" => Ok(Self::TakeProfit),
            "stop_loss" => Ok(Self::StopLoss),
            "manual" => Ok(Self::Manual),
            other => Err(TraderError::InvalidInput(format!("unknown order purpose: {other}"))),
        }
    }
}

/// TP/SL 산출 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BracketMode {
    /// 진입가 대비 가격 변동률
    #[default]
    PricePercent,
    /// 증거금 대비 수익률 (레버리지 반영)
    MarginReturn,
}

impl BracketMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BracketMode::PricePercent => "price_percent",
            BracketMode::MarginReturn => "margin_return",
        }
    }
}

impl FromStr for BracketMode {
    type Err = TraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "price_percent" => Ok(Self::PricePercent),
            "margin_return" => Ok(Self::MarginReturn),
            other => Err(TraderError::InvalidInput(format!("unknown bracket mode: {other}"))),
        }
    }
}

/// 진입 주문에 붙는 TP/SL 설정.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BracketSpec {
    pub enabled: bool,
    pub mode: BracketMode,
    /// 익절 비율 (%)
    pub tp_percent: Option<Decimal>,
    /// 손절 비율 (%)
    pub sl_percent: Option<Decimal>,
    /// 절대 익절가 (비율보다 우선)
    pub tp_price: Option<Decimal>,
    /// 절대 손절가 (비율보다 우선)
    pub sl_price: Option<Decimal>,
}

impl BracketSpec {
    /// 비활성 브라켓.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// 증거금 수익률 기준 브라켓.
    pub fn margin_return(tp_percent: Decimal, sl_percent: Decimal) -> Self {
        Self {
            enabled: true,
            mode: BracketMode::MarginReturn,
            tp_percent: Some(tp_percent),
            sl_percent: Some(sl_percent),
            tp_price: None,
            sl_price: None,
        }
    }

    /// 가격 변동률 기준 브라켓.
    pub fn price_percent(tp_percent: Decimal, sl_percent: Decimal) -> Self {
        Self {
            enabled: true,
            mode: BracketMode::PricePercent,
            tp_percent: Some(tp_percent),
            sl_percent: Some(sl_percent),
            tp_price: None,
            sl_price: None,
        }
    }

    /// 익절 또는 손절 중 하나라도 산출 가능한지 확인합니다.
    pub fn has_targets(&self) -> bool {
        self.tp_percent.is_some()
            || self.sl_percent.is_some()
            || self.tp_price.is_some()
            || self.sl_price.is_some()
    }
}

/// 예약 주문.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledOrder {
    pub id: i64,
    pub strategy_id: Option<i64>,
    pub execution_id: Option<i64>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderKind,
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub price: Option<Decimal>,
    pub leverage: u32,
    pub reduce_only: bool,
    pub bracket: BracketSpec,
    pub working_type: WorkingType,
    pub purpose: OrderPurpose,
    pub trigger_time: DateTime<Utc>,
    pub status: ScheduledOrderStatus,
    pub exchange_order_id: Option<String>,
    pub client_order_id: Option<String>,
    pub parent_order_id: Option<i64>,
    pub close_order_ids: Vec<i64>,
    pub avg_price: Option<Decimal>,
    pub executed_qty: Option<Decimal>,
    /// 사람이 읽을 수 있는 처리 결과 또는 실패 사유
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledOrder {
    /// 브라켓 경로로 실행해야 하는지 확인합니다.
    pub fn is_bracket(&self) -> bool {
        self.bracket.enabled && !self.reduce_only && !self.order_type.is_conditional()
    }

    /// 기존 진입 주문에 딸린 조건부 청산 레그인지 확인합니다.
    pub fn is_conditional_leg(&self) -> bool {
        self.order_type.is_conditional() && self.parent_order_id.is_some()
    }

    /// 체결 수량. 체결 정보가 없으면 요청 수량을 사용합니다.
    pub fn filled_quantity(&self) -> Decimal {
        self.executed_qty
            .filter(|q| *q > Decimal::ZERO)
            .unwrap_or(self.quantity)
    }
}

/// 새 예약 주문 생성 요청.
#[derive(Debug, Clone, PartialEq)]
pub struct NewScheduledOrder {
    pub strategy_id: Option<i64>,
    pub execution_id: Option<i64>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderKind,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub leverage: u32,
    pub reduce_only: bool,
    pub bracket: BracketSpec,
    pub working_type: WorkingType,
    pub purpose: OrderPurpose,
    pub trigger_time: DateTime<Utc>,
    pub parent_order_id: Option<i64>,
    /// 이미 거래소에 제출된 행을 기록할 때 사용합니다 (브라켓 레그).
    pub initial_status: ScheduledOrderStatus,
    pub client_order_id: Option<String>,
}

impl NewScheduledOrder {
    /// 시장가 주문을 생성합니다.
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            strategy_id: None,
            execution_id: None,
            symbol: symbol.into(),
            side,
            order_type: OrderKind::Market,
            quantity,
            price: None,
            leverage: 1,
            reduce_only: false,
            bracket: BracketSpec::disabled(),
            working_type: WorkingType::MarkPrice,
            purpose: OrderPurpose::Entry,
            trigger_time: Utc::now(),
            parent_order_id: None,
            initial_status: ScheduledOrderStatus::Pending,
            client_order_id: None,
        }
    }

    /// 지정가 주문을 생성합니다.
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            order_type: OrderKind::Limit,
            price: Some(price),
            ..Self::market(symbol, side, quantity)
        }
    }

    /// 포지션 청산용 reduce-only 시장가 주문을 생성합니다.
    pub fn close_position(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            reduce_only: true,
            purpose: OrderPurpose::OverallClose,
            ..Self::market(symbol, side, quantity)
        }
    }

    pub fn with_strategy(mut self, strategy_id: i64, execution_id: Option<i64>) -> Self {
        self.strategy_id = Some(strategy_id);
        self.execution_id = execution_id;
        self
    }

    pub fn with_leverage(mut self, leverage: u32) -> Self {
        self.leverage = leverage.max(1);
        self
    }

    pub fn with_bracket(mut self, bracket: BracketSpec) -> Self {
        self.bracket = bracket;
        self
    }

    pub fn with_purpose(mut self, purpose: OrderPurpose) -> Self {
        self.purpose = purpose;
        self
    }

    pub fn with_working_type(mut self, working_type: WorkingType) -> Self {
        self.working_type = working_type;
        self
    }

    pub fn with_trigger_time(mut self, trigger_time: DateTime<Utc>) -> Self {
        self.trigger_time = trigger_time;
        self
    }

    /// 이미 제출된 조건부 청산 레그로 기록합니다.
    pub fn submitted_leg(
        mut self,
        parent_order_id: i64,
        kind: OrderKind,
        stop_price: Decimal,
        client_order_id: String,
    ) -> Self {
        self.order_type = kind;
        self.price = Some(stop_price);
        self.reduce_only = true;
        self.parent_order_id = Some(parent_order_id);
        self.initial_status = ScheduledOrderStatus::Success;
        self.client_order_id = Some(client_order_id);
        self.purpose = match kind {
            OrderKind::TakeProfitMarket => OrderPurpose::TakeProfit,
            _ => OrderPurpose::StopLoss,
        };
        self
    }
}

/// 실행 결과로 기록하는 주문 갱신 내용.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub status: ScheduledOrderStatus,
    pub exchange_order_id: Option<String>,
    pub client_order_id: Option<String>,
    pub avg_price: Option<Decimal>,
    pub executed_qty: Option<Decimal>,
    /// 정밀도 보정 후 실제 제출된 수량
    pub quantity: Option<Decimal>,
    pub close_order_ids: Option<Vec<i64>>,
    pub result: Option<String>,
}

impl OrderUpdate {
    /// 상태만 바꾸는 갱신.
    pub fn status(status: ScheduledOrderStatus) -> Self {
        Self {
            status,
            exchange_order_id: None,
            client_order_id: None,
            avg_price: None,
            executed_qty: None,
            quantity: None,
            close_order_ids: None,
            result: None,
        }
    }

    /// 실패 사유와 함께 실패 처리합니다.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::status(ScheduledOrderStatus::Failed).with_result(reason)
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn with_exchange_ids(
        mut self,
        exchange_order_id: impl Into<String>,
        client_order_id: impl Into<String>,
    ) -> Self {
        self.exchange_order_id = Some(exchange_order_id.into());
        self.client_order_id = Some(client_order_id.into());
        self
    }

    pub fn with_fill(mut self, avg_price: Option<Decimal>, executed_qty: Decimal) -> Self {
        self.avg_price = avg_price;
        self.executed_qty = Some(executed_qty);
        self
    }

    pub fn with_quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_close_orders(mut self, ids: Vec<i64>) -> Self {
        self.close_order_ids = Some(ids);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_opposite_and_sign() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.sign(), dec!(-1));
        assert_eq!(OrderSide::Buy.to_string(), "BUY");
        assert_eq!("sell".parse::<OrderSide>().unwrap(), OrderSide::Sell);
    }

    #[test]
    fn test_status_transitions() {
        use ScheduledOrderStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Filled));
        assert!(Processing.can_transition_to(Failed));
        assert!(Success.can_transition_to(Filled));
        assert!(!Filled.can_transition_to(Pending));
        assert!(Filled.is_final());
        assert!(!Success.is_final());
    }

    #[test]
    fn test_working_type_toggle() {
        assert_eq!(WorkingType::MarkPrice.toggled(), WorkingType::ContractPrice);
        assert_eq!(WorkingType::ContractPrice.toggled(), WorkingType::MarkPrice);
    }

    #[test]
    fn test_submitted_leg_is_reduce_only() {
        let leg = NewScheduledOrder::market("BTCUSDT", OrderSide::Sell, dec!(0.01)).submitted_leg(
            7,
            OrderKind::TakeProfitMarket,
            dec!(102),
            "sch-7-tp-1".to_string(),
        );
        assert!(leg.reduce_only);
        assert_eq!(leg.purpose, OrderPurpose::TakeProfit);
        assert_eq!(leg.initial_status, ScheduledOrderStatus::Success);
        assert_eq!(leg.parent_order_id, Some(7));
    }

    #[test]
    fn test_quantity_serializes_as_string() {
        let now = Utc::now();
        let order = ScheduledOrder {
            id: 1,
            strategy_id: None,
            execution_id: None,
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderKind::Market,
            quantity: dec!(0.010),
            price: None,
            leverage: 5,
            reduce_only: false,
            bracket: BracketSpec::disabled(),
            working_type: WorkingType::MarkPrice,
            purpose: OrderPurpose::Entry,
            trigger_time: now,
            status: ScheduledOrderStatus::Pending,
            exchange_order_id: None,
            client_order_id: None,
            parent_order_id: None,
            close_order_ids: vec![],
            avg_price: None,
            executed_qty: None,
            result: None,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["quantity"], "0.010");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["order_type"], "MARKET");
    }
}

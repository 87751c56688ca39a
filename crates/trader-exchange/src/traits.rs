//! 선물 거래소 trait 정의.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use trader_core::{ExchangePosition, MarginMode, OrderKind, OrderSide, SymbolFilters, WorkingType};

use crate::error::ExchangeResult;

/// 일반 주문 요청.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderKind,
    pub quantity: Decimal,
    /// 지정가 또는 트리거 가격
    pub price: Option<Decimal>,
    pub reduce_only: bool,
    pub working_type: WorkingType,
    pub client_order_id: String,
}

/// reduce-only 조건부 청산 주문 요청 (TP/SL 레그).
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalCloseRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: Decimal,
    pub stop_price: Decimal,
    pub working_type: WorkingType,
    pub client_order_id: String,
}

/// 거래소 주문 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeOrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
}

impl ExchangeOrderStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(Self::New),
            "PARTIALLY_FILLED" => Some(Self::PartiallyFilled),
            "FILLED" => Some(Self::Filled),
            "CANCELED" => Some(Self::Canceled),
            "EXPIRED" => Some(Self::Expired),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// 주문 접수 응답.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub exchange_order_id: String,
    pub client_order_id: String,
    pub status: ExchangeOrderStatus,
    pub avg_price: Option<Decimal>,
    pub executed_qty: Decimal,
}

/// 주문 조회 결과.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeOrder {
    pub exchange_order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub status: ExchangeOrderStatus,
    pub avg_price: Option<Decimal>,
    pub executed_qty: Decimal,
}

/// 조건부(알고) 주문 상태.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AlgoOrderStatus {
    New,
    Working,
    Executed,
    Finished,
    Canceled,
    Expired,
    /// 알 수 없는 상태 문자열
    Other(String),
}

impl AlgoOrderStatus {
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "NEW" => Self::New,
            "WORKING" => Self::Working,
            "EXECUTED" | "TRIGGERED" => Self::Executed,
            "FINISHED" => Self::Finished,
            "CANCELED" | "CANCELLED" => Self::Canceled,
            "EXPIRED" => Self::Expired,
            other => Self::Other(other.to_string()),
        }
    }

    /// 아직 트리거 대기 중이거나 정상 종료된 상태.
    pub fn is_healthy(&self) -> bool {
        matches!(
            self,
            Self::New | Self::Working | Self::Executed | Self::Finished
        )
    }

    /// 체결로 끝난 상태.
    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed | Self::Finished)
    }

    /// 취소/만료로 생명주기가 끝난 상태.
    pub fn is_completed_without_fill(&self) -> bool {
        matches!(self, Self::Canceled | Self::Expired)
    }
}

impl fmt::Display for AlgoOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => f.write_str("NEW"),
            Self::Working => f.write_str("WORKING"),
            Self::Executed => f.write_str("EXECUTED"),
            Self::Finished => f.write_str("FINISHED"),
            Self::Canceled => f.write_str("CANCELED"),
            Self::Expired => f.write_str("EXPIRED"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// 선물 계좌 정보.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountInfo {
    pub total_wallet_balance: Decimal,
    pub available_balance: Decimal,
    pub can_trade: bool,
}

/// 24시간 시세 요약.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticker24h {
    pub symbol: String,
    pub last_price: Decimal,
    pub price_change_pct: Decimal,
    pub quote_volume: Decimal,
}

/// 선물 거래소 인터페이스.
///
/// 실패는 `ExchangeError::Rejected { status, body }`로 전달되며, 호출자는
/// `ExchangeError::kind()`로 분류한 뒤 재시도 여부를 결정합니다.
#[async_trait]
pub trait FuturesExchange: Send + Sync {
    /// 거래소 이름 반환.
    fn name(&self) -> &str;

    // === 주문 ===

    async fn place_order(&self, request: &PlaceOrderRequest) -> ExchangeResult<OrderAck>;

    async fn place_conditional_close(
        &self,
        request: &ConditionalCloseRequest,
    ) -> ExchangeResult<OrderAck>;

    async fn cancel_order(&self, symbol: &str, client_order_id: &str) -> ExchangeResult<()>;

    async fn query_order(&self, symbol: &str, client_order_id: &str)
        -> ExchangeResult<ExchangeOrder>;

    async fn query_algo_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> ExchangeResult<AlgoOrderStatus>;

    // === 계좌 설정 ===

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()>;

    async fn set_margin_type(&self, symbol: &str, mode: MarginMode) -> ExchangeResult<()>;

    // === 조회 ===

    async fn get_positions(&self) -> ExchangeResult<Vec<ExchangePosition>>;

    async fn get_mark_price(&self, symbol: &str) -> ExchangeResult<Decimal>;

    async fn is_symbol_supported(&self, symbol: &str) -> ExchangeResult<bool>;

    /// 심볼의 수량/가격 필터 (exchange info).
    async fn get_symbol_filters(&self, symbol: &str) -> ExchangeResult<SymbolFilters>;

    async fn get_account_info(&self) -> ExchangeResult<AccountInfo>;

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker24h>;

    /// 거래 가능한 심볼 목록.
    async fn list_symbols(&self) -> ExchangeResult<Vec<String>>;

    /// 특정 심볼의 포지션. 없거나 수량이 0이면 None.
    async fn get_position(&self, symbol: &str) -> ExchangeResult<Option<ExchangePosition>> {
        let positions = self.get_positions().await?;
        Ok(positions
            .into_iter()
            .find(|p| p.symbol == symbol && p.is_open()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algo_status_health() {
        for s in ["NEW", "WORKING", "EXECUTED", "FINISHED"] {
            assert!(AlgoOrderStatus::parse(s).is_healthy(), "{s}");
        }
        assert!(AlgoOrderStatus::parse("CANCELED").is_completed_without_fill());
        assert!(AlgoOrderStatus::parse("expired").is_completed_without_fill());
        let other = AlgoOrderStatus::parse("REJECTED");
        assert!(!other.is_healthy());
        assert!(!other.is_completed_without_fill());
        assert_eq!(other.to_string(), "REJECTED");
    }

    #[test]
    fn test_order_status_parse() {
        assert_eq!(ExchangeOrderStatus::parse("FILLED"), Some(ExchangeOrderStatus::Filled));
        assert_eq!(ExchangeOrderStatus::parse("???"), None);
    }
}

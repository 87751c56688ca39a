//! 거래소 에러 타입과 거부 사유 분류.

use serde::Deserialize;
use thiserror::Error;

/// 거래소 관련 에러.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// 거래소가 요청을 거부함 (HTTP 상태 코드와 응답 본문)
    #[error("Rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// 네트워크/연결 에러
    #[error("Network error: {0}")]
    Network(String),

    /// 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 요청 한도 초과
    #[error("Rate limit exceeded")]
    RateLimited,

    /// 주문을 찾을 수 없음
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// 심볼을 찾을 수 없음
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// 응답 파싱 에러
    #[error("Parse error: {0}")]
    Parse(String),
}

/// 거래소 결과 타입.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// 재시도 판단 전에 한 번만 수행하는 거부 사유 분류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    /// 수량/가격 정밀도 초과 (-1111)
    Precision,
    /// 최소 주문 금액 미달 (-4164)
    MinNotional,
    /// 증거금 부족 (-2019)
    InsufficientMargin,
    /// 이미 목표 증거금 모드 (-4046)
    MarginTypeUnchanged,
    /// 미체결 주문 때문에 증거금 모드 변경 불가 (-4047)
    MarginTypeOpenOrders,
    /// 포지션 때문에 증거금 모드 변경 불가 (-4048)
    MarginTypePositionExists,
    /// 조건부 주문이 즉시 트리거됨 (-2021)
    ImmediateTrigger,
    /// reduce-only 주문 거부 (-2022)
    ReduceOnlyRejected,
    /// 지원하지 않는 심볼 (-1121)
    UnsupportedSymbol,
    /// 주문 없음 (-2011, -2013)
    UnknownOrder,
    /// 요청 한도 (-1003, HTTP 429/418)
    RateLimited,
    /// 네트워크, 타임아웃, 거래소 내부 오류
    Transient,
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    #[serde(default)]
    msg: String,
}

impl RejectionKind {
    /// HTTP 상태 코드와 응답 본문으로 거부 사유를 분류합니다.
    ///
    /// JSON `code` 필드를 우선 사용하고, 해석할 수 없으면 메시지 문자열로 판단합니다.
    pub fn classify(status: u16, body: &str) -> Self {
        if let Ok(api) = serde_json::from_str::<ApiErrorBody>(body) {
            if let Some(kind) = Self::from_code(api.code) {
                return kind;
            }
            if let Some(kind) = Self::from_message(&api.msg) {
                return kind;
            }
        } else if let Some(kind) = Self::from_message(body) {
            return kind;
        }

        match status {
            429 | 418 => RejectionKind::RateLimited,
            500..=599 => RejectionKind::Transient,
            _ => RejectionKind::Other,
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        let kind = match code {
            -1111 => RejectionKind::Precision,
            -4164 => RejectionKind::MinNotional,
            -2019 => RejectionKind::InsufficientMargin,
            -4046 => RejectionKind::MarginTypeUnchanged,
            -4047 => RejectionKind::MarginTypeOpenOrders,
            -4048 => RejectionKind::MarginTypePositionExists,
            -2021 => RejectionKind::ImmediateTrigger,
            -2022 => RejectionKind::ReduceOnlyRejected,
            -1121 => RejectionKind::UnsupportedSymbol,
            -2011 | -2013 => RejectionKind::UnknownOrder,
            -1003 => RejectionKind::RateLimited,
            -1001 | -1007 => RejectionKind::Transient,
            _ => return None,
        };
        Some(kind)
    }

    fn from_message(msg: &str) -> Option<Self> {
        let msg = msg.to_lowercase();
        let kind = if msg.contains("precision is over") {
            RejectionKind::Precision
        } else if msg.contains("notional must be no smaller than") {
            RejectionKind::MinNotional
        } else if msg.contains("margin is insufficient") {
            RejectionKind::InsufficientMargin
        } else if msg.contains("no need to change margin type") {
            RejectionKind::MarginTypeUnchanged
        } else if msg.contains("margin type cannot be changed if there exists open orders") {
            RejectionKind::MarginTypeOpenOrders
        } else if msg.contains("margin type cannot be changed if there exists position") {
            RejectionKind::MarginTypePositionExists
        } else if msg.contains("would immediately trigger") {
            RejectionKind::ImmediateTrigger
        } else if msg.contains("reduceonly order is rejected") {
            RejectionKind::ReduceOnlyRejected
        } else if msg.contains("invalid symbol") {
            RejectionKind::UnsupportedSymbol
        } else if msg.contains("unknown order") || msg.contains("order does not exist") {
            RejectionKind::UnknownOrder
        } else {
            return None;
        };
        Some(kind)
    }

    /// 동일 요청을 다시 보내도 되는 사유인지 확인합니다.
    pub fn is_transient(&self) -> bool {
        matches!(self, RejectionKind::Transient | RejectionKind::RateLimited)
    }
}

impl ExchangeError {
    /// 거부 응답을 생성합니다.
    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        ExchangeError::Rejected {
            status,
            body: body.into(),
        }
    }

    /// 거래소 API 형식의 거부 응답을 생성합니다.
    pub fn api(code: i64, msg: &str) -> Self {
        Self::rejected(400, serde_json::json!({ "code": code, "msg": msg }).to_string())
    }

    /// 에러를 거부 사유로 분류합니다.
    pub fn kind(&self) -> RejectionKind {
        match self {
            ExchangeError::Rejected { status, body } => RejectionKind::classify(*status, body),
            ExchangeError::Network(_) | ExchangeError::Timeout(_) => RejectionKind::Transient,
            ExchangeError::RateLimited => RejectionKind::RateLimited,
            ExchangeError::OrderNotFound(_) => RejectionKind::UnknownOrder,
            ExchangeError::SymbolNotFound(_) => RejectionKind::UnsupportedSymbol,
            ExchangeError::Parse(_) => RejectionKind::Other,
        }
    }

    /// 재시도 가능한 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_code() {
        let body = r#"{"code":-1111,"msg":"Precision is over the maximum defined for this asset."}"#;
        assert_eq!(RejectionKind::classify(400, body), RejectionKind::Precision);

        let body = r#"{"code":-4164,"msg":"Order's notional must be no smaller than 5"}"#;
        assert_eq!(RejectionKind::classify(400, body), RejectionKind::MinNotional);
    }

    #[test]
    fn test_classify_by_message() {
        let body = r#"{"code":-9999,"msg":"No need to change margin type."}"#;
        assert_eq!(
            RejectionKind::classify(400, body),
            RejectionKind::MarginTypeUnchanged
        );
        assert_eq!(
            RejectionKind::classify(400, "Margin is insufficient."),
            RejectionKind::InsufficientMargin
        );
    }

    #[test]
    fn test_classify_by_status() {
        assert_eq!(RejectionKind::classify(429, ""), RejectionKind::RateLimited);
        assert_eq!(RejectionKind::classify(503, "busy"), RejectionKind::Transient);
        assert_eq!(RejectionKind::classify(400, "weird"), RejectionKind::Other);
    }

    #[test]
    fn test_error_kind_and_retry() {
        assert!(ExchangeError::Network("reset".into()).is_retryable());
        assert!(ExchangeError::RateLimited.is_retryable());
        assert!(!ExchangeError::api(-2019, "Margin is insufficient.").is_retryable());
        assert_eq!(
            ExchangeError::api(-4047, "Margin type cannot be changed if there exists open orders.")
                .kind(),
            RejectionKind::MarginTypeOpenOrders
        );
    }
}

//! 도메인 모델 에러 타입.

use thiserror::Error;

/// 도메인 공통 에러.
///
/// 문자열 파싱 실패와 상태 전이 위반이 대부분이며, 네트워크 계열만 재시도 대상입니다.
#[derive(Debug, Error)]
pub enum TraderError {
    #[error("설정 에러: {0}")]
    Config(String),

    /// 알 수 없는 전략 종류 등 전략 정의 오류
    #[error("전략 에러: {0}")]
    Strategy(String),

    #[error("네트워크 에러: {0}")]
    Network(String),

    #[error("요청 한도 초과: {0}")]
    RateLimit(String),

    #[error("직렬화 에러: {0}")]
    Serialization(String),

    /// 저장된 문자열 값을 열거형으로 해석할 수 없음
    #[error("잘못된 입력: {0}")]
    InvalidInput(String),

    #[error("잘못된 상태 전이: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

/// 도메인 작업 Result 타입.
pub type TraderResult<T> = Result<T, TraderError>;

impl TraderError {
    /// 재시도 가능한 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TraderError::Network(_) | TraderError::RateLimit(_))
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        TraderError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl From<serde_json::Error> for TraderError {
    fn from(err: serde_json::Error) -> Self {
        TraderError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for TraderError {
    fn from(err: config::ConfigError) -> Self {
        TraderError::Config(err.to_string())
    }
}

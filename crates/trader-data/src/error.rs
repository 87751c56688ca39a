//! 저장소 오류 타입.

use thiserror::Error;
use trader_core::TraderError;

/// 저장소 관련 오류.
#[derive(Debug, Error)]
pub enum StoreError {
    /// 데이터베이스 연결 오류
    #[error("Database connection error: {0}")]
    Connection(String),

    /// 쿼리 실행 오류
    #[error("Query error: {0}")]
    Query(String),

    /// 레코드를 찾을 수 없음
    #[error("Record not found: {0}")]
    NotFound(String),

    /// 저장된 값을 도메인 타입으로 해석할 수 없음
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// 허용되지 않는 상태 전이
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// 마이그레이션 오류
    #[error("Migration error: {0}")]
    Migration(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("Row not found".to_string()),
            sqlx::Error::PoolTimedOut => StoreError::Connection("pool timed out".to_string()),
            sqlx::Error::Database(db_err) => StoreError::Query(db_err.message().to_string()),
            _ => StoreError::Query(err.to_string()),
        }
    }
}

impl From<TraderError> for StoreError {
    fn from(err: TraderError) -> Self {
        StoreError::InvalidData(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::InvalidData(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

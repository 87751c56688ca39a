//! 증거금 모드(isolated/cross) 적용.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use trader_core::{ExecutionSettings, MarginMode};
use trader_exchange::{FuturesExchange, RejectionKind};

use crate::error::ExecutionResult;

/// 증거금 모드 적용 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarginModeOutcome {
    Changed,
    /// 이미 목표 모드
    AlreadySet,
    /// 포지션이 열려 있어 변경하지 않음
    SkippedOpenPosition,
    /// 미체결 주문 때문에 변경 불가 (재시도하지 않음)
    Blocked(String),
}

impl MarginModeOutcome {
    /// 목표 모드가 적용된 상태인지 확인합니다.
    pub fn is_applied(&self) -> bool {
        matches!(self, MarginModeOutcome::Changed | MarginModeOutcome::AlreadySet)
    }
}

/// 심볼별 증거금 모드 관리자.
pub struct MarginModeManager {
    exchange: Arc<dyn FuturesExchange>,
    attempts: u32,
    backoff: Duration,
}

impl MarginModeManager {
    pub fn new(exchange: Arc<dyn FuturesExchange>, attempts: u32, backoff: Duration) -> Self {
        Self {
            exchange,
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn from_settings(exchange: Arc<dyn FuturesExchange>, settings: &ExecutionSettings) -> Self {
        Self::new(
            exchange,
            settings.margin_mode_attempts,
            settings.margin_mode_backoff(),
        )
    }

    /// 심볼에 증거금 모드를 적용합니다.
    ///
    /// 열린 포지션이 있으면 건너뜁니다. 분류되지 않은 실패는 선형 backoff로
    /// 최대 `attempts`번 시도한 뒤 마지막 에러를 반환합니다.
    pub async fn ensure(&self, symbol: &str, mode: MarginMode) -> ExecutionResult<MarginModeOutcome> {
        if let Some(position) = self.exchange.get_position(symbol).await? {
            if position.margin_mode == mode {
                return Ok(MarginModeOutcome::AlreadySet);
            }
            debug!(symbol, current = %position.margin_mode, target = %mode, "Open position, margin mode left as is");
            return Ok(MarginModeOutcome::SkippedOpenPosition);
        }

        let mut attempt = 1;
        loop {
            let err = match self.exchange.set_margin_type(symbol, mode).await {
                Ok(()) => {
                    info!(symbol, mode = %mode, "Margin mode changed");
                    return Ok(MarginModeOutcome::Changed);
                }
                Err(e) => e,
            };

            match err.kind() {
                RejectionKind::MarginTypeUnchanged => return Ok(MarginModeOutcome::AlreadySet),
                RejectionKind::MarginTypePositionExists => {
                    return Ok(MarginModeOutcome::SkippedOpenPosition)
                }
                RejectionKind::MarginTypeOpenOrders => {
                    warn!(symbol, mode = %mode, "Margin mode blocked by open orders");
                    return Ok(MarginModeOutcome::Blocked(err.to_string()));
                }
                _ if attempt < self.attempts => {
                    warn!(symbol, attempt, error = %err, "Margin mode change failed, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                _ => return Err(err.into()),
            }
        }
    }
}

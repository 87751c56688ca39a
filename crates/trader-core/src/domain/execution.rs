//! 전략 실행(run) 기록.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TraderError;

/// 전략 실행 상태.
///
/// `pending → running → completed | failed | stopped`. 최종 상태에서는 전이가 없습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 5] = [
        ExecutionStatus::Pending,
        ExecutionStatus::Running,
        ExecutionStatus::Completed,
        ExecutionStatus::Failed,
        ExecutionStatus::Stopped,
    ];

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Stopped
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_final()
    }

    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (Pending, Running) | (Pending, Stopped) | (Pending, Failed) => true,
            (Running, Completed | Failed | Stopped) => true,
            _ => false,
        }
    }

    /// `next`로 갱신할 수 있는 현재 상태 목록. 진행 상황 갱신을 위해 같은 활성 상태도 포함합니다.
    pub fn allowed_predecessors(next: ExecutionStatus) -> Vec<ExecutionStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next) || (*s == next && next.is_active()))
            .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = TraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            other => Err(TraderError::InvalidInput(format!(
                "unknown execution status: {other}"
            ))),
        }
    }
}

/// 실행별 설정.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// 결정으로부터 주문을 자동 생성할지 여부
    pub auto_create_orders: bool,
    /// 심볼 평가 사이 대기 시간 (밀리초)
    pub execution_delay_ms: u64,
    /// 최대 실행 횟수 (None이면 무제한)
    pub max_runs: Option<u32>,
    /// max_runs 도달 시 전략 자동 중지
    pub auto_stop: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            auto_create_orders: true,
            execution_delay_ms: 0,
            max_runs: None,
            auto_stop: false,
        }
    }
}

impl ExecutionConfig {
    pub fn execution_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.execution_delay_ms)
    }

    /// 주어진 누적 실행 횟수로 자동 중지 조건을 만족하는지 확인합니다.
    pub fn should_stop_after(&self, run_count: u32) -> bool {
        self.auto_stop && self.max_runs.is_some_and(|max| run_count >= max)
    }
}

/// 실행 결과 통계.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionResults {
    pub orders_created: u32,
    pub orders_succeeded: u32,
    pub orders_failed: u32,
    pub total_pnl: Decimal,
    /// 승률 (0.0 ~ 100.0)
    pub win_rate: f64,
}

/// 전략 실행 기록.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyExecution {
    pub id: i64,
    pub strategy_id: i64,
    pub status: ExecutionStatus,
    pub total_symbols: u32,
    pub processed_symbols: u32,
    pub config: ExecutionConfig,
    pub results: ExecutionResults,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StrategyExecution {
    /// 실행 중 상태로 임계 시간을 넘겼는지 확인합니다.
    pub fn is_zombie(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        if self.status != ExecutionStatus::Running {
            return false;
        }
        let since = self.started_at.unwrap_or(self.created_at);
        now - since > threshold
    }

    /// 진행률 (%).
    pub fn progress_pct(&self) -> f64 {
        if self.total_symbols == 0 {
            0.0
        } else {
            self.processed_symbols as f64 / self.total_symbols as f64 * 100.0
        }
    }
}

/// 실행 기록 갱신 내용.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionUpdate {
    pub status: ExecutionStatus,
    pub total_symbols: Option<u32>,
    pub processed_symbols: Option<u32>,
    pub results: Option<ExecutionResults>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionUpdate {
    pub fn status(status: ExecutionStatus) -> Self {
        Self {
            status,
            total_symbols: None,
            processed_symbols: None,
            results: None,
            error_message: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// 실행 시작.
    pub fn started(now: DateTime<Utc>, total_symbols: u32) -> Self {
        Self {
            total_symbols: Some(total_symbols),
            processed_symbols: Some(0),
            started_at: Some(now),
            ..Self::status(ExecutionStatus::Running)
        }
    }

    /// 정상 완료.
    pub fn completed(now: DateTime<Utc>, processed: u32, results: ExecutionResults) -> Self {
        Self {
            processed_symbols: Some(processed),
            results: Some(results),
            completed_at: Some(now),
            ..Self::status(ExecutionStatus::Completed)
        }
    }

    /// 실패.
    pub fn failed(now: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            error_message: Some(reason.into()),
            completed_at: Some(now),
            ..Self::status(ExecutionStatus::Failed)
        }
    }

    /// 진행 상황만 갱신.
    pub fn progress(processed: u32) -> Self {
        Self {
            processed_symbols: Some(processed),
            ..Self::status(ExecutionStatus::Running)
        }
    }
}

/// 심볼별 평가 기록.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub execution_id: i64,
    pub symbol: String,
    pub action: String,
    pub outcome: StepOutcome,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 심볼 평가 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    OrderCreated,
    NoAction,
    Skipped,
    Error,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::OrderCreated => "order_created",
            StepOutcome::NoAction => "no_action",
            StepOutcome::Skipped => "skipped",
            StepOutcome::Error => "error",
        }
    }
}

impl FromStr for StepOutcome {
    type Err = TraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order_created" => Ok(Self::OrderCreated),
            "no_action" => Ok(Self::NoAction),
            "skipped" => Ok(Self::Skipped),
            "error" => Ok(Self::Error),
            other => Err(TraderError::InvalidInput(format!("unknown step outcome: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(status: ExecutionStatus, started_mins_ago: i64) -> StrategyExecution {
        let now = Utc::now();
        StrategyExecution {
            id: 1,
            strategy_id: 1,
            status,
            total_symbols: 4,
            processed_symbols: 1,
            config: ExecutionConfig::default(),
            results: ExecutionResults::default(),
            error_message: None,
            started_at: Some(now - Duration::minutes(started_mins_ago)),
            completed_at: None,
            created_at: now - Duration::minutes(started_mins_ago),
            updated_at: now,
        }
    }

    #[test]
    fn test_zombie_detection() {
        let threshold = Duration::minutes(30);
        assert!(execution(ExecutionStatus::Running, 31).is_zombie(Utc::now(), threshold));
        assert!(!execution(ExecutionStatus::Running, 5).is_zombie(Utc::now(), threshold));
        assert!(!execution(ExecutionStatus::Pending, 90).is_zombie(Utc::now(), threshold));
    }

    #[test]
    fn test_no_transition_out_of_final() {
        for status in [
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Stopped,
        ] {
            assert!(!status.can_transition_to(ExecutionStatus::Running));
            assert!(!status.can_transition_to(ExecutionStatus::Pending));
        }
        assert!(ExecutionStatus::Running.can_transition_to(ExecutionStatus::Failed));
    }

    #[test]
    fn test_allowed_predecessors() {
        assert_eq!(
            ExecutionStatus::allowed_predecessors(ExecutionStatus::Running),
            vec![ExecutionStatus::Pending, ExecutionStatus::Running]
        );
        assert_eq!(
            ExecutionStatus::allowed_predecessors(ExecutionStatus::Completed),
            vec![ExecutionStatus::Running]
        );
    }

    #[test]
    fn test_auto_stop() {
        let config = ExecutionConfig {
            max_runs: Some(3),
            auto_stop: true,
            ..Default::default()
        };
        assert!(!config.should_stop_after(2));
        assert!(config.should_stop_after(3));
        assert!(!ExecutionConfig::default().should_stop_after(100));
    }

    #[test]
    fn test_progress_pct() {
        assert_eq!(execution(ExecutionStatus::Running, 1).progress_pct(), 25.0);
    }
}

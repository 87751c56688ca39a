//! 틱/패스 통계.

use serde::Serialize;
use std::time::Duration;

/// 틱 한 번의 처리 통계.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickStats {
    /// 조회된 만기 주문 수
    pub listed: usize,
    /// 선점 후 실행을 시작한 주문 수
    pub dispatched: usize,
    /// 작업 풀이 가득 차 다음 틱으로 미룬 주문 수
    pub deferred: usize,
    /// 다른 워커가 먼저 선점한 주문 수
    pub lost_claims: usize,
    pub errors: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl TickStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 처리할 주문이 있었는지 여부.
    pub fn is_idle(&self) -> bool {
        self.listed == 0
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self) {
        if self.is_idle() {
            tracing::trace!("Tick idle");
            return;
        }
        tracing::info!(
            listed = self.listed,
            dispatched = self.dispatched,
            deferred = self.deferred,
            lost_claims = self.lost_claims,
            errors = self.errors,
            elapsed = format!("{:.3}s", self.elapsed.as_secs_f64()),
            "Tick completed"
        );
    }
}

/// 오케스트레이터 패스 통계.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    /// 실행 중(`is_running`) 전략 수
    pub strategies: usize,
    /// 이번 패스에서 시작한 전략 실행 수
    pub started: usize,
    /// 실행 주기가 도래하지 않은 전략 수
    pub not_due: usize,
    /// 이전 실행이 잠금을 보유해 건너뛴 전략 수
    pub skipped_locked: usize,
    /// 좀비로 판정되어 실패 처리된 실행 수
    pub zombies_failed: usize,
    /// 자동 중지된 전략 수 (좀비 정리 또는 장기 미실행)
    pub auto_stopped: usize,
    /// 삭제된 중복 대기 실행 수
    pub duplicates_pruned: usize,
    /// 동기화로 상태가 바뀐 주문/브라켓 수
    pub reconciled: usize,
    pub errors: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl PassStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self) {
        tracing::info!(
            strategies = self.strategies,
            started = self.started,
            not_due = self.not_due,
            skipped_locked = self.skipped_locked,
            zombies_failed = self.zombies_failed,
            auto_stopped = self.auto_stopped,
            duplicates_pruned = self.duplicates_pruned,
            reconciled = self.reconciled,
            errors = self.errors,
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "Orchestrator pass completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_tick() {
        let mut stats = TickStats::new();
        assert!(stats.is_idle());
        stats.listed = 3;
        assert!(!stats.is_idle());
    }
}

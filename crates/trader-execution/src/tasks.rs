//! 추적되는 백그라운드 작업.
//!
//! 주문 생성을 막지 않아야 하는 부수 작업(증거금 모드 적용 등)을 실행합니다.
//! 실패는 로그와 함께 채널로 보고되고, 종료 시 취소 후 완료를 기다립니다.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// 백그라운드 작업 실패 보고.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub name: String,
    pub error: String,
}

/// 백그라운드 작업 묶음.
#[derive(Clone)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
    token: CancellationToken,
    failures: mpsc::UnboundedSender<TaskFailure>,
}

impl BackgroundTasks {
    /// 작업 묶음과 실패 수신 채널을 생성합니다.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskFailure>) {
        Self::with_token(CancellationToken::new())
    }

    /// 상위 종료 토큰의 자식 토큰을 사용합니다.
    pub fn with_token(parent: CancellationToken) -> (Self, mpsc::UnboundedReceiver<TaskFailure>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tracker: TaskTracker::new(),
                token: parent.child_token(),
                failures: tx,
            },
            rx,
        )
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 실행 중인 작업 수.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// 작업을 실행합니다. 종료 토큰이 취소되면 작업도 중단됩니다.
    pub fn spawn<F, E>(&self, name: impl Into<String>, fut: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let name = name.into();
        let token = self.token.clone();
        let failures = self.failures.clone();

        self.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(task = %name, "Background task cancelled");
                }
                result = fut => {
                    if let Err(e) = result {
                        warn!(task = %name, error = %e, "Background task failed");
                        // 수신자가 없으면 로그로 충분
                        let _ = failures.send(TaskFailure { name, error: e.to_string() });
                    }
                }
            }
        });
    }

    /// 현재 실행 중인 작업이 모두 끝날 때까지 기다립니다. 이후에도 작업을 추가할 수 있습니다.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// 작업을 취소하고 `timeout` 동안 종료를 기다립니다. 시간 안에 끝나면 true.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.token.cancel();
        self.tracker.close();
        tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failure_reported() {
        let (tasks, mut failures) = BackgroundTasks::new();
        tasks.spawn("ok", async { Ok::<(), String>(()) });
        tasks.spawn("broken", async { Err::<(), _>("boom".to_string()) });
        tasks.wait_idle().await;

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.name, "broken");
        assert_eq!(failure.error, "boom");
        assert!(failures.try_recv().is_err());
        assert!(tasks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_work() {
        let (tasks, mut failures) = BackgroundTasks::new();
        tasks.spawn("sleeper", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err::<(), _>("should not finish")
        });
        assert_eq!(tasks.len(), 1);

        assert!(tasks.shutdown(Duration::from_secs(1)).await);
        assert!(failures.try_recv().is_err());
    }
}

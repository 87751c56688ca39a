//! 설정 관리.
//!
//! TOML 파일(선택)과 `TRADER__SECTION__KEY` 환경 변수에서 설정을 로드합니다.
//! 모든 항목에 기본값이 있으므로 설정 파일 없이도 실행할 수 있습니다.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub tick: TickConfig,
    pub orchestrator: OrchestratorConfig,
    pub execution: ExecutionSettings,
    pub paper: PaperConfig,
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// pretty, json, compact
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// 데이터베이스 설정. URL이 없으면 메모리 저장소로 실행합니다.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    /// 시작 시 마이그레이션 실행
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            connect_timeout_secs: 30,
            run_migrations: true,
        }
    }
}

/// 틱 스케줄러 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TickConfig {
    pub interval_ms: u64,
    /// 틱당 조회할 최대 예약 주문 수
    pub batch_size: usize,
    /// 동시에 실행할 최대 주문 수
    pub max_concurrency: usize,
    /// 이 시간 이상 processing에 머문 주문은 시작 시 실패 처리 (초)
    pub stale_processing_secs: i64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            batch_size: 50,
            max_concurrency: 10,
            stale_processing_secs: 600,
        }
    }
}

impl TickConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// 전략 실행 오케스트레이터 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub interval_secs: u64,
    /// running 상태로 이 시간을 넘긴 실행은 좀비로 간주 (초)
    pub zombie_timeout_secs: i64,
    /// 활성 실행 없이 마지막 성공 후 실행 주기에 더해 이 시간이 지나면 전략 자동 중지 (초)
    pub stale_strategy_grace_secs: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            zombie_timeout_secs: 30 * 60,
            stale_strategy_grace_secs: 24 * 60 * 60,
        }
    }
}

impl OrchestratorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn zombie_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.zombie_timeout_secs)
    }

    pub fn stale_strategy_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_strategy_grace_secs)
    }
}

/// 주문 실행 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// client order id 접두사
    pub client_id_prefix: String,
    /// 필터에 값이 없을 때 사용하는 최소 주문 금액 (USDT)
    pub default_min_notional: Decimal,
    /// 증거금 충분성 검사 여유분 (%)
    pub margin_buffer_pct: Decimal,
    /// 조건부 청산 주문 제출 대기 시간 (밀리초)
    pub conditional_timeout_ms: u64,
    pub margin_mode_attempts: u32,
    pub margin_mode_backoff_ms: u64,
    /// TP/SL 계산에 반영하는 수수료율 (0.0004 = 0.04%)
    pub fee_rate: Decimal,
    /// 이 값보다 큰 최소 가격 필터는 비정상으로 간주
    pub min_price_ceiling: Decimal,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            client_id_prefix: "sch".to_string(),
            default_min_notional: dec!(5),
            margin_buffer_pct: dec!(5),
            conditional_timeout_ms: 5_000,
            margin_mode_attempts: 3,
            margin_mode_backoff_ms: 500,
            fee_rate: Decimal::ZERO,
            min_price_ceiling: dec!(100000),
        }
    }
}

/// 모의 거래소 설정. 시작 시 등록할 시장 목록과 초기 잔고.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PaperConfig {
    pub initial_balance: Decimal,
    pub fee_rate: Decimal,
    pub markets: Vec<PaperMarket>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10000),
            fee_rate: dec!(0.0004),
            markets: Vec::new(),
        }
    }
}

/// 모의 시장 하나.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaperMarket {
    pub symbol: String,
    pub step_size: Decimal,
    pub tick_size: Decimal,
    #[serde(default)]
    pub min_notional: Decimal,
    pub mark_price: Decimal,
    /// 24시간 변동률 (%)
    #[serde(default)]
    pub price_change_pct: Decimal,
    #[serde(default)]
    pub quote_volume: Decimal,
}

impl ExecutionSettings {
    pub fn conditional_timeout(&self) -> Duration {
        Duration::from_millis(self.conditional_timeout_ms)
    }

    pub fn margin_mode_backoff(&self) -> Duration {
        Duration::from_millis(self.margin_mode_backoff_ms)
    }
}

impl AppConfig {
    /// 파일(선택)과 환경 변수에서 설정을 로드합니다.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("TRADER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

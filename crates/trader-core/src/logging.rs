//! tracing 기반 로깅 초기화.
//!
//! - **pretty**: 개발용
//! - **json**: 운영/로그 수집용
//! - **compact**: 한 줄 형식

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;

/// 로그 출력 형식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 로그 레벨 필터 (예: "info", "trader_execution=debug")
    pub level: String,
    pub format: LogFormat,
    /// span 진입/종료 이벤트 포함
    pub with_span_events: bool,
    /// 파일명과 줄 번호 포함
    pub with_file: bool,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            with_span_events: false,
            with_file: false,
            with_target: true,
        }
    }
}

impl LogConfig {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// 파일 설정에서 생성합니다. 형식을 해석할 수 없으면 pretty를 사용합니다.
    pub fn from_settings(settings: &LoggingConfig) -> Self {
        Self {
            level: settings.level.clone(),
            format: settings.format.parse().unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// 주어진 설정으로 전역 subscriber를 설치합니다.
///
/// `RUST_LOG`가 설정되어 있으면 설정 파일의 레벨보다 우선합니다.
///
/// ```no_run
/// use trader_core::logging::{init_logging, LogConfig, LogFormat};
///
/// init_logging(LogConfig::new("debug").with_format(LogFormat::Json)).unwrap();
/// ```
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_file(config.with_file)
        .with_line_number(config.with_file)
        .with_target(config.with_target)
        .with_span_events(span_events);

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => base.pretty().boxed(),
        LogFormat::Json => base.json().boxed(),
        LogFormat::Compact => base.compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()?;

    tracing::info!(format = ?config.format, level = %config.level, "Logging initialized");
    Ok(())
}

/// 주문 컨텍스트 필드가 포함된 span.
#[macro_export]
macro_rules! order_span {
    ($name:expr, $order_id:expr, $symbol:expr) => {
        tracing::info_span!($name, order_id = %$order_id, symbol = %$symbol)
    };
    ($name:expr, $order_id:expr, $symbol:expr, $strategy_id:expr) => {
        tracing::info_span!(
            $name,
            order_id = %$order_id,
            symbol = %$symbol,
            strategy_id = ?$strategy_id
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("COMPACT".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_from_settings_falls_back_to_pretty() {
        let settings = LoggingConfig {
            level: "debug".to_string(),
            format: "unknown".to_string(),
        };
        let config = LogConfig::from_settings(&settings);
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Pretty);
    }
}

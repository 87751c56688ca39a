//! 전략 정의와 위험/스케일링 설정.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::{ExecutionConfig, MarginMode, WorkingType};
use crate::error::TraderError;

/// 전략 종류 태그 (영속화용).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    Momentum,
    MeanReversion,
}

impl StrategyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::Momentum => "momentum",
            StrategyType::MeanReversion => "mean_reversion",
        }
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyType {
    type Err = TraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "momentum" => Ok(Self::Momentum),
            "mean_reversion" => Ok(Self::MeanReversion),
            other => Err(TraderError::Strategy(format!("unknown strategy type: {other}"))),
        }
    }
}

/// 평가 대상 심볼 선택 방식.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SymbolSelection {
    /// 고정 목록
    Whitelist { symbols: Vec<String> },
    /// 전략 종류별 동적 스캔
    Scan { limit: usize },
}

impl Default for SymbolSelection {
    fn default() -> Self {
        SymbolSelection::Scan { limit: 10 }
    }
}

/// 주문 위험 설정.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSettings {
    /// 주문당 증거금 (USDT)
    pub margin_per_order: Decimal,
    pub default_leverage: u32,
    pub max_leverage: u32,
    pub margin_mode: MarginMode,
    pub working_type: WorkingType,
    /// 가격 변동률 기준 TP/SL 사용
    pub price_tp_sl_enabled: bool,
    pub tp_percent: Decimal,
    pub sl_percent: Decimal,
    /// 증거금 수익률 기준 TP/SL 사용 (가격 기준보다 우선)
    pub margin_tp_sl_enabled: bool,
    pub margin_tp_percent: Decimal,
    pub margin_sl_percent: Decimal,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            margin_per_order: dec!(20),
            default_leverage: 5,
            max_leverage: 20,
            margin_mode: MarginMode::Isolated,
            working_type: WorkingType::MarkPrice,
            price_tp_sl_enabled: false,
            tp_percent: dec!(2),
            sl_percent: dec!(1),
            margin_tp_sl_enabled: true,
            margin_tp_percent: dec!(20),
            margin_sl_percent: dec!(10),
        }
    }
}

/// 수익 기반 추가 진입 및 전체 청산 설정.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingSettings {
    pub enabled: bool,
    /// 추가 진입을 시작하는 레버리지 반영 수익률 (%)
    pub profit_threshold_pct: Decimal,
    pub max_scale_ins: u32,
    /// 추가 진입 증거금 (USDT)
    pub scale_in_margin: Decimal,
    /// 전체 익절 수익률 (%)
    pub overall_tp_pct: Option<Decimal>,
    /// 전체 손절 손실률 (%, 양수)
    pub overall_sl_pct: Option<Decimal>,
    /// 최근 청산 후 평가를 건너뛰는 시간 (초)
    pub recent_close_window_secs: i64,
}

impl Default for ScalingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            profit_threshold_pct: dec!(10),
            max_scale_ins: 2,
            scale_in_margin: dec!(10),
            overall_tp_pct: Some(dec!(50)),
            overall_sl_pct: Some(dec!(30)),
            recent_close_window_secs: 300,
        }
    }
}

impl ScalingSettings {
    pub fn recent_close_window(&self) -> Duration {
        Duration::seconds(self.recent_close_window_secs)
    }
}

/// 자동매매 전략.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,
    pub name: String,
    pub kind: StrategyType,
    pub is_running: bool,
    /// 실행 주기 (초)
    pub run_interval_secs: i64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub run_count: u32,
    pub symbols: SymbolSelection,
    pub risk: RiskSettings,
    pub scaling: ScalingSettings,
    pub execution: ExecutionConfig,
}

impl Strategy {
    /// 기본 설정으로 새 전략을 생성합니다.
    pub fn new(id: i64, name: impl Into<String>, kind: StrategyType) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            is_running: true,
            run_interval_secs: 300,
            last_run_at: None,
            run_count: 0,
            symbols: SymbolSelection::default(),
            risk: RiskSettings::default(),
            scaling: ScalingSettings::default(),
            execution: ExecutionConfig::default(),
        }
    }

    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = SymbolSelection::Whitelist { symbols };
        self
    }

    pub fn with_interval_secs(mut self, secs: i64) -> Self {
        self.run_interval_secs = secs;
        self
    }

    pub fn run_interval(&self) -> Duration {
        Duration::seconds(self.run_interval_secs.max(1))
    }

    /// 실행 시점이 되었는지 확인합니다.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_run_at {
            None => true,
            Some(last) => now >= last + self.run_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_check() {
        let now = Utc::now();
        let mut strategy = Strategy::new(1, "mom", StrategyType::Momentum).with_interval_secs(60);
        assert!(strategy.is_due(now));

        strategy.last_run_at = Some(now - Duration::seconds(30));
        assert!(!strategy.is_due(now));

        strategy.last_run_at = Some(now - Duration::seconds(60));
        assert!(strategy.is_due(now));
    }

    #[test]
    fn test_symbol_selection_serde() {
        let selection = SymbolSelection::Whitelist {
            symbols: vec!["BTCUSDT".to_string()],
        };
        let json = serde_json::to_string(&selection).unwrap();
        assert!(json.contains("\"mode\":\"whitelist\""));
        let back: SymbolSelection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, selection);
    }
}

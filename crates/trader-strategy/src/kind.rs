//! 닫힌 전략 종류 열거형.

use trader_core::{AgentState, MarketSnapshot, StrategyDecision, StrategyType};

use crate::strategies::{MeanReversionStrategy, MomentumStrategy};

/// 실행 가능한 전략 구현.
///
/// 전략 결정은 순수 함수입니다. 거래소 조회와 주문 생성은 호출자가 담당합니다.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyKind {
    Momentum(MomentumStrategy),
    MeanReversion(MeanReversionStrategy),
}

impl StrategyKind {
    /// 기본 설정으로 전략을 생성합니다.
    pub fn default_for(strategy_type: StrategyType) -> Self {
        match strategy_type {
            StrategyType::Momentum => StrategyKind::Momentum(MomentumStrategy::default()),
            StrategyType::MeanReversion => {
                StrategyKind::MeanReversion(MeanReversionStrategy::default())
            }
        }
    }

    pub fn strategy_type(&self) -> StrategyType {
        match self {
            StrategyKind::Momentum(_) => StrategyType::Momentum,
            StrategyKind::MeanReversion(_) => StrategyType::MeanReversion,
        }
    }

    /// 동적 심볼 선택.
    pub fn scan(&self, snapshots: &[MarketSnapshot], limit: usize) -> Vec<String> {
        match self {
            StrategyKind::Momentum(s) => s.scan(snapshots, limit),
            StrategyKind::MeanReversion(s) => s.scan(snapshots, limit),
        }
    }

    pub fn decide(&self, snapshot: &MarketSnapshot, state: &AgentState) -> StrategyDecision {
        match self {
            StrategyKind::Momentum(s) => s.decide(snapshot, state),
            StrategyKind::MeanReversion(s) => s.decide(snapshot, state),
        }
    }
}

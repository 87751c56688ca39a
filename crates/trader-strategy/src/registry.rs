//! 전략 레지스트리.
//!
//! 시작 시 명시적으로 구성해 `Arc`로 오케스트레이터에 주입합니다.

use std::collections::HashMap;
use trader_core::StrategyType;

use crate::kind::StrategyKind;

/// 전략 종류별 구현 테이블.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    kinds: HashMap<StrategyType, StrategyKind>,
}

impl StrategyRegistry {
    /// 빈 레지스트리.
    pub fn new() -> Self {
        Self::default()
    }

    /// 모든 내장 전략을 기본 설정으로 등록합니다.
    pub fn with_defaults() -> Self {
        Self::new()
            .with(StrategyKind::default_for(StrategyType::Momentum))
            .with(StrategyKind::default_for(StrategyType::MeanReversion))
    }

    /// 같은 종류가 이미 있으면 교체합니다.
    pub fn with(mut self, kind: StrategyKind) -> Self {
        self.register(kind);
        self
    }

    pub fn register(&mut self, kind: StrategyKind) {
        self.kinds.insert(kind.strategy_type(), kind);
    }

    pub fn get(&self, strategy_type: StrategyType) -> Option<&StrategyKind> {
        self.kinds.get(&strategy_type)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::{MomentumConfig, MomentumStrategy};
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults_cover_all_types() {
        let registry = StrategyRegistry::with_defaults();
        assert_eq!(registry.len(), 2);
        assert!(registry.get(StrategyType::Momentum).is_some());
        assert!(registry.get(StrategyType::MeanReversion).is_some());
        assert!(StrategyRegistry::new().get(StrategyType::Momentum).is_none());
    }

    #[test]
    fn test_register_replaces() {
        let custom = StrategyKind::Momentum(MomentumStrategy::new(MomentumConfig {
            entry_threshold_pct: dec!(10),
            ..Default::default()
        }));
        let registry = StrategyRegistry::with_defaults().with(custom.clone());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(StrategyType::Momentum), Some(&custom));
    }
}

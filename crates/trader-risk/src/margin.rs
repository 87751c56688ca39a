//! 증거금 수익률 기반 TP/SL 계산.
//!
//! 레버리지 포지션에서 "증거금 대비 r% 수익"을 가격으로 환산합니다.
//! 진입과 청산 양쪽의 수수료를 반영합니다 (수수료율 `f`).
//!
//! - 롱: `TP = (E(1+f) + E·r/L) / (1−f)`, `SL = (E(1+f) − E·s/L) / (1−f)`
//! - 숏: `TP = (E(1−f) − E·r/L) / (1+f)`, `SL = (E(1−f) + E·s/L) / (1+f)`
//!
//! 수수료율 0, BUY@100, 레버리지 10, TP 20%, SL 10% → TP 102, SL 99.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use trader_core::{BracketMode, BracketSpec, OrderSide, Price};

use crate::error::{RiskError, RiskResult};

/// 계산된 브라켓 목표가.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BracketTargets {
    pub take_profit: Option<Price>,
    pub stop_loss: Option<Price>,
}

impl BracketTargets {
    pub fn is_empty(&self) -> bool {
        self.take_profit.is_none() && self.stop_loss.is_none()
    }

    /// 각 목표가에 변환 함수를 적용합니다 (틱 반올림 등).
    pub fn map(self, f: impl Fn(Price) -> Price) -> Self {
        Self {
            take_profit: self.take_profit.map(&f),
            stop_loss: self.stop_loss.map(&f),
        }
    }

    /// 진입가 기준 순서를 검증합니다.
    ///
    /// 롱은 `SL < 진입가 < TP`, 숏은 `TP < 진입가 < SL`이어야 하고 모든 목표가는 양수입니다.
    pub fn validate(&self, side: OrderSide, entry: Price) -> RiskResult<()> {
        let positive = [self.take_profit, self.stop_loss]
            .into_iter()
            .flatten()
            .all(|p| p > Decimal::ZERO);
        let ordered = match side {
            OrderSide::Buy => {
                self.take_profit.map_or(true, |tp| tp > entry)
                    && self.stop_loss.map_or(true, |sl| sl < entry)
            }
            OrderSide::Sell => {
                self.take_profit.map_or(true, |tp| tp < entry)
                    && self.stop_loss.map_or(true, |sl| sl > entry)
            }
        };
        if positive && ordered {
            Ok(())
        } else {
            Err(RiskError::InvalidOrdering {
                side: side.as_str(),
                entry,
                tp: self.take_profit,
                sl: self.stop_loss,
            })
        }
    }
}

/// 증거금 리스크 계산기.
#[derive(Debug, Clone, Copy)]
pub struct MarginRiskCalculator {
    fee_rate: Decimal,
}

impl Default for MarginRiskCalculator {
    fn default() -> Self {
        Self {
            fee_rate: Decimal::ZERO,
        }
    }
}

impl MarginRiskCalculator {
    /// 수수료율(예: 0.0004)로 계산기를 생성합니다.
    pub fn new(fee_rate: Decimal) -> RiskResult<Self> {
        if fee_rate < Decimal::ZERO || fee_rate >= Decimal::ONE {
            return Err(RiskError::InvalidFeeRate(fee_rate));
        }
        Ok(Self { fee_rate })
    }

    pub fn fee_rate(&self) -> Decimal {
        self.fee_rate
    }

    /// 증거금 수익률 기준 목표가.
    pub fn margin_return_targets(
        &self,
        side: OrderSide,
        entry: Price,
        leverage: u32,
        tp_percent: Option<Decimal>,
        sl_percent: Option<Decimal>,
    ) -> RiskResult<BracketTargets> {
        if entry <= Decimal::ZERO {
            return Err(RiskError::InvalidEntryPrice(entry));
        }
        let lev = Decimal::from(leverage.max(1));
        let f = self.fee_rate;
        let move_for = |pct: Decimal| entry * pct / dec!(100) / lev;

        let targets = match side {
            OrderSide::Buy => BracketTargets {
                take_profit: tp_percent
                    .map(|r| (entry * (Decimal::ONE + f) + move_for(r)) / (Decimal::ONE - f)),
                stop_loss: sl_percent
                    .map(|s| (entry * (Decimal::ONE + f) - move_for(s)) / (Decimal::ONE - f)),
            },
            OrderSide::Sell => BracketTargets {
                take_profit: tp_percent
                    .map(|r| (entry * (Decimal::ONE - f) - move_for(r)) / (Decimal::ONE + f)),
                stop_loss: sl_percent
                    .map(|s| (entry * (Decimal::ONE - f) + move_for(s)) / (Decimal::ONE + f)),
            },
        };
        Ok(targets)
    }

    /// 가격 변동률 기준 목표가.
    pub fn price_percent_targets(
        &self,
        side: OrderSide,
        entry: Price,
        tp_percent: Option<Decimal>,
        sl_percent: Option<Decimal>,
    ) -> RiskResult<BracketTargets> {
        if entry <= Decimal::ZERO {
            return Err(RiskError::InvalidEntryPrice(entry));
        }
        let sign = side.sign();
        Ok(BracketTargets {
            take_profit: tp_percent.map(|p| entry * (Decimal::ONE + sign * p / dec!(100))),
            stop_loss: sl_percent.map(|p| entry * (Decimal::ONE - sign * p / dec!(100))),
        })
    }

    /// 브라켓 설정으로부터 목표가를 산출합니다. 절대 가격이 비율보다 우선합니다.
    pub fn targets_for(
        &self,
        side: OrderSide,
        entry: Price,
        leverage: u32,
        spec: &BracketSpec,
    ) -> RiskResult<BracketTargets> {
        let computed = match spec.mode {
            BracketMode::MarginReturn => {
                self.margin_return_targets(side, entry, leverage, spec.tp_percent, spec.sl_percent)?
            }
            BracketMode::PricePercent => {
                self.price_percent_targets(side, entry, spec.tp_percent, spec.sl_percent)?
            }
        };
        Ok(BracketTargets {
            take_profit: spec.tp_price.or(computed.take_profit),
            stop_loss: spec.sl_price.or(computed.stop_loss),
        })
    }
}

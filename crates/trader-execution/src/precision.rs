//! 수량/가격 정밀도 보정과 최소 주문 금액 검사.
//!
//! 제공 기능:
//! - 거래소 필터 정합성 검사 및 비정상 호가 단위 보정
//! - 수량 올림(step), 가격 반올림(tick) - 두 연산 모두 멱등
//! - 최소 주문 금액 미달 시 수량 상향
//! - 필터 캐시(저장소) → 거래소 순 필터 로딩

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{debug, warn};
use trader_core::{round_to_increment, ExecutionSettings, RoundMethod, SymbolFilters};
use trader_data::Store;
use trader_exchange::FuturesExchange;

use crate::error::{ExecutionError, ExecutionResult};

/// 추론된 호가 단위의 하한.
const MIN_INFERRED_TICK: Decimal = dec!(0.00000001);

/// 호가 단위가 가격의 이 비율(%) 이상이면 비정상으로 간주합니다.
const IMPLAUSIBLE_TICK_PCT: Decimal = dec!(1);

/// 보정 입력.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustRequest {
    pub quantity: Decimal,
    /// 지정가 또는 트리거 가격
    pub price: Option<Decimal>,
    /// 주문 금액 계산 기준 가격 (가격이 없으면 마크 가격)
    pub reference_price: Decimal,
    pub reduce_only: bool,
}

/// 보정 결과.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustedOrder {
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub reference_price: Decimal,
    pub notional: Decimal,
    /// 최소 주문 금액 때문에 수량을 올렸는지 여부
    pub bumped: bool,
}

// ==================== 순수 함수 ====================

/// 가격 크기로부터 호가 단위를 추론합니다 (유효 숫자 5자리).
pub fn infer_tick_size(price: Decimal) -> Decimal {
    if price <= Decimal::ZERO {
        return MIN_INFERRED_TICK;
    }

    let mut magnitude: i32 = 0;
    let mut p = price;
    while p >= Decimal::TEN {
        p /= Decimal::TEN;
        magnitude += 1;
    }
    while p < Decimal::ONE {
        p *= Decimal::TEN;
        magnitude -= 1;
    }

    let exponent = magnitude - 4;
    let tick = if exponent >= 0 {
        Decimal::from(10i64.pow(exponent.unsigned_abs()))
    } else {
        Decimal::new(1, exponent.unsigned_abs().min(28))
    };
    tick.max(MIN_INFERRED_TICK)
}

/// 필터 형식을 검증하고 비정상 값을 보정합니다.
///
/// - 0 이하 단위, 뒤집힌 범위 → `InvalidFilters`
/// - 호가 단위 ≥ 가격의 1% → 가격 크기로 추론한 단위로 교체
/// - 최소 가격이 상한(`ceiling`) 또는 현재 가격보다 크면 0으로 초기화
pub fn sanitize_filters(
    filters: &SymbolFilters,
    reference_price: Decimal,
    ceiling: Decimal,
) -> ExecutionResult<SymbolFilters> {
    filters
        .validate()
        .map_err(|e| ExecutionError::InvalidFilters(e.to_string()))?;

    let mut sanitized = filters.clone();
    if reference_price > Decimal::ZERO {
        let limit = reference_price * IMPLAUSIBLE_TICK_PCT / Decimal::ONE_HUNDRED;
        if sanitized.tick_size >= limit {
            let inferred = infer_tick_size(reference_price);
            warn!(
                symbol = %filters.symbol,
                tick_size = %filters.tick_size,
                inferred = %inferred,
                price = %reference_price,
                "Implausible tick size, inferring from price"
            );
            sanitized.tick_size = inferred;
        }
    }

    let above_price = reference_price > Decimal::ZERO && sanitized.min_price > reference_price;
    if sanitized.min_price > ceiling || above_price {
        warn!(
            symbol = %filters.symbol,
            min_price = %sanitized.min_price,
            "Implausible min price, ignoring"
        );
        sanitized.min_price = Decimal::ZERO;
    }

    Ok(sanitized)
}

/// 수량을 step 단위로 올리고 최소 수량 이상으로 맞춥니다.
pub fn quantize_quantity(filters: &SymbolFilters, quantity: Decimal) -> Decimal {
    let ceiled = round_to_increment(quantity, filters.step_size, RoundMethod::Ceil);
    let min_qty = round_to_increment(filters.min_qty, filters.step_size, RoundMethod::Ceil);
    ceiled.max(min_qty)
}

/// 가격을 tick 단위로 반올림합니다.
pub fn quantize_price(filters: &SymbolFilters, price: Decimal) -> Decimal {
    round_to_increment(price, filters.tick_size, RoundMethod::Round)
}

/// step 자릿수에서 잘라낸 뒤 step 배수로 내립니다. 정밀도 재시도용.
pub fn truncate_quantity(filters: &SymbolFilters, quantity: Decimal) -> Decimal {
    let scale = filters.step_size.normalize().scale();
    let truncated = quantity.round_dp_with_strategy(scale, RoundingStrategy::ToZero);
    let floored = round_to_increment(truncated, filters.step_size, RoundMethod::Floor);
    let min_qty = round_to_increment(filters.min_qty, filters.step_size, RoundMethod::Ceil);
    floored.max(min_qty)
}

/// 한 자리 더 거친 호가 단위로 반올림합니다.
pub fn coarser_price(filters: &SymbolFilters, price: Decimal) -> Decimal {
    round_to_increment(price, filters.tick_size * Decimal::TEN, RoundMethod::Round)
}

/// 주문 금액이 `floor` 이상이 되도록 수량을 올립니다.
///
/// 반환값은 (수량, 상향 여부). 필요한 수량이 최대 수량을 넘으면 `NotionalUnreachable`.
pub fn apply_notional_floor(
    filters: &SymbolFilters,
    quantity: Decimal,
    reference_price: Decimal,
    floor: Decimal,
) -> ExecutionResult<(Decimal, bool)> {
    if reference_price <= Decimal::ZERO {
        return Err(ExecutionError::InvalidOrder(format!(
            "{}: no reference price for notional check",
            filters.symbol
        )));
    }
    if quantity * reference_price >= floor {
        return Ok((quantity, false));
    }

    let mut required = round_to_increment(floor / reference_price, filters.step_size, RoundMethod::Ceil);
    // 나눗셈 절삭으로 경계에서 한 step 모자랄 수 있음
    while required * reference_price < floor {
        required += filters.step_size;
    }
    let required = required.max(quantity);

    if required > filters.max_qty {
        return Err(ExecutionError::NotionalUnreachable {
            floor,
            required,
            max_qty: filters.max_qty,
        });
    }
    Ok((required, true))
}

// ==================== PrecisionAdjuster ====================

/// 필터 로딩과 주문 보정.
pub struct PrecisionAdjuster {
    exchange: Arc<dyn FuturesExchange>,
    store: Arc<dyn Store>,
    settings: ExecutionSettings,
}

impl PrecisionAdjuster {
    pub fn new(
        exchange: Arc<dyn FuturesExchange>,
        store: Arc<dyn Store>,
        settings: ExecutionSettings,
    ) -> Self {
        Self {
            exchange,
            store,
            settings,
        }
    }

    /// 심볼에 적용할 최소 주문 금액.
    pub fn notional_floor(&self, filters: &SymbolFilters) -> Decimal {
        filters.min_notional.max(self.settings.default_min_notional)
    }

    /// 필터를 로드합니다.
    ///
    /// `refresh`가 false면 저장소 캐시를 먼저 사용합니다. 거래소에서 받은 필터는 캐시에 기록합니다.
    pub async fn load_filters(&self, symbol: &str, refresh: bool) -> ExecutionResult<SymbolFilters> {
        let cached = self.store.get_symbol_filters(symbol).await?;
        if !refresh {
            if let Some(filters) = cached {
                return Ok(filters);
            }
        }

        match self.exchange.get_symbol_filters(symbol).await {
            Ok(filters) => {
                if let Err(e) = self.store.upsert_symbol_filters(filters.clone()).await {
                    warn!(symbol, error = %e, "Failed to cache symbol filters");
                }
                Ok(filters)
            }
            Err(e) => {
                warn!(symbol, error = %e, "Failed to load symbol filters from exchange");
                cached.ok_or_else(|| ExecutionError::FiltersUnavailable(symbol.to_string()))
            }
        }
    }

    /// 주어진 필터로 보정합니다. `truncate`면 올림 대신 절삭 후 최소 금액을 다시 맞춥니다.
    pub fn adjust_with(
        &self,
        filters: &SymbolFilters,
        request: AdjustRequest,
        truncate: bool,
    ) -> ExecutionResult<AdjustedOrder> {
        let filters = sanitize_filters(filters, request.reference_price, self.settings.min_price_ceiling)?;

        let quantity = if truncate {
            truncate_quantity(&filters, request.quantity)
        } else {
            quantize_quantity(&filters, request.quantity)
        };
        let price = request.price.map(|p| quantize_price(&filters, p));
        let reference_price = price.unwrap_or(request.reference_price);

        let (quantity, bumped) = if request.reduce_only {
            (quantity, false)
        } else {
            apply_notional_floor(&filters, quantity, reference_price, self.notional_floor(&filters))?
        };

        if quantity > filters.max_qty {
            return Err(ExecutionError::InvalidOrder(format!(
                "{}: quantity {} exceeds max {}",
                filters.symbol, quantity, filters.max_qty
            )));
        }

        if bumped {
            debug!(
                symbol = %filters.symbol,
                from = %request.quantity,
                to = %quantity,
                "Quantity raised to meet min notional"
            );
        }

        Ok(AdjustedOrder {
            quantity,
            price,
            reference_price,
            notional: quantity * reference_price,
            bumped,
        })
    }

    /// 필터를 로드하여 보정합니다. 사용한 필터도 함께 반환합니다.
    pub async fn adjust(
        &self,
        symbol: &str,
        request: AdjustRequest,
        refresh: bool,
    ) -> ExecutionResult<(SymbolFilters, AdjustedOrder)> {
        let filters = self.load_filters(symbol, refresh).await?;
        let adjusted = self.adjust_with(&filters, request, false)?;
        let filters = sanitize_filters(&filters, request.reference_price, self.settings.min_price_ceiling)?;
        Ok((filters, adjusted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trader_data::{FilterStore, InMemoryStore};
    use trader_exchange::SimulatedFuturesExchange;

    fn abc() -> SymbolFilters {
        SymbolFilters::new("ABCUSDT", dec!(0.1), dec!(0.0001), dec!(5))
    }

    fn adjuster(exchange: SimulatedFuturesExchange, store: Arc<InMemoryStore>) -> PrecisionAdjuster {
        PrecisionAdjuster::new(Arc::new(exchange), store, ExecutionSettings::default())
    }

    #[test]
    fn test_abc_example() {
        let filters = abc();
        let qty = quantize_quantity(&filters, dec!(0.23));
        assert_eq!(qty, dec!(0.3));

        let (qty, bumped) = apply_notional_floor(&filters, qty, dec!(2), dec!(5)).unwrap();
        assert_eq!(qty, dec!(2.5));
        assert!(bumped);
        assert!(qty * dec!(2) >= dec!(5));
    }

    #[test]
    fn test_notional_unreachable() {
        let filters = abc().with_qty_bounds(dec!(0), dec!(1));
        let err = apply_notional_floor(&filters, dec!(0.3), dec!(2), dec!(5)).unwrap_err();
        assert!(matches!(err, ExecutionError::NotionalUnreachable { .. }));
    }

    #[test]
    fn test_min_qty_raise() {
        let filters = abc().with_qty_bounds(dec!(1), dec!(1000));
        assert_eq!(quantize_quantity(&filters, dec!(0.2)), dec!(1));
    }

    #[test]
    fn test_infer_tick_size() {
        assert_eq!(infer_tick_size(dec!(2)), dec!(0.0001));
        assert_eq!(infer_tick_size(dec!(65000)), dec!(1));
        assert_eq!(infer_tick_size(dec!(0.05)), dec!(0.000001));
        assert_eq!(infer_tick_size(dec!(0.0000001)), MIN_INFERRED_TICK);
    }

    #[test]
    fn test_sanitize_implausible_tick_and_min_price() {
        let filters = SymbolFilters::new("ABCUSDT", dec!(0.1), dec!(0.1), dec!(5))
            .with_price_bounds(dec!(500000), Decimal::MAX);
        let sanitized = sanitize_filters(&filters, dec!(2), dec!(100000)).unwrap();
        assert_eq!(sanitized.tick_size, dec!(0.0001));
        assert_eq!(sanitized.min_price, Decimal::ZERO);

        let untouched = sanitize_filters(&abc(), dec!(2), dec!(100000)).unwrap();
        assert_eq!(untouched, abc());
    }

    #[test]
    fn test_sanitize_rejects_malformed() {
        let filters = SymbolFilters::new("ABCUSDT", dec!(0), dec!(0.0001), dec!(5));
        assert!(matches!(
            sanitize_filters(&filters, dec!(2), dec!(100000)),
            Err(ExecutionError::InvalidFilters(_))
        ));
    }

    #[test]
    fn test_truncate_and_coarser() {
        let filters = abc();
        assert_eq!(truncate_quantity(&filters, dec!(2.57)), dec!(2.5));
        assert_eq!(coarser_price(&filters, dec!(2.0123)), dec!(2.012));
    }

    #[test]
    fn test_adjust_with_reduce_only_skips_floor() {
        let adj = adjuster(SimulatedFuturesExchange::default(), Arc::new(InMemoryStore::new()));
        let request = AdjustRequest {
            quantity: dec!(0.23),
            price: None,
            reference_price: dec!(2),
            reduce_only: true,
        };
        let adjusted = adj.adjust_with(&abc(), request, false).unwrap();
        assert_eq!(adjusted.quantity, dec!(0.3));
        assert!(!adjusted.bumped);

        let adjusted = adj
            .adjust_with(&abc(), AdjustRequest { reduce_only: false, ..request }, false)
            .unwrap();
        assert_eq!(adjusted.quantity, dec!(2.5));
        assert_eq!(adjusted.notional, dec!(5.0));
    }

    #[tokio::test]
    async fn test_load_filters_caches_exchange_value() {
        let exchange = SimulatedFuturesExchange::default();
        exchange.add_market(abc(), dec!(2)).await;
        let store = Arc::new(InMemoryStore::new());
        let adj = adjuster(exchange, store.clone());

        let filters = adj.load_filters("ABCUSDT", false).await.unwrap();
        assert_eq!(filters, abc());
        assert_eq!(store.get_symbol_filters("ABCUSDT").await.unwrap(), Some(abc()));

        let err = adj.load_filters("NOPEUSDT", false).await.unwrap_err();
        assert!(matches!(err, ExecutionError::FiltersUnavailable(_)));
    }

    proptest::proptest! {
        #[test]
        fn prop_quantize_is_idempotent(raw in 1i64..10_000_000, scale in 0u32..6) {
            let filters = abc();
            let qty = Decimal::new(raw, scale);
            let once = quantize_quantity(&filters, qty);
            proptest::prop_assert_eq!(quantize_quantity(&filters, once), once);

            let price = quantize_price(&filters, qty);
            proptest::prop_assert_eq!(quantize_price(&filters, price), price);
        }

        #[test]
        fn prop_notional_floor_met(raw in 1i64..100_000, price_raw in 1i64..1_000_000) {
            let filters = abc();
            let qty = quantize_quantity(&filters, Decimal::new(raw, 3));
            let price = Decimal::new(price_raw, 4);
            let (adjusted, _) = apply_notional_floor(&filters, qty, price, dec!(5)).unwrap();
            proptest::prop_assert!(adjusted * price >= dec!(5));
            proptest::prop_assert!(adjusted >= qty);
            proptest::prop_assert!((adjusted % filters.step_size).is_zero());
        }
    }
}

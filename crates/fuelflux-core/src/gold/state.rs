use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, MathematicalOps};
use tracing::warn;

use crate::types::{
    round_price, round_stat, within_limit, FuelType, GoldStateAnalytics, SilverRecord, STAT_SCALE,
    STD_DEV_LIMIT,
};

/// Sums without panicking; `None` once the total leaves `Decimal`'s range.
pub(crate) fn checked_sum<I>(values: I) -> Option<Decimal>
where
    I: IntoIterator<Item = Decimal>,
{
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |total, value| total.checked_add(value))
}

/// Sample standard deviation (n - 1 denominator), rounded to the stat scale.
/// A single observation has a deviation of exactly zero. `None` when the
/// intermediate sums overflow.
pub fn sample_std_dev(values: &[Decimal]) -> Option<Decimal> {
    if values.len() < 2 {
        return Some(Decimal::new(0, STAT_SCALE));
    }
    let count = Decimal::from(values.len());
    let mean = checked_sum(values.iter().copied())?.checked_div(count)?;
    let squares = values.iter().try_fold(Decimal::ZERO, |total, value| {
        let delta = value.checked_sub(mean)?;
        total.checked_add(delta.checked_mul(delta)?)
    })?;
    let variance = squares.checked_div(count - Decimal::ONE)?;
    Some(round_stat(variance.sqrt()?))
}

#[derive(Default)]
struct StateGroup<'a> {
    state_name: Option<&'a str>,
    prices_by_city: BTreeMap<&'a str, Decimal>,
}

/// Per-state statistics for one report date. Groups without rows produce
/// nothing; every emitted row is a pure function of its silver rows.
pub fn aggregate_states(
    rows: &[SilverRecord],
    report_date: NaiveDate,
    computed_at: DateTime<Utc>,
) -> Vec<GoldStateAnalytics> {
    let mut groups: BTreeMap<(&str, FuelType), StateGroup<'_>> = BTreeMap::new();

    for row in rows.iter().filter(|row| row.applicable_on == report_date) {
        let group = groups
            .entry((row.state_id.as_str(), row.fuel_type))
            .or_default();
        // Deterministic display name regardless of input order.
        if let Some(name) = row.state_name.as_deref() {
            if group.state_name.map_or(true, |current| name > current) {
                group.state_name = Some(name);
            }
        }
        group.prices_by_city.insert(row.city_id.as_str(), row.retail_price);
    }

    groups
        .into_iter()
        .filter(|(_, group)| !group.prices_by_city.is_empty())
        .filter_map(|((state_id, fuel_type), group)| {
            let prices: Vec<Decimal> = group.prices_by_city.values().copied().collect();
            let count = Decimal::from(prices.len());
            let stats = checked_sum(prices.iter().copied())
                .and_then(|sum| sum.checked_div(count))
                .zip(sample_std_dev(&prices))
                .filter(|(_, std_dev)| within_limit(*std_dev, STD_DEV_LIMIT));
            let Some((mean, std_dev)) = stats else {
                warn!(state_id, %fuel_type, %report_date, "Skipping state aggregate that does not fit its columns");
                return None;
            };
            let min_price = prices.iter().copied().min()?;
            let max_price = prices.iter().copied().max()?;

            Some(GoldStateAnalytics {
                state_id: state_id.to_string(),
                state_name: group.state_name.map(str::to_string),
                report_date,
                fuel_type,
                avg_price: round_price(mean),
                min_price: round_price(min_price),
                max_price: round_price(max_price),
                price_std_dev: std_dev,
                city_count: prices.len() as i32,
                computed_timestamp: computed_at,
            })
        })
        .collect()
}

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use super::state::checked_sum;
use crate::types::{
    price_in_range, round_price, round_stat, within_limit, FuelType, GoldPriceTrend, SilverRecord,
    SLOPE_LIMIT,
};

/// Inclusive span of business dates a trend is fitted over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrendWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TrendWindow {
    /// The `days` calendar days ending at (and including) `end`. `None` when
    /// the start would fall before the earliest representable date.
    pub fn trailing(end: NaiveDate, days: u32) -> Option<Self> {
        let span = TimeDelta::try_days(i64::from(days.max(1)) - 1)?;
        Some(Self {
            start: end.checked_sub_signed(span)?,
            end,
        })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    fn offset(&self, date: NaiveDate) -> Decimal {
        Decimal::from((date - self.start).num_days())
    }
}

/// Least-squares slope of `(x, y)` points. `None` when every x is equal or
/// the sums overflow.
pub fn regression_slope(points: &[(Decimal, Decimal)]) -> Option<Decimal> {
    if points.len() < 2 {
        return None;
    }
    let count = Decimal::from(points.len());
    let mean_x = checked_sum(points.iter().map(|(x, _)| *x))?.checked_div(count)?;
    let mean_y = checked_sum(points.iter().map(|(_, y)| *y))?.checked_div(count)?;

    let mut covariance = Decimal::ZERO;
    let mut spread = Decimal::ZERO;
    for (x, y) in points {
        let dx = x.checked_sub(mean_x)?;
        let dy = y.checked_sub(mean_y)?;
        covariance = covariance.checked_add(dx.checked_mul(dy)?)?;
        spread = spread.checked_add(dx.checked_mul(dx)?)?;
    }
    if spread.is_zero() {
        return None;
    }
    covariance.checked_div(spread)
}

struct Series<'a> {
    city_name: Option<&'a str>,
    state_id: &'a str,
    points: BTreeMap<NaiveDate, Decimal>,
}

/// One trend row per `(city, fuel)` series with at least `min_points`
/// distinct dates inside the window. Shorter series are skipped.
pub fn compute_trends(
    rows: &[SilverRecord],
    window: TrendWindow,
    min_points: usize,
    computed_at: DateTime<Utc>,
) -> Vec<GoldPriceTrend> {
    let min_points = min_points.max(2);
    let mut series: BTreeMap<(&str, FuelType), Series<'_>> = BTreeMap::new();

    for row in rows.iter().filter(|row| window.contains(row.applicable_on)) {
        let entry = series
            .entry((row.city_id.as_str(), row.fuel_type))
            .or_insert_with(|| Series {
                city_name: None,
                state_id: row.state_id.as_str(),
                points: BTreeMap::new(),
            });
        if entry.city_name.is_none() {
            entry.city_name = row.city_name.as_deref();
        }
        entry.points.insert(row.applicable_on, row.retail_price);
    }

    let mut trends = Vec::new();
    for ((city_id, fuel_type), series) in series {
        if series.points.len() < min_points {
            continue;
        }
        let prices: Vec<Decimal> = series.points.values().copied().collect();
        let xy: Vec<(Decimal, Decimal)> = series
            .points
            .iter()
            .map(|(date, price)| (window.offset(*date), *price))
            .collect();

        let (Some(start_price), Some(end_price)) = (prices.first().copied(), prices.last().copied())
        else {
            continue;
        };
        let steps = Decimal::from(prices.len() - 1);
        let changes = (
            regression_slope(&xy),
            prices
                .windows(2)
                .try_fold(Decimal::ZERO, |total, pair| {
                    total.checked_add(pair[1].checked_sub(pair[0])?)
                })
                .and_then(|sum| sum.checked_div(steps)),
            end_price.checked_sub(start_price),
        );
        let (Some(slope), Some(daily_change), Some(total_change)) = changes else {
            warn!(city_id, %fuel_type, "Skipping price trend that cannot be fitted");
            continue;
        };
        let (slope, daily_change, total_change) =
            (round_stat(slope), round_stat(daily_change), round_price(total_change));
        if !(within_limit(slope, SLOPE_LIMIT)
            && within_limit(daily_change, SLOPE_LIMIT)
            && price_in_range(total_change))
        {
            warn!(city_id, %fuel_type, "Skipping price trend that does not fit its columns");
            continue;
        }
        trends.push(GoldPriceTrend {
            city_id: city_id.to_string(),
            city_name: series.city_name.map(str::to_string),
            state_id: series.state_id.to_string(),
            fuel_type,
            trend_start_date: window.start,
            trend_end_date: window.end,
            days_count: prices.len() as i32,
            price_trend_slope: slope,
            avg_daily_change: daily_change,
            total_change,
            start_price,
            end_price,
            computed_timestamp: computed_at,
        });
    }
    trends
}

//! National roll-up of the gold state analytics for one report date.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::StoreError;
use crate::store::WarehouseStore;
use crate::types::{round_price, FuelType, GoldStateAnalytics};

#[derive(Debug, Clone, PartialEq)]
pub struct FuelSummary {
    pub fuel_type: FuelType,
    pub report_date: NaiveDate,
    /// Unweighted mean of the state averages.
    pub national_avg: Decimal,
    pub national_min: Decimal,
    pub national_max: Decimal,
    pub states: usize,
    pub total_cities: i64,
}

/// One summary per `(report_date, fuel)` present in `rows`, in fuel order.
pub fn summarize(rows: &[GoldStateAnalytics]) -> Vec<FuelSummary> {
    let mut groups: BTreeMap<(NaiveDate, FuelType), Vec<&GoldStateAnalytics>> = BTreeMap::new();
    for row in rows {
        groups.entry((row.report_date, row.fuel_type)).or_default().push(row);
    }

    groups
        .into_iter()
        .filter_map(|((report_date, fuel_type), states)| {
            let national_min = states.iter().map(|row| row.min_price).min()?;
            let national_max = states.iter().map(|row| row.max_price).max()?;
            let sum: Decimal = states.iter().map(|row| row.avg_price).sum();
            Some(FuelSummary {
                fuel_type,
                report_date,
                national_avg: round_price(sum / Decimal::from(states.len())),
                national_min,
                national_max,
                states: states.len(),
                total_cities: states.iter().map(|row| i64::from(row.city_count)).sum(),
            })
        })
        .collect()
}

/// Summaries for `report_date`, or for the latest date with analytics.
pub async fn latest_summary(
    store: &dyn WarehouseStore,
    report_date: Option<NaiveDate>,
) -> Result<Vec<FuelSummary>, StoreError> {
    let rows = store.load_state_analytics(report_date).await?;
    Ok(summarize(&rows))
}

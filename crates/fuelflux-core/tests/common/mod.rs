#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fuelflux_core::config::{CityTarget, PipelineConfig};
use fuelflux_core::feed::{split_city_document, FeedError, FeedItem, FuelFeed};
use fuelflux_core::pipeline::StageContext;
use fuelflux_core::store::MemoryStore;
use serde_json::{json, Value};

/// Canned responses keyed by city id. Unknown cities fail permanently.
#[derive(Default)]
pub struct StubFeed {
    responses: HashMap<String, Result<Vec<FeedItem>, FeedError>>,
}

impl StubFeed {
    pub fn with_city(mut self, city_id: &str, items: Vec<FeedItem>) -> Self {
        self.responses.insert(city_id.to_string(), Ok(items));
        self
    }

    pub fn with_failure(mut self, city_id: &str, error: FeedError) -> Self {
        self.responses.insert(city_id.to_string(), Err(error));
        self
    }
}

#[async_trait]
impl FuelFeed for StubFeed {
    async fn fetch_city(&self, target: &CityTarget) -> Result<Vec<FeedItem>, FeedError> {
        self.responses
            .get(&target.city_id)
            .cloned()
            .unwrap_or_else(|| Err(FeedError::Permanent(format!("no stub for {}", target.city_id))))
    }
}

pub fn config(cities: Vec<CityTarget>) -> PipelineConfig {
    PipelineConfig {
        cities,
        ..PipelineConfig::default()
    }
}

pub fn context<'a>(store: &'a Arc<MemoryStore>, config: &'a PipelineConfig, run_id: &str) -> StageContext<'a> {
    StageContext::new(store.as_ref(), store.clone(), config, run_id)
}

/// A history document for one city, one entry per `(date, fuel object)`.
pub fn city_history(state_id: &str, city_id: &str, days: &[(&str, Value)]) -> Vec<FeedItem> {
    let history: Vec<Value> = days
        .iter()
        .map(|(date, fuel)| json!({ "applicableOn": date, "fuel": fuel }))
        .collect();
    split_city_document(json!({
        "cityId": city_id,
        "cityName": city_id.to_uppercase(),
        "stateId": state_id,
        "stateName": state_id.to_uppercase(),
        "history": history,
    }))
    .expect("history document")
}

pub fn petrol(price: Value) -> Value {
    json!({ "petrol": { "retailPrice": price, "retailUnit": "litre", "currency": "INR" } })
}

pub fn all_fuels() -> Value {
    json!({
        "petrol": { "retailPrice": 103.49, "retailPriceChange": 0, "retailUnit": "litre" },
        "diesel": { "retailPrice": 90.03, "retailUnit": "litre" },
        "lpg": { "retailPrice": "852.50", "retailUnit": "14.2 kg cylinder" },
        "cng": { "retailPrice": 76.0, "retailUnit": "kg" }
    })
}

//! Source feed: fetches per-city price documents from the RapidAPI
//! "daily fuel prices in India" service.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{CityTarget, FeedConfig};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("transient feed error: {0}")]
    Transient(String),

    #[error("permanent feed error: {0}")]
    Permanent(String),
}

impl FeedError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::Transient(_))
    }
}

/// One candidate bronze row: the city header from the response plus the
/// payload for a single `applicableOn` date. Identifiers are left optional so
/// validation, not the adapter, decides what is malformed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub city_id: Option<String>,
    pub city_name: Option<String>,
    pub state_id: Option<String>,
    pub state_name: Option<String>,
    pub payload: Value,
}

#[async_trait]
pub trait FuelFeed: Send + Sync {
    /// All dated documents the feed currently offers for `target`.
    async fn fetch_city(&self, target: &CityTarget) -> Result<Vec<FeedItem>, FeedError>;
}

#[derive(Debug)]
pub struct FetchFailure {
    pub target: CityTarget,
    pub error: FeedError,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub items: Vec<FeedItem>,
    pub failures: Vec<FetchFailure>,
}

/// Fetches every city with bounded concurrency. One city failing never
/// affects the others.
pub async fn fetch_cities(
    feed: &dyn FuelFeed,
    cities: &[CityTarget],
    concurrency: usize,
) -> FetchOutcome {
    let results: Vec<(CityTarget, Result<Vec<FeedItem>, FeedError>)> = stream::iter(cities)
        .map(|target| async move { (target.clone(), feed.fetch_city(target).await) })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut outcome = FetchOutcome::default();
    for (target, result) in results {
        match result {
            Ok(items) => {
                debug!(city_id = %target.city_id, items = items.len(), "Fetched city feed");
                outcome.items.extend(items);
            }
            Err(error) => {
                warn!(city_id = %target.city_id, state_id = %target.state_id, %error, "City fetch failed");
                outcome.failures.push(FetchFailure { target, error });
            }
        }
    }
    outcome
}

/// Splits a city response into dated items. Accepts either a history
/// document (`history: [...]`) or a single-day document carrying
/// `applicableOn` at the top level.
pub fn split_city_document(document: Value) -> Result<Vec<FeedItem>, FeedError> {
    let Value::Object(mut object) = document else {
        return Err(FeedError::Permanent(
            "city document is not a JSON object".to_string(),
        ));
    };

    let header = |object: &Map<String, Value>, field: &str| {
        object
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let city_id = header(&object, "cityId");
    let city_name = header(&object, "cityName");
    let state_id = header(&object, "stateId");
    let state_name = header(&object, "stateName");

    let make_item = |payload: Value| FeedItem {
        city_id: city_id.clone(),
        city_name: city_name.clone(),
        state_id: state_id.clone(),
        state_name: state_name.clone(),
        payload,
    };

    match object.remove("history") {
        Some(Value::Array(history)) => Ok(history.into_iter().map(make_item).collect()),
        Some(_) => Err(FeedError::Permanent(
            "history field is not an array".to_string(),
        )),
        None if object.contains_key("applicableOn") => Ok(vec![make_item(Value::Object(object))]),
        None => Err(FeedError::Permanent(
            "city document has neither history nor applicableOn".to_string(),
        )),
    }
}

const MAX_BACKOFF: Duration = Duration::from_secs(10);

pub struct RapidApiFeed {
    client: reqwest::Client,
    base_url: String,
    api_host: String,
    api_key: String,
    max_retries: u32,
    backoff_base: Duration,
}

impl RapidApiFeed {
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| FeedError::Permanent("RAPIDAPI_KEY is required".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| FeedError::Permanent(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_host: config.api_host.clone(),
            api_key,
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(500),
        })
    }

    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    fn history_url(&self, target: &CityTarget) -> String {
        format!(
            "{}/history/india/{}/{}",
            self.base_url, target.state_id, target.city_id
        )
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_BACKOFF)
    }

    async fn get_json(&self, url: &str) -> Result<Value, FeedError> {
        let mut attempt = 0;
        loop {
            match self.request_once(url).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff_delay(attempt);
                    warn!(url, attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying feed request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn request_once(&self, url: &str) -> Result<Value, FeedError> {
        let response = self
            .client
            .get(url)
            .header("x-rapidapi-key", &self.api_key)
            .header("x-rapidapi-host", &self.api_host)
            .send()
            .await
            .map_err(|err| classify_transport(&err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| classify_transport(&err))
    }
}

#[async_trait]
impl FuelFeed for RapidApiFeed {
    async fn fetch_city(&self, target: &CityTarget) -> Result<Vec<FeedItem>, FeedError> {
        let document = self.get_json(&self.history_url(target)).await?;
        split_city_document(document)
    }
}

fn classify_status(status: StatusCode) -> FeedError {
    let message = format!("feed responded with HTTP {status}");
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        FeedError::Transient(message)
    } else {
        FeedError::Permanent(message)
    }
}

fn classify_transport(err: &reqwest::Error) -> FeedError {
    if err.is_decode() || err.is_builder() {
        FeedError::Permanent(err.to_string())
    } else {
        FeedError::Transient(err.to_string())
    }
}

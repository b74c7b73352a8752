//! Bronze/silver/gold batch pipeline for daily Indian fuel prices.
//!
//! Stages read only the previous tier's committed rows and write their own
//! tier through keyed upserts, so any stage can be replayed for a date.

pub mod bronze;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod gold;
pub mod ledger;
pub mod pipeline;
pub mod silver;
pub mod store;
pub mod summary;
pub mod types;

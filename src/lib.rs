//! Accessory bridge support library.
//!
//! Building blocks for home-automation accessory plugins: parsing declarative
//! configuration into typed descriptors, executing HTTP requests, bridging MQTT
//! topics onto device characteristics and polling on an interval.

pub mod cache;
pub mod characteristic;
pub mod config;
pub mod config_parser;
pub mod error;
pub mod http;
pub mod mqtt;
pub mod notifications;
pub mod pull_timer;
pub mod utils;

pub use cache::Cache;
pub use error::{Error, Result};
pub use pull_timer::{PullCompletion, PullTimer};

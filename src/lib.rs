//! PLUS product scraper
//!
//! A resumable, rate-limited crawl pipeline: discovers product identifiers
//! from the PLUS sitemap, fetches each product through the product-details
//! API with retry and proxy rotation, and upserts normalized records into
//! PostgreSQL or a local JSON document store.

pub mod app_state;
pub mod cli;
pub mod config;
pub mod db;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod telemetry;

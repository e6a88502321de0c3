pub mod alerts;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod limiter;
pub mod pricing;
pub mod scraper;
pub mod types;

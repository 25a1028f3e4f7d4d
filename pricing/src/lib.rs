pub mod backfill;
pub mod cache;
pub mod config;
pub mod registry;
pub mod series;
pub mod source;
pub mod store;

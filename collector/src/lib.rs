pub mod adapters;
pub mod checkpoint;
pub mod config;
pub mod deployments;
pub mod entities;
pub mod orchestrator;
pub mod output;
pub mod shutdown;
pub mod snapshots;
pub mod task;
pub mod valuation;

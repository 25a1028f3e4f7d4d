pub mod adapter;
pub mod block;
pub mod block_cache;
pub mod client;
pub mod day;
pub mod entity;
pub mod error;
pub mod eth;
pub mod header;
pub mod id;
pub mod log_config;
pub mod network;
pub mod pool;
pub mod rate_limiter;
pub mod record;
pub mod resolver;
pub mod retry;
pub mod rpc_config;
pub mod scanner;
pub mod utils;

pub mod chain;
pub mod price_source;

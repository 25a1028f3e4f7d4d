//! Protocol agnostic adapters. Protocol specific ones register themselves
//! the same way.

use shared::adapter::{AdapterError, AdapterRegistry};
use shared::entity::EntityConfig;
use shared::id::Address;

pub mod erc20_supply;
pub mod event_logs;

pub use erc20_supply::Erc20Supply;
pub use event_logs::EventLogs;

/// Registry with every adapter of this crate.
pub fn registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::default();
    registry.register(EventLogs).register(Erc20Supply);
    registry
}

fn require_targets(
    entity: &EntityConfig,
) -> Result<Vec<Address>, AdapterError> {
    if entity.targets.is_empty() {
        return Err(AdapterError::Misconfigured {
            entity: entity.id.clone(),
            reason: "no target addresses".to_owned(),
        });
    }
    Ok(entity.targets.clone())
}

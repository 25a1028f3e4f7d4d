use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use shared::entity::EntityConfig;
use shared::utils::{read_json, write_json_atomic};

/// Deployment dates keyed by entity id, taking precedence over the dates in
/// the entity registry.
pub type DeploymentOverrides = BTreeMap<String, NaiveDate>;

pub fn load_overrides(path: &Path) -> anyhow::Result<DeploymentOverrides> {
    Ok(read_json(path)?.unwrap_or_default())
}

pub fn save_overrides(
    path: &Path,
    overrides: &DeploymentOverrides,
) -> anyhow::Result<()> {
    write_json_atomic(path, overrides)
}

/// Every configured entity, in registry order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityRegistry {
    entities: Vec<EntityConfig>,
}

impl EntityRegistry {
    pub fn new(entities: Vec<EntityConfig>) -> anyhow::Result<Self> {
        let mut seen = BTreeSet::new();
        for entity in &entities {
            if entity.id.is_empty() {
                bail!("entity without id on network {}", entity.network);
            }
            if !seen.insert(entity.id.as_str()) {
                bail!("entity {} is configured twice", entity.id);
            }
        }

        Ok(Self { entities })
    }

    /// Reads the registry file and applies the optional overrides file.
    pub fn load(
        path: &Path,
        overrides: Option<&Path>,
    ) -> anyhow::Result<Self> {
        let entities: Vec<EntityConfig> = read_json(path)?.with_context(|| {
            format!("Entity registry {} does not exist", path.display())
        })?;
        let mut registry = Self::new(entities)?;

        if let Some(overrides) = overrides {
            registry.apply_overrides(&load_overrides(overrides)?);
        }

        Ok(registry)
    }

    pub fn apply_overrides(&mut self, overrides: &DeploymentOverrides) {
        for entity in &mut self.entities {
            if let Some(date) = overrides.get(&entity.id) {
                entity.deployment_date = Some(*date);
            }
        }
    }

    pub fn all(&self) -> &[EntityConfig] {
        &self.entities
    }

    pub fn get(&self, id: &str) -> Option<&EntityConfig> {
        self.entities.iter().find(|entity| entity.id == id)
    }

    /// The entities named in `ids`, or all of them when `ids` is empty.
    pub fn select(&self, ids: &[String]) -> anyhow::Result<Vec<EntityConfig>> {
        if ids.is_empty() {
            return Ok(self.entities.clone());
        }

        ids.iter()
            .map(|id| {
                self.get(id)
                    .cloned()
                    .with_context(|| format!("Unknown entity {id}"))
            })
            .collect()
    }
}

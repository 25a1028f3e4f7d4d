use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::id::Address;
use crate::network::Network;

/// One monitored protocol deployment on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityConfig {
    pub id: String,
    pub network: Network,
    /// Identifier of the adapter that extracts this entity.
    pub protocol: String,
    #[serde(default)]
    pub targets: Vec<Address>,
    /// First topics of the events to extract, for log based adapters.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Output directory relative to the run's output root, defaults to the
    /// entity id.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// First calendar date on which the targets exist on chain.
    #[serde(default)]
    pub deployment_date: Option<NaiveDate>,
}

impl EntityConfig {
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.id))
    }

    /// Whether `date` is on or after the entity's deployment date. Entities
    /// with no known deployment date are always live.
    pub fn is_live_on(&self, date: NaiveDate) -> bool {
        self.deployment_date.map_or(true, |deployed| date >= deployed)
    }
}

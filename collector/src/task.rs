use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use shared::day::iterate_dates;
use shared::entity::EntityConfig;
use strum_macros::{Display as StrumDisplay, EnumString};

/// One (entity, date) extraction job.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId {
    pub entity: String,
    pub date: NaiveDate,
}

impl TaskId {
    pub fn new(entity: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            entity: entity.into(),
            date,
        }
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity, self.date)
    }
}

impl FromStr for TaskId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (entity, date) = value
            .rsplit_once(':')
            .ok_or_else(|| format!("invalid task id {value}"))?;
        let date = date
            .parse()
            .map_err(|e| format!("invalid task id {value}: {e}"))?;

        Ok(Self::new(entity, date))
    }
}

impl TryFrom<String> for TaskId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaskId> for String {
    fn from(value: TaskId) -> Self {
        value.to_string()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, EnumString, Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Tasks left to run after gating, with the reasons others were dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub tasks: Vec<TaskId>,
    pub already_complete: usize,
    pub before_deployment: usize,
}

/// Expands `entities` x `[start, end]`, dropping tasks completed earlier
/// (unless `force`) and dates before an entity's deployment.
pub fn plan(
    entities: &[EntityConfig],
    start: NaiveDate,
    end: NaiveDate,
    completed: &BTreeSet<TaskId>,
    force: bool,
) -> Plan {
    let mut plan = Plan::default();

    for entity in entities {
        for date in iterate_dates(start, end) {
            let id = TaskId::new(&entity.id, date);

            if !entity.is_live_on(date) {
                plan.before_deployment += 1;
            } else if !force && completed.contains(&id) {
                plan.already_complete += 1;
            } else {
                plan.tasks.push(id);
            }
        }
    }

    tracing::info!(
        tasks = plan.tasks.len(),
        already_complete = plan.already_complete,
        before_deployment = plan.before_deployment,
        "Planned run"
    );

    plan
}

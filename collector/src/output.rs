use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared::adapter::{Fields, Snapshot};
use shared::block::{BlockNumber, Timestamp};
use shared::entity::EntityConfig;
use shared::network::Network;
use shared::record::RawRecord;
use shared::utils::write_json_atomic;

/// Output of one completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub entity: String,
    pub protocol: String,
    pub network: Network,
    pub date: NaiveDate,
    pub block: BlockNumber,
    pub timestamp: Timestamp,
    pub records: Vec<Map<String, Value>>,
    /// Records the adapter could not decode, left out of `records`.
    #[serde(default)]
    pub undecodable: usize,
}

impl TaskOutput {
    pub fn new(
        entity: &EntityConfig,
        network: &Network,
        snapshot: &Snapshot,
    ) -> Self {
        Self {
            entity: entity.id.clone(),
            protocol: entity.protocol.clone(),
            network: network.clone(),
            date: snapshot.date,
            block: snapshot.entry.block,
            timestamp: snapshot.entry.timestamp,
            records: Vec::new(),
            undecodable: 0,
        }
    }

    /// Adds the decoded `fields` of `raw` with its provenance columns, which
    /// take precedence over adapter fields of the same name. Records are
    /// stamped with the snapshot timestamp.
    pub fn push(&mut self, raw: &RawRecord, fields: Fields) {
        let mut row = fields;
        row.insert("protocol".to_owned(), Value::from(self.protocol.clone()));
        row.insert("network".to_owned(), Value::from(raw.network.as_str()));
        row.insert("block".to_owned(), Value::from(raw.block));
        row.insert("timestamp".to_owned(), Value::from(self.timestamp));
        row.insert(
            "transaction_hash".to_owned(),
            raw.transaction_hash().map_or(Value::Null, Value::from),
        );
        row.insert(
            "log_index".to_owned(),
            raw.log_index().map_or(Value::Null, Value::from),
        );

        self.records.push(row);
    }
}

/// Lays task outputs out as `{root}/{entity output dir}/{date}.json`.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    root: PathBuf,
}

impl OutputWriter {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn path(&self, entity: &EntityConfig, date: NaiveDate) -> PathBuf {
        self.root.join(entity.output_dir()).join(format!("{date}.json"))
    }

    /// Replaces the task's file in one step, readers never see a partial
    /// output.
    pub fn write(
        &self,
        entity: &EntityConfig,
        output: &TaskOutput,
    ) -> anyhow::Result<PathBuf> {
        let path = self.path(entity, output.date);
        write_json_atomic(&path, output)?;
        Ok(path)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use shared::block_cache::DateBlockEntry;
    use shared::record::{RawLog, RawPayload};

    use super::*;

    fn entity() -> EntityConfig {
        serde_json::from_value(serde_json::json!({
            "id": "dai-transfers",
            "network": "ethereum",
            "protocol": "event_logs",
            "output_dir": "tokens/dai",
        }))
        .unwrap()
    }

    #[test]
    fn rows_carry_provenance() {
        let snapshot = Snapshot {
            date: "2024-01-01".parse().unwrap(),
            entry: DateBlockEntry {
                block: 120,
                timestamp: 1_704_171_590,
                window_start: 1_704_085_200,
                window_end: 1_704_171_600,
            },
            first_block: 100,
        };
        let mut output =
            TaskOutput::new(&entity(), &"ethereum".into(), &snapshot);

        let raw = RawRecord {
            network: "ethereum".into(),
            block: 110,
            payload: RawPayload::Log(RawLog {
                address: "0x6b175474e89094c44da98b954eedeac495271d0f"
                    .parse()
                    .unwrap(),
                topics: Vec::new(),
                data: "0x".to_owned(),
                block_number: 110,
                transaction_hash: "0xab".to_owned(),
                log_index: 3,
            }),
        };
        let mut fields = Fields::new();
        fields.insert("amount".to_owned(), Value::from("42"));
        fields.insert("block".to_owned(), Value::from("shadowed"));
        fields.insert("log_index".to_owned(), Value::Null);
        output.push(&raw, fields);

        let row = &output.records[0];
        assert_eq!(row["protocol"], "event_logs");
        assert_eq!(row["block"], 110);
        assert_eq!(row["timestamp"], 1_704_171_590);
        assert_eq!(row["transaction_hash"], "0xab");
        assert_eq!(row["log_index"], 3);
        assert_eq!(row["amount"], "42");
    }

    #[test]
    fn files_are_per_entity_and_date() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path().to_owned());

        assert_eq!(
            writer.path(&entity(), "2024-03-01".parse().unwrap()),
            dir.path().join("tokens/dai/2024-03-01.json")
        );
    }
}

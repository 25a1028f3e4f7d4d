use async_trait::async_trait;
use serde_json::Value;
use shared::adapter::{
    Adapter, AdapterError, DecodeError, FetchContext, Fetched, Fields,
    Snapshot,
};
use shared::entity::EntityConfig;
use shared::error::{CallError, ErrorClass};
use shared::eth::LogFilter;
use shared::id::Address;
use shared::record::{RawPayload, RawRecord};
use shared::scanner::{collect, scan};

/// Every log the targets emitted during the day, optionally restricted to
/// a set of event topics.
pub struct EventLogs;

#[async_trait]
impl Adapter for EventLogs {
    fn protocol(&self) -> &'static str {
        "event_logs"
    }

    fn resolve_targets(
        &self,
        entity: &EntityConfig,
    ) -> Result<Vec<Address>, AdapterError> {
        super::require_targets(entity)
    }

    async fn fetch(
        &self,
        ctx: &FetchContext<'_>,
        entity: &EntityConfig,
        targets: &[Address],
        snapshot: &Snapshot,
    ) -> Result<Fetched, CallError> {
        let filter = LogFilter {
            addresses: targets.to_vec(),
            topics: entity.topics.iter().map(|t| t.to_lowercase()).collect(),
        };

        let outcome = collect(scan(
            ctx.pool,
            ctx.network,
            &filter,
            snapshot.first_block,
            snapshot.entry.block,
            ctx.scan,
        ))
        .await;

        // No endpoint left at all, nothing of the scan is usable.
        if let Some(failure) = outcome
            .failed
            .iter()
            .find(|failure| failure.error.class() == ErrorClass::Configuration)
        {
            return Err(failure.error.clone());
        }

        Ok(Fetched {
            records: outcome.records,
            failed_windows: outcome.failed,
        })
    }

    fn decode(&self, record: &RawRecord) -> Result<Fields, DecodeError> {
        let RawPayload::Log(log) = &record.payload else {
            return Err(DecodeError("expected a log".to_owned()));
        };
        let (event, indexed) = log
            .topics
            .split_first()
            .ok_or_else(|| DecodeError("anonymous log".to_owned()))?;

        let mut fields = Fields::new();
        fields.insert("contract".to_owned(), Value::from(log.address.as_str()));
        fields.insert("event".to_owned(), Value::from(event.as_str()));
        fields.insert(
            "indexed".to_owned(),
            Value::from(indexed.to_vec()),
        );
        fields.insert("data".to_owned(), Value::from(log.data.as_str()));

        Ok(fields)
    }
}

//! Hourly rollup aggregator. Uses the same tick-or-cancel shape as
//! `quota_sync`/`recorder`; the windowed query and in-memory group-by run
//! every tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DurationRound, Utc};
use tokio_util::sync::CancellationToken;

use crate::store::{MIN_ROLLUP_QUERY_LIMIT, RollupStore, UsageFilter};
use crate::types::{UsageRecord, UsageRollup};
use crate::workers::Worker;

const TICK_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// A 2-hour lookback window tolerates usage records that arrive slightly
/// out of order or late relative to when they were generated.
const LOOKBACK: chrono::Duration = chrono::Duration::hours(2);

pub struct UsageRollupWorker {
	store: Arc<dyn RollupStore>,
}

impl UsageRollupWorker {
	pub fn new(store: Arc<dyn RollupStore>) -> Self {
		Self { store }
	}

	async fn tick(&self) {
		let until = Utc::now();
		let since = until - LOOKBACK;
		let filter = UsageFilter {
			since,
			until,
			limit: MIN_ROLLUP_QUERY_LIMIT,
		};
		let records = match self.store.query_usage(filter).await {
			Ok(records) => records,
			Err(e) => {
				tracing::warn!(error = %e, "usage rollup query failed");
				return;
			},
		};
		if records.is_empty() {
			return;
		}
		let rollups = aggregate(&records);
		if let Err(e) = self.store.upsert_rollup(&rollups).await {
			tracing::error!(error = %e, rollup_count = rollups.len(), "usage rollup upsert failed");
		}
	}
}

/// Groups records by `(org, key, model, hour-truncated bucket)`.
fn aggregate(records: &[UsageRecord]) -> Vec<UsageRollup> {
	let mut by_key: HashMap<(String, String, String, chrono::DateTime<Utc>), UsageRollup> = HashMap::new();
	for record in records {
		let bucket = record.created_at.duration_trunc(chrono::Duration::hours(1)).unwrap_or(record.created_at);
		let key = (record.org_id.clone(), record.key_id.clone(), record.model.clone(), bucket);
		let entry = by_key.entry(key).or_insert_with(|| UsageRollup {
			org_id: record.org_id.clone(),
			key_id: record.key_id.clone(),
			model: record.model.clone(),
			period: "hourly",
			bucket,
			request_count: 0,
			tokens: 0,
			cost_usd: 0.0,
			cached_count: 0,
		});
		entry.request_count += 1;
		entry.tokens += record.total_tokens;
		entry.cost_usd += record.cost_usd;
		if record.cached {
			entry.cached_count += 1;
		}
	}
	by_key.into_values().collect()
}

#[async_trait]
impl Worker for UsageRollupWorker {
	fn name(&self) -> &'static str {
		"usage_rollup"
	}

	async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
		let mut ticker = tokio::time::interval(TICK_INTERVAL);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			tokio::select! {
				biased;
				_ = cancel.cancelled() => return Ok(()),
				_ = ticker.tick() => self.tick().await,
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Mutex;

	use super::*;
	use crate::types::Usage;

	#[derive(Default)]
	struct RecordingStore {
		records: Vec<UsageRecord>,
		upserted: Mutex<Vec<UsageRollup>>,
	}

	#[async_trait]
	impl RollupStore for RecordingStore {
		async fn query_usage(&self, _filter: UsageFilter) -> anyhow::Result<Vec<UsageRecord>> {
			Ok(self.records.clone())
		}

		async fn upsert_rollup(&self, rollups: &[UsageRollup]) -> anyhow::Result<()> {
			self.upserted.lock().unwrap().extend_from_slice(rollups);
			Ok(())
		}
	}

	fn record(org: &str, key: &str, model: &str, hour_offset: i64, cached: bool) -> UsageRecord {
		let mut r = UsageRecord::new(org, key, model, Usage::new(10, 5), 0.02, cached);
		r.created_at = Utc::now() - chrono::Duration::hours(hour_offset);
		r
	}

	#[test]
	fn aggregates_by_org_key_model_and_hour_bucket() {
		let records = vec![
			record("o1", "k1", "gpt-4", 0, false),
			record("o1", "k1", "gpt-4", 0, true),
			record("o1", "k1", "gpt-4", 1, false),
			record("o1", "k2", "gpt-4", 0, false),
		];
		let rollups = aggregate(&records);
		// (o1,k1,gpt-4,hour0), (o1,k1,gpt-4,hour1), (o1,k2,gpt-4,hour0)
		assert_eq!(rollups.len(), 3);
		let hour0_k1 = rollups
			.iter()
			.find(|r| r.key_id == "k1" && r.bucket == records[0].created_at.duration_trunc(chrono::Duration::hours(1)).unwrap())
			.unwrap();
		assert_eq!(hour0_k1.request_count, 2);
		assert_eq!(hour0_k1.cached_count, 1);
		assert_eq!(hour0_k1.tokens, 30);
	}

	#[tokio::test]
	async fn empty_query_skips_upsert() {
		let store = Arc::new(RecordingStore::default());
		let worker = UsageRollupWorker::new(store.clone());
		worker.tick().await;
		assert!(store.upserted.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn non_empty_query_upserts_aggregates() {
		let store = Arc::new(RecordingStore {
			records: vec![record("o1", "k1", "gpt-4", 0, false)],
			upserted: Mutex::new(Vec::new()),
		});
		let worker = UsageRollupWorker::new(store.clone());
		worker.tick().await;
		assert_eq!(store.upserted.lock().unwrap().len(), 1);
	}
}

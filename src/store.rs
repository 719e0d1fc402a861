//! Store contracts consumed by the worker runner. These are plain
//! `#[async_trait]` traits with no provided implementation -- a host wires
//! in its own Postgres/Redis-backed implementation. The pattern is a
//! narrow async trait at the seam with the caller supplying the concrete
//! backend, so this crate depends on no particular database driver.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{UsageRecord, UsageRollup};

/// Consumed by `workers::UsageRecorder` to durably persist a batch of
/// usage records.
#[async_trait]
pub trait UsageStore: Send + Sync {
	async fn insert_usage(&self, records: &[UsageRecord]) -> anyhow::Result<()>;
}

/// Consumed by `quota::QuotaTracker::sync` / `workers::QuotaSyncWorker` to
/// reconcile the in-memory ledger against authoritative cost totals.
#[async_trait]
pub trait QuotaStore: Send + Sync {
	async fn sum_usage_cost(&self, key_id: &str) -> anyhow::Result<f64>;
}

/// Optional: consumed at `QuotaSyncWorker` startup to preload budgets for
/// every key that has one configured, so the first request for a
/// previously-unseen key doesn't race an empty `QuotaTracker` entry.
#[async_trait]
pub trait KeyBudgetStore: Send + Sync {
	async fn list_budgeted_key_ids(&self) -> anyhow::Result<std::collections::HashMap<String, f64>>;
}

/// `{since, until, limit}` window with a result cap.
#[derive(Debug, Clone, Copy)]
pub struct UsageFilter {
	pub since: DateTime<Utc>,
	pub until: DateTime<Utc>,
	pub limit: u32,
}

pub const MIN_ROLLUP_QUERY_LIMIT: u32 = 10_000;

/// Consumed by `workers::UsageRollupWorker` to read raw usage records for
/// a window and persist the hourly aggregates it computes from them.
#[async_trait]
pub trait RollupStore: Send + Sync {
	async fn query_usage(&self, filter: UsageFilter) -> anyhow::Result<Vec<UsageRecord>>;
	async fn upsert_rollup(&self, rollups: &[UsageRollup]) -> anyhow::Result<()>;
}

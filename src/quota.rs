//! Quota tracker: per-key cumulative-cost ledger, reconciled against a
//! persistent store. A single mutex-guarded map keyed by key id, following
//! the crate's convention for small hot-path-adjacent state; `sync`/
//! `sync_all` pull authoritative totals from a backing store so the
//! in-memory ledger survives process restarts without its own persistence.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::store::QuotaStore;

/// `{limit, consumed}` in USD. `consumed` is monotonic within a
/// process lifetime except when `sync` authoritatively overwrites it from
/// the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotaEntry {
	pub limit: f64,
	pub consumed: f64,
}

/// Per-key cumulative-cost ledger under a single mutex. The tracker
/// does not make check-then-consume atomic; callers needing that must
/// externally coordinate (the typical pattern is check pre-response,
/// consume post-response).
#[derive(Default)]
pub struct QuotaTracker {
	entries: Mutex<HashMap<String, QuotaEntry>>,
}

impl QuotaTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// `limit <= 0` is always true (unlimited). Otherwise lazily creates
	/// the entry, updates its stored limit to the caller's current value
	/// (so a live config change on the limit axis takes effect without a
	/// separate invalidation call), and returns `consumed < limit`.
	/// Creation always admits the current request, even with no prior
	/// entry.
	pub fn check(&self, key_id: &str, limit: f64) -> bool {
		if limit <= 0.0 {
			return true;
		}
		let mut entries = self.entries.lock();
		let entry = entries.entry(key_id.to_string()).or_insert(QuotaEntry { limit, consumed: 0.0 });
		entry.limit = limit;
		entry.consumed < entry.limit
	}

	/// Adds `cost` to the key's running total, creating the entry if
	/// absent. Negative costs are not expected but are not rejected --
	/// the tracker trusts its caller.
	pub fn consume(&self, key_id: &str, cost: f64) {
		let mut entries = self.entries.lock();
		let entry = entries.entry(key_id.to_string()).or_insert(QuotaEntry { limit: 0.0, consumed: 0.0 });
		entry.consumed += cost;
	}

	/// Seeds an entry only if absent. Idempotent: repeated calls after any
	/// `consume` never alter `consumed`.
	pub fn preload(&self, key_id: &str, limit: f64) {
		self.entries.lock().entry(key_id.to_string()).or_insert(QuotaEntry { limit, consumed: 0.0 });
	}

	/// Authoritative overwrite: fetches the summed cost from `store` and
	/// replaces `consumed` with it.
	pub async fn sync(&self, store: &dyn QuotaStore, key_id: &str) -> anyhow::Result<()> {
		let consumed = store.sum_usage_cost(key_id).await?;
		let mut entries = self.entries.lock();
		let entry = entries.entry(key_id.to_string()).or_insert(QuotaEntry { limit: 0.0, consumed: 0.0 });
		entry.consumed = consumed;
		Ok(())
	}

	/// Snapshots the current key set under the lock, releases it, then
	/// syncs each key sequentially -- so a slow/failing store call for one
	/// key doesn't hold the lock and block unrelated `check`/`consume`
	/// calls.
	pub async fn sync_all(&self, store: &dyn QuotaStore) {
		let keys: Vec<String> = self.entries.lock().keys().cloned().collect();
		for key in keys {
			if let Err(e) = self.sync(store, &key).await {
				tracing::warn!(key_id = %key, error = %e, "quota sync failed for key");
			}
		}
	}

	pub fn entry(&self, key_id: &str) -> Option<QuotaEntry> {
		self.entries.lock().get(key_id).copied()
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use async_trait::async_trait;

	use super::*;

	struct FixedStore(f64);

	#[async_trait]
	impl QuotaStore for FixedStore {
		async fn sum_usage_cost(&self, _key_id: &str) -> anyhow::Result<f64> {
			Ok(self.0)
		}
	}

	#[test]
	fn unlimited_always_allows() {
		let tracker = QuotaTracker::new();
		assert!(tracker.check("k", 0.0));
		assert!(tracker.check("k", -5.0));
	}

	#[test]
	fn over_budget_denies_until_sync() {
		let tracker = QuotaTracker::new();
		assert!(tracker.check("k", 10.0));
		tracker.consume("k", 10.0);
		assert!(!tracker.check("k", 10.0));
	}

	#[tokio::test]
	async fn sync_authoritatively_overwrites_consumed() {
		let tracker = QuotaTracker::new();
		assert!(tracker.check("k", 10.0));
		tracker.consume("k", 10.0);
		assert!(!tracker.check("k", 10.0));

		let store = FixedStore(3.0);
		tracker.sync(&store, "k").await.unwrap();
		assert!(tracker.check("k", 10.0));
		assert_eq!(tracker.entry("k").unwrap().consumed, 3.0);
	}

	#[test]
	fn preload_is_idempotent_after_consume() {
		let tracker = QuotaTracker::new();
		tracker.preload("k", 10.0);
		tracker.consume("k", 4.0);
		tracker.preload("k", 10.0);
		tracker.preload("k", 999.0);
		assert_eq!(tracker.entry("k").unwrap().consumed, 4.0);
	}

	#[tokio::test]
	async fn sync_all_covers_every_seen_key() {
		let tracker = QuotaTracker::new();
		tracker.preload("a", 10.0);
		tracker.preload("b", 10.0);
		let store = FixedStore(7.5);
		tracker.sync_all(&store).await;
		assert_eq!(tracker.entry("a").unwrap().consumed, 7.5);
		assert_eq!(tracker.entry("b").unwrap().consumed, 7.5);
	}
}

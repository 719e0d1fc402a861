//! Quota reconciler. Uses the same tick-or-cancel shape as the other
//! workers in this module, with a preload-then-sync startup sequence.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::quota::QuotaTracker;
use crate::store::{KeyBudgetStore, QuotaStore};
use crate::workers::Worker;

const SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// On startup, preloads every budgeted key (if a `KeyBudgetStore` is
/// configured) then performs one `sync_all`; thereafter ticks `sync_all`
/// every 60s for the lifetime of the process. All store errors are
/// logged, never returned.
pub struct QuotaSyncWorker {
	tracker: Arc<QuotaTracker>,
	quota_store: Arc<dyn QuotaStore>,
	budget_store: Option<Arc<dyn KeyBudgetStore>>,
}

impl QuotaSyncWorker {
	pub fn new(tracker: Arc<QuotaTracker>, quota_store: Arc<dyn QuotaStore>, budget_store: Option<Arc<dyn KeyBudgetStore>>) -> Self {
		Self {
			tracker,
			quota_store,
			budget_store,
		}
	}

	async fn preload_budgets(&self) {
		let Some(budget_store) = &self.budget_store else {
			return;
		};
		match budget_store.list_budgeted_key_ids().await {
			Ok(budgets) => {
				for (key_id, limit) in budgets {
					self.tracker.preload(&key_id, limit);
				}
			},
			Err(e) => tracing::warn!(error = %e, "failed to list budgeted keys, skipping preload"),
		}
	}
}

#[async_trait]
impl Worker for QuotaSyncWorker {
	fn name(&self) -> &'static str {
		"quota_sync"
	}

	async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
		self.preload_budgets().await;
		self.tracker.sync_all(self.quota_store.as_ref()).await;

		let mut ticker = tokio::time::interval(SYNC_INTERVAL);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			tokio::select! {
				biased;
				_ = cancel.cancelled() => return Ok(()),
				_ = ticker.tick() => {
					self.tracker.sync_all(self.quota_store.as_ref()).await;
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::*;

	struct FixedBudgets(HashMap<String, f64>);

	#[async_trait]
	impl KeyBudgetStore for FixedBudgets {
		async fn list_budgeted_key_ids(&self) -> anyhow::Result<HashMap<String, f64>> {
			Ok(self.0.clone())
		}
	}

	struct ZeroStore;

	#[async_trait]
	impl QuotaStore for ZeroStore {
		async fn sum_usage_cost(&self, _key_id: &str) -> anyhow::Result<f64> {
			Ok(0.0)
		}
	}

	#[tokio::test]
	async fn startup_preloads_then_cancels_cleanly() {
		let tracker = Arc::new(QuotaTracker::new());
		let mut budgets = HashMap::new();
		budgets.insert("k1".to_string(), 25.0);
		let worker = QuotaSyncWorker::new(tracker.clone(), Arc::new(ZeroStore), Some(Arc::new(FixedBudgets(budgets))));

		let cancel = CancellationToken::new();
		let cancel_clone = cancel.clone();
		let handle = tokio::spawn(async move { worker.run(cancel_clone).await });
		tokio::time::sleep(Duration::from_millis(20)).await;
		cancel.cancel();
		handle.await.unwrap().unwrap();

		assert_eq!(tracker.entry("k1").unwrap().limit, 25.0);
	}

	#[tokio::test]
	async fn missing_budget_store_skips_preload_without_erroring() {
		let tracker = Arc::new(QuotaTracker::new());
		let worker = QuotaSyncWorker::new(tracker.clone(), Arc::new(ZeroStore), None);
		let cancel = CancellationToken::new();
		let cancel_clone = cancel.clone();
		let handle = tokio::spawn(async move { worker.run(cancel_clone).await });
		cancel.cancel();
		handle.await.unwrap().unwrap();
		assert!(tracker.is_empty());
	}
}

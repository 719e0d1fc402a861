//! Worker runner: a supervised set of long-running background tasks --
//! usage batch flusher, quota reconciler, hourly rollup aggregator -- with
//! cooperative shutdown via `CancellationToken`. Each worker loops with a
//! `tokio::select!` between `cancel.cancelled()` and a timer, logging and
//! continuing on its own operational errors rather than returning. A
//! `Worker` trait lets the `Runner` supervise a fixed, heterogeneous list
//! of them.

pub mod quota_sync;
pub mod recorder;
pub mod rollup;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub use quota_sync::QuotaSyncWorker;
pub use recorder::UsageRecorder;
pub use rollup::UsageRollupWorker;

/// One long-running background task. `run` is expected to loop until
/// `cancel` fires; a worker logs and swallows its own operational errors
/// (a failed store call, a missing optional dependency) and only returns
/// `Err` for a catastrophic, non-recoverable condition that should unwind
/// the whole `Runner`.
#[async_trait]
pub trait Worker: Send + Sync {
	fn name(&self) -> &'static str;
	async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// Owns a fixed list of `Worker`s. `run` launches each concurrently under
/// a common child `CancellationToken`; on the first error from any
/// worker, the token is cancelled so the others wind down, and the first
/// error is surfaced once all have returned.
pub struct Runner {
	workers: Vec<Arc<dyn Worker>>,
}

impl Runner {
	pub fn new(workers: Vec<Arc<dyn Worker>>) -> Self {
		Self { workers }
	}

	pub async fn run(&self, parent: CancellationToken) -> anyhow::Result<()> {
		let cancel = parent.child_token();
		let mut set = JoinSet::new();
		for worker in &self.workers {
			let worker = worker.clone();
			let cancel = cancel.clone();
			set.spawn(async move {
				let name = worker.name();
				let result = worker.run(cancel).await;
				if let Err(e) = &result {
					tracing::error!(worker = name, error = %e, "worker exited with a non-recoverable error");
				} else {
					tracing::debug!(worker = name, "worker stopped");
				}
				result
			});
		}

		let mut first_err: Option<anyhow::Error> = None;
		while let Some(joined) = set.join_next().await {
			let outcome = match joined {
				Ok(result) => result,
				Err(join_err) => Err(anyhow::anyhow!(join_err)),
			};
			if let Err(e) = outcome {
				if first_err.is_none() {
					first_err = Some(e);
					cancel.cancel();
				}
			}
		}

		match first_err {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	struct CountingWorker {
		ticks: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl Worker for CountingWorker {
		fn name(&self) -> &'static str {
			"counting"
		}

		async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
			loop {
				tokio::select! {
					_ = cancel.cancelled() => return Ok(()),
					_ = tokio::time::sleep(std::time::Duration::from_millis(10)) => {
						self.ticks.fetch_add(1, Ordering::SeqCst);
					}
				}
			}
		}
	}

	struct FailingWorker;

	#[async_trait]
	impl Worker for FailingWorker {
		fn name(&self) -> &'static str {
			"failing"
		}

		async fn run(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
			Err(anyhow::anyhow!("boom"))
		}
	}

	#[tokio::test]
	async fn cancellation_stops_all_workers() {
		let ticks = Arc::new(AtomicUsize::new(0));
		let runner = Runner::new(vec![Arc::new(CountingWorker { ticks: ticks.clone() })]);
		let parent = CancellationToken::new();
		let parent_clone = parent.clone();
		let handle = tokio::spawn(async move { runner.run(parent_clone).await });
		tokio::time::sleep(std::time::Duration::from_millis(30)).await;
		parent.cancel();
		let result = handle.await.unwrap();
		assert!(result.is_ok());
		assert!(ticks.load(Ordering::SeqCst) > 0);
	}

	#[tokio::test]
	async fn one_worker_erroring_cancels_the_others() {
		let ticks = Arc::new(AtomicUsize::new(0));
		let runner = Runner::new(vec![Arc::new(CountingWorker { ticks: ticks.clone() }), Arc::new(FailingWorker)]);
		let result = runner.run(CancellationToken::new()).await;
		assert!(result.is_err());
	}
}

//! Usage batch flusher. Follows the crate's own streaming-channel
//! convention (a bounded `tokio::sync::mpsc` with a non-blocking producer
//! side), scaled up to the larger capacity and batch-then-flush loop this
//! worker needs.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::store::UsageStore;
use crate::types::UsageRecord;
use crate::workers::Worker;

pub const CHANNEL_CAPACITY: usize = 4_096;
pub const BATCH_THRESHOLD: usize = 200;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffers `UsageRecord`s pushed in from request-handling tasks and
/// flushes them to `store` in batches. `record` never blocks: a full
/// channel drops the record and logs, rather than applying backpressure
/// to the request path.
pub struct UsageRecorder {
	tx: mpsc::Sender<UsageRecord>,
	rx: Mutex<Option<mpsc::Receiver<UsageRecord>>>,
	store: std::sync::Arc<dyn UsageStore>,
}

impl UsageRecorder {
	pub fn new(store: std::sync::Arc<dyn UsageStore>) -> Self {
		let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
		Self {
			tx,
			rx: Mutex::new(Some(rx)),
			store,
		}
	}

	/// Non-blocking enqueue. Dropped (with a log) if the channel is full.
	pub fn record(&self, record: UsageRecord) {
		if let Err(e) = self.tx.try_send(record) {
			tracing::warn!(error = %e, "usage recorder channel full, dropping record");
		}
	}

	async fn flush(&self, buffer: &mut Vec<UsageRecord>) {
		if buffer.is_empty() {
			return;
		}
		let mut batch = std::mem::take(buffer);
		for record in &mut batch {
			if record.id.is_empty() {
				record.id = Uuid::now_v7().to_string();
			}
		}
		if let Err(e) = self.store.insert_usage(&batch).await {
			tracing::error!(error = %e, batch_len = batch.len(), "usage batch insert failed, records dropped");
		}
	}
}

#[async_trait]
impl Worker for UsageRecorder {
	fn name(&self) -> &'static str {
		"usage_recorder"
	}

	async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
		let mut rx = self.rx.lock().take().expect("UsageRecorder::run must only be invoked once per instance");
		let mut buffer = Vec::with_capacity(BATCH_THRESHOLD);
		let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				biased;
				_ = cancel.cancelled() => break,
				received = rx.recv() => {
					match received {
						Some(record) => {
							buffer.push(record);
							if buffer.len() >= BATCH_THRESHOLD {
								self.flush(&mut buffer).await;
							}
						},
						None => break, // all senders dropped; nothing left to drain
					}
				}
				_ = ticker.tick() => {
					if !buffer.is_empty() {
						self.flush(&mut buffer).await;
					}
				}
			}
		}

		self.drain(&mut rx, &mut buffer).await;
		self.flush(&mut buffer).await;
		Ok(())
	}
}

impl UsageRecorder {
	/// On shutdown, reads everything immediately available without
	/// blocking, flushing full batches as they fill, bounded by a fresh
	/// deadline so a stuck store or a never-ending producer can't hang
	/// shutdown forever.
	async fn drain(&self, rx: &mut mpsc::Receiver<UsageRecord>, buffer: &mut Vec<UsageRecord>) {
		let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
		loop {
			if tokio::time::Instant::now() >= deadline {
				tracing::warn!("usage recorder drain timed out with records still queued");
				break;
			}
			match rx.try_recv() {
				Ok(record) => {
					buffer.push(record);
					if buffer.len() >= BATCH_THRESHOLD {
						self.flush(buffer).await;
					}
				},
				Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	struct CountingStore {
		inserted: Arc<AtomicUsize>,
		batches: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl UsageStore for CountingStore {
		async fn insert_usage(&self, records: &[UsageRecord]) -> anyhow::Result<()> {
			self.inserted.fetch_add(records.len(), Ordering::SeqCst);
			self.batches.fetch_add(1, Ordering::SeqCst);
			assert!(records.iter().all(|r| !r.id.is_empty()));
			Ok(())
		}
	}

	fn record(key: &str) -> UsageRecord {
		UsageRecord::new("org", key, "gpt-4", crate::types::Usage::new(10, 5), 0.01, false)
	}

	#[tokio::test]
	async fn record_never_blocks_even_when_full() {
		let inserted = Arc::new(AtomicUsize::new(0));
		let batches = Arc::new(AtomicUsize::new(0));
		let recorder = UsageRecorder::new(Arc::new(CountingStore {
			inserted: inserted.clone(),
			batches: batches.clone(),
		}));
		// Fill the channel well past capacity without ever running `run`;
		// `record` must never block the caller.
		for i in 0..(CHANNEL_CAPACITY + 50) {
			recorder.record(record(&format!("k{i}")));
		}
	}

	#[tokio::test]
	async fn cancellation_drains_and_flushes_remaining_records() {
		let inserted = Arc::new(AtomicUsize::new(0));
		let batches = Arc::new(AtomicUsize::new(0));
		let recorder = Arc::new(UsageRecorder::new(Arc::new(CountingStore {
			inserted: inserted.clone(),
			batches: batches.clone(),
		})));
		for i in 0..50 {
			recorder.record(record(&format!("k{i}")));
		}
		let cancel = CancellationToken::new();
		let recorder_clone = recorder.clone();
		let cancel_clone = cancel.clone();
		let handle = tokio::spawn(async move { recorder_clone.run(cancel_clone).await });
		cancel.cancel();
		handle.await.unwrap().unwrap();
		assert_eq!(inserted.load(Ordering::SeqCst), 50);
	}

	#[tokio::test]
	async fn batch_threshold_flushes_without_waiting_for_ticker() {
		let inserted = Arc::new(AtomicUsize::new(0));
		let batches = Arc::new(AtomicUsize::new(0));
		let recorder = Arc::new(UsageRecorder::new(Arc::new(CountingStore {
			inserted: inserted.clone(),
			batches: batches.clone(),
		})));
		let cancel = CancellationToken::new();
		let recorder_clone = recorder.clone();
		let cancel_clone = cancel.clone();
		let handle = tokio::spawn(async move { recorder_clone.run(cancel_clone).await });

		for i in 0..(BATCH_THRESHOLD * 2) {
			recorder.record(record(&format!("k{i}")));
		}
		// Give the run loop a chance to drain the channel and flush at
		// least one full batch before the ticker would have fired.
		tokio::time::sleep(Duration::from_millis(200)).await;
		assert!(inserted.load(Ordering::SeqCst) >= BATCH_THRESHOLD);

		cancel.cancel();
		handle.await.unwrap().unwrap();
		assert_eq!(inserted.load(Ordering::SeqCst), BATCH_THRESHOLD * 2);
	}
}

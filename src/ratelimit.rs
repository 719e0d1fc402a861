//! Rate limiter: lazy-refill dual token-bucket limiters keyed by API-key
//! id. A small atomics-adjacent bucket type wrapped by a `Clone`-able
//! handle with a `try_consume`/`adjust` surface, continuously refilling
//! (`tokens = min(max, tokens + elapsed * rate)`, recomputed on access, no
//! background ticker), with independent RPM/TPM buckets per API key
//! registered in a `parking_lot::RwLock`-guarded map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

/// `{RPM, TPM}`; 0 means unlimited for that axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
	pub rpm: u64,
	pub tpm: u64,
}

impl Limits {
	pub fn new(rpm: u64, tpm: u64) -> Self {
		Self { rpm, tpm }
	}

	pub fn unlimited() -> Self {
		Self { rpm: 0, tpm: 0 }
	}
}

/// Outcome of a rate-limit decision, kept distinct from a bare bool so a
/// host can layer a remote/distributed check in front of the local one
/// without reshaping this type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateLimitDecision {
	Allowed { remaining: u64 },
	Denied { retry_after: Duration },
}

impl RateLimitDecision {
	pub fn is_allowed(&self) -> bool {
		matches!(self, RateLimitDecision::Allowed { .. })
	}
}

/// A lazy-refill token bucket. `rate` is tokens/sec, fixed at `max / 60`
/// for a per-minute limit. Refill is recomputed only on access, never by a
/// background ticker.
#[derive(Debug, Clone, Copy)]
struct Bucket {
	tokens: f64,
	max: f64,
	rate: f64,
	last_fill: Instant,
}

impl Bucket {
	fn new(max_per_minute: u64, now: Instant) -> Self {
		let max = max_per_minute as f64;
		Self {
			tokens: max,
			max,
			rate: max / 60.0,
			last_fill: now,
		}
	}

	/// Recomputes `tokens` for elapsed time. Non-positive elapsed (clock
	/// skew, or a `last_fill` set in the future) is a no-op: refill never
	/// decreases `tokens`.
	fn refill(&mut self, now: Instant) {
		if now <= self.last_fill {
			return;
		}
		let elapsed = now.duration_since(self.last_fill).as_secs_f64();
		self.tokens = (self.tokens + elapsed * self.rate).min(self.max);
		self.last_fill = now;
	}

	/// Refills, then either subtracts `n` and allows, or denies, leaving
	/// `tokens` untouched.
	fn try_consume(&mut self, n: u64, now: Instant) -> RateLimitDecision {
		self.refill(now);
		let n = n as f64;
		if self.tokens >= n {
			self.tokens -= n;
			RateLimitDecision::Allowed { remaining: self.tokens.floor() as u64 }
		} else {
			RateLimitDecision::Denied { retry_after: self.retry_after(n) }
		}
	}

	/// Only meaningful after a denial, where `rate` is necessarily
	/// positive -- a bucket is never constructed for a 0 limit.
	fn retry_after(&self, n: f64) -> Duration {
		let deficit = (n - self.tokens).max(0.0);
		Duration::from_secs_f64(deficit / self.rate)
	}

	fn adjust(&mut self, delta: i64, now: Instant) {
		self.refill(now);
		self.tokens = (self.tokens + delta as f64).clamp(0.0, self.max);
	}
}

/// Pair of optional RPM/TPM buckets plus the limits they were built from,
/// and the last time either axis was touched. Exclusively owned by the
/// `Registry` keyed by API-key id; each bucket is its own
/// `parking_lot::Mutex` since many concurrent requests for the same key
/// share one `Arc<Limiter>`.
pub struct Limiter {
	limits: Limits,
	rpm: Option<Mutex<Bucket>>,
	tpm: Option<Mutex<Bucket>>,
	last_used: Mutex<Instant>,
}

impl Limiter {
	fn new(limits: Limits, now: Instant) -> Self {
		Self {
			limits,
			rpm: (limits.rpm > 0).then(|| Mutex::new(Bucket::new(limits.rpm, now))),
			tpm: (limits.tpm > 0).then(|| Mutex::new(Bucket::new(limits.tpm, now))),
			last_used: Mutex::new(now),
		}
	}

	pub fn limits(&self) -> Limits {
		self.limits
	}

	/// Consumes one request against the RPM bucket. Denial here does not
	/// touch the TPM bucket -- the two axes are independent.
	pub fn try_consume_request(&self) -> RateLimitDecision {
		self.touch();
		match &self.rpm {
			Some(bucket) => bucket.lock().try_consume(1, Instant::now()),
			None => RateLimitDecision::Allowed { remaining: u64::MAX },
		}
	}

	/// Consumes `tokens` against the TPM bucket, independent of RPM.
	pub fn try_consume_tokens(&self, tokens: u64) -> RateLimitDecision {
		self.touch();
		match &self.tpm {
			Some(bucket) => bucket.lock().try_consume(tokens, Instant::now()),
			None => RateLimitDecision::Allowed { remaining: u64::MAX },
		}
	}

	/// Refunds over-estimated TPM usage after a stream completes and the
	/// real token count is known.
	pub fn adjust_tokens(&self, delta: i64) {
		self.touch();
		if let Some(bucket) = &self.tpm {
			bucket.lock().adjust(delta, Instant::now());
		}
	}

	fn touch(&self) {
		*self.last_used.lock() = Instant::now();
	}

	fn last_used(&self) -> Instant {
		*self.last_used.lock()
	}
}

/// Maps API-key id to `Limiter`. Read-lock for the fast-path lookup,
/// write-lock for creation/replacement/eviction; the write path
/// double-checks after upgrading in case another writer raced it in.
#[derive(Default)]
pub struct Registry {
	limiters: RwLock<HashMap<String, Arc<Limiter>>>,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the existing `Limiter` for `key_id` iff its stored `Limits`
	/// equal `limits`; otherwise constructs and stores a fresh one. Limits
	/// changes are observed out-of-band (a host's config reload), so the
	/// registry is self-reconfiguring rather than requiring an explicit
	/// invalidation call.
	pub fn get_or_create(&self, key_id: &str, limits: Limits) -> Arc<Limiter> {
		if let Some(existing) = self.limiters.read().get(key_id) {
			if existing.limits == limits {
				return existing.clone();
			}
		}
		let mut write = self.limiters.write();
		if let Some(existing) = write.get(key_id) {
			if existing.limits == limits {
				return existing.clone();
			}
		}
		let fresh = Arc::new(Limiter::new(limits, Instant::now()));
		write.insert(key_id.to_string(), fresh.clone());
		fresh
	}

	/// Removes any `Limiter` whose `last_used` is older than `cutoff`.
	pub fn evict_stale(&self, cutoff: Instant) {
		self.limiters.write().retain(|_, limiter| limiter.last_used() >= cutoff);
	}

	pub fn len(&self) -> usize {
		self.limiters.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn refill_allows_after_wait() {
		let now = Instant::now();
		let mut bucket = Bucket::new(60, now); // rate = 1 token/sec
		for _ in 0..60 {
			assert!(matches!(bucket.try_consume(1, now), RateLimitDecision::Allowed { .. }));
		}
		let denied = bucket.try_consume(1, now);
		let retry_after = match denied {
			RateLimitDecision::Denied { retry_after } => retry_after,
			other => panic!("expected denial, got {other:?}"),
		};
		assert!(retry_after <= Duration::from_secs(2));

		let later = now + Duration::from_secs(2);
		assert!(matches!(bucket.try_consume(1, later), RateLimitDecision::Allowed { .. }));
	}

	#[test]
	fn tokens_never_exceed_max() {
		let now = Instant::now();
		let mut bucket = Bucket::new(60, now);
		bucket.refill(now + Duration::from_secs(1000));
		assert_eq!(bucket.tokens, bucket.max);
	}

	#[test]
	fn clock_skew_does_not_decrease_tokens() {
		let now = Instant::now();
		let mut bucket = Bucket::new(60, now);
		bucket.tokens = 10.0;
		bucket.last_fill = now + Duration::from_secs(5); // "future" last_fill
		bucket.refill(now);
		assert_eq!(bucket.tokens, 10.0);
	}

	#[test]
	fn rpm_and_tpm_are_independent() {
		let now = Instant::now();
		let limiter = Limiter::new(Limits::new(1, 1_000_000), now);
		assert!(limiter.try_consume_request().is_allowed());
		// RPM exhausted; a second request is denied...
		assert!(!limiter.try_consume_request().is_allowed());
		// ...but TPM, never touched, still allows.
		assert!(limiter.try_consume_tokens(1).is_allowed());
	}

	#[test]
	fn zero_limit_axis_always_allows() {
		let now = Instant::now();
		let limiter = Limiter::new(Limits::new(0, 5), now);
		for _ in 0..1000 {
			assert!(limiter.try_consume_request().is_allowed());
		}
	}

	#[test]
	fn adjust_clamps_into_range() {
		let now = Instant::now();
		let mut bucket = Bucket::new(60, now);
		bucket.tokens = 5.0;
		bucket.adjust(-1000, now);
		assert_eq!(bucket.tokens, 0.0);
		bucket.adjust(1000, now);
		assert_eq!(bucket.tokens, bucket.max);
	}

	#[test]
	fn registry_identity_and_replacement() {
		let registry = Registry::new();
		let a = registry.get_or_create("k1", Limits::new(10, 10));
		let b = registry.get_or_create("k1", Limits::new(10, 10));
		assert!(Arc::ptr_eq(&a, &b));

		let c = registry.get_or_create("k1", Limits::new(20, 10));
		assert!(!Arc::ptr_eq(&a, &c));
		assert_eq!(c.limits, Limits::new(20, 10));
	}

	#[test]
	fn evict_stale_removes_unused_limiters() {
		let registry = Registry::new();
		registry.get_or_create("k1", Limits::new(10, 10));
		let cutoff = Instant::now() + Duration::from_millis(50);
		std::thread::sleep(Duration::from_millis(60));
		registry.evict_stale(cutoff);
		assert!(registry.is_empty());
	}
}

//! Admission control: per-caller concurrency cap and token-bucket rate limit.
//!
//! This is the gate in front of the whole pipeline. A rejected request
//! allocates nothing downstream; an admitted request holds an
//! [`AdmissionPermit`] whose drop releases the concurrency slot exactly once,
//! on every exit path.

use crate::config::AdmissionConfig;
use crate::error::{AdmissionLimit, Error};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct RateBucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateBucket {
    fn full(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Lazy continuous refill; no background timer.
    fn refill(&mut self, cfg: &AdmissionConfig) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * cfg.refill_rate).min(cfg.bucket_capacity);
            self.last_refill = now;
        }
    }
}

struct Shared {
    cfg: AdmissionConfig,
    buckets: Mutex<HashMap<String, RateBucket>>,
    slots: Mutex<HashMap<String, u32>>,
}

/// Gate before any request work begins.
#[derive(Clone)]
pub struct AdmissionController {
    shared: Arc<Shared>,
}

/// Point-in-time admission counters, for `/metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionSnapshot {
    pub callers_tracked: usize,
    pub active_streams: u32,
}

impl AdmissionController {
    pub fn new(cfg: AdmissionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                cfg,
                buckets: Mutex::new(HashMap::new()),
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Admit one request for `caller_id` or reject with no side effects.
    pub fn try_admit(&self, caller_id: &str) -> Result<AdmissionPermit, Error> {
        let shared = &self.shared;

        // Cheap pre-check so a caller already at cap never touches the
        // bucket. Not authoritative; the slot count can change between here
        // and the increment below.
        {
            let slots = shared.slots.lock().expect("slots lock poisoned");
            let in_flight = slots.get(caller_id).copied().unwrap_or(0);
            if in_flight >= shared.cfg.max_concurrent {
                debug!(caller_id, in_flight, "admission rejected: concurrency");
                return Err(Error::AdmissionRejected {
                    caller_id: caller_id.to_string(),
                    limit: AdmissionLimit::Concurrency,
                });
            }
        }

        {
            let mut buckets = shared.buckets.lock().expect("buckets lock poisoned");
            let bucket = buckets
                .entry(caller_id.to_string())
                .or_insert_with(|| RateBucket::full(shared.cfg.bucket_capacity));
            bucket.refill(&shared.cfg);
            if bucket.tokens < 1.0 {
                debug!(caller_id, tokens = bucket.tokens, "admission rejected: rate");
                return Err(Error::AdmissionRejected {
                    caller_id: caller_id.to_string(),
                    limit: AdmissionLimit::RateLimit,
                });
            }
            bucket.tokens -= 1.0;
        }

        // Re-check and increment under one lock acquisition; this is the
        // authoritative cap enforcement. Racers past the pre-check refund
        // their token here so a concurrency rejection still debits nothing.
        {
            let mut slots = shared.slots.lock().expect("slots lock poisoned");
            let in_flight = slots.get(caller_id).copied().unwrap_or(0);
            if in_flight >= shared.cfg.max_concurrent {
                drop(slots);
                let mut buckets = shared.buckets.lock().expect("buckets lock poisoned");
                if let Some(bucket) = buckets.get_mut(caller_id) {
                    bucket.tokens = (bucket.tokens + 1.0).min(shared.cfg.bucket_capacity);
                }
                debug!(caller_id, in_flight, "admission rejected: concurrency");
                return Err(Error::AdmissionRejected {
                    caller_id: caller_id.to_string(),
                    limit: AdmissionLimit::Concurrency,
                });
            }
            *slots.entry(caller_id.to_string()).or_insert(0) += 1;
        }

        Ok(AdmissionPermit {
            shared: Arc::clone(shared),
            caller_id: caller_id.to_string(),
        })
    }

    /// In-flight stream count for one caller.
    pub fn in_flight(&self, caller_id: &str) -> u32 {
        self.shared
            .slots
            .lock()
            .expect("slots lock poisoned")
            .get(caller_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        let slots = self.shared.slots.lock().expect("slots lock poisoned");
        AdmissionSnapshot {
            callers_tracked: slots.len(),
            active_streams: slots.values().sum(),
        }
    }

    /// Test hook: pretend `dur` has elapsed for one caller's bucket.
    #[cfg(test)]
    fn rewind_bucket(&self, caller_id: &str, dur: std::time::Duration) {
        let mut buckets = self.shared.buckets.lock().unwrap();
        if let Some(b) = buckets.get_mut(caller_id) {
            b.last_refill -= dur;
        }
    }
}

/// RAII guard for one admitted stream. Dropping it releases the caller's
/// concurrency slot; each permit releases at most once.
pub struct AdmissionPermit {
    shared: Arc<Shared>,
    caller_id: String,
}

impl AdmissionPermit {
    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("caller_id", &self.caller_id)
            .finish_non_exhaustive()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let mut slots = self.shared.slots.lock().expect("slots lock poisoned");
        if let Some(count) = slots.get_mut(&self.caller_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                slots.remove(&self.caller_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn controller() -> AdmissionController {
        AdmissionController::new(AdmissionConfig::default())
    }

    #[test]
    fn test_concurrency_cap_of_two() {
        let ctl = controller();
        let p1 = ctl.try_admit("u1").unwrap();
        let p2 = ctl.try_admit("u1").unwrap();
        // Third concurrent attempt is rejected.
        let err = ctl.try_admit("u1").unwrap_err();
        assert!(matches!(
            err,
            Error::AdmissionRejected {
                limit: AdmissionLimit::Concurrency,
                ..
            }
        ));
        drop(p1);
        // One slot freed; admission works again.
        let p3 = ctl.try_admit("u1").unwrap();
        drop(p2);
        drop(p3);
        assert_eq!(ctl.in_flight("u1"), 0);
    }

    #[test]
    fn test_burst_of_ten_then_rate_rejection() {
        let ctl = controller();
        // Bucket holds 10; concurrency releases between requests.
        for _ in 0..10 {
            let p = ctl.try_admit("u1").unwrap();
            drop(p);
        }
        let err = ctl.try_admit("u1").unwrap_err();
        assert!(matches!(
            err,
            Error::AdmissionRejected {
                limit: AdmissionLimit::RateLimit,
                ..
            }
        ));

        // After >= 1 second, exactly one more token is available.
        ctl.rewind_bucket("u1", Duration::from_millis(1050));
        let p = ctl.try_admit("u1").unwrap();
        drop(p);
        assert!(ctl.try_admit("u1").is_err());
    }

    #[test]
    fn test_rejection_has_no_side_effects() {
        let ctl = controller();
        let _p1 = ctl.try_admit("u1").unwrap();
        let _p2 = ctl.try_admit("u1").unwrap();
        // Concurrency rejection must not debit the bucket.
        for _ in 0..20 {
            let _ = ctl.try_admit("u1");
        }
        drop(_p1);
        drop(_p2);
        // 10 - 2 = 8 tokens should still be there.
        for _ in 0..8 {
            let p = ctl.try_admit("u1").unwrap();
            drop(p);
        }
        assert!(ctl.try_admit("u1").is_err());
    }

    #[test]
    fn test_parallel_admissions_respect_cap() {
        use std::sync::Barrier;
        use std::thread;

        let ctl = controller();
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ctl = ctl.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    ctl.try_admit("u1").ok()
                })
            })
            .collect();
        let permits: Vec<AdmissionPermit> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(permits.len(), 2, "cap is 2 regardless of contention");
        assert_eq!(ctl.in_flight("u1"), 2);
        drop(permits);
        assert_eq!(ctl.in_flight("u1"), 0);

        // Losers refunded their tokens: 10 - 2 = 8 remain.
        for _ in 0..8 {
            let p = ctl.try_admit("u1").unwrap();
            drop(p);
        }
        assert!(ctl.try_admit("u1").is_err());
    }

    #[test]
    fn test_callers_are_independent() {
        let ctl = controller();
        let _a = ctl.try_admit("u1").unwrap();
        let _b = ctl.try_admit("u1").unwrap();
        assert!(ctl.try_admit("u1").is_err());
        assert!(ctl.try_admit("u2").is_ok());
    }

    #[test]
    fn test_slot_released_exactly_once() {
        let ctl = controller();
        let before = ctl.in_flight("u1");
        let p = ctl.try_admit("u1").unwrap();
        assert_eq!(ctl.in_flight("u1"), before + 1);
        drop(p);
        assert_eq!(ctl.in_flight("u1"), before);
    }

    #[test]
    fn test_snapshot_counts() {
        let ctl = controller();
        let _a = ctl.try_admit("u1").unwrap();
        let _b = ctl.try_admit("u2").unwrap();
        let snap = ctl.snapshot();
        assert_eq!(snap.callers_tracked, 2);
        assert_eq!(snap.active_streams, 2);
    }
}

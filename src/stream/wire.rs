//! Wire flush cadence for token delivery.
//!
//! Upstream chunks are appended as they arrive, but the buffer is handed to
//! the transport only when enough time has passed since the last flush or
//! enough bytes have accumulated, whichever comes first. Callers pass the
//! current instant so the cadence stays testable.

use std::time::{Duration, Instant};

pub struct WireBuffer {
    buf: String,
    last_flush: Instant,
    interval: Duration,
    max_bytes: usize,
}

impl WireBuffer {
    pub fn new(interval: Duration, max_bytes: usize, now: Instant) -> Self {
        Self {
            buf: String::new(),
            last_flush: now,
            interval,
            max_bytes,
        }
    }

    /// Append one chunk; returns the accumulated text when a flush is due.
    pub fn push(&mut self, text: &str, now: Instant) -> Option<String> {
        self.buf.push_str(text);
        if self.buf.len() >= self.max_bytes || now.duration_since(self.last_flush) >= self.interval
        {
            return self.take(now);
        }
        None
    }

    /// Drain whatever is buffered, due or not. Used at stream end.
    pub fn drain(&mut self, now: Instant) -> Option<String> {
        self.take(now)
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, now: Instant) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        self.last_flush = now;
        Some(std::mem::take(&mut self.buf))
    }
}

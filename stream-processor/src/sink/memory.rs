use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::sink::Sink;

/// Sink that keeps every write in memory.
///
/// Used by tests and local runs. Failures can be injected to exercise the
/// dispatcher's retry path and the engine's partition halting.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<(String, String)>>,
    attempts: AtomicUsize,
    flushes: AtomicUsize,
    fail_next: AtomicU32,
    fail_permanently: AtomicBool,
    fail_transient_forever: AtomicBool,
    write_delay_ms: AtomicU32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` writes with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every write with a transient error until [`MemorySink::heal`].
    pub fn fail_always(&self) {
        self.fail_transient_forever.store(true, Ordering::SeqCst);
    }

    /// Fail every write with a non-retryable error until [`MemorySink::heal`].
    pub fn fail_permanently(&self) {
        self.fail_permanently.store(true, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.fail_next.store(0, Ordering::SeqCst);
        self.fail_transient_forever.store(false, Ordering::SeqCst);
        self.fail_permanently.store(false, Ordering::SeqCst);
    }

    /// Make each write take `delay` before completing.
    pub fn set_write_delay(&self, delay: Duration) {
        let ms = u32::try_from(delay.as_millis()).unwrap_or(u32::MAX);
        self.write_delay_ms.store(ms, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<(String, String)> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn values(&self) -> Vec<String> {
        self.records().into_iter().map(|(_, v)| v).collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of write calls, failed ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write(&self, key: &str, value: &str) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay_ms = self.write_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(u64::from(delay_ms))).await;
        }

        if self.fail_permanently.load(Ordering::SeqCst) {
            return Err(SinkError::Fatal("injected permanent failure".to_string()));
        }
        if self.fail_transient_forever.load(Ordering::SeqCst) || self.take_injected_failure() {
            return Err(SinkError::Transient("injected failure".to_string()));
        }

        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((key.to_string(), value.to_string()));
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let sink = MemorySink::new();
        sink.fail_next(1);

        assert!(sink.write("k", "a").await.is_err());
        assert!(sink.write("k", "b").await.is_ok());
        assert_eq!(sink.values(), vec!["b".to_string()]);
        assert_eq!(sink.attempts(), 2);
    }

    #[tokio::test]
    async fn test_heal_clears_failures() {
        let sink = MemorySink::new();
        sink.fail_permanently();
        assert!(matches!(
            sink.write("k", "v").await,
            Err(SinkError::Fatal(_))
        ));

        sink.heal();
        assert!(sink.write("k", "v").await.is_ok());
    }
}

//! Batching audit queue
//!
//! Records are buffered in memory and written to the log store in batches.
//! A flush happens when the buffer reaches the batch size, when the batch
//! timer fires, or when `force_flush` is called.
//!
//! The buffer lives behind a std mutex that is never held across an await.
//! Flushes are serialized by an async gate; a flush detaches its batch under
//! the buffer lock and writes it on the blocking pool, so enqueues never
//! wait on store I/O.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::BatchConfig;
use crate::error::{AuditError, AuditResult};
use crate::storage::AuditLogStore;

use super::entry::AuditLogRecord;

/// Result of a single enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOutcome {
    /// Records waiting in the buffer after this enqueue
    pub buffered: usize,
    /// Whether this enqueue started an immediate flush
    pub flush_triggered: bool,
}

/// What a flush did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Records detached from the buffer
    pub attempted: usize,
    /// Records that reached the store
    pub written: usize,
    /// Records moved to the dead-letter list
    pub dead_lettered: usize,
    /// Whether single-record fallback was used
    pub used_fallback: bool,
    /// Batch write retries performed
    pub retries: u32,
}

impl FlushReport {
    fn merge(&mut self, other: FlushReport) {
        self.attempted += other.attempted;
        self.written += other.written;
        self.dead_lettered += other.dead_lettered;
        self.used_fallback |= other.used_fallback;
        self.retries += other.retries;
    }
}

/// A record that failed both the batch write and its single write
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub record: AuditLogRecord,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Point-in-time queue statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queue_size: usize,
    pub batch_size: usize,
    pub batch_interval_ms: u64,
    pub batching_enabled: bool,
    pub is_full: bool,
    pub timer_pending: bool,
    pub dead_letters: usize,
    pub records_written: u64,
    pub flushes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushTrigger {
    Threshold,
    Timer,
}

struct QueueState {
    buffer: VecDeque<AuditLogRecord>,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever the timer is armed or cancelled
    timer_generation: u64,
    threshold_flush_pending: bool,
    config: BatchConfig,
}

struct QueueShared {
    store: Arc<dyn AuditLogStore>,
    state: Mutex<QueueState>,
    flush_gate: tokio::sync::Mutex<()>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    records_written: AtomicU64,
    flushes: AtomicU64,
}

fn lock_err<E: std::fmt::Display>(e: E) -> AuditError {
    AuditError::Storage(format!("Failed to acquire audit queue lock: {}", e))
}

/// Buffer of pending audit log records with batched, timed flushing
pub struct AuditQueue {
    shared: Arc<QueueShared>,
}

impl AuditQueue {
    pub fn new(store: Arc<dyn AuditLogStore>, config: BatchConfig) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                store,
                state: Mutex::new(QueueState {
                    buffer: VecDeque::new(),
                    timer: None,
                    timer_generation: 0,
                    threshold_flush_pending: false,
                    config,
                }),
                flush_gate: tokio::sync::Mutex::new(()),
                dead_letters: Mutex::new(Vec::new()),
                records_written: AtomicU64::new(0),
                flushes: AtomicU64::new(0),
            }),
        }
    }

    /// Append a record and schedule its flush
    ///
    /// Never blocks on I/O. Outside a tokio runtime the record stays
    /// buffered until the next `flush` or `force_flush`.
    pub fn enqueue(&self, record: AuditLogRecord) -> AuditResult<EnqueueOutcome> {
        let mut st = self.shared.lock_state()?;
        st.buffer.push_back(record);
        let flush_triggered = QueueShared::schedule(&self.shared, &mut st);
        Ok(EnqueueOutcome {
            buffered: st.buffer.len(),
            flush_triggered,
        })
    }

    /// Flush one batch now
    pub async fn flush(&self) -> AuditResult<FlushReport> {
        let _gate = self.shared.flush_gate.lock().await;
        self.shared.flush_batch().await
    }

    /// Drain the whole buffer, bypassing the timer and threshold
    ///
    /// Waits for any in-flight flush first. Stops at the first batch that
    /// fails without fallback; its records are back in the buffer.
    pub async fn force_flush(&self) -> AuditResult<FlushReport> {
        {
            let mut st = self.shared.lock_state()?;
            cancel_timer(&mut st);
        }

        let _gate = self.shared.flush_gate.lock().await;
        let mut total = FlushReport::default();
        loop {
            let report = self.shared.flush_batch().await?;
            if report.attempted == 0 {
                break;
            }
            total.merge(report);
        }

        if total.attempted > 0 {
            debug!(records = total.written, "Force-flushed audit queue");
        }
        Ok(total)
    }

    /// Apply new batching settings without rebuilding the queue
    pub fn reload(&self, config: BatchConfig) -> AuditResult<()> {
        let mut st = self.shared.lock_state()?;
        let interval_changed = st.config.batch_interval_ms != config.batch_interval_ms;
        st.config = config;
        if interval_changed {
            cancel_timer(&mut st);
        }
        if !st.buffer.is_empty() {
            QueueShared::schedule(&self.shared, &mut st);
        }
        Ok(())
    }

    pub fn stats(&self) -> AuditResult<QueueStats> {
        let st = self.shared.lock_state()?;
        let dead_letters = self.shared.dead_letters.lock().map_err(lock_err)?.len();
        let batch_size = st.config.effective_batch_size();
        Ok(QueueStats {
            queue_size: st.buffer.len(),
            batch_size,
            batch_interval_ms: st.config.batch_interval_ms,
            batching_enabled: st.config.enabled,
            is_full: st.buffer.len() >= batch_size,
            timer_pending: st.timer.is_some(),
            dead_letters,
            records_written: self.shared.records_written.load(Ordering::Relaxed),
            flushes: self.shared.flushes.load(Ordering::Relaxed),
        })
    }

    /// Records that could not be written even one at a time
    pub fn dead_letters(&self) -> AuditResult<Vec<DeadLetter>> {
        Ok(self.shared.dead_letters.lock().map_err(lock_err)?.clone())
    }

    /// Move dead letters back to the head of the buffer, returning how many
    pub fn requeue_dead_letters(&self) -> AuditResult<usize> {
        let letters: Vec<DeadLetter> =
            std::mem::take(&mut *self.shared.dead_letters.lock().map_err(lock_err)?);
        if letters.is_empty() {
            return Ok(0);
        }

        let count = letters.len();
        let mut st = self.shared.lock_state()?;
        for letter in letters.into_iter().rev() {
            st.buffer.push_front(letter.record);
        }
        QueueShared::schedule(&self.shared, &mut st);
        debug!(records = count, "Requeued dead-lettered audit records");
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().map(|st| st.buffer.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AuditQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditQueue")
            .field("store", &self.shared.store)
            .field("len", &self.len())
            .finish()
    }
}

impl Drop for AuditQueue {
    fn drop(&mut self) {
        if let Ok(mut st) = self.shared.state.lock() {
            cancel_timer(&mut st);
            if !st.buffer.is_empty() {
                warn!(
                    records = st.buffer.len(),
                    "Audit queue dropped with unflushed records; call force_flush before shutdown"
                );
            }
        }
    }
}

fn cancel_timer(st: &mut QueueState) {
    if let Some(timer) = st.timer.take() {
        st.timer_generation += 1;
        timer.abort();
    }
}

impl QueueShared {
    fn lock_state(&self) -> AuditResult<MutexGuard<'_, QueueState>> {
        self.state.lock().map_err(lock_err)
    }

    /// Start a threshold flush or arm the timer. Returns true when a
    /// threshold flush was started.
    fn schedule(shared: &Arc<Self>, st: &mut QueueState) -> bool {
        let Ok(handle) = Handle::try_current() else {
            return false;
        };

        if st.buffer.len() >= st.config.effective_batch_size() {
            cancel_timer(st);
            if st.threshold_flush_pending {
                return false;
            }
            st.threshold_flush_pending = true;
            let shared = Arc::clone(shared);
            handle.spawn(async move { shared.flush_in_background(FlushTrigger::Threshold).await });
            return true;
        }

        if st.timer.is_none() {
            Self::arm_timer(shared, st, &handle);
        }
        false
    }

    fn arm_timer(shared: &Arc<Self>, st: &mut QueueState, handle: &Handle) {
        st.timer_generation += 1;
        let generation = st.timer_generation;
        let interval = st.config.interval();
        let shared = Arc::clone(shared);

        st.timer = Some(handle.spawn(async move {
            tokio::time::sleep(interval).await;
            {
                let Ok(mut st) = shared.state.lock() else {
                    return;
                };
                if st.timer_generation != generation {
                    return;
                }
                st.timer = None;
            }
            shared.flush_in_background(FlushTrigger::Timer).await;
        }));
    }

    async fn flush_in_background(self: Arc<Self>, trigger: FlushTrigger) {
        loop {
            let result = {
                let _gate = self.flush_gate.lock().await;
                self.flush_batch().await
            };

            let failed = match result {
                Ok(report) => {
                    if report.attempted > 0 {
                        debug!(trigger = ?trigger, written = report.written, "Flushed audit batch");
                    }
                    false
                }
                Err(e) => {
                    error!(trigger = ?trigger, error = %e, "Audit batch flush failed");
                    true
                }
            };

            let Ok(mut st) = self.state.lock() else {
                error!("Audit queue lock poisoned; background flush stopped");
                return;
            };

            if !failed && st.buffer.len() >= st.config.effective_batch_size() {
                continue;
            }

            if trigger == FlushTrigger::Threshold {
                st.threshold_flush_pending = false;
            }

            // Leftovers, including requeued records, wait for the next tick
            if !st.buffer.is_empty() && st.timer.is_none() {
                if let Ok(handle) = Handle::try_current() {
                    Self::arm_timer(&self, &mut st, &handle);
                }
            }
            return;
        }
    }

    /// Detach and write one batch. Callers hold the flush gate.
    async fn flush_batch(&self) -> AuditResult<FlushReport> {
        let (batch, config) = {
            let mut st = self.lock_state()?;
            let take = st.config.batch_size.max(1).min(st.buffer.len());
            let batch: Vec<AuditLogRecord> = st.buffer.drain(..take).collect();
            (batch, st.config.clone())
        };

        if batch.is_empty() {
            return Ok(FlushReport::default());
        }

        let count = batch.len();
        let batch = Arc::new(batch);
        self.flushes.fetch_add(1, Ordering::Relaxed);

        let mut retries = 0;
        let batch_error = loop {
            match self.write_batch(Arc::clone(&batch)).await {
                Ok(()) => {
                    self.records_written.fetch_add(count as u64, Ordering::Relaxed);
                    return Ok(FlushReport {
                        attempted: count,
                        written: count,
                        retries,
                        ..FlushReport::default()
                    });
                }
                Err(e) if retries < config.max_retries => {
                    retries += 1;
                    warn!(batch = count, attempt = retries, error = %e, "Audit batch write failed, retrying");
                    tokio::time::sleep(config.backoff(retries)).await;
                }
                Err(e) => break e,
            }
        };

        let batch = Arc::try_unwrap(batch).unwrap_or_else(|shared| (*shared).clone());

        if config.fallback_to_realtime {
            warn!(batch = count, error = %batch_error, "Batch write failed, falling back to single-record writes");
            let mut report = FlushReport {
                attempted: count,
                used_fallback: true,
                retries,
                ..FlushReport::default()
            };

            for record in batch {
                match self.write_one(record.clone()).await {
                    Ok(()) => report.written += 1,
                    Err(e) => {
                        error!(
                            record_id = %record.id,
                            entity_type = %record.entity_type,
                            entity_id = %record.entity_id,
                            error = %e,
                            "Audit record failed single write; moved to dead letters"
                        );
                        self.dead_letters.lock().map_err(lock_err)?.push(DeadLetter {
                            record,
                            error: e.to_string(),
                            failed_at: Utc::now(),
                        });
                        report.dead_lettered += 1;
                    }
                }
            }

            self.records_written
                .fetch_add(report.written as u64, Ordering::Relaxed);
            return Ok(report);
        }

        // Requeued exactly once, here; callers must not re-insert
        {
            let mut st = self.lock_state()?;
            for record in batch.into_iter().rev() {
                st.buffer.push_front(record);
            }
        }
        warn!(batch = count, "Audit batch requeued after write failure");

        Err(AuditError::Persistence(format!(
            "Batch write of {} audit records failed after {} attempt(s): {}",
            count,
            retries + 1,
            batch_error
        )))
    }

    async fn write_batch(&self, batch: Arc<Vec<AuditLogRecord>>) -> AuditResult<()> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.insert_many(&batch))
            .await
            .map_err(|e| AuditError::Persistence(format!("Audit write task failed: {}", e)))?
    }

    async fn write_one(&self, record: AuditLogRecord) -> AuditResult<()> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.insert_one(&record))
            .await
            .map_err(|e| AuditError::Persistence(format!("Audit write task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEntry, AuditFilter, SortOrder};
    use crate::models::{ActorContext, EntityState, EntityType};
    use crate::storage::{AnonymizeTarget, ArchiveReport, MemoryAuditLogStore};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;
    use uuid::Uuid;

    /// Memory store whose writes can be made to fail
    #[derive(Debug, Default)]
    struct ScriptedStore {
        inner: MemoryAuditLogStore,
        many_calls: AtomicUsize,
        one_calls: AtomicUsize,
        fail_many: AtomicBool,
        fail_ids: Mutex<HashSet<Uuid>>,
    }

    impl ScriptedStore {
        fn records(&self) -> Vec<AuditLogRecord> {
            self.inner.all().unwrap()
        }

        fn many_calls(&self) -> usize {
            self.many_calls.load(Ordering::SeqCst)
        }
    }

    impl AuditLogStore for ScriptedStore {
        fn insert_many(&self, records: &[AuditLogRecord]) -> AuditResult<()> {
            self.many_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_many.load(Ordering::SeqCst) {
                return Err(AuditError::Persistence("connection reset".into()));
            }
            self.inner.insert_many(records)
        }

        fn insert_one(&self, record: &AuditLogRecord) -> AuditResult<()> {
            self.one_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_ids.lock().unwrap().contains(&record.id) {
                return Err(AuditError::Persistence("row rejected".into()));
            }
            self.inner.insert_one(record)
        }

        fn query(&self, filter: &AuditFilter, limit: Option<usize>) -> AuditResult<Vec<AuditLogRecord>> {
            self.inner.query(filter, limit)
        }

        fn count(&self, filter: &AuditFilter) -> AuditResult<usize> {
            self.inner.count(filter)
        }

        fn recent_window(
            &self,
            filter: &AuditFilter,
            window: usize,
        ) -> AuditResult<(Vec<AuditLogRecord>, usize)> {
            self.inner.recent_window(filter, window)
        }

        fn anonymize(&self, target: &AnonymizeTarget) -> AuditResult<usize> {
            self.inner.anonymize(target)
        }

        fn archive_before(&self, cutoff: DateTime<Utc>) -> AuditResult<ArchiveReport> {
            self.inner.archive_before(cutoff)
        }
    }

    fn record(id: &str) -> AuditLogRecord {
        let entry = AuditEntry::create(
            EntityType::Member,
            id,
            EntityState::from_value(json!({"name": id})).unwrap(),
        );
        AuditLogRecord::from_entry(entry, None, &ActorContext::system(), Utc::now())
    }

    fn config(batch_size: usize, interval_ms: u64) -> BatchConfig {
        BatchConfig {
            enabled: true,
            batch_size,
            batch_interval_ms: interval_ms,
            max_retries: 0,
            retry_backoff_ms: 1,
            fallback_to_realtime: true,
        }
    }

    fn queue_with(config: BatchConfig) -> (AuditQueue, Arc<ScriptedStore>) {
        let store = Arc::new(ScriptedStore::default());
        let queue = AuditQueue::new(store.clone(), config);
        (queue, store)
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_full_batch_flushes_without_timer() {
        let (queue, store) = queue_with(config(50, 60_000));

        for i in 0..49 {
            let outcome = queue.enqueue(record(&format!("m-{}", i))).unwrap();
            assert!(!outcome.flush_triggered);
        }
        let outcome = queue.enqueue(record("m-49")).unwrap();
        assert!(outcome.flush_triggered);

        wait_until(|| store.records().len() == 50).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.many_calls(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_partial_batch_waits_for_timer() {
        let (queue, store) = queue_with(config(50, 60_000));

        for i in 0..49 {
            queue.enqueue(record(&format!("m-{}", i))).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.many_calls(), 0);
        let stats = queue.stats().unwrap();
        assert_eq!(stats.queue_size, 49);
        assert!(stats.timer_pending);
        assert!(!stats.is_full);

        let report = queue.force_flush().await.unwrap();
        assert_eq!(report.written, 49);
        assert_eq!(store.many_calls(), 1);
        assert!(!queue.stats().unwrap().timer_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_partial_batch() {
        let (queue, store) = queue_with(config(50, 30_000));

        for i in 0..3 {
            queue.enqueue(record(&format!("m-{}", i))).unwrap();
        }
        tokio::time::sleep(Duration::from_secs(31)).await;

        wait_until(|| store.records().len() == 3).await;
        assert_eq!(store.many_calls(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_flush_preserves_fifo_order() {
        let (queue, store) = queue_with(config(2, 60_000));
        for id in ["a", "b", "c", "d", "e"] {
            queue.enqueue(record(id)).unwrap();
        }
        queue.force_flush().await.unwrap();
        wait_until(|| store.records().len() == 5).await;

        let ids: Vec<String> = store.records().into_iter().map(|r| r.entity_id).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_fallback_dead_letters_failed_records() {
        let mut cfg = config(50, 60_000);
        cfg.max_retries = 2;
        let (queue, store) = queue_with(cfg);
        store.fail_many.store(true, Ordering::SeqCst);

        let bad = record("bad");
        store.fail_ids.lock().unwrap().insert(bad.id);
        queue.enqueue(record("ok-1")).unwrap();
        queue.enqueue(bad).unwrap();
        queue.enqueue(record("ok-2")).unwrap();

        let report = queue.force_flush().await.unwrap();
        assert!(report.used_fallback);
        assert_eq!(report.retries, 2);
        assert_eq!(report.written, 2);
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(store.many_calls(), 3);
        assert_eq!(store.one_calls.load(Ordering::SeqCst), 3);

        let dead = queue.dead_letters().unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].record.entity_id, "bad");
        assert_eq!(queue.stats().unwrap().dead_letters, 1);

        // Once the store recovers, dead letters can be replayed
        store.fail_many.store(false, Ordering::SeqCst);
        store.fail_ids.lock().unwrap().clear();
        assert_eq!(queue.requeue_dead_letters().unwrap(), 1);
        queue.force_flush().await.unwrap();
        assert_eq!(store.records().len(), 3);
        assert!(queue.dead_letters().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_without_fallback_requeues_once() {
        let mut cfg = config(50, 60_000);
        cfg.fallback_to_realtime = false;
        let (queue, store) = queue_with(cfg);
        store.fail_many.store(true, Ordering::SeqCst);

        for id in ["a", "b", "c"] {
            queue.enqueue(record(id)).unwrap();
        }

        let err = queue.force_flush().await.unwrap_err();
        assert!(err.is_persistence());
        assert_eq!(queue.len(), 3);
        assert_eq!(store.one_calls.load(Ordering::SeqCst), 0);

        store.fail_many.store(false, Ordering::SeqCst);
        queue.enqueue(record("d")).unwrap();
        queue.force_flush().await.unwrap();

        let ids: Vec<String> = store
            .query(&AuditFilter::new().order(SortOrder::OldestFirst), None)
            .unwrap()
            .into_iter()
            .map(|r| r.entity_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_realtime_mode_flushes_every_record() {
        let mut cfg = config(50, 60_000);
        cfg.enabled = false;
        let (queue, store) = queue_with(cfg);

        let outcome = queue.enqueue(record("m-1")).unwrap();
        assert!(outcome.flush_triggered);
        wait_until(|| store.records().len() == 1).await;
    }

    #[tokio::test]
    async fn test_reload_switches_to_realtime() {
        let (queue, store) = queue_with(config(50, 60_000));
        queue.enqueue(record("m-1")).unwrap();
        assert_eq!(store.many_calls(), 0);

        let mut cfg = config(50, 60_000);
        cfg.enabled = false;
        queue.reload(cfg).unwrap();

        wait_until(|| store.records().len() == 1).await;
        assert_eq!(queue.stats().unwrap().batch_size, 1);
    }

    #[test]
    fn test_enqueue_outside_runtime_stays_buffered() {
        let (queue, store) = queue_with(config(1, 10));

        let outcome = queue.enqueue(record("m-1")).unwrap();
        assert!(!outcome.flush_triggered);
        assert_eq!(outcome.buffered, 1);
        assert_eq!(store.many_calls(), 0);

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let report = runtime.block_on(queue.force_flush()).unwrap();
        assert_eq!(report.written, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enqueue_loses_nothing() {
        let (queue, store) = queue_with(config(10, 60_000));
        let queue = Arc::new(queue);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    for i in 0..25 {
                        queue.enqueue(record(&format!("t{}-{}", t, i))).unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        queue.force_flush().await.unwrap();
        let records = store.records();
        assert_eq!(records.len(), 200);
        let unique: HashSet<Uuid> = records.iter().map(|r| r.id).collect();
        assert_eq!(unique.len(), 200);
    }
}

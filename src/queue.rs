//! Work Queue (§4.6): a bounded FIFO with configurable concurrency, a
//! per-job timeout, retry-with-requeue-at-front, oldest-drop backpressure,
//! and rolling stats. Workers block on a [`tokio::sync::Notify`] when the
//! queue is empty rather than polling on a restart timer (§9 redesign note).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::record::Record;
use crate::sink::RecordSink;
use crate::stats::Stats;

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub max_depth: usize,
    pub max_concurrency: usize,
    pub per_job_timeout: Duration,
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_depth: 2000,
            max_concurrency: 10,
            per_job_timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// Result of an [`WorkQueue::enqueue`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The queue has zero capacity, so no job — old or new — can be held.
    QueueFull,
    /// Shutdown has begun; new enqueues are refused (§4.6 cancellation).
    ShuttingDown,
}

struct Job {
    imei: Option<String>,
    record: Record,
    attempt: u32,
}

struct Inner {
    jobs: Mutex<VecDeque<Job>>,
    notify: Notify,
    stats: Arc<Stats>,
    shutting_down: AtomicBool,
    config: QueueConfig,
}

/// Bounded multi-producer/multi-consumer job queue. Producers are
/// connection tasks; consumers are `max_concurrency` worker tasks (§5).
///
/// Shares one [`Stats`] with the [`crate::pipeline::ConnectionPipeline`]s
/// that feed it, so `queued`/`processed`/`dropped` sit alongside
/// `framing_errors`/`parse_errors` in a single snapshot.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    pub fn new(config: QueueConfig, stats: Arc<Stats>) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                stats,
                shutting_down: AtomicBool::new(false),
                config,
            }),
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.inner.stats
    }

    /// Enqueues a decoded record. Never awaits on capacity: when full, the
    /// oldest pending job is dropped to make room for the incoming one
    /// (§4.6 — newest telemetry is most valuable).
    pub async fn enqueue(&self, imei: Option<String>, record: Record) -> EnqueueOutcome {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return EnqueueOutcome::Rejected(RejectReason::ShuttingDown);
        }
        if self.inner.config.max_depth == 0 {
            return EnqueueOutcome::Rejected(RejectReason::QueueFull);
        }

        let mut jobs = self.inner.jobs.lock().await;
        if jobs.len() >= self.inner.config.max_depth {
            jobs.pop_front();
            self.inner.stats.record_dropped();
        }
        jobs.push_back(Job {
            imei,
            record,
            attempt: 0,
        });
        drop(jobs);

        self.inner.stats.record_queued();
        self.inner.notify.notify_one();
        EnqueueOutcome::Accepted
    }

    /// Spawns `max_concurrency` worker tasks that drain the queue against
    /// `sink` until [`WorkQueue::shutdown`] is called and the queue empties.
    pub fn spawn_workers(&self, sink: Arc<dyn RecordSink>) -> Vec<JoinHandle<()>> {
        (0..self.inner.config.max_concurrency)
            .map(|_| {
                let queue = self.clone();
                let sink = sink.clone();
                tokio::spawn(async move { queue.worker_loop(sink).await })
            })
            .collect()
    }

    /// Rejects further enqueues; in-flight jobs run to completion or
    /// timeout and the queue is left to drain naturally (§4.6, §5).
    pub fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    async fn worker_loop(&self, sink: Arc<dyn RecordSink>) {
        loop {
            let job = self.pop_or_wait().await;
            let Some(mut job) = job else {
                if self.inner.shutting_down.load(Ordering::Acquire) {
                    return;
                }
                continue;
            };

            let start = Instant::now();
            let outcome = tokio::time::timeout(
                self.inner.config.per_job_timeout,
                run_job(sink.as_ref(), &job),
            )
            .await;

            match outcome {
                Ok(Ok(())) => {
                    self.inner.stats.record_processed(start.elapsed());
                }
                Ok(Err(_)) | Err(_) => {
                    job.attempt += 1;
                    if job.attempt > self.inner.config.max_retries {
                        self.inner.stats.record_failed();
                    } else {
                        let mut jobs = self.inner.jobs.lock().await;
                        jobs.push_front(job);
                        drop(jobs);
                        self.inner.notify.notify_one();
                    }
                }
            }
        }
    }

    async fn pop_or_wait(&self) -> Option<Job> {
        loop {
            {
                let mut jobs = self.inner.jobs.lock().await;
                if let Some(job) = jobs.pop_front() {
                    return Some(job);
                }
            }
            if self.inner.shutting_down.load(Ordering::Acquire) {
                let mut jobs = self.inner.jobs.lock().await;
                return jobs.pop_front();
            }
            tokio::select! {
                _ = self.inner.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            }
        }
    }
}

async fn run_job(sink: &dyn RecordSink, job: &Job) -> Result<(), ()> {
    let imei = job.imei.as_deref();
    sink.persist(imei, &job.record).await.map_err(|_| ())?;

    if let Err(err) = sink.broadcast(imei, &job.record).await {
        tracing::warn!(%err, "broadcast failed, job still counted as successful");
    }
    if let Err(err) = sink.evaluate_alerts(imei, &job.record).await {
        tracing::warn!(%err, "alert evaluation failed, job still counted as successful");
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sink::SinkError;
    use std::sync::atomic::AtomicUsize;

    struct CountingSink {
        persisted: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl RecordSink for CountingSink {
        async fn persist(&self, _imei: Option<&str>, _record: &Record) -> Result<(), SinkError> {
            self.persisted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn broadcast(&self, _imei: Option<&str>, _record: &Record) -> Result<(), SinkError> {
            Ok(())
        }
        async fn evaluate_alerts(
            &self,
            _imei: Option<&str>,
            _record: &Record,
        ) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn scenario_e_oldest_is_dropped_when_full() {
        let queue = WorkQueue::new(
            QueueConfig {
                max_depth: 2000,
                max_concurrency: 0,
                ..QueueConfig::default()
            },
            Arc::new(Stats::default()),
        );

        for i in 0..2001u32 {
            let mut record = Record::new();
            record.insert(0x10, crate::value::TypedValue::U16(i as u16));
            queue.enqueue(None, record).await;
        }

        let snapshot = queue.stats().snapshot();
        assert_eq!(snapshot.queued, 2001);
        assert_eq!(snapshot.dropped, 1);

        // the oldest job (sequence number 0) must be the one dropped
        let jobs = queue.inner.jobs.lock().await;
        let first = jobs.front().unwrap();
        match first.record.get(0x10) {
            Some(crate::value::TypedValue::U16(n)) => assert_eq!(*n, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn jobs_are_processed_by_workers() {
        let persisted = Arc::new(AtomicUsize::new(0));
        let sink: Arc<dyn RecordSink> = Arc::new(CountingSink {
            persisted: persisted.clone(),
        });
        let queue = WorkQueue::new(
            QueueConfig {
                max_concurrency: 2,
                ..QueueConfig::default()
            },
            Arc::new(Stats::default()),
        );
        let workers = queue.spawn_workers(sink);

        for _ in 0..10 {
            queue.enqueue(Some("123".to_string()), Record::new()).await;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        queue.shutdown();
        for handle in workers {
            let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
        }

        assert_eq!(persisted.load(Ordering::SeqCst), 10);
        assert_eq!(queue.stats().snapshot().processed, 10);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_enqueues() {
        let queue = WorkQueue::new(QueueConfig::default(), Arc::new(Stats::default()));
        queue.shutdown();
        let outcome = queue.enqueue(None, Record::new()).await;
        assert_eq!(outcome, EnqueueOutcome::Rejected(RejectReason::ShuttingDown));
    }
}

//! Background job dispatch: idempotency check, per-key claims, and a
//! bounded worker pool with a wall-clock job timeout.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shared::TaskVariant;
use tokio::sync::mpsc;

use crate::pipeline::JobRunner;
use crate::storage::{ContentStore, StoredImage};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("job queue is full")]
    QueueFull,
    #[error("dispatcher is shut down")]
    ShutDown,
}

/// Job identity: content hash plus task variant. Display names are
/// deliberately not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct JobKey {
    content_hash: String,
    variant: TaskVariant,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOutcome {
    /// The output artifact already exists; nothing was launched.
    pub already_processed: bool,
    /// A job for this (image, variant) pair is currently in flight.
    pub already_running: bool,
    /// A new job was enqueued.
    pub launched: bool,
}

struct Job {
    image: StoredImage,
    variant: TaskVariant,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub job_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 32,
            job_timeout: Duration::from_secs(300),
        }
    }
}

/// Accepts submissions from the request path and hands them to a fixed
/// pool of worker tasks. Completion is observable only through the
/// output artifact's existence.
#[derive(Clone)]
pub struct JobDispatcher {
    store: ContentStore,
    claims: Arc<Mutex<HashSet<JobKey>>>,
    queue: mpsc::Sender<Job>,
}

impl JobDispatcher {
    pub fn new(store: ContentStore, runner: Arc<dyn JobRunner>, config: DispatcherConfig) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(config.queue_capacity.max(1));
        let claims: Arc<Mutex<HashSet<JobKey>>> = Arc::new(Mutex::new(HashSet::new()));

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker_id in 0..config.workers.max(1) {
            let rx = rx.clone();
            let claims = claims.clone();
            let runner = runner.clone();
            let timeout = config.job_timeout;
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else {
                        break;
                    };
                    Self::run_one(worker_id, &*runner, &claims, &job, timeout).await;
                }
            });
        }

        Self {
            store,
            claims,
            queue: tx,
        }
    }

    async fn run_one(
        worker_id: usize,
        runner: &dyn JobRunner,
        claims: &Mutex<HashSet<JobKey>>,
        job: &Job,
        timeout: Duration,
    ) {
        log::info!(
            "worker {}: starting {} job for {}",
            worker_id,
            job.variant,
            job.image.file_name
        );
        match tokio::time::timeout(timeout, runner.run(&job.image, job.variant)).await {
            Ok(Ok(())) => {
                log::info!(
                    "worker {}: {} job for {} completed",
                    worker_id,
                    job.variant,
                    job.image.file_name
                );
            }
            Ok(Err(e)) => {
                log::error!(
                    "worker {}: {} job for {} failed: {}",
                    worker_id,
                    job.variant,
                    job.image.file_name,
                    e
                );
            }
            Err(_) => {
                log::error!(
                    "worker {}: {} job for {} timed out after {:?}",
                    worker_id,
                    job.variant,
                    job.image.file_name,
                    timeout
                );
            }
        }
        Self::release(claims, &JobKey {
            content_hash: job.image.content_hash.clone(),
            variant: job.variant,
        });
    }

    fn release(claims: &Mutex<HashSet<JobKey>>, key: &JobKey) {
        if let Ok(mut guard) = claims.lock() {
            guard.remove(key);
        }
    }

    /// Submits a job for an (image, variant) pair.
    ///
    /// An existing output artifact makes this a no-op reported as
    /// `already_processed`; an in-flight claim for the same key is
    /// reported as `already_running` instead of launching a duplicate.
    pub fn submit(
        &self,
        image: &StoredImage,
        variant: TaskVariant,
    ) -> Result<SubmitOutcome, DispatchError> {
        if self.store.output_path(variant, &image.file_name).exists() {
            log::info!(
                "{} already processed for {}, skipping",
                image.file_name,
                variant
            );
            return Ok(SubmitOutcome {
                already_processed: true,
                ..Default::default()
            });
        }

        let key = JobKey {
            content_hash: image.content_hash.clone(),
            variant,
        };

        // Compare-and-swap claim: first submission wins the launch.
        {
            let mut claims = self.claims.lock().map_err(|_| DispatchError::ShutDown)?;
            if !claims.insert(key.clone()) {
                log::info!(
                    "{} {} job already in flight, not relaunching",
                    image.file_name,
                    variant
                );
                return Ok(SubmitOutcome {
                    already_running: true,
                    ..Default::default()
                });
            }
        }

        let job = Job {
            image: image.clone(),
            variant,
        };
        if let Err(e) = self.queue.try_send(job) {
            Self::release(&self.claims, &key);
            return match e {
                mpsc::error::TrySendError::Full(_) => Err(DispatchError::QueueFull),
                mpsc::error::TrySendError::Closed(_) => Err(DispatchError::ShutDown),
            };
        }

        Ok(SubmitOutcome {
            launched: true,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Runner that writes the artifact after an optional delay.
    struct FakeRunner {
        store: ContentStore,
        delay: Duration,
        write_artifact: bool,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl JobRunner for FakeRunner {
        async fn run(
            &self,
            image: &StoredImage,
            variant: TaskVariant,
        ) -> Result<(), PipelineError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.write_artifact {
                let path = self.store.output_path(variant, &image.file_name);
                self.store.write_atomic(&path, b"artifact")?;
            }
            Ok(())
        }
    }

    fn setup(
        delay: Duration,
        write_artifact: bool,
        config: DispatcherConfig,
    ) -> (
        tempfile::TempDir,
        ContentStore,
        Arc<FakeRunner>,
        JobDispatcher,
    ) {
        let dir = tempdir().unwrap();
        let store = ContentStore::new(dir.path().join("uploads")).unwrap();
        let runner = Arc::new(FakeRunner {
            store: store.clone(),
            delay,
            write_artifact,
            runs: AtomicUsize::new(0),
        });
        let dispatcher = JobDispatcher::new(store.clone(), runner.clone(), config);
        (dir, store, runner, dispatcher)
    }

    fn stored(store: &ContentStore, name: &str, bytes: &[u8]) -> StoredImage {
        store.put(name, bytes).unwrap().image
    }

    #[tokio::test]
    async fn submit_launches_and_later_reports_already_processed() {
        let (_dir, store, runner, dispatcher) =
            setup(Duration::ZERO, true, DispatcherConfig::default());
        let image = stored(&store, "cat.jpg", b"bytes");

        let outcome = dispatcher.submit(&image, TaskVariant::Detect).unwrap();
        assert!(outcome.launched);
        assert!(!outcome.already_processed);

        // Wait for the artifact to appear.
        let path = store.output_path(TaskVariant::Detect, &image.file_name);
        for _ in 0..100 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(path.exists());

        let outcome = dispatcher.submit(&image, TaskVariant::Detect).unwrap();
        assert!(outcome.already_processed);
        assert!(!outcome.launched);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_submit_for_same_key_reports_already_running() {
        let (_dir, store, runner, dispatcher) =
            setup(Duration::from_secs(5), true, DispatcherConfig::default());
        let image = stored(&store, "cat.jpg", b"bytes");

        let first = dispatcher.submit(&image, TaskVariant::Detect).unwrap();
        assert!(first.launched);

        let second = dispatcher.submit(&image, TaskVariant::Detect).unwrap();
        assert!(second.already_running);
        assert!(!second.launched);

        // A different variant for the same image is a different key.
        let other = dispatcher.submit(&image, TaskVariant::Segment).unwrap();
        assert!(other.launched);

        // Only the claimed launches went through, not the duplicate.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(runner.runs.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn timed_out_job_leaves_no_artifact_and_can_be_resubmitted() {
        let config = DispatcherConfig {
            workers: 1,
            queue_capacity: 4,
            job_timeout: Duration::from_millis(20),
        };
        let (_dir, store, _runner, dispatcher) =
            setup(Duration::from_secs(60), true, config);
        let image = stored(&store, "cat.jpg", b"bytes");

        assert!(dispatcher.submit(&image, TaskVariant::Detect).unwrap().launched);

        // Allow the timeout to fire and the claim to be released.
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let outcome = dispatcher.submit(&image, TaskVariant::Detect);
            if let Ok(o) = &outcome {
                if o.launched {
                    assert!(
                        !store
                            .output_path(TaskVariant::Detect, &image.file_name)
                            .exists()
                    );
                    return;
                }
            }
        }
        panic!("claim was never released after timeout");
    }

    #[tokio::test]
    async fn full_queue_reports_queue_full_and_releases_claim() {
        let config = DispatcherConfig {
            workers: 1,
            queue_capacity: 1,
            job_timeout: Duration::from_secs(60),
        };
        let (_dir, store, _runner, dispatcher) =
            setup(Duration::from_secs(60), false, config);

        // Fill the single worker and the single queue slot, then one
        // more unique key must overflow.
        let a = stored(&store, "a.jpg", b"aaa");
        let b = stored(&store, "b.jpg", b"bbb");
        let c = stored(&store, "c.jpg", b"ccc");

        assert!(dispatcher.submit(&a, TaskVariant::Detect).unwrap().launched);
        // Give the worker a moment to pick up the first job.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(dispatcher.submit(&b, TaskVariant::Detect).unwrap().launched);

        let overflow = dispatcher.submit(&c, TaskVariant::Detect);
        assert!(matches!(overflow, Err(DispatchError::QueueFull)));

        // The claim was released, so the same submission stays a
        // QueueFull rather than flipping to already_running.
        let retry = dispatcher.submit(&c, TaskVariant::Detect);
        assert!(matches!(retry, Err(DispatchError::QueueFull)));
    }
}

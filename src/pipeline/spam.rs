//! Spam classifier stage — the pipeline's only concurrency throttle.
//!
//! The intake loop forwards inbound ids onto an internal work stream shared
//! by a fixed pool of workers. Closing the work stream once the input is
//! exhausted lets the workers drain what is left and exit.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::pipeline::orchestrator::STREAM_CAPACITY;
use crate::pipeline::stage::Stage;
use crate::pipeline::types::{ClassificationResult, DropEvent, DropHook, MessageId, NoopDropHook};
use crate::service::SpamChecker;

/// Classifies messages with exactly `workers` concurrent checks at most.
pub struct SpamClassifier {
    checker: Arc<dyn SpamChecker>,
    workers: usize,
    drop_hook: Arc<dyn DropHook>,
}

impl SpamClassifier {
    pub fn new(checker: Arc<dyn SpamChecker>, workers: usize) -> Self {
        Self {
            checker,
            workers: workers.max(1),
            drop_hook: Arc::new(NoopDropHook),
        }
    }

    /// Report failed classifications to `hook`.
    pub fn with_drop_hook(mut self, hook: Arc<dyn DropHook>) -> Self {
        self.drop_hook = hook;
        self
    }
}

/// Pull ids off the shared work stream until it closes.
async fn work(
    worker: usize,
    jobs: Arc<Mutex<mpsc::Receiver<MessageId>>>,
    checker: Arc<dyn SpamChecker>,
    hook: Arc<dyn DropHook>,
    output: mpsc::Sender<ClassificationResult>,
) -> usize {
    let mut classified = 0;
    loop {
        // The lock is held across `recv`: one idle worker parks on the
        // stream, the rest park on the lock. Each id is received once.
        let next = jobs.lock().await.recv().await;
        let Some(id) = next else {
            break;
        };

        match checker.has_spam(id).await {
            Ok(has_spam) => {
                debug!(worker, id = %id, has_spam, "Message classified");
                if output.send(ClassificationResult { id, has_spam }).await.is_err() {
                    break;
                }
                classified += 1;
            }
            Err(e) => {
                let error = e.to_string();
                let event = DropEvent::ClassificationFailed { id, error: e };
                warn!(
                    worker,
                    id = %id,
                    reason = event.label(),
                    error = %error,
                    "Classification failed, dropping message"
                );
                hook.on_drop(&event);
            }
        }
    }
    classified
}

#[async_trait]
impl Stage for SpamClassifier {
    type Input = MessageId;
    type Output = ClassificationResult;

    fn name(&self) -> &'static str {
        "spam_classifier"
    }

    async fn run(
        &self,
        mut input: mpsc::Receiver<MessageId>,
        output: mpsc::Sender<ClassificationResult>,
    ) {
        let (jobs_tx, jobs_rx) = mpsc::channel(STREAM_CAPACITY);
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));

        let mut pool = JoinSet::new();
        for worker in 0..self.workers {
            pool.spawn(work(
                worker,
                Arc::clone(&jobs_rx),
                Arc::clone(&self.checker),
                Arc::clone(&self.drop_hook),
                output.clone(),
            ));
        }

        let mut received = 0usize;
        while let Some(id) = input.recv().await {
            received += 1;
            if jobs_tx.send(id).await.is_err() {
                break;
            }
        }
        drop(jobs_tx);

        let mut classified = 0;
        while let Some(result) = pool.join_next().await {
            match result {
                Ok(n) => classified += n,
                Err(e) => error!(error = %e, "Spam worker failed"),
            }
        }

        info!(
            received,
            classified,
            workers = self.workers,
            "Spam classification complete"
        );
    }
}

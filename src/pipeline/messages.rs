//! Message fetcher stage: users in, message ids out, fetched in batches.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::pipeline::stage::Stage;
use crate::pipeline::types::{DropEvent, DropHook, MessageId, NoopDropHook, User};
use crate::service::MessageStore;

/// Groups users into fixed-size batches and fetches each batch concurrently.
///
/// A batch is dispatched as soon as it fills; the final partial batch is
/// dispatched once the input is exhausted. A batch whose fetch fails is
/// dropped whole.
pub struct MessageFetcher {
    store: Arc<dyn MessageStore>,
    batch_size: usize,
    drop_hook: Arc<dyn DropHook>,
}

impl MessageFetcher {
    pub fn new(store: Arc<dyn MessageStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            drop_hook: Arc::new(NoopDropHook),
        }
    }

    /// Report failed batches to `hook`.
    pub fn with_drop_hook(mut self, hook: Arc<dyn DropHook>) -> Self {
        self.drop_hook = hook;
        self
    }

    fn dispatch(
        &self,
        fetches: &mut JoinSet<()>,
        batch_no: usize,
        batch: Vec<User>,
        output: &mpsc::Sender<MessageId>,
    ) {
        let store = Arc::clone(&self.store);
        let hook = Arc::clone(&self.drop_hook);
        let output = output.clone();

        fetches.spawn(async move {
            match store.get_messages(&batch).await {
                Ok(ids) => {
                    debug!(batch = batch_no, users = batch.len(), messages = ids.len(), "Batch fetched");
                    for id in ids {
                        if output.send(id).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let users = batch.len();
                    let error = e.to_string();
                    let event = DropEvent::BatchFetchFailed {
                        users: batch,
                        error: e,
                    };
                    warn!(
                        batch = batch_no,
                        users,
                        reason = event.label(),
                        error = %error,
                        "Batch fetch failed, dropping batch"
                    );
                    hook.on_drop(&event);
                }
            }
        });
    }
}

#[async_trait]
impl Stage for MessageFetcher {
    type Input = User;
    type Output = MessageId;

    fn name(&self) -> &'static str {
        "message_fetcher"
    }

    async fn run(&self, mut input: mpsc::Receiver<User>, output: mpsc::Sender<MessageId>) {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut fetches = JoinSet::new();
        let mut batches = 0usize;

        while let Some(user) = input.recv().await {
            batch.push(user);
            if batch.len() == self.batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
                self.dispatch(&mut fetches, batches, full, &output);
                batches += 1;
            }
        }
        if !batch.is_empty() {
            self.dispatch(&mut fetches, batches, batch, &output);
            batches += 1;
        }

        while let Some(result) = fetches.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Message fetch task failed");
            }
        }

        info!(batches, batch_size = self.batch_size, "Message fetching complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatedConfig;
    use crate::pipeline::types::DropCounters;
    use crate::service::SimulatedService;

    fn user(email: &str) -> User {
        User {
            id: 0,
            email: email.to_string(),
        }
    }

    async fn fetch(stage: MessageFetcher, users: Vec<User>) -> Vec<MessageId> {
        let (in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, mut out_rx) = mpsc::channel(1);

        let feeder = tokio::spawn(async move {
            for user in users {
                in_tx.send(user).await.unwrap();
            }
        });
        let runner = tokio::spawn(async move { stage.run(in_rx, out_tx).await });

        let mut ids = Vec::new();
        while let Some(id) = out_rx.recv().await {
            ids.push(id);
        }
        feeder.await.unwrap();
        runner.await.unwrap();
        ids.sort();
        ids
    }

    fn service() -> SimulatedService {
        SimulatedService::new(SimulatedConfig::instant())
            .with_messages("a@x", [1, 2])
            .with_messages("b@x", [3])
            .with_messages("c@x", [4])
            .with_messages("d@x", [5, 6])
            .with_messages("e@x", [7])
    }

    #[tokio::test]
    async fn partial_final_batch_flushed() {
        let svc = Arc::new(service());
        let stage = MessageFetcher::new(svc.clone(), 2);
        let users = ["a@x", "b@x", "c@x", "d@x", "e@x"].map(user).to_vec();

        let ids = fetch(stage, users).await;
        assert_eq!(ids, (1..=7).map(MessageId).collect::<Vec<_>>());

        let mut sizes: Vec<usize> = svc.fetch_batches().iter().map(|b| b.len()).collect();
        sizes.sort();
        assert_eq!(sizes, vec![1, 2, 2]);
    }

    #[tokio::test]
    async fn exact_multiple_has_no_partial_batch() {
        let svc = Arc::new(service());
        let stage = MessageFetcher::new(svc.clone(), 2);
        let users = ["a@x", "b@x", "c@x", "d@x"].map(user).to_vec();

        fetch(stage, users).await;
        let batches = svc.fetch_batches();
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 2));
    }

    #[tokio::test]
    async fn no_users_no_fetches() {
        let svc = Arc::new(service());
        let stage = MessageFetcher::new(svc.clone(), 3);
        assert!(fetch(stage, Vec::new()).await.is_empty());
        assert!(svc.fetch_batches().is_empty());
    }

    #[tokio::test]
    async fn failed_batch_dropped_and_reported() {
        let svc = Arc::new(service().fail_batch_for("c@x"));
        let counters = Arc::new(DropCounters::new());
        let stage = MessageFetcher::new(svc.clone(), 2).with_drop_hook(counters.clone());
        let users = ["a@x", "b@x", "c@x", "d@x"].map(user).to_vec();

        let ids = fetch(stage, users).await;
        // Batch [c, d] is lost; batch [a, b] is unaffected.
        assert_eq!(ids, vec![MessageId(1), MessageId(2), MessageId(3)]);
        assert_eq!(counters.failed_batches(), 1);
        assert_eq!(counters.dropped_users(), 2);
    }

    #[tokio::test]
    async fn zero_batch_size_treated_as_one() {
        let svc = Arc::new(service());
        let stage = MessageFetcher::new(svc.clone(), 0);
        fetch(stage, ["a@x", "b@x"].map(user).to_vec()).await;
        assert_eq!(svc.fetch_batches().len(), 2);
    }
}

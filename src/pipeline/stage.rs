//! The `Stage` trait and the `SeedStage` source.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// A concurrent unit that turns an inbound item stream into an outbound one.
///
/// `run` returns once `input` is exhausted and all work it started has
/// finished. The orchestrator drops `output` afterwards, which is how the
/// next stage learns that no more items will arrive.
///
/// A failed `send` means the downstream stage is gone; stages stop producing
/// when that happens.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Stage name for logging.
    fn name(&self) -> &'static str;

    async fn run(&self, input: mpsc::Receiver<Self::Input>, output: mpsc::Sender<Self::Output>);
}

/// Source stage that emits pre-supplied items.
///
/// The first stream of a pipeline is closed before any stage starts, so the
/// first stage has no upstream. `SeedStage` emits its own items and then
/// forwards whatever its input still yields (nothing, in a normal run).
pub struct SeedStage<T> {
    items: Mutex<Vec<T>>,
}

impl<T> SeedStage<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: Mutex::new(items.into_iter().collect()),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Stage for SeedStage<T> {
    type Input = T;
    type Output = T;

    fn name(&self) -> &'static str {
        "seed"
    }

    async fn run(&self, mut input: mpsc::Receiver<T>, output: mpsc::Sender<T>) {
        let items = self
            .items
            .lock()
            .map(|mut items| std::mem::take(&mut *items))
            .unwrap_or_default();
        debug!(count = items.len(), "Seeding pipeline");

        for item in items {
            if output.send(item).await.is_err() {
                return;
            }
        }
        while let Some(item) = input.recv().await {
            if output.send(item).await.is_err() {
                return;
            }
        }
    }
}

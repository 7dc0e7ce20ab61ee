//! User resolver stage: emails in, deduplicated users out.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::pipeline::stage::Stage;
use crate::pipeline::types::{Email, User};
use crate::service::UserDirectory;

/// Resolves every inbound email concurrently, one task per email.
///
/// Deduplication is keyed on the *resolved* user's email, so aliases that
/// canonicalise to the same account are emitted once. Two lookups for the
/// same raw address may still run concurrently; only one of them forwards.
pub struct UserResolver {
    directory: Arc<dyn UserDirectory>,
}

impl UserResolver {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Stage for UserResolver {
    type Input = Email;
    type Output = User;

    fn name(&self) -> &'static str {
        "user_resolver"
    }

    async fn run(&self, mut input: mpsc::Receiver<Email>, output: mpsc::Sender<User>) {
        let seen: Arc<Mutex<HashSet<Email>>> = Arc::new(Mutex::new(HashSet::new()));
        let emitted = Arc::new(AtomicUsize::new(0));
        let mut lookups = JoinSet::new();
        let mut received = 0usize;

        while let Some(email) = input.recv().await {
            received += 1;
            let directory = Arc::clone(&self.directory);
            let seen = Arc::clone(&seen);
            let emitted = Arc::clone(&emitted);
            let output = output.clone();

            lookups.spawn(async move {
                let user = directory.get_user(&email).await;

                // Held across the send so check, insert and forward are one step.
                let mut seen = seen.lock().await;
                if !seen.insert(user.email.clone()) {
                    debug!(raw = %email, resolved = %user.email, "Duplicate user skipped");
                    return;
                }
                debug!(raw = %email, resolved = %user.email, id = user.id, "User resolved");
                if output.send(user).await.is_ok() {
                    emitted.fetch_add(1, Ordering::Relaxed);
                }
            });
        }

        while let Some(result) = lookups.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "User lookup task failed");
            }
        }

        info!(
            received,
            emitted = emitted.load(Ordering::Relaxed),
            "User resolution complete"
        );
    }
}

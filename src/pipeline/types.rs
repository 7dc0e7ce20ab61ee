//! Shared types for the spam-report pipeline.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

// ── Data model ──────────────────────────────────────────────────────

/// Raw email address as supplied by the caller. Not deduplicated.
pub type Email = String;

/// A resolved user account.
///
/// `email` is the canonical address returned by the directory, which may
/// differ from the raw address that was looked up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub email: Email,
}

/// Opaque message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of classifying one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub id: MessageId,
    pub has_spam: bool,
}

impl ClassificationResult {
    pub fn new(id: u64, has_spam: bool) -> Self {
        Self {
            id: MessageId(id),
            has_spam,
        }
    }

    /// Render as a report line: `"<has_spam> <id>"`.
    pub fn report_line(&self) -> String {
        format!("{} {}", self.has_spam, self.id)
    }
}

/// Report order: spam before non-spam, then ascending id.
impl Ord for ClassificationResult {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .has_spam
            .cmp(&self.has_spam)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ClassificationResult {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ── Drop observability ──────────────────────────────────────────────

/// An item a stage discarded because a collaborator call failed.
#[derive(Debug, Clone)]
pub enum DropEvent {
    /// A whole batch of users yielded no messages.
    BatchFetchFailed {
        users: Vec<User>,
        error: ServiceError,
    },
    /// A single message was left out of the report.
    ClassificationFailed { id: MessageId, error: ServiceError },
}

impl DropEvent {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::BatchFetchFailed { .. } => "batch_fetch_failed",
            Self::ClassificationFailed { .. } => "classification_failed",
        }
    }
}

/// Visibility into silently dropped items.
///
/// Called from inside stage tasks; implementations must not block.
pub trait DropHook: Send + Sync {
    fn on_drop(&self, event: &DropEvent);
}

/// Hook that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDropHook;

impl DropHook for NoopDropHook {
    fn on_drop(&self, _event: &DropEvent) {}
}

/// Hook that counts drops by kind.
#[derive(Debug, Default)]
pub struct DropCounters {
    failed_batches: AtomicUsize,
    dropped_users: AtomicUsize,
    failed_classifications: AtomicUsize,
}

impl DropCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batches whose fetch failed.
    pub fn failed_batches(&self) -> usize {
        self.failed_batches.load(AtomicOrdering::Relaxed)
    }

    /// Users whose messages were lost with a failed batch.
    pub fn dropped_users(&self) -> usize {
        self.dropped_users.load(AtomicOrdering::Relaxed)
    }

    /// Messages whose classification failed.
    pub fn failed_classifications(&self) -> usize {
        self.failed_classifications.load(AtomicOrdering::Relaxed)
    }
}

impl DropHook for DropCounters {
    fn on_drop(&self, event: &DropEvent) {
        match event {
            DropEvent::BatchFetchFailed { users, .. } => {
                self.failed_batches.fetch_add(1, AtomicOrdering::Relaxed);
                self.dropped_users
                    .fetch_add(users.len(), AtomicOrdering::Relaxed);
            }
            DropEvent::ClassificationFailed { .. } => {
                self.failed_classifications
                    .fetch_add(1, AtomicOrdering::Relaxed);
            }
        }
    }
}

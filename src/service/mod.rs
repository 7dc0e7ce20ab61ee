//! External collaborators of the spam-report job.
//!
//! Each trait is a narrow, opaque remote call. The pipeline depends only on
//! these traits; `simulated` provides an in-memory implementation.

pub mod simulated;

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::pipeline::types::{MessageId, User};

pub use simulated::SimulatedService;

/// Account lookup. Assumed infallible and safe for unbounded concurrency.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolve a raw email address to its user record.
    async fn get_user(&self, email: &str) -> User;
}

/// Batched message fetch.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Fetch every message id belonging to `users`.
    ///
    /// Callers never pass more than `PipelineConfig::batch_size` users.
    /// On error, no messages of the batch are returned.
    async fn get_messages(&self, users: &[User]) -> Result<Vec<MessageId>, ServiceError>;
}

/// Per-message spam classification.
#[async_trait]
pub trait SpamChecker: Send + Sync {
    /// Whether the message is spam.
    ///
    /// Tolerates at most `PipelineConfig::classifier_workers` calls in flight.
    async fn has_spam(&self, id: MessageId) -> Result<bool, ServiceError>;
}

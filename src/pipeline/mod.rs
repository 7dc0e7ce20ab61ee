//! Staged pipeline executor and the spam-report job built on it.
//!
//! Stages run as independent tasks connected by typed item streams:
//! 1. `SeedStage` — emits the caller's email addresses
//! 2. `UserResolver` — resolves and deduplicates users (unbounded fan-out)
//! 3. `MessageFetcher` — fetches message ids per batch of users
//! 4. `SpamClassifier` — classifies messages on a fixed worker pool
//! 5. `ResultCombiner` — sorts everything and renders report lines
//!
//! Collaborator failures drop items silently; only a `DropHook` sees them.

pub mod combine;
pub mod job;
pub mod messages;
pub mod orchestrator;
pub mod spam;
pub mod stage;
pub mod types;
pub mod users;

pub use job::{Collaborators, spam_report, spam_report_with_hook, spawn_spam_report};
pub use orchestrator::{Pipeline, PipelineHandle};
pub use stage::{SeedStage, Stage};

//! The spam-report job: emails in, sorted report lines out.

use std::sync::Arc;

use tracing::info;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::pipeline::combine::ResultCombiner;
use crate::pipeline::messages::MessageFetcher;
use crate::pipeline::orchestrator::{Pipeline, PipelineHandle};
use crate::pipeline::spam::SpamClassifier;
use crate::pipeline::stage::SeedStage;
use crate::pipeline::types::{DropHook, Email, NoopDropHook};
use crate::pipeline::users::UserResolver;
use crate::service::{MessageStore, SpamChecker, UserDirectory};

/// The three remote services the job calls.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn UserDirectory>,
    pub store: Arc<dyn MessageStore>,
    pub checker: Arc<dyn SpamChecker>,
}

impl Collaborators {
    /// Use one service for all three roles.
    pub fn from_service<S>(service: Arc<S>) -> Self
    where
        S: UserDirectory + MessageStore + SpamChecker + 'static,
    {
        Self {
            directory: service.clone(),
            store: service.clone(),
            checker: service,
        }
    }
}

/// Build the five-stage job pipeline without starting it.
///
/// seed → user_resolver → message_fetcher → spam_classifier → result_combiner
pub fn build_spam_pipeline<E>(
    emails: impl IntoIterator<Item = E>,
    collaborators: &Collaborators,
    config: &PipelineConfig,
    drop_hook: Arc<dyn DropHook>,
) -> Result<Pipeline<Email, String>>
where
    E: Into<Email>,
{
    config.validate()?;

    let emails: Vec<Email> = emails.into_iter().map(Into::into).collect();
    info!(
        emails = emails.len(),
        batch_size = config.batch_size,
        classifier_workers = config.classifier_workers,
        "Building spam report pipeline"
    );

    let pipeline = Pipeline::new(SeedStage::new(emails))
        .then(UserResolver::new(Arc::clone(&collaborators.directory)))
        .then(
            MessageFetcher::new(Arc::clone(&collaborators.store), config.batch_size)
                .with_drop_hook(Arc::clone(&drop_hook)),
        )
        .then(
            SpamClassifier::new(Arc::clone(&collaborators.checker), config.classifier_workers)
                .with_drop_hook(drop_hook),
        )
        .then(ResultCombiner);
    Ok(pipeline)
}

/// Start the job and stream report lines as the combiner emits them.
///
/// Must be called from within a tokio runtime.
pub fn spawn_spam_report<E>(
    emails: impl IntoIterator<Item = E>,
    collaborators: &Collaborators,
    config: &PipelineConfig,
    drop_hook: Arc<dyn DropHook>,
) -> Result<PipelineHandle<String>>
where
    E: Into<Email>,
{
    Ok(build_spam_pipeline(emails, collaborators, config, drop_hook)?.spawn())
}

/// Run the job to completion and return the report.
///
/// Collaborator failures shorten the report; they are never returned here.
pub async fn spam_report<E>(
    emails: impl IntoIterator<Item = E>,
    collaborators: &Collaborators,
    config: &PipelineConfig,
) -> Result<Vec<String>>
where
    E: Into<Email>,
{
    spam_report_with_hook(emails, collaborators, config, Arc::new(NoopDropHook)).await
}

/// Like `spam_report`, reporting dropped items to `drop_hook`.
pub async fn spam_report_with_hook<E>(
    emails: impl IntoIterator<Item = E>,
    collaborators: &Collaborators,
    config: &PipelineConfig,
    drop_hook: Arc<dyn DropHook>,
) -> Result<Vec<String>>
where
    E: Into<Email>,
{
    let handle = spawn_spam_report(emails, collaborators, config, drop_hook)?;
    let lines = handle.collect().await?;
    info!(lines = lines.len(), "Spam report complete");
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatedConfig;
    use crate::error::Error;
    use crate::service::SimulatedService;

    fn collaborators() -> Collaborators {
        Collaborators::from_service(Arc::new(
            SimulatedService::new(SimulatedConfig::instant())
                .with_messages("a@x", [1, 2])
                .with_messages("b@x", [3])
                .with_spam(1, true)
                .with_spam(2, false)
                .with_spam(3, true),
        ))
    }

    #[test]
    fn pipeline_has_five_stages() {
        let pipeline = build_spam_pipeline(
            ["a@x"],
            &collaborators(),
            &PipelineConfig::default(),
            Arc::new(NoopDropHook),
        )
        .unwrap();
        assert_eq!(
            pipeline.stage_names(),
            vec![
                "seed",
                "user_resolver",
                "message_fetcher",
                "spam_classifier",
                "result_combiner"
            ]
        );
    }

    #[tokio::test]
    async fn report_for_duplicate_emails() {
        let lines = spam_report(["a@x", "b@x", "a@x"], &collaborators(), &PipelineConfig::default())
            .await
            .unwrap();
        assert_eq!(lines, vec!["true 1", "true 3", "false 2"]);
    }

    #[tokio::test]
    async fn invalid_config_rejected_before_start() {
        let config = PipelineConfig {
            batch_size: 0,
            ..Default::default()
        };
        let result = spam_report(["a@x"], &collaborators(), &config).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn streaming_yields_same_lines() {
        let mut handle = spawn_spam_report(
            vec!["b@x".to_string(), "a@x".to_string()],
            &collaborators(),
            &PipelineConfig::default(),
            Arc::new(NoopDropHook),
        )
        .unwrap();

        let mut lines = Vec::new();
        while let Some(line) = handle.next().await {
            lines.push(line);
        }
        handle.join().await.unwrap();
        assert_eq!(lines, vec!["true 1", "true 3", "false 2"]);
    }

    #[tokio::test]
    async fn no_emails_empty_report() {
        let lines = spam_report(Vec::<String>::new(), &collaborators(), &PipelineConfig::default())
            .await
            .unwrap();
        assert!(lines.is_empty());
    }
}

use std::sync::Arc;

use spam_pipeline::config::{PipelineConfig, SimulatedConfig};
use spam_pipeline::pipeline::types::DropCounters;
use spam_pipeline::pipeline::{Collaborators, spam_report_with_hook};
use spam_pipeline::service::SimulatedService;

/// Addresses used when none are given on the command line.
const SAMPLE_EMAILS: &[&str] = &[
    "harry.dubois@mail.ru",
    "k.kitsuragi@mail.ru",
    "d.vader@mail.ru",
    "noname@mail.ru",
    "e.musk@mail.ru",
    "spiderman@mail.ru",
    "red_prince@mail.ru",
    "tomasangelo@mail.ru",
    "batman@mail.ru",
    "bruce.wayne@mail.ru",
    "Harry.Dubois@mail.ru",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = PipelineConfig::from_env()?;

    let mut emails: Vec<String> = std::env::args().skip(1).collect();
    if emails.is_empty() {
        emails = SAMPLE_EMAILS.iter().map(|s| s.to_string()).collect();
    }

    eprintln!("Spam pipeline v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Emails: {}", emails.len());
    eprintln!("   Batch size: {}", config.batch_size);
    eprintln!("   Classifier workers: {}\n", config.classifier_workers);

    let service = Arc::new(SimulatedService::new(SimulatedConfig {
        max_concurrent_checks: config.classifier_workers,
        ..SimulatedConfig::default()
    }));
    let collaborators = Collaborators::from_service(Arc::clone(&service));
    let drops = Arc::new(DropCounters::new());

    let lines = spam_report_with_hook(emails, &collaborators, &config, drops.clone()).await?;
    for line in &lines {
        println!("{line}");
    }

    eprintln!(
        "\n   Lookups: {}, batches: {}, checks: {} (peak {} in flight)",
        service.lookup_calls(),
        service.fetch_batches().len(),
        service.check_calls(),
        service.max_checks_in_flight(),
    );
    if drops.failed_batches() > 0 || drops.failed_classifications() > 0 {
        eprintln!(
            "   Dropped: {} batch(es), {} message(s)",
            drops.failed_batches(),
            drops.failed_classifications(),
        );
    }

    Ok(())
}

//! Result combiner stage: a barrier that sorts and renders the report.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::pipeline::stage::Stage;
use crate::pipeline::types::ClassificationResult;

/// Sort results into report order and render one line per result.
///
/// Order: spam first, then ascending message id.
pub fn render_report(mut results: Vec<ClassificationResult>) -> Vec<String> {
    results.sort_unstable();
    results.iter().map(ClassificationResult::report_line).collect()
}

/// Drains every classification result before emitting anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResultCombiner;

#[async_trait]
impl Stage for ResultCombiner {
    type Input = ClassificationResult;
    type Output = String;

    fn name(&self) -> &'static str {
        "result_combiner"
    }

    async fn run(
        &self,
        mut input: mpsc::Receiver<ClassificationResult>,
        output: mpsc::Sender<String>,
    ) {
        let mut results = Vec::new();
        while let Some(result) = input.recv().await {
            results.push(result);
        }

        let spam = results.iter().filter(|r| r.has_spam).count();
        info!(total = results.len(), spam, "Combining results");

        for line in render_report(results) {
            if output.send(line).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_orders_spam_first_then_by_id() {
        let lines = render_report(vec![
            ClassificationResult::new(2, false),
            ClassificationResult::new(3, true),
            ClassificationResult::new(1, true),
            ClassificationResult::new(0, false),
        ]);
        assert_eq!(lines, vec!["true 1", "true 3", "false 0", "false 2"]);
    }

    #[test]
    fn render_empty() {
        assert!(render_report(Vec::new()).is_empty());
    }

    #[tokio::test]
    async fn nothing_emitted_before_input_closes() {
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let runner = tokio::spawn(async move { ResultCombiner.run(in_rx, out_tx).await });

        in_tx.send(ClassificationResult::new(5, false)).await.unwrap();
        in_tx.send(ClassificationResult::new(4, true)).await.unwrap();
        tokio::task::yield_now().await;
        assert!(out_rx.try_recv().is_err());

        drop(in_tx);
        assert_eq!(out_rx.recv().await.as_deref(), Some("true 4"));
        assert_eq!(out_rx.recv().await.as_deref(), Some("false 5"));
        assert_eq!(out_rx.recv().await, None);
        runner.await.unwrap();
    }
}

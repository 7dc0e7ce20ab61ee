//! Pipeline orchestrator: wires stages together and runs them concurrently.
//!
//! N stages are connected by N+1 item streams. Stream `i` is the input of
//! stage `i` and the output of stage `i - 1`. Stream 0 is closed as soon as
//! the pipeline starts; stream N is handed to the caller (`spawn`) or
//! discarded (`run`).
//!
//! There is no cancellation. A stage that never returns stalls the whole
//! pipeline.

use std::time::Instant;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::PipelineError;
use crate::pipeline::stage::Stage;

/// Capacity of every item stream.
///
/// tokio channels need room for at least one item, so a send completes once
/// the single slot is free rather than on handoff to a receiver.
pub const STREAM_CAPACITY: usize = 1;

/// A stage bound to its streams, not yet spawned.
struct BoundStage {
    name: &'static str,
    task: BoxFuture<'static, ()>,
}

fn bind<S: Stage>(
    stage: S,
    input: mpsc::Receiver<S::Input>,
    output: mpsc::Sender<S::Output>,
) -> BoundStage {
    let name = stage.name();
    let task = async move {
        info!(stage = name, "Stage started");
        let started = Instant::now();
        // `output` moves into `run` and is dropped when it returns,
        // closing the next stage's input.
        stage.run(input, output).await;
        info!(
            stage = name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stage finished"
        );
    }
    .boxed();
    BoundStage { name, task }
}

/// A chain of stages from `I` to `O`, type-checked at each boundary.
pub struct Pipeline<I, O> {
    head: mpsc::Sender<I>,
    tail: mpsc::Receiver<O>,
    stages: Vec<BoundStage>,
}

impl<I: Send + 'static, O: Send + 'static> Pipeline<I, O> {
    /// Start a pipeline with its first stage.
    pub fn new<S>(stage: S) -> Self
    where
        S: Stage<Input = I, Output = O>,
    {
        let (head, input) = mpsc::channel(STREAM_CAPACITY);
        let (output, tail) = mpsc::channel(STREAM_CAPACITY);
        Self {
            head,
            tail,
            stages: vec![bind(stage, input, output)],
        }
    }

    /// Append a stage consuming this pipeline's output.
    pub fn then<S>(self, stage: S) -> Pipeline<I, S::Output>
    where
        S: Stage<Input = O>,
    {
        let (output, tail) = mpsc::channel(STREAM_CAPACITY);
        let mut stages = self.stages;
        stages.push(bind(stage, self.tail, output));
        Pipeline {
            head: self.head,
            tail,
            stages,
        }
    }

    /// Stage names in order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name).collect()
    }

    /// Spawn every stage as its own task and close stream 0.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> PipelineHandle<O> {
        let Pipeline { head, tail, stages } = self;
        info!(stages = stages.len(), "Starting pipeline");

        let tasks = stages
            .into_iter()
            .map(|stage| (stage.name, tokio::spawn(stage.task)))
            .collect();

        drop(head);

        PipelineHandle {
            output: tail,
            tasks,
        }
    }

    /// Run to completion, discarding anything the last stage emits.
    pub async fn run(self) -> Result<(), PipelineError> {
        self.spawn().join().await
    }
}

/// A running pipeline.
pub struct PipelineHandle<O> {
    output: mpsc::Receiver<O>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl<O> PipelineHandle<O> {
    /// Next item from the last stage, or `None` once it has finished.
    pub async fn next(&mut self) -> Option<O> {
        self.output.recv().await
    }

    /// Drain the last stage's output, then wait for every stage.
    pub async fn collect(mut self) -> Result<Vec<O>, PipelineError> {
        let mut items = Vec::new();
        while let Some(item) = self.output.recv().await {
            items.push(item);
        }
        self.join().await?;
        Ok(items)
    }

    /// Wait for every stage. Output not yet read is discarded.
    ///
    /// Returns the first stage failure; all stages are awaited regardless.
    pub async fn join(self) -> Result<(), PipelineError> {
        let PipelineHandle { output, tasks } = self;
        drop(output);

        let mut first_error = None;
        for (stage, handle) in tasks {
            if let Err(e) = handle.await {
                let err = if e.is_panic() {
                    PipelineError::StagePanicked {
                        stage: stage.to_string(),
                        reason: e.to_string(),
                    }
                } else {
                    PipelineError::StageCancelled {
                        stage: stage.to_string(),
                    }
                };
                error!(stage, error = %err, "Stage task failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!("Pipeline finished");
                Ok(())
            }
        }
    }
}

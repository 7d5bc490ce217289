//! Background execution of generation runs.
//!
//! [`spawn_generation`] splits a run into a producer task, which drives the
//! graph and persists the batch, and a consumer [`ProgressStream`] returned
//! to the caller. The task never depends on the consumer: dropping the
//! stream stops nothing, and the batch is still saved.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::error::GraphError;
use super::graph::QuestionGraph;
use super::progress::{progress_channel, ProgressReporter, ProgressStream};
use super::result::GenerationOutcome;
use crate::agents::GenerationRequest;
use crate::storage::{BatchStore, RunMetadata, SavedBatch};

/// Errors that end a background run without a result.
#[derive(Debug, Error)]
pub enum RunError {
    /// The graph aborted.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// The report could not be serialized for the progress stream.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run task panicked or was cancelled.
    #[error("Generation task aborted: {0}")]
    Aborted(String),
}

/// Result of a background run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: GenerationOutcome,
    /// Identifiers from the store, when one is configured and succeeded.
    pub saved: Option<SavedBatch>,
    /// Why persistence failed, if it did.
    pub storage_error: Option<String>,
}

/// Handle to a spawned run.
#[derive(Debug)]
pub struct GenerationHandle {
    pub run_id: Uuid,
    /// Ordered progress events of the run.
    pub events: ProgressStream,
    /// Resolves when the run, including persistence, has finished.
    pub task: JoinHandle<Result<RunReport, RunError>>,
}

impl GenerationHandle {
    /// Waits for the run, discarding progress events.
    pub async fn wait(self) -> Result<RunReport, RunError> {
        drop(self.events);
        join_run(self.task).await
    }
}

/// Awaits a run task, mapping a panic or cancellation to `RunError::Aborted`.
pub async fn join_run(
    task: JoinHandle<Result<RunReport, RunError>>,
) -> Result<RunReport, RunError> {
    match task.await {
        Ok(result) => result,
        Err(err) => Err(RunError::Aborted(err.to_string())),
    }
}

/// Starts a run on the tokio runtime and returns its progress stream.
pub fn spawn_generation(
    graph: Arc<QuestionGraph>,
    request: GenerationRequest,
    store: Option<Arc<dyn BatchStore>>,
    idle_timeout: Duration,
) -> GenerationHandle {
    let run_id = Uuid::new_v4();
    let (reporter, events) = progress_channel(idle_timeout);

    let task = tokio::spawn(async move {
        let run = tokio::spawn(execute_run(
            run_id,
            graph,
            request,
            store,
            reporter.clone(),
        ));

        match run.await {
            Ok(result) => result,
            Err(err) => {
                let message = if err.is_panic() {
                    "generation task panicked".to_string()
                } else {
                    "generation task was cancelled".to_string()
                };
                tracing::error!(run_id = %run_id, error = %err, "{}", message);
                reporter.fail(message.clone());
                Err(RunError::Aborted(message))
            }
        }
    });

    GenerationHandle {
        run_id,
        events,
        task,
    }
}

async fn execute_run(
    run_id: Uuid,
    graph: Arc<QuestionGraph>,
    request: GenerationRequest,
    store: Option<Arc<dyn BatchStore>>,
    reporter: ProgressReporter,
) -> Result<RunReport, RunError> {
    tracing::info!(run_id = %run_id, "Generation run started");

    let outcome = match graph.drive(request.clone(), &reporter).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(run_id = %run_id, error = %err, "Generation run failed");
            reporter.fail(err.to_string());
            return Err(err.into());
        }
    };

    let (saved, storage_error) = match &store {
        Some(store) => {
            reporter.phase_start("persist", "Saving batch");
            let metadata = RunMetadata::from_run(&request, &outcome);
            match store.save_batch(&outcome, &metadata).await {
                Ok(saved) => {
                    reporter.phase_end("persist", format!("saved as {}", saved.group_id));
                    (Some(saved), None)
                }
                Err(err) => {
                    tracing::error!(run_id = %run_id, error = %err, "Failed to persist batch");
                    reporter.log("persist", format!("Persistence failed: {}", err));
                    reporter.phase_end("persist", "not saved");
                    (None, Some(err.to_string()))
                }
            }
        }
        None => (None, None),
    };

    let report = RunReport {
        run_id,
        outcome,
        saved,
        storage_error,
    };
    match serde_json::to_value(&report) {
        Ok(value) => {
            reporter.finish(value);
        }
        Err(err) => {
            reporter.fail(format!("Failed to serialize result: {}", err));
            return Err(err.into());
        }
    }

    tracing::info!(run_id = %run_id, saved = report.saved.is_some(), "Generation run finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{QualityReviewerAgent, QuestionGeneratorAgent};
    use crate::error::LlmError;
    use crate::llm::{CompletionRequest, CompletionResponse, LlmProvider};
    use crate::pipeline::progress::ProgressEvent;
    use crate::storage::StorageError;
    use async_trait::async_trait;

    struct PanickingLlm;

    #[async_trait]
    impl LlmProvider for PanickingLlm {
        async fn generate(&self, _: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            panic!("provider exploded");
        }
    }

    struct FailingStore;

    #[async_trait]
    impl BatchStore for FailingStore {
        async fn save_batch(
            &self,
            _: &GenerationOutcome,
            _: &RunMetadata,
        ) -> Result<SavedBatch, StorageError> {
            Err(StorageError::DirectoryCreationFailed("read-only".to_string()))
        }
    }

    struct DownLlm;

    #[async_trait]
    impl LlmProvider for DownLlm {
        async fn generate(&self, _: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Err(LlmError::RequestFailed("connection refused".to_string()))
        }
    }

    fn graph(llm: Arc<dyn LlmProvider>) -> Arc<QuestionGraph> {
        Arc::new(QuestionGraph::new(
            QuestionGeneratorAgent::with_defaults(Arc::clone(&llm)),
            QualityReviewerAgent::with_defaults(llm),
        ))
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("D1", "2", "5")
    }

    #[tokio::test]
    async fn test_panic_becomes_error_event() {
        let handle = spawn_generation(graph(Arc::new(PanickingLlm)), request(), None, Duration::from_secs(5));
        let events = handle.events.collect_all().await;
        let last = events.last().expect("at least one event");
        assert!(matches!(&last.event, ProgressEvent::Error { message } if message.contains("panicked")));

        let err = join_run(handle.task).await.unwrap_err();
        assert!(matches!(err, RunError::Aborted(_)));
    }

    #[tokio::test]
    async fn test_storage_failure_still_finishes() {
        // Generator and reviewer both fail: three empty attempts, then finish.
        let handle = spawn_generation(
            graph(Arc::new(DownLlm)),
            request(),
            Some(Arc::new(FailingStore)),
            Duration::from_secs(5),
        );
        let events = handle.events.collect_all().await;
        assert!(matches!(events.last().map(|e| &e.event), Some(ProgressEvent::Finished { .. })));

        let report = join_run(handle.task).await.expect("report");
        assert!(report.saved.is_none());
        assert!(report.storage_error.is_some());
        assert_eq!(report.outcome.retry_count, 3);
        assert!(report.outcome.questions.is_empty());
    }

    #[tokio::test]
    async fn test_run_completes_after_consumer_drops() {
        let handle = spawn_generation(graph(Arc::new(DownLlm)), request(), None, Duration::from_secs(5));
        let report = handle.wait().await.expect("run still completes");
        assert_eq!(report.outcome.retry_count, 3);
    }
}

use async_trait::async_trait;
use report_flow::{Context, NextAction, Result, Task, TaskResult};
use tracing::{error, info, warn};

use super::{PROGRESS_BATCHED, session_keys};
use crate::batcher::batch_documents;
use crate::error::AnalysisError;
use crate::models::DocumentContent;

/// Splits the run's documents into batches and resets the batch cursor.
pub struct PrepareBatchesTask {
    batch_size: usize,
}

impl PrepareBatchesTask {
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size }
    }
}

#[async_trait]
impl Task for PrepareBatchesTask {
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let received: Vec<DocumentContent> =
            context.get(session_keys::DOCUMENTS).unwrap_or_default();
        let received_count = received.len();
        let documents: Vec<DocumentContent> = received
            .into_iter()
            .filter(|doc| !doc.text.trim().is_empty())
            .collect();

        if documents.is_empty() {
            error!("No documents with text to analyze ({} received)", received_count);
            return Err(AnalysisError::NoDocuments.into());
        }
        if documents.len() < received_count {
            warn!(
                "Dropped {} blank documents",
                received_count - documents.len()
            );
        }

        let document_count = documents.len();
        let batches = batch_documents(documents, self.batch_size);
        info!(
            "Prepared {} batches from {} documents (batch size {})",
            batches.len(),
            document_count,
            self.batch_size
        );

        let status = format!("Prepared {} batches", batches.len());
        for batch in &batches {
            context.set(session_keys::batch(batch.index), batch)?;
        }
        context.set(session_keys::BATCH_COUNT, batches.len())?;
        context.set(session_keys::NEXT_BATCH, 0usize)?;
        context.remove(session_keys::DOCUMENTS);
        context.report(PROGRESS_BATCHED, &status).await;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::Continue,
            Some(status),
        ))
    }
}

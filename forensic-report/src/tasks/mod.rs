pub mod prepare_batches;
pub mod query_batch;
pub mod resolve_prompt;
pub mod split_sections;
pub mod synthesize;

pub use prepare_batches::PrepareBatchesTask;
pub use query_batch::QueryBatchTask;
pub use resolve_prompt::ResolvePromptTask;
pub use split_sections::SplitSectionsTask;
pub use synthesize::SynthesizeTask;

use report_flow::Context;

use crate::models::BatchResult;

/// Context keys shared by the analysis tasks.
pub mod session_keys {
    pub const CASE_ID: &str = "case_id";
    pub const SECTION: &str = "section";
    pub const CASE_TYPE: &str = "case_type";
    pub const DOCUMENTS: &str = "documents";
    pub const BATCH_COUNT: &str = "batch_count";
    pub const NEXT_BATCH: &str = "next_batch";
    pub const PROMPT: &str = "prompt";
    pub const NARRATIVE: &str = "narrative";
    pub const SPLITTER: &str = "splitter";
    pub const SPLIT: &str = "split";

    /// Key of the batch at `index`. Batches are stored one per key so each
    /// query step reads only its own documents.
    pub fn batch(index: usize) -> String {
        format!("batch.{index}")
    }

    pub fn batch_result(index: usize) -> String {
        format!("batch_result.{index}")
    }
}

/// Results recorded so far, in batch order.
pub fn batch_results(context: &Context) -> Vec<BatchResult> {
    let done: usize = context.get(session_keys::NEXT_BATCH).unwrap_or(0);
    (0..done)
        .filter_map(|index| context.get(&session_keys::batch_result(index)))
        .collect()
}

/// Progress reported once batching is done.
pub const PROGRESS_BATCHED: u8 = 10;
/// Progress reported after the last batch.
pub const PROGRESS_BATCHES_DONE: u8 = 70;
pub const PROGRESS_SYNTHESIS_STARTED: u8 = 75;
pub const PROGRESS_SYNTHESIS_DONE: u8 = 90;
pub const PROGRESS_COMPLETE: u8 = 100;

/// Share of the batch phase completed after `done` of `total` batches.
pub fn batch_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return PROGRESS_BATCHES_DONE;
    }
    let span = usize::from(PROGRESS_BATCHES_DONE - PROGRESS_BATCHED);
    let done = done.min(total);
    PROGRESS_BATCHED + (span * done / total) as u8
}

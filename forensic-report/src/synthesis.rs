use report_flow::Context;
use tracing::{info, warn};

use crate::error::AnalysisError;
use crate::llm::{GenerationOptions, GenerationRequest, TextGenerator};
use crate::models::BatchResult;
use crate::retry::{RetryOutcome, RetryPolicy, generate_with_retry};

pub const FAILURE_WARNING: &str =
    "IMPORTANT: Some batches encountered errors, so the final result may be incomplete.\n\n";

/// Batch results as they are handed to the synthesis call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisInput {
    pub combined: String,
    pub processing_failed: bool,
}

impl SynthesisInput {
    pub fn from_results(results: &[BatchResult]) -> Self {
        let mut combined = String::new();
        let mut processing_failed = false;

        for (i, result) in results.iter().enumerate() {
            let number = i + 1;
            let body = match result {
                BatchResult::Success { text } => text.clone(),
                BatchResult::Failed { error } => {
                    processing_failed = true;
                    format!("[[ERROR PROCESSING BATCH {number}: Error: {error}]]")
                }
            };
            combined.push_str(&format!(
                "--- ANALYSIS FROM BATCH {number} ---\n{body}\n--- END OF BATCH {number} ---\n\n"
            ));
        }

        Self {
            combined,
            processing_failed,
        }
    }
}

/// Prompt for merging batch analyses of `section` into one narrative.
pub fn synthesis_prompt(section: &str, input: &SynthesisInput) -> String {
    let failure_warning = if input.processing_failed {
        FAILURE_WARNING
    } else {
        ""
    };
    let combined = &input.combined;

    format!(
        r#"{failure_warning}You are provided with analyses generated from different text batches. Some batches may contain errors or no relevant information for the requested section. Your task is to synthesize the information from the *successful and relevant* batches.

Focus on the section: '{section}'

Special Handling for 'Background Information' section:
- If the requested section is 'Background Information', first scan all Collected Batches for any content explicitly labeled or clearly identifiable as 'Findings' (or similar terms like 'Key Observations' or 'Conclusions' related to the background).
- If such findings exist, synthesize them into a dedicated `**Findings**` subsection placed *immediately before* the Background Information content.
- Then synthesize the Background Information content itself under the exact heading `**Background Information**`.

Instructions for Synthesizing '{section}':
1. **Comprehensive Synthesis:** Create one coherent, consolidated report for '{section}'. Review and incorporate relevant information from *all* Collected Batches that are not error messages. Do not arbitrarily omit information from a successful batch.
2. **Error Handling:** If some batches state an error (e.g. "ERROR PROCESSING BATCH"), do not mention these errors or the failed batches in your final report. Only synthesize content from successfully processed batches.
3. **De-duplication:** Include each fact only once. Do not list slightly reworded versions of the same fact as separate bullet points; consolidate them into a single statement.
4. **Conflicts:** If batches directly contradict each other and no common statement resolves it, briefly note both versions.
5. **No Markers or Metadata:** Do not include '--- ANALYSIS FROM BATCH' markers, batch numbers, or error messages in the output.
6. **Formal Start:** Begin the output directly with the synthesized content for '{section}'. No introductory phrases such as "Here is the analysis".
7. **Markdown Usage:** Use only `**Subheading**` for subheadings (e.g. `**Findings**`, `**Background Information**`), `*` for bullet points, and a single newline between distinct pieces of information or after a subheading. No other Markdown, font tags or HTML.
8. **Ordering:** When both findings and background content appear, place the findings content before the background content.
9. **No Empty Sections:** Omit any subsection for which no information was found. Never emit placeholder text such as "No information available".
10. **Factually Distinct Bullet Points:** Each bullet point must represent a semantically unique fact, condition or factor. Combine points that describe the same observation into one comprehensive statement without losing distinct factual elements.
11. **Concise Summaries for Reports:** For user-provided reports such as weather reports, generate a concise overall summary highlighting key findings or conditions. Do not provide a granular, step-by-step or day-by-day breakdown.
12. **Reference-Only Files:** If files with the .rpt extension are provided, treat them as reference only (e.g. for format or a different case context). Do not extract content from them, use it in the response, or include their reference numbers in the final output.

Collected Batches:
{combined}
Now provide the final consolidated analysis for '{section}':"#
    )
}

/// Merge batch results into the final narrative for `section`.
///
/// A single successful batch is returned as is without a model call. Batch
/// failures are folded into the prompt; only the synthesis call's own failure
/// is an error.
pub async fn synthesize(
    generator: &dyn TextGenerator,
    results: &[BatchResult],
    section: &str,
    options: &GenerationOptions,
    policy: &RetryPolicy,
    context: &Context,
) -> Result<String, AnalysisError> {
    if results.is_empty() {
        return Err(AnalysisError::NoDocuments);
    }
    if let [BatchResult::Success { text }] = results {
        info!("Single successful batch for '{}', skipping synthesis", section);
        return Ok(text.clone());
    }

    let input = SynthesisInput::from_results(results);
    if input.processing_failed {
        warn!(
            "Synthesizing '{}' from {} batches, some of which failed",
            section,
            results.len()
        );
    } else {
        info!("Synthesizing '{}' from {} batches", section, results.len());
    }

    let request = GenerationRequest::single(synthesis_prompt(section, &input), options.clone());
    match generate_with_retry(generator, &request, policy, context, "synthesis").await {
        RetryOutcome::Succeeded(text) => Ok(text),
        RetryOutcome::RateLimited { .. } => Err(AnalysisError::SynthesisRateLimited),
        RetryOutcome::Blocked(reason) => Err(AnalysisError::Blocked(reason)),
        RetryOutcome::Failed(message) => Err(AnalysisError::Synthesis(message)),
        RetryOutcome::Cancelled => Err(AnalysisError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BatchError;
    use crate::llm::{GenerationError, scripted::ScriptedGenerator};
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_retries: 2,
            heartbeat_interval: Duration::from_secs(5),
        }
    }

    async fn run(
        generator: &ScriptedGenerator,
        results: &[BatchResult],
    ) -> Result<String, AnalysisError> {
        synthesize(
            generator,
            results,
            "Findings",
            &GenerationOptions::default(),
            &policy(),
            &Context::new(),
        )
        .await
    }

    #[tokio::test]
    async fn single_success_skips_the_model() {
        let generator = ScriptedGenerator::always(Ok("unused".into()));
        let text = run(&generator, &[BatchResult::success("  only batch\n")]).await.unwrap();
        assert_eq!(text, "  only batch\n");
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn single_failure_still_goes_through_synthesis() {
        let generator = ScriptedGenerator::always(Ok("merged".into()));
        let results = [BatchResult::failed(BatchError::failed("bad input"))];
        assert_eq!(run(&generator, &results).await.unwrap(), "merged");
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn prompt_wraps_every_batch_in_order() {
        let generator = ScriptedGenerator::always(Ok("merged".into()));
        let results = [
            BatchResult::success("first"),
            BatchResult::failed(BatchError::failed("permission denied")),
            BatchResult::success("third"),
        ];
        run(&generator, &results).await.unwrap();

        let prompt = generator.requests()[0].joined();
        assert!(prompt.starts_with(FAILURE_WARNING.trim_end()));
        let first = prompt.find("--- ANALYSIS FROM BATCH 1 ---\nfirst\n--- END OF BATCH 1 ---").unwrap();
        let second = prompt
            .find("--- ANALYSIS FROM BATCH 2 ---\n[[ERROR PROCESSING BATCH 2: Error: permission denied]]\n--- END OF BATCH 2 ---")
            .unwrap();
        let third = prompt.find("--- ANALYSIS FROM BATCH 3 ---\nthird").unwrap();
        assert!(first < second && second < third);
        assert!(prompt.contains("Focus on the section: 'Findings'"));
    }

    #[test]
    fn prompt_keeps_report_rules_and_closing_request() {
        let input = SynthesisInput::from_results(&[BatchResult::success("a"), BatchResult::success("b")]);
        let prompt = synthesis_prompt("Background Information", &input);
        assert!(prompt.contains("weather reports"));
        assert!(prompt.contains(".rpt extension"));
        assert!(prompt.ends_with("Now provide the final consolidated analysis for 'Background Information':"));
    }

    #[test]
    fn no_warning_without_failures() {
        let input = SynthesisInput::from_results(&[
            BatchResult::success("a"),
            BatchResult::success("b"),
        ]);
        assert!(!input.processing_failed);
        assert!(!synthesis_prompt("Findings", &input).contains("IMPORTANT"));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_synthesis_is_reported_as_such() {
        let generator = ScriptedGenerator::always(Err(GenerationError::RateLimited("429".into())));
        let results = [BatchResult::success("a"), BatchResult::success("b")];
        let err = run(&generator, &results).await.unwrap_err();
        assert!(matches!(err, AnalysisError::SynthesisRateLimited));
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test]
    async fn other_synthesis_failures_keep_the_message() {
        let generator = ScriptedGenerator::always(Err(GenerationError::Other("server error".into())));
        let results = [BatchResult::success("a"), BatchResult::success("b")];
        match run(&generator, &results).await.unwrap_err() {
            AnalysisError::Synthesis(message) => assert_eq!(message, "server error"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_results_means_no_documents() {
        let generator = ScriptedGenerator::always(Ok("unused".into()));
        assert!(matches!(
            run(&generator, &[]).await.unwrap_err(),
            AnalysisError::NoDocuments
        ));
    }
}

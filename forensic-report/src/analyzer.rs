use report_flow::{Context, Workflow};
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::AnalyzerConfig;
use crate::documents::{DocumentSource, TextExtractor, collect_case_documents};
use crate::error::AnalysisError;
use crate::llm::TextGenerator;
use crate::models::{AnalysisRequest, DocumentContent, SectionReport, SplitResult};
use crate::policy::{FailurePolicy, PolicyTable, SectionHandling};
use crate::prompts::PromptTable;
use crate::tasks::{batch_results, session_keys};
use crate::workflow::build_analysis_workflow;

/// Entry point for analyzing report sections.
pub struct ReportAnalyzer {
    workflow: Workflow,
    policies: PolicyTable,
    config: AnalyzerConfig,
}

impl ReportAnalyzer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        prompts: PromptTable,
        config: AnalyzerConfig,
    ) -> Result<Self, AnalysisError> {
        config.validate()?;
        let workflow = build_analysis_workflow(generator, Arc::new(prompts), &config);
        Ok(Self {
            workflow,
            policies: PolicyTable::default(),
            config,
        })
    }

    pub fn with_policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Batch, query, synthesize and split `documents` for one section.
    ///
    /// Progress and cancellation come from `context`; the run itself gets a
    /// fresh key space so concurrent analyses never see each other's state.
    pub async fn analyze(
        &self,
        request: &AnalysisRequest,
        documents: Vec<DocumentContent>,
        context: &Context,
    ) -> Result<SectionReport, AnalysisError> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "analyze_section",
            run_id = %run_id,
            case_id = %request.case_id,
            section = %request.section
        );
        self.run_workflow(request, documents, context)
            .instrument(span)
            .await
    }

    async fn run_workflow(
        &self,
        request: &AnalysisRequest,
        documents: Vec<DocumentContent>,
        context: &Context,
    ) -> Result<SectionReport, AnalysisError> {
        info!(
            "Analyzing section '{}' ({} documents, case type {:?})",
            request.section,
            documents.len(),
            request.case_type
        );

        let policy = self.policies.policy_for(&request.section);
        let run_context = Context::new()
            .with_progress(context.progress_sink())
            .with_cancellation(context.cancellation().clone());

        run_context.set(session_keys::CASE_ID, &request.case_id)?;
        run_context.set(session_keys::SECTION, &request.section)?;
        run_context.set(session_keys::CASE_TYPE, &request.case_type)?;
        run_context.set(session_keys::SPLITTER, policy.splitter)?;
        run_context.set(session_keys::DOCUMENTS, &documents)?;

        let result = self.workflow.execute(run_context.clone()).await;
        let execution = match result {
            Ok(execution) => execution,
            Err(e) => {
                let err = AnalysisError::from(e);
                error!("Analysis of '{}' failed: {}", request.section, err);
                return Err(err);
            }
        };

        let narrative = execution.response.unwrap_or_default();
        let split: SplitResult = run_context.get(session_keys::SPLIT).unwrap_or_default();
        let results = batch_results(&run_context);
        let failed_batches = results.iter().filter(|r| !r.is_success()).count();

        info!(
            "Section '{}' complete after {} steps ({} of {} batches failed)",
            request.section,
            execution.steps,
            failed_batches,
            results.len()
        );

        Ok(SectionReport {
            case_id: request.case_id.clone(),
            section: request.section.clone(),
            narrative,
            findings: split.findings,
            background: split.background,
            batches: results.len(),
            failed_batches,
            bypassed: false,
            degraded: false,
        })
    }

    /// [`ReportAnalyzer::analyze`] under the section's policy: bypassed
    /// sections are never analyzed and `EmptyReport` sections turn failures
    /// into an empty, degraded report. Cancellation is always returned.
    pub async fn report_section(
        &self,
        request: &AnalysisRequest,
        documents: Vec<DocumentContent>,
        context: &Context,
    ) -> Result<SectionReport, AnalysisError> {
        let policy = self.policies.policy_for(&request.section);
        if policy.handling == SectionHandling::Bypass {
            info!("Section '{}' bypasses model analysis", request.section);
            return Ok(SectionReport::bypassed(request));
        }

        let result = self.analyze(request, documents, context).await;
        self.apply_failure_policy(request, policy.on_failure, result)
    }

    /// Collect the case's documents, then [`ReportAnalyzer::report_section`].
    pub async fn report_case_section(
        &self,
        request: &AnalysisRequest,
        source: &dyn DocumentSource,
        extractor: &dyn TextExtractor,
        context: &Context,
    ) -> Result<SectionReport, AnalysisError> {
        let policy = self.policies.policy_for(&request.section);
        if policy.handling == SectionHandling::Bypass {
            info!("Section '{}' bypasses model analysis", request.section);
            return Ok(SectionReport::bypassed(request));
        }

        let result = match collect_case_documents(&request.case_id, source, extractor).await {
            Ok(documents) => self.analyze(request, documents, context).await,
            Err(e) => Err(e),
        };
        self.apply_failure_policy(request, policy.on_failure, result)
    }

    fn apply_failure_policy(
        &self,
        request: &AnalysisRequest,
        on_failure: FailurePolicy,
        result: Result<SectionReport, AnalysisError>,
    ) -> Result<SectionReport, AnalysisError> {
        match (result, on_failure) {
            (Ok(report), _) => Ok(report),
            (Err(AnalysisError::Cancelled), _) => Err(AnalysisError::Cancelled),
            (Err(e), FailurePolicy::EmptyReport) => {
                warn!(
                    "Section '{}' failed ({}); returning empty report",
                    request.section, e
                );
                Ok(SectionReport::degraded(request))
            }
            (Err(e), FailurePolicy::Propagate) => Err(e),
        }
    }
}

pub mod analyzer;
pub mod batcher;
pub mod config;
pub mod documents;
pub mod error;
pub mod images;
pub mod llm;
pub mod models;
pub mod policy;
pub mod prompts;
pub mod query;
pub mod retry;
pub mod splitter;
pub mod synthesis;
pub mod tasks;
pub mod workflow;

pub use analyzer::ReportAnalyzer;
pub use config::{AnalyzerConfig, ConfigError};
pub use error::{AnalysisError, BatchError};
pub use llm::{GenerationError, GenerationOptions, GenerationRequest, TextGenerator};
pub use models::*;
pub use policy::{FailurePolicy, PolicyTable, SectionHandling, SectionPolicy, SplitterKind};
pub use prompts::{PromptTable, ResolvedPrompt, resolve_prompt};
pub use splitter::{parse_background_response, split};
pub use workflow::build_analysis_workflow;

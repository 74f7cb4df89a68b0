use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use forensic_report::documents::{FileTextExtractor, LocalDirectorySource, TextExtractor};
use forensic_report::images::{ImageAwareExtractor, ImageDescriber};
use forensic_report::llm::{GeminiClient, OpenRouterGenerator};
use forensic_report::policy::{BACKGROUND_SECTION, FINDINGS_SECTION};
use forensic_report::{
    AnalysisRequest, AnalyzerConfig, PromptTable, ReportAnalyzer, SectionReport, TextGenerator,
};
use report_flow::{Context, TracingProgress};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Runs "1.4 Findings" and "Background Information" together.
const FINDINGS_AND_BACKGROUND: &str = "14_findings_and_background";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Provider {
    Gemini,
    Openrouter,
}

#[derive(Parser, Debug)]
#[command(name = "forensic-report")]
#[command(about = "Analyze case documents into a forensic report section", long_about = None)]
struct Cli {
    /// Case identifier; also the sub-folder of --documents to read, if present
    #[arg(long)]
    case_id: String,

    /// Report section, e.g. "1.4 Findings", "Background Information", or 14_findings_and_background
    #[arg(long)]
    section: String,

    #[arg(long)]
    case_type: Option<String>,

    /// Folder holding the case documents
    #[arg(long)]
    documents: PathBuf,

    /// JSON prompt file
    #[arg(long)]
    prompts: PathBuf,

    #[arg(long, value_enum, default_value_t = Provider::Gemini)]
    provider: Provider,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Base backoff delay in seconds
    #[arg(long)]
    base_retry_delay: Option<u64>,

    #[arg(long)]
    max_retries: Option<u32>,

    /// Describe JPEG and PNG files with the model and analyze the descriptions too
    #[arg(long)]
    describe_images: bool,

    /// Print the reports as JSON
    #[arg(long)]
    json: bool,
}

/// Initialize structured JSON tracing based on environment variables
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "forensic_report=info,report_flow=info".into());

    match log_format.as_str() {
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    }
}

fn build_config(cli: &Cli) -> Result<AnalyzerConfig> {
    let mut config = AnalyzerConfig::from_env()?;
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(delay) = cli.base_retry_delay {
        config.base_retry_delay = Duration::from_secs(delay);
    }
    if let Some(max_retries) = cli.max_retries {
        config.max_retries = max_retries;
    }
    config.validate()?;
    Ok(config)
}

fn build_generator(cli: &Cli) -> Result<Arc<dyn TextGenerator>> {
    let generator: Arc<dyn TextGenerator> = match cli.provider {
        Provider::Gemini => {
            let mut client = GeminiClient::from_env()?;
            if let Some(model) = &cli.model {
                client = client.with_model(model);
            }
            Arc::new(client)
        }
        Provider::Openrouter => {
            let mut client = OpenRouterGenerator::from_env()?;
            if let Some(model) = &cli.model {
                client = client.with_model(model);
            }
            Arc::new(client)
        }
    };
    Ok(generator)
}

fn build_image_describer(
    cli: &Cli,
    generator: &Arc<dyn TextGenerator>,
    config: &AnalyzerConfig,
) -> Result<ImageDescriber> {
    let image_generator: Arc<dyn TextGenerator> = match cli.provider {
        Provider::Gemini => Arc::new(GeminiClient::image_from_env()?),
        Provider::Openrouter => {
            warn!("OpenRouter does not accept image input; photographs will be skipped");
            generator.clone()
        }
    };
    Ok(ImageDescriber::new(image_generator, config))
}

fn print_report(report: &SectionReport) {
    println!("=== {} ===", report.section);
    if report.bypassed {
        println!("(section is not generated from documents)");
        return;
    }
    if report.degraded {
        println!("(analysis failed; empty section)");
        return;
    }
    if !report.findings.is_empty() {
        println!("{}\n", report.findings);
    }
    if !report.background.is_empty() {
        println!("{}\n", report.background);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = build_config(&cli)?;
    let prompts = PromptTable::from_json_file(&cli.prompts, cli.case_type.as_deref())
        .with_context(|| format!("loading prompts from {}", cli.prompts.display()))?;
    let generator = build_generator(&cli)?;
    let describer = if cli.describe_images {
        Some(build_image_describer(&cli, &generator, &config)?)
    } else {
        None
    };
    let analyzer = ReportAnalyzer::new(generator, prompts, config)?;

    let sections: Vec<String> = if cli.section == FINDINGS_AND_BACKGROUND {
        vec![FINDINGS_SECTION.to_string(), BACKGROUND_SECTION.to_string()]
    } else {
        vec![cli.section.clone()]
    };

    let context = Context::new().with_progress(Arc::new(TracingProgress::new(cli.case_id.clone())));
    let cancellation = context.cancellation().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling analysis");
            cancellation.cancel();
        }
    });

    let source = LocalDirectorySource::new(&cli.documents);
    let extractor: Box<dyn TextExtractor> = match describer {
        Some(describer) => Box::new(ImageAwareExtractor::new(describer, context.clone())),
        None => Box::new(FileTextExtractor),
    };
    let mut reports = Vec::with_capacity(sections.len());
    for section in sections {
        let mut request = AnalysisRequest::new(&cli.case_id, section);
        if let Some(case_type) = &cli.case_type {
            request = request.with_case_type(case_type);
        }

        match analyzer
            .report_case_section(&request, &source, extractor.as_ref(), &context)
            .await
        {
            Ok(report) => {
                info!(
                    "Section '{}' done: {} batches, {} failed",
                    report.section, report.batches, report.failed_batches
                );
                reports.push(report);
            }
            Err(e) => {
                error!("Section '{}' failed: {}", request.section, e);
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        reports.iter().for_each(print_report);
    }

    Ok(())
}

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use lead_prequal::config::Config;
use lead_prequal::logging;
use lead_prequal::pipeline::classifier::{Classifier, NimClient};
use lead_prequal::pipeline::parser::{self, InputFormat};
use lead_prequal::pipeline::{Pipeline, PrequalRequest};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "prequal")]
#[command(about = "Lead prequalification pipeline: parse, classify, rank, export")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: parse, classify, aggregate, export
    Run {
        /// Lead export file (CSV or JSON)
        #[arg(long)]
        input: PathBuf,
        /// Input format; inferred from the file extension when omitted
        #[arg(long)]
        format: Option<String>,
        /// JSON file with the classification criteria schema
        #[arg(long)]
        schema: PathBuf,
        /// Text file with the classification system prompt
        #[arg(long)]
        prompt: PathBuf,
        /// Number of top-ranked leads to export
        #[arg(long)]
        top_n: Option<usize>,
        /// Concurrency ceiling for classification calls
        #[arg(long)]
        concurrency: Option<usize>,
        /// Leave the LLM reasoning column out of the export
        #[arg(long)]
        no_reasoning: bool,
        /// Directory for the exported CSV
        #[arg(long, default_value = "output")]
        output: PathBuf,
    },
    /// Parse and normalize an export file without classifying anything
    Parse {
        /// Lead export file (CSV or JSON)
        #[arg(long)]
        input: PathBuf,
        /// Input format; inferred from the file extension when omitted
        #[arg(long)]
        format: Option<String>,
    },
}

fn resolve_format(declared: Option<&str>, input: &Path) -> anyhow::Result<InputFormat> {
    if let Some(declared) = declared {
        return declared.parse().map_err(Into::into);
    }
    match input.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(InputFormat::Json),
        Some("csv") => Ok(InputFormat::Csv),
        other => bail!(
            "cannot infer input format from extension {:?}; pass --format csv|json",
            other
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Run {
            input,
            format,
            schema,
            prompt,
            top_n,
            concurrency,
            no_reasoning,
            output,
        } => {
            let format = resolve_format(format.as_deref(), &input)?;
            let file_content = fs::read_to_string(&input)
                .with_context(|| format!("failed to read input file {}", input.display()))?;
            let criteria_schema: serde_json::Value = serde_json::from_str(
                &fs::read_to_string(&schema)
                    .with_context(|| format!("failed to read schema file {}", schema.display()))?,
            )
            .context("schema file is not valid JSON")?;
            let system_prompt = fs::read_to_string(&prompt)
                .with_context(|| format!("failed to read prompt file {}", prompt.display()))?;

            // Credential check happens here, before any network call
            let client = NimClient::new(&config.classifier)?;
            let classifier = Arc::new(Classifier::new(client));
            let pipeline = Pipeline::new(concurrency.unwrap_or(config.pipeline.concurrency));

            let mut request =
                PrequalRequest::new(file_content, format, criteria_schema, system_prompt);
            request.top_n = top_n.unwrap_or(config.pipeline.top_n);
            request.include_reasoning = !no_reasoning;

            println!("🔄 Running prequalification pipeline...");
            match pipeline.run(classifier, request).await {
                Ok(outcome) => {
                    fs::create_dir_all(&output)?;
                    let path = output.join(&outcome.filename);
                    fs::write(&path, &outcome.csv)?;

                    println!("\n📊 Pipeline Results:");
                    println!("   Total leads: {}", outcome.stats.total);
                    println!("   Classified: {}", outcome.stats.successful);
                    println!("   Failed: {}", outcome.stats.failed);
                    println!(
                        "   Priorities: A={} B={} C={} D={}",
                        outcome.stats.priority_a,
                        outcome.stats.priority_b,
                        outcome.stats.priority_c,
                        outcome.stats.priority_d
                    );
                    println!("   Avg confidence: {:.2}", outcome.stats.avg_confidence);
                    println!("   Output file: {}", path.display());
                    info!("Pipeline finished");
                }
                Err(e) => {
                    error!("Pipeline failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        Commands::Parse { input, format } => {
            let format = resolve_format(format.as_deref(), &input)?;
            let file_content = fs::read_to_string(&input)
                .with_context(|| format!("failed to read input file {}", input.display()))?;

            println!("🔄 Parsing {}...", input.display());
            let parsed = parser::parse_leads(&file_content, format)?;

            println!("\n📊 Parse Results:");
            println!("   Valid leads: {}", parsed.total_count);
            println!("   Skipped rows: {}", parsed.row_errors.len());
            for lead in parsed.leads.iter().take(5) {
                println!(
                    "   - {} | {} | {}",
                    lead.display_name().unwrap_or_else(|| "(no name)".into()),
                    lead.job_title.as_deref().unwrap_or("-"),
                    lead.company.as_deref().unwrap_or("-")
                );
            }
            if parsed.total_count > 5 {
                println!("   … and {} more", parsed.total_count - 5);
            }
            if !parsed.row_errors.is_empty() {
                println!("\n⚠️  Rows skipped during parsing:");
                for row_error in &parsed.row_errors {
                    println!("   - {row_error}");
                }
            }
        }
    }

    Ok(())
}

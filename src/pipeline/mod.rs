pub mod aggregate;
pub mod classifier;
pub mod export;
pub mod fanout;
pub mod parser;

use crate::error::Result;
use crate::schema::CriteriaSchema;
use crate::types::RunStats;
use classifier::LeadClassifier;
use metrics::{counter, histogram};
use parser::InputFormat;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

pub const DEFAULT_TOP_N: usize = 200;

/// One prequalification run: an export file plus the classification contract.
#[derive(Debug, Clone)]
pub struct PrequalRequest {
    pub file_content: String,
    pub format: InputFormat,
    pub criteria_schema: Value,
    pub system_prompt: String,
    pub top_n: usize,
    pub include_reasoning: bool,
}

impl PrequalRequest {
    pub fn new(
        file_content: String,
        format: InputFormat,
        criteria_schema: Value,
        system_prompt: String,
    ) -> Self {
        Self {
            file_content,
            format,
            criteria_schema,
            system_prompt,
            top_n: DEFAULT_TOP_N,
            include_reasoning: true,
        }
    }
}

/// Final pipeline output: the ranked CSV, a suggested filename, and the run
/// statistics.
#[derive(Debug)]
pub struct PrequalOutcome {
    pub csv: String,
    pub filename: String,
    pub stats: RunStats,
}

/// Four-stage prequalification pipeline:
/// parse → classify (bounded fan-out) → aggregate → export.
///
/// Each stage owns its output and hands an immutable value to the next, so
/// the stages stay independently testable.
pub struct Pipeline {
    concurrency: usize,
}

impl Pipeline {
    pub fn new(concurrency: usize) -> Self {
        Self { concurrency }
    }

    #[instrument(skip_all, fields(format = ?request.format, top_n = request.top_n))]
    pub async fn run(
        &self,
        classifier: Arc<dyn LeadClassifier>,
        request: PrequalRequest,
    ) -> Result<PrequalOutcome> {
        counter!("prequal_pipeline_runs_total").increment(1);
        let t_pipeline = Instant::now();

        let schema = CriteriaSchema::new(request.criteria_schema)?;

        // Stage 1: parse and normalize
        let t_parse = Instant::now();
        let parsed = parser::parse_leads(&request.file_content, request.format)?;
        histogram!("prequal_parse_duration_seconds").record(t_parse.elapsed().as_secs_f64());
        info!("Parsed {} leads", parsed.total_count);
        if !parsed.row_errors.is_empty() {
            warn!(
                "{} rows skipped during parsing: {}",
                parsed.row_errors.len(),
                parsed.row_errors.join("; ")
            );
        }

        // Stage 2: classify with a bounded fan-out
        let t_classify = Instant::now();
        let outcomes = fanout::classify_all(
            classifier,
            parsed.leads,
            &schema,
            &request.system_prompt,
            self.concurrency,
        )
        .await;
        histogram!("prequal_classify_stage_duration_seconds")
            .record(t_classify.elapsed().as_secs_f64());

        // Stage 3: aggregate and rank
        let report = aggregate::aggregate(outcomes);

        // Stage 4: export the top N
        let export =
            export::export_csv(&report.ranked, request.top_n, request.include_reasoning)?;

        histogram!("prequal_pipeline_duration_seconds")
            .record(t_pipeline.elapsed().as_secs_f64());
        info!(
            exported = export.count,
            successful = report.stats.successful,
            failed = report.stats.failed,
            "Pipeline run complete"
        );

        Ok(PrequalOutcome {
            csv: export.csv,
            filename: export.filename,
            stats: report.stats,
        })
    }
}

use crate::error::{PrequalError, Result};
use crate::pipeline::aggregate::RankedLead;
use serde_json::Value;
use tracing::info;

/// Identity columns, in the order they appear in the export.
const IDENTITY_COLUMNS: [&str; 7] = [
    "first_name",
    "last_name",
    "full_name",
    "job_title",
    "company",
    "location",
    "profile_url",
];

/// Serialized export plus a human-friendly suggested filename.
#[derive(Debug)]
pub struct Export {
    pub csv: String,
    pub count: usize,
    pub filename: String,
}

/// Serializes the first `top_n` already-ranked rows to CSV.
///
/// Identity columns come first, each included only when at least one exported
/// row carries a value. Every classification field follows with an `llm_`
/// prefix, in first-seen order; `reasoning` is dropped entirely when
/// `include_reasoning` is false. Array values flatten to a pipe-delimited
/// string for tabular compatibility.
pub fn export_csv(ranked: &[RankedLead], top_n: usize, include_reasoning: bool) -> Result<Export> {
    let top = &ranked[..top_n.min(ranked.len())];

    // Nothing ranked means nothing to export; an empty document beats a
    // header row with no columns
    if top.is_empty() {
        let date = chrono::Utc::now().format("%Y-%m-%d");
        return Ok(Export {
            csv: String::new(),
            count: 0,
            filename: format!("prequalified_leads_top0_{date}.csv"),
        });
    }

    let mut identity: Vec<&str> = Vec::new();
    let mut classification: Vec<String> = Vec::new();
    for column in IDENTITY_COLUMNS {
        if top.iter().any(|row| row.contains_key(column)) {
            identity.push(column);
        }
    }
    for row in top {
        for key in row.keys() {
            if IDENTITY_COLUMNS.contains(&key.as_str()) {
                continue;
            }
            if key == "reasoning" && !include_reasoning {
                continue;
            }
            if !classification.contains(key) {
                classification.push(key.clone());
            }
        }
    }

    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());

    let header: Vec<String> = identity
        .iter()
        .map(|c| c.to_string())
        .chain(classification.iter().map(|c| format!("llm_{c}")))
        .collect();
    writer.write_record(&header)?;

    for row in top {
        let record: Vec<String> = identity
            .iter()
            .map(|c| row.get(*c).map(cell_text).unwrap_or_default())
            .chain(
                classification
                    .iter()
                    .map(|c| row.get(c).map(cell_text).unwrap_or_default()),
            )
            .collect();
        writer.write_record(&record)?;
    }

    let csv = String::from_utf8(writer.into_inner().map_err(|e| PrequalError::Api {
        message: format!("CSV writer flush failed: {e}"),
    })?)
    .map_err(|e| PrequalError::InvalidInput(format!("export is not valid UTF-8: {e}")))?;

    let date = chrono::Utc::now().format("%Y-%m-%d");
    let filename = format!("prequalified_leads_top{}_{}.csv", top.len(), date);
    info!(count = top.len(), %filename, "Export ready");

    Ok(Export {
        csv,
        count: top.len(),
        filename,
    })
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(cell_text)
            .collect::<Vec<_>>()
            .join("|"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

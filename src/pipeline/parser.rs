use crate::error::{PrequalError, Result};
use crate::types::Lead;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Declared format of an import file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Json,
}

impl std::str::FromStr for InputFormat {
    type Err = PrequalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(InputFormat::Csv),
            "json" => Ok(InputFormat::Json),
            other => Err(PrequalError::InvalidInput(format!(
                "unknown input format '{other}', expected csv or json"
            ))),
        }
    }
}

/// Parsed and normalized leads, plus per-row errors that were recovered from.
#[derive(Debug)]
pub struct ParseOutput {
    pub leads: Vec<Lead>,
    pub total_count: usize,
    pub row_errors: Vec<String>,
}

/// Maps export-header spellings (Sales Navigator and friends) to canonical
/// field names. Lookup keys are trimmed and lowercased first, which also
/// covers camelCase JSON keys like `firstName`.
static HEADER_SYNONYMS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("first name", "first_name"),
        ("firstname", "first_name"),
        ("last name", "last_name"),
        ("lastname", "last_name"),
        ("full name", "full_name"),
        ("fullname", "full_name"),
        ("name", "full_name"),
        ("job title", "job_title"),
        ("jobtitle", "job_title"),
        ("title", "job_title"),
        ("current job title", "job_title"),
        ("company", "company"),
        ("company name", "company"),
        ("companyname", "company"),
        ("current company", "company"),
        ("organization", "company"),
        ("location", "location"),
        ("profile url", "profile_url"),
        ("profileurl", "profile_url"),
        ("linkedin url", "profile_url"),
        ("url", "profile_url"),
    ])
});

fn canonical_field(header: &str) -> Option<&'static str> {
    HEADER_SYNONYMS
        .get(header.trim().to_lowercase().as_str())
        .copied()
}

/// Parses raw file content into normalized leads.
///
/// CSV parsing never hard-fails on a single bad row; those are collected in
/// `row_errors` and logged. A syntactically invalid JSON payload is fatal.
pub fn parse_leads(content: &str, format: InputFormat) -> Result<ParseOutput> {
    let (rows, row_errors) = match format {
        InputFormat::Csv => parse_csv_rows(content)?,
        InputFormat::Json => (parse_json_rows(content)?, Vec::new()),
    };

    let leads: Vec<Lead> = rows.into_iter().filter_map(normalize_row).collect();
    debug!("Normalized {} leads", leads.len());

    Ok(ParseOutput {
        total_count: leads.len(),
        leads,
        row_errors,
    })
}

/// One raw row: original columns plus the canonical fields they mapped to.
struct RawRow {
    raw: Map<String, Value>,
    fields: HashMap<&'static str, String>,
}

fn parse_csv_rows(content: &str) -> Result<(Vec<RawRow>, Vec<String>)> {
    // Strict field counts: a ragged row is a per-row error, not a fatal one
    let mut reader = csv::ReaderBuilder::new().from_reader(content.as_bytes());

    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    let mut row_errors = Vec::new();

    for (idx, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                // Row 1 is the first data row, header excluded
                warn!("Skipping malformed CSV row {}: {}", idx + 1, e);
                row_errors.push(format!("row {}: {}", idx + 1, e));
                continue;
            }
        };

        let mut raw = Map::new();
        let mut fields = HashMap::new();
        for (header, value) in headers.iter().zip(record.iter()) {
            raw.insert(header.to_string(), Value::String(value.to_string()));
            if let Some(field) = canonical_field(header) {
                fields.insert(field, value.to_string());
            }
        }
        rows.push(RawRow { raw, fields });
    }

    Ok((rows, row_errors))
}

fn parse_json_rows(content: &str) -> Result<Vec<RawRow>> {
    let parsed: Value = serde_json::from_str(content)
        .map_err(|e| PrequalError::InvalidInput(format!("JSON parsing failed: {e}")))?;

    // A single top-level object is treated as a one-element export
    let items = match parsed {
        Value::Array(items) => items,
        other => vec![other],
    };

    let mut rows = Vec::new();
    for item in items {
        let Value::Object(obj) = item else {
            warn!("Skipping non-object JSON entry: {}", item);
            continue;
        };
        let mut fields = HashMap::new();
        for (key, value) in &obj {
            if let (Some(field), Some(text)) = (canonical_field(key), value.as_str()) {
                fields.insert(field, text.to_string());
            }
        }
        rows.push(RawRow { raw: obj, fields });
    }
    Ok(rows)
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Applies trimming, empty-string elision, and bidirectional name derivation.
/// Returns `None` for rows with no identifying field at all; sparse rows are
/// expected in real exports and are not errors.
fn normalize_row(row: RawRow) -> Option<Lead> {
    let mut first_name = non_empty(row.fields.get("first_name"));
    let mut last_name = non_empty(row.fields.get("last_name"));
    let mut full_name = non_empty(row.fields.get("full_name"));

    // Join first/last into a full name when the export lacks one
    if full_name.is_none() && (first_name.is_some() || last_name.is_some()) {
        let joined = [first_name.as_deref(), last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        full_name = Some(joined);
    }

    // Split a full name when the export lacks the parts
    if first_name.is_none() && last_name.is_none() {
        if let Some(full) = &full_name {
            let mut parts = full.split_whitespace();
            first_name = parts.next().map(str::to_string);
            let rest = parts.collect::<Vec<_>>().join(" ");
            if !rest.is_empty() {
                last_name = Some(rest);
            }
        }
    }

    let lead = Lead {
        first_name,
        last_name,
        full_name,
        job_title: non_empty(row.fields.get("job_title")),
        company: non_empty(row.fields.get("company")),
        location: non_empty(row.fields.get("location")),
        profile_url: non_empty(row.fields.get("profile_url")),
        raw: row.raw,
    };

    lead.has_identity().then_some(lead)
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One prospect extracted from an import file.
///
/// All identity fields are optional; `raw` keeps every original input column
/// untouched so nothing is lost between import and export.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Lead {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub job_title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub profile_url: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub raw: Map<String, Value>,
}

impl Lead {
    /// A lead with no name, title, or company carries nothing worth
    /// classifying and is dropped before the fan-out.
    pub fn has_identity(&self) -> bool {
        self.full_name.is_some()
            || self.first_name.is_some()
            || self.last_name.is_some()
            || self.job_title.is_some()
            || self.company.is_some()
    }

    /// Best available display name for prompts and log lines.
    pub fn display_name(&self) -> Option<String> {
        if let Some(full) = &self.full_name {
            return Some(full.clone());
        }
        let joined = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if joined.is_empty() {
            None
        } else {
            Some(joined)
        }
    }
}

/// Outcome of classifying a single lead. Created once by the classifier and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationOutcome {
    pub lead: Lead,
    pub classification: Map<String, Value>,
    pub succeeded: bool,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

/// Summary statistics for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub priority_a: usize,
    pub priority_b: usize,
    pub priority_c: usize,
    pub priority_d: usize,
    pub avg_confidence: f64,
}

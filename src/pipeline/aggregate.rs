use crate::schema::priority_rank;
use crate::types::{ClassificationOutcome, Lead, RunStats};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use tracing::info;

/// One export-ready row: lead identity fields merged flat with the
/// classification fields (classification wins key collisions). The lead's
/// `raw` bookkeeping never makes it into a ranked row.
pub type RankedLead = Map<String, Value>;

/// Ranked, merged results plus run statistics.
#[derive(Debug)]
pub struct Report {
    pub ranked: Vec<RankedLead>,
    pub stats: RunStats,
}

/// Folds classification outcomes into a deterministic ranking and stats.
///
/// Failed outcomes are counted in the stats but excluded from the ranking,
/// and therefore from export. Sort is stable and descending: priority bucket
/// rank first (A=4 … D=1, unknown ranks with D), then confidence.
pub fn aggregate(outcomes: Vec<ClassificationOutcome>) -> Report {
    let mut stats = RunStats {
        total: outcomes.len(),
        ..Default::default()
    };

    let mut confidence_sum = 0.0;
    let mut confidence_count = 0usize;

    for outcome in &outcomes {
        if !outcome.succeeded {
            stats.failed += 1;
            continue;
        }
        stats.successful += 1;

        match outcome
            .classification
            .get("priority_score")
            .and_then(Value::as_str)
        {
            Some("A") => stats.priority_a += 1,
            Some("B") => stats.priority_b += 1,
            Some("C") => stats.priority_c += 1,
            Some("D") => stats.priority_d += 1,
            _ => {}
        }

        if let Some(confidence) = outcome
            .classification
            .get("confidence_score")
            .and_then(Value::as_f64)
        {
            confidence_sum += confidence;
            confidence_count += 1;
        }
    }

    // Mean over succeeded results with a numeric confidence; 0 when none
    stats.avg_confidence = if confidence_count > 0 {
        confidence_sum / confidence_count as f64
    } else {
        0.0
    };

    let mut succeeded: Vec<ClassificationOutcome> =
        outcomes.into_iter().filter(|o| o.succeeded).collect();

    succeeded.sort_by(|a, b| {
        let rank_a = priority_rank(priority_of(a));
        let rank_b = priority_rank(priority_of(b));
        rank_b
            .cmp(&rank_a)
            .then_with(|| {
                confidence_of(b)
                    .partial_cmp(&confidence_of(a))
                    .unwrap_or(Ordering::Equal)
            })
    });

    let ranked = succeeded.into_iter().map(merge_flat).collect();

    info!(
        total = stats.total,
        successful = stats.successful,
        failed = stats.failed,
        "Aggregated classification results"
    );

    Report { ranked, stats }
}

fn priority_of(outcome: &ClassificationOutcome) -> Option<&str> {
    outcome
        .classification
        .get("priority_score")
        .and_then(Value::as_str)
}

fn confidence_of(outcome: &ClassificationOutcome) -> f64 {
    outcome
        .classification
        .get("confidence_score")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

fn insert_present(row: &mut RankedLead, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        row.insert(key.to_string(), Value::String(value.clone()));
    }
}

fn merge_flat(outcome: ClassificationOutcome) -> RankedLead {
    let mut row = Map::new();
    let Lead {
        first_name,
        last_name,
        full_name,
        job_title,
        company,
        location,
        profile_url,
        raw: _,
    } = outcome.lead;

    insert_present(&mut row, "first_name", &first_name);
    insert_present(&mut row, "last_name", &last_name);
    insert_present(&mut row, "full_name", &full_name);
    insert_present(&mut row, "job_title", &job_title);
    insert_present(&mut row, "company", &company);
    insert_present(&mut row, "location", &location);
    insert_present(&mut row, "profile_url", &profile_url);

    // Classification fields win on key collision
    for (key, value) in outcome.classification {
        row.insert(key, value);
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outcome(name: &str, priority: Option<&str>, confidence: Option<f64>, succeeded: bool) -> ClassificationOutcome {
        let mut classification = Map::new();
        if let Some(p) = priority {
            classification.insert("priority_score".into(), json!(p));
        }
        if let Some(c) = confidence {
            classification.insert("confidence_score".into(), json!(c));
        }
        ClassificationOutcome {
            lead: Lead {
                full_name: Some(name.to_string()),
                ..Default::default()
            },
            classification,
            succeeded,
            attempts: 1,
            elapsed_ms: 0,
        }
    }

    fn names(report: &Report) -> Vec<String> {
        report
            .ranked
            .iter()
            .map(|row| row["full_name"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn ranking_orders_by_priority_then_confidence() {
        let report = aggregate(vec![
            outcome("d-high", Some("D"), Some(0.9), true),
            outcome("a-low", Some("A"), Some(0.5), true),
            outcome("b-mid", Some("B"), Some(0.7), true),
            outcome("a-high", Some("A"), Some(0.9), true),
            outcome("c-low", Some("C"), Some(0.1), true),
        ]);

        assert_eq!(
            names(&report),
            vec!["a-high", "a-low", "b-mid", "c-low", "d-high"]
        );
        assert_eq!(report.stats.priority_a, 2);
        assert_eq!(report.stats.priority_b, 1);
        assert_eq!(report.stats.priority_c, 1);
        assert_eq!(report.stats.priority_d, 1);
    }

    #[test]
    fn failed_outcomes_are_counted_but_not_ranked() {
        let report = aggregate(vec![
            outcome("good", Some("B"), Some(0.8), true),
            outcome("bad", Some("D"), Some(0.0), false),
        ]);

        assert_eq!(report.stats.total, 2);
        assert_eq!(report.stats.successful, 1);
        assert_eq!(report.stats.failed, 1);
        assert_eq!(names(&report), vec!["good"]);
        // Failed outcome's fallback priority does not pollute the buckets
        assert_eq!(report.stats.priority_d, 0);
    }

    #[test]
    fn unknown_priority_ranks_with_the_lowest_bucket() {
        let report = aggregate(vec![
            outcome("mystery", Some("Z"), Some(0.99), true),
            outcome("known-d", Some("D"), Some(0.5), true),
            outcome("known-c", Some("C"), Some(0.1), true),
        ]);

        // Z ranks as D; higher confidence breaks the tie within the bucket
        assert_eq!(names(&report), vec!["known-c", "mystery", "known-d"]);
    }

    #[test]
    fn equal_keys_keep_input_order() {
        let report = aggregate(vec![
            outcome("first", Some("B"), Some(0.5), true),
            outcome("second", Some("B"), Some(0.5), true),
            outcome("third", Some("B"), Some(0.5), true),
        ]);
        assert_eq!(names(&report), vec!["first", "second", "third"]);
    }

    #[test]
    fn avg_confidence_ignores_non_numeric_values() {
        let mut stringly = outcome("stringly", Some("A"), None, true);
        stringly
            .classification
            .insert("confidence_score".into(), json!("high"));

        let report = aggregate(vec![
            outcome("scored", Some("A"), Some(0.6), true),
            stringly,
            outcome("unscored", Some("B"), None, true),
        ]);
        assert!((report.stats.avg_confidence - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn avg_confidence_is_zero_when_nothing_is_numeric() {
        let report = aggregate(vec![outcome("unscored", Some("A"), None, true)]);
        assert_eq!(report.stats.avg_confidence, 0.0);
    }

    #[test]
    fn classification_fields_win_merge_collisions() {
        let mut clashing = outcome("clash", Some("A"), Some(0.9), true);
        clashing.lead.company = Some("From Import".into());
        clashing
            .classification
            .insert("company".into(), json!("From Model"));

        let report = aggregate(vec![clashing]);
        assert_eq!(report.ranked[0]["company"], json!("From Model"));
    }
}

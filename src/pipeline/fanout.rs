use crate::pipeline::classifier::LeadClassifier;
use crate::schema::CriteriaSchema;
use crate::types::{ClassificationOutcome, Lead};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Classifies every lead with at most `concurrency` calls in flight.
///
/// The output sequence preserves input order regardless of completion order:
/// `buffered` polls up to `concurrency` futures at once but yields results in
/// submission order, so no index bookkeeping is needed. A lead that exhausts
/// its retries resolves to a fallback outcome and frees its slot like any
/// other; nothing a single lead does can abort its siblings.
#[instrument(skip_all, fields(leads = leads.len(), concurrency = concurrency))]
pub async fn classify_all(
    classifier: Arc<dyn LeadClassifier>,
    leads: Vec<Lead>,
    schema: &CriteriaSchema,
    system_prompt: &str,
    concurrency: usize,
) -> Vec<ClassificationOutcome> {
    let concurrency = concurrency.max(1);
    debug!("Fanning out classification");

    stream::iter(leads.into_iter().map(|lead| {
        let classifier = Arc::clone(&classifier);
        async move { classifier.classify(lead, schema, system_prompt).await }
    }))
    .buffered(concurrency)
    .collect()
    .await
}

use crate::config::{self, ClassifierConfig};
use crate::error::{PrequalError, Result};
use crate::schema::CriteriaSchema;
use crate::types::{ClassificationOutcome, Lead};
use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const MAX_ATTEMPTS: u32 = 3;

/// Generation temperature per attempt: start near-deterministic, loosen on
/// each retry so a model stuck on an invalid completion gets room to move.
pub const TEMPERATURE_SCHEDULE: [f64; 3] = [0.1, 0.3, 0.5];

pub const FALLBACK_REASONING: &str =
    "Classification failed after 3 retries - insufficient data";

/// A single structured-generation request, ready for any provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_message: String,
    pub temperature: f64,
    pub schema: Value,
}

/// Transport seam for the chat-completions call. Returns the model's raw
/// content string; decoding and completeness checks happen in the classifier.
#[async_trait]
pub trait ChatCompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Classification applied to one lead. Implementations never error; every
/// failure path resolves to a populated fallback outcome.
#[async_trait]
pub trait LeadClassifier: Send + Sync {
    async fn classify(
        &self,
        lead: Lead,
        schema: &CriteriaSchema,
        system_prompt: &str,
    ) -> ClassificationOutcome;
}

/// Retry progression for one lead. One counter drives both the retry budget
/// and the temperature index, so a mix of transport and completeness failures
/// still walks the schedule 0.1 → 0.3 → 0.5.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryState {
    Attempting(u32),
    Succeeded {
        attempts: u32,
        classification: Map<String, Value>,
    },
    RetryScheduled {
        next: u32,
        delay: Duration,
    },
    Exhausted,
}

impl RetryState {
    /// Transition out of `Attempting(n)` after a failed attempt. Linear
    /// backoff: 1s after the first attempt, 2s after the second, none after
    /// the last.
    pub fn after_failure(attempt: u32) -> RetryState {
        let next = attempt + 1;
        if next < MAX_ATTEMPTS {
            RetryState::RetryScheduled {
                next,
                delay: Duration::from_millis(1000 * u64::from(next)),
            }
        } else {
            RetryState::Exhausted
        }
    }

    pub fn temperature(attempt: u32) -> f64 {
        TEMPERATURE_SCHEDULE[attempt as usize % TEMPERATURE_SCHEDULE.len()]
    }
}

/// Retrying classifier over any [`ChatCompletionClient`].
pub struct Classifier<C> {
    client: C,
}

impl<C: ChatCompletionClient> Classifier<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// One attempt: call the provider, decode, and check completeness against
    /// the schema's `required` list. Any failure is just an error here; the
    /// retry loop decides what happens next.
    async fn attempt(
        &self,
        request: &CompletionRequest,
        schema: &CriteriaSchema,
    ) -> Result<Map<String, Value>> {
        let content = self.client.complete(request).await?;
        let decoded: Value = serde_json::from_str(&content)?;
        let Value::Object(classification) = decoded else {
            return Err(PrequalError::Api {
                message: "classification response is not a JSON object".to_string(),
            });
        };
        if !schema.is_complete(&classification) {
            return Err(PrequalError::Api {
                message: format!(
                    "classification missing required fields: {}",
                    schema.missing_fields(&classification).join(", ")
                ),
            });
        }
        Ok(classification)
    }
}

#[async_trait]
impl<C: ChatCompletionClient> LeadClassifier for Classifier<C> {
    async fn classify(
        &self,
        lead: Lead,
        schema: &CriteriaSchema,
        system_prompt: &str,
    ) -> ClassificationOutcome {
        let started = Instant::now();
        let user_message = build_user_message(&lead);
        let mut state = RetryState::Attempting(0);

        loop {
            state = match state {
                RetryState::Attempting(attempt) => {
                    counter!("prequal_classify_attempts_total").increment(1);
                    let request = CompletionRequest {
                        system_prompt: system_prompt.to_string(),
                        user_message: user_message.clone(),
                        temperature: RetryState::temperature(attempt),
                        schema: schema.as_value().clone(),
                    };
                    match self.attempt(&request, schema).await {
                        Ok(classification) => RetryState::Succeeded {
                            attempts: attempt + 1,
                            classification,
                        },
                        Err(e) => {
                            warn!(
                                attempt = attempt + 1,
                                "Classification attempt failed: {}", e
                            );
                            RetryState::after_failure(attempt)
                        }
                    }
                }
                RetryState::RetryScheduled { next, delay } => {
                    tokio::time::sleep(delay).await;
                    RetryState::Attempting(next)
                }
                RetryState::Succeeded {
                    attempts,
                    classification,
                } => {
                    debug!(
                        attempts,
                        "Classification succeeded for {:?}",
                        lead.display_name()
                    );
                    counter!("prequal_classify_success_total").increment(1);
                    histogram!("prequal_classify_duration_seconds")
                        .record(started.elapsed().as_secs_f64());
                    return ClassificationOutcome {
                        lead,
                        classification,
                        succeeded: true,
                        attempts,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    };
                }
                RetryState::Exhausted => {
                    warn!(
                        "Classification failed for {:?} after {} attempts, using fallback",
                        lead.display_name(),
                        MAX_ATTEMPTS
                    );
                    counter!("prequal_classify_fallback_total").increment(1);
                    return ClassificationOutcome {
                        lead,
                        classification: fallback_classification(),
                        succeeded: false,
                        attempts: MAX_ATTEMPTS,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    };
                }
            };
        }
    }
}

/// The remote model always receives a fully shaped prompt; absent fields are
/// rendered as a literal "Not provided".
fn build_user_message(lead: &Lead) -> String {
    let shown = |value: Option<String>| value.unwrap_or_else(|| "Not provided".to_string());
    format!(
        "Classify the following prospect:\n\n\
         Name: {}\n\
         Job Title: {}\n\
         Company: {}\n\
         Location: {}\n\n\
         Provide a detailed classification based on the criteria.",
        shown(lead.display_name()),
        shown(lead.job_title.clone()),
        shown(lead.company.clone()),
        shown(lead.location.clone()),
    )
}

/// Minimal classification returned when every attempt failed.
pub fn fallback_classification() -> Map<String, Value> {
    let mut fallback = Map::new();
    fallback.insert("reasoning".into(), json!(FALLBACK_REASONING));
    fallback.insert("priority_score".into(), json!("D"));
    fallback.insert("confidence_score".into(), json!(0.0));
    fallback
}

/// Chat-completions client for Nvidia NIM (OpenAI-compatible surface).
pub struct NimClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    max_tokens: u32,
    api_key: String,
}

impl NimClient {
    /// Fails fast when the API key is absent, before any network attempt.
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let api_key = config::api_key_from_env()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            api_key,
        })
    }
}

#[async_trait]
impl ChatCompletionClient for NimClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_message },
            ],
            "temperature": request.temperature,
            "max_tokens": self.max_tokens,
            // Provider-level schema enforcement, not just a parsing hint
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "classification",
                    "strict": true,
                    "schema": request.schema,
                },
            },
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PrequalError::Api {
                message: format!("classification API error ({status}): {error_text}"),
            });
        }

        let payload: Value = response.json().await?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PrequalError::Api {
                message: "no content in API response".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    fn criteria() -> CriteriaSchema {
        CriteriaSchema::new(json!({
            "type": "object",
            "required": ["reasoning", "priority_score", "confidence_score"]
        }))
        .unwrap()
    }

    fn lead() -> Lead {
        Lead {
            full_name: Some("Grace Hopper".into()),
            job_title: Some("Rear Admiral".into()),
            company: Some("US Navy".into()),
            ..Default::default()
        }
    }

    /// Replays a fixed script of responses and records each request's
    /// temperature.
    struct ScriptedClient {
        responses: Mutex<VecDeque<Result<String>>>,
        temperatures: Mutex<Vec<f64>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                temperatures: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatCompletionClient for ScriptedClient {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.temperatures.lock().await.push(request.temperature);
            self.responses
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| {
                    Err(PrequalError::Api {
                        message: "script exhausted".to_string(),
                    })
                })
        }
    }

    fn good_response() -> Result<String> {
        Ok(json!({
            "reasoning": "title and company both match",
            "priority_score": "A",
            "confidence_score": 0.9
        })
        .to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn temperatures_escalate_across_failed_attempts() {
        let client = ScriptedClient::new(vec![
            Err(PrequalError::Api {
                message: "HTTP 500".to_string(),
            }),
            // Structurally incomplete: advances the same counter
            Ok(json!({"reasoning": "thin"}).to_string()),
            good_response(),
        ]);
        let classifier = Classifier::new(client);

        let outcome = classifier.classify(lead(), &criteria(), "rank leads").await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.attempts, 3);
        let temps = classifier.client.temperatures.lock().await.clone();
        assert_eq!(temps, vec![0.1, 0.3, 0.5]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_the_literal_fallback() {
        let client = ScriptedClient::new(vec![]);
        let classifier = Classifier::new(client);

        let outcome = classifier.classify(lead(), &criteria(), "rank leads").await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.attempts, MAX_ATTEMPTS);
        assert_eq!(
            outcome.classification.get("reasoning"),
            Some(&json!(FALLBACK_REASONING))
        );
        assert_eq!(
            outcome.classification.get("priority_score"),
            Some(&json!("D"))
        );
        assert_eq!(
            outcome.classification.get("confidence_score"),
            Some(&json!(0.0))
        );
    }

    #[tokio::test]
    async fn first_attempt_success_skips_the_backoff() {
        let client = ScriptedClient::new(vec![good_response()]);
        let classifier = Classifier::new(client);

        let outcome = classifier.classify(lead(), &criteria(), "rank leads").await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(
            outcome.classification.get("priority_score"),
            Some(&json!("A"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_content_counts_as_a_failed_attempt() {
        let client = ScriptedClient::new(vec![
            Ok("not json at all".to_string()),
            good_response(),
        ]);
        let classifier = Classifier::new(client);

        let outcome = classifier.classify(lead(), &criteria(), "rank leads").await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.attempts, 2);
    }

    #[test]
    fn failure_transitions_follow_the_linear_backoff() {
        assert_eq!(
            RetryState::after_failure(0),
            RetryState::RetryScheduled {
                next: 1,
                delay: Duration::from_millis(1000),
            }
        );
        assert_eq!(
            RetryState::after_failure(1),
            RetryState::RetryScheduled {
                next: 2,
                delay: Duration::from_millis(2000),
            }
        );
        assert_eq!(RetryState::after_failure(2), RetryState::Exhausted);
    }

    #[test]
    fn prompt_substitutes_not_provided_for_absent_fields() {
        let sparse = Lead {
            company: Some("Acme".into()),
            ..Default::default()
        };
        let message = build_user_message(&sparse);
        assert!(message.contains("Name: Not provided"));
        assert!(message.contains("Job Title: Not provided"));
        assert!(message.contains("Company: Acme"));
        assert!(message.contains("Location: Not provided"));
    }
}

use crate::error::{PrequalError, Result};
use serde_json::{Map, Value};

/// Canonical priority buckets, best to worst.
pub const PRIORITY_BUCKETS: [&str; 4] = ["A", "B", "C", "D"];

/// Rank used for sorting; unknown or missing priorities rank lowest.
pub fn priority_rank(priority: Option<&str>) -> u8 {
    match priority {
        Some("A") => 4,
        Some("B") => 3,
        Some("C") => 2,
        _ => 1,
    }
}

/// The caller-supplied classification schema, kept as an opaque JSON value.
///
/// The schema is forwarded verbatim to the provider's structured-output
/// directive; locally we only care that it is an object and what its
/// `required` list says, so completeness checks stay generic instead of
/// hardcoding field names.
#[derive(Debug, Clone)]
pub struct CriteriaSchema {
    value: Value,
    required: Vec<String>,
}

impl CriteriaSchema {
    pub fn new(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(PrequalError::Schema(
                "criteria schema must be a JSON object".to_string(),
            ));
        }
        let required = value
            .get("required")
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self { value, required })
    }

    /// The raw schema, as handed to the provider.
    pub fn as_value(&self) -> &Value {
        &self.value
    }

    pub fn required_fields(&self) -> &[String] {
        &self.required
    }

    /// A classification is complete when every required field is present with
    /// a non-null value.
    pub fn is_complete(&self, classification: &Map<String, Value>) -> bool {
        self.required
            .iter()
            .all(|field| matches!(classification.get(field), Some(v) if !v.is_null()))
    }

    /// Required fields absent or null in the given classification.
    pub fn missing_fields(&self, classification: &Map<String, Value>) -> Vec<&str> {
        self.required
            .iter()
            .filter(|field| !matches!(classification.get(*field), Some(v) if !v.is_null()))
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> CriteriaSchema {
        CriteriaSchema::new(json!({
            "type": "object",
            "properties": {
                "reasoning": {"type": "string"},
                "priority_score": {"enum": ["A", "B", "C", "D"]},
                "confidence_score": {"type": "number"},
                "segment": {"enum": ["smb", "mid", "enterprise"]}
            },
            "required": ["reasoning", "priority_score", "confidence_score", "segment"]
        }))
        .unwrap()
    }

    #[test]
    fn non_object_schema_is_rejected() {
        assert!(CriteriaSchema::new(json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn completeness_walks_the_required_list_generically() {
        let schema = schema();
        let mut classification = json!({
            "reasoning": "strong title match",
            "priority_score": "A",
            "confidence_score": 0.92
        })
        .as_object()
        .unwrap()
        .clone();

        // Domain-specific required field still missing
        assert!(!schema.is_complete(&classification));
        assert_eq!(schema.missing_fields(&classification), vec!["segment"]);

        classification.insert("segment".into(), json!("enterprise"));
        assert!(schema.is_complete(&classification));

        // Null counts as missing
        classification.insert("reasoning".into(), Value::Null);
        assert!(!schema.is_complete(&classification));
    }

    #[test]
    fn schema_without_required_list_accepts_anything() {
        let schema = CriteriaSchema::new(json!({"type": "object"})).unwrap();
        assert!(schema.is_complete(&Map::new()));
    }

    #[test]
    fn priority_ranks_are_total() {
        assert_eq!(priority_rank(Some("A")), 4);
        assert_eq!(priority_rank(Some("B")), 3);
        assert_eq!(priority_rank(Some("C")), 2);
        assert_eq!(priority_rank(Some("D")), 1);
        assert_eq!(priority_rank(Some("Z")), 1);
        assert_eq!(priority_rank(None), 1);
    }
}

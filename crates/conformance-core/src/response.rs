//! Response field extraction
//!
//! Connector responses name the same concept differently (`transactionId.id`,
//! `transaction_id`, `id`, ...). Each semantic field has a fixed, ordered list
//! of candidate paths; extraction returns the first present, non-null scalar.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ParseError;

/// Candidate paths for the transaction identifier
pub const IDENTIFIER_PATHS: &[&str] = &[
    "transactionId.id",
    "transactionId",
    "transaction_id.id",
    "transaction_id",
    "id",
];
/// Candidate paths for the refund identifier. The trailing generic `id` is
/// only meaningful on a refund reply.
pub const REFUND_IDENTIFIER_PATHS: &[&str] = &["refundId", "refund_id", "connectorRefundId", "id"];
/// Candidate paths for the status
pub const STATUS_PATHS: &[&str] = &["status"];
/// Candidate paths for the amount
pub const AMOUNT_PATHS: &[&str] = &["amount", "minor_amount"];
/// Candidate paths for the currency
pub const CURRENCY_PATHS: &[&str] = &["currency"];

/// A well-known field that can be pulled out of any response shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticField {
    /// Connector transaction id
    Identifier,
    /// Connector refund id
    RefundIdentifier,
    /// Payment or refund status
    Status,
    /// Amount in minor units
    Amount,
    /// ISO currency code
    Currency,
}

impl SemanticField {
    /// Ordered candidate paths
    pub fn candidates(&self) -> &'static [&'static str] {
        match self {
            Self::Identifier => IDENTIFIER_PATHS,
            Self::RefundIdentifier => REFUND_IDENTIFIER_PATHS,
            Self::Status => STATUS_PATHS,
            Self::Amount => AMOUNT_PATHS,
            Self::Currency => CURRENCY_PATHS,
        }
    }

    /// First candidate value, rendered as a string
    pub fn extract(&self, value: &Value) -> Option<String> {
        self.candidates()
            .iter()
            .find_map(|path| lookup(value, path).and_then(scalar_string))
    }
}

/// Resolve a dotted path (`a.b.0.c`). Numeric segments index into arrays.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Present and carrying something: not null, not an empty string, array or object
pub fn is_non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Semantic fields of one response. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedSummary {
    /// Transaction identifier
    pub id: Option<String>,
    /// Refund identifier, when the response carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_id: Option<String>,
    /// Status
    pub status: Option<String>,
    /// Amount in minor units
    pub amount: Option<i64>,
    /// Currency
    pub currency: Option<String>,
}

impl ParsedSummary {
    /// Extract every semantic field from a JSON value
    pub fn from_value(value: &Value) -> Self {
        Self {
            id: SemanticField::Identifier.extract(value),
            // Without the generic `id`, which on other replies is the transaction id
            refund_id: REFUND_IDENTIFIER_PATHS[..REFUND_IDENTIFIER_PATHS.len() - 1]
                .iter()
                .find_map(|path| lookup(value, path).and_then(scalar_string)),
            status: SemanticField::Status.extract(value),
            // int64 fields arrive as JSON strings from protobuf-JSON encoders
            amount: SemanticField::Amount
                .extract(value)
                .and_then(|a| a.parse().ok()),
            currency: SemanticField::Currency.extract(value),
        }
    }
}

/// A response parsed as JSON, with its summary
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    /// Full JSON body
    pub raw: Value,
    /// Extracted semantic fields
    pub summary: ParsedSummary,
}

impl ParsedResponse {
    /// Extract a semantic field from the full body
    pub fn extract(&self, field: SemanticField) -> Option<String> {
        field.extract(&self.raw)
    }
}

/// Parse a raw response body
pub fn parse_response(body: &str) -> Result<ParsedResponse, ParseError> {
    let raw: Value = serde_json::from_str(body)?;
    let summary = ParsedSummary::from_value(&raw);
    Ok(ParsedResponse { raw, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identifier_prefers_nested_transaction_id() {
        let value = json!({"transactionId": {"id": "tx_nested"}, "id": "other"});
        assert_eq!(
            SemanticField::Identifier.extract(&value).as_deref(),
            Some("tx_nested")
        );
    }

    #[test]
    fn test_identifier_skips_object_without_id() {
        let value = json!({"transactionId": {"noResponseIdMarker": {}}, "transaction_id": "tx_2"});
        assert_eq!(
            SemanticField::Identifier.extract(&value).as_deref(),
            Some("tx_2")
        );
    }

    #[test]
    fn test_identifier_falls_back_to_id() {
        let value = json!({"id": "tx_1", "status": "requires_capture"});
        assert_eq!(SemanticField::Identifier.extract(&value).as_deref(), Some("tx_1"));
    }

    #[test]
    fn test_refund_identifier_snake_case_fallback() {
        let value = json!({"refund_id": "rf_9"});
        assert_eq!(
            SemanticField::RefundIdentifier.extract(&value).as_deref(),
            Some("rf_9")
        );
    }

    #[test]
    fn test_refund_identifier_absent() {
        let value = json!({"status": "SUCCESS"});
        assert!(SemanticField::RefundIdentifier.extract(&value).is_none());
    }

    #[test]
    fn test_null_candidates_are_skipped() {
        let value = json!({"refundId": null, "connectorRefundId": "crf_1"});
        assert_eq!(
            SemanticField::RefundIdentifier.extract(&value).as_deref(),
            Some("crf_1")
        );
    }

    #[test]
    fn test_summary_refund_id_ignores_generic_id() {
        let summary = ParsedSummary::from_value(&json!({"id": "tx_1", "status": "CHARGED"}));
        assert_eq!(summary.id.as_deref(), Some("tx_1"));
        assert!(summary.refund_id.is_none());

        let summary = ParsedSummary::from_value(&json!({"connectorRefundId": "crf_2"}));
        assert_eq!(summary.refund_id.as_deref(), Some("crf_2"));
    }

    #[test]
    fn test_amount_from_string_and_number() {
        let summary = ParsedSummary::from_value(&json!({"amount": "5000"}));
        assert_eq!(summary.amount, Some(5000));
        let summary = ParsedSummary::from_value(&json!({"minor_amount": 2500}));
        assert_eq!(summary.amount, Some(2500));
    }

    #[test]
    fn test_lookup_indexes_arrays() {
        let value = json!({"actions": [{"type": "AUTH"}, {"type": "REFUND"}]});
        assert_eq!(lookup(&value, "actions.1.type"), Some(&json!("REFUND")));
        assert!(lookup(&value, "actions.x.type").is_none());
        assert!(lookup(&value, "actions.5").is_none());
    }

    #[test]
    fn test_parse_response_rejects_non_json() {
        assert!(parse_response("upstream connect error").is_err());
    }

    #[test]
    fn test_parse_response_summary() {
        let parsed = parse_response(
            r#"{"transactionId": {"id": "tx_1"}, "status": "CHARGED", "amount": "5000", "currency": "USD"}"#,
        )
        .unwrap();
        assert_eq!(
            parsed.summary,
            ParsedSummary {
                id: Some("tx_1".to_string()),
                refund_id: None,
                status: Some("CHARGED".to_string()),
                amount: Some(5000),
                currency: Some("USD".to_string()),
            }
        );
    }

    #[test]
    fn test_is_non_empty() {
        assert!(!is_non_empty(&json!(null)));
        assert!(!is_non_empty(&json!("")));
        assert!(!is_non_empty(&json!([])));
        assert!(is_non_empty(&json!(0)));
        assert!(is_non_empty(&json!(false)));
    }
}

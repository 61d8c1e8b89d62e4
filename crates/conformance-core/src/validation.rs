//! Declarative response validation
//!
//! Rule sets live in `validation/rules/{operation}.json`. A validation pass
//! runs, in order:
//!
//! 1. `requiredFields` presence checks
//! 2. `fieldValidations` rules
//! 3. the same two against `connectorSpecific[connector]` overrides
//! 4. connector `criticalChecks`
//!
//! Results land in a [`ValidationReport`]. Errors block the step, warnings
//! are advisory. Nothing here returns `Err` for a bad response: a body that
//! is not JSON, or a check that is itself malformed, becomes an error entry.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{Error, ParseError};
use crate::flow::Operation;
use crate::response::{is_non_empty, lookup};

/// Report key for a body that is not JSON
pub const PARSE_ERROR_KEY: &str = "parse_error";

/// Whether a failed check blocks the step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocking
    #[default]
    Error,
    /// Advisory
    Warning,
}

/// A single field rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    /// Present, not null, not an empty string, array or object
    NotEmpty,
    /// Value is one of `allowedValues`
    AllowedValues,
    /// Number, or a string that parses as one
    Numeric,
    /// Numeric and greater than zero
    Positive,
}

impl Rule {
    fn as_str(&self) -> &'static str {
        match self {
            Self::NotEmpty => "not_empty",
            Self::AllowedValues => "allowed_values",
            Self::Numeric => "numeric",
            Self::Positive => "positive",
        }
    }
}

/// Rules applied to one field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValidation {
    /// Dotted path into the response
    pub field: String,
    /// Rules to apply
    pub rules: Vec<Rule>,
    /// Accepted values for `allowed_values`
    #[serde(default)]
    pub allowed_values: Vec<String>,
    /// Message recorded on failure
    #[serde(default)]
    pub error_message: Option<String>,
    /// Severity on failure
    #[serde(default)]
    pub severity: Severity,
}

/// Kind of a critical check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    /// When `array` exists, at least one element's `field` equals `equals`
    ArrayContains,
    /// `field` is one of `oneOf`
    FieldEquals,
    /// `field` is present and non-empty
    FieldPresent,
    /// `field` is absent or null
    FieldAbsent,
}

/// A connector-declared semantic assertion, usually encoding a regression
/// seen before
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalCheck {
    /// Stable check name
    pub name: String,
    /// Check kind
    #[serde(rename = "type")]
    pub check_type: CheckType,
    /// Array path for `array_contains`
    #[serde(default)]
    pub array: Option<String>,
    /// Field path (element-relative for `array_contains`)
    #[serde(default)]
    pub field: Option<String>,
    /// Expected element value for `array_contains`
    #[serde(default)]
    pub equals: Option<String>,
    /// Accepted values for `field_equals`
    #[serde(default)]
    pub one_of: Vec<String>,
    /// `array_contains` fails when the array itself is missing
    #[serde(default)]
    pub require_array: bool,
    /// Message recorded on failure
    #[serde(default)]
    pub error_message: Option<String>,
    /// Severity on failure
    #[serde(default)]
    pub severity: Severity,
}

/// Overrides for one connector
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectorRules {
    /// Additional required fields
    pub required_fields: Vec<String>,
    /// Additional fields whose absence is a warning
    pub optional_fields: Vec<String>,
    /// Additional field validations
    pub field_validations: Vec<FieldValidation>,
    /// Semantic assertions
    pub critical_checks: Vec<CriticalCheck>,
}

/// Rules for one operation type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationRuleSet {
    /// Paths that must be present and non-empty
    pub required_fields: Vec<String>,
    /// Paths whose absence is a warning
    pub optional_fields: Vec<String>,
    /// Field rules
    pub field_validations: Vec<FieldValidation>,
    /// Per-connector overrides
    pub connector_specific: HashMap<String, ConnectorRules>,
}

impl ValidationRuleSet {
    /// Load `{rules_dir}/{operation}.json`. A missing file yields an empty
    /// rule set.
    pub fn load(rules_dir: &Path, operation: Operation) -> Result<Self, Error> {
        let path = rules_dir.join(format!("{}.json", operation.as_str()));
        if !path.exists() {
            tracing::warn!(
                "no validation rules for {} at {}, only transport success is checked",
                operation,
                path.display()
            );
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Outcome of one validation pass, keyed by stable check identifiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Blocking failures
    pub errors: BTreeMap<String, String>,
    /// Advisory findings
    pub warnings: BTreeMap<String, String>,
}

impl ValidationReport {
    /// No blocking failures
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record a blocking failure
    pub fn error(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.errors.insert(key.into(), message.into());
    }

    /// Record an advisory finding
    pub fn warning(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.warnings.insert(key.into(), message.into());
    }

    fn record(&mut self, severity: Severity, key: String, message: String) {
        match severity {
            Severity::Error => self.error(key, message),
            Severity::Warning => self.warning(key, message),
        }
    }
}

/// Report for a body that could not be parsed: a single `parse_error` entry
pub fn parse_failure(err: &ParseError) -> ValidationReport {
    let mut report = ValidationReport::default();
    report.error(PARSE_ERROR_KEY, err.to_string());
    report
}

/// Validate a parsed response
pub fn validate(
    operation: Operation,
    response: &Value,
    connector: &str,
    rules: &ValidationRuleSet,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    check_required(&mut report, response, &rules.required_fields, "");
    check_optional(&mut report, response, &rules.optional_fields, "");
    check_fields(&mut report, response, &rules.field_validations, "");

    if let Some(overrides) = rules.connector_specific.get(connector) {
        check_required(&mut report, response, &overrides.required_fields, "connector:");
        check_optional(&mut report, response, &overrides.optional_fields, "connector:");
        check_fields(&mut report, response, &overrides.field_validations, "connector:");
        for check in &overrides.critical_checks {
            run_critical_check(&mut report, response, check);
        }
    }

    tracing::debug!(
        "{} validation for {}: {} errors, {} warnings",
        operation,
        connector,
        report.errors.len(),
        report.warnings.len()
    );
    report
}

fn present(response: &Value, path: &str) -> bool {
    lookup(response, path).is_some_and(is_non_empty)
}

fn check_required(report: &mut ValidationReport, response: &Value, fields: &[String], prefix: &str) {
    for path in fields.iter().filter(|p| !present(response, p)) {
        report.error(
            format!("{prefix}required_field:{path}"),
            format!("required field '{path}' is missing or empty"),
        );
    }
}

fn check_optional(report: &mut ValidationReport, response: &Value, fields: &[String], prefix: &str) {
    for path in fields.iter().filter(|p| !present(response, p)) {
        report.warning(
            format!("{prefix}optional_field:{path}"),
            format!("field '{path}' is missing or empty"),
        );
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Evaluate one rule. `None` means the rule does not apply (value absent and
/// the rule only constrains present values).
fn rule_holds(rule: Rule, value: Option<&Value>, allowed: &[String]) -> Option<bool> {
    match rule {
        Rule::NotEmpty => Some(value.is_some_and(is_non_empty)),
        Rule::AllowedValues => {
            let value = value.filter(|v| !v.is_null())?;
            Some(as_text(value).is_some_and(|text| allowed.iter().any(|a| *a == text)))
        }
        Rule::Numeric => {
            let value = value.filter(|v| !v.is_null())?;
            Some(as_number(value).is_some())
        }
        Rule::Positive => {
            let value = value.filter(|v| !v.is_null())?;
            Some(as_number(value).is_some_and(|n| n > 0.0))
        }
    }
}

fn check_fields(
    report: &mut ValidationReport,
    response: &Value,
    validations: &[FieldValidation],
    prefix: &str,
) {
    for validation in validations {
        let value = lookup(response, &validation.field);
        for rule in &validation.rules {
            if rule_holds(*rule, value, &validation.allowed_values) == Some(false) {
                let message = validation.error_message.clone().unwrap_or_else(|| {
                    default_rule_message(*rule, &validation.field, value, &validation.allowed_values)
                });
                report.record(
                    validation.severity,
                    format!("{prefix}field:{}:{}", validation.field, rule.as_str()),
                    message,
                );
            }
        }
    }
}

fn default_rule_message(rule: Rule, field: &str, value: Option<&Value>, allowed: &[String]) -> String {
    let shown = value.map_or_else(|| "<absent>".to_string(), |v| v.to_string());
    match rule {
        Rule::NotEmpty => format!("field '{field}' must not be empty"),
        Rule::AllowedValues => {
            format!("field '{field}' is {shown}, expected one of [{}]", allowed.join(", "))
        }
        Rule::Numeric => format!("field '{field}' is {shown}, expected a number"),
        Rule::Positive => format!("field '{field}' is {shown}, expected a positive number"),
    }
}

fn run_critical_check(report: &mut ValidationReport, response: &Value, check: &CriticalCheck) {
    let key = format!("critical:{}", check.name);
    let fail = |report: &mut ValidationReport, detail: String| {
        let message = match &check.error_message {
            Some(m) => format!("{m} ({detail})"),
            None => detail,
        };
        report.record(check.severity, key.clone(), message);
    };
    let Some(field) = check.field.as_deref() else {
        report.error(key.clone(), "malformed check: missing 'field'");
        return;
    };

    match check.check_type {
        CheckType::ArrayContains => {
            let (Some(array), Some(expected)) = (&check.array, &check.equals) else {
                report.error(key.clone(), "malformed check: array_contains needs 'array' and 'equals'");
                return;
            };
            match lookup(response, array) {
                Some(Value::Array(items)) => {
                    let found = items
                        .iter()
                        .filter_map(|item| lookup(item, field).and_then(as_text))
                        .any(|text| text == *expected);
                    if !found {
                        fail(
                            report,
                            format!(
                                "'{array}' has {} entries but none with {field} = {expected}",
                                items.len()
                            ),
                        );
                    }
                }
                Some(other) if !other.is_null() => {
                    fail(report, format!("'{array}' is not an array"));
                }
                _ if check.require_array => fail(report, format!("'{array}' is missing")),
                _ => {}
            }
        }
        CheckType::FieldEquals => {
            let actual = lookup(response, field).and_then(as_text);
            if !actual
                .as_ref()
                .is_some_and(|a| check.one_of.iter().any(|o| o == a))
            {
                fail(
                    report,
                    format!(
                        "'{field}' is {}, expected one of [{}]",
                        actual.as_deref().unwrap_or("<absent>"),
                        check.one_of.join(", ")
                    ),
                );
            }
        }
        CheckType::FieldPresent => {
            if !present(response, field) {
                fail(report, format!("'{field}' is missing or empty"));
            }
        }
        CheckType::FieldAbsent => {
            if lookup(response, field).is_some_and(|v| !v.is_null()) {
                fail(report, format!("'{field}' is present"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules(json: Value) -> ValidationRuleSet {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_required_field_detection() {
        let rules = rules(json!({"requiredFields": ["id", "status"]}));
        let report = validate(Operation::Authorize, &json!({"id": "x"}), "adyen", &rules);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors.contains_key("required_field:status"));
        assert!(report.errors["required_field:status"].contains("status"));
    }

    #[test]
    fn test_empty_string_counts_as_missing() {
        let rules = rules(json!({"requiredFields": ["transactionId.id"]}));
        let report = validate(
            Operation::Authorize,
            &json!({"transactionId": {"id": ""}}),
            "adyen",
            &rules,
        );
        assert!(!report.is_ok());
    }

    #[test]
    fn test_optional_fields_warn() {
        let rules = rules(json!({"optionalFields": ["refundId"]}));
        let report = validate(Operation::Rsync, &json!({"status": "SUCCESS"}), "adyen", &rules);
        assert!(report.is_ok());
        assert!(report.warnings.contains_key("optional_field:refundId"));
    }

    #[test]
    fn test_allowed_values_with_declared_message() {
        let rules = rules(json!({
            "fieldValidations": [{
                "field": "status",
                "rules": ["not_empty", "allowed_values"],
                "allowedValues": ["CHARGED", "AUTHORIZED"],
                "errorMessage": "authorize returned an unexpected status"
            }]
        }));
        let report = validate(Operation::Authorize, &json!({"status": "FAILURE"}), "adyen", &rules);
        assert_eq!(
            report.errors["field:status:allowed_values"],
            "authorize returned an unexpected status"
        );
        assert!(!report.errors.contains_key("field:status:not_empty"));
    }

    #[test]
    fn test_warning_severity_does_not_block() {
        let rules = rules(json!({
            "fieldValidations": [{
                "field": "amount",
                "rules": ["positive"],
                "severity": "warning"
            }]
        }));
        let report = validate(Operation::Capture, &json!({"amount": "0"}), "adyen", &rules);
        assert!(report.is_ok());
        assert!(report.warnings.contains_key("field:amount:positive"));
    }

    #[test]
    fn test_allowed_values_skips_absent_field() {
        let rules = rules(json!({
            "fieldValidations": [{"field": "status", "rules": ["allowed_values"], "allowedValues": ["A"]}]
        }));
        let report = validate(Operation::Psync, &json!({}), "adyen", &rules);
        assert!(report.is_ok());
    }

    #[test]
    fn test_connector_overrides_apply_only_to_that_connector() {
        let rules = rules(json!({
            "connectorSpecific": {
                "bambora": {"requiredFields": ["networkTxnId"]}
            }
        }));
        let body = json!({"id": "x"});
        let report = validate(Operation::Authorize, &body, "bambora", &rules);
        assert!(report.errors.contains_key("connector:required_field:networkTxnId"));
        let report = validate(Operation::Authorize, &body, "adyen", &rules);
        assert!(report.is_ok());
    }

    fn refund_rules() -> ValidationRuleSet {
        rules(json!({
            "connectorSpecific": {
                "checkout": {
                    "criticalChecks": [{
                        "name": "refund_action_recorded",
                        "type": "array_contains",
                        "array": "actions",
                        "field": "type",
                        "equals": "REFUND",
                        "errorMessage": "refund not reflected in actions"
                    }]
                }
            }
        }))
    }

    #[test]
    fn test_array_contains_rejects_non_refund_actions() {
        let body = json!({"actions": [{"type": "AUTHORIZATION"}, {"type": "CAPTURE"}]});
        let report = validate(Operation::Refund, &body, "checkout", &refund_rules());
        let message = &report.errors["critical:refund_action_recorded"];
        assert!(message.starts_with("refund not reflected in actions"));
    }

    #[test]
    fn test_array_contains_accepts_refund_action() {
        let body = json!({"actions": [{"type": "AUTHORIZATION"}, {"type": "REFUND"}]});
        let report = validate(Operation::Refund, &body, "checkout", &refund_rules());
        assert!(report.is_ok());
    }

    #[test]
    fn test_array_contains_skips_missing_array_unless_required() {
        let report = validate(Operation::Refund, &json!({}), "checkout", &refund_rules());
        assert!(report.is_ok());
    }

    #[test]
    fn test_field_equals_and_absent_checks() {
        let rules = rules(json!({
            "connectorSpecific": {
                "adyen": {
                    "criticalChecks": [
                        {"name": "charged", "type": "field_equals", "field": "status", "oneOf": ["CHARGED"]},
                        {"name": "no_error", "type": "field_absent", "field": "errorMessage"}
                    ]
                }
            }
        }));
        let body = json!({"status": "PENDING", "errorMessage": "declined"});
        let report = validate(Operation::Authorize, &body, "adyen", &rules);
        assert!(report.errors.contains_key("critical:charged"));
        assert!(report.errors.contains_key("critical:no_error"));
    }

    #[test]
    fn test_malformed_check_is_an_error_entry() {
        let rules = rules(json!({
            "connectorSpecific": {
                "adyen": {"criticalChecks": [{"name": "broken", "type": "array_contains", "field": "type"}]}
            }
        }));
        let report = validate(Operation::Refund, &json!({}), "adyen", &rules);
        assert!(report.errors["critical:broken"].contains("malformed"));
    }

    #[test]
    fn test_non_json_body_is_parse_error() {
        let err = crate::response::parse_response("<html>502</html>").unwrap_err();
        let report = parse_failure(&err);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors.contains_key(PARSE_ERROR_KEY));
    }

    #[test]
    fn test_load_missing_rules_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rules = ValidationRuleSet::load(dir.path(), Operation::Void).unwrap();
        assert!(rules.required_fields.is_empty());
    }

    #[test]
    fn test_load_rules_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("capture.json"),
            r#"{"requiredFields": ["status"]}"#,
        )
        .unwrap();
        let rules = ValidationRuleSet::load(dir.path(), Operation::Capture).unwrap();
        assert_eq!(rules.required_fields, vec!["status"]);
    }
}

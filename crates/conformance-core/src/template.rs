//! Request templates
//!
//! Templates are JSON documents with `{{NAME}}` placeholders. Rendering is
//! all-or-nothing: every placeholder must have a value in the
//! [`TemplateContext`], values are JSON-escaped, and the result must parse
//! as JSON.
//!
//! Substitution is a single pass over the parsed template, so a value that
//! itself looks like `{{OTHER}}` is emitted literally and never re-expanded.

use minijinja::{Environment, ErrorKind, Output, State, UndefinedBehavior, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::ConnectorConfig;
use crate::error::TemplateError;

/// Key/value store threaded through one flow execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TemplateContext {
    values: BTreeMap<String, String>,
}

impl TemplateContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a context from a resolved connector config plus generated values.
    ///
    /// `timestamp` is unix seconds; it also makes `ORDER_ID` unique per run.
    pub fn seed(config: &ConnectorConfig, timestamp: i64) -> Self {
        let mut ctx = Self::new();
        let card = &config.card;
        let billing = &config.billing_address;
        let amounts = &config.amounts;

        let order_suffix = uuid::Uuid::new_v4().simple().to_string();
        let order_id = format!("ord_{timestamp}_{}", &order_suffix[..8]);
        let entries = [
            ("CONNECTOR", config.name.clone()),
            ("AMOUNT", amounts.authorize.to_string()),
            ("AUTHORIZE_AMOUNT", amounts.authorize.to_string()),
            ("CAPTURE_AMOUNT", amounts.capture.to_string()),
            ("REFUND_AMOUNT", amounts.refund.to_string()),
            ("CURRENCY", config.currency.clone()),
            ("CARD_NUMBER", card.number.clone()),
            ("CARD_CVC", card.cvc.clone()),
            ("CARD_EXP_MONTH", card.exp_month.clone()),
            ("CARD_EXP_YEAR", card.exp_year.clone()),
            ("CARD_NETWORK", card.network.clone()),
            ("CARD_HOLDER_NAME", card.holder_name.clone()),
            ("BILLING_FIRST_NAME", billing.first_name.clone()),
            ("BILLING_LAST_NAME", billing.last_name.clone()),
            ("BILLING_LINE1", billing.line1.clone()),
            ("BILLING_LINE2", billing.line2.clone()),
            ("BILLING_CITY", billing.city.clone()),
            ("BILLING_STATE", billing.state.clone()),
            ("BILLING_ZIP", billing.zip.clone()),
            ("BILLING_COUNTRY", billing.country.clone()),
            ("BILLING_EMAIL", billing.email.clone()),
            ("BILLING_PHONE", billing.phone.clone()),
            ("EMAIL", billing.email.clone()),
            ("RETURN_URL", config.return_url.clone()),
            ("WEBHOOK_URL", config.webhook_url.clone()),
            ("TIMESTAMP", timestamp.to_string()),
            ("MERCHANT_ORDER_ID", order_id.clone()),
            ("ORDER_ID", order_id),
        ];
        for (key, value) in entries {
            ctx.insert(key, value);
        }
        ctx
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Get an entry
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Whether an entry is present
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Whether an entry is present with a non-empty value
    pub fn has_value(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_empty())
    }
}

/// Escape string values so they can sit inside a JSON string literal
fn json_escape_formatter(
    out: &mut Output<'_>,
    _state: &State<'_, '_>,
    value: &Value,
) -> Result<(), minijinja::Error> {
    let text = match value.as_str() {
        Some(s) => {
            let quoted = serde_json::to_string(s)
                .map_err(|e| minijinja::Error::new(ErrorKind::BadSerialization, e.to_string()))?;
            quoted[1..quoted.len() - 1].to_string()
        }
        None => value.to_string(),
    };
    out.write_str(&text)
        .map_err(|_| minijinja::Error::new(ErrorKind::WriteFailure, "failed to write output"))
}

/// Render template text against a context
pub fn render(template: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env.set_formatter(json_escape_formatter);

    let tmpl = env.template_from_str(template)?;

    let mut missing: Vec<String> = tmpl
        .undeclared_variables(false)
        .into_iter()
        .filter(|name| !ctx.contains(name))
        .collect();
    if !missing.is_empty() {
        missing.sort();
        return Err(TemplateError::Unresolved { missing });
    }

    let rendered = tmpl.render(ctx)?;
    serde_json::from_str::<serde_json::Value>(&rendered).map_err(TemplateError::InvalidJson)?;
    Ok(rendered)
}

/// Read a template file and render it
pub fn render_file(path: &Path, ctx: &TemplateContext) -> Result<String, TemplateError> {
    let template = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
        path: path.display().to_string(),
        source,
    })?;
    render(&template, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(entries: &[(&str, &str)]) -> TemplateContext {
        let mut ctx = TemplateContext::new();
        for (k, v) in entries {
            ctx.insert(*k, *v);
        }
        ctx
    }

    #[test]
    fn test_render_complete_context() {
        let template = r#"{"amount": {{AMOUNT}}, "currency": "{{CURRENCY}}", "ref": "{{REFERENCE_ID}}"}"#;
        let rendered = render(
            template,
            &ctx(&[("AMOUNT", "5000"), ("CURRENCY", "USD"), ("REFERENCE_ID", "r-1")]),
        )
        .unwrap();
        assert!(!rendered.contains("{{"));
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["amount"], 5000);
        assert_eq!(value["currency"], "USD");
    }

    #[test]
    fn test_render_lists_all_missing_placeholders() {
        let template = r#"{"a": "{{ZED}}", "b": "{{ALPHA}}", "c": "{{PRESENT}}"}"#;
        let err = render(template, &ctx(&[("PRESENT", "x")])).unwrap_err();
        match err {
            TemplateError::Unresolved { missing } => {
                assert_eq!(missing, vec!["ALPHA".to_string(), "ZED".to_string()]);
            }
            other => panic!("Expected unresolved placeholders, got {other:?}"),
        }
    }

    #[test]
    fn test_render_escapes_json_string_characters() {
        let template = r#"{"name": "{{NAME}}"}"#;
        let rendered = render(template, &ctx(&[("NAME", "O\"Brien \\ line\nbreak")])).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["name"], "O\"Brien \\ line\nbreak");
    }

    #[test]
    fn test_render_does_not_reexpand_values() {
        let template = r#"{"a": "{{A}}", "b": "{{B}}"}"#;
        let rendered = render(template, &ctx(&[("A", "{{B}}"), ("B", "{{A}}")])).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["a"], "{{B}}");
        assert_eq!(value["b"], "{{A}}");
    }

    #[test]
    fn test_render_rejects_invalid_json() {
        let template = r#"{"amount": {{AMOUNT}}"#;
        let err = render(template, &ctx(&[("AMOUNT", "1")])).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidJson(_)));
    }

    #[test]
    fn test_render_file_missing() {
        let err = render_file(Path::new("/nonexistent/t.json.template"), &TemplateContext::new())
            .unwrap_err();
        assert!(matches!(err, TemplateError::Read { .. }));
    }

    #[test]
    fn test_has_value_treats_empty_as_absent() {
        let ctx = ctx(&[("TRANSACTION_ID", "")]);
        assert!(ctx.contains("TRANSACTION_ID"));
        assert!(!ctx.has_value("TRANSACTION_ID"));
    }
}

//! The templates, rules, configs and flows shipped with the repository

use conformance_core::flow::{BUILTIN_FLOWS, REFERENCE_ID, REFUND_ID, TRANSACTION_ID};
use conformance_core::template::render_file;
use conformance_core::{
    ConnectorConfig, EnvSource, FlowDefinition, Operation, TemplateContext, ValidationRuleSet,
};
use rstest::rstest;
use std::path::PathBuf;

fn repo_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn example_config() -> ConnectorConfig {
    let env = EnvSource::from_vars([("EXAMPLE_API_KEY", "sk_test"), ("EXAMPLE_KEY1", "merchant")]);
    ConnectorConfig::load("example", repo_root().join("configs/example.json"), &env).unwrap()
}

#[rstest]
#[case(Operation::Authorize)]
#[case(Operation::Capture)]
#[case(Operation::Refund)]
#[case(Operation::Void)]
#[case(Operation::Psync)]
#[case(Operation::Rsync)]
fn test_shipped_template_renders(#[case] operation: Operation) {
    let mut ctx = TemplateContext::seed(&example_config(), 1_700_000_000);
    ctx.insert(REFERENCE_ID, "ref-1");
    ctx.insert("CAPTURE_METHOD", "AUTOMATIC");
    ctx.insert(TRANSACTION_ID, "tx_1");
    ctx.insert(REFUND_ID, "refund_1");

    let path = repo_root().join("templates").join(operation.template_file());
    let rendered = render_file(&path, &ctx).unwrap();
    assert!(!rendered.contains("{{"));
}

#[rstest]
#[case(Operation::Authorize)]
#[case(Operation::Capture)]
#[case(Operation::Refund)]
#[case(Operation::Void)]
#[case(Operation::Psync)]
#[case(Operation::Rsync)]
fn test_shipped_rules_parse(#[case] operation: Operation) {
    let rules = ValidationRuleSet::load(&repo_root().join("validation/rules"), operation).unwrap();
    assert!(!rules.required_fields.is_empty());
}

#[test]
fn test_example_config_defaults() {
    let config = example_config();
    assert_eq!(config.currency, "USD");
    assert_eq!(config.amounts.authorize, 1000);
    assert_eq!(config.card.number, "4111111111111111");
}

#[test]
fn test_shipped_flows_resolve() {
    let flows_dir = repo_root().join("flows");
    for name in BUILTIN_FLOWS {
        FlowDefinition::resolve(name, &flows_dir).unwrap();
    }
    let custom = FlowDefinition::resolve("auth-capture-refund", &flows_dir).unwrap();
    assert_eq!(custom.steps.len(), 4);
    assert!(custom.steps[3].optional);
}

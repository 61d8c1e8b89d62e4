//! Flow definitions
//!
//! A flow is an ordered list of operation steps simulating one payment
//! lifecycle. Steps pass identifiers forward through the template context:
//! a step `produces` keys extracted from its response and later steps
//! `requires` them before any call is attempted.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;

use crate::error::{ConfigError, Error, Result};
use crate::report::{SUMMARY_FILE, artifact_file_name};
use crate::response::SemanticField;

/// Context key holding the connector transaction id
pub const TRANSACTION_ID: &str = "TRANSACTION_ID";
/// Context key holding the connector refund id
pub const REFUND_ID: &str = "REFUND_ID";
/// Context key selecting automatic or manual capture
pub const CAPTURE_METHOD: &str = "CAPTURE_METHOD";
/// Context key regenerated before every step
pub const REFERENCE_ID: &str = "REFERENCE_ID";

/// Names of the flows available without a flow file
pub const BUILTIN_FLOWS: [&str; 4] = ["auth-psync", "auth-capture", "auth-refund-rsync", "auth-void"];

/// One RPC invocation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Authorize (and optionally capture) a payment
    Authorize,
    /// Capture an authorized payment
    Capture,
    /// Refund a captured payment
    Refund,
    /// Void an authorization
    Void,
    /// Payment status sync
    Psync,
    /// Refund status sync
    Rsync,
}

impl Operation {
    /// Lowercase name, used for template, rule and artifact file names
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::Capture => "capture",
            Self::Refund => "refund",
            Self::Void => "void",
            Self::Psync => "psync",
            Self::Rsync => "rsync",
        }
    }

    /// Fully-qualified RPC method on the connector service
    pub fn default_method(&self) -> &'static str {
        match self {
            Self::Authorize => "ucs.v2.PaymentService/Authorize",
            Self::Capture => "ucs.v2.PaymentService/Capture",
            Self::Refund => "ucs.v2.PaymentService/Refund",
            Self::Void => "ucs.v2.PaymentService/Void",
            Self::Psync => "ucs.v2.PaymentService/Get",
            Self::Rsync => "ucs.v2.RefundService/Get",
        }
    }

    /// Default template file name
    pub fn template_file(&self) -> String {
        format!("{}.json.template", self.as_str())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A step within a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStep {
    /// Step name; defaults to the operation name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Operation to invoke
    pub operation: Operation,

    /// Context keys that must be present and non-empty before the call
    #[serde(default)]
    pub requires: Vec<String>,

    /// Context keys filled from the response on success
    #[serde(default)]
    pub produces: BTreeMap<String, SemanticField>,

    /// Static context entries applied before rendering
    #[serde(default)]
    pub set: BTreeMap<String, String>,

    /// Transport failure on this step does not abort the flow
    #[serde(default)]
    pub optional: bool,

    /// Template file override, relative to the templates directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl FlowStep {
    /// Create a step for `operation` with no dependencies
    pub fn new(operation: Operation) -> Self {
        Self {
            name: None,
            operation,
            requires: Vec::new(),
            produces: BTreeMap::new(),
            set: BTreeMap::new(),
            optional: false,
            template: None,
        }
    }

    /// Require a context key
    pub fn requires(mut self, key: &str) -> Self {
        self.requires.push(key.to_string());
        self
    }

    /// Produce a context key from a response field
    pub fn produces(mut self, key: &str, field: SemanticField) -> Self {
        self.produces.insert(key.to_string(), field);
        self
    }

    /// Set a static context entry
    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.set.insert(key.to_string(), value.to_string());
        self
    }

    /// Step name: explicit name or the operation name
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.operation.as_str())
    }

    /// Template file name
    pub fn template_file(&self) -> String {
        self.template
            .clone()
            .unwrap_or_else(|| self.operation.template_file())
    }
}

/// A named, ordered sequence of steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Flow name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Steps, executed in order
    pub steps: Vec<FlowStep>,
}

impl FlowDefinition {
    /// Look up a built-in flow
    pub fn builtin(name: &str) -> Option<Self> {
        let authorize = |capture: &str| {
            FlowStep::new(Operation::Authorize)
                .set(CAPTURE_METHOD, capture)
                .produces(TRANSACTION_ID, SemanticField::Identifier)
        };
        let (description, steps) = match name {
            "auth-psync" => (
                "Authorize with automatic capture, then sync payment status",
                vec![
                    authorize("AUTOMATIC"),
                    FlowStep::new(Operation::Psync).requires(TRANSACTION_ID),
                ],
            ),
            "auth-capture" => (
                "Authorize with manual capture, capture, then sync payment status",
                vec![
                    authorize("MANUAL"),
                    FlowStep::new(Operation::Capture).requires(TRANSACTION_ID),
                    FlowStep::new(Operation::Psync).requires(TRANSACTION_ID),
                ],
            ),
            "auth-refund-rsync" => (
                "Authorize with automatic capture, refund, then sync refund status",
                vec![
                    authorize("AUTOMATIC"),
                    FlowStep::new(Operation::Refund)
                        .requires(TRANSACTION_ID)
                        .produces(REFUND_ID, SemanticField::RefundIdentifier),
                    FlowStep::new(Operation::Rsync)
                        .requires(TRANSACTION_ID)
                        .requires(REFUND_ID),
                ],
            ),
            "auth-void" => (
                "Authorize with manual capture, then void",
                vec![
                    authorize("MANUAL"),
                    FlowStep::new(Operation::Void).requires(TRANSACTION_ID),
                ],
            ),
            _ => return None,
        };
        Some(Self {
            name: name.to_string(),
            description: Some(description.to_string()),
            steps,
        })
    }

    /// Resolve a flow by name: built-ins first, then `{flows_dir}/{name}.yaml`
    pub fn resolve(name: &str, flows_dir: &Path) -> Result<Self> {
        if let Some(flow) = Self::builtin(name) {
            return Ok(flow);
        }

        let path = ["yaml", "yml"]
            .iter()
            .map(|ext| flows_dir.join(format!("{name}.{ext}")))
            .find(|p| p.exists())
            .ok_or_else(|| ConfigError::UnknownFlow {
                name: name.to_string(),
                available: BUILTIN_FLOWS.join(", "),
            })?;

        tracing::debug!("loading flow '{}' from {}", name, path.display());
        let contents = std::fs::read_to_string(&path)?;
        let flow: FlowDefinition = serde_yaml::from_str(&contents)?;
        flow.validate()?;
        Ok(flow)
    }

    /// Check structural invariants: at least one step, unique step names that
    /// map to distinct artifact files other than `summary.json`, and no step
    /// requiring a key that only a later step produces.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Error::InvalidFlow {
            flow_name: self.name.clone(),
            message,
        };

        if self.steps.is_empty() {
            return Err(invalid("flow has no steps".to_string()));
        }

        let mut names = HashSet::new();
        // Keyed case-insensitively: artifact names must not collide on
        // case-folding filesystems either.
        let mut artifacts: HashMap<String, &str> = HashMap::new();
        for step in &self.steps {
            if !names.insert(step.name()) {
                return Err(invalid(format!("duplicate step name '{}'", step.name())));
            }
            let file = artifact_file_name(step.name()).to_ascii_lowercase();
            if file == SUMMARY_FILE {
                return Err(invalid(format!(
                    "step name '{}' is reserved for the run summary",
                    step.name()
                )));
            }
            if let Some(other) = artifacts.insert(file.clone(), step.name()) {
                return Err(invalid(format!(
                    "steps '{}' and '{}' would both write {}",
                    other,
                    step.name(),
                    file
                )));
            }
        }

        let mut produced = HashSet::new();
        for (idx, step) in self.steps.iter().enumerate() {
            for key in &step.requires {
                let produced_later = self.steps[idx..]
                    .iter()
                    .any(|s| s.produces.contains_key(key));
                if produced_later && !produced.contains(key.as_str()) {
                    return Err(invalid(format!(
                        "step '{}' requires '{}' before any step produces it",
                        step.name(),
                        key
                    )));
                }
            }
            produced.extend(step.produces.keys().map(String::as_str));
        }
        Ok(())
    }

    /// Whether any step after `index` requires `key`
    pub fn required_after(&self, index: usize, key: &str) -> Option<&FlowStep> {
        self.steps
            .iter()
            .skip(index + 1)
            .find(|s| s.requires.iter().any(|k| k == key))
    }
}

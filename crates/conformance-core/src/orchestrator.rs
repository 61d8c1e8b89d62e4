//! Flow orchestration
//!
//! [`run_flow`] drives one flow invocation through
//! `Pending → Running(step) → {Succeeded, Failed}`. Each step checks its
//! required context keys, renders its template, calls the transport,
//! persists the raw response, validates it and threads the identifiers it
//! produces into the context for later steps.
//!
//! Flow failures are data: they end up in the returned [`FlowOutcome`] and in
//! `summary.json`, which is written on every path once the run directory
//! exists.

use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

use crate::auth::{build_headers, redact_headers};
use crate::config::{ConnectorConfig, EnvSource};
use crate::error::{Result, TransportError};
use crate::flow::{FlowDefinition, FlowStep, REFERENCE_ID};
use crate::report::{FlowSummary, RunReporter, StepRecord};
use crate::response::{SemanticField, parse_response};
use crate::template::{self, TemplateContext};
use crate::transport::{self, RpcCall, Transport};
use crate::validation::{self, ValidationReport, ValidationRuleSet};

/// Failure reason recorded when the run is cancelled
pub const INTERRUPTED: &str = "interrupted";

/// Everything needed to locate the inputs and outputs of one run
#[derive(Debug, Clone)]
pub struct FlowRequest {
    /// Repository root holding `configs/`, `templates/`, `validation/` and `flows/`
    pub root: PathBuf,
    /// Connector name
    pub connector: String,
    /// Flow name
    pub flow: String,
    /// Connector config override; defaults to `{root}/configs/{connector}.json`
    pub config_path: Option<PathBuf>,
    /// Env file override; defaults to `{root}/.env`
    pub env_file: Option<PathBuf>,
    /// Output root override; defaults to `{root}/output`
    pub output_dir: Option<PathBuf>,
    /// Per-call timeout override
    pub timeout: Option<Duration>,
    /// Variables to resolve against instead of the process environment
    pub env: Option<EnvSource>,
}

impl FlowRequest {
    /// Request with every path derived from `root`
    pub fn new(root: impl Into<PathBuf>, connector: impl Into<String>, flow: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            connector: connector.into(),
            flow: flow.into(),
            config_path: None,
            env_file: None,
            output_dir: None,
            timeout: None,
            env: None,
        }
    }

    /// Resolve against `env` rather than a snapshot of the process environment
    pub fn with_env(mut self, env: EnvSource) -> Self {
        self.env = Some(env);
        self
    }

    /// Connector config file
    pub fn config_path(&self) -> PathBuf {
        self.config_path.clone().unwrap_or_else(|| {
            self.root
                .join("configs")
                .join(format!("{}.json", self.connector))
        })
    }

    /// `.env` file
    pub fn env_file(&self) -> PathBuf {
        self.env_file
            .clone()
            .unwrap_or_else(|| self.root.join(".env"))
    }

    /// Root under which run directories are created
    pub fn output_root(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.root.join("output"))
    }

    /// Request template directory
    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("templates")
    }

    /// Validation rule directory
    pub fn rules_dir(&self) -> PathBuf {
        self.root.join("validation").join("rules")
    }

    /// Custom flow directory
    pub fn flows_dir(&self) -> PathBuf {
        self.root.join("flows")
    }
}

/// Terminal status of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStatus {
    /// Every step passed
    #[serde(rename = "SUCCESS")]
    Success,
    /// A step, or the pre-flight, failed
    #[serde(rename = "FAILURE")]
    Failure,
}

impl FlowStatus {
    /// Whether the flow succeeded
    pub fn is_success(&self) -> bool {
        *self == FlowStatus::Success
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowStatus::Success => f.write_str("SUCCESS"),
            FlowStatus::Failure => f.write_str("FAILURE"),
        }
    }
}

/// Result of [`run_flow`]
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    /// Terminal status
    pub status: FlowStatus,
    /// Run directory holding the artifacts
    pub output_dir: PathBuf,
    /// What was written to `summary.json`
    pub summary: FlowSummary,
}

/// Confirms each transition in interactive mode
#[async_trait]
pub trait Operator: Send {
    /// Called after `completed` finished and before `next` starts. `passed`
    /// is false when `completed` was an optional step that failed.
    /// Returning `false` aborts the flow.
    async fn confirm(&mut self, completed: &str, passed: bool, next: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FlowState {
    Pending,
    Running(usize),
    Succeeded,
    Failed,
}

/// Why a step stopped the flow
#[derive(Debug)]
enum StepVerdict {
    Continue,
    Abort(String),
}

/// Mutable state of one invocation
struct FlowRun<'a> {
    request: &'a FlowRequest,
    reporter: RunReporter,
    state: FlowState,
    results: BTreeMap<String, StepRecord>,
    failed_step: Option<String>,
    error: Option<String>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Run one flow to completion.
///
/// `operator` enables interactive mode. `cancel` flips to `true` on an
/// operator interrupt; the in-flight call is abandoned and the flow fails
/// with reason `interrupted`.
///
/// Returns `Err` only when the run directory cannot be created.
pub async fn run_flow<T: Transport + ?Sized>(
    request: &FlowRequest,
    transport: &T,
    mut operator: Option<&mut dyn Operator>,
    cancel: Option<watch::Receiver<bool>>,
) -> Result<FlowOutcome> {
    let started = Local::now();
    let reporter = RunReporter::create(&request.output_root(), &request.connector, started)?;
    let mut run = FlowRun {
        request,
        reporter,
        state: FlowState::Pending,
        results: BTreeMap::new(),
        failed_step: None,
        error: None,
        cancel,
    };
    run.reporter.info(&format!(
        "starting flow '{}' for connector '{}'",
        request.flow, request.connector
    ));

    let (flow, config) = match prepare(request) {
        Ok(prepared) => prepared,
        Err(e) => {
            run.fail(None, e.to_string());
            return Ok(run.finish());
        }
    };
    run.reporter.info(&format!(
        "{} step(s) against {} ({} auth)",
        flow.steps.len(),
        config.address,
        config.auth.kind().id()
    ));

    let mut ctx = TemplateContext::seed(&config, started.timestamp());

    for (index, step) in flow.steps.iter().enumerate() {
        if run.is_cancelled() {
            run.fail(Some(step.name()), INTERRUPTED.to_string());
            break;
        }
        run.transition(FlowState::Running(index));

        if let StepVerdict::Abort(reason) = run
            .execute_step(&flow, index, &config, &mut ctx, transport)
            .await
        {
            run.fail(Some(step.name()), reason);
            break;
        }

        let Some(next) = flow.steps.get(index + 1) else {
            continue;
        };
        if let Some(op) = operator.as_deref_mut() {
            let passed = run.results.get(step.name()).is_some_and(|r| r.success);
            match run.confirm(op, step.name(), passed, next.name()).await {
                StepVerdict::Continue => {}
                StepVerdict::Abort(reason) => {
                    run.fail(Some(next.name()), reason);
                    break;
                }
            }
        }
    }

    if run.state != FlowState::Failed {
        run.transition(FlowState::Succeeded);
    }
    Ok(run.finish())
}

/// Pre-flight: resolve the flow, then the connector config. No remote call
/// is made if either fails.
fn prepare(request: &FlowRequest) -> Result<(FlowDefinition, ConnectorConfig)> {
    let flow = FlowDefinition::resolve(&request.flow, &request.flows_dir())?;

    let env = request
        .env
        .clone()
        .unwrap_or_else(EnvSource::from_process)
        .with_dotenv_file(request.env_file())?;
    let mut config = ConnectorConfig::load(&request.connector, request.config_path(), &env)?;
    if let Some(timeout) = request.timeout {
        config.timeout = timeout;
    }
    Ok((flow, config))
}

impl FlowRun<'_> {
    fn transition(&mut self, next: FlowState) {
        tracing::debug!("flow state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn fail(&mut self, step: Option<&str>, reason: String) {
        match step {
            Some(name) => self.reporter.error(&format!("step '{name}' failed: {reason}")),
            None => self.reporter.error(&reason),
        }
        self.failed_step = step.map(str::to_string);
        self.error = Some(reason);
        self.transition(FlowState::Failed);
    }

    async fn confirm(
        &mut self,
        operator: &mut dyn Operator,
        completed: &str,
        passed: bool,
        next: &str,
    ) -> StepVerdict {
        let confirmed = match self.cancel.as_mut() {
            Some(rx) => tokio::select! {
                confirmed = operator.confirm(completed, passed, next) => confirmed,
                _ = transport::cancelled(rx) => return StepVerdict::Abort(INTERRUPTED.to_string()),
            },
            None => operator.confirm(completed, passed, next).await,
        };
        if confirmed {
            StepVerdict::Continue
        } else {
            StepVerdict::Abort("aborted by operator".to_string())
        }
    }

    async fn execute_step<T: Transport + ?Sized>(
        &mut self,
        flow: &FlowDefinition,
        index: usize,
        config: &ConnectorConfig,
        ctx: &mut TemplateContext,
        transport: &T,
    ) -> StepVerdict {
        let step = &flow.steps[index];
        let name = step.name().to_string();
        self.reporter
            .info(&format!("step {}/{}: {}", index + 1, flow.steps.len(), name));

        let missing: Vec<&str> = step
            .requires
            .iter()
            .filter(|key| !ctx.has_value(key))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            let mut record = StepRecord::default();
            for key in &missing {
                record
                    .errors
                    .insert(format!("requires:{key}"), format!("no value for {key} in context"));
            }
            self.results.insert(name, record);
            return StepVerdict::Abort(format!(
                "missing required context value(s): {}",
                missing.join(", ")
            ));
        }

        let reference_id = uuid::Uuid::new_v4().to_string();
        ctx.insert(REFERENCE_ID, reference_id.clone());
        for (key, value) in &step.set {
            ctx.insert(key.clone(), value.clone());
        }

        let template_path = self.request.templates_dir().join(step.template_file());
        let body = match template::render_file(&template_path, ctx) {
            Ok(body) => body,
            Err(e) => {
                let mut record = StepRecord::default();
                record.errors.insert("template".to_string(), e.to_string());
                self.results.insert(name, record);
                return StepVerdict::Abort(e.to_string());
            }
        };

        let headers = build_headers(&config.auth, &config.name, &reference_id, &config.headers);
        let call = RpcCall {
            address: config.address.clone(),
            tls: config.tls,
            method: config.method_for(step.operation),
            headers,
            body,
            timeout: config.timeout,
        };
        tracing::debug!("{} -> {} {}", name, call.address, call.method);
        tracing::debug!("headers: {:?}", redact_headers(&call.headers));
        tracing::debug!("request body: {}", call.body);

        let response = transport::execute(transport, &call, self.cancel.as_mut()).await;
        match response {
            Ok(body) => self.complete_step(flow, index, config, ctx, &body),
            Err(e) => self.record_transport_failure(step, e),
        }
    }

    fn record_transport_failure(&mut self, step: &FlowStep, err: TransportError) -> StepVerdict {
        let name = step.name().to_string();
        let body = serde_json::json!({ "error": err.to_string(), "kind": err.kind() });
        let mut record = StepRecord::default();
        match self.reporter.write_artifact(&name, &body.to_string()) {
            Ok(path) => record.artifact = Some(path.display().to_string()),
            Err(e) => self.reporter.error(&format!("could not write artifact for '{name}': {e}")),
        }

        if matches!(err, TransportError::Interrupted { .. }) {
            record.errors.insert("transport".to_string(), err.to_string());
            self.results.insert(name, record);
            return StepVerdict::Abort(INTERRUPTED.to_string());
        }

        if step.optional {
            self.reporter
                .warn(&format!("optional step '{name}' failed, continuing: {err}"));
            record.warnings.insert("transport".to_string(), err.to_string());
            self.results.insert(name, record);
            return StepVerdict::Continue;
        }

        record.errors.insert("transport".to_string(), err.to_string());
        self.results.insert(name, record);
        StepVerdict::Abort(err.to_string())
    }

    fn complete_step(
        &mut self,
        flow: &FlowDefinition,
        index: usize,
        config: &ConnectorConfig,
        ctx: &mut TemplateContext,
        body: &str,
    ) -> StepVerdict {
        let step = &flow.steps[index];
        let name = step.name().to_string();
        let mut record = StepRecord::default();

        match self.reporter.write_artifact(&name, body) {
            Ok(path) => record.artifact = Some(path.display().to_string()),
            Err(e) => {
                record.errors.insert("artifact".to_string(), e.to_string());
                self.results.insert(name, record);
                return StepVerdict::Abort(e.to_string());
            }
        }

        let report = match parse_response(body) {
            Ok(parsed) => {
                record.summary = parsed.summary.clone();
                let mut report = match ValidationRuleSet::load(&self.request.rules_dir(), step.operation) {
                    Ok(rules) => validation::validate(step.operation, &parsed.raw, &config.name, &rules),
                    Err(e) => {
                        let mut report = ValidationReport::default();
                        report.error("rules", e.to_string());
                        report
                    }
                };
                for (key, field) in &step.produces {
                    match parsed.extract(*field) {
                        Some(value) => {
                            tracing::debug!("{} = {}", key, value);
                            if *field == SemanticField::RefundIdentifier {
                                record.summary.refund_id = Some(value.clone());
                            }
                            ctx.insert(key.clone(), value);
                        }
                        None => match flow.required_after(index, key) {
                            Some(later) => report.error(
                                format!("produces:{key}"),
                                format!("no {field:?} in response, required by step '{}'", later.name()),
                            ),
                            None => report.warning(
                                format!("produces:{key}"),
                                format!("no {field:?} in response"),
                            ),
                        },
                    }
                }
                report
            }
            Err(e) => validation::parse_failure(&e),
        };

        self.log_report(&name, &report);
        record.success = report.is_ok();
        record.errors.extend(report.errors);
        record.warnings.extend(report.warnings);
        let success = record.success;
        let error_count = record.errors.len();
        self.results.insert(name.clone(), record);

        if success {
            self.reporter.info(&format!("step '{name}' passed"));
            StepVerdict::Continue
        } else {
            StepVerdict::Abort(format!("validation failed with {error_count} error(s)"))
        }
    }

    fn log_report(&mut self, step: &str, report: &ValidationReport) {
        for (key, message) in &report.warnings {
            self.reporter.warn(&format!("{step}: {key}: {message}"));
        }
        for (key, message) in &report.errors {
            self.reporter.error(&format!("{step}: {key}: {message}"));
        }
    }

    fn finish(mut self) -> FlowOutcome {
        let mut status = match self.state {
            FlowState::Succeeded => FlowStatus::Success,
            _ => FlowStatus::Failure,
        };
        let output_dir = self.reporter.dir().to_path_buf();
        let mut summary = FlowSummary {
            flow: self.request.flow.clone(),
            connector: self.request.connector.clone(),
            status,
            timestamp: Local::now().to_rfc3339(),
            output_dir: output_dir.display().to_string(),
            failed_step: self.failed_step.take(),
            error: self.error.take(),
            results: std::mem::take(&mut self.results),
        };

        if let Err(e) = self.reporter.write_summary(&summary) {
            self.reporter.error(&format!("could not write summary: {e}"));
            status = FlowStatus::Failure;
            summary.status = status;
        }
        self.reporter.info(&format!(
            "flow '{}' finished: {} ({})",
            summary.flow,
            status,
            output_dir.display()
        ));

        FlowOutcome {
            status,
            output_dir,
            summary,
        }
    }
}

impl From<FlowStatus> for std::process::ExitCode {
    fn from(status: FlowStatus) -> Self {
        match status {
            FlowStatus::Success => std::process::ExitCode::SUCCESS,
            FlowStatus::Failure => std::process::ExitCode::FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_paths_default_to_root() {
        let request = FlowRequest::new("/repo", "bambora", "auth-psync");
        assert_eq!(request.config_path(), PathBuf::from("/repo/configs/bambora.json"));
        assert_eq!(request.env_file(), PathBuf::from("/repo/.env"));
        assert_eq!(request.output_root(), PathBuf::from("/repo/output"));
        assert_eq!(request.rules_dir(), PathBuf::from("/repo/validation/rules"));
    }

    #[test]
    fn test_request_overrides() {
        let mut request = FlowRequest::new("/repo", "bambora", "auth-psync");
        request.config_path = Some(PathBuf::from("/etc/bambora.json"));
        request.output_dir = Some(PathBuf::from("/tmp/out"));
        assert_eq!(request.config_path(), PathBuf::from("/etc/bambora.json"));
        assert_eq!(request.output_root(), PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(FlowStatus::Success.to_string(), "SUCCESS");
        assert_eq!(FlowStatus::Failure.to_string(), "FAILURE");
        assert_eq!(serde_json::to_string(&FlowStatus::Failure).unwrap(), "\"FAILURE\"");
    }
}

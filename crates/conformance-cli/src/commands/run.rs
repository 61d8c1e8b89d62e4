//! Run a conformance flow

use anyhow::{Context, Result};
use async_trait::async_trait;
use conformance_core::{FlowRequest, FlowStatus, GrpcurlTransport, Operator, run_flow};
use std::io::{BufRead, Write};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::Cli;

/// Run one flow and report its terminal status
pub async fn run(cli: Cli) -> Result<FlowStatus> {
    let mut request = FlowRequest::new(&cli.root, &cli.connector, &cli.flow);
    request.config_path = cli.config;
    request.env_file = cli.env_file;
    request.output_dir = cli.output_dir;
    request.timeout = cli.timeout.map(Duration::from_secs);

    tracing::info!(
        "Running flow '{}' for connector '{}'",
        request.flow,
        request.connector
    );

    let transport = GrpcurlTransport::new(cli.grpcurl);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received interrupt, abandoning the current step");
            let _ = cancel_tx.send(true);
        }
    });

    let mut prompt = cli.interactive.then(StdinOperator::spawn);
    let operator = prompt.as_mut().map(|p| p as &mut dyn Operator);

    let outcome = run_flow(&request, &transport, operator, Some(cancel_rx))
        .await
        .context("Failed to create run directory")?;
    interrupt.abort();

    match (&outcome.summary.failed_step, &outcome.summary.error) {
        (Some(step), Some(error)) => tracing::error!("Step '{}' failed: {}", step, error),
        (None, Some(error)) => tracing::error!("{}", error),
        _ => {}
    }
    if outcome.status.is_success() {
        tracing::info!("Flow status: {}", outcome.status);
    } else {
        tracing::warn!("Flow status: {}", outcome.status);
    }
    tracing::info!("Artifacts written to {}", outcome.output_dir.display());

    Ok(outcome.status)
}

/// Interactive confirmation on stdin.
///
/// Lines are read on a dedicated thread so a pending prompt never holds up
/// runtime shutdown after an interrupt.
struct StdinOperator {
    lines: mpsc::UnboundedReceiver<String>,
}

impl StdinOperator {
    fn spawn() -> Self {
        let (tx, lines) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self { lines }
    }
}

#[async_trait]
impl Operator for StdinOperator {
    async fn confirm(&mut self, completed: &str, passed: bool, next: &str) -> bool {
        print!("{}", prompt(completed, passed, next));
        let _ = std::io::stdout().flush();
        match self.lines.recv().await {
            Some(answer) => proceed(&answer),
            // stdin closed
            None => false,
        }
    }
}

fn prompt(completed: &str, passed: bool, next: &str) -> String {
    let outcome = if passed {
        "passed"
    } else {
        "failed (optional, continuing)"
    };
    format!("Step '{completed}' {outcome}. Continue with '{next}'? [Y/n/q] ")
}

fn proceed(answer: &str) -> bool {
    !matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "n" | "no" | "q" | "quit"
    )
}

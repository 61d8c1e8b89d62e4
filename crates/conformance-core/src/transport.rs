//! Transport boundary
//!
//! The harness never interprets bytes at this layer: a [`Transport`] takes
//! an [`RpcCall`] and returns the raw response body or a [`TransportError`].
//! [`execute`] wraps any transport with the per-call timeout and
//! interruption handling so implementations stay thin.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::watch;

use crate::error::TransportError;

/// One remote invocation
#[derive(Debug, Clone)]
pub struct RpcCall {
    /// Target, `host:port`
    pub address: String,
    /// Use TLS
    pub tls: bool,
    /// Fully-qualified method, e.g. `ucs.v2.PaymentService/Authorize`
    pub method: String,
    /// Ordered headers
    pub headers: Vec<(String, String)>,
    /// Rendered JSON request body
    pub body: String,
    /// Deadline for the whole call
    pub timeout: Duration,
}

/// Something that can perform an [`RpcCall`]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the call and return the raw response body
    async fn invoke(&self, call: &RpcCall) -> Result<String, TransportError>;
}

/// Run a call with its timeout, abandoning it if `cancel` flips to `true`.
pub async fn execute<T: Transport + ?Sized>(
    transport: &T,
    call: &RpcCall,
    cancel: Option<&mut watch::Receiver<bool>>,
) -> Result<String, TransportError> {
    let timed = async {
        match tokio::time::timeout(call.timeout, transport.invoke(call)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                method: call.method.clone(),
                timeout: call.timeout,
            }),
        }
    };

    match cancel {
        Some(rx) => tokio::select! {
            result = timed => result,
            _ = cancelled(rx) => Err(TransportError::Interrupted {
                method: call.method.clone(),
            }),
        },
        None => timed.await,
    }
}

/// Resolves once the flag is set. Never resolves if the sender is gone.
pub async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Transport that shells out to `grpcurl`
#[derive(Debug, Clone)]
pub struct GrpcurlTransport {
    program: PathBuf,
}

impl Default for GrpcurlTransport {
    fn default() -> Self {
        Self::new("grpcurl")
    }
}

impl GrpcurlTransport {
    /// Use the given `grpcurl` binary
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, call: &RpcCall) -> Command {
        let mut cmd = Command::new(&self.program);
        if !call.tls {
            cmd.arg("-plaintext");
        }
        for (name, value) in &call.headers {
            cmd.arg("-H").arg(format!("{name}: {value}"));
        }
        cmd.arg("-d")
            .arg("@")
            .arg(&call.address)
            .arg(&call.method)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Transport for GrpcurlTransport {
    async fn invoke(&self, call: &RpcCall) -> Result<String, TransportError> {
        let io_err = |source: std::io::Error| TransportError::Io {
            method: call.method.clone(),
            source,
        };

        tracing::debug!("invoking {} on {}", call.method, call.address);
        let mut child = self
            .command(call)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(call.body.as_bytes()).await.map_err(io_err)?;
            stdin.shutdown().await.map_err(io_err)?;
        }

        let output = child.wait_with_output().await.map_err(io_err)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(TransportError::Status {
                method: call.method.clone(),
                status: output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| format!("exit code {c}")),
                message: stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowTransport;

    #[async_trait]
    impl Transport for SlowTransport {
        async fn invoke(&self, _call: &RpcCall) -> Result<String, TransportError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("{}".to_string())
        }
    }

    struct EchoTransport;

    #[async_trait]
    impl Transport for EchoTransport {
        async fn invoke(&self, call: &RpcCall) -> Result<String, TransportError> {
            Ok(call.body.clone())
        }
    }

    fn call(timeout: Duration) -> RpcCall {
        RpcCall {
            address: "localhost:8000".to_string(),
            tls: false,
            method: "ucs.v2.PaymentService/Get".to_string(),
            headers: vec![("x-connector".to_string(), "adyen".to_string())],
            body: r#"{"ok": true}"#.to_string(),
            timeout,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_times_out() {
        let err = execute(&SlowTransport, &call(Duration::from_secs(5)), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn test_execute_passes_body_through() {
        let body = execute(&EchoTransport, &call(Duration::from_secs(5)), None)
            .await
            .unwrap();
        assert_eq!(body, r#"{"ok": true}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_interrupted() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        let err = execute(&SlowTransport, &call(Duration::from_secs(600)), Some(&mut rx))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Interrupted { .. }));
    }

    #[tokio::test]
    async fn test_grpcurl_missing_binary() {
        let transport = GrpcurlTransport::new("/nonexistent/grpcurl-binary");
        let err = transport
            .invoke(&call(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }));
    }

    #[test]
    fn test_grpcurl_command_line() {
        let transport = GrpcurlTransport::default();
        let cmd = transport.command(&call(Duration::from_secs(5)));
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-plaintext",
                "-H",
                "x-connector: adyen",
                "-d",
                "@",
                "localhost:8000",
                "ucs.v2.PaymentService/Get",
            ]
        );
    }
}

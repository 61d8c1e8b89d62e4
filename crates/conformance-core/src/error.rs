//! Error types for conformance-core

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for conformance-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in conformance-core
#[derive(Error, Debug)]
pub enum Error {
    /// Connector configuration could not be resolved
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Request template could not be rendered
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Remote call failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Flow definition error
    #[error("invalid flow '{flow_name}': {message}")]
    InvalidFlow {
        /// Name of the flow with the error
        flow_name: String,
        /// Description of the error
        message: String,
    },

    /// Run artifacts could not be written
    #[error("report error in {path}: {message}")]
    Report {
        /// Artifact path
        path: PathBuf,
        /// Description of the error
        message: String,
    },

    /// Failed to parse a YAML flow definition
    #[error("failed to parse flow definition: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pre-flight configuration failures. No remote call is made once one of
/// these is raised.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be found
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path that was searched
        path: String,
    },

    /// Configuration file is not valid JSON
    #[error("failed to parse {path}: {source}")]
    Malformed {
        /// Path of the file
        path: String,
        /// Underlying parse error
        #[source]
        source: serde_json::Error,
    },

    /// A mandatory top-level key is absent
    #[error("{path}: missing required field '{field}'")]
    MissingField {
        /// Path of the file
        path: String,
        /// Name of the missing key
        field: &'static str,
    },

    /// A credential required by the selected auth scheme resolved to nothing
    #[error("missing credential '{field}' for {scheme} auth: set {variable} or credentials.{field} in the connector config")]
    MissingCredential {
        /// Config key of the credential
        field: String,
        /// Environment variable that would have supplied it
        variable: String,
        /// Auth scheme that requires it
        scheme: &'static str,
    },

    /// Flow name matches neither a built-in nor a flow file
    #[error("unknown flow '{name}' (built-in flows: {available})")]
    UnknownFlow {
        /// Requested flow name
        name: String,
        /// Comma-separated list of built-in flows
        available: String,
    },

    /// Failed to read a file
    #[error("IO error reading {path}: {source}")]
    Io {
        /// Path of the file
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
}

/// Rendering failures. Fatal for the step being rendered.
#[derive(Error, Debug)]
pub enum TemplateError {
    /// Template file is missing or unreadable
    #[error("cannot read template {path}: {source}")]
    Read {
        /// Path of the template
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Placeholders with no value in the context
    #[error("unresolved placeholders: {}", .missing.join(", "))]
    Unresolved {
        /// Placeholder names, sorted
        missing: Vec<String>,
    },

    /// Template syntax or render failure
    #[error("template error: {0}")]
    Render(#[from] minijinja::Error),

    /// Rendered text is not a JSON document
    #[error("rendered request is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
}

/// Transport-level failures. The response body, if any, is not interpreted.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Client process or connection could not be started
    #[error("failed to start RPC client '{program}': {source}")]
    Spawn {
        /// Client program
        program: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Call did not finish in time
    #[error("{method} timed out after {}s", .timeout.as_secs())]
    Timeout {
        /// RPC method
        method: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// Remote returned a non-OK status
    #[error("{method} failed with {status}: {message}")]
    Status {
        /// RPC method
        method: String,
        /// Status description (exit code or RPC status)
        status: String,
        /// Diagnostic output
        message: String,
    },

    /// Call was abandoned because the run was interrupted
    #[error("{method} interrupted")]
    Interrupted {
        /// RPC method
        method: String,
    },

    /// IO failure while talking to the client
    #[error("IO error during {method}: {source}")]
    Io {
        /// RPC method
        method: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    /// Short machine-readable kind, written into failure artifacts
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::Timeout { .. } => "timeout",
            Self::Status { .. } => "status",
            Self::Interrupted { .. } => "interrupted",
            Self::Io { .. } => "io",
        }
    }
}

/// A response body that is not JSON
#[derive(Error, Debug)]
#[error("response is not valid JSON: {0}")]
pub struct ParseError(#[from] pub serde_json::Error);

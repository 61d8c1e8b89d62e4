//! Connector Conformance Core Library
//!
//! This crate drives a payment-connector RPC service through multi-step
//! transaction lifecycles and checks every response:
//! - Connector configuration with environment overrides
//! - JSON request templates
//! - Auth header layouts
//! - A replaceable transport boundary
//! - Response field extraction and declarative validation
//! - Flow orchestration and run artifacts
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌────────────┐
//! │  Config  │──▶│ Template │──▶│ Transport │──▶│ Response │──▶│ Validation │
//! │ (+ env)  │   │ + Headers│   │  (gRPC)   │   │  Parser  │   │   Engine   │
//! └──────────┘   └──────────┘   └───────────┘   └──────────┘   └────────────┘
//!        ▲                 Flow Orchestrator drives each step               │
//!        └──────────────────────── Run Reporter ◀───────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use conformance_core::{FlowRequest, GrpcurlTransport, run_flow};
//!
//! let request = FlowRequest::new(".", "bambora", "auth-psync");
//! let outcome = run_flow(&request, &GrpcurlTransport::default(), None, None).await?;
//! println!("{}", outcome.status);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod error;
pub mod flow;
pub mod orchestrator;
pub mod report;
pub mod response;
pub mod template;
pub mod transport;
pub mod validation;

pub use auth::AuthScheme;
pub use config::{ConnectorConfig, EnvSource};
pub use error::{ConfigError, Error, ParseError, Result, TemplateError, TransportError};
pub use flow::{FlowDefinition, Operation};
pub use orchestrator::{FlowOutcome, FlowRequest, FlowStatus, Operator, run_flow};
pub use report::RunReporter;
pub use template::TemplateContext;
pub use transport::{GrpcurlTransport, RpcCall, Transport};
pub use validation::{ValidationReport, ValidationRuleSet};

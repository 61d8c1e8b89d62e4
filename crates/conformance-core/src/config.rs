//! Connector configuration resolution
//!
//! This module loads `configs/{connector}.json` and folds environment
//! overrides into it once, at load time.
//!
//! # Precedence
//!
//! For every credential: `{CONNECTOR}_{FIELD}` in the process environment,
//! then the same variable in the `.env` file, then `credentials.{field}` in
//! the config file. Empty values count as absent. A credential required by
//! the selected auth scheme that is absent from all sources is a
//! [`ConfigError::MissingCredential`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use crate::auth::{AuthKind, AuthScheme, CredentialField, is_reserved_header};
use crate::error::ConfigError;
use crate::flow::Operation;

static DOTENV_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:export\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.*?)\s*$")
        .expect("static regex is valid")
});

fn default_timeout_secs() -> u64 {
    30
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Raw shape of a connector config file. Mandatory keys are optional here so
/// their absence can be reported by name.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectorFile {
    name: Option<String>,
    address: Option<String>,
    #[serde(default)]
    tls: bool,
    auth_scheme: Option<AuthKind>,
    #[serde(default)]
    credentials: HashMap<String, String>,
    #[serde(default)]
    amounts: AmountsFile,
    #[serde(default = "default_currency")]
    currency: String,
    #[serde(default)]
    card: CardConfig,
    #[serde(default)]
    billing_address: BillingAddress,
    #[serde(default)]
    return_url: Option<String>,
    #[serde(default)]
    webhook_url: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    methods: HashMap<Operation, String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AmountsFile {
    authorize: Option<i64>,
    capture: Option<i64>,
    refund: Option<i64>,
}

/// Default amounts, in minor units, per operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Amounts {
    /// Authorize amount
    pub authorize: i64,
    /// Capture amount
    pub capture: i64,
    /// Refund amount
    pub refund: i64,
}

impl Amounts {
    const DEFAULT_AUTHORIZE: i64 = 1000;

    fn from_file(file: &AmountsFile) -> Self {
        let authorize = file.authorize.unwrap_or(Self::DEFAULT_AUTHORIZE);
        Self {
            authorize,
            capture: file.capture.unwrap_or(authorize),
            refund: file.refund.unwrap_or(authorize),
        }
    }
}

/// Test payment instrument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CardConfig {
    /// Primary account number
    pub number: String,
    /// Card verification code
    pub cvc: String,
    /// Two-digit expiry month
    pub exp_month: String,
    /// Four-digit expiry year
    pub exp_year: String,
    /// Card network, e.g. `VISA`
    pub network: String,
    /// Cardholder name
    pub holder_name: String,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            number: "4111111111111111".to_string(),
            cvc: "123".to_string(),
            exp_month: "12".to_string(),
            exp_year: "2030".to_string(),
            network: "VISA".to_string(),
            holder_name: "Test Cardholder".to_string(),
        }
    }
}

/// Billing address sent with authorizations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BillingAddress {
    /// First name
    pub first_name: String,
    /// Last name
    pub last_name: String,
    /// Street line 1
    pub line1: String,
    /// Street line 2
    pub line2: String,
    /// City
    pub city: String,
    /// State or province
    pub state: String,
    /// Postal code
    pub zip: String,
    /// ISO country code
    pub country: String,
    /// Contact email
    pub email: String,
    /// Contact phone
    pub phone: String,
}

impl Default for BillingAddress {
    fn default() -> Self {
        Self {
            first_name: "John".to_string(),
            last_name: "Doe".to_string(),
            line1: "123 Main Street".to_string(),
            line2: String::new(),
            city: "San Francisco".to_string(),
            state: "CA".to_string(),
            zip: "94105".to_string(),
            country: "US".to_string(),
            email: "john.doe@example.com".to_string(),
            phone: "4155550100".to_string(),
        }
    }
}

/// Fully resolved connector configuration. Immutable after [`ConnectorConfig::load`].
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Connector name
    pub name: String,
    /// RPC target, `host:port`
    pub address: String,
    /// Use TLS to reach the target
    pub tls: bool,
    /// Resolved credentials
    pub auth: AuthScheme,
    /// Default amounts
    pub amounts: Amounts,
    /// ISO currency code
    pub currency: String,
    /// Test card
    pub card: CardConfig,
    /// Billing address
    pub billing_address: BillingAddress,
    /// Redirect URL for 3DS and wallet flows
    pub return_url: String,
    /// Webhook URL
    pub webhook_url: String,
    /// Extra static transport headers
    pub headers: BTreeMap<String, String>,
    /// Per-operation RPC method overrides
    pub methods: HashMap<Operation, String>,
    /// Per-call transport timeout
    pub timeout: Duration,
}

impl ConnectorConfig {
    /// Load and resolve `path` for `connector`, consulting `env` for overrides.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let env = EnvSource::from_process().with_dotenv_file(".env")?;
    /// let config = ConnectorConfig::load("bambora", "configs/bambora.json", &env)?;
    /// ```
    pub fn load<P: AsRef<Path>>(
        connector: &str,
        path: P,
        env: &EnvSource,
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            });
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(connector, &contents, &path.display().to_string(), env)
    }

    /// Resolve a config from JSON text. `origin` is used in error messages.
    pub fn from_json(
        connector: &str,
        json: &str,
        origin: &str,
        env: &EnvSource,
    ) -> Result<Self, ConfigError> {
        let file: ConnectorFile =
            serde_json::from_str(json).map_err(|source| ConfigError::Malformed {
                path: origin.to_string(),
                source,
            })?;

        let missing = |field: &'static str| ConfigError::MissingField {
            path: origin.to_string(),
            field,
        };
        let name = file.name.clone().ok_or_else(|| missing("name"))?;
        let file_address = file.address.clone().ok_or_else(|| missing("address"))?;
        let kind = file.auth_scheme.ok_or_else(|| missing("authScheme"))?;

        if name != connector {
            tracing::warn!(
                "config {} declares connector '{}' but '{}' was requested",
                origin,
                name,
                connector
            );
        }

        let address = env
            .get(&env_var_name(connector, "ADDRESS"))
            .map(str::to_string)
            .unwrap_or(file_address);

        let auth = kind
            .resolve(|field| resolve_credential(connector, field, &file.credentials, env))
            .map_err(|field| ConfigError::MissingCredential {
                field: field.config_key(),
                variable: env_var_name(connector, &field.env_suffix()),
                scheme: kind.id(),
            })?;

        tracing::debug!("resolved {} auth for connector '{}'", kind, connector);

        let mut headers = file.headers;
        headers.retain(|header, _| {
            let reserved = is_reserved_header(header);
            if reserved {
                tracing::warn!(
                    "config {} sets reserved header '{}'; ignoring it",
                    origin,
                    header
                );
            }
            !reserved
        });

        Ok(Self {
            name,
            address,
            tls: file.tls,
            auth,
            amounts: Amounts::from_file(&file.amounts),
            currency: file.currency,
            card: file.card,
            billing_address: file.billing_address,
            return_url: file
                .return_url
                .unwrap_or_else(|| "https://example.com/return".to_string()),
            webhook_url: file
                .webhook_url
                .unwrap_or_else(|| "https://example.com/webhook".to_string()),
            headers,
            methods: file.methods,
            timeout: Duration::from_secs(file.timeout_secs),
        })
    }

    /// RPC method for an operation, honouring `methods` overrides
    pub fn method_for(&self, operation: Operation) -> String {
        self.methods
            .get(&operation)
            .cloned()
            .unwrap_or_else(|| operation.default_method().to_string())
    }
}

/// Resolve one credential: environment, then config file, then nothing.
fn resolve_credential(
    connector: &str,
    field: CredentialField,
    credentials: &HashMap<String, String>,
    env: &EnvSource,
) -> Option<String> {
    env.get(&env_var_name(connector, &field.env_suffix()))
        .map(str::to_string)
        .or_else(|| {
            credentials
                .get(&field.config_key())
                .filter(|v| !v.is_empty())
                .cloned()
        })
}

/// `{CONNECTOR_UPPER}_{SUFFIX}`; non-alphanumerics in the connector become `_`.
pub fn env_var_name(connector: &str, suffix: &str) -> String {
    let prefix: String = connector
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{prefix}_{suffix}")
}

/// Variables visible to config resolution.
///
/// The process environment always wins over `.env` entries; the process
/// environment itself is never modified.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    process: HashMap<String, String>,
    dotenv: HashMap<String, String>,
}

impl EnvSource {
    /// Snapshot the current process environment
    pub fn from_process() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build from explicit variables
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            process: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            dotenv: HashMap::new(),
        }
    }

    /// Layer a `.env` file underneath the process variables. A missing file is
    /// not an error.
    pub fn with_dotenv_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("no env file at {}", path.display());
            return Ok(self);
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.dotenv = parse_dotenv(&contents);
        tracing::debug!(
            "loaded {} variables from {}",
            self.dotenv.len(),
            path.display()
        );
        Ok(self)
    }

    /// Look up a non-empty variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.process
            .get(key)
            .filter(|v| !v.is_empty())
            .or_else(|| self.dotenv.get(key).filter(|v| !v.is_empty()))
            .map(String::as_str)
    }
}

/// Parse `.env` text: `KEY=VALUE` lines, optional `export`, `#` comments,
/// matching outer quotes stripped.
pub fn parse_dotenv(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .filter_map(|line| {
            let caps = DOTENV_LINE.captures(line)?;
            let key = caps.get(1)?.as_str().to_string();
            let raw = caps.get(2).map_or("", |m| m.as_str());
            Some((key, unquote(raw)))
        })
        .collect()
}

fn unquote(raw: &str) -> String {
    for quote in ['"', '\''] {
        if let Some(rest) = raw.strip_prefix(quote) {
            // Anything after the closing quote is a comment.
            if let Some(end) = rest.find(quote) {
                return rest[..end].to_string();
            }
        }
    }
    // Unquoted values may carry a trailing comment.
    match raw.find(" #") {
        Some(idx) => raw[..idx].trim_end().to_string(),
        None => raw.to_string(),
    }
}

//! Auth schemes and transport headers
//!
//! A connector authenticates with one of a closed set of credential layouts.
//! Each [`AuthScheme`] variant carries exactly the credentials it needs, so
//! the headers emitted can never disagree with the selected scheme.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Header naming the connector under test
pub const CONNECTOR_HEADER: &str = "x-connector";
/// Header naming the auth layout
pub const AUTH_HEADER: &str = "x-auth";
/// Per-call tracing header
pub const REFERENCE_ID_HEADER: &str = "x-reference-id";

/// Highest numbered key a multi-auth connector may carry (`key2`..=`key9`).
const MAX_NUMBERED_KEY: u8 = 9;

/// Auth layout selected in the connector config, before credentials are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthKind {
    /// Single API key header
    #[serde(alias = "HeaderKey")]
    HeaderKey,
    /// API key plus key1
    #[serde(alias = "BodyKey")]
    BodyKey,
    /// API key, key1 and a signing secret
    #[serde(alias = "SignatureKey")]
    SignatureKey,
    /// Signature layout plus numbered extra keys
    #[serde(alias = "MultiAuthKey")]
    MultiAuthKey,
}

/// One credential slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialField {
    /// `apiKey`
    ApiKey,
    /// `key1`
    Key1,
    /// `signature`
    Signature,
    /// `key2`, `key3`, ...
    Numbered(u8),
}

impl CredentialField {
    /// Key under `credentials` in the connector config
    pub fn config_key(&self) -> String {
        match self {
            Self::ApiKey => "apiKey".to_string(),
            Self::Key1 => "key1".to_string(),
            Self::Signature => "signature".to_string(),
            Self::Numbered(n) => format!("key{n}"),
        }
    }

    /// Suffix of the `{CONNECTOR}_{FIELD}` override variable
    pub fn env_suffix(&self) -> String {
        match self {
            Self::ApiKey => "API_KEY".to_string(),
            Self::Key1 => "KEY1".to_string(),
            Self::Signature => "SIGNATURE".to_string(),
            Self::Numbered(n) => format!("KEY{n}"),
        }
    }

    fn header(&self) -> String {
        match self {
            Self::ApiKey => "x-api-key".to_string(),
            Self::Key1 => "x-key1".to_string(),
            Self::Signature => "x-api-secret".to_string(),
            Self::Numbered(n) => format!("x-key{n}"),
        }
    }
}

impl AuthKind {
    /// Identifier sent in the auth-scheme header
    pub fn id(&self) -> &'static str {
        match self {
            Self::HeaderKey => "header-key",
            Self::BodyKey => "body-key",
            Self::SignatureKey => "signature-key",
            Self::MultiAuthKey => "multi-auth-key",
        }
    }

    /// Credentials this layout cannot work without
    pub fn required_fields(&self) -> &'static [CredentialField] {
        use CredentialField::*;
        match self {
            Self::HeaderKey => &[ApiKey],
            Self::BodyKey => &[ApiKey, Key1],
            Self::SignatureKey => &[ApiKey, Signature, Key1],
            Self::MultiAuthKey => &[ApiKey, Signature, Key1, Numbered(2)],
        }
    }

    /// Build the scheme by looking up each credential.
    ///
    /// Returns the first required field the lookup could not supply. For
    /// multi-auth, numbered keys after `key2` are collected until the first
    /// gap.
    pub fn resolve<F>(self, mut lookup: F) -> std::result::Result<AuthScheme, CredentialField>
    where
        F: FnMut(CredentialField) -> Option<String>,
    {
        let mut require = |field: CredentialField| lookup(field).ok_or(field);

        let scheme = match self {
            Self::HeaderKey => AuthScheme::HeaderKey {
                api_key: require(CredentialField::ApiKey)?,
            },
            Self::BodyKey => AuthScheme::BodyKey {
                api_key: require(CredentialField::ApiKey)?,
                key1: require(CredentialField::Key1)?,
            },
            Self::SignatureKey => AuthScheme::SignatureKey {
                api_key: require(CredentialField::ApiKey)?,
                signature: require(CredentialField::Signature)?,
                key1: require(CredentialField::Key1)?,
            },
            Self::MultiAuthKey => {
                let api_key = require(CredentialField::ApiKey)?;
                let signature = require(CredentialField::Signature)?;
                let key1 = require(CredentialField::Key1)?;
                let mut extra_keys = vec![require(CredentialField::Numbered(2))?];
                for n in 3..=MAX_NUMBERED_KEY {
                    match require(CredentialField::Numbered(n)) {
                        Ok(value) => extra_keys.push(value),
                        Err(_) => break,
                    }
                }
                AuthScheme::MultiAuthKey {
                    api_key,
                    signature,
                    key1,
                    extra_keys,
                }
            }
        };
        Ok(scheme)
    }
}

impl fmt::Display for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Resolved credentials for one connector
#[derive(Clone, PartialEq, Eq)]
pub enum AuthScheme {
    /// `x-api-key` only
    HeaderKey {
        /// API key
        api_key: String,
    },
    /// `x-api-key` and `x-key1`
    BodyKey {
        /// API key
        api_key: String,
        /// Secondary key
        key1: String,
    },
    /// `x-api-key`, `x-key1` and `x-api-secret`
    SignatureKey {
        /// API key
        api_key: String,
        /// Signing secret
        signature: String,
        /// Secondary key
        key1: String,
    },
    /// Signature layout plus `x-key2`, `x-key3`, ...
    MultiAuthKey {
        /// API key
        api_key: String,
        /// Signing secret
        signature: String,
        /// Secondary key
        key1: String,
        /// `key2` onwards, in order
        extra_keys: Vec<String>,
    },
}

impl AuthScheme {
    /// The layout this scheme was resolved from
    pub fn kind(&self) -> AuthKind {
        match self {
            Self::HeaderKey { .. } => AuthKind::HeaderKey,
            Self::BodyKey { .. } => AuthKind::BodyKey,
            Self::SignatureKey { .. } => AuthKind::SignatureKey,
            Self::MultiAuthKey { .. } => AuthKind::MultiAuthKey,
        }
    }

    fn credential_headers(&self) -> Vec<(String, String)> {
        use CredentialField::*;
        let pair = |field: CredentialField, value: &str| (field.header(), value.to_string());
        match self {
            Self::HeaderKey { api_key } => vec![pair(ApiKey, api_key)],
            Self::BodyKey { api_key, key1 } => vec![pair(ApiKey, api_key), pair(Key1, key1)],
            Self::SignatureKey {
                api_key,
                signature,
                key1,
            } => vec![
                pair(ApiKey, api_key),
                pair(Key1, key1),
                pair(Signature, signature),
            ],
            Self::MultiAuthKey {
                api_key,
                signature,
                key1,
                extra_keys,
            } => {
                let mut headers = vec![
                    pair(ApiKey, api_key),
                    pair(Key1, key1),
                    pair(Signature, signature),
                ];
                headers.extend(
                    extra_keys
                        .iter()
                        .zip(2u8..)
                        .map(|(value, n)| pair(Numbered(n), value)),
                );
                headers
            }
        }
    }
}

// Credentials never reach logs through Debug.
impl fmt::Debug for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthScheme")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

/// Build the ordered transport headers for one call.
///
/// Identity headers come first, then exactly the credential headers of the
/// scheme, then any static headers from the connector config, and the
/// reference id last.
pub fn build_headers(
    scheme: &AuthScheme,
    connector: &str,
    reference_id: &str,
    extra: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut headers = vec![
        (CONNECTOR_HEADER.to_string(), connector.to_string()),
        (AUTH_HEADER.to_string(), scheme.kind().id().to_string()),
    ];
    headers.extend(scheme.credential_headers());
    headers.extend(
        extra
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .filter(|(k, _)| !is_reserved_header(k)),
    );
    headers.push((REFERENCE_ID_HEADER.to_string(), reference_id.to_string()));
    headers
}

/// Whether a header is set by the harness and may not come from static config
pub fn is_reserved_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name == CONNECTOR_HEADER
        || name == AUTH_HEADER
        || name == REFERENCE_ID_HEADER
        || is_secret_header(&name)
}

/// Whether a header carries a credential
pub fn is_secret_header(name: &str) -> bool {
    name == "x-api-key" || name == "x-api-secret" || name.starts_with("x-key")
}

/// Keep the first four characters of a secret for log correlation
pub fn mask_secret(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    let hidden = value.chars().count().saturating_sub(4);
    format!("{visible}{}", "*".repeat(hidden))
}

/// Headers as they may be logged
pub fn redact_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| {
            if is_secret_header(k) {
                (k.clone(), mask_secret(v))
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn names(headers: &[(String, String)]) -> Vec<&str> {
        headers.iter().map(|(k, _)| k.as_str()).collect()
    }

    #[test]
    fn test_body_key_emits_only_its_headers() {
        let scheme = AuthScheme::BodyKey {
            api_key: "ak".to_string(),
            key1: "k1".to_string(),
        };
        let headers = build_headers(&scheme, "bambora", "ref-1", &BTreeMap::new());
        assert_eq!(
            names(&headers),
            vec!["x-connector", "x-auth", "x-api-key", "x-key1", "x-reference-id"]
        );
        assert_eq!(headers[1].1, "body-key");
        assert_eq!(headers[4].1, "ref-1");
    }

    #[test]
    fn test_header_key_has_no_key1() {
        let scheme = AuthScheme::HeaderKey {
            api_key: "ak".to_string(),
        };
        let headers = build_headers(&scheme, "stripe", "r", &BTreeMap::new());
        assert!(!names(&headers).contains(&"x-key1"));
        assert_eq!(headers[1].1, "header-key");
    }

    #[test]
    fn test_multi_auth_numbers_extra_keys() {
        let scheme = AuthScheme::MultiAuthKey {
            api_key: "ak".to_string(),
            signature: "sig".to_string(),
            key1: "k1".to_string(),
            extra_keys: vec!["k2".to_string(), "k3".to_string()],
        };
        let headers = build_headers(&scheme, "cybersource", "r", &BTreeMap::new());
        let map: HashMap<_, _> = headers.iter().cloned().collect();
        assert_eq!(map["x-key2"], "k2");
        assert_eq!(map["x-key3"], "k3");
        assert_eq!(map["x-api-secret"], "sig");
        assert_eq!(headers.last().unwrap().0, REFERENCE_ID_HEADER);
    }

    #[test]
    fn test_extra_headers_precede_reference_id() {
        let scheme = AuthScheme::HeaderKey {
            api_key: "ak".to_string(),
        };
        let mut extra = BTreeMap::new();
        extra.insert("X-Merchant-Id".to_string(), "m_1".to_string());
        let headers = build_headers(&scheme, "c", "r", &extra);
        assert_eq!(headers[3], ("x-merchant-id".to_string(), "m_1".to_string()));
        assert_eq!(headers[4].0, REFERENCE_ID_HEADER);
    }

    #[test]
    fn test_extra_headers_cannot_shadow_harness_headers() {
        let scheme = AuthScheme::HeaderKey {
            api_key: "real".to_string(),
        };
        let mut extra = BTreeMap::new();
        extra.insert("X-Connector".to_string(), "other".to_string());
        extra.insert("x-api-key".to_string(), "stale".to_string());
        extra.insert("X-Key1".to_string(), "k".to_string());
        extra.insert("x-reference-id".to_string(), "fixed".to_string());
        extra.insert("x-tenant".to_string(), "t1".to_string());
        let headers = build_headers(&scheme, "stripe", "ref-9", &extra);

        let values = |name: &str| {
            headers
                .iter()
                .filter(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
                .collect::<Vec<_>>()
        };
        assert_eq!(values(CONNECTOR_HEADER), vec!["stripe"]);
        assert_eq!(values("x-api-key"), vec!["real"]);
        assert!(values("x-key1").is_empty());
        assert_eq!(values(REFERENCE_ID_HEADER), vec!["ref-9"]);
        assert_eq!(values("x-tenant"), vec!["t1"]);
    }

    #[test]
    fn test_resolve_reports_first_missing_field() {
        let result = AuthKind::SignatureKey.resolve(|field| match field {
            CredentialField::ApiKey => Some("ak".to_string()),
            _ => None,
        });
        assert_eq!(result.unwrap_err(), CredentialField::Signature);
    }

    #[test]
    fn test_resolve_multi_auth_stops_at_gap() {
        let scheme = AuthKind::MultiAuthKey
            .resolve(|field| match field {
                CredentialField::Numbered(4) => None,
                CredentialField::Numbered(5) => Some("unreachable".to_string()),
                other => Some(other.config_key()),
            })
            .unwrap();
        match scheme {
            AuthScheme::MultiAuthKey { extra_keys, .. } => {
                assert_eq!(extra_keys, vec!["key2".to_string(), "key3".to_string()]);
            }
            _ => panic!("Expected multi-auth scheme"),
        }
    }

    #[test]
    fn test_auth_kind_parses_kebab_and_pascal() {
        let kind: AuthKind = serde_json::from_str("\"signature-key\"").unwrap();
        assert_eq!(kind, AuthKind::SignatureKey);
        let kind: AuthKind = serde_json::from_str("\"BodyKey\"").unwrap();
        assert_eq!(kind, AuthKind::BodyKey);
    }

    #[test]
    fn test_debug_does_not_leak_credentials() {
        let scheme = AuthScheme::HeaderKey {
            api_key: "super-secret".to_string(),
        };
        assert!(!format!("{scheme:?}").contains("super-secret"));
    }

    #[test]
    fn test_redact_masks_credentials_only() {
        let headers = vec![
            ("x-connector".to_string(), "adyen".to_string()),
            ("x-api-key".to_string(), "sk_test_123".to_string()),
        ];
        let redacted = redact_headers(&headers);
        assert_eq!(redacted[0].1, "adyen");
        assert_eq!(redacted[1].1, "sk_t*******");
    }
}

//! Backend configuration
//!
//! All configuration is passed explicitly into backend constructors; there
//! is no process-global state. `from_env()` reads `RATATOSKR_*` variables so
//! the binary can run unattended the way the signer pipeline invokes it.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::RegistryError;
use crate::keyset::DsDigestType;

/// Configuration for the EPP (stateful XML-over-TLS) backend
#[derive(Debug, Clone)]
pub struct EppConfig {
    /// Registry server hostname
    pub host: String,

    /// Registry EPP port (700 is the IANA assignment)
    pub port: u16,

    /// Account identifier (EPP clID)
    pub account: String,

    /// Account secret (EPP pw)
    pub password: String,

    /// CA bundle the server certificate must chain to; verification is
    /// mandatory, there is no insecure mode
    pub ca_bundle: PathBuf,

    /// Timeout applied to the TCP connect and the TLS handshake
    pub connect_timeout: Duration,

    /// Timeout for each framed read; a hung registry surfaces as
    /// `TransportError::Timeout` rather than blocking forever
    pub read_timeout: Duration,

    /// Result code this registry uses for "already logged out", accepted as
    /// success when closing the session. Registry-specific; not every
    /// registry has one.
    pub logout_alt_code: Option<String>,

    /// objURI values declared in the login service block
    pub object_uris: Vec<String>,

    /// extURI values declared in the login service extension block
    pub extension_uris: Vec<String>,
}

impl Default for EppConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 700,
            account: String::new(),
            password: String::new(),
            ca_bundle: PathBuf::from("/etc/ratatoskr/registry-ca.pem"),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            logout_alt_code: Some("1500".to_string()),
            object_uris: vec![
                "urn:ietf:params:xml:ns:contact-1.0".to_string(),
                "urn:ietf:params:xml:ns:host-1.0".to_string(),
                "urn:ietf:params:xml:ns:domain-1.0".to_string(),
            ],
            extension_uris: vec![
                "http://rxsd.domain-registry.nl/sidn-ext-epp-1.0".to_string(),
            ],
        }
    }
}

impl EppConfig {
    /// Build a config from `RATATOSKR_EPP_*` environment variables,
    /// validating everything that can be validated up front.
    pub fn from_env() -> Result<Self, RegistryError> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("RATATOSKR_EPP_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("RATATOSKR_EPP_PORT") {
            config.port = port
                .parse()
                .map_err(|_| RegistryError::Config(format!("Invalid EPP port: {port}")))?;
        }
        if let Ok(account) = std::env::var("RATATOSKR_EPP_ACCOUNT") {
            config.account = account;
        }
        if let Ok(password) = std::env::var("RATATOSKR_EPP_PASSWORD") {
            config.password = password;
        }
        if let Ok(ca) = std::env::var("RATATOSKR_EPP_CA_BUNDLE") {
            config.ca_bundle = PathBuf::from(ca);
        }
        if let Ok(secs) = std::env::var("RATATOSKR_EPP_READ_TIMEOUT") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| RegistryError::Config(format!("Invalid read timeout: {secs}")))?;
            config.read_timeout = Duration::from_secs(secs);
        }
        if let Ok(code) = std::env::var("RATATOSKR_EPP_LOGOUT_ALT_CODE") {
            config.logout_alt_code = if code.is_empty() { None } else { Some(code) };
        }

        if config.account.is_empty() {
            return Err(RegistryError::Config(
                "RATATOSKR_EPP_ACCOUNT is not set".to_string(),
            ));
        }
        Ok(config)
    }
}

/// Configuration for the REST (JSON-over-HTTPS) backend
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base URL for domain operations, trailing slash included
    pub domains_base_url: String,

    /// Base URL for pending-action queries, trailing slash included
    pub actions_base_url: String,

    /// Reseller account id sent as `auth-userid` on every call
    pub auth_id: String,

    /// API key sent as `api-key` on every call
    pub api_key: String,

    /// Per-request timeout
    pub timeout: Duration,

    /// Digest type used when deriving DS records from the signer's keys
    pub ds_digest_type: DsDigestType,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            domains_base_url: "https://httpapi.com/api/domains/".to_string(),
            actions_base_url: "https://httpapi.com/api/actions/".to_string(),
            auth_id: String::new(),
            api_key: String::new(),
            timeout: Duration::from_secs(30),
            ds_digest_type: DsDigestType::Sha256,
        }
    }
}

impl RestConfig {
    /// Build a config from `RATATOSKR_REST_*` environment variables.
    pub fn from_env() -> Result<Self, RegistryError> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("RATATOSKR_REST_DOMAINS_URL") {
            config.domains_base_url = url;
        }
        if let Ok(url) = std::env::var("RATATOSKR_REST_ACTIONS_URL") {
            config.actions_base_url = url;
        }
        if let Ok(auth_id) = std::env::var("RATATOSKR_REST_AUTH_ID") {
            config.auth_id = auth_id;
        }
        if let Ok(api_key) = std::env::var("RATATOSKR_REST_API_KEY") {
            config.api_key = api_key;
        }
        if let Ok(digest) = std::env::var("RATATOSKR_REST_DS_DIGEST") {
            let value: u8 = digest
                .parse()
                .map_err(|_| RegistryError::Config(format!("Invalid DS digest type: {digest}")))?;
            config.ds_digest_type = DsDigestType::from_u8(value)
                .ok_or_else(|| RegistryError::Config(format!("Invalid DS digest type: {digest}")))?;
        }

        if config.auth_id.is_empty() || config.api_key.is_empty() {
            return Err(RegistryError::Config(
                "RATATOSKR_REST_AUTH_ID and RATATOSKR_REST_API_KEY must be set".to_string(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epp_config_defaults() {
        let config = EppConfig::default();
        assert_eq!(config.port, 700);
        assert_eq!(config.logout_alt_code.as_deref(), Some("1500"));
        assert_eq!(config.object_uris.len(), 3);
        assert_eq!(config.read_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_rest_config_defaults() {
        let config = RestConfig::default();
        assert_eq!(config.ds_digest_type, DsDigestType::Sha256);
        assert!(config.domains_base_url.ends_with('/'));
    }
}

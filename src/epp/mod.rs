//! EPP registry backend: binary-framed XML over TLS
//!
//! The registry speaks the stateful EPP protocol: a greeting on connect, an
//! authenticated session, then serialized command/response pairs. Key
//! material travels in the secure-delegation extension as full DNSKEY
//! records, so this backend diffs and publishes `KeyRecord`s directly.

pub mod codec;
pub mod request;
pub mod response;
pub mod session;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::{debug, warn};

use crate::backend::RegistryBackend;
use crate::config::EppConfig;
use crate::diff::UpdatePlan;
use crate::error::{RegistryError, Result};
use crate::keyset::{KeyRecord, KeySet, ZoneName};
use session::{EppSession, SessionState};

pub struct EppBackend {
    config: EppConfig,
    session: Option<EppSession<TlsStream<TcpStream>>>,
}

impl EppBackend {
    pub fn new(config: EppConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    fn session(&mut self) -> Result<&mut EppSession<TlsStream<TcpStream>>> {
        self.session
            .as_mut()
            .ok_or_else(|| RegistryError::Protocol("EPP backend is not open".to_string()))
    }
}

#[async_trait]
impl RegistryBackend for EppBackend {
    type Record = KeyRecord;

    /// Connect, exchange greetings and log in
    async fn open(&mut self) -> Result<()> {
        let mut session = EppSession::connect(&self.config).await?;
        session.login(&self.config).await?;
        self.session = Some(session);
        Ok(())
    }

    fn desired_records(&self, _zone: &ZoneName, desired: &KeySet) -> Vec<KeyRecord> {
        desired.sep_only().into_iter().collect()
    }

    /// Domain info, parsed for secure-delegation key data. Only SEP keys
    /// count as registry key material; the registry may echo zone-signing
    /// keys that are none of the parent's business.
    async fn fetch_current_keys(&mut self, zone: &ZoneName) -> Result<Vec<KeyRecord>> {
        let doc = request::domain_info(zone)
            .map_err(|e| RegistryError::Protocol(format!("failed to build domain info: {e}")))?;
        let session = self.session()?;
        let resp = session.command(&doc).await?;
        resp.require_ok(&zone.as_registry_str(), "domain info", None)?;

        let keys: Vec<KeyRecord> = resp
            .key_data
            .into_iter()
            .filter(KeyRecord::is_sep)
            .collect();
        debug!("{zone} has {} SEP key(s) at the registry", keys.len());
        Ok(keys)
    }

    /// One domain update carrying the whole plan; the registry applies the
    /// `<rem>` block before the `<add>` block, and the command is atomic on
    /// the registry side.
    async fn apply_plan(&mut self, zone: &ZoneName, plan: &UpdatePlan<KeyRecord>) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }
        let doc = request::domain_update(zone, plan)
            .map_err(|e| RegistryError::Protocol(format!("failed to build domain update: {e}")))?;
        let session = self.session()?;
        let resp = session.command(&doc).await?;
        resp.require_ok(&zone.as_registry_str(), "domain update", None)?;
        debug!(
            "{zone}: removed {} and added {} key(s) at the registry",
            plan.to_remove.len(),
            plan.to_add.len()
        );
        Ok(())
    }

    /// Log out and drop the connection. A logout that the registry answers
    /// unkindly is logged, not propagated; the session is gone either way.
    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if session.state() == SessionState::LoggedIn {
                if let Err(e) = session.logout(self.config.logout_alt_code.as_deref()).await {
                    warn!("Logout failed on {}: {e}", session.server_id());
                }
            }
            session.close().await;
        }
    }
}

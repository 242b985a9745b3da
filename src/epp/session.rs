//! EPP session lifecycle
//!
//! A session walks `Disconnected → Connected → LoggedIn → LoggedOut` and is
//! used for exactly one synchronization before being torn down; reconnecting
//! is cheaper than getting pooled session reuse right against registries
//! with per-account connection limits. Requests are strictly serialized:
//! every send is paired with one receive before the next request goes out.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info};

use crate::config::EppConfig;
use crate::epp::codec::{FrameCodec, TransportError};
use crate::epp::{request, response::EppResponse};
use crate::error::{RegistryError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    LoggedIn,
    LoggedOut,
}

/// One EPP session over a framed stream. Generic over the stream so tests
/// can drive it through an in-memory duplex instead of TLS.
#[derive(Debug)]
pub struct EppSession<S> {
    codec: FrameCodec<S>,
    state: SessionState,
    server_id: String,
}

impl EppSession<TlsStream<TcpStream>> {
    /// Establish the TLS connection and perform the greeting exchange.
    /// Server certificate verification against the configured CA bundle is
    /// mandatory.
    pub async fn connect(config: &EppConfig) -> Result<Self> {
        let tls_config = build_tls_config(config)?;
        let connector = TlsConnector::from(Arc::new(tls_config));

        let addr = (config.host.as_str(), config.port);
        let tcp = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)
            .map_err(RegistryError::from)?
            .map_err(|e| RegistryError::from(TransportError::Connect(e.to_string())))?;

        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|e| RegistryError::from(TransportError::Tls(e.to_string())))?;
        let stream = timeout(config.connect_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| TransportError::Timeout)
            .map_err(RegistryError::from)?
            .map_err(|e| RegistryError::from(TransportError::Tls(e.to_string())))?;

        debug!("TLS established to {}:{}", config.host, config.port);
        Self::handshake(stream, config.read_timeout).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> EppSession<S> {
    /// Perform the hello/greeting exchange over an established stream and
    /// enter `Connected`. A greeting that does not parse, or that carries
    /// no server identity, is fatal.
    pub async fn handshake(stream: S, read_timeout: Duration) -> Result<Self> {
        let mut codec = FrameCodec::new(stream, read_timeout);

        let hello = request::hello().map_err(xml_err)?;
        codec.send_frame(&hello).await.map_err(RegistryError::from)?;
        let greeting = codec.recv_frame().await.map_err(RegistryError::from)?;

        let parsed = EppResponse::parse(&greeting)?;
        let server_id = parsed.greeting_server_id()?.to_string();
        info!("Connected to EPP server {server_id}");

        Ok(Self {
            codec,
            state: SessionState::Connected,
            server_id,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Peer identity from the greeting
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Log in with the configured credentials and service declarations.
    /// On rejection the session stays `Connected`; callers must reconnect
    /// rather than retry the login on the same session.
    pub async fn login(&mut self, config: &EppConfig) -> Result<()> {
        self.require_state(SessionState::Connected, "login")?;

        let doc = request::login(
            &config.account,
            &config.password,
            &config.object_uris,
            &config.extension_uris,
        )
        .map_err(xml_err)?;
        let resp = self.exchange(&doc).await?;

        match resp.require_ok("-", "login", None) {
            Ok(()) => {
                self.state = SessionState::LoggedIn;
                debug!("Logged in to {}", self.server_id);
                Ok(())
            }
            Err(RegistryError::Rejected { code, message, .. }) => Err(
                RegistryError::Authentication(format!("{} ({code} {message})", self.server_id)),
            ),
            Err(e) => Err(e),
        }
    }

    /// Re-run the hello exchange to keep an idle session open. Legal while
    /// `Connected` or `LoggedIn`; never changes state.
    pub async fn keepalive(&mut self) -> Result<()> {
        if !matches!(self.state, SessionState::Connected | SessionState::LoggedIn) {
            return Err(RegistryError::Protocol(format!(
                "keepalive issued in state {:?}",
                self.state
            )));
        }
        let hello = request::hello().map_err(xml_err)?;
        let greeting = self.exchange_raw(&hello).await?;
        EppResponse::parse(&greeting)?.greeting_server_id()?;
        Ok(())
    }

    /// Send one command document and parse the response. Only legal while
    /// `LoggedIn`.
    pub async fn command(&mut self, document: &[u8]) -> Result<EppResponse> {
        self.require_state(SessionState::LoggedIn, "command")?;
        self.exchange(document).await
    }

    /// End the session. The registry's generic success and the configured
    /// "already logged out" code both count as clean; whatever the answer,
    /// the session is `LoggedOut` afterwards and unusable for requests.
    pub async fn logout(&mut self, accept_alt: Option<&str>) -> Result<()> {
        self.require_state(SessionState::LoggedIn, "logout")?;

        let doc = request::logout().map_err(xml_err)?;
        let outcome = match self.exchange(&doc).await {
            Ok(resp) => resp.require_ok("-", "logout", accept_alt),
            Err(e) => Err(e),
        };
        self.state = SessionState::LoggedOut;
        outcome
    }

    /// Close the underlying stream. Idempotent, legal in any state.
    pub async fn close(&mut self) {
        self.codec.shutdown().await;
        self.state = SessionState::Disconnected;
    }

    async fn exchange(&mut self, document: &[u8]) -> Result<EppResponse> {
        let raw = self.exchange_raw(document).await?;
        EppResponse::parse(&raw)
    }

    async fn exchange_raw(&mut self, document: &[u8]) -> Result<Vec<u8>> {
        self.codec
            .send_frame(document)
            .await
            .map_err(RegistryError::from)?;
        self.codec.recv_frame().await.map_err(RegistryError::from)
    }

    fn require_state(&self, expected: SessionState, operation: &str) -> Result<()> {
        if self.state != expected {
            return Err(RegistryError::Protocol(format!(
                "{operation} issued in state {:?}, requires {expected:?}",
                self.state
            )));
        }
        Ok(())
    }
}

fn xml_err(e: quick_xml::Error) -> RegistryError {
    RegistryError::Protocol(format!("failed to build request document: {e}"))
}

fn build_tls_config(config: &EppConfig) -> Result<ClientConfig> {
    let pem = std::fs::read(&config.ca_bundle).map_err(|e| {
        RegistryError::Config(format!(
            "Cannot read CA bundle {}: {e}",
            config.ca_bundle.display()
        ))
    })?;

    let mut roots = RootCertStore::empty();
    let mut added = 0usize;
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        let cert = cert.map_err(|e| {
            RegistryError::Config(format!("Cannot parse CA bundle: {e}"))
        })?;
        roots
            .add(cert)
            .map_err(|e| RegistryError::Config(format!("Cannot use CA certificate: {e}")))?;
        added += 1;
    }
    if added == 0 {
        return Err(RegistryError::Config(format!(
            "CA bundle {} contains no certificates",
            config.ca_bundle.display()
        )));
    }

    Ok(ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

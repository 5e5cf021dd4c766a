use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Version, body::Body as _, client::conn::http1};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls_native_certs::load_native_certs;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;

use crate::{
    core::{error::ForwardError, resolver::ResolvedTarget, rule::Scheme},
    ports::upstream::{UpstreamChannel, UpstreamConnector, UpstreamFrame, UpstreamResponse},
};

/// Upstream connector over TCP, with rustls for `https` rules, speaking
/// HTTP/1.1 through hyper's connection-level client.
///
/// Each call to [`UpstreamConnector::connect`] opens a new socket; reuse is
/// decided by the caller holding on to the returned channel.
#[derive(Clone)]
pub struct HyperUpstreamConnector {
    tls: TlsConnector,
}

impl HyperUpstreamConnector {
    /// Create a connector trusting the platform's native root certificates.
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        tracing::info!("Loaded {} native root certificates.", root_cert_store.len());

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        Ok(Self::with_tls_config(tls_config))
    }

    /// Use a caller-provided rustls client configuration.
    pub fn with_tls_config(config: rustls::ClientConfig) -> Self {
        Self {
            tls: TlsConnector::from(Arc::new(config)),
        }
    }
}

#[async_trait]
impl UpstreamConnector for HyperUpstreamConnector {
    async fn connect(
        &self,
        target: &ResolvedTarget,
        addr: SocketAddr,
    ) -> Result<Box<dyn UpstreamChannel>, ForwardError> {
        let connect_err = |reason: String| ForwardError::Connect { addr, reason };

        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!(%addr, error = %e, "failed to set TCP_NODELAY");
        }

        match target.scheme {
            Scheme::Http => handshake(tcp, addr).await,
            Scheme::Https => {
                let server_name = ServerName::try_from(target.host.clone())
                    .map_err(|e| connect_err(format!("invalid TLS server name: {e}")))?;
                let tls = self
                    .tls
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| connect_err(format!("TLS handshake failed: {e}")))?;
                handshake(tls, addr).await
            }
        }
    }
}

async fn handshake<S>(stream: S, addr: SocketAddr) -> Result<Box<dyn UpstreamChannel>, ForwardError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, connection) = http1::handshake::<_, AxumBody>(TokioIo::new(stream))
        .await
        .map_err(|e| ForwardError::Connect {
            addr,
            reason: format!("HTTP handshake failed: {e}"),
        })?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(%addr, error = %e, "upstream connection closed with error");
        }
    });

    tracing::debug!(%addr, "upstream connection established");
    Ok(Box::new(HyperChannel { sender, addr }))
}

/// One HTTP/1.1 connection to an upstream server.
struct HyperChannel {
    sender: http1::SendRequest<AxumBody>,
    addr: SocketAddr,
}

#[async_trait]
impl UpstreamChannel for HyperChannel {
    async fn send(&mut self, request: Request<AxumBody>) -> Result<UpstreamFrame, ForwardError> {
        let send_err = |e: hyper::Error, target: String| ForwardError::Send {
            target,
            reason: e.to_string(),
        };

        let (mut parts, body) = request.into_parts();
        parts.version = Version::HTTP_11;
        let request = Request::from_parts(parts, body);
        let target = format!("{} {}{}", request.method(), self.addr, request.uri());

        tracing::debug!("Sending request upstream: {target}");

        self.sender
            .ready()
            .await
            .map_err(|e| send_err(e, target.clone()))?;
        let response = self
            .sender
            .send_request(request)
            .await
            .map_err(|e| send_err(e, target.clone()))?;

        let (parts, body) = response.into_parts();
        let body = if body.is_end_stream() {
            None
        } else {
            Some(AxumBody::new(body))
        };

        Ok(UpstreamFrame::Answer(UpstreamResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        }))
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{HeaderMap, Method, Request, StatusCode};

use crate::core::{error::ForwardError, resolver::ResolvedTarget};

/// Status line, headers and optional body stream of an upstream answer.
///
/// Headers keep repeated names and their order as received. The body can be
/// consumed once.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<AxumBody>,
}

/// One frame read back from an upstream connection.
#[derive(Debug)]
pub enum UpstreamFrame {
    /// A status line with headers, the only frame a request may produce.
    Answer(UpstreamResponse),
    /// A request line; never valid in reply to a forwarded request.
    Request { method: Method, uri: String },
}

/// Opens connections to upstream servers.
#[async_trait]
pub trait UpstreamConnector: Send + Sync + 'static {
    /// Connect to `addr` on behalf of `target`. The target supplies the scheme
    /// and the name used for TLS server verification.
    async fn connect(
        &self,
        target: &ResolvedTarget,
        addr: SocketAddr,
    ) -> Result<Box<dyn UpstreamChannel>, ForwardError>;
}

/// An open upstream connection carrying one request at a time.
#[async_trait]
pub trait UpstreamChannel: Send + 'static {
    /// Write `request` and read back the answer head. The body, if any, is
    /// streamed through the returned frame.
    async fn send(&mut self, request: Request<AxumBody>) -> Result<UpstreamFrame, ForwardError>;

    /// Whether the connection can no longer carry requests.
    fn is_closed(&self) -> bool;
}

//! Forwarder: turns a resolved target and the live request into a deferred
//! upstream call.
//!
//! Address resolution happens while the request is being routed. The network
//! call itself is packaged in a [`DeferredResponse`] that only runs when the
//! host invokes it.
use std::{fmt, net::SocketAddr, sync::Arc};

use axum::body::Body as AxumBody;
use hyper::{HeaderMap, Method, Request, Uri};
use tracing::Instrument;

use crate::{
    core::{
        controller::RoutingState,
        error::{ForwardError, ProxyError},
        pipeline::{ClientConnection, Turn, UpstreamKey},
        resolver::ResolvedTarget,
        translator::{ProxiedResult, translate},
    },
    ports::{
        address_resolver::AddressResolver,
        upstream::{UpstreamConnector, UpstreamFrame},
    },
};

/// The request as received from the host, with the path already made
/// relative to the site mount point.
#[derive(Debug)]
pub struct IncomingRequest {
    pub method: Method,
    pub sub_path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: AxumBody,
}

impl IncomingRequest {
    /// Split an HTTP request; `sub_path` replaces the request path for matching.
    pub fn from_http(request: Request<AxumBody>, sub_path: impl Into<String>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method,
            sub_path: sub_path.into(),
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers,
            body,
        }
    }
}

/// How the upstream connection is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingMode {
    /// Reuse the client connection's keep-alive upstream connection.
    Pipelined,
    /// Fresh upstream connection for this request only.
    OneShot,
}

impl ForwardingMode {
    pub fn from_pipelining(pipelining: bool) -> Self {
        if pipelining {
            ForwardingMode::Pipelined
        } else {
            ForwardingMode::OneShot
        }
    }
}

impl fmt::Display for ForwardingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardingMode::Pipelined => f.write_str("pipelined"),
            ForwardingMode::OneShot => f.write_str("one-shot"),
        }
    }
}

/// Builds deferred upstream calls.
#[derive(Clone)]
pub struct Forwarder {
    resolver: Arc<dyn AddressResolver>,
    connector: Arc<dyn UpstreamConnector>,
}

impl Forwarder {
    pub fn new(resolver: Arc<dyn AddressResolver>, connector: Arc<dyn UpstreamConnector>) -> Self {
        Self {
            resolver,
            connector,
        }
    }

    /// Resolve the upstream address and package the call. Nothing is sent
    /// until [`DeferredResponse::invoke`] runs.
    pub async fn prepare(
        &self,
        target: ResolvedTarget,
        pipelining: bool,
        request: IncomingRequest,
        connection: &ClientConnection,
    ) -> Result<DeferredResponse, ForwardError> {
        // Taken in arrival order; dropped with the error if resolution fails.
        let turn = connection.sequencer().issue();

        let addr = self
            .resolver
            .resolve(&target.host, target.port)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ForwardError::Resolve {
                host: target.host.clone(),
                reason: "no addresses returned".to_string(),
            })?;

        let outbound = build_outbound(&target, request)?;

        tracing::debug!(
            upstream = %target,
            %addr,
            connection.id = connection.id(),
            ticket = turn.ticket(),
            "upstream call prepared"
        );

        Ok(DeferredResponse {
            connector: self.connector.clone(),
            connection: connection.clone(),
            mode: ForwardingMode::from_pipelining(pipelining),
            target,
            addr,
            request: outbound,
            turn,
        })
    }
}

/// Replay method, headers and body verbatim towards the resolved URI.
fn build_outbound(
    target: &ResolvedTarget,
    request: IncomingRequest,
) -> Result<Request<AxumBody>, ForwardError> {
    let path_and_query = match &request.query {
        Some(query) => format!("{}?{}", target.uri, query),
        None => target.uri.clone(),
    };
    let uri: Uri = path_and_query
        .parse()
        .map_err(|e| ForwardError::InvalidRequest(format!("upstream uri '{path_and_query}': {e}")))?;

    let mut outbound = Request::new(request.body);
    *outbound.method_mut() = request.method;
    *outbound.uri_mut() = uri;
    *outbound.headers_mut() = request.headers;
    Ok(outbound)
}

/// A prepared upstream call. Invoking it performs the network exchange and
/// translates the answer; it can be invoked at most once.
pub struct DeferredResponse {
    connector: Arc<dyn UpstreamConnector>,
    connection: ClientConnection,
    mode: ForwardingMode,
    target: ResolvedTarget,
    addr: SocketAddr,
    request: Request<AxumBody>,
    turn: Turn,
}

impl DeferredResponse {
    pub fn target(&self) -> &ResolvedTarget {
        &self.target
    }

    pub fn mode(&self) -> ForwardingMode {
        self.mode
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Position of this call in its client connection's pipeline.
    pub fn ticket(&self) -> u64 {
        self.turn.ticket()
    }

    /// Wait for the pipeline turn, send the request upstream and translate
    /// the answer.
    pub async fn invoke(self) -> Result<ProxiedResult, ProxyError> {
        let span = tracing::info_span!(
            "upstream_request",
            upstream.url = %self.target,
            upstream.addr = %self.addr,
            mode = %self.mode,
            connection.id = self.connection.id(),
            http.status_code = tracing::field::Empty,
        );

        async move {
            let frame = self.exchange().await.inspect_err(|e| {
                tracing::warn!(state = %RoutingState::Errored, error = %e, "upstream request failed");
            })?;
            tracing::trace!(state = %RoutingState::Translating);
            let result = translate(frame).inspect_err(|e| {
                tracing::warn!(state = %RoutingState::Errored, error = %e, "upstream answer rejected");
            })?;
            tracing::Span::current().record("http.status_code", result.status.as_u16());
            tracing::debug!(state = %RoutingState::Done, "upstream answered");
            Ok(result)
        }
        .instrument(span)
        .await
    }

    async fn exchange(self) -> Result<UpstreamFrame, ForwardError> {
        let DeferredResponse {
            connector,
            connection,
            mode,
            target,
            addr,
            request,
            turn,
        } = self;

        turn.wait().await;

        match mode {
            ForwardingMode::OneShot => {
                turn.hand_off();
                let mut channel = connector.connect(&target, addr).await?;
                channel.send(request).await
            }
            ForwardingMode::Pipelined => {
                let session = connection.session(UpstreamKey::from(&target)).await;
                let mut slot = session.lock().await;
                // Our place on the upstream socket is secured; later requests
                // queue behind this guard in order.
                turn.hand_off();

                let reusable = slot.take().filter(|channel| {
                    let open = !channel.is_closed();
                    if !open {
                        tracing::debug!(upstream = %target, "discarding closed upstream connection");
                    }
                    open
                });
                let mut channel = match reusable {
                    Some(channel) => channel,
                    None => connector.connect(&target, addr).await?,
                };

                let result = channel.send(request).await;
                // A failed exchange leaves the socket in an unknown state.
                if result.is_ok() {
                    *slot = Some(channel);
                }
                result
            }
        }
    }
}

impl fmt::Debug for DeferredResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredResponse")
            .field("target", &self.target)
            .field("addr", &self.addr)
            .field("mode", &self.mode)
            .field("ticket", &self.turn.ticket())
            .finish()
    }
}

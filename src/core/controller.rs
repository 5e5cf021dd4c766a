//! Routing controller: resolve, then prepare the forward, then report one of
//! the three host outcomes.
use std::fmt;

use crate::core::{
    error::ProxyError,
    forwarder::{DeferredResponse, Forwarder, IncomingRequest},
    pipeline::ClientConnection,
    resolver::{RoutingDecision, resolve_first},
    rule::RedirectionRule,
};

/// Where a request currently is in the routing state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingState {
    Start,
    Resolving,
    NotConcerned,
    Forwarding,
    Translating,
    Done,
    Errored,
}

impl fmt::Display for RoutingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoutingState::Start => "start",
            RoutingState::Resolving => "resolving",
            RoutingState::NotConcerned => "not_concerned",
            RoutingState::Forwarding => "forwarding",
            RoutingState::Translating => "translating",
            RoutingState::Done => "done",
            RoutingState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Result handed back to the host for one request.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// Invoke the producer to obtain the response.
    Found(DeferredResponse),
    /// No rule matched. The request is returned untouched for the next handler.
    NotConcerned(IncomingRequest),
    Error(ProxyError),
}

impl HandlerOutcome {
    pub fn state(&self) -> RoutingState {
        match self {
            HandlerOutcome::Found(_) => RoutingState::Forwarding,
            HandlerOutcome::NotConcerned(_) => RoutingState::NotConcerned,
            HandlerOutcome::Error(_) => RoutingState::Errored,
        }
    }
}

/// Orchestrates resolver, forwarder and translator for each request.
#[derive(Clone)]
pub struct RoutingController {
    forwarder: Forwarder,
}

impl RoutingController {
    pub fn new(forwarder: Forwarder) -> Self {
        Self { forwarder }
    }

    /// Pure decision step; no I/O.
    pub fn decide(
        &self,
        rules: &[RedirectionRule],
        sub_path: &str,
    ) -> Result<RoutingDecision, ProxyError> {
        Ok(resolve_first(rules, sub_path)?)
    }

    /// Route `request` against `rules` (declaration order, first match wins).
    pub async fn route(
        &self,
        rules: &[RedirectionRule],
        request: IncomingRequest,
        connection: &ClientConnection,
    ) -> HandlerOutcome {
        tracing::trace!(state = %RoutingState::Start, path = %request.sub_path);

        let decision = match self.decide(rules, &request.sub_path) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    state = %RoutingState::Errored,
                    path = %request.sub_path,
                    error = %e,
                    "matched revproxy rule produced an invalid target"
                );
                return HandlerOutcome::Error(e);
            }
        };

        let (target, pipelining) = match decision {
            RoutingDecision::NotConcerned => {
                tracing::debug!(
                    state = %RoutingState::NotConcerned,
                    path = %request.sub_path,
                    "no revproxy rule matched"
                );
                return HandlerOutcome::NotConcerned(request);
            }
            RoutingDecision::Forward { target, pipelining } => (target, pipelining),
        };

        match self
            .forwarder
            .prepare(target, pipelining, request, connection)
            .await
        {
            Ok(deferred) => {
                tracing::debug!(
                    state = %RoutingState::Forwarding,
                    upstream = %deferred.target(),
                    mode = %deferred.mode(),
                    "request routed"
                );
                HandlerOutcome::Found(deferred)
            }
            Err(e) => {
                tracing::warn!(state = %RoutingState::Errored, error = %e, "forwarding failed");
                HandlerOutcome::Error(e.into())
            }
        }
    }
}

//! revproxy - regex-driven reverse proxy routing.
//!
//! A site carries an ordered list of `revproxy` directives. Each directive
//! compiles to a rule matching the request path in full against a regular
//! expression and builds the upstream scheme, host, port and URI from its
//! capture groups. The first matching rule wins; a request no rule claims is
//! handed back untouched.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use arc_swap::ArcSwap;
//! use revproxy::{
//!     DnsResolver, Forwarder, HttpHandler, HyperUpstreamConnector, RoutingController, RuleTable,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = revproxy::config::load_config("revproxy.toml").await?;
//! let (table, _errors) = RuleTable::build(&config);
//! let forwarder = Forwarder::new(
//!     Arc::new(DnsResolver::new()),
//!     Arc::new(HyperUpstreamConnector::new()?),
//! );
//! let app = HttpHandler::new(
//!     Arc::new(ArcSwap::from_pointee(table)),
//!     RoutingController::new(forwarder),
//! )
//! .router();
//! # let _ = app;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! Routing logic lives in `core` and only talks to the network through the
//! traits in `ports`. `adapters` implements those traits with tokio, hyper
//! and rustls, and hosts the axum handler.
//!
//! # Pipelining
//! Every client connection gets a [`ClientConnection`] handle. Responses for
//! requests on one connection are produced in arrival order, and rules that
//! allow it reuse one upstream connection per upstream server.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{DnsResolver, FileConfigProvider, HttpHandler, HyperUpstreamConnector},
    core::{
        ClientConnection, Forwarder, HandlerOutcome, ProxyError, RedirectionRule,
        RoutingController, RuleTable,
    },
    utils::GracefulShutdown,
};

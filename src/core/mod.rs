pub mod controller;
pub mod error;
pub mod forwarder;
pub mod pipeline;
pub mod resolver;
pub mod rule;
pub mod rule_table;
pub mod template;
pub mod translator;

pub use controller::{HandlerOutcome, RoutingController, RoutingState};
pub use error::{ConfigError, ForwardError, ProxyError, RoutingError, TranslateError};
pub use forwarder::{DeferredResponse, Forwarder, ForwardingMode, IncomingRequest};
pub use pipeline::{ClientConnection, PipelineSequencer};
pub use resolver::{ResolvedTarget, RoutingDecision};
pub use rule::{RedirectionRule, Scheme};
pub use rule_table::{RuleTable, Site, SiteError};
pub use translator::ProxiedResult;

//! Error taxonomy for rule compilation and request handling.
//!
//! Configuration errors are raised while a rule set is being activated and
//! never reach a request. Everything else is a request-time failure that the
//! host renders through its own error path. A routing miss is not an error
//! and has no variant here.
use std::net::SocketAddr;

use hyper::StatusCode;
use thiserror::Error;

/// Load-time errors raised while turning directives into rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("missing attribute regexp for revproxy")]
    MissingRegexp,

    #[error("missing attribute server for revproxy")]
    MissingServer,

    #[error("missing attribute uri for revproxy")]
    MissingUri,

    /// The same attribute was given more than once.
    #[error("wrong attribute for revproxy: duplicate '{0}'")]
    DuplicateAttribute(String),

    #[error("wrong attribute for revproxy: unknown '{0}'")]
    UnknownAttribute(String),

    #[error("unrecognized element '{0}' in revproxy configuration")]
    UnrecognizedElement(String),

    #[error("malformed revproxy directive: {0}")]
    MalformedDirective(String),

    #[error("invalid value '{value}' for revproxy attribute '{attribute}'")]
    InvalidValue { attribute: String, value: String },

    #[error("invalid revproxy regexp '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// A rule matched but its target could not be built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RoutingError {
    #[error("port template '{template}' expanded to non-numeric port '{value}'")]
    InvalidPort { template: String, value: String },
}

/// Failures while reaching the upstream server.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ForwardError {
    #[error("failed to resolve upstream host '{host}': {reason}")]
    Resolve { host: String, reason: String },

    #[error("failed to connect to upstream {addr}: {reason}")]
    Connect { addr: SocketAddr, reason: String },

    #[error("upstream request to {target} failed: {reason}")]
    Send { target: String, reason: String },

    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),
}

/// The upstream returned something that is not an answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TranslateError {
    #[error("bad upstream answer: received {0} instead of a response")]
    BadAnswer(String),
}

/// Any request-time failure surfaced to the host.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error(transparent)]
    Translate(#[from] TranslateError),
}

impl ProxyError {
    /// Status the host should render for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Routing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Forward(ForwardError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            ProxyError::Forward(_) | ProxyError::Translate(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_attribute_messages() {
        assert!(
            ConfigError::DuplicateAttribute("server".into())
                .to_string()
                .starts_with("wrong attribute for revproxy")
        );
        assert!(
            ConfigError::UnknownAttribute("color".into())
                .to_string()
                .starts_with("wrong attribute for revproxy")
        );
    }

    #[test]
    fn test_status_mapping() {
        let bad_port: ProxyError = RoutingError::InvalidPort {
            template: "$1".into(),
            value: "abc".into(),
        }
        .into();
        assert_eq!(bad_port.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let resolve: ProxyError = ForwardError::Resolve {
            host: "nowhere".into(),
            reason: "no addresses".into(),
        }
        .into();
        assert_eq!(resolve.status_code(), StatusCode::BAD_GATEWAY);

        let answer: ProxyError = TranslateError::BadAnswer("a request frame".into()).into();
        assert_eq!(answer.status_code(), StatusCode::BAD_GATEWAY);
    }
}

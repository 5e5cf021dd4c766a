//! Matcher / target resolver.
//!
//! Pure and synchronous: applies rule patterns to a request sub-path and
//! builds the upstream target from the rule templates. A miss is reported as
//! [`RoutingDecision::NotConcerned`], never as an error.
use std::fmt;

use crate::core::{
    error::RoutingError,
    rule::{RedirectionRule, Scheme},
    template::{Occurrences, expand},
};

/// Where a matched request is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Always starts with `/`.
    pub uri: String,
}

impl ResolvedTarget {
    /// `host:port` as used for address resolution.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}{}", self.scheme, self.host, self.port, self.uri)
    }
}

/// Outcome of matching one request against a rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    NotConcerned,
    Forward {
        target: ResolvedTarget,
        pipelining: bool,
    },
}

impl RoutingDecision {
    pub fn is_not_concerned(&self) -> bool {
        matches!(self, RoutingDecision::NotConcerned)
    }
}

/// Apply a single rule to `path`.
pub fn resolve(rule: &RedirectionRule, path: &str) -> Result<RoutingDecision, RoutingError> {
    let Some(caps) = rule.pattern().captures(path) else {
        return Ok(RoutingDecision::NotConcerned);
    };

    let host = expand(rule.host_template(), &caps, Occurrences::First);
    let port_str = expand(rule.port_template(), &caps, Occurrences::All);
    let uri = expand(rule.uri_template(), &caps, Occurrences::All);

    // Digits only: `u16::from_str` would also take a leading `+`.
    let digits = !port_str.is_empty() && port_str.bytes().all(|b| b.is_ascii_digit());
    let port = match port_str.parse::<u16>() {
        Ok(port) if digits && port != 0 => port,
        _ => {
            return Err(RoutingError::InvalidPort {
                template: rule.port_template().to_string(),
                value: port_str,
            });
        }
    };

    // The separator is always added, so `uri="/$1"` yields `//…`.
    let uri = format!("/{uri}");

    Ok(RoutingDecision::Forward {
        target: ResolvedTarget {
            scheme: rule.scheme(),
            host,
            port,
            uri,
        },
        pipelining: rule.pipelining(),
    })
}

/// Evaluate `rules` in declaration order; the first match wins.
pub fn resolve_first<'r, I>(rules: I, path: &str) -> Result<RoutingDecision, RoutingError>
where
    I: IntoIterator<Item = &'r RedirectionRule>,
{
    for rule in rules {
        let decision = resolve(rule, path)?;
        if !decision.is_not_concerned() {
            tracing::debug!(pattern = rule.source(), path, "revproxy rule matched");
            return Ok(decision);
        }
    }
    Ok(RoutingDecision::NotConcerned)
}

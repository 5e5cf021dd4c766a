//! Rule compiler: one `revproxy` directive becomes one immutable
//! [`RedirectionRule`].
use std::{fmt, str::FromStr};

use regex::Regex;

use crate::{config::directive::Directive, core::error::ConfigError};

const ATTR_REGEXP: &str = "regexp";
const ATTR_SERVER: &str = "server";
const ATTR_URI: &str = "uri";
const ATTR_PROTOCOL: &str = "protocol";
const ATTR_PORT: &str = "port";
const ATTR_NOPIPELINE: &str = "nopipeline";

/// Upstream transport scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl FromStr for Scheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("http") {
            Ok(Scheme::Http)
        } else if s.eq_ignore_ascii_case("https") {
            Ok(Scheme::Https)
        } else {
            Err(ConfigError::InvalidValue {
                attribute: ATTR_PROTOCOL.to_string(),
                value: s.to_string(),
            })
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled routing rule. Built once per configuration generation and
/// shared read-only by every request.
#[derive(Debug, Clone)]
pub struct RedirectionRule {
    source: String,
    pattern: Regex,
    scheme: Scheme,
    host_template: String,
    port_template: String,
    uri_template: String,
    pipelining: bool,
}

impl RedirectionRule {
    /// Compile a directive. Never performs I/O.
    pub fn compile(directive: &Directive) -> Result<Self, ConfigError> {
        if directive.element != crate::config::directive::REVPROXY_ELEMENT {
            return Err(ConfigError::UnrecognizedElement(directive.element.clone()));
        }

        let mut regexp = None;
        let mut server = None;
        let mut uri = None;
        let mut protocol = None;
        let mut port = None;
        let mut nopipeline = None;

        for attr in &directive.attributes {
            let slot = match attr.name.as_str() {
                ATTR_REGEXP => &mut regexp,
                ATTR_SERVER => &mut server,
                ATTR_URI => &mut uri,
                ATTR_PROTOCOL => &mut protocol,
                ATTR_PORT => &mut port,
                ATTR_NOPIPELINE => &mut nopipeline,
                other => return Err(ConfigError::UnknownAttribute(other.to_string())),
            };
            if slot.replace(attr.value.as_str()).is_some() {
                return Err(ConfigError::DuplicateAttribute(attr.name.clone()));
            }
        }

        let source = non_empty(regexp).ok_or(ConfigError::MissingRegexp)?;
        let host_template = non_empty(server).ok_or(ConfigError::MissingServer)?;
        let uri_template = non_empty(uri).ok_or(ConfigError::MissingUri)?;

        let scheme = protocol.map(Scheme::from_str).transpose()?.unwrap_or_default();

        let pipelining = match nopipeline {
            None => true,
            Some(ATTR_NOPIPELINE) => false,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    attribute: ATTR_NOPIPELINE.to_string(),
                    value: other.to_string(),
                });
            }
        };

        let port_template = port
            .map(str::to_string)
            .unwrap_or_else(|| scheme.default_port().to_string());

        // Anchor the whole pattern so a rule never matches a mere prefix.
        let pattern =
            Regex::new(&format!("^(?:{source})$")).map_err(|e| ConfigError::InvalidPattern {
                pattern: source.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            source: source.to_string(),
            pattern,
            scheme,
            host_template: host_template.to_string(),
            port_template,
            uri_template: uri_template.to_string(),
            pipelining,
        })
    }

    /// The pattern as configured, without the implicit anchors.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host_template(&self) -> &str {
        &self.host_template
    }

    pub fn port_template(&self) -> &str {
        &self.port_template
    }

    pub fn uri_template(&self) -> &str {
        &self.uri_template
    }

    pub fn pipelining(&self) -> bool {
        self.pipelining
    }
}

impl FromStr for RedirectionRule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(&Directive::parse(s)?)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

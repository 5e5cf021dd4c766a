//! Configuration data structures.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and
//! carry defaults so that minimal configs stay short. Routing rules are kept
//! as directive lines and compiled by [`crate::core::RuleTable::build`].
use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_mount() -> String {
    "/".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProxyConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub vhosts: Vec<VirtualHostConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProxyConfig {
    /// Create a new proxy configuration builder
    pub fn builder() -> ProxyConfigBuilder {
        ProxyConfigBuilder::default()
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            vhosts: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

/// One site: the host names it answers for, where it is mounted, and its
/// `revproxy` directives in declaration order.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VirtualHostConfig {
    pub name: String,
    /// Host names served; empty or `"*"` makes this a default site.
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default = "default_mount")]
    pub mount: String,
    /// Directive lines, e.g. `revproxy regexp="/(.*)" server="up" uri="$1"`.
    #[serde(default)]
    pub rules: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: true,
        }
    }
}

/// Builder for ProxyConfig
#[derive(Default)]
pub struct ProxyConfigBuilder {
    listen_addr: Option<String>,
    vhosts: Vec<VirtualHostConfig>,
    logging: Option<LoggingConfig>,
}

impl ProxyConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    /// Add a default site (any host) mounted at `mount`.
    pub fn site<I, S>(self, name: impl Into<String>, mount: impl Into<String>, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vhost(VirtualHostConfig {
            name: name.into(),
            hosts: Vec::new(),
            mount: mount.into(),
            rules: rules.into_iter().map(Into::into).collect(),
        })
    }

    pub fn vhost(mut self, vhost: VirtualHostConfig) -> Self {
        self.vhosts.push(vhost);
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Build the final ProxyConfig
    pub fn build(self) -> Result<ProxyConfig, String> {
        if self.vhosts.is_empty() {
            return Err("At least one vhost must be configured".to_string());
        }

        Ok(ProxyConfig {
            listen_addr: self.listen_addr.unwrap_or_else(default_listen_addr),
            vhosts: self.vhosts,
            logging: self.logging.unwrap_or_default(),
        })
    }
}

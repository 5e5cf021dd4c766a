//! Compiled rule sets, one per configuration generation.
//!
//! `RuleTable` pairs every configured site with its compiled rules and does
//! the host-side dispatch: pick the site for a Host header and strip its
//! mount point to get the sub-path the rules are matched against. A table is
//! never mutated; a reload builds a new one.
use thiserror::Error;

use crate::{
    config::{directive::Directive, models::ProxyConfig},
    core::{error::ConfigError, rule::RedirectionRule},
};

/// A rule that failed to compile, which keeps its whole site inactive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("site '{site}' rule #{rule}: {error}")]
pub struct SiteError {
    pub site: String,
    /// 1-based position of the directive within the site.
    pub rule: usize,
    pub error: ConfigError,
}

/// An activated site.
#[derive(Debug, Clone)]
pub struct Site {
    name: String,
    hosts: Vec<String>,
    mount: String,
    rules: Vec<RedirectionRule>,
}

impl Site {
    pub fn new(
        name: impl Into<String>,
        hosts: Vec<String>,
        mount: impl Into<String>,
        rules: Vec<RedirectionRule>,
    ) -> Self {
        let mount = mount.into();
        Self {
            name: name.into(),
            hosts: hosts
                .into_iter()
                .map(|h| h.to_ascii_lowercase())
                .filter(|h| h != "*")
                .collect(),
            mount: normalize_mount(&mount),
            rules,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// Rules in declaration order.
    pub fn rules(&self) -> &[RedirectionRule] {
        &self.rules
    }

    /// Serves requests for any host name.
    pub fn is_default(&self) -> bool {
        self.hosts.is_empty()
    }

    fn serves_host(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h == host)
    }

    /// Path relative to the mount point, or `None` if outside of it.
    fn sub_path(&self, path: &str) -> Option<String> {
        if self.mount == "/" {
            return Some(path.to_string());
        }
        let rest = path.strip_prefix(self.mount.as_str())?;
        if rest.is_empty() {
            Some("/".to_string())
        } else if rest.starts_with('/') {
            Some(rest.to_string())
        } else {
            None
        }
    }
}

/// All activated sites of one configuration generation.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    sites: Vec<Site>,
}

impl RuleTable {
    pub fn new(sites: Vec<Site>) -> Self {
        Self { sites }
    }

    /// Compile every site of `config`. Sites with a bad directive are left
    /// out and their errors returned; the remaining sites are activated.
    pub fn build(config: &ProxyConfig) -> (Self, Vec<SiteError>) {
        let mut sites = Vec::with_capacity(config.vhosts.len());
        let mut errors = Vec::new();

        for vhost in &config.vhosts {
            let mut rules = Vec::with_capacity(vhost.rules.len());
            let mut site_errors = Vec::new();

            for (index, line) in vhost.rules.iter().enumerate() {
                match Directive::parse(line).and_then(|d| RedirectionRule::compile(&d)) {
                    Ok(rule) => rules.push(rule),
                    Err(error) => site_errors.push(SiteError {
                        site: vhost.name.clone(),
                        rule: index + 1,
                        error,
                    }),
                }
            }

            if site_errors.is_empty() {
                tracing::info!(
                    site = %vhost.name,
                    mount = %vhost.mount,
                    rules = rules.len(),
                    "revproxy site activated"
                );
                sites.push(Site::new(
                    vhost.name.clone(),
                    vhost.hosts.clone(),
                    vhost.mount.clone(),
                    rules,
                ));
            } else {
                for e in &site_errors {
                    tracing::error!("{e}; site not activated");
                }
                errors.append(&mut site_errors);
            }
        }

        (Self { sites }, errors)
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn rule_count(&self) -> usize {
        self.sites.iter().map(|s| s.rules.len()).sum()
    }

    /// Find the site serving `host` and `path`, with the sub-path to match.
    ///
    /// Sites naming the host win over default sites; among candidates the
    /// longest mount point wins.
    pub fn site_for(&self, host: Option<&str>, path: &str) -> Option<(&Site, String)> {
        let host = host.map(normalize_host);

        let named = host
            .as_deref()
            .and_then(|h| Self::longest_mount(self.sites.iter().filter(|s| s.serves_host(h)), path));

        named.or_else(|| Self::longest_mount(self.sites.iter().filter(|s| s.is_default()), path))
    }

    fn longest_mount<'a>(
        sites: impl Iterator<Item = &'a Site>,
        path: &str,
    ) -> Option<(&'a Site, String)> {
        sites
            .filter_map(|site| site.sub_path(path).map(|sub| (site, sub)))
            .max_by_key(|(site, _)| site.mount.len())
    }
}

/// Lowercase and drop any `:port`, keeping bracketed IPv6 literals intact.
fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = if let Some(rest) = host.strip_prefix('[') {
        rest.split_once(']').map_or(host, |(addr, _)| addr)
    } else {
        host.rsplit_once(':')
            .filter(|(_, port)| port.bytes().all(|b| b.is_ascii_digit()))
            .map_or(host, |(name, _)| name)
    };
    without_port.to_ascii_lowercase()
}

fn normalize_mount(mount: &str) -> String {
    let trimmed = mount.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

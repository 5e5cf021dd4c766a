use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::lookup_host;

use crate::{core::error::ForwardError, ports::address_resolver::AddressResolver};

/// Resolves upstream hosts through the system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

impl DnsResolver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AddressResolver for DnsResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, ForwardError> {
        let addrs: Vec<SocketAddr> = lookup_host((host, port))
            .await
            .map_err(|e| ForwardError::Resolve {
                host: host.to_string(),
                reason: e.to_string(),
            })?
            .collect();

        tracing::debug!(host, port, resolved = addrs.len(), "upstream host resolved");

        if addrs.is_empty() {
            return Err(ForwardError::Resolve {
                host: host.to_string(),
                reason: "no addresses returned".to_string(),
            });
        }
        Ok(addrs)
    }
}

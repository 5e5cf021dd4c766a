use std::net::SocketAddr;

use async_trait::async_trait;

use crate::core::error::ForwardError;

/// Turns an upstream host name into socket addresses.
#[async_trait]
pub trait AddressResolver: Send + Sync + 'static {
    /// Resolve `host` for `port`. An empty list is a resolution failure.
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, ForwardError>;
}

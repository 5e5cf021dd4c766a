//! Ports: the seams between routing logic and the outside world.
pub mod address_resolver;
pub mod config_provider;
pub mod upstream;

pub use address_resolver::AddressResolver;
pub use config_provider::{ChangeKind, ConfigChange, ConfigProvider};
pub use upstream::{UpstreamChannel, UpstreamConnector, UpstreamFrame, UpstreamResponse};

pub mod config_providers;
pub mod dns;
pub mod http_handler;
pub mod upstream;

/// Re-export commonly used types from adapters
pub use config_providers::FileConfigProvider;
pub use dns::DnsResolver;
pub use http_handler::HttpHandler;
pub use upstream::HyperUpstreamConnector;

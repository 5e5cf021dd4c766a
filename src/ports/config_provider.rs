use std::{fmt, path::PathBuf};

use async_trait::async_trait;
use eyre::Result;
use tokio::sync::mpsc;

use crate::config::models::ProxyConfig;

/// What happened to a watched configuration source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Created => f.write_str("created"),
            ChangeKind::Modified => f.write_str("modified"),
            ChangeKind::Removed => f.write_str("removed"),
        }
    }
}

/// One observed change, naming the path that triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Source of the proxy configuration.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Load the current configuration.
    async fn load_config(&self) -> Result<ProxyConfig>;

    /// Changes to the source; each one should be answered with `load_config`.
    /// Returns `None` once the receiver has been taken.
    fn watch(&self) -> Option<mpsc::Receiver<ConfigChange>>;
}

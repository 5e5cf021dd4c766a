use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use eyre::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::{
    config::{loader::load_config, models::ProxyConfig},
    ports::config_provider::{ChangeKind, ConfigChange, ConfigProvider},
};

/// Events beyond this many queued changes are dropped.
const CHANGE_QUEUE: usize = 4;

/// Loads the proxy configuration from a local file and reports changes to it.
pub struct FileConfigProvider {
    path: PathBuf,
    // Dropping the watcher stops notifications.
    _watcher: RecommendedWatcher,
    changes: Mutex<Option<mpsc::Receiver<ConfigChange>>>,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file_name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("Invalid config path: {}", path.display()))?
            .to_owned();
        let (tx, rx) = mpsc::channel(CHANGE_QUEUE);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            on_event(res, &file_name, &tx)
        })?;
        let dir = watch_dir(&path);
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .wrap_err_with(|| format!("Failed to watch config directory {}", dir.display()))?;
        tracing::debug!(path = %path.display(), dir = %dir.display(), "config watch registered");

        Ok(Self {
            path,
            _watcher: watcher,
            changes: Mutex::new(Some(rx)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn on_event(res: notify::Result<Event>, file_name: &OsStr, tx: &mpsc::Sender<ConfigChange>) {
    match res {
        Ok(event) => {
            if let Some(change) = config_change(&event, file_name) {
                tracing::debug!(
                    path = %change.path.display(),
                    kind = %change.kind,
                    "config file event"
                );
                // A full queue already holds a pending reload.
                let _ = tx.try_send(change);
            }
        }
        Err(e) => tracing::error!("File watch error: {e}"),
    }
}

/// The directory holding `path`; a bare file name lives in the working directory.
fn watch_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Map a directory event to a change of the config file, ignoring siblings
/// and access-only events.
fn config_change(event: &Event, file_name: &OsStr) -> Option<ConfigChange> {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Remove(_) => ChangeKind::Removed,
        _ => return None,
    };
    let path = event
        .paths
        .iter()
        .find(|p| p.file_name() == Some(file_name))?;
    Some(ConfigChange {
        path: path.clone(),
        kind,
    })
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load_config(&self) -> Result<ProxyConfig> {
        let path_str = self
            .path
            .to_str()
            .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", self.path.display()))?;
        load_config(path_str).await
    }

    fn watch(&self) -> Option<mpsc::Receiver<ConfigChange>> {
        match self.changes.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

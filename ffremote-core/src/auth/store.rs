use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::basic::Credentials;
use super::htpasswd::{Htpasswd, HtpasswdError, HtpasswdResult};

/// An htpasswd file that is re-read whenever its modification time changes.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    state: RwLock<Snapshot>,
}

#[derive(Debug)]
struct Snapshot {
    modified: Option<SystemTime>,
    entries: Htpasswd,
}

impl CredentialStore {
    /// Loads `path`. A missing file is not an error: the store stays empty,
    /// and therefore open, until the file appears.
    pub async fn open(path: impl Into<PathBuf>) -> HtpasswdResult<Self> {
        let path = path.into();
        let (modified, entries) = match tokio::fs::metadata(&path).await {
            Ok(metadata) => {
                let entries = Htpasswd::parse(&tokio::fs::read_to_string(&path).await?)?;
                debug!(path = %path.display(), users = entries.len(), "credential file loaded");
                (metadata.modified().ok(), entries)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no credential file yet");
                (None, Htpasswd::default())
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            state: RwLock::new(Snapshot { modified, entries }),
        })
    }

    /// A fixed set of entries that is never reloaded.
    pub fn from_entries(entries: Htpasswd) -> Self {
        Self {
            path: PathBuf::new(),
            state: RwLock::new(Snapshot {
                modified: None,
                entries,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether requests must authenticate. An empty or absent file leaves
    /// the worker open.
    pub async fn is_enabled(&self) -> bool {
        self.refresh().await;
        !self.state.read().await.entries.is_empty()
    }

    pub async fn validate(&self, credentials: &Credentials) -> bool {
        self.refresh().await;
        self.state
            .read()
            .await
            .entries
            .contains(&credentials.user, &credentials.password)
    }

    async fn refresh(&self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        let modified = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata.modified().ok(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "credential file unavailable");
                return;
            }
        };
        if modified == self.state.read().await.modified {
            return;
        }

        let mut state = self.state.write().await;
        if modified == state.modified {
            return;
        }
        if modified.is_none() {
            debug!(path = %self.path.display(), "credential file removed");
            state.entries = Htpasswd::default();
            state.modified = None;
            return;
        }
        let loaded = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(HtpasswdError::from)
            .and_then(|text| Htpasswd::parse(&text));
        match loaded {
            Ok(entries) => {
                debug!(path = %self.path.display(), users = entries.len(), "credential file reloaded");
                state.entries = entries;
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "keeping previous credentials");
            }
        }
        state.modified = modified;
    }
}

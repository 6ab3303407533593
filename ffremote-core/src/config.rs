use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:5000";
pub const DEFAULT_TRANSCODER: &str = "ffmpeg";
pub const DEFAULT_HTPASSWD: &str = ".htpasswd";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct WorkerConfig {
    pub server: ServerSection,
    pub transcoder: TranscoderSection,
    pub storage: StorageSection,
    pub auth: AuthSection,
    pub session: SessionSection,
}

impl WorkerConfig {
    /// Directory that receives per-session output files.
    pub fn temp_dir(&self) -> PathBuf {
        self.storage
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen: SocketAddr,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 5000)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscoderSection {
    pub program: PathBuf,
}

impl Default for TranscoderSection {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_TRANSCODER),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub htpasswd: Option<PathBuf>,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            htpasswd: Some(PathBuf::from(DEFAULT_HTPASSWD)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub input_timeout_seconds: u64,
    pub stderr_drain_seconds: u64,
}

impl SessionSection {
    pub fn input_timeout(&self) -> Duration {
        Duration::from_secs(self.input_timeout_seconds)
    }

    pub fn stderr_drain(&self) -> Duration {
        Duration::from_secs(self.stderr_drain_seconds)
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            input_timeout_seconds: 30,
            stderr_drain_seconds: 5,
        }
    }
}

pub fn load_worker_config<P: AsRef<Path>>(path: P) -> Result<WorkerConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/worker.toml");
        let config = load_worker_config(path).expect("worker.toml should parse");
        assert_eq!(config.server.listen, SocketAddr::from(([0, 0, 0, 0], 5000)));
        assert_eq!(config.transcoder.program, PathBuf::from("ffmpeg"));
        assert_eq!(config.session.input_timeout(), Duration::from_secs(30));
        assert_eq!(config.auth.htpasswd, Some(PathBuf::from(".htpasswd")));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config: WorkerConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.listen.to_string(), DEFAULT_LISTEN);
        assert_eq!(config.session.stderr_drain_seconds, 5);
        assert!(config.storage.temp_dir.is_none());
        assert_eq!(config.temp_dir(), std::env::temp_dir());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_worker_config("/nonexistent/worker.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/worker.toml"));
    }
}

pub mod args;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod proxy;
pub mod registry;
pub mod session;
pub mod signal;
pub mod staging;
pub mod supervisor;
pub mod worker;

pub use args::{translate, ArgumentError, ArgumentResult, Invocation};
pub use auth::{CredentialStore, Credentials, Htpasswd, HtpasswdError};
pub use client::{Client, ClientError, ClientResult};
pub use config::{load_worker_config, WorkerConfig};
pub use error::{ConfigError, Result};
pub use proxy::{ByteRange, ProxyError, RangeSpec, VirtualFile};
pub use registry::Registry;
pub use session::{Session, SessionGuard, SessionState, SessionTable};
pub use signal::{Completion, Outcome};
pub use staging::StagedOutput;
pub use supervisor::{Captured, LaunchedProcess, Launcher, ProcessHandle, SystemLauncher};
pub use worker::{Worker, WorkerError, WorkerResult};

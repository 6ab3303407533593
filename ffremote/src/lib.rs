use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use dialoguer::Confirm;
use ffremote_core::args::{log_level, translate, ArgumentError};
use ffremote_core::auth::{CredentialStore, HtpasswdError};
use ffremote_core::client::{Client, ClientError};
use ffremote_core::worker::{Worker, WorkerError};
use ffremote_core::{load_worker_config, ConfigError, WorkerConfig};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub type Result<T> = std::result::Result<T, AppError>;

pub const USAGE: &str = "usage: ffremote [-w http://host:port/] [options] [[infile options] -i infile]... {[outfile options] outfile}...
       ffremote worker [--config FILE] [--listen ADDR] [--transcoder PATH] [--htpasswd FILE] [--temp-dir DIR]";

/// Exit code after an interrupt from the caller's terminal.
pub const INTERRUPTED: i32 = 130;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential file error: {0}")]
    Credentials(#[from] HtpasswdError),
    #[error(transparent)]
    Argument(#[from] ArgumentError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),
}

impl AppError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Client(ClientError::Canceled) => INTERRUPTED,
            _ => 1,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "ffremote worker", version, about = "Runs transcoder sessions for remote callers", long_about = None)]
pub struct WorkerCli {
    /// Worker configuration file; defaults apply when it does not exist
    #[arg(long, default_value = "configs/worker.toml")]
    pub config: PathBuf,
    /// Address to listen on (overrides server.listen)
    #[arg(long)]
    pub listen: Option<SocketAddr>,
    /// Transcoder binary (overrides transcoder.program)
    #[arg(long)]
    pub transcoder: Option<PathBuf>,
    /// Apache htpasswd file (overrides auth.htpasswd)
    #[arg(long)]
    pub htpasswd: Option<PathBuf>,
    /// Directory for staged outputs (overrides storage.temp_dir)
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,
}

impl WorkerCli {
    pub fn load_config(&self) -> Result<WorkerConfig> {
        let mut config = if self.config.exists() {
            load_worker_config(&self.config)?
        } else {
            WorkerConfig::default()
        };
        if let Some(listen) = self.listen {
            config.server.listen = listen;
        }
        if let Some(program) = &self.transcoder {
            config.transcoder.program = program.clone();
        }
        if let Some(htpasswd) = &self.htpasswd {
            config.auth.htpasswd = Some(htpasswd.clone());
        }
        if let Some(temp_dir) = &self.temp_dir {
            config.storage.temp_dir = Some(temp_dir.clone());
        }
        Ok(config)
    }
}

/// Installs the stderr subscriber. `RUST_LOG` overrides `default`.
pub fn init_logging(default: LevelFilter) {
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Caller arguments that only make sense as a request for usage.
pub fn wants_usage(args: &[String]) -> bool {
    args.is_empty() || (args.len() == 2 && args[0] == "-w")
}

/// Log filter for caller mode, following the transcoder's own `-loglevel`.
pub fn client_log_level(args: &[String]) -> LevelFilter {
    log_level(args).unwrap_or(LevelFilter::WARN)
}

pub async fn run_worker(cli: WorkerCli) -> Result<()> {
    let config = cli.load_config()?;
    let credentials = match &config.auth.htpasswd {
        Some(path) => Some(CredentialStore::open(path.clone()).await?),
        None => None,
    };
    if credentials.is_none() {
        warn!("no credential file configured; authentication disabled");
    }

    let listener = TcpListener::bind(config.server.listen).await?;
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            trigger.cancel();
        }
    });

    Worker::new(config)
        .with_credentials(credentials)
        .serve(listener, shutdown)
        .await?;
    Ok(())
}

/// Runs one transcoder command line on a worker and returns its exit code.
pub async fn run_client(args: Vec<String>) -> Result<i32> {
    let invocation = translate(args)?;
    invocation.verify_local_files(confirm_overwrite)?;
    let client = Client::new(&invocation)?;

    if invocation.is_printing() {
        let (stdout, stderr) = client.query(&invocation).await?;
        print!("{stdout}");
        eprint!("{stderr}");
        return Ok(0);
    }

    let client = client.with_stdin(tokio::io::stdin());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let mut progress = false;
    let code = client
        .run(&invocation, &cancel, |line| progress |= print_status(line))
        .await?;
    if progress {
        eprintln!();
    }
    Ok(code)
}

/// Prints one status line; progress lines overwrite each other. Returns
/// whether the line was progress.
fn print_status(line: &str) -> bool {
    let mut stderr = std::io::stderr().lock();
    let progress = line.starts_with("frame=");
    let _ = if progress {
        write!(stderr, "\r{line}")
    } else {
        writeln!(stderr, "{line}")
    };
    let _ = stderr.flush();
    progress
}

fn confirm_overwrite(path: &Path) -> bool {
    Confirm::new()
        .with_prompt(format!("File '{}' already exists. Overwrite?", path.display()))
        .default(false)
        .interact()
        .unwrap_or(false)
}

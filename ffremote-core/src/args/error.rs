use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// Argument problems, reported verbatim to the caller.
#[derive(Debug, Error)]
pub enum ArgumentError {
    #[error("Standard I/O is not supported.")]
    StandardStream,
    #[error("Unsupported option '{0}'.")]
    Unsupported(String),
    #[error("Missing argument for option '{0}'.")]
    MissingValue(String),
    #[error("'{0}' is not a valid URI.")]
    InvalidEndpoint(String),
    #[error("At least one output file must be specified")]
    NoOutputs,
    #[error("Output file #0 does not contain any stream")]
    NoInputs,
    #[error("{}: No such file or directory", .0.display())]
    MissingInput(PathBuf),
    #[error("File '{}' already exists. Exiting.", .0.display())]
    OutputExists(PathBuf),
    #[error("Not overwriting - exiting")]
    NotOverwriting,
    #[error("Invalid arguments")]
    Invalid,
    #[error("'{0}' is not a valid input ID")]
    InvalidInputId(String),
    #[error("'{0}' is not a valid output ID")]
    InvalidOutputId(String),
    #[error("{kind} ID conflicted: {id}")]
    Conflict { kind: &'static str, id: Uuid },
    #[error("Input {0} did not connect")]
    InputNotConnected(Uuid),
}

pub type ArgumentResult<T> = Result<T, ArgumentError>;

use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;
use uuid::Uuid;

use super::error::{ArgumentError, ArgumentResult};
use super::options::{
    is_null_device, is_print_option, is_unary_option, is_unsupported_option, option_name,
    STANDARD_STREAM, WIRE_NULL_DEVICE,
};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:5000/";

/// A local input file and the placeholder sent in its place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInput {
    pub path: PathBuf,
    pub id: Uuid,
    pub placeholder: String,
}

/// A local output. `path` is `None` for the null device, which is never
/// downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalOutput {
    pub path: Option<PathBuf>,
    pub id: Option<Uuid>,
    pub placeholder: String,
}

/// A caller command line after translation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub endpoint: Url,
    pub arguments: Vec<String>,
    pub inputs: Vec<LocalInput>,
    pub outputs: Vec<LocalOutput>,
    /// `Some(true)` for `-y`, `Some(false)` for `-n`.
    pub overwrite: Option<bool>,
    pub relay_stdin: bool,
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn is_printing(&self) -> bool {
        self.arguments.iter().any(|arg| is_print_option(arg))
    }

    /// Print options joined the way the worker's query parameter expects.
    pub fn query(&self) -> String {
        self.arguments.join(" ")
    }

    /// Checks local files before any network activity. `confirm` is asked
    /// about existing outputs when neither `-y` nor `-n` was given.
    pub fn verify_local_files<F>(&self, mut confirm: F) -> ArgumentResult<()>
    where
        F: FnMut(&Path) -> bool,
    {
        if self.is_printing() {
            return Ok(());
        }
        if self.outputs.is_empty() {
            return Err(ArgumentError::NoOutputs);
        }
        if self.inputs.is_empty() {
            return Err(ArgumentError::NoInputs);
        }
        for input in &self.inputs {
            if !input.path.is_file() {
                return Err(ArgumentError::MissingInput(input.path.clone()));
            }
        }
        for path in self.outputs.iter().filter_map(|output| output.path.as_deref()) {
            if !path.exists() || self.overwrite == Some(true) {
                continue;
            }
            if self.overwrite == Some(false) {
                return Err(ArgumentError::OutputExists(path.to_path_buf()));
            }
            if !confirm(path) {
                return Err(ArgumentError::NotOverwriting);
            }
        }
        Ok(())
    }
}

/// Translates a transcoder command line into the form sent to a worker.
///
/// Local paths are replaced by `{id}{extension}` placeholders; the worker
/// endpoint (`-w`) and the overwrite flags are consumed here.
pub fn translate<I, S>(args: I) -> ArgumentResult<Invocation>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    let mut endpoint = parse_endpoint(DEFAULT_ENDPOINT)?;
    let mut arguments = Vec::new();
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    let mut overwrite = None;
    let mut relay_stdin = true;
    let mut timeout = None;

    let mut index = 0;
    while index < args.len() {
        let arg = &args[index];
        index += 1;
        if arg == STANDARD_STREAM {
            return Err(ArgumentError::StandardStream);
        }
        if !arg.starts_with('-') {
            if is_null_device(arg) {
                outputs.push(LocalOutput {
                    path: None,
                    id: None,
                    placeholder: WIRE_NULL_DEVICE.to_string(),
                });
                arguments.push("-y".to_string());
                arguments.push(WIRE_NULL_DEVICE.to_string());
            } else {
                let id = Uuid::new_v4();
                let placeholder = placeholder(id, arg);
                arguments.push(placeholder.clone());
                outputs.push(LocalOutput {
                    path: Some(PathBuf::from(arg)),
                    id: Some(id),
                    placeholder,
                });
            }
            continue;
        }

        let option = arg.clone();
        if is_unsupported_option(&option) {
            return Err(ArgumentError::Unsupported(
                option_name(&option).trim_start_matches('-').to_string(),
            ));
        }
        match option.as_str() {
            "-h" | "-?" | "-help" | "--help" => {
                arguments.push(option);
                if let Some(topic) = args.get(index).filter(|next| !next.starts_with('-')) {
                    arguments.push(topic.clone());
                    index += 1;
                }
                continue;
            }
            "-y" => {
                overwrite = Some(true);
                continue;
            }
            "-n" => {
                overwrite = Some(false);
                continue;
            }
            "-nostdin" => relay_stdin = false,
            _ => {}
        }
        if is_print_option(&option) || is_unary_option(&option) {
            arguments.push(option);
            continue;
        }

        let Some(value) = args.get(index).cloned() else {
            return Err(ArgumentError::MissingValue(
                option.trim_start_matches('-').to_string(),
            ));
        };
        index += 1;
        match option.as_str() {
            "-w" => endpoint = parse_endpoint(&value)?,
            "-i" => {
                if value == STANDARD_STREAM {
                    return Err(ArgumentError::StandardStream);
                }
                let id = Uuid::new_v4();
                let placeholder = placeholder(id, &value);
                arguments.push(option);
                arguments.push(placeholder.clone());
                inputs.push(LocalInput {
                    path: PathBuf::from(value),
                    id,
                    placeholder,
                });
            }
            "-rw_timeout" => {
                if let Ok(micros) = value.parse::<f64>() {
                    if micros.is_finite() && micros >= 0.0 {
                        timeout = Some(Duration::from_secs_f64(micros / 1_000_000.0));
                    }
                }
                arguments.push(option);
                arguments.push(value);
            }
            _ => {
                arguments.push(option);
                arguments.push(value);
            }
        }
    }

    Ok(Invocation {
        endpoint,
        arguments,
        inputs,
        outputs,
        overwrite,
        relay_stdin,
        timeout,
    })
}

/// Parses a worker endpoint; the result always ends with `/`.
pub fn parse_endpoint(value: &str) -> ArgumentResult<Url> {
    let candidate = format!("{}/", value.trim_end_matches('/'));
    match Url::parse(&candidate) {
        Ok(url) if url.has_host() => Ok(url),
        _ => Err(ArgumentError::InvalidEndpoint(value.to_string())),
    }
}

/// `.ext` of a path, or an empty string.
pub fn dotted_extension(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

fn placeholder(id: Uuid, path: &str) -> String {
    format!("{id}{}", dotted_extension(path))
}

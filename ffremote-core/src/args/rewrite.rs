use std::collections::HashSet;
use std::path::{Path, PathBuf};

use url::Url;
use uuid::Uuid;

use super::error::{ArgumentError, ArgumentResult};
use super::options::{
    is_null_device, is_print_option, is_unary_option, is_unsupported_option, option_name,
    NULL_DEVICE, STANDARD_STREAM,
};
use crate::auth::Credentials;
use crate::staging::output_path;

/// Where rewritten inputs and outputs point on this worker.
#[derive(Debug, Clone, Copy)]
pub struct RewriteContext<'a> {
    pub session: Uuid,
    /// Base URL of this worker as seen from the transcoder, ending in `/`.
    pub loopback: &'a Url,
    /// Credentials of the caller, forwarded so loopback reads authenticate.
    pub credentials: Option<&'a Credentials>,
    pub temp_dir: &'a Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub id: Uuid,
    pub path: PathBuf,
}

/// The transcoder argument list plus the IDs it refers to.
#[derive(Debug, Clone, Default)]
pub struct TranscoderCommand {
    pub args: Vec<String>,
    pub inputs: Vec<Uuid>,
    pub outputs: Vec<OutputTarget>,
}

/// Rejects vectors with null entries, standard streams or unsupported options.
pub fn validate(raw: Vec<Option<String>>) -> ArgumentResult<Vec<String>> {
    let args = raw
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or(ArgumentError::Invalid)?;
    for arg in &args {
        if arg == STANDARD_STREAM {
            return Err(ArgumentError::StandardStream);
        }
        if arg.starts_with('-') && is_unsupported_option(arg) {
            return Err(ArgumentError::Unsupported(
                option_name(arg).trim_start_matches('-').to_string(),
            ));
        }
    }
    Ok(args)
}

/// Builds the transcoder command from a validated caller vector.
pub fn rewrite(args: &[String], ctx: &RewriteContext<'_>) -> ArgumentResult<TranscoderCommand> {
    let mut command = TranscoderCommand::default();
    let mut seen = HashSet::new();

    let mut index = 0;
    while index < args.len() {
        let arg = &args[index];
        index += 1;

        if !arg.starts_with('-') {
            if is_null_device(arg) {
                command.args.push(NULL_DEVICE.to_string());
                continue;
            }
            let (id, ext) =
                split_placeholder(arg).ok_or_else(|| ArgumentError::InvalidOutputId(arg.clone()))?;
            if !seen.insert(id) {
                return Err(ArgumentError::Conflict { kind: "Output", id });
            }
            let path = output_path(ctx.temp_dir, ctx.session, id, &ext);
            command.args.push(path.to_string_lossy().into_owned());
            command.outputs.push(OutputTarget { id, path });
            continue;
        }

        if matches!(arg.as_str(), "-h" | "-?" | "-help" | "--help") {
            command.args.push(arg.clone());
            if let Some(topic) = args.get(index).filter(|next| !next.starts_with('-')) {
                command.args.push(topic.clone());
                index += 1;
            }
            continue;
        }
        if is_print_option(arg) || is_unary_option(arg) {
            command.args.push(arg.clone());
            continue;
        }

        let value = args
            .get(index)
            .ok_or_else(|| ArgumentError::MissingValue(arg.trim_start_matches('-').to_string()))?;
        index += 1;
        if arg != "-i" {
            command.args.push(arg.clone());
            command.args.push(value.clone());
            continue;
        }

        let (id, ext) =
            split_placeholder(value).ok_or_else(|| ArgumentError::InvalidInputId(value.clone()))?;
        if !seen.insert(id) {
            return Err(ArgumentError::Conflict { kind: "Input", id });
        }
        let url = input_url(ctx, id, &ext)?;
        if ctx.credentials.is_some() {
            command.args.push("-auth_type".to_string());
            command.args.push("basic".to_string());
        }
        command.args.push("-cookies".to_string());
        command.args.push(session_cookie(ctx.session, ctx.loopback));
        command.args.push("-i".to_string());
        command.args.push(url.to_string());
        command.inputs.push(id);
    }

    Ok(command)
}

/// Cookie line handed to the transcoder for its loopback reads.
pub fn session_cookie(session: Uuid, loopback: &Url) -> String {
    let host = loopback.host_str().unwrap_or("localhost");
    match loopback.port_or_known_default() {
        Some(port) => format!("sid={session}; path=/; domain={host}:{port}"),
        None => format!("sid={session}; path=/; domain={host}"),
    }
}

fn input_url(ctx: &RewriteContext<'_>, id: Uuid, ext: &str) -> ArgumentResult<Url> {
    let mut url = ctx
        .loopback
        .join(&format!("{id}{ext}"))
        .map_err(|_| ArgumentError::InvalidInputId(id.to_string()))?;
    if let Some(credentials) = ctx.credentials {
        url.set_username(&credentials.user)
            .and_then(|_| url.set_password(Some(&credentials.password)))
            .map_err(|_| ArgumentError::Invalid)?;
    }
    Ok(url)
}

/// Splits `{uuid}{.ext}` into its ID and dotted extension.
pub(crate) fn split_placeholder(token: &str) -> Option<(Uuid, String)> {
    let (stem, ext) = match token.find('.') {
        Some(dot) => token.split_at(dot),
        None => (token, ""),
    };
    if stem.len() != 36 {
        return None;
    }
    let id = Uuid::parse_str(stem).ok()?;
    Some((id, ext.to_string()))
}

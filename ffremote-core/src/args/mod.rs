//! Argument vectors on both ends of a session.
//!
//! The caller replaces local paths with `{id}{extension}` placeholders
//! ([`translate`]); the worker validates the received vector and points the
//! placeholders at its own loopback endpoint and staging directory
//! ([`rewrite`]).

mod error;
mod loglevel;
mod options;
mod rewrite;
mod translate;

pub use error::{ArgumentError, ArgumentResult};
pub use loglevel::log_level;
pub use options::{
    is_null_device, is_print_option, is_unary_option, is_unsupported_option, NULL_DEVICE,
    PRINT_OPTIONS, STANDARD_STREAM, UNARY_OPTIONS, UNSUPPORTED_OPTIONS, WIRE_NULL_DEVICE,
};
pub(crate) use rewrite::split_placeholder;
pub use rewrite::{rewrite, session_cookie, validate, OutputTarget, RewriteContext, TranscoderCommand};
pub use translate::{
    dotted_extension, parse_endpoint, translate, Invocation, LocalInput, LocalOutput,
    DEFAULT_ENDPOINT,
};

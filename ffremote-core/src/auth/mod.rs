//! HTTP Basic authentication against an Apache htpasswd file.

mod basic;
mod htpasswd;
mod store;

pub use basic::Credentials;
pub use htpasswd::{apr1_crypt, sha, verify, Htpasswd, HtpasswdError, HtpasswdResult};
pub use store::CredentialStore;

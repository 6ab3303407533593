use url::Url;

use super::error::{ClientError, ClientResult};
use crate::auth::Credentials;

/// A worker base URL with any user-info moved into an `Authorization`
/// header.
#[derive(Debug, Clone)]
pub struct Endpoint {
    base: Url,
    authorization: Option<String>,
}

impl Endpoint {
    pub fn new(url: &Url) -> ClientResult<Self> {
        let mut base = url.clone();
        let authorization = if !base.username().is_empty() || base.password().is_some() {
            let user = decode(base.username())?;
            let password = decode(base.password().unwrap_or_default())?;
            Some(Credentials::new(user, password).to_authorization())
        } else {
            None
        };
        base.set_username("")
            .and_then(|_| base.set_password(None))
            .map_err(|_| ClientError::Protocol(format!("'{url}' cannot carry credentials")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base, authorization })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    pub fn http(&self, path: &str) -> ClientResult<Url> {
        self.base
            .join(path)
            .map_err(|err| ClientError::Protocol(format!("invalid worker path '{path}': {err}")))
    }

    /// The same location with `ws`/`wss` in place of `http`/`https`.
    pub fn websocket(&self, path: &str) -> ClientResult<Url> {
        let mut url = self.http(path)?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Protocol(format!("'{url}' has no WebSocket form")))?;
        Ok(url)
    }
}

fn decode(value: &str) -> ClientResult<String> {
    urlencoding::decode(value)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| ClientError::InvalidHeader("Authorization"))
}

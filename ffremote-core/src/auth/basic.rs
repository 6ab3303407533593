use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// A user/password pair from an HTTP Basic `Authorization` header or from
/// URL user-info.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Parses `Basic base64(user:password)`. Anything else yields `None`.
    pub fn from_authorization(header: &str) -> Option<Self> {
        let (scheme, token) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = STANDARD.decode(token.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, password) = decoded.split_once(':')?;
        Some(Self::new(user, password))
    }

    pub fn to_authorization(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.user, self.password));
        format!("Basic {token}")
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let credentials = Credentials::new("alice", "pa:ss");
        let header = credentials.to_authorization();
        assert_eq!(header, "Basic YWxpY2U6cGE6c3M=");
        assert_eq!(Credentials::from_authorization(&header), Some(credentials));
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        assert_eq!(Credentials::from_authorization("Bearer abc"), None);
        assert_eq!(Credentials::from_authorization("Basic !!!"), None);
        assert_eq!(Credentials::from_authorization("Basic YWxpY2U="), None);
    }
}

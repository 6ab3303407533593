use std::collections::HashMap;
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use md5::{Digest, Md5};
use regex::Regex;
use sha1::Sha1;
use thiserror::Error;

const APR1_MAGIC: &str = "$apr1$";
const ITOA64: &[u8; 64] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Error)]
pub enum HtpasswdError {
    #[error("line {line}: expected `user:hash`")]
    Malformed { line: usize },
    #[error("line {line}: duplicate user `{user}`")]
    Duplicate { line: usize, user: String },
    #[error("failed to read credential file: {0}")]
    Io(#[from] std::io::Error),
}

pub type HtpasswdResult<T> = std::result::Result<T, HtpasswdError>;

/// Parsed htpasswd entries, keyed by user name.
#[derive(Debug, Clone, Default)]
pub struct Htpasswd {
    entries: HashMap<String, String>,
}

impl Htpasswd {
    pub fn parse(text: &str) -> HtpasswdResult<Self> {
        let mut entries = HashMap::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let line_no = index + 1;
            let (user, hash) = line
                .split_once(':')
                .filter(|(user, hash)| !user.is_empty() && !hash.is_empty())
                .ok_or(HtpasswdError::Malformed { line: line_no })?;
            if entries.insert(user.to_string(), hash.to_string()).is_some() {
                return Err(HtpasswdError::Duplicate {
                    line: line_no,
                    user: user.to_string(),
                });
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `user` exists and `password` matches its stored hash.
    pub fn contains(&self, user: &str, password: &str) -> bool {
        self.entries
            .get(user)
            .is_some_and(|hash| verify(hash, password))
    }
}

/// Checks `password` against an `$apr1$` or `{SHA}` entry. Other schemes
/// never match.
pub fn verify(hash: &str, password: &str) -> bool {
    if let Some(captures) = apr1_pattern().captures(hash) {
        return apr1_crypt(password, &captures[1]) == hash;
    }
    if let Some(captures) = sha_pattern().captures(hash) {
        return sha(password) == captures[1];
    }
    false
}

fn apr1_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\$apr1\$([^$]{8})\$(.+)$").expect("valid apr1 pattern"))
}

fn sha_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\{SHA\}(.+)$").expect("valid sha pattern"))
}

/// Base64 of the SHA-1 digest, as stored after `{SHA}`.
pub fn sha(password: &str) -> String {
    STANDARD.encode(Sha1::digest(password.as_bytes()))
}

/// Apache's MD5-crypt variant. Returns the full `$apr1$salt$hash` string.
pub fn apr1_crypt(password: &str, salt: &str) -> String {
    let key = password.as_bytes();
    let salt = salt.as_bytes();
    let salt = &salt[..salt.len().min(8)];

    let mut ctx = Md5::new();
    ctx.update(key);
    ctx.update(APR1_MAGIC.as_bytes());
    ctx.update(salt);

    let alternate = Md5::new()
        .chain_update(key)
        .chain_update(salt)
        .chain_update(key)
        .finalize();
    let mut remaining = key.len();
    while remaining > 0 {
        let take = remaining.min(16);
        ctx.update(&alternate[..take]);
        remaining -= take;
    }

    let mut bit = key.len();
    while bit > 0 {
        if bit & 1 == 1 {
            ctx.update([0u8]);
        } else {
            ctx.update(&key[..1]);
        }
        bit >>= 1;
    }
    let mut digest = ctx.finalize();

    for round in 0..1000 {
        let mut ctx = Md5::new();
        if round & 1 == 1 {
            ctx.update(key);
        } else {
            ctx.update(digest);
        }
        if round % 3 != 0 {
            ctx.update(salt);
        }
        if round % 7 != 0 {
            ctx.update(key);
        }
        if round & 1 == 1 {
            ctx.update(digest);
        } else {
            ctx.update(key);
        }
        digest = ctx.finalize();
    }

    let mut out = String::with_capacity(37);
    out.push_str(APR1_MAGIC);
    out.push_str(&String::from_utf8_lossy(salt));
    out.push('$');
    for (a, b, c) in [(0, 6, 12), (1, 7, 13), (2, 8, 14), (3, 9, 15), (4, 10, 5)] {
        let value = (u32::from(digest[a]) << 16) | (u32::from(digest[b]) << 8) | u32::from(digest[c]);
        push_base64(&mut out, value, 4);
    }
    push_base64(&mut out, u32::from(digest[11]), 2);
    out
}

fn push_base64(out: &mut String, mut value: u32, count: usize) {
    for _ in 0..count {
        out.push(char::from(ITOA64[(value & 0x3f) as usize]));
        value >>= 6;
    }
}

use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "sid";

/// Session ID from the `sid` cookie, falling back to a `sid` query
/// parameter.
pub fn session_id(headers: &HeaderMap, query: Option<&str>) -> Option<Uuid> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
        .or_else(|| query_param(query, SESSION_COOKIE).and_then(|value| Uuid::parse_str(&value).ok()))
}

pub fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

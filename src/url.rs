//! Proxy URL building
//!
//! Emitted playlists embed absolute URLs back to this proxy. Query maps are
//! kept as ordered pairs so the same parsed manifest always renders to the
//! same bytes. When the inbound request asked for opaque URLs, the signer
//! packs the whole query map into a single token parameter.

use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Ordered query map. Insertion order is emission order.
pub type QueryPairs = Vec<(String, String)>;

/// Parse a raw query string into ordered pairs.
pub fn parse_query(raw: &str) -> QueryPairs {
    raw.split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (name, value) = part.split_once('=').unwrap_or((part, ""));
            (decode_component(name), decode_component(value))
        })
        .collect()
}

fn decode_component(s: &str) -> String {
    let s = s.replace('+', " ");
    urlencoding::decode(&s)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// Serialize ordered pairs into a query string.
pub fn encode_query(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(name, value)| {
            format!("{}={}", urlencoding::encode(name), urlencoding::encode(value))
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Get a parameter value.
pub fn get_param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

/// Set a parameter, replacing an existing value in place or appending.
pub fn set_param(params: &mut QueryPairs, name: &str, value: impl Into<String>) {
    let value = value.into();
    match params.iter_mut().find(|(n, _)| n == name) {
        Some(pair) => pair.1 = value,
        None => params.push((name.to_string(), value)),
    }
}

/// Remove a parameter, returning its value when present.
pub fn remove_param(params: &mut QueryPairs, name: &str) -> Option<String> {
    let index = params.iter().position(|(n, _)| n == name)?;
    Some(params.remove(index).1)
}

/// Query-flag truthiness: present counts as true unless empty, `0`, or
/// `false`.
pub fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}

/// URL signing collaborator: turns a base URL and query map into an opaque
/// token-bearing URL, and unpacks such tokens on the way back in.
pub trait UrlSigner: Send + Sync {
    fn sign(&self, base: &str, params: &[(String, String)]) -> String;

    /// Unpack a token previously produced by `sign`. `None` when the token
    /// is malformed or was produced under a different secret.
    fn unsign(&self, token: &str) -> Option<QueryPairs>;
}

/// Bundled signer: packs the serialized query into a base64url token. The
/// secret is prepended so tokens differ across deployments; the handler
/// that unpacks tokens verifies it on the way back in.
pub struct TokenSigner {
    secret: String,
}

impl TokenSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

}

impl UrlSigner for TokenSigner {
    fn sign(&self, base: &str, params: &[(String, String)]) -> String {
        let token = URL_SAFE_NO_PAD.encode(format!("{}|{}", self.secret, encode_query(params)));
        format!("{}?token={}", base, token)
    }

    fn unsign(&self, token: &str) -> Option<QueryPairs> {
        let raw = URL_SAFE_NO_PAD.decode(token).ok()?;
        let text = String::from_utf8(raw).ok()?;
        let rest = text.strip_prefix(&self.secret)?.strip_prefix('|')?;
        Some(parse_query(rest))
    }
}

/// Build an absolute proxy URL. With a signer, the parameters travel as an
/// opaque token; otherwise they are appended as plain query pairs.
pub fn build_url(base: &str, params: &[(String, String)], signer: Option<&dyn UrlSigner>) -> String {
    match signer {
        Some(signer) => signer.sign(base, params),
        None if params.is_empty() => base.to_string(),
        None => format!("{}?{}", base, encode_query(params)),
    }
}

/// Recover the client-facing scheme from forwarded headers. Proxied TLS
/// terminates upstream, so the local listener's scheme is not what the
/// client sees.
pub fn original_scheme(headers: &HeaderMap) -> &'static str {
    match headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
    {
        Some(proto) if proto.eq_ignore_ascii_case("https") => "https",
        _ => "http",
    }
}

/// Resolve a possibly-relative reference against a base URL.
pub fn resolve_url(base: &str, reference: &str) -> String {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return reference.to_string();
    }
    if let Some(rest) = reference.strip_prefix('/') {
        // Host-relative: keep the base origin.
        if let Some(scheme_end) = base.find("://") {
            let after_scheme = &base[scheme_end + 3..];
            let host_end = after_scheme.find('/').unwrap_or(after_scheme.len());
            return format!("{}/{}", &base[..scheme_end + 3 + host_end], rest);
        }
        return reference.to_string();
    }
    // Path-relative: replace everything after the base's last slash.
    let path_end = base.find('?').unwrap_or(base.len());
    let trimmed = &base[..path_end];
    match trimmed.rfind('/') {
        Some(idx) if idx > trimmed.find("://").map(|i| i + 2).unwrap_or(0) => {
            format!("{}/{}", &trimmed[..idx], reference)
        }
        _ => format!("{}/{}", trimmed, reference),
    }
}

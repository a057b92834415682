//! Extracting the destination of a proxied request.

use std::str::FromStr;

use http::header::{self, HeaderMap, HeaderName};
use http::uri::{Authority, Uri};

/// Host and port a request should reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Hostname or IP literal, without IPv6 brackets.
    pub host: String,
    pub port: u16,
}

impl Target {
    /// Value for a `Host` header: IPv6 literals get their brackets back and
    /// the default port is left out.
    pub fn host_header(&self, default_port: u16) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == default_port {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

fn from_authority(authority: &Authority, default_port: Option<u16>) -> Option<Target> {
    let host = authority
        .host()
        .trim_start_matches('[')
        .trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    let port = authority.port_u16().or(default_port)?;
    Some(Target {
        host: host.to_string(),
        port,
    })
}

/// Destination of a CONNECT request: the `host:port` of the request line.
///
/// Returns `None` when the port is missing or the authority is malformed.
pub fn connect_target(uri: &Uri) -> Option<Target> {
    let target = from_authority(uri.authority()?, None)?;
    (target.port != 0).then_some(target)
}

/// Destination of a plain HTTP request: the `Host` header, falling back to
/// the authority of an absolute-form URI. The port defaults to 80.
pub fn http_target(uri: &Uri, headers: &HeaderMap) -> Option<Target> {
    let from_header = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| Authority::from_str(value).ok())
        .and_then(|authority| from_authority(&authority, Some(80)));

    from_header.or_else(|| {
        let default_port = if uri.scheme_str() == Some("https") { 443 } else { 80 };
        from_authority(uri.authority()?, Some(default_port))
    })
}

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    HeaderName::from_static("proxy-connection"),
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

/// Remove hop-by-hop headers, including those listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_str(name.trim()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove(header::UPGRADE);
}

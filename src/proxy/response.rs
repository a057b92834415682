//! Responses generated by the proxy itself.

use std::net::IpAddr;

use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::{Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};

/// Body type of every proxy response: either generated here or streamed from
/// the origin.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

pub fn full(body: impl Into<Bytes>) -> ProxyBody {
    Full::new(body.into()).map_err(|never| match never {}).boxed()
}

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

fn with_status(status: StatusCode, body: ProxyBody) -> Response<ProxyBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

fn closing(mut response: Response<ProxyBody>) -> Response<ProxyBody> {
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

fn text(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let mut response = with_status(status, full(format!("{message}\n")));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// 403 for a blocked destination, with a JSON body naming the domain and the
/// client address. The connection is closed afterwards.
pub fn forbidden(domain: &str, client: IpAddr) -> Response<ProxyBody> {
    let body = serde_json::json!({
        "error": "Forbidden",
        "message": format!("Access to {domain} is blocked by your network policy"),
        "domain": domain,
        "ip": client.to_string(),
    });

    let mut response = with_status(StatusCode::FORBIDDEN, full(body.to_string()));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    closing(response)
}

/// 200 answering a CONNECT; the tunnel starts once it is sent.
pub fn connection_established() -> Response<ProxyBody> {
    with_status(StatusCode::OK, empty())
}

pub fn bad_request(message: &str) -> Response<ProxyBody> {
    closing(text(StatusCode::BAD_REQUEST, message))
}

pub fn bad_gateway(message: &str) -> Response<ProxyBody> {
    text(StatusCode::BAD_GATEWAY, message)
}

pub fn internal_error() -> Response<ProxyBody> {
    closing(text(StatusCode::INTERNAL_SERVER_ERROR, "internal proxy error"))
}

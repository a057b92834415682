//! Plain HTTP forwarding for absolute-form and origin-form requests.

use std::net::IpAddr;

use http::header::{self, HeaderValue};
use http::uri::{PathAndQuery, Uri};
use http::{Request, Response};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;

use super::ProxyError;
use super::response::{self, ProxyBody};
use super::server::ProxyState;
use super::target::{Target, http_target, strip_hop_by_hop};
use super::tunnel::connect_upstream;
use crate::filter::Channel;
use crate::metrics;

/// Rewrite the request so an origin server accepts it: origin-form URI,
/// no hop-by-hop headers, and a `Host` header.
fn prepare_request(
    req: Request<Incoming>,
    target: &Target,
) -> Result<Request<Incoming>, http::Error> {
    let (mut parts, body) = req.into_parts();

    let path = parts
        .uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    parts.uri = Uri::builder().path_and_query(path).build()?;

    strip_hop_by_hop(&mut parts.headers);
    if !parts.headers.contains_key(header::HOST) {
        let host = HeaderValue::from_str(&target.host_header(80))?;
        parts.headers.insert(header::HOST, host);
    }

    Ok(Request::from_parts(parts, body))
}

async fn send(
    req: Request<Incoming>,
    target: &Target,
    state: &ProxyState,
) -> Result<Response<Incoming>, ProxyError> {
    let stream = connect_upstream(target, state.connect_timeout).await?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(ProxyError::Upstream)?;

    tokio::spawn(async move {
        if let Err(err) = conn.await {
            tracing::debug!(error = %err, "upstream connection closed with error");
        }
    });

    sender.send_request(req).await.map_err(ProxyError::Upstream)
}

pub(super) async fn handle_http(
    req: Request<Incoming>,
    client: IpAddr,
    state: &ProxyState,
) -> Response<ProxyBody> {
    let Some(target) = http_target(req.uri(), req.headers()) else {
        tracing::debug!(client = %client, uri = %req.uri(), "request without a host");
        metrics::record_proxy_request("http", "bad_request");
        return response::bad_request("request has no Host header");
    };

    let decision = state.filter.decide(Channel::Http, client, &target.host);
    if decision.is_blocked() {
        metrics::record_proxy_request("http", "blocked");
        return response::forbidden(&decision.domain, client);
    }

    let req = match prepare_request(req, &target) {
        Ok(req) => req,
        Err(err) => {
            tracing::error!(client = %client, error = %err, "unable to rewrite request");
            metrics::record_proxy_request("http", "error");
            return response::internal_error();
        }
    };

    match send(req, &target, state).await {
        Ok(upstream) => {
            metrics::record_proxy_request("http", "allowed");
            let (mut parts, body) = upstream.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            Response::from_parts(parts, body.boxed())
        }
        Err(err) => {
            tracing::warn!(
                client = %client,
                target = %target.host,
                port = target.port,
                error = %err,
                "forwarding failed"
            );
            metrics::record_proxy_request("http", "error");
            response::bad_gateway(&err.to_string())
        }
    }
}

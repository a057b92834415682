//! CONNECT handling: connect upstream, answer 200, splice both directions.

use std::net::IpAddr;
use std::time::Duration;

use http::{Request, Response};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use tokio::io::copy_bidirectional;
use tokio::net::TcpStream;

use super::ProxyError;
use super::response::{self, ProxyBody};
use super::server::ProxyState;
use super::target::{Target, connect_target};
use crate::filter::Channel;
use crate::metrics;

/// Open a TCP connection to `target`, bounded by `timeout`.
pub(super) async fn connect_upstream(
    target: &Target,
    timeout: Duration,
) -> Result<TcpStream, ProxyError> {
    let address = (target.host.as_str(), target.port);
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ProxyError::Connect {
            target: format!("{}:{}", target.host, target.port),
            source,
        }),
        Err(_) => Err(ProxyError::ConnectTimeout {
            target: format!("{}:{}", target.host, target.port),
            timeout,
        }),
    }
}

pub(super) async fn handle_connect(
    req: Request<Incoming>,
    client: IpAddr,
    state: &ProxyState,
) -> Response<ProxyBody> {
    let Some(target) = connect_target(req.uri()) else {
        tracing::debug!(client = %client, uri = %req.uri(), "malformed CONNECT target");
        metrics::record_proxy_request("connect", "bad_request");
        return response::bad_request("CONNECT target must be host:port");
    };

    let decision = state.filter.decide(Channel::Connect, client, &target.host);
    if decision.is_blocked() {
        metrics::record_proxy_request("connect", "blocked");
        return response::forbidden(&decision.domain, client);
    }

    let mut upstream = match connect_upstream(&target, state.connect_timeout).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(client = %client, error = %err, "CONNECT upstream failed");
            metrics::record_proxy_request("connect", "error");
            return response::bad_gateway(&err.to_string());
        }
    };
    metrics::record_proxy_request("connect", "allowed");

    tokio::spawn(async move {
        let upgraded = match hyper::upgrade::on(req).await {
            Ok(upgraded) => upgraded,
            Err(err) => {
                tracing::debug!(client = %client, error = %err, "CONNECT upgrade failed");
                return;
            }
        };

        let mut downstream = TokioIo::new(upgraded);
        match copy_bidirectional(&mut downstream, &mut upstream).await {
            Ok((sent, received)) => {
                tracing::debug!(
                    client = %client,
                    target = %target.host,
                    port = target.port,
                    sent,
                    received,
                    "tunnel closed"
                );
            }
            Err(err) => {
                tracing::debug!(client = %client, target = %target.host, error = %err, "tunnel aborted");
            }
        }
    });

    response::connection_established()
}

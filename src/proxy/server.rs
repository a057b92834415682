use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::{Method, Request, Response};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};

use super::ProxyError;
use super::forward::handle_http;
use super::response::ProxyBody;
use super::tunnel::handle_connect;
use crate::filter::Filter;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// State shared by every proxied connection.
#[derive(Debug, Clone)]
pub struct ProxyState {
    pub(super) filter: Filter,
    pub(super) connect_timeout: Duration,
}

impl ProxyState {
    pub fn new(filter: Filter, connect_timeout: Duration) -> Self {
        Self {
            filter,
            connect_timeout,
        }
    }
}

/// HTTP/1.1 forward proxy filtering plain requests and CONNECT tunnels.
pub struct ProxyServer {
    listener: TcpListener,
    state: Arc<ProxyState>,
}

impl ProxyServer {
    pub async fn bind(
        listen: SocketAddr,
        filter: Filter,
        connect_timeout: Duration,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(listen).await?;
        tracing::info!(address = ?listener.local_addr()?, "proxy listening");
        Ok(Self {
            listener,
            state: Arc::new(ProxyState::new(filter, connect_timeout)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever. A failed accept or a broken connection
    /// never stops the loop.
    pub async fn run(self) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!(error = %err, "unable to accept proxy connection");
                    continue;
                }
            };

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, peer, state).await {
                    tracing::debug!(peer = %peer, error = %err, "proxy connection ended with error");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ProxyState>,
) -> Result<(), ProxyError> {
    let service = service_fn(move |req: Request<Incoming>| {
        let state = Arc::clone(&state);
        async move { Ok::<_, hyper::Error>(handle_request(req, peer, &state).await) }
    });

    http1::Builder::new()
        .preserve_header_case(true)
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await
        .map_err(ProxyError::Http)
}

async fn handle_request(
    req: Request<Incoming>,
    peer: SocketAddr,
    state: &ProxyState,
) -> Response<ProxyBody> {
    let forwarded_for = req
        .headers()
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok());
    let client = state.filter.resolver().client_ip(peer.ip(), forwarded_for);

    tracing::trace!(client = %client, method = %req.method(), uri = %req.uri(), "proxy request");

    if req.method() == Method::CONNECT {
        handle_connect(req, client, state).await
    } else {
        handle_http(req, client, state).await
    }
}

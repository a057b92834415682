//! Intercepting HTTP proxy.
//!
//! Plain HTTP requests are filtered on their `Host` and forwarded to the
//! origin. CONNECT requests are filtered on the request-line target and then
//! tunneled as opaque bytes; TLS is never terminated.

mod forward;
pub mod response;
mod server;
pub mod target;
mod tunnel;

use std::time::Duration;

pub use server::{ProxyServer, ProxyState};

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("unable to connect to {target}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connecting to {target} timed out after {timeout:?}")]
    ConnectTimeout { target: String, timeout: Duration },
    #[error("client connection failed")]
    Http(#[source] hyper::Error),
    #[error("upstream exchange failed")]
    Upstream(#[source] hyper::Error),
}

//! DNS resolver trait and implementations.
//!
//! Provides abstraction over upstream resolution so the responder can be
//! tested with a mock resolver.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tokio::net::UdpSocket;

use crate::error::{Error, Result};

/// Receive buffer size for upstream answers.
///
/// Larger than the classic 512 bytes so EDNS-sized answers relay intact.
pub const MAX_UDP_DNS_SIZE: usize = 4096;

/// Trait for DNS resolution.
pub trait DnsResolver: Send + Sync + Clone + 'static {
    /// Resolve a DNS query and return the response.
    fn resolve(&self, query: &Message) -> impl Future<Output = Result<Message>> + Send;
}

/// Upstream DNS resolver using UDP.
///
/// Forwards queries to a configured upstream DNS server (e.g., 1.1.1.1) and
/// gives up after `timeout`.
#[derive(Clone, Debug)]
pub struct UpstreamResolver {
    upstream_addr: SocketAddr,
    timeout: Duration,
}

impl UpstreamResolver {
    /// Create a new upstream resolver.
    pub const fn new(upstream_addr: SocketAddr, timeout: Duration) -> Self {
        Self {
            upstream_addr,
            timeout,
        }
    }

    pub const fn upstream_addr(&self) -> SocketAddr {
        self.upstream_addr
    }

    async fn exchange(&self, query: &Message) -> Result<Message> {
        let local: SocketAddr = match self.upstream_addr.ip() {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.upstream_addr).await?;

        let query_bytes = query.to_bytes()?;
        socket.send(&query_bytes).await?;

        let mut response_buf = vec![0u8; MAX_UDP_DNS_SIZE];
        loop {
            let len = socket.recv(&mut response_buf).await?;
            // Stray or late datagrams for other IDs are skipped.
            match Message::from_bytes(&response_buf[..len]) {
                Ok(response) if response.id() == query.id() => return Ok(response),
                Ok(response) => {
                    tracing::debug!(
                        expected = query.id(),
                        received = response.id(),
                        "ignoring upstream answer with mismatched id"
                    );
                }
                Err(err) => {
                    tracing::debug!(error = %err, "ignoring undecodable upstream answer");
                }
            }
        }
    }
}

impl DnsResolver for UpstreamResolver {
    async fn resolve(&self, query: &Message) -> Result<Message> {
        tokio::time::timeout(self.timeout, self.exchange(query))
            .await
            .map_err(|_| Error::ResolverTimeout(self.timeout))?
    }
}

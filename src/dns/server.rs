//! UDP listener for the DNS responder.
//!
//! Each datagram is handled on its own task so one slow upstream lookup
//! never delays other clients.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use super::handler::QueryHandler;
use crate::cache::DnsCache;
use crate::dns::DnsResolver;
use crate::error::Result;

/// Largest datagram accepted from clients.
const MAX_DATAGRAM_SIZE: usize = 4096;

/// Bind the DNS socket, falling back to `fallback` when the process may not
/// bind `listen` (typically port 53 without privileges).
///
/// # Errors
///
/// Returns the bind error when neither address can be bound.
pub async fn bind(listen: SocketAddr, fallback: Option<SocketAddr>) -> Result<UdpSocket> {
    match UdpSocket::bind(listen).await {
        Ok(socket) => Ok(socket),
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            let Some(fallback) = fallback else {
                return Err(err.into());
            };
            tracing::warn!(
                listen = %listen,
                fallback = %fallback,
                error = %err,
                "permission denied binding DNS socket, using fallback address"
            );
            Ok(UdpSocket::bind(fallback).await?)
        }
        Err(err) => Err(err.into()),
    }
}

/// Serves DNS queries received on a UDP socket.
pub struct DnsServer<C, R>
where
    C: DnsCache,
    R: DnsResolver,
{
    socket: Arc<UdpSocket>,
    handler: QueryHandler<C, R>,
}

impl<C, R> DnsServer<C, R>
where
    C: DnsCache,
    R: DnsResolver,
{
    pub fn new(socket: UdpSocket, handler: QueryHandler<C, R>) -> Self {
        Self {
            socket: Arc::new(socket),
            handler,
        }
    }

    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive datagrams forever.
    ///
    /// Receive errors are logged and skipped; they come from individual
    /// clients (e.g. ICMP port unreachable) and never stop the listener.
    pub async fn run(self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        if let Ok(addr) = self.socket.local_addr() {
            tracing::info!(listen = %addr, "DNS responder listening");
        }

        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to receive datagram");
                    continue;
                }
            };

            let datagram = buf[..len].to_vec();
            let handler = self.handler.clone();
            let socket = Arc::clone(&self.socket);

            tokio::spawn(async move {
                let Some(response) = handler.handle_datagram(&datagram, peer.ip()).await else {
                    return;
                };
                if let Err(err) = socket.send_to(&response, peer).await {
                    tracing::debug!(peer = %peer, error = %err, "failed to send response");
                }
            });
        }
    }
}

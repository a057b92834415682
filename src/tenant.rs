//! Tenant resolution by source IP.

use std::net::IpAddr;

use crate::blocklist::{Snapshot, TenantPolicy};

/// Map IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) to plain IPv4.
///
/// Dual-stack sockets report IPv4 clients in mapped form; whitelists store
/// them as IPv4.
#[inline]
pub fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}

/// Resolves the tenant owning a client address.
#[derive(Debug, Clone, Default)]
pub struct TenantResolver {
    trusted_proxies: Vec<IpAddr>,
}

impl TenantResolver {
    /// A resolver honoring `X-Forwarded-For` from the given peers only.
    pub fn new(trusted_proxies: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            trusted_proxies: trusted_proxies.into_iter().map(canonical_ip).collect(),
        }
    }

    /// The address to attribute a proxied request to.
    ///
    /// The left-most parseable `X-Forwarded-For` address is used when the
    /// socket peer is a trusted proxy; otherwise the peer itself.
    pub fn client_ip(&self, peer: IpAddr, forwarded_for: Option<&str>) -> IpAddr {
        let peer = canonical_ip(peer);
        if !self.trusted_proxies.contains(&peer) {
            return peer;
        }

        forwarded_for
            .and_then(|header| {
                header
                    .split(',')
                    .find_map(|part| part.trim().parse::<IpAddr>().ok())
            })
            .map_or(peer, canonical_ip)
    }

    /// The first tenant, in snapshot order, whose whitelist holds `ip`.
    #[inline]
    pub fn resolve<'a>(&self, snapshot: &'a Snapshot, ip: IpAddr) -> Option<&'a TenantPolicy> {
        snapshot.tenant_for_ip(&canonical_ip(ip))
    }
}

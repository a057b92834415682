//! Block decisions shared by the DNS responder and the proxy.

use std::fmt;
use std::net::IpAddr;

use serde::Deserialize;

use crate::blocklist::{BlockReason, SnapshotReader, Verdict, normalize_host};
use crate::config::MatchScope;
use crate::store::TenantId;
use crate::tenant::{TenantResolver, canonical_ip};

/// Tracing target of per-decision events.
pub const DECISION_TARGET: &str = "domainwall::decision";

/// What to do with traffic that cannot be attributed to a tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Allow it. Unknown clients and a store that never loaded do not
    /// interrupt anyone's browsing.
    #[default]
    FailOpen,
    /// Block it, including all traffic while no snapshot has ever loaded.
    FailClosed,
}

/// Where a request entered the data plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Dns,
    Http,
    Connect,
}

impl Channel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::Http => "http",
            Self::Connect => "connect",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of one filtering decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    /// Tenant the client was attributed to.
    pub tenant: Option<TenantId>,
    /// The normalized hostname that was evaluated.
    pub domain: String,
}

impl Decision {
    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.verdict.is_blocked()
    }
}

/// Resolves the client's tenant and evaluates a hostname against the
/// current snapshot.
#[derive(Debug, Clone)]
pub struct Filter {
    snapshots: SnapshotReader,
    resolver: TenantResolver,
    policy: FailurePolicy,
    dns_scope: MatchScope,
}

impl Filter {
    pub fn new(snapshots: SnapshotReader) -> Self {
        Self {
            snapshots,
            resolver: TenantResolver::default(),
            policy: FailurePolicy::default(),
            dns_scope: MatchScope::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Rule scope for DNS queries. Proxy traffic always uses tenant scope.
    #[must_use]
    pub fn with_dns_scope(mut self, scope: MatchScope) -> Self {
        self.dns_scope = scope;
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: TenantResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn resolver(&self) -> &TenantResolver {
        &self.resolver
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Decide whether `client` may reach `host`, and log the decision.
    pub fn decide(&self, channel: Channel, client: IpAddr, host: &str) -> Decision {
        let client = canonical_ip(client);
        let domain = normalize_host(host);
        let snapshot = self.snapshots.load();
        let tenant = self.resolver.resolve(&snapshot, client);

        let verdict = if !snapshot.is_loaded() && self.policy == FailurePolicy::FailClosed {
            Verdict::Blocked(BlockReason::Policy)
        } else if channel == Channel::Dns && self.dns_scope == MatchScope::Global {
            snapshot.global_rules().evaluate(&domain)
        } else {
            match tenant {
                Some(policy) => policy.rules().evaluate(&domain),
                None => match self.policy {
                    FailurePolicy::FailOpen => Verdict::Allowed,
                    FailurePolicy::FailClosed => Verdict::Blocked(BlockReason::Policy),
                },
            }
        };

        let decision = Decision {
            verdict,
            tenant: tenant.map(|t| t.id().to_string()),
            domain,
        };
        log_decision(channel, client, &decision);
        decision
    }
}

fn log_decision(channel: Channel, client: IpAddr, decision: &Decision) {
    let tenant = decision.tenant.as_deref().unwrap_or("-");
    let rule = match &decision.verdict {
        Verdict::Allowed => "-",
        Verdict::Blocked(BlockReason::Rule(id)) => id.as_str(),
        Verdict::Blocked(BlockReason::Policy) => "policy",
    };

    if decision.is_blocked() {
        tracing::info!(
            target: DECISION_TARGET,
            channel = channel.as_str(),
            client = %client,
            domain = %decision.domain,
            tenant,
            verdict = decision.verdict.as_str(),
            rule,
            "request blocked"
        );
    } else {
        tracing::debug!(
            target: DECISION_TARGET,
            channel = channel.as_str(),
            client = %client,
            domain = %decision.domain,
            tenant,
            verdict = decision.verdict.as_str(),
            rule,
            "request allowed"
        );
    }
}

//! Read-only access to tenants, domain rules and IP whitelists.
//!
//! The rule store is owned by the admin service; this crate only reads it.
//! Every backend implements [`RuleStore`] and may fail transiently, in which
//! case the [`BlocklistCache`](crate::blocklist::BlocklistCache) keeps serving
//! its last good snapshot.

mod file;
mod memory;
mod remote;

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Deserializer, Serialize};

pub use file::FileStore;
pub use memory::MemoryStore;
pub use remote::RemoteStore;

use crate::config::RuleSourceConfig;

/// Identifier of a tenant, as assigned by the admin service.
pub type TenantId = String;

/// Identifier of a domain rule, as assigned by the admin service.
pub type RuleId = String;

/// Error type for rule store access.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store cannot be reached or refused to answer.
    #[error("rule store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with a non-success HTTP status.
    #[error("rule store request to {url} failed with status {status}")]
    HttpStatus { url: String, status: u16 },

    /// The store did not answer within the configured timeout.
    #[error("timeout fetching {url}")]
    Timeout { url: String },

    /// The configured base URL cannot address the store's endpoints.
    #[error("invalid rule store URL: {url:?}")]
    InvalidUrl { url: String },

    /// Network error talking to the store.
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The store's document could not be read.
    #[error("I/O error reading {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The store's document is not in the expected shape.
    #[error("malformed rule store document: {0}")]
    Malformed(String),

    /// Failed to create the HTTP client.
    #[error("failed to create HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

/// An owner of a client network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    #[serde(deserialize_with = "string_or_number")]
    pub id: TenantId,
    #[serde(default = "default_active")]
    pub active: bool,
}

/// How a rule's `domain` field is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// The domain itself, `www.` and every subdomain.
    #[default]
    Exact,
    /// A regular expression searched in the hostname.
    Regex,
}

/// Whether a rule takes part in matching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    #[default]
    Active,
    Inactive,
}

/// A single block directive belonging to one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRule {
    #[serde(deserialize_with = "string_or_number")]
    pub id: RuleId,
    pub domain: String,
    #[serde(default)]
    pub kind: RuleKind,
    #[serde(default)]
    pub status: RuleStatus,
}

impl DomainRule {
    pub fn exact(id: impl Into<RuleId>, domain: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            domain: domain.into(),
            kind: RuleKind::Exact,
            status: RuleStatus::Active,
        }
    }

    pub fn regex(id: impl Into<RuleId>, pattern: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            domain: pattern.into(),
            kind: RuleKind::Regex,
            status: RuleStatus::Active,
        }
    }

    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.status = RuleStatus::Inactive;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }
}

/// A source IP authorized to have its traffic filtered under a tenant's policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpWhitelistEntry {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "ipAddress")]
    pub ip_address: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl IpWhitelistEntry {
    pub fn new(id: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ip_address: ip_address.into(),
            label: None,
        }
    }
}

/// Read-only accessor over persisted tenants, rules and whitelists.
pub trait RuleStore: Send + Sync + 'static {
    /// All tenants, active or not, in the store's stable order.
    fn list_tenants(&self) -> impl Future<Output = Result<Vec<Tenant>, StoreError>> + Send;

    /// The active domain rules of a tenant, in insertion order.
    fn list_active_domain_rules(
        &self,
        tenant_id: &str,
    ) -> impl Future<Output = Result<Vec<DomainRule>, StoreError>> + Send;

    /// The whitelisted source IPs of a tenant.
    fn list_whitelisted_ips(
        &self,
        tenant_id: &str,
    ) -> impl Future<Output = Result<Vec<IpWhitelistEntry>, StoreError>> + Send;
}

/// The store selected by the configuration file.
pub enum ConfiguredStore {
    File(FileStore),
    Remote(RemoteStore),
}

impl ConfiguredStore {
    /// Build the store described by `[rules.source]`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ClientBuild`] if the HTTP client of a remote store
    /// cannot be created.
    pub fn from_config(config: &RuleSourceConfig) -> Result<Self, StoreError> {
        match config {
            RuleSourceConfig::File { path } => Ok(Self::File(FileStore::new(path.clone()))),
            RuleSourceConfig::Remote {
                url,
                token,
                timeout_secs,
            } => Ok(Self::Remote(RemoteStore::new(
                url,
                token.clone(),
                std::time::Duration::from_secs(*timeout_secs),
            )?)),
        }
    }
}

impl fmt::Debug for ConfiguredStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(store) => f.debug_tuple("File").field(&store.path()).finish(),
            Self::Remote(store) => f.debug_tuple("Remote").field(&store.base_url()).finish(),
        }
    }
}

impl RuleStore for ConfiguredStore {
    async fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        match self {
            Self::File(store) => store.list_tenants().await,
            Self::Remote(store) => store.list_tenants().await,
        }
    }

    async fn list_active_domain_rules(&self, tenant_id: &str) -> Result<Vec<DomainRule>, StoreError> {
        match self {
            Self::File(store) => store.list_active_domain_rules(tenant_id).await,
            Self::Remote(store) => store.list_active_domain_rules(tenant_id).await,
        }
    }

    async fn list_whitelisted_ips(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<IpWhitelistEntry>, StoreError> {
        match self {
            Self::File(store) => store.list_whitelisted_ips(tenant_id).await,
            Self::Remote(store) => store.list_whitelisted_ips(tenant_id).await,
        }
    }
}

const fn default_active() -> bool {
    true
}

/// Admin databases hand out integer keys; accept them as strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_accept_numeric_and_string_ids() {
        let rules: Vec<DomainRule> = serde_json::from_str(
            r#"[
                {"id": 7, "domain": "facebook.com", "kind": "exact", "status": "active"},
                {"id": "r-8", "domain": "^ads\\.", "kind": "regex", "status": "inactive"}
            ]"#,
        )
        .unwrap();

        assert_eq!(rules[0].id, "7");
        assert!(rules[0].is_active());
        assert_eq!(rules[1].id, "r-8");
        assert_eq!(rules[1].kind, RuleKind::Regex);
        assert!(!rules[1].is_active());
    }

    #[test]
    fn should_default_rule_kind_and_status() {
        let rule: DomainRule = serde_json::from_str(r#"{"id": 1, "domain": "x.com"}"#).unwrap();
        assert_eq!(rule, DomainRule::exact("1", "x.com"));
    }

    #[test]
    fn should_accept_camel_case_ip_address() {
        let entry: IpWhitelistEntry =
            serde_json::from_str(r#"{"id": 3, "ipAddress": "192.168.1.1", "label": "office"}"#)
                .unwrap();

        assert_eq!(entry.ip_address, "192.168.1.1");
        assert_eq!(entry.label.as_deref(), Some("office"));
    }

    #[test]
    fn should_default_tenant_to_active() {
        let tenant: Tenant = serde_json::from_str(r#"{"id": 1}"#).unwrap();
        assert!(tenant.active);
    }
}

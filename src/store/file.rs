//! File-based rule store.
//!
//! Reads a TOML document describing every tenant with its rules and
//! whitelisted IPs:
//!
//! ```toml
//! [[tenants]]
//! id = "acme"
//!
//! [[tenants.rules]]
//! id = "1"
//! domain = "facebook.com"
//!
//! [[tenants.rules]]
//! id = "2"
//! domain = "^ads?\\."
//! kind = "regex"
//!
//! [[tenants.whitelist]]
//! id = "office"
//! ip_address = "192.168.1.1"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use super::{DomainRule, IpWhitelistEntry, RuleStore, StoreError, Tenant};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TenantsDocument {
    #[serde(default)]
    tenants: Vec<TenantSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TenantSection {
    #[serde(deserialize_with = "super::string_or_number")]
    id: String,
    #[serde(default = "super::default_active")]
    active: bool,
    #[serde(default)]
    rules: Vec<DomainRule>,
    #[serde(default)]
    whitelist: Vec<IpWhitelistEntry>,
}

/// Loads tenants from a local TOML file.
///
/// The file is re-read on every `list_tenants` call, i.e. once per refresh;
/// the per-tenant calls that follow are answered from that same read so one
/// refresh never mixes two versions of the file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    current: RwLock<Arc<TenantsDocument>>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(Arc::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<TenantsDocument, StoreError> {
        let mut file = File::open(&self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;

        toml::from_str(&content).map_err(|err| StoreError::Malformed(err.to_string()))
    }

    fn section<T>(&self, tenant_id: &str, f: impl FnOnce(&TenantSection) -> T) -> Option<T> {
        let doc = Arc::clone(&self.current.read());
        doc.tenants
            .iter()
            .find(|section| section.id == tenant_id)
            .map(f)
    }
}

impl RuleStore for FileStore {
    async fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        let doc = self.read_document().await?;
        let tenants = doc
            .tenants
            .iter()
            .map(|s| Tenant {
                id: s.id.clone(),
                active: s.active,
            })
            .collect();
        tracing::debug!(path = ?self.path, "read tenants document");
        *self.current.write() = Arc::new(doc);
        Ok(tenants)
    }

    async fn list_active_domain_rules(&self, tenant_id: &str) -> Result<Vec<DomainRule>, StoreError> {
        Ok(self
            .section(tenant_id, |s| {
                s.rules.iter().filter(|r| r.is_active()).cloned().collect()
            })
            .unwrap_or_default())
    }

    async fn list_whitelisted_ips(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<IpWhitelistEntry>, StoreError> {
        Ok(self
            .section(tenant_id, |s| s.whitelist.clone())
            .unwrap_or_default())
    }
}

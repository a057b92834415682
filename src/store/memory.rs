//! In-process rule store.
//!
//! Useful when embedding the filter in another process and for tests that need
//! to simulate the admin database going away.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use super::{DomainRule, IpWhitelistEntry, RuleStore, StoreError, Tenant};

#[derive(Debug, Clone)]
struct TenantRecord {
    tenant: Tenant,
    rules: Vec<DomainRule>,
    whitelist: Vec<IpWhitelistEntry>,
}

/// A rule store held in memory.
///
/// Clones share the same data, so a test can keep a handle and mutate the
/// store while a [`BlocklistCache`](crate::blocklist::BlocklistCache) reads it.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tenants: Arc<RwLock<Vec<TenantRecord>>>,
    available: Arc<AtomicBool>,
    list_tenants_calls: Arc<AtomicU64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            tenants: Arc::default(),
            available: Arc::new(AtomicBool::new(true)),
            list_tenants_calls: Arc::default(),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tenant, or replace the one with the same id.
    pub fn upsert_tenant(&self, tenant: Tenant) {
        let mut tenants = self.tenants.write();
        if let Some(record) = tenants.iter_mut().find(|r| r.tenant.id == tenant.id) {
            record.tenant = tenant;
        } else {
            tenants.push(TenantRecord {
                tenant,
                rules: Vec::new(),
                whitelist: Vec::new(),
            });
        }
    }

    /// Add an active tenant with the given rules and whitelisted IPs.
    pub fn add_tenant<R, I, S>(&self, id: &str, rules: R, ips: I)
    where
        R: IntoIterator<Item = DomainRule>,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.upsert_tenant(Tenant {
            id: id.to_string(),
            active: true,
        });
        for rule in rules {
            self.add_rule(id, rule);
        }
        for (idx, ip) in ips.into_iter().enumerate() {
            self.add_whitelist_entry(
                id,
                IpWhitelistEntry::new(format!("{id}-ip-{idx}"), ip.as_ref()),
            );
        }
    }

    pub fn add_rule(&self, tenant_id: &str, rule: DomainRule) {
        let mut tenants = self.tenants.write();
        if let Some(record) = tenants.iter_mut().find(|r| r.tenant.id == tenant_id) {
            record.rules.push(rule);
        }
    }

    /// Remove a rule by id, returning whether it existed.
    pub fn remove_rule(&self, tenant_id: &str, rule_id: &str) -> bool {
        let mut tenants = self.tenants.write();
        let Some(record) = tenants.iter_mut().find(|r| r.tenant.id == tenant_id) else {
            return false;
        };
        let before = record.rules.len();
        record.rules.retain(|rule| rule.id != rule_id);
        record.rules.len() != before
    }

    pub fn add_whitelist_entry(&self, tenant_id: &str, entry: IpWhitelistEntry) {
        let mut tenants = self.tenants.write();
        if let Some(record) = tenants.iter_mut().find(|r| r.tenant.id == tenant_id) {
            record.whitelist.push(entry);
        }
    }

    /// Simulate the backing database going down (`false`) or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of `list_tenants` calls, i.e. refresh attempts.
    pub fn list_tenants_calls(&self) -> u64 {
        self.list_tenants_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".to_string()))
        }
    }
}

impl RuleStore for MemoryStore {
    async fn list_tenants(&self) -> Result<Vec<Tenant>, StoreError> {
        self.list_tenants_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self
            .tenants
            .read()
            .iter()
            .map(|r| r.tenant.clone())
            .collect())
    }

    async fn list_active_domain_rules(&self, tenant_id: &str) -> Result<Vec<DomainRule>, StoreError> {
        self.check_available()?;
        Ok(self
            .tenants
            .read()
            .iter()
            .find(|r| r.tenant.id == tenant_id)
            .map(|r| r.rules.iter().filter(|rule| rule.is_active()).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_whitelisted_ips(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<IpWhitelistEntry>, StoreError> {
        self.check_available()?;
        Ok(self
            .tenants
            .read()
            .iter()
            .find(|r| r.tenant.id == tenant_id)
            .map(|r| r.whitelist.clone())
            .unwrap_or_default())
    }
}

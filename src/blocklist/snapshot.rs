//! Immutable materialized view of the rule store.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::IpAddr;
use std::time::SystemTime;

use super::matcher::{CompiledRule, RuleSet};
use crate::store::{DomainRule, IpWhitelistEntry, Tenant, TenantId};
use crate::tenant::canonical_ip;

/// Everything fetched from the store for one tenant during a refresh.
#[derive(Debug, Clone)]
pub struct TenantData {
    pub tenant: Tenant,
    pub rules: Vec<DomainRule>,
    pub whitelist: Vec<IpWhitelistEntry>,
}

/// The compiled policy of one active tenant.
#[derive(Debug, Clone)]
pub struct TenantPolicy {
    id: TenantId,
    rules: RuleSet,
    whitelist: Vec<IpAddr>,
}

impl TenantPolicy {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Whitelisted source IPs, canonicalized.
    pub fn whitelist(&self) -> &[IpAddr] {
        &self.whitelist
    }
}

/// An IP address whitelisted by more than one active tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpConflict {
    pub ip: IpAddr,
    /// Tenant the address resolves to.
    pub kept: TenantId,
    /// Tenant whose entry is ignored.
    pub ignored: TenantId,
}

/// A complete, immutable set of tenant policies.
///
/// Rebuilt wholesale on every refresh and swapped in atomically.
#[derive(Debug)]
pub struct Snapshot {
    generation: u64,
    built_at: Option<SystemTime>,
    tenants: Vec<TenantPolicy>,
    /// Canonical IP -> index into `tenants`.
    ip_index: HashMap<IpAddr, usize>,
    /// Rules of every active tenant, in tenant order.
    global: RuleSet,
    conflicts: Vec<IpConflict>,
    skipped_rules: usize,
}

impl Snapshot {
    /// The placeholder served before the first successful refresh.
    pub fn empty() -> Self {
        Self {
            generation: 0,
            built_at: None,
            tenants: Vec::new(),
            ip_index: HashMap::new(),
            global: RuleSet::new(),
            conflicts: Vec::new(),
            skipped_rules: 0,
        }
    }

    /// Compile fetched tenant data into a snapshot.
    ///
    /// Inactive tenants and inactive rules are left out. Invalid regex rules
    /// and unparseable whitelist addresses are skipped with a warning; the
    /// rest of the tenant's policy still applies.
    pub fn build(generation: u64, data: Vec<TenantData>) -> Self {
        let mut tenants = Vec::new();
        let mut ip_index: HashMap<IpAddr, usize> = HashMap::new();
        let mut global = RuleSet::new();
        let mut conflicts = Vec::new();
        let mut skipped_rules = 0;

        for TenantData {
            tenant,
            rules,
            whitelist,
        } in data
        {
            if !tenant.active {
                tracing::debug!(tenant = %tenant.id, "skipping inactive tenant");
                continue;
            }

            let mut rule_set = RuleSet::new();
            for rule in rules.iter().filter(|r| r.is_active()) {
                match CompiledRule::compile(rule) {
                    Ok(compiled) => {
                        global.push(compiled.clone());
                        rule_set.push(compiled);
                    }
                    Err(err) => {
                        skipped_rules += 1;
                        tracing::warn!(
                            tenant = %tenant.id,
                            rule = %rule.id,
                            pattern = %rule.domain,
                            error = %err,
                            "skipping invalid regex rule"
                        );
                    }
                }
            }

            let index = tenants.len();
            let mut addresses = Vec::with_capacity(whitelist.len());
            for entry in &whitelist {
                let Ok(ip) = entry.ip_address.trim().parse::<IpAddr>() else {
                    tracing::warn!(
                        tenant = %tenant.id,
                        entry = %entry.id,
                        address = %entry.ip_address,
                        "skipping unparseable whitelist address"
                    );
                    continue;
                };
                let ip = canonical_ip(ip);
                addresses.push(ip);

                match ip_index.entry(ip) {
                    Entry::Vacant(slot) => {
                        slot.insert(index);
                    }
                    Entry::Occupied(slot) if *slot.get() != index => {
                        let kept = tenants
                            .get(*slot.get())
                            .map(|t: &TenantPolicy| t.id.clone())
                            .unwrap_or_default();
                        tracing::error!(
                            ip = %ip,
                            kept = %kept,
                            ignored = %tenant.id,
                            "IP address whitelisted by several tenants"
                        );
                        conflicts.push(IpConflict {
                            ip,
                            kept,
                            ignored: tenant.id.clone(),
                        });
                    }
                    Entry::Occupied(_) => {}
                }
            }

            tenants.push(TenantPolicy {
                id: tenant.id,
                rules: rule_set,
                whitelist: addresses,
            });
        }

        Self {
            generation,
            built_at: Some(SystemTime::now()),
            tenants,
            ip_index,
            global,
            conflicts,
            skipped_rules,
        }
    }

    /// Monotonically increasing build counter; 0 until the first refresh.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether this snapshot comes from a successful refresh.
    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.built_at.is_some()
    }

    pub fn built_at(&self) -> Option<SystemTime> {
        self.built_at
    }

    /// Active tenants in store order.
    pub fn tenants(&self) -> &[TenantPolicy] {
        &self.tenants
    }

    pub fn tenant(&self, id: &str) -> Option<&TenantPolicy> {
        self.tenants.iter().find(|t| t.id == id)
    }

    /// The tenant whose whitelist holds `ip`, which must be canonical.
    #[inline]
    pub fn tenant_for_ip(&self, ip: &IpAddr) -> Option<&TenantPolicy> {
        self.ip_index.get(ip).and_then(|idx| self.tenants.get(*idx))
    }

    /// Rules of all active tenants merged together.
    pub fn global_rules(&self) -> &RuleSet {
        &self.global
    }

    /// Addresses claimed by several tenants at build time.
    pub fn conflicts(&self) -> &[IpConflict] {
        &self.conflicts
    }

    /// Number of rules dropped because they failed to compile.
    pub fn skipped_rules(&self) -> usize {
        self.skipped_rules
    }

    /// Total number of compiled rules across tenants.
    pub fn rule_count(&self) -> usize {
        self.tenants.iter().map(|t| t.rules.len()).sum()
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocklist::normalize_host;

    fn tenant(id: &str, rules: Vec<DomainRule>, ips: &[&str]) -> TenantData {
        TenantData {
            tenant: Tenant {
                id: id.to_string(),
                active: true,
            },
            rules,
            whitelist: ips
                .iter()
                .enumerate()
                .map(|(idx, ip)| IpWhitelistEntry::new(format!("{id}-{idx}"), *ip))
                .collect(),
        }
    }

    #[test]
    fn should_start_empty_and_unloaded() {
        let snapshot = Snapshot::empty();
        assert_eq!(snapshot.generation(), 0);
        assert!(!snapshot.is_loaded());
        assert!(snapshot.tenants().is_empty());
    }

    #[test]
    fn should_index_whitelisted_ips() {
        let snapshot = Snapshot::build(
            1,
            vec![tenant(
                "t1",
                vec![DomainRule::exact("1", "facebook.com")],
                &["192.168.1.1", "2001:db8::1"],
            )],
        );

        assert!(snapshot.is_loaded());
        let ip: IpAddr = "192.168.1.1".parse().unwrap();
        assert_eq!(snapshot.tenant_for_ip(&ip).map(TenantPolicy::id), Some("t1"));
        let ip: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(snapshot.tenant_for_ip(&ip).map(TenantPolicy::id), Some("t1"));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(snapshot.tenant_for_ip(&ip).is_none());
    }

    #[test]
    fn should_canonicalize_mapped_ipv6_whitelist_entries() {
        let snapshot = Snapshot::build(1, vec![tenant("t1", vec![], &["::ffff:10.1.2.3"])]);

        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(snapshot.tenant_for_ip(&ip).map(TenantPolicy::id), Some("t1"));
    }

    #[test]
    fn should_skip_inactive_tenants_and_rules() {
        let mut dormant = tenant("t2", vec![DomainRule::exact("9", "x.com")], &["10.0.0.2"]);
        dormant.tenant.active = false;

        let snapshot = Snapshot::build(
            1,
            vec![
                tenant(
                    "t1",
                    vec![
                        DomainRule::exact("1", "a.com"),
                        DomainRule::exact("2", "b.com").inactive(),
                    ],
                    &["10.0.0.1"],
                ),
                dormant,
            ],
        );

        assert_eq!(snapshot.tenants().len(), 1);
        assert!(snapshot.tenant("t2").is_none());
        assert_eq!(snapshot.rule_count(), 1);
        let ip: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(snapshot.tenant_for_ip(&ip).is_none());
    }

    #[test]
    fn should_skip_invalid_regex_and_keep_other_rules() {
        let snapshot = Snapshot::build(
            1,
            vec![tenant(
                "t1",
                vec![
                    DomainRule::regex("bad", "([a-z"),
                    DomainRule::exact("good", "facebook.com"),
                    DomainRule::regex("ads", r"^ads\."),
                ],
                &["10.0.0.1"],
            )],
        );

        assert_eq!(snapshot.skipped_rules(), 1);
        let rules = snapshot.tenant("t1").unwrap().rules();
        assert_eq!(rules.find("facebook.com"), Some("good"));
        assert_eq!(rules.find("ads.example.com"), Some("ads"));
    }

    #[test]
    fn should_skip_unparseable_whitelist_addresses() {
        let snapshot = Snapshot::build(1, vec![tenant("t1", vec![], &["not-an-ip", "10.0.0.1"])]);

        assert_eq!(snapshot.tenant("t1").unwrap().whitelist().len(), 1);
    }

    #[test]
    fn should_resolve_overlapping_ip_to_first_tenant_and_record_conflict() {
        let snapshot = Snapshot::build(
            3,
            vec![
                tenant("first", vec![], &["10.0.0.1"]),
                tenant("second", vec![], &["10.0.0.1", "10.0.0.2"]),
            ],
        );

        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(snapshot.tenant_for_ip(&ip).map(TenantPolicy::id), Some("first"));
        let ip2: IpAddr = "10.0.0.2".parse().unwrap();
        assert_eq!(snapshot.tenant_for_ip(&ip2).map(TenantPolicy::id), Some("second"));

        assert_eq!(
            snapshot.conflicts(),
            &[IpConflict {
                ip,
                kept: "first".to_string(),
                ignored: "second".to_string(),
            }]
        );
    }

    #[test]
    fn should_merge_rules_of_all_tenants_into_global_set() {
        let snapshot = Snapshot::build(
            1,
            vec![
                tenant("t1", vec![DomainRule::exact("1", "facebook.com")], &[]),
                tenant("t2", vec![DomainRule::exact("2", "tiktok.com")], &[]),
            ],
        );

        let global = snapshot.global_rules();
        assert_eq!(global.find(&normalize_host("www.facebook.com")), Some("1"));
        assert_eq!(global.find(&normalize_host("tiktok.com.")), Some("2"));
    }
}

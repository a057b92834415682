//! Tenant blocklists: compiled rules, snapshots and the refreshing cache.
//!
//! # Example
//!
//! ```
//! use domainwall::blocklist::{Snapshot, TenantData, normalize_host};
//! use domainwall::store::{DomainRule, IpWhitelistEntry, Tenant};
//!
//! let snapshot = Snapshot::build(
//!     1,
//!     vec![TenantData {
//!         tenant: Tenant { id: "acme".into(), active: true },
//!         rules: vec![DomainRule::exact("1", "tiktok.com")],
//!         whitelist: vec![IpWhitelistEntry::new("office", "192.168.1.1")],
//!     }],
//! );
//!
//! let rules = snapshot.tenant("acme").unwrap().rules();
//! assert_eq!(rules.find(&normalize_host("CDN.TikTok.com.")), Some("1"));
//! assert_eq!(rules.find("nottiktok.com"), None);
//! ```

mod manager;
mod matcher;
mod snapshot;

pub use manager::{BlocklistCache, RefreshError, SnapshotReader};
pub use matcher::{BlockReason, CompiledRule, RuleSet, Verdict, normalize_host};
pub use snapshot::{IpConflict, Snapshot, TenantData, TenantPolicy};

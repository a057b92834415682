//! Domainwall - a multi-tenant DNS and HTTP filtering data plane.
//!
//! Domainwall answers DNS queries and proxies HTTP traffic for many client
//! networks at once. Each client IP is attributed to a tenant through the
//! tenant's whitelist, and the tenant's domain rules decide whether a name is
//! blocked: blocked DNS queries get a sinkhole answer, blocked HTTP requests a
//! 403. Everything else is relayed to the upstream resolver or origin.
//!
//! # Architecture
//!
//! - [`store`]: the [`RuleStore`](store::RuleStore) trait and its backends
//! - [`blocklist`]: immutable policy snapshots, the match engine and the
//!   refreshing [`BlocklistCache`](blocklist::BlocklistCache)
//! - [`tenant`]: attributing a client address to a tenant
//! - [`filter`]: the block decision shared by every channel
//! - [`dns`]: the UDP responder and upstream relay
//! - [`cache`]: upstream answer cache
//! - [`proxy`]: the HTTP and CONNECT proxy
//! - [`config`], [`metrics`], [`error`]
//!
//! # Testing
//!
//! Stores, caches and resolvers sit behind traits so the data plane can be
//! exercised without network access:
//!
//! ```rust
//! use domainwall::blocklist::BlocklistCache;
//! use domainwall::filter::{Channel, Filter};
//! use domainwall::store::{DomainRule, MemoryStore};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = MemoryStore::new();
//! store.add_tenant("acme", [DomainRule::exact("r1", "facebook.com")], ["10.0.0.5"]);
//!
//! let cache = BlocklistCache::new(store);
//! cache.refresh().await.unwrap();
//!
//! let filter = Filter::new(cache.reader());
//! let client = "10.0.0.5".parse().unwrap();
//! assert!(filter.decide(Channel::Dns, client, "www.facebook.com").is_blocked());
//! assert!(!filter.decide(Channel::Dns, client, "example.com").is_blocked());
//! # });
//! ```

pub mod blocklist;
pub mod cache;
pub mod config;
pub mod dns;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod proxy;
pub mod store;
pub mod tenant;

pub use config::Config;
pub use error::{Error, Result};

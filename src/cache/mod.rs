//! Caching of upstream DNS answers.

pub mod dns_cache;

pub use dns_cache::{CacheKey, DnsCache, MokaCache};

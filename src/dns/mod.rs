//! DNS responder: decoding, filtering, block answers and upstream relay.

pub mod handler;
pub mod resolver;
pub mod server;

pub use handler::{BlockAnswer, QueryHandler, blocked_response, servfail_response};
pub use resolver::{DnsResolver, UpstreamResolver};
pub use server::DnsServer;

//! DNS query handling: decide, then synthesize a block answer or relay
//! the upstream one.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tracing::instrument;

use crate::cache::{CacheKey, DnsCache};
use crate::config::DnsSettings;
use crate::dns::DnsResolver;
use crate::filter::{Channel, Filter};
use crate::metrics;

/// Addresses and TTL used in synthesized answers for blocked names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAnswer {
    pub ipv4: Ipv4Addr,
    pub ipv6: Ipv6Addr,
    pub ttl: u32,
}

impl Default for BlockAnswer {
    fn default() -> Self {
        Self {
            ipv4: Ipv4Addr::LOCALHOST,
            ipv6: Ipv6Addr::LOCALHOST,
            ttl: 60,
        }
    }
}

impl From<&DnsSettings> for BlockAnswer {
    fn from(settings: &DnsSettings) -> Self {
        Self {
            ipv4: settings.sinkhole_ipv4,
            ipv6: settings.sinkhole_ipv6,
            ttl: settings.block_ttl_secs,
        }
    }
}

/// A response skeleton for `query`: same id, opcode, RD flag and question
/// section, QR set.
pub fn response_to(query: &Message) -> Message {
    let mut response = Message::new();
    response
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_op_code(query.op_code())
        .set_recursion_desired(query.recursion_desired())
        .set_recursion_available(true)
        .set_response_code(ResponseCode::NoError);

    for q in query.queries() {
        response.add_query(q.clone());
    }

    response
}

/// Create a blocked response for a DNS query.
///
/// - A → one A record with the sinkhole IPv4 address
/// - AAAA → one AAAA record with the sinkhole IPv6 address
/// - anything else → no answers
pub fn blocked_response(query: &Message, answer: &BlockAnswer) -> Message {
    let mut response = response_to(query);

    if let Some(question) = query.queries().first() {
        let name = question.name().clone();
        let record = match question.query_type() {
            RecordType::A => Some(Record::from_rdata(name, answer.ttl, RData::A(A(answer.ipv4)))),
            RecordType::AAAA => Some(Record::from_rdata(
                name,
                answer.ttl,
                RData::AAAA(AAAA(answer.ipv6)),
            )),
            _ => None,
        };
        if let Some(record) = record {
            response.add_answer(record);
        }
    }

    response
}

/// SERVFAIL answer for a query whose upstream resolution failed.
pub fn servfail_response(query: &Message) -> Message {
    let mut response = response_to(query);
    response.set_response_code(ResponseCode::ServFail);
    response
}

/// DNS query handler, independent of the transport.
pub struct QueryHandler<C, R>
where
    C: DnsCache,
    R: DnsResolver,
{
    filter: Filter,
    cache: C,
    resolver: R,
    block_answer: BlockAnswer,
}

impl<C, R> QueryHandler<C, R>
where
    C: DnsCache,
    R: DnsResolver,
{
    /// Create a new query handler.
    pub fn new(filter: Filter, cache: C, resolver: R) -> Self {
        Self {
            filter,
            cache,
            resolver,
            block_answer: BlockAnswer::default(),
        }
    }

    #[must_use]
    pub fn with_block_answer(mut self, block_answer: BlockAnswer) -> Self {
        self.block_answer = block_answer;
        self
    }

    /// Answer a decoded query from `client`.
    ///
    /// Always produces a response: the block answer, the (possibly cached)
    /// upstream answer, or SERVFAIL when upstream resolution fails.
    #[instrument(skip(self, query), fields(id = query.id(), domain))]
    pub async fn handle_query(&self, query: &Message, client: IpAddr) -> Message {
        let Some(question) = query.queries().first() else {
            return servfail_response(query);
        };

        let name = question.name();
        tracing::Span::current().record("domain", name.to_string());

        // Wire form, as the proxy sees it in `Host`: punycode stays punycode.
        let decision = self.filter.decide(Channel::Dns, client, &name.to_ascii());
        if decision.is_blocked() {
            metrics::record_dns_query("blocked");
            return blocked_response(query, &self.block_answer);
        }

        let key = CacheKey::from_query(question);
        if let Some(mut cached) = self.cache.get(&key).await {
            tracing::debug!("cache hit");
            metrics::record_dns_query("cached");
            cached.set_id(query.id());
            // Echo this requester's question, including its letter case.
            cached.take_queries();
            cached.add_queries(query.queries().iter().cloned());
            return cached;
        }

        match self.resolver.resolve(query).await {
            Ok(mut response) => {
                metrics::record_dns_query("forwarded");
                response.set_id(query.id());
                if response.response_code() == ResponseCode::NoError {
                    self.cache.insert(key, response.clone()).await;
                }
                response
            }
            Err(err) => {
                tracing::warn!(error = %err, "upstream resolution failed");
                metrics::record_dns_query("servfail");
                servfail_response(query)
            }
        }
    }

    /// Handle one raw datagram.
    ///
    /// Returns `None` for packets that must be dropped silently: undecodable
    /// bytes, responses, and queries without a question.
    pub async fn handle_datagram(&self, bytes: &[u8], client: IpAddr) -> Option<Vec<u8>> {
        let query = match Message::from_bytes(bytes) {
            Ok(query) => query,
            Err(err) => {
                tracing::debug!(client = %client, error = %err, "dropping malformed datagram");
                metrics::record_dns_dropped();
                return None;
            }
        };

        if query.message_type() == MessageType::Response || query.queries().is_empty() {
            tracing::debug!(client = %client, id = query.id(), "dropping non-query datagram");
            metrics::record_dns_dropped();
            return None;
        }

        let response = self.handle_query(&query, client).await;
        match response.to_bytes() {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode response");
                servfail_response(&query).to_bytes().ok()
            }
        }
    }
}

impl<C, R> Clone for QueryHandler<C, R>
where
    C: DnsCache,
    R: DnsResolver,
{
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            cache: self.cache.clone(),
            resolver: self.resolver.clone(),
            block_answer: self.block_answer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocklist::{Snapshot, SnapshotReader, TenantData};
    use crate::cache::dns_cache::tests::MockCache;
    use crate::dns::resolver::tests::MockResolver;
    use crate::store::{DomainRule, IpWhitelistEntry, Tenant};
    use hickory_proto::op::{OpCode, Query};
    use hickory_proto::rr::Name;
    use std::str::FromStr;

    const CLIENT: &str = "192.168.1.1";

    fn client() -> IpAddr {
        CLIENT.parse().unwrap()
    }

    fn filter_with(rules: Vec<DomainRule>) -> Filter {
        let snapshot = Snapshot::build(
            1,
            vec![TenantData {
                tenant: Tenant {
                    id: "acme".to_string(),
                    active: true,
                },
                rules,
                whitelist: vec![IpWhitelistEntry::new("office", CLIENT)],
            }],
        );
        Filter::new(SnapshotReader::fixed(snapshot))
    }

    fn filter() -> Filter {
        filter_with(vec![
            DomainRule::exact("1", "facebook.com"),
            DomainRule::regex("2", r"^ads?\."),
        ])
    }

    fn create_query(domain: &str, record_type: RecordType, id: u16) -> Message {
        let name = Name::from_str(domain).unwrap();
        let mut query = Query::new();
        query.set_name(name);
        query.set_query_type(record_type);

        let mut message = Message::new();
        message.set_id(id).set_recursion_desired(true);
        message.add_query(query);
        message
    }

    fn create_response(id: u16, code: ResponseCode) -> Message {
        let mut response = Message::new();
        response
            .set_id(id)
            .set_message_type(MessageType::Response)
            .set_op_code(OpCode::Query)
            .set_response_code(code);
        response
    }

    fn handler(cache: MockCache, resolver: MockResolver) -> QueryHandler<MockCache, MockResolver> {
        QueryHandler::new(filter(), cache, resolver)
    }

    #[tokio::test]
    async fn should_answer_blocked_a_query_with_sinkhole() {
        let resolver = MockResolver::new();
        let handler = handler(MockCache::new(), resolver.clone());

        let query = create_query("www.facebook.com", RecordType::A, 1);
        let response = handler.handle_query(&query, client()).await;

        assert_eq!(response.id(), 1);
        assert_eq!(response.message_type(), MessageType::Response);
        assert!(response.recursion_desired());
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert_eq!(response.queries(), query.queries());
        assert_eq!(response.answers().len(), 1);
        let answer = &response.answers()[0];
        assert_eq!(answer.ttl(), 60);
        assert_eq!(
            answer.data().as_a(),
            Some(&A(Ipv4Addr::LOCALHOST))
        );
        assert_eq!(resolver.resolve_count(), 0);
    }

    #[tokio::test]
    async fn should_answer_blocked_aaaa_query_with_sinkhole() {
        let handler = handler(MockCache::new(), MockResolver::new());

        let query = create_query("facebook.com", RecordType::AAAA, 2);
        let response = handler.handle_query(&query, client()).await;

        assert_eq!(response.answers().len(), 1);
        assert_eq!(
            response.answers()[0].data().as_aaaa(),
            Some(&AAAA(Ipv6Addr::LOCALHOST))
        );
    }

    #[tokio::test]
    async fn should_answer_blocked_other_query_with_no_records() {
        let handler = handler(MockCache::new(), MockResolver::new());

        let query = create_query("ads.example.com", RecordType::MX, 3);
        let response = handler.handle_query(&query, client()).await;

        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert!(response.answers().is_empty());
    }

    #[tokio::test]
    async fn should_use_configured_block_answer() {
        let handler = handler(MockCache::new(), MockResolver::new()).with_block_answer(BlockAnswer {
            ipv4: Ipv4Addr::new(10, 0, 0, 53),
            ipv6: Ipv6Addr::UNSPECIFIED,
            ttl: 5,
        });

        let query = create_query("facebook.com", RecordType::A, 4);
        let response = handler.handle_query(&query, client()).await;

        let answer = &response.answers()[0];
        assert_eq!(answer.ttl(), 5);
        assert_eq!(
            answer.data().as_a(),
            Some(&A(Ipv4Addr::new(10, 0, 0, 53)))
        );
    }

    #[tokio::test]
    async fn should_forward_allowed_query_and_cache_answer() {
        let cache = MockCache::new();
        let resolver = MockResolver::new();
        resolver
            .add_response(
                Name::from_str("example.com").unwrap(),
                create_response(0, ResponseCode::NoError),
            )
            .await;
        let handler = handler(cache.clone(), resolver.clone());

        let query = create_query("example.com", RecordType::A, 456);
        let response = handler.handle_query(&query, client()).await;

        assert_eq!(response.id(), 456);
        assert_eq!(resolver.resolve_count(), 1);
        assert_eq!(cache.insert_call_count(), 1);

        let query = create_query("example.com", RecordType::A, 457);
        let response = handler.handle_query(&query, client()).await;
        assert_eq!(response.id(), 457);
        assert_eq!(resolver.resolve_count(), 1);
    }

    #[tokio::test]
    async fn should_echo_current_question_on_cache_hit() {
        let cache = MockCache::new();
        let resolver = MockResolver::new();
        // `from_str` runs IDNA mapping, which lowercases; keep the case as sent.
        let mixed_case = |domain: &str, id: u16| {
            let mut query = Query::new();
            query.set_name(Name::from_ascii(domain).unwrap());
            query.set_query_type(RecordType::A);
            let mut message = Message::new();
            message.set_id(id).add_query(query);
            message
        };
        let first = mixed_case("Example.COM", 20);
        let mut upstream = create_response(0, ResponseCode::NoError);
        upstream.add_queries(first.queries().iter().cloned());
        resolver.set_default_response(upstream).await;
        let handler = handler(cache.clone(), resolver.clone());

        handler.handle_query(&first, client()).await;

        let second = mixed_case("eXaMpLe.cOm", 21);
        let response = handler.handle_query(&second, client()).await;

        assert_eq!(resolver.resolve_count(), 1);
        assert_eq!(response.id(), 21);
        assert_eq!(response.queries().len(), 1);
        assert_eq!(response.queries()[0].name().to_string(), "eXaMpLe.cOm");
    }

    #[tokio::test]
    async fn should_block_punycode_names_from_ascii_and_unicode_rules() {
        let resolver = MockResolver::new();
        let handler = QueryHandler::new(
            filter_with(vec![
                DomainRule::exact("1", "xn--bcher-kva.example"),
                DomainRule::exact("2", "münchen.example"),
            ]),
            MockCache::new(),
            resolver.clone(),
        );

        let query = create_query("xn--bcher-kva.example", RecordType::A, 22);
        let response = handler.handle_query(&query, client()).await;
        assert_eq!(response.answers().len(), 1);

        let query = create_query("www.xn--mnchen-3ya.example", RecordType::A, 23);
        let response = handler.handle_query(&query, client()).await;
        assert_eq!(response.answers().len(), 1);

        assert_eq!(resolver.resolve_count(), 0);
    }

    #[tokio::test]
    async fn should_not_cache_error_answers() {
        let cache = MockCache::new();
        let handler = handler(cache.clone(), MockResolver::new());

        // The mock answers NXDOMAIN for unknown names.
        let query = create_query("unknown.example", RecordType::A, 9);
        let response = handler.handle_query(&query, client()).await;

        assert_eq!(response.response_code(), ResponseCode::NXDomain);
        assert_eq!(cache.insert_call_count(), 0);
    }

    #[tokio::test]
    async fn should_check_rules_before_cache() {
        let cache = MockCache::new();
        let name = Name::from_str("facebook.com").unwrap();
        cache
            .insert(
                CacheKey::new(&name, RecordType::A),
                create_response(1, ResponseCode::NoError),
            )
            .await;
        let handler = handler(cache.clone(), MockResolver::new());

        let query = create_query("facebook.com", RecordType::A, 10);
        let response = handler.handle_query(&query, client()).await;

        assert_eq!(response.answers().len(), 1);
        assert_eq!(cache.get_call_count(), 0);
    }

    #[tokio::test]
    async fn should_forward_blocked_domain_for_unknown_client() {
        let resolver = MockResolver::new();
        let handler = handler(MockCache::new(), resolver.clone());

        let query = create_query("facebook.com", RecordType::A, 11);
        handler
            .handle_query(&query, "10.9.9.9".parse().unwrap())
            .await;

        assert_eq!(resolver.resolve_count(), 1);
    }

    #[tokio::test]
    async fn should_answer_servfail_when_upstream_fails() {
        let resolver = MockResolver::new();
        resolver.set_error("connection refused").await;
        let handler = handler(MockCache::new(), resolver);

        let query = create_query("example.com", RecordType::A, 789);
        let response = handler.handle_query(&query, client()).await;

        assert_eq!(response.id(), 789);
        assert_eq!(response.response_code(), ResponseCode::ServFail);
        assert_eq!(response.queries(), query.queries());
    }

    #[tokio::test]
    async fn should_drop_malformed_datagrams() {
        let handler = handler(MockCache::new(), MockResolver::new());

        assert!(handler.handle_datagram(&[0x12], client()).await.is_none());
        assert!(handler.handle_datagram(&[], client()).await.is_none());

        let mut bytes = create_query("example.com", RecordType::A, 1)
            .to_bytes()
            .unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(handler.handle_datagram(&bytes, client()).await.is_none());
    }

    #[tokio::test]
    async fn should_drop_responses_and_empty_queries() {
        let handler = handler(MockCache::new(), MockResolver::new());

        let response = create_response(1, ResponseCode::NoError).to_bytes().unwrap();
        assert!(handler.handle_datagram(&response, client()).await.is_none());

        let mut empty = Message::new();
        empty.set_id(2);
        let empty = empty.to_bytes().unwrap();
        assert!(handler.handle_datagram(&empty, client()).await.is_none());
    }

    #[tokio::test]
    async fn should_encode_answer_for_valid_datagram() {
        let handler = handler(MockCache::new(), MockResolver::new());
        let query = create_query("facebook.com", RecordType::A, 0xBEEF);

        let bytes = handler
            .handle_datagram(&query.to_bytes().unwrap(), client())
            .await
            .unwrap();
        let response = Message::from_bytes(&bytes).unwrap();

        assert_eq!(response.id(), 0xBEEF);
        assert_eq!(response.answers().len(), 1);
    }
}

//! Query-to-answer decisions on top of the lease table.
//!
//! Two zones are served:
//!
//! - the configured forward domain (`A` queries, `<hostname>.<domain>`)
//! - the IPv4 reverse zone (`PTR` queries, `d.c.b.a.in-addr.arpa`)
//!
//! Everything else gets an empty answer section with `NOERROR`. Answers use
//! a TTL of zero since leases can change at any moment.

use std::net::Ipv4Addr;
use std::sync::Arc;

use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::{A, PTR};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use tracing::{debug, info, warn};

use crate::lease::{Lease, LeaseStore};

/// Suffix of reverse lookup names, including the leading label separator.
const IN_ADDR_ARPA: &str = ".in-addr.arpa.";

/// TTL of synthesized answers.
const ANSWER_TTL: u32 = 0;

/// Resolves lease-backed queries for one forward domain.
#[derive(Debug, Clone)]
pub struct Resolver {
    /// Lower-cased, dot-terminated forward domain.
    domain: String,
    /// The forward domain as configured, dot-terminated. Used in answers.
    origin: String,
    store: Arc<LeaseStore>,
}

impl Resolver {
    /// Creates a resolver answering for `domain` (e.g. `dhcp.local`).
    pub fn new(domain: &str, store: Arc<LeaseStore>) -> Self {
        let origin = domain.trim().trim_start_matches('.');
        let origin = if origin.ends_with('.') {
            origin.to_string()
        } else {
            format!("{}.", origin)
        };

        Self {
            domain: normalize_domain(domain),
            origin,
            store,
        }
    }

    /// Returns the forward domain in dot-terminated form.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Resolves a single question. `None` means an empty answer.
    pub async fn resolve(&self, name: &Name, query_type: RecordType) -> Option<Record> {
        let query = name.to_ascii().to_ascii_lowercase();
        let query = if query.ends_with('.') {
            query
        } else {
            format!("{}.", query)
        };

        if query.ends_with(IN_ADDR_ARPA) {
            if query_type != RecordType::PTR {
                debug!("Ignoring {} query for {}", query_type, query);
                return None;
            }
            return self.resolve_reverse(name, &query).await;
        }

        if let Some(hostname) = self.hostname_in_domain(&query) {
            if query_type != RecordType::A {
                debug!("Ignoring {} query for {}", query_type, query);
                return None;
            }
            return self.resolve_forward(hostname).await;
        }

        info!(
            "DNS query does not match configured domain: {} / {}",
            query, self.domain
        );
        None
    }

    /// Builds the reply for a request, answering every question in order.
    pub async fn answer(&self, request: &Message) -> Message {
        let mut response = Message::new();
        response
            .set_id(request.id())
            .set_message_type(MessageType::Response)
            .set_op_code(request.op_code())
            .set_recursion_desired(request.recursion_desired())
            .set_checking_disabled(request.checking_disabled())
            .set_response_code(ResponseCode::NoError);
        response.add_queries(request.queries().iter().cloned());

        for (index, query) in request.queries().iter().enumerate() {
            debug!("Query {}: {} {}", index, query.name(), query.query_type());

            if let Some(record) = self.resolve(query.name(), query.query_type()).await {
                debug!("Answer: {}", record);
                response.add_answer(record);
            }
        }

        response
    }

    /// Strips the forward domain, requiring a label boundary before it.
    fn hostname_in_domain<'a>(&self, query: &'a str) -> Option<&'a str> {
        if query == self.domain {
            return Some("");
        }
        query
            .strip_suffix(self.domain.as_str())?
            .strip_suffix('.')
    }

    async fn resolve_forward(&self, hostname: &str) -> Option<Record> {
        let Some(lease) = self.store.lookup(hostname).await else {
            debug!("Hostname not found: '{}'", hostname);
            return None;
        };

        let name = self.lease_name(&lease)?;
        Some(Record::from_rdata(name, ANSWER_TTL, RData::A(A(lease.ip))))
    }

    /// Answers with `owner`, the question name as it was asked.
    async fn resolve_reverse(&self, owner: &Name, query: &str) -> Option<Record> {
        let Some(ip) = reverse_name_to_ip(query) else {
            info!("Cannot parse IP from reverse name: {}", query);
            return None;
        };

        let Some(lease) = self.store.lookup_ip(ip).await else {
            debug!("IP not found: '{}'", ip);
            return None;
        };

        let target = self.lease_name(&lease)?;
        Some(Record::from_rdata(
            owner.clone(),
            ANSWER_TTL,
            RData::PTR(PTR(target)),
        ))
    }

    /// Builds `<hostname>.<domain>` keeping the case of both.
    fn lease_name(&self, lease: &Lease) -> Option<Name> {
        let fqdn = format!("{}.{}", lease.hostname, self.origin);
        match Name::from_ascii(&fqdn) {
            Ok(name) => Some(name),
            Err(error) => {
                warn!("Lease hostname is not a valid DNS name {}: {}", fqdn, error);
                None
            }
        }
    }
}

/// Lower-cases `domain` and makes it dot-terminated.
pub fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
    if domain.ends_with('.') {
        domain
    } else {
        format!("{}.", domain)
    }
}

/// Turns `d.c.b.a.in-addr.arpa.` into `a.b.c.d`.
pub fn reverse_name_to_ip(query: &str) -> Option<Ipv4Addr> {
    let octets = query.strip_suffix(IN_ADDR_ARPA)?;
    let mut parts: Vec<&str> = octets.split('.').collect();
    parts.reverse();
    parts.join(".").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use hickory_proto::op::{OpCode, Query};

    async fn test_resolver() -> Resolver {
        let store = Arc::new(LeaseStore::new());
        let now = Utc::now();
        let leases = [
            ([192, 168, 10, 20], Some("fuzzy")),
            ([192, 168, 10, 21], Some("Laptop")),
            ([10, 0, 0, 5], None),
        ];
        for (ip, hostname) in leases {
            let lease = Lease::new(
                Ipv4Addr::from(ip),
                hostname,
                now - TimeDelta::minutes(10),
                now + TimeDelta::hours(1),
            );
            assert!(store.add(lease).await);
        }
        Resolver::new("dhcp.local", store)
    }

    fn name(text: &str) -> Name {
        Name::from_ascii(text).unwrap()
    }

    fn a_address(record: &Record) -> Option<Ipv4Addr> {
        match record.data() {
            Some(RData::A(A(ip))) => Some(*ip),
            _ => None,
        }
    }

    fn ptr_target(record: &Record) -> Option<String> {
        match record.data() {
            Some(RData::PTR(PTR(name))) => Some(name.to_ascii()),
            _ => None,
        }
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("dhcp.local"), "dhcp.local.");
        assert_eq!(normalize_domain("DHCP.Local."), "dhcp.local.");
        assert_eq!(normalize_domain(".lan"), "lan.");
    }

    #[test]
    fn test_reverse_name_to_ip() {
        assert_eq!(
            reverse_name_to_ip("20.10.168.192.in-addr.arpa."),
            Some(Ipv4Addr::new(192, 168, 10, 20))
        );
        assert_eq!(reverse_name_to_ip("10.168.192.in-addr.arpa."), None);
        assert_eq!(reverse_name_to_ip("x.10.168.192.in-addr.arpa."), None);
        assert_eq!(reverse_name_to_ip("20.10.168.192.ip6.arpa."), None);
    }

    #[tokio::test]
    async fn test_forward_resolution() {
        let resolver = test_resolver().await;
        let record = resolver
            .resolve(&name("fuzzy.dhcp.local."), RecordType::A)
            .await
            .unwrap();

        assert_eq!(record.name().to_ascii(), "fuzzy.dhcp.local.");
        assert_eq!(record.record_type(), RecordType::A);
        assert_eq!(record.ttl(), 0);
        assert_eq!(a_address(&record), Some(Ipv4Addr::new(192, 168, 10, 20)));
    }

    #[tokio::test]
    async fn test_forward_keeps_lease_case() {
        let resolver = test_resolver().await;
        let record = resolver
            .resolve(&name("LAPTOP.DHCP.LOCAL"), RecordType::A)
            .await
            .unwrap();

        assert_eq!(record.name().to_ascii(), "Laptop.dhcp.local.");
        assert_eq!(a_address(&record), Some(Ipv4Addr::new(192, 168, 10, 21)));
    }

    #[tokio::test]
    async fn test_forward_synthesized_hostname() {
        let resolver = test_resolver().await;
        let record = resolver
            .resolve(&name("dhcp-10-0-0-5.dhcp.local."), RecordType::A)
            .await
            .unwrap();
        assert_eq!(a_address(&record), Some(Ipv4Addr::new(10, 0, 0, 5)));
    }

    #[tokio::test]
    async fn test_reverse_resolution() {
        let resolver = test_resolver().await;
        let record = resolver
            .resolve(&name("20.10.168.192.in-addr.arpa."), RecordType::PTR)
            .await
            .unwrap();

        assert_eq!(record.name().to_ascii(), "20.10.168.192.in-addr.arpa.");
        assert_eq!(record.record_type(), RecordType::PTR);
        assert_eq!(record.ttl(), 0);
        assert_eq!(ptr_target(&record).as_deref(), Some("fuzzy.dhcp.local."));
    }

    #[tokio::test]
    async fn test_reverse_owner_echoes_question() {
        let resolver = test_resolver().await;
        let record = resolver
            .resolve(&name("20.10.168.192.IN-ADDR.Arpa."), RecordType::PTR)
            .await
            .unwrap();

        assert_eq!(record.name().to_ascii(), "20.10.168.192.IN-ADDR.Arpa.");
        assert_eq!(ptr_target(&record).as_deref(), Some("fuzzy.dhcp.local."));
    }

    #[tokio::test]
    async fn test_answers_use_configured_domain_case() {
        let store = Arc::new(LeaseStore::new());
        let now = Utc::now();
        store
            .add(Lease::new(
                Ipv4Addr::new(192, 168, 10, 20),
                Some("fuzzy"),
                now - TimeDelta::minutes(10),
                now + TimeDelta::hours(1),
            ))
            .await;
        let resolver = Resolver::new("Home.LAN", store);
        assert_eq!(resolver.domain(), "home.lan.");

        let record = resolver
            .resolve(&name("fuzzy.home.lan."), RecordType::A)
            .await
            .unwrap();
        assert_eq!(record.name().to_ascii(), "fuzzy.Home.LAN.");
    }

    #[tokio::test]
    async fn test_misses_yield_no_answer() {
        let resolver = test_resolver().await;

        assert!(resolver.resolve(&name("nobody.dhcp.local."), RecordType::A).await.is_none());
        assert!(resolver.resolve(&name("fuzzy.dhcp.local."), RecordType::AAAA).await.is_none());
        assert!(resolver.resolve(&name("fuzzy.dhcp.local."), RecordType::PTR).await.is_none());
        assert!(resolver.resolve(&name("fuzzy.example.com."), RecordType::A).await.is_none());
        assert!(resolver.resolve(&name("fuzzydhcp.local."), RecordType::A).await.is_none());
        assert!(resolver.resolve(&name("dhcp.local."), RecordType::A).await.is_none());
        assert!(resolver.resolve(&name("a.fuzzy.dhcp.local."), RecordType::A).await.is_none());
        assert!(
            resolver
                .resolve(&name("20.10.168.192.in-addr.arpa."), RecordType::A)
                .await
                .is_none()
        );
        assert!(
            resolver
                .resolve(&name("99.10.168.192.in-addr.arpa."), RecordType::PTR)
                .await
                .is_none()
        );
        assert!(
            resolver
                .resolve(&name("10.168.192.in-addr.arpa."), RecordType::PTR)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_answer_multiple_questions_in_order() {
        let resolver = test_resolver().await;

        let mut request = Message::new();
        request
            .set_id(4242)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true);
        request.add_query(Query::query(
            Name::from_ascii("21.10.168.192.in-addr.arpa.").unwrap(),
            RecordType::PTR,
        ));
        request.add_query(Query::query(
            Name::from_ascii("unknown.dhcp.local.").unwrap(),
            RecordType::A,
        ));
        request.add_query(Query::query(
            Name::from_ascii("fuzzy.dhcp.local.").unwrap(),
            RecordType::A,
        ));

        let response = resolver.answer(&request).await;

        assert_eq!(response.id(), 4242);
        assert_eq!(response.message_type(), MessageType::Response);
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert!(response.recursion_desired());
        assert_eq!(response.queries().len(), 3);

        let answers = response.answers();
        assert_eq!(answers.len(), 2);
        assert_eq!(ptr_target(&answers[0]).as_deref(), Some("Laptop.dhcp.local."));
        assert_eq!(a_address(&answers[1]), Some(Ipv4Addr::new(192, 168, 10, 20)));
    }

    #[tokio::test]
    async fn test_answer_without_match_is_empty_success() {
        let resolver = test_resolver().await;

        let mut request = Message::new();
        request.set_id(7).set_message_type(MessageType::Query);
        request.add_query(Query::query(
            Name::from_ascii("www.example.com.").unwrap(),
            RecordType::MX,
        ));

        let response = resolver.answer(&request).await;
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert!(response.answers().is_empty());
        assert_eq!(response.queries().len(), 1);
    }
}

//! Active lease tracking.
//!
//! This module keeps the in-memory view of the dhcpd lease database that the
//! resolver answers from. Nothing is persisted; the table is rebuilt from the
//! lease file on every start.
//!
//! # Indexes
//!
//! [`LeaseStore`] keeps two maps that are written together on every
//! [`add`](LeaseStore::add):
//!
//! - lower-cased hostname → lease
//! - IP address → lease
//!
//! Each map is last-write-wins for its own key. When a client changes its
//! hostname but keeps its address (or the reverse), the stale key in the
//! other map is not removed eagerly; it stays until the expiry sweep drops
//! it, and lookups refuse it once its `ends` has passed.
//!
//! # Thread Safety
//!
//! A single [`Mutex`] guards both maps. Adds sweep expired entries while
//! holding it; lookups only read and gate on time instead of mutating.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Builds the `dhcp-a-b-c-d` name used for clients without a hostname.
pub fn synthesize_hostname(ip: Ipv4Addr) -> String {
    let [a, b, c, d] = ip.octets();
    format!("dhcp-{}-{}-{}-{}", a, b, c, d)
}

/// A lease record read from the dhcpd lease file.
///
/// `starts` and `ends` define the half-open validity interval
/// `[starts, ends)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lease {
    /// The leased address.
    pub ip: Ipv4Addr,

    /// Client hostname as declared, or synthesized from the address.
    ///
    /// Case is preserved here; indexing lower-cases it.
    pub hostname: String,

    /// Start of the validity interval (UTC).
    pub starts: DateTime<Utc>,

    /// End of the validity interval (UTC), exclusive.
    pub ends: DateTime<Utc>,

    /// Set when dhcpd marked the address abandoned.
    pub abandoned: bool,
}

impl Lease {
    /// Creates a lease, synthesizing the hostname when none is given.
    pub fn new(
        ip: Ipv4Addr,
        hostname: Option<&str>,
        starts: DateTime<Utc>,
        ends: DateTime<Utc>,
    ) -> Self {
        let hostname = match hostname.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => synthesize_hostname(ip),
        };

        Self {
            ip,
            hostname,
            starts,
            ends,
            abandoned: false,
        }
    }

    /// Returns true if the lease may be stored at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.abandoned && self.ends > now
    }

    /// Returns true if `now` falls inside `[starts, ends)`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.starts <= now && now < self.ends
    }

    /// Returns true if the lease has ended at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ends <= now
    }

    /// Returns time left until `ends`, or zero if already over.
    pub fn remaining(&self, now: DateTime<Utc>) -> TimeDelta {
        (self.ends - now).max(TimeDelta::zero())
    }
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (ends in {}s)",
            self.hostname,
            self.ip,
            self.remaining(Utc::now()).num_seconds()
        )
    }
}

#[derive(Debug, Default)]
struct Indexes {
    by_hostname: HashMap<String, Lease>,
    by_ip: HashMap<Ipv4Addr, Lease>,
}

impl Indexes {
    fn sweep(&mut self, now: DateTime<Utc>) {
        self.by_hostname.retain(|hostname, lease| {
            let keep = !lease.is_expired(now);
            if !keep {
                debug!("Deleting expired lease for hostname {}", hostname);
            }
            keep
        });
        self.by_ip.retain(|ip, lease| {
            let keep = !lease.is_expired(now);
            if !keep {
                debug!("Deleting expired lease for {}", ip);
            }
            keep
        });
    }
}

/// Thread-safe, time-aware table of active leases.
///
/// # Example
///
/// ```
/// use std::net::Ipv4Addr;
/// use chrono::{TimeDelta, Utc};
/// use leasedns::{Lease, LeaseStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = LeaseStore::new();
/// let now = Utc::now();
/// let lease = Lease::new(
///     Ipv4Addr::new(192, 168, 10, 20),
///     Some("fuzzy"),
///     now - TimeDelta::minutes(5),
///     now + TimeDelta::hours(1),
/// );
///
/// assert!(store.add(lease).await);
/// assert!(store.lookup("FUZZY").await.is_some());
/// # }
/// ```
#[derive(Debug, Default)]
pub struct LeaseStore {
    indexes: Mutex<Indexes>,
}

impl LeaseStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a lease as of the current time. See [`add_at`](Self::add_at).
    pub async fn add(&self, lease: Lease) -> bool {
        self.add_at(lease, Utc::now()).await
    }

    /// Adds a lease as of `now`.
    ///
    /// Abandoned leases and leases already over at `now` are ignored.
    /// Otherwise both indexes are written and then swept of every entry
    /// whose `ends` has passed. Returns true if the lease was stored.
    pub async fn add_at(&self, lease: Lease, now: DateTime<Utc>) -> bool {
        if lease.abandoned {
            debug!("Ignoring abandoned lease: {}", lease.ip);
            return false;
        }
        if !lease.is_eligible(now) {
            debug!("Ignoring expired lease: {}", lease);
            return false;
        }

        info!(
            "Adding lease: {}: {} remaining: {}m",
            lease.hostname,
            lease.ip,
            lease.remaining(now).num_minutes()
        );

        let mut indexes = self.indexes.lock().await;
        indexes
            .by_hostname
            .insert(lease.hostname.to_lowercase(), lease.clone());
        indexes.by_ip.insert(lease.ip, lease);
        indexes.sweep(now);

        true
    }

    /// Looks up the lease currently held by `hostname` (case-insensitive).
    pub async fn lookup(&self, hostname: &str) -> Option<Lease> {
        self.lookup_at(hostname, Utc::now()).await
    }

    /// Looks up the lease held by `hostname` as of `now`.
    ///
    /// Entries outside their validity interval are not returned, even if
    /// they have not been swept yet.
    pub async fn lookup_at(&self, hostname: &str, now: DateTime<Utc>) -> Option<Lease> {
        let indexes = self.indexes.lock().await;
        indexes
            .by_hostname
            .get(&hostname.to_lowercase())
            .filter(|lease| lease.is_active(now))
            .cloned()
    }

    /// Looks up the lease currently held on `ip`.
    pub async fn lookup_ip(&self, ip: Ipv4Addr) -> Option<Lease> {
        self.lookup_ip_at(ip, Utc::now()).await
    }

    /// Looks up the lease held on `ip` as of `now`.
    pub async fn lookup_ip_at(&self, ip: Ipv4Addr, now: DateTime<Utc>) -> Option<Lease> {
        let indexes = self.indexes.lock().await;
        indexes
            .by_ip
            .get(&ip)
            .filter(|lease| lease.is_active(now))
            .cloned()
    }

    /// Returns the leases active now, ordered by address.
    pub async fn list(&self) -> Vec<Lease> {
        self.list_at(Utc::now()).await
    }

    /// Returns the leases active at `now`, ordered by address.
    pub async fn list_at(&self, now: DateTime<Utc>) -> Vec<Lease> {
        let indexes = self.indexes.lock().await;
        let mut leases: Vec<Lease> = indexes
            .by_ip
            .values()
            .filter(|lease| lease.is_active(now))
            .cloned()
            .collect();
        leases.sort_by_key(|lease| lease.ip);
        leases
    }

    /// Returns the number of entries held in the hostname and IP indexes,
    /// including ones that have ended but were not swept yet.
    pub async fn len(&self) -> (usize, usize) {
        let indexes = self.indexes.lock().await;
        (indexes.by_hostname.len(), indexes.by_ip.len())
    }

    /// Returns true if neither index holds an entry.
    pub async fn is_empty(&self) -> bool {
        self.len().await == (0, 0)
    }
}

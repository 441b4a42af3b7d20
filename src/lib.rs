//! # leasedns
//!
//! A small DNS responder that answers for hosts holding active ISC dhcpd
//! leases, read live from the `dhcpd.leases` file.
//!
//! ## Features
//!
//! - Forward `A` answers for `<hostname>.<domain>`
//! - Reverse `PTR` answers in `in-addr.arpa`
//! - Clients without a hostname are served as `dhcp-a-b-c-d`
//! - Lease file read incrementally, in chunks of any size
//! - No state on disk; everything is rebuilt from the lease file
//! - Async/await with Tokio
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use leasedns::{Config, DnsServer, LeaseSource, LeaseStore, feed_leases};
//!
//! #[tokio::main]
//! async fn main() -> leasedns::Result<()> {
//!     let config = Config::default();
//!     let store = Arc::new(LeaseStore::new());
//!     let mut source = LeaseSource::open(&config).await?;
//!     let server = DnsServer::new(&config, Arc::clone(&store))?;
//!
//!     tokio::select! {
//!         result = feed_leases(&mut source, &store) => result,
//!         result = server.run() => result,
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`LeaseParser`] - Resumable parser for the lease file format
//! - [`LeaseStore`] - Thread-safe table of active leases, by hostname and IP
//! - [`Resolver`] - Maps DNS questions to answers from the store
//! - [`DnsServer`] - UDP listener
//! - [`LeaseSource`] - Lease file byte stream (`tail -f` or native follower)
//! - [`LeaseStream`] - Byte stream that can report starting over on a new file
//! - [`Config`] - Domain, port, lease file and logging settings

pub mod config;
pub mod error;
pub mod feed;
pub mod lease;
pub mod parser;
pub mod resolver;
pub mod server;
pub mod source;

pub use config::{Config, SourceKind};
pub use error::{Error, Result};
pub use feed::{feed_leases, load_leases};
pub use lease::{Lease, LeaseStore};
pub use parser::{LeaseParser, Parsed};
pub use resolver::Resolver;
pub use server::DnsServer;
pub use source::{LeaseSource, LeaseStream};

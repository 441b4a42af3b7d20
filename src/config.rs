use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use hickory_proto::rr::Name;

use crate::error::{Error, Result};
use crate::resolver::normalize_domain;

/// Where lease file bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Spawn `tail -f` on the lease file and read its output.
    #[default]
    Tail,
    /// Follow the lease file natively, polling for appended data.
    Follow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub domain: String,
    pub dns_port: u16,
    pub bind_address: IpAddr,
    pub leases_file: PathBuf,
    pub source: SourceKind,
    pub debug: bool,
    pub quiet: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            domain: "dhcp.local".to_string(),
            // 5353 is mDNS
            dns_port: 5333,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            leases_file: PathBuf::from("/var/db/dhcpd.leases"),
            source: SourceKind::Tail,
            debug: false,
            quiet: false,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let domain = normalize_domain(&self.domain);

        if domain == "." {
            return Err(Error::InvalidConfig("domain must not be empty".to_string()));
        }

        if let Err(error) = Name::from_str(&domain) {
            return Err(Error::InvalidConfig(format!(
                "domain {} is not a valid DNS name: {}",
                self.domain, error
            )));
        }

        if domain == "in-addr.arpa." || domain.ends_with(".in-addr.arpa.") {
            return Err(Error::InvalidConfig(
                "domain must not be inside the reverse zone".to_string(),
            ));
        }

        if self.dns_port == 0 {
            return Err(Error::InvalidConfig(
                "dns_port must be greater than 0".to_string(),
            ));
        }

        if self.leases_file.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "leases_file must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn dns_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.dns_port)
    }

    /// Default tracing filter for the debug/quiet toggles.
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

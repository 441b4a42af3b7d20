//! Resumable parser for the ISC dhcpd lease file format.
//!
//! The lease file is an append-only log that is read while dhcpd keeps
//! writing to it, so bytes arrive in chunks of arbitrary size. The parser
//! buffers whatever has not been consumed yet and only commits its cursor
//! once a whole record (or a whole junk line) has been recognized. Feeding
//! the same bytes split at any boundaries produces the same leases as
//! feeding them at once.
//!
//! # Record Format
//!
//! ```text
//! lease 192.168.10.20 {
//!   starts 5 2020/03/27 15:27:49 UTC;
//!   ends 6 2020/03/28 03:27:49 UTC;
//!   hardware ethernet 00:01:02:03:04:05;
//!   uid "\001\000\001\002\003\004\005";
//!   client-hostname "fuzzy";
//! }
//! ```
//!
//! Fields other than `starts`, `ends`, `client-hostname` and `abandoned`
//! are skipped up to the end of their line. Text outside of records is
//! skipped line by line.

use std::net::Ipv4Addr;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, info};

use crate::lease::Lease;

/// Bytes skipped between tokens.
const WHITESPACE: &[u8] = b" \n\t";

/// Bytes that may appear in the address after `lease`.
const IP_CHARS: &[u8] = b"0123456789.";

/// Timestamp layout after the leading weekday digit and space.
const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S UTC";

/// Outcome of a single [`LeaseParser::parse_next`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    /// A complete record was read.
    Lease(Lease),

    /// The buffer ends before the next record does. Nothing was consumed.
    Incomplete,

    /// A line that does not start a record was discarded.
    Skipped,
}

/// Marker for running out of buffered bytes mid-token.
#[derive(Debug)]
struct NeedMore;

type Step<T> = std::result::Result<T, NeedMore>;

/// Fields collected while inside `lease <ip> { ... }`.
#[derive(Debug)]
struct PartialLease {
    ip: Ipv4Addr,
    hostname: Option<String>,
    starts: DateTime<Utc>,
    ends: DateTime<Utc>,
    abandoned: bool,
}

impl PartialLease {
    fn new(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            hostname: None,
            starts: DateTime::default(),
            ends: DateTime::default(),
            abandoned: false,
        }
    }

    fn finish(self) -> Lease {
        let mut lease = Lease::new(self.ip, self.hostname.as_deref(), self.starts, self.ends);
        lease.abandoned = self.abandoned;
        lease
    }
}

/// Incremental lease record scanner.
///
/// # Example
///
/// ```
/// use leasedns::LeaseParser;
///
/// let mut parser = LeaseParser::new();
/// parser.add_data(b"lease 10.0.0.5 {\n  starts 1 2030/01/07 10:00:00 UTC;\n");
/// assert!(parser.next_lease().is_none());
///
/// parser.add_data(b"  ends 1 2030/01/07 22:00:00 UTC;\n}\n");
/// let lease = parser.next_lease().unwrap();
/// assert_eq!(lease.hostname, "dhcp-10-0-0-5");
/// ```
#[derive(Debug, Default)]
pub struct LeaseParser {
    data: Vec<u8>,
    pos: usize,
}

impl LeaseParser {
    /// Creates a parser with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk, dropping bytes that were already consumed.
    pub fn add_data(&mut self, chunk: &[u8]) {
        debug!("Parser: adding {} bytes to {} buffered", chunk.len(), self.buffered());
        self.data.drain(..self.pos);
        self.pos = 0;
        self.data.extend_from_slice(chunk);
    }

    /// Returns the number of buffered bytes not consumed yet.
    pub fn buffered(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Attempts to read the next record from the buffer.
    ///
    /// On [`Parsed::Incomplete`] the cursor is left where it was on entry,
    /// so the same bytes are scanned again after [`add_data`](Self::add_data).
    pub fn parse_next(&mut self) -> Parsed {
        let start = self.pos;
        match self.scan() {
            Ok(parsed) => parsed,
            Err(NeedMore) => {
                self.pos = start;
                Parsed::Incomplete
            }
        }
    }

    /// Returns the next complete lease, skipping junk lines, or `None` once
    /// more data is needed.
    pub fn next_lease(&mut self) -> Option<Lease> {
        loop {
            match self.parse_next() {
                Parsed::Lease(lease) => return Some(lease),
                Parsed::Skipped => continue,
                Parsed::Incomplete => return None,
            }
        }
    }

    fn scan(&mut self) -> Step<Parsed> {
        let Some(ip) = self.header()? else {
            self.discard_line()?;
            return Ok(Parsed::Skipped);
        };

        let mut record = PartialLease::new(ip);

        loop {
            self.skip_whitespace()?;

            if self.consume(b"}") {
                let lease = record.finish();
                debug!("Parser: lease found: {:?}", lease);
                return Ok(Parsed::Lease(lease));
            }

            if self.consume(b"starts") {
                match self.timestamp()? {
                    Some(starts) => record.starts = starts,
                    None => self.discard_line()?,
                }
                continue;
            }

            if self.consume(b"ends") {
                match self.timestamp()? {
                    Some(ends) => record.ends = ends,
                    None => self.discard_line()?,
                }
                continue;
            }

            if self.consume(b"hardware ethernet") {
                self.skip_whitespace()?;
                self.collect_until(b';')?;
                continue;
            }

            if self.consume(b"uid") {
                self.skip_whitespace()?;
                self.collect_until(b';')?;
                continue;
            }

            if self.consume(b"client-hostname") {
                self.skip_whitespace()?;
                let raw = self.collect_until(b';')?;
                let value = String::from_utf8_lossy(raw);
                record.hostname = Some(value.trim().trim_matches('"').trim().to_string());
                continue;
            }

            if self.consume(b"abandoned") {
                self.skip_whitespace()?;
                self.consume(b";");
                record.abandoned = true;
                continue;
            }

            self.discard_line()?;
        }
    }

    /// Matches `lease <ip> {`. `Ok(None)` means the text is not a record
    /// header and the current line should be dropped.
    fn header(&mut self) -> Step<Option<Ipv4Addr>> {
        self.skip_whitespace()?;
        if !self.consume(b"lease") {
            return Ok(None);
        }

        self.skip_whitespace()?;
        let raw = self.collect_while(IP_CHARS)?;
        let Some(ip) = std::str::from_utf8(raw)
            .ok()
            .and_then(|text| text.parse::<Ipv4Addr>().ok())
        else {
            return Ok(None);
        };

        self.skip_whitespace()?;
        if !self.consume(b"{") {
            return Ok(None);
        }

        Ok(Some(ip))
    }

    fn timestamp(&mut self) -> Step<Option<DateTime<Utc>>> {
        self.skip_whitespace()?;
        let raw = self.collect_until(b';')?;
        Ok(parse_timestamp(raw))
    }

    fn consume(&mut self, expected: &[u8]) -> bool {
        let matched = self.data[self.pos..].starts_with(expected);
        if matched {
            self.pos += expected.len();
        }
        matched
    }

    /// Returns the bytes up to `separator` and consumes the separator too.
    fn collect_until(&mut self, separator: u8) -> Step<&[u8]> {
        let start = self.pos;
        let offset = self.data[start..]
            .iter()
            .position(|&byte| byte == separator)
            .ok_or(NeedMore)?;
        self.pos = start + offset + 1;
        Ok(&self.data[start..start + offset])
    }

    /// Returns the longest run of bytes from `allowed`. The run must be
    /// followed by some other byte to be known complete.
    fn collect_while(&mut self, allowed: &[u8]) -> Step<&[u8]> {
        let start = self.pos;
        let offset = self.data[start..]
            .iter()
            .position(|byte| !allowed.contains(byte))
            .ok_or(NeedMore)?;
        self.pos = start + offset;
        Ok(&self.data[start..start + offset])
    }

    fn skip_whitespace(&mut self) -> Step<()> {
        self.collect_while(WHITESPACE).map(|_| ())
    }

    fn discard_line(&mut self) -> Step<()> {
        let discarded = self.collect_until(b'\n')?;
        debug!("Parser: discarding '{}'", String::from_utf8_lossy(discarded));
        Ok(())
    }
}

/// Parses `<weekday> YYYY/MM/DD HH:MM:SS UTC`.
fn parse_timestamp(raw: &[u8]) -> Option<DateTime<Utc>> {
    if raw.len() < 2 {
        info!("Cannot parse timestamp '{}'", String::from_utf8_lossy(raw));
        return None;
    }

    let text = String::from_utf8_lossy(&raw[2..]);
    match NaiveDateTime::parse_from_str(&text, TIMESTAMP_FORMAT) {
        Ok(timestamp) => Some(timestamp.and_utc()),
        Err(error) => {
            info!("Cannot parse timestamp '{}': {}", text, error);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = "
	lease 192.168.10.20 {
		starts 5 2020/03/27 15:27:49 UTC;
		ends 6 2020/03/28 03:27:49 UTC;
		hardware ethernet 00:01:02:03:04:05;
		client-hostname \"fuzzy\";
	}

 	 lease 192.168.10.21 {
		starts 5 2020/03/27 15:27:49 UTC;
		ends 6 2020/03/28 03:27:49 UTC;
		hardware ethernet 00:01:02:03:04:06;
		uid \"\\001\\000\\001\\002\\003\\004\\006\";
		abandoned;
	}
";

    fn parse_whole(data: &[u8]) -> Vec<Lease> {
        let mut parser = LeaseParser::new();
        parser.add_data(data);
        std::iter::from_fn(|| parser.next_lease()).collect()
    }

    fn parse_chunked(data: &[u8], chunk_size: usize) -> Vec<Lease> {
        let mut parser = LeaseParser::new();
        let mut leases = Vec::new();
        for chunk in data.chunks(chunk_size) {
            parser.add_data(chunk);
            while let Some(lease) = parser.next_lease() {
                leases.push(lease);
            }
        }
        leases
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_parse_sample() {
        let leases = parse_whole(SAMPLE.as_bytes());
        assert_eq!(leases.len(), 2);

        let fuzzy = &leases[0];
        assert_eq!(fuzzy.ip, Ipv4Addr::new(192, 168, 10, 20));
        assert_eq!(fuzzy.hostname, "fuzzy");
        assert_eq!(fuzzy.starts, utc(2020, 3, 27, 15, 27, 49));
        assert_eq!(fuzzy.ends, utc(2020, 3, 28, 3, 27, 49));
        assert!(!fuzzy.abandoned);

        let abandoned = &leases[1];
        assert_eq!(abandoned.ip, Ipv4Addr::new(192, 168, 10, 21));
        assert_eq!(abandoned.hostname, "dhcp-192-168-10-21");
        assert!(abandoned.abandoned);
    }

    #[test]
    fn test_chunk_invariance_all_sizes() {
        let data = SAMPLE.as_bytes();
        let expected = parse_whole(data);
        assert_eq!(expected.len(), 2);

        for chunk_size in 1..=data.len() {
            assert_eq!(
                parse_chunked(data, chunk_size),
                expected,
                "chunk size {}",
                chunk_size
            );
        }
    }

    #[test]
    fn test_incomplete_keeps_cursor() {
        let mut parser = LeaseParser::new();
        parser.add_data(b"lease 10.0.0.5 {\n  starts 1 2030/01/07 10:0");

        let buffered = parser.buffered();
        assert_eq!(parser.parse_next(), Parsed::Incomplete);
        assert_eq!(parser.buffered(), buffered);
        assert_eq!(parser.parse_next(), Parsed::Incomplete);

        parser.add_data(b"0:00 UTC;\n}\n");
        match parser.parse_next() {
            Parsed::Lease(lease) => {
                assert_eq!(lease.ip, Ipv4Addr::new(10, 0, 0, 5));
                assert_eq!(lease.starts, utc(2030, 1, 7, 10, 0, 0));
            }
            other => panic!("expected lease, got {:?}", other),
        }
        assert_eq!(parser.parse_next(), Parsed::Incomplete);
    }

    #[test]
    fn test_consumed_prefix_dropped() {
        let mut parser = LeaseParser::new();
        parser.add_data(b"lease 10.0.0.1 {\n}\nlease 10.0");
        assert!(parser.next_lease().is_some());
        assert_eq!(parser.buffered(), b"\nlease 10.0".len());

        parser.add_data(b".0.2 {\n}\n");
        assert_eq!(parser.data.len(), b"\nlease 10.0.0.2 {\n}\n".len());
        assert_eq!(parser.next_lease().unwrap().ip, Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn test_hostname_synthesized_when_missing() {
        let leases = parse_whole(b"lease 10.0.0.5 {\n  client-hostname \"\";\n}\n");
        assert_eq!(leases[0].hostname, "dhcp-10-0-0-5");

        let leases = parse_whole(b"lease 10.0.0.5 {\n}\n");
        assert_eq!(leases[0].hostname, "dhcp-10-0-0-5");
    }

    #[test]
    fn test_hostname_unquoted_and_trimmed() {
        let leases = parse_whole(b"lease 10.0.0.7 {\n  client-hostname \" Laptop \" ;\n}\n");
        assert_eq!(leases[0].hostname, "Laptop");
    }

    #[test]
    fn test_junk_lines_skipped() {
        let data = b"# The format of this file is documented in dhcpd.leases(5).\n\
authoring-byte-order little-endian;\n\
server-duid \"\\000\\001\\000\\001\";\n\
lease 10.0.0.300 {\n\
lease 10.0.0.8 {\n\
}\n";
        let mut parser = LeaseParser::new();
        parser.add_data(data);

        assert_eq!(parser.parse_next(), Parsed::Skipped);
        assert_eq!(parser.parse_next(), Parsed::Skipped);
        assert_eq!(parser.parse_next(), Parsed::Skipped);
        assert_eq!(parser.parse_next(), Parsed::Skipped);
        match parser.parse_next() {
            Parsed::Lease(lease) => assert_eq!(lease.ip, Ipv4Addr::new(10, 0, 0, 8)),
            other => panic!("expected lease, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let data = b"lease 10.0.0.9 {
  starts 3 2022/04/20 17:27:07 UTC;
  ends 4 2022/04/21 05:27:07 UTC;
  cltt 3 2022/04/20 17:27:07 UTC;
  binding state active;
  next binding state free;
  set vendor-class-identifier = \"android-dhcp-11\";
  client-hostname \"phone\";
}
";
        let leases = parse_whole(data);
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].hostname, "phone");
        assert_eq!(leases[0].ends, utc(2022, 4, 21, 5, 27, 7));
    }

    #[test]
    fn test_bad_timestamp_skips_line() {
        let data = b"lease 10.0.0.10 {
  starts 5 2020/13/45 99:00:00 UTC;
  ends 6;
  ends 6 2020/03/28 03:27:49 UTC;
  client-hostname \"clock\";
}
";
        let leases = parse_whole(data);
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].starts, DateTime::<Utc>::default());
        assert_eq!(leases[0].ends, utc(2020, 3, 28, 3, 27, 49));
        assert_eq!(leases[0].hostname, "clock");
    }

    #[test]
    fn test_single_line_record() {
        let leases = parse_whole(b"lease 10.0.0.11 { abandoned; client-hostname \"x\"; }");
        assert_eq!(leases.len(), 1);
        assert!(leases[0].abandoned);
        assert_eq!(leases[0].hostname, "x");
    }

    #[test]
    fn test_empty_input() {
        let mut parser = LeaseParser::new();
        assert_eq!(parser.parse_next(), Parsed::Incomplete);
        parser.add_data(b"");
        assert_eq!(parser.parse_next(), Parsed::Incomplete);
        parser.add_data(b"   \n\t");
        assert_eq!(parser.parse_next(), Parsed::Incomplete);
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(
            parse_timestamp(b"0 2022/04/24 17:27:07 UTC"),
            Some(utc(2022, 4, 24, 17, 27, 7))
        );
        assert_eq!(parse_timestamp(b"0"), None);
        assert_eq!(parse_timestamp(b"never"), None);
        assert_eq!(parse_timestamp(b"0 2022/04/24 17:27:07"), None);
    }
}

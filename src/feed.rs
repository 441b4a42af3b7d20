//! Glue from a lease byte stream into the [`LeaseStore`].

use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::lease::LeaseStore;
use crate::parser::LeaseParser;
use crate::source::LeaseStream;

const READ_BUFFER_SIZE: usize = 4096;

/// Reads `source` until it fails, adding every parsed lease to `store`.
///
/// The source is expected to be endless, so reaching its end is reported as
/// [`Error::SourceClosed`]. When the source starts over on a new file, any
/// partial record from the old one is dropped.
pub async fn feed_leases<R>(source: &mut R, store: &LeaseStore) -> Result<()>
where
    R: LeaseStream,
{
    let mut parser = LeaseParser::new();
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    loop {
        let size = source.read(&mut buffer).await?;
        if size == 0 {
            return Err(Error::SourceClosed);
        }

        if source.restarted() {
            info!(
                "Lease file restarted, dropping {} unparsed bytes",
                parser.buffered()
            );
            parser = LeaseParser::new();
        }

        parser.add_data(&buffer[..size]);
        while let Some(lease) = parser.next_lease() {
            store.add(lease).await;
        }
        debug!("Parser: waiting for more data, {} bytes buffered", parser.buffered());
    }
}

/// Parses a complete lease file, adding every lease to `store`.
///
/// Used for one-shot listings; a trailing partial record is ignored.
pub async fn load_leases<R>(source: &mut R, store: &LeaseStore) -> Result<()>
where
    R: LeaseStream,
{
    match feed_leases(source, store).await {
        Err(Error::SourceClosed) => Ok(()),
        other => other,
    }
}

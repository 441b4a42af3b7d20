//! Byte sources for the lease file.
//!
//! dhcpd only ever appends to its lease file, and periodically writes a
//! fresh copy that is renamed over the old one. The feed therefore reads it
//! as an endless stream. Two adapters produce that stream:
//!
//! - [`SourceKind::Tail`] spawns `tail -n 1000000000 -f <file>` and reads
//!   its stdout.
//! - [`SourceKind::Follow`] reads the file from a background task, polling
//!   for appended data and starting over when the file shrinks or is
//!   replaced. A restart is reported through [`LeaseStream::restarted`].
//!
//! Either way the result is a [`LeaseSource`], which implements
//! [`AsyncRead`]. End of stream means the adapter has given up.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, DuplexStream, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Config, SourceKind};
use crate::error::{Error, Result};

/// Line count passed to `tail` so that it replays the whole file first.
const TAIL_LINES: &str = "1000000000";

/// How often the native follower checks for new data.
const FOLLOW_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Read size of the native follower.
const FOLLOW_CHUNK_SIZE: usize = 4096;

/// Chunks the follower may queue ahead of the reader.
const FOLLOW_QUEUE_DEPTH: usize = 16;

/// A lease byte stream that may start over from the beginning of a new file.
pub trait LeaseStream: AsyncRead + Unpin {
    /// Returns `true` once if the bytes returned by the last read start a
    /// new file, so anything buffered from before must be discarded.
    fn restarted(&mut self) -> bool {
        false
    }
}

impl LeaseStream for &[u8] {}
impl LeaseStream for File {}
impl LeaseStream for DuplexStream {}

enum FollowEvent {
    Data(Vec<u8>),
    Restart,
}

/// Reading side of the native follower.
struct FollowReader {
    events: mpsc::Receiver<FollowEvent>,
    pending: Vec<u8>,
    position: usize,
    restarted: bool,
}

impl FollowReader {
    fn new(events: mpsc::Receiver<FollowEvent>) -> Self {
        Self {
            events,
            pending: Vec::new(),
            position: 0,
            restarted: false,
        }
    }
}

impl AsyncRead for FollowReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.position < this.pending.len() {
                let size = buf.remaining().min(this.pending.len() - this.position);
                buf.put_slice(&this.pending[this.position..this.position + size]);
                this.position += size;
                return Poll::Ready(Ok(()));
            }

            match this.events.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(FollowEvent::Data(data))) => {
                    this.pending = data;
                    this.position = 0;
                }
                Poll::Ready(Some(FollowEvent::Restart)) => this.restarted = true,
                Poll::Ready(None) => return Poll::Ready(Ok(())),
            }
        }
    }
}

enum Reader {
    Tail(ChildStdout),
    Follow(FollowReader),
}

/// An open lease file stream.
pub struct LeaseSource {
    reader: Reader,
    child: Option<Child>,
    follower: Option<JoinHandle<()>>,
}

impl LeaseSource {
    /// Opens the source selected in `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        match config.source {
            SourceKind::Tail => Self::tail(&config.leases_file),
            SourceKind::Follow => Self::follow(&config.leases_file).await,
        }
    }

    /// Spawns `tail -f` on `path`.
    pub fn tail(path: &Path) -> Result<Self> {
        info!("Executing tail -n {} -f {}", TAIL_LINES, path.display());

        let mut child = Command::new("tail")
            .arg("-n")
            .arg(TAIL_LINES)
            .arg("-f")
            .arg(path)
            .stdout(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| {
            Error::Io(io::Error::other("tail stdout was not captured"))
        })?;

        Ok(Self {
            reader: Reader::Tail(stdout),
            child: Some(child),
            follower: None,
        })
    }

    /// Follows `path` natively.
    ///
    /// The file is opened here so that a missing file fails at startup
    /// rather than in the background task.
    pub async fn follow(path: &Path) -> Result<Self> {
        info!("Following {}", path.display());

        let file = File::open(path).await?;
        let (sender, receiver) = mpsc::channel(FOLLOW_QUEUE_DEPTH);
        let follower = tokio::spawn(follow_file(path.to_path_buf(), file, sender));

        Ok(Self {
            reader: Reader::Follow(FollowReader::new(receiver)),
            child: None,
            follower: Some(follower),
        })
    }

    /// Releases whatever the source holds: kills the `tail` child or stops
    /// the follower task.
    pub async fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            info!("Killing tail (pid: {:?})", child.id());
            if let Err(error) = child.kill().await {
                warn!("Failed to kill tail: {}", error);
            }
        }

        if let Some(follower) = self.follower.take() {
            debug!("Stopping lease file follower");
            follower.abort();
        }
    }
}

impl AsyncRead for LeaseSource {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().reader {
            Reader::Tail(stdout) => Pin::new(stdout).poll_read(cx, buf),
            Reader::Follow(follower) => Pin::new(follower).poll_read(cx, buf),
        }
    }
}

impl LeaseStream for LeaseSource {
    fn restarted(&mut self) -> bool {
        match &mut self.reader {
            Reader::Tail(_) => false,
            Reader::Follow(follower) => std::mem::take(&mut follower.restarted),
        }
    }
}

/// Device and inode of a file, used to notice when the path is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    device: u64,
    inode: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(metadata: &std::fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            device: metadata.dev(),
            inode: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(_metadata: &std::fs::Metadata) -> Option<Self> {
        None
    }
}

/// Sends the file to the reader forever. Returning drops the sender, which
/// the reading side sees as end of stream.
async fn follow_file(path: PathBuf, file: File, events: mpsc::Sender<FollowEvent>) {
    if let Err(error) = copy_following(&path, file, &events).await {
        error!("Following {} failed: {}", path.display(), error);
    }
}

async fn copy_following(
    path: &Path,
    mut file: File,
    events: &mpsc::Sender<FollowEvent>,
) -> io::Result<()> {
    let mut identity = FileIdentity::of(&file.metadata().await?);
    let mut buffer = vec![0u8; FOLLOW_CHUNK_SIZE];
    let mut offset: u64 = 0;

    loop {
        let size = file.read(&mut buffer).await?;
        if size > 0 {
            if events.send(FollowEvent::Data(buffer[..size].to_vec())).await.is_err() {
                return Ok(());
            }
            offset += size as u64;
            continue;
        }

        tokio::time::sleep(FOLLOW_POLL_INTERVAL).await;

        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(error) => {
                debug!("Cannot stat {}: {}", path.display(), error);
                continue;
            }
        };

        if FileIdentity::of(&metadata) != identity {
            info!("{} was replaced, reading the new file", path.display());
        } else if metadata.len() < offset {
            info!("{} shrank, reading it again from the start", path.display());
        } else {
            continue;
        }

        file = match File::open(path).await {
            Ok(file) => file,
            Err(error) => {
                debug!("Cannot reopen {}: {}", path.display(), error);
                continue;
            }
        };
        identity = FileIdentity::of(&file.metadata().await?);
        offset = 0;

        if events.send(FollowEvent::Restart).await.is_err() {
            return Ok(());
        }
    }
}

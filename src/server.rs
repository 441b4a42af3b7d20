use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use hickory_proto::op::{Message, MessageType};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lease::LeaseStore;
use crate::resolver::Resolver;

const RECV_BUFFER_SIZE: usize = 4096;

pub struct DnsServer {
    resolver: Arc<Resolver>,
    socket: Arc<UdpSocket>,
}

impl DnsServer {
    pub fn new(config: &Config, store: Arc<LeaseStore>) -> Result<Self> {
        let resolver = Arc::new(Resolver::new(&config.domain, store));
        let socket = Arc::new(Self::create_socket(config.dns_addr())?);

        info!(
            "DNS server bound to {} for domain {}",
            config.dns_addr(),
            resolver.domain()
        );

        Ok(Self { resolver, socket })
    }

    fn create_socket(bind_addr: SocketAddr) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::for_address(bind_addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

        socket
            .set_reuse_address(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

        socket.bind(&bind_addr.into()).map_err(|error| {
            Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error))
        })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket).map_err(|error| {
            Error::Socket(format!("Failed to convert to tokio socket: {}", error))
        })?;

        Ok(tokio_socket)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&self) -> Result<()> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        info!("DNS server ready and listening");

        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((size, source)) => {
                    let data = buffer[..size].to_vec();
                    let handler = QueryHandler {
                        resolver: Arc::clone(&self.resolver),
                        socket: Arc::clone(&self.socket),
                    };

                    tokio::spawn(async move {
                        if let Err(error) = handler.handle_packet(&data, source).await {
                            warn!("Error handling query from {}: {}", source, error);
                        }
                    });
                }
                Err(error) if is_transient(&error) => {
                    warn!("Error receiving packet: {}", error);
                }
                Err(error) => {
                    error!("Error receiving packet: {}", error);
                    return Err(error.into());
                }
            }
        }
    }
}

/// Receive errors that concern a single peer rather than the socket.
fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}

struct QueryHandler {
    resolver: Arc<Resolver>,
    socket: Arc<UdpSocket>,
}

impl QueryHandler {
    async fn handle_packet(&self, data: &[u8], source: SocketAddr) -> Result<()> {
        let request = match Message::from_vec(data) {
            Ok(request) => request,
            Err(error) => {
                debug!("Dropping malformed query from {}: {}", source, error);
                return Ok(());
            }
        };

        if request.message_type() != MessageType::Query {
            debug!("Dropping non-query message from {}", source);
            return Ok(());
        }

        debug!("DNS request from {}: {:?}", source, request.queries());

        let response = self.resolver.answer(&request).await;
        let bytes = response.to_vec()?;
        self.socket.send_to(&bytes, source).await?;

        Ok(())
    }
}

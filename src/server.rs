//! TCP server for SMTP stub connections.
//!
//! Binds once at startup, then accepts forever and runs every connection
//! in its own task. There is no connection limit and no idle timeout.

use crate::config::Config;
use crate::protocols::smtp;
use crate::sink::Sink;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Listen backlog for the accept socket
const LISTEN_BACKLOG: i32 = 1024;

/// Server instance
pub struct Server {
    listener: TcpListener,
    sink: Arc<dyn Sink>,
}

impl Server {
    /// Bind the listening socket described by `config`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(config: &Config, sink: Arc<dyn Sink>) -> Result<Self, ServerError> {
        let addr = resolve(&config.host, config.port)?;
        info!(port = config.port, "Binding to port {}", config.port);

        let listener = create_listener(addr)
            .and_then(TcpListener::from_std)
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Server { listener, sink })
    }

    /// Address the server is actually listening on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the process is killed.
    pub async fn run(self) {
        if let Ok(addr) = self.local_addr() {
            info!(address = %addr, "Server listening");
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");

                    let sink = Arc::clone(&self.sink);

                    tokio::spawn(async move {
                        smtp::handle_connection(stream, sink.as_ref()).await;
                        debug!(peer = %addr, "Connection closed");
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Resolve `host:port` to the first matching socket address.
fn resolve(host: &str, port: u16) -> Result<SocketAddr, ServerError> {
    let resolve_error = |source: io::Error| ServerError::Resolve {
        host: host.to_string(),
        port,
        source,
    };

    (host, port)
        .to_socket_addrs()
        .map_err(resolve_error)?
        .next()
        .ok_or_else(|| resolve_error(io::Error::new(io::ErrorKind::NotFound, "no addresses found")))
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
///
/// SO_REUSEPORT is left off so a second instance on the same port fails to
/// bind instead of sharing it.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

/// Server startup errors
pub enum ServerError {
    Resolve {
        host: String,
        port: u16,
        source: io::Error,
    },
    Bind {
        addr: SocketAddr,
        source: io::Error,
    },
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Resolve { host, port, source } => {
                write!(f, "Failed to resolve '{}:{}': {}", host, port, source)
            }
            ServerError::Bind { addr, source } => {
                write!(f, "Failed to bind to {}: {}", addr, source)
            }
        }
    }
}

// Returned from `main`, which prints the `Debug` form.
impl std::fmt::Debug for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Resolve { source, .. } | ServerError::Bind { source, .. } => Some(source),
        }
    }
}

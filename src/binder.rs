//! Listening socket setup.
//!
//! Resolves the configured host and port into candidate local addresses
//! and binds the first one that accepts a socket, with `SO_REUSEADDR` set
//! so a restarted server can rebind while old connections sit in
//! TIME_WAIT.

use crate::config::Config;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use tracing::{debug, info, warn};

/// A bound socket that is already listening.
pub struct Listener {
    pub socket: Socket,
    pub local_addr: SocketAddr,
}

/// Resolve the addresses a listener may bind to, in preference order.
///
/// With no host this yields the wildcard addresses for IPv6 and then IPv4.
pub fn resolve(host: Option<&str>, port: u16) -> Result<Vec<SocketAddr>, BindError> {
    let candidates: Vec<SocketAddr> = match host {
        None => vec![
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
        ],
        Some(host) => (host, port)
            .to_socket_addrs()
            .map_err(|e| BindError::Resolve(host.to_string(), e))?
            .collect(),
    };

    if candidates.is_empty() {
        return Err(BindError::NoCandidates);
    }
    Ok(candidates)
}

/// Bind a stream socket to the first candidate that works.
pub fn bind_first(candidates: &[SocketAddr]) -> Result<(Socket, SocketAddr), BindError> {
    let mut last_error = None;

    for &addr in candidates {
        match bind_one(addr) {
            Ok(socket) => return Ok((socket, addr)),
            Err(e) => {
                warn!(addr = %addr, error = %e, "Bind attempt failed");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(BindError::Unbindable(e)),
        None => Err(BindError::NoCandidates),
    }
}

fn bind_one(addr: SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(
        match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM,
        Some(Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    debug!(addr = %addr, "Socket bound");

    Ok(socket)
}

/// Resolve, bind and listen according to the server configuration.
pub fn listen(config: &Config) -> Result<Listener, BindError> {
    let candidates = resolve(config.host.as_deref(), config.port)?;
    let (socket, bound) = bind_first(&candidates)?;

    let backlog = i32::try_from(config.backlog).unwrap_or(i32::MAX);
    socket.listen(backlog).map_err(BindError::Listen)?;

    // Port 0 binds an ephemeral port; report the one the kernel picked.
    let local_addr = socket
        .local_addr()
        .map_err(BindError::Listen)?
        .as_socket()
        .unwrap_or(bound);

    info!(address = %local_addr, backlog, "Listening");
    Ok(Listener { socket, local_addr })
}

/// Errors that prevent the server from starting to listen.
#[derive(Debug)]
pub enum BindError {
    Resolve(String, io::Error),
    NoCandidates,
    Unbindable(io::Error),
    Listen(io::Error),
}

impl std::fmt::Display for BindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindError::Resolve(host, e) => write!(f, "Failed to resolve '{host}': {e}"),
            BindError::NoCandidates => write!(f, "No local address to bind to"),
            BindError::Unbindable(e) => write!(f, "Failed to bind to any local address: {e}"),
            BindError::Listen(e) => write!(f, "Failed to listen: {e}"),
        }
    }
}

impl std::error::Error for BindError {}

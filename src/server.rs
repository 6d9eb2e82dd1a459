//! Server lifecycle and accept loop.
//!
//! Connections are served one at a time on the calling thread: the next
//! accept happens only after the current connection has closed. The loop
//! waits on a mio poll over the listening socket and the shutdown pipe, so
//! shutdown requests wake it without relying on interrupted syscalls.

use crate::binder;
use crate::config::Config;
use crate::handler;
#[cfg(test)]
use crate::signal::ShutdownHandle;
use crate::signal::ShutdownSignal;
use crate::store::LogStore;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::os::fd::{FromRawFd, IntoRawFd};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(0);
const SHUTDOWN_TOKEN: Token = Token(1);

/// Pause before retrying after a failed accept, e.g. out of descriptors.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Server lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Listening,
    Accepting,
    Handling,
    ShuttingDown,
    Stopped,
}

/// Server instance
pub struct Server {
    /// Closed (set to `None`) when the server shuts down.
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    store: LogStore,
    shutdown: ShutdownSignal,
    chunk_size: usize,
    retain_on_exit: bool,
    phase: Phase,
}

impl Server {
    /// Bind and listen on the configured address.
    pub fn bind(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        debug!(phase = ?Phase::Starting, "Binding listener");
        let listener = binder::listen(config)?;

        listener.socket.set_nonblocking(true)?;
        let std_listener: std::net::TcpListener = listener.socket.into();

        Ok(Server {
            listener: Some(TcpListener::from_std(std_listener)),
            local_addr: listener.local_addr,
            store: LogStore::new(&config.store_path, config.sync),
            shutdown: ShutdownSignal::new()?,
            chunk_size: config.chunk_size,
            retain_on_exit: config.retain_on_exit,
            phase: Phase::Listening,
        })
    }

    /// Request shutdown on `SIGINT` and `SIGTERM`.
    pub fn install_signal_handlers(&mut self) -> io::Result<()> {
        self.shutdown.install_handlers()
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current lifecycle phase, for tests
    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[cfg(test)]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.handle()
    }

    /// Accept and serve connections until shutdown is requested, then
    /// close the listener and remove the log store.
    pub fn run(&mut self) -> io::Result<()> {
        let Some(mut listener) = self.listener.take() else {
            return Ok(());
        };

        let result = self.accept_loop(&mut listener);
        drop(listener);
        self.shut_down();
        result
    }

    fn accept_loop(&mut self, listener: &mut TcpListener) -> io::Result<()> {
        let mut poll = Poll::new()?;
        let mut events = Events::with_capacity(8);

        poll.registry()
            .register(listener, LISTENER_TOKEN, Interest::READABLE)?;
        self.shutdown.register(poll.registry(), SHUTDOWN_TOKEN)?;

        self.phase = Phase::Accepting;
        info!(address = %self.local_addr, "Waiting for connections");

        while !self.shutdown.is_requested() {
            if let Err(e) = poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "Failed to wait for connections");
                return Err(e);
            }

            for event in events.iter() {
                match event.token() {
                    SHUTDOWN_TOKEN => self.shutdown.acknowledge(),
                    LISTENER_TOKEN => self.accept_connections(|| listener.accept()),
                    _ => {}
                }
            }
        }

        Ok(())
    }

    /// Serve every pending connection, one after another.
    ///
    /// The listener is edge-triggered, so this only returns once the
    /// backlog is drained or shutdown is requested.
    fn accept_connections<A>(&mut self, mut accept: A)
    where
        A: FnMut() -> io::Result<(TcpStream, SocketAddr)>,
    {
        while !self.shutdown.is_requested() {
            match accept() {
                Ok((stream, peer)) => match into_blocking(stream) {
                    Ok(stream) => {
                        self.phase = Phase::Handling;
                        handler::serve(stream, peer, &mut self.store, self.chunk_size);
                        self.phase = Phase::Accepting;
                    }
                    Err(e) => warn!(peer = %peer, error = %e, "Failed to prepare connection"),
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionAborted => continue,
                Err(e) => {
                    error!("Accept error: {}", e);
                    thread::sleep(ACCEPT_RETRY_DELAY);
                }
            }
        }
    }

    fn shut_down(&mut self) {
        debug!(from = ?self.phase, "Leaving accept loop");
        if let Some(signal) = self.shutdown.caught_signal() {
            info!(signal, "Caught signal, exiting");
        }
        self.phase = Phase::ShuttingDown;
        info!("Shutting down");

        if self.retain_on_exit {
            info!(path = %self.store.path().display(), "Retaining log store");
        } else {
            self.store.remove();
        }

        self.phase = Phase::Stopped;
        info!("Server stopped");
    }
}

/// Hand an accepted socket to blocking std I/O.
fn into_blocking(stream: TcpStream) -> io::Result<std::net::TcpStream> {
    // SAFETY: the descriptor is owned by `stream` and ownership moves to
    // the new std stream.
    let stream = unsafe { std::net::TcpStream::from_raw_fd(stream.into_raw_fd()) };
    stream.set_nonblocking(false)?;
    Ok(stream)
}

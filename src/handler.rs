//! Per-connection record handling.
//!
//! Reads the connection through a `LineFramer`. Each complete record is
//! appended to the log store, then the whole store is written back to the
//! peer before the next record is processed.

use crate::framer::LineFramer;
use crate::store::LogStore;
use std::io;
use std::net::{SocketAddr, TcpStream};
use tracing::{debug, info, warn};

/// Totals for one finished connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSummary {
    /// Records appended to the store
    pub records: usize,
    /// Bytes written back to the peer
    pub bytes_echoed: u64,
    /// Unterminated bytes dropped at close
    pub discarded: usize,
}

/// Error that aborted a connection.
#[derive(Debug)]
pub enum ConnectionError {
    Receive(io::Error),
    Append(io::Error),
    Echo(io::Error),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Receive(e) => write!(f, "receive failed: {e}"),
            ConnectionError::Append(e) => write!(f, "append to log store failed: {e}"),
            ConnectionError::Echo(e) => write!(f, "echo of log store failed: {e}"),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Serve one accepted connection until the peer closes it.
///
/// Errors are logged and end only this connection.
pub fn serve(stream: TcpStream, peer: SocketAddr, store: &mut LogStore, chunk_size: usize) {
    info!(peer = %peer, "Accepted connection");

    match handle_connection(&stream, peer, store, chunk_size) {
        Ok(summary) => info!(
            peer = %peer,
            records = summary.records,
            bytes_echoed = summary.bytes_echoed,
            discarded = summary.discarded,
            store_bytes = store.len().unwrap_or(0),
            "Closed connection"
        ),
        Err(e) => warn!(peer = %peer, error = %e, "Connection aborted"),
    }
}

/// Run the receive, append, echo loop over `stream`.
pub fn handle_connection(
    stream: &TcpStream,
    peer: SocketAddr,
    store: &mut LogStore,
    chunk_size: usize,
) -> Result<ConnectionSummary, ConnectionError> {
    let mut summary = ConnectionSummary::default();
    let mut records = LineFramer::new(chunk_size).records(stream);
    let mut writer = stream;

    while let Some(record) = records.next() {
        let record = record.map_err(ConnectionError::Receive)?;
        debug!(
            peer = %peer,
            record = %String::from_utf8_lossy(&record[..record.len() - 1]),
            "Received record"
        );

        store.append(&record).map_err(ConnectionError::Append)?;
        summary.bytes_echoed += store.stream_to(&mut writer).map_err(ConnectionError::Echo)?;
        summary.records += 1;
    }

    summary.discarded = records.pending();
    if summary.discarded > 0 {
        debug!(peer = %peer, bytes = summary.discarded, "Discarding unterminated record");
    }

    Ok(summary)
}

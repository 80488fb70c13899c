//! Transport capability: where output files live.
//!
//! The roll writer only ever talks to a [`Transport`]. Two families implement
//! it:
//!
//! - [`LocalTransport`] writes through the local filesystem.
//! - [`RemoteTransport`] drives any [`RemoteSession`] (FTP, SFTP, or the
//!   in-memory [`FakeSession`]) and hides per-protocol quirks such as FTP's
//!   "complete pending transfer" handshake.
//!
//! ## Contract
//!
//! - [`Transport::open_append`] is called once per output file and returns the
//!   sink every record for that file is written to.
//! - [`Transport::close`] flushes the sink and reports any write error that was
//!   still buffered. A file is never published unless `close` succeeded.
//! - [`Transport::rename`] publishes a file. It must be atomic from the point of
//!   view of anyone listing the directory.
//! - [`Transport::mkdir_recursive`], [`Transport::list_by_prefix`], and
//!   [`Transport::delete_many`] are only used during job setup.
//!
//! A transport is owned by exactly one writer instance for its whole life; none
//! of the methods are expected to be called concurrently.

pub mod fake;
#[cfg_attr(docsrs, doc(cfg(feature = "ftp")))]
#[cfg(feature = "ftp")]
pub mod ftp;
pub mod local;
pub mod remote;
#[cfg_attr(docsrs, doc(cfg(feature = "sftp")))]
#[cfg(feature = "sftp")]
pub mod sftp;

pub use fake::{FakeServer, FakeSession};
pub use local::LocalTransport;
pub use remote::{RemoteSession, RemoteTransport};

use crate::encoder::LineEnding;
use crate::error::{ErrorKind, TransportError, TransportResult};
use std::io::Write;
use std::net::{SocketAddr, ToSocketAddrs};

/// Uniform file-destination capability consumed by the roll writer.
pub trait Transport: Send {
    /// Byte sink for one open file.
    type Sink: Write + Send;

    /// Line ending records written through this transport should use.
    fn line_ending(&self) -> LineEnding;

    /// Open `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or opened.
    fn open_append(&mut self, path: &str) -> TransportResult<Self::Sink>;

    /// Flush and release a sink returned by [`Transport::open_append`].
    ///
    /// # Errors
    ///
    /// Returns an error if buffered bytes could not be written or the transfer
    /// could not be completed.
    fn close(&mut self, sink: Self::Sink) -> TransportResult<()>;

    /// Atomically rename `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename was refused or failed.
    fn rename(&mut self, from: &str, to: &str) -> TransportResult<()>;

    /// Create `dir` and any missing parents.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory level cannot be created.
    fn mkdir_recursive(&mut self, dir: &str) -> TransportResult<()>;

    /// Names (not paths) of the entries in `dir` starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    fn list_by_prefix(&mut self, dir: &str, prefix: &str) -> TransportResult<Vec<String>>;

    /// Delete every path in `paths`. Directories are removed recursively
    /// where the backend supports it.
    ///
    /// # Errors
    ///
    /// Returns an error on the first path that cannot be deleted.
    fn delete_many(&mut self, paths: &[String]) -> TransportResult<()>;

    /// End the session. Callers treat failures here as non-fatal.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend reported a problem while disconnecting.
    fn logout(&mut self) -> TransportResult<()> {
        Ok(())
    }
}

/// Join a directory and a file name with `/`.
#[must_use]
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// First socket address for `host:port`.
#[cfg_attr(not(any(feature = "ftp", feature = "sftp")), allow(dead_code))]
pub(crate) fn resolve(host: &str, port: u16) -> TransportResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| {
            TransportError::new(ErrorKind::Unreachable, format!("cannot resolve {host}:{port}"))
                .with_source(e)
        })?
        .next()
        .ok_or_else(|| {
            TransportError::new(ErrorKind::Unreachable, format!("{host}:{port} has no address"))
        })
}

/// Classify a failed TCP connect to `addr`.
///
/// A refused connection means the host answered but nothing listens on the
/// port, so it is reported as [`ErrorKind::InvalidPort`] and not retried.
#[cfg_attr(not(any(feature = "ftp", feature = "sftp")), allow(dead_code))]
pub(crate) fn connect_error(err: std::io::Error, addr: SocketAddr) -> TransportError {
    if err.kind() == std::io::ErrorKind::ConnectionRefused {
        return TransportError::new(
            ErrorKind::InvalidPort,
            format!("connect to {addr}: nothing listening on port {}", addr.port()),
        )
        .with_source(err);
    }
    TransportError::io(err, format!("connect to {addr}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_connection_is_a_port_error() {
        let addr: SocketAddr = "127.0.0.1:2121".parse().unwrap();
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        let err = connect_error(refused, addr);
        assert_eq!(err.kind, ErrorKind::InvalidPort);
        assert!(!err.is_transient());

        let timed_out = std::io::Error::from(std::io::ErrorKind::TimedOut);
        assert_eq!(connect_error(timed_out, addr).kind, ErrorKind::Timeout);
    }

    #[test]
    fn join_path_handles_trailing_slash() {
        assert_eq!(join_path("/a/b", "f.txt"), "/a/b/f.txt");
        assert_eq!(join_path("/a/b/", "f.txt"), "/a/b/f.txt");
        assert_eq!(join_path("", "f.txt"), "f.txt");
    }

    #[test]
    fn resolve_loopback() {
        let addr = resolve("127.0.0.1", 2121).unwrap();
        assert_eq!(addr.port(), 2121);
    }
}

//! FTP backend built on `suppaftp`.

use super::{RemoteSession, RemoteTransport, connect_error, resolve};
use crate::config::SessionSettings;
use crate::error::{ErrorKind, TransportError, TransportResult};
use std::io::Write;
use suppaftp::types::{FileType, FtpError};
use suppaftp::{FtpStream, Mode, Status};
use tracing::{debug, info};

/// FTP transport with passive mode and binary transfers.
pub type FtpTransport = RemoteTransport<FtpSession>;

/// A logged-in FTP control connection.
pub struct FtpSession {
    stream: FtpStream,
    /// Working directory right after login; `dir_exists` returns to it.
    home: String,
}

impl std::fmt::Debug for FtpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpSession")
            .field("home", &self.home)
            .finish_non_exhaustive()
    }
}

fn map_err(err: FtpError, what: impl Into<String>) -> TransportError {
    let what = what.into();
    match err {
        FtpError::ConnectionError(io) => TransportError::io(io, what),
        FtpError::UnexpectedResponse(ref resp) => {
            let kind = match resp.status {
                Status::NotLoggedIn => ErrorKind::Authentication,
                Status::FileUnavailable => ErrorKind::NotFound,
                _ => ErrorKind::Protocol,
            };
            TransportError::new(kind, what).with_source(err)
        }
        other => TransportError::new(ErrorKind::Protocol, what).with_source(other),
    }
}

impl FtpSession {
    /// Connect, log in, and switch to passive binary mode.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Unreachable`] or [`ErrorKind::Timeout`] if the host
    /// cannot be reached, [`ErrorKind::InvalidPort`] if it refuses the
    /// connection, and [`ErrorKind::Authentication`] if the credentials are
    /// rejected.
    pub fn login(settings: &SessionSettings) -> TransportResult<Self> {
        let addr = resolve(&settings.host, settings.port)?;
        info!(host = %settings.host, port = settings.port, "connecting to ftp server");

        let mut stream = FtpStream::connect_timeout(addr, settings.timeout).map_err(|e| match e {
            FtpError::ConnectionError(io) => connect_error(io, addr),
            other => map_err(other, format!("connect to {addr}")),
        })?;
        let tcp = stream.get_ref();
        tcp.set_read_timeout(Some(settings.timeout))
            .and_then(|()| tcp.set_write_timeout(Some(settings.timeout)))
            .map_err(|e| TransportError::io(e, "set socket timeouts"))?;

        stream
            .login(settings.username.as_str(), settings.password.as_str())
            .map_err(|e| {
                let mut err = map_err(e, format!("login as {}", settings.username));
                if err.kind == ErrorKind::Protocol {
                    err.kind = ErrorKind::Authentication;
                }
                err
            })?;
        stream.set_mode(Mode::Passive);
        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| map_err(e, "switch to binary mode"))?;
        let home = stream.pwd().map_err(|e| map_err(e, "pwd"))?;

        debug!(home = %home, "ftp login complete");
        Ok(Self { stream, home })
    }
}

impl RemoteSession for FtpSession {
    type Stream = Box<dyn Write + Send>;

    fn append(&mut self, path: &str) -> TransportResult<Self::Stream> {
        let data = self
            .stream
            .append_with_stream(path)
            .map_err(|e| map_err(e, format!("APPE {path}")))?;
        Ok(Box::new(data))
    }

    fn finish_upload(&mut self, stream: Self::Stream) -> TransportResult<()> {
        self.stream
            .finalize_put_stream(stream)
            .map_err(|e| map_err(e, "complete transfer"))
    }

    fn rename(&mut self, from: &str, to: &str) -> TransportResult<()> {
        self.stream
            .rename(from, to)
            .map_err(|e| map_err(e, format!("rename {from} to {to}")))
    }

    fn dir_exists(&mut self, dir: &str) -> TransportResult<bool> {
        match self.stream.cwd(dir) {
            Ok(()) => {
                self.stream
                    .cwd(&self.home)
                    .map_err(|e| map_err(e, format!("cwd {}", self.home)))?;
                Ok(true)
            }
            Err(FtpError::UnexpectedResponse(_)) => Ok(false),
            Err(e) => Err(map_err(e, format!("cwd {dir}"))),
        }
    }

    fn mkdir(&mut self, dir: &str) -> TransportResult<()> {
        self.stream
            .mkdir(dir)
            .map_err(|e| map_err(e, format!("mkdir {dir}")))
    }

    fn list(&mut self, dir: &str) -> TransportResult<Vec<String>> {
        self.stream
            .nlst(Some(dir))
            .map_err(|e| map_err(e, format!("nlst {dir}")))
    }

    fn delete(&mut self, path: &str) -> TransportResult<()> {
        self.stream
            .rm(path)
            .map_err(|e| map_err(e, format!("DELE {path}")))
    }

    fn remove_dir(&mut self, dir: &str) -> TransportResult<()> {
        self.stream
            .rmdir(dir)
            .map_err(|e| map_err(e, format!("RMD {dir}")))
    }

    fn logout(&mut self) -> TransportResult<()> {
        self.stream.quit().map_err(|e| map_err(e, "quit"))
    }
}

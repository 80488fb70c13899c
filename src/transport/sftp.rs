//! SFTP backend built on `ssh2`.

use super::{RemoteSession, RemoteTransport, connect_error, resolve};
use crate::config::SessionSettings;
use crate::error::{ErrorKind, TransportError, TransportResult};
use ssh2::{ErrorCode, OpenFlags, OpenType, Session, Sftp};
use std::io::Write;
use std::net::TcpStream;
use std::path::Path;
use tracing::{debug, info};

pub type SftpTransport = RemoteTransport<SftpSession>;

// SSH_FX_* status codes
const NO_SUCH_FILE: i32 = 2;
const PERMISSION_DENIED: i32 = 3;
const FILE_ALREADY_EXISTS: i32 = 11;

fn map_err(err: ssh2::Error, what: impl Into<String>) -> TransportError {
    let kind = match err.code() {
        ErrorCode::SFTP(NO_SUCH_FILE) => ErrorKind::NotFound,
        ErrorCode::SFTP(PERMISSION_DENIED) => ErrorKind::PermissionDenied,
        ErrorCode::SFTP(FILE_ALREADY_EXISTS) => ErrorKind::AlreadyExists,
        ErrorCode::Session(_) => ErrorKind::Protocol,
        ErrorCode::SFTP(_) => ErrorKind::Io,
    };
    TransportError::new(kind, what).with_source(err)
}

/// A logged-in SSH session with an open SFTP channel.
pub struct SftpSession {
    session: Session,
    sftp: Sftp,
}

impl std::fmt::Debug for SftpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpSession").finish_non_exhaustive()
    }
}

impl SftpSession {
    /// Connect, authenticate with a password, and open the SFTP subsystem.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Unreachable`] or [`ErrorKind::Timeout`] if the host
    /// cannot be reached, [`ErrorKind::InvalidPort`] if it refuses the
    /// connection, and [`ErrorKind::Authentication`] if the credentials are
    /// rejected.
    pub fn login(settings: &SessionSettings) -> TransportResult<Self> {
        let addr = resolve(&settings.host, settings.port)?;
        info!(host = %settings.host, port = settings.port, "connecting to sftp server");

        let tcp = TcpStream::connect_timeout(&addr, settings.timeout)
            .map_err(|e| connect_error(e, addr))?;
        let mut session = Session::new().map_err(|e| map_err(e, "create ssh session"))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(settings.timeout.as_millis()).unwrap_or(u32::MAX));
        session
            .handshake()
            .map_err(|e| map_err(e, "ssh handshake"))?;

        session
            .userauth_password(&settings.username, &settings.password)
            .map_err(|e| {
                TransportError::new(
                    ErrorKind::Authentication,
                    format!("login as {}", settings.username),
                )
                .with_source(e)
            })?;
        if !session.authenticated() {
            return Err(TransportError::new(
                ErrorKind::Authentication,
                format!("login as {}", settings.username),
            ));
        }

        let sftp = session.sftp().map_err(|e| map_err(e, "open sftp channel"))?;
        debug!("sftp login complete");
        Ok(Self { session, sftp })
    }
}

impl RemoteSession for SftpSession {
    type Stream = ssh2::File;

    fn append(&mut self, path: &str) -> TransportResult<Self::Stream> {
        self.sftp
            .open_mode(
                Path::new(path),
                OpenFlags::WRITE | OpenFlags::APPEND | OpenFlags::CREATE,
                0o644,
                OpenType::File,
            )
            .map_err(|e| map_err(e, format!("open {path}")))
    }

    fn finish_upload(&mut self, mut stream: Self::Stream) -> TransportResult<()> {
        stream
            .flush()
            .map_err(|e| TransportError::io(e, "flush sftp handle"))?;
        // The server may only report a failed write in its reply to CLOSE.
        stream
            .close()
            .map_err(|e| map_err(e, "close sftp handle"))
    }

    fn rename(&mut self, from: &str, to: &str) -> TransportResult<()> {
        self.sftp
            .rename(Path::new(from), Path::new(to), None)
            .map_err(|e| map_err(e, format!("rename {from} to {to}")))
    }

    fn dir_exists(&mut self, dir: &str) -> TransportResult<bool> {
        match self.sftp.stat(Path::new(dir)) {
            Ok(stat) => Ok(stat.is_dir()),
            Err(e) if e.code() == ErrorCode::SFTP(NO_SUCH_FILE) => Ok(false),
            Err(e) => Err(map_err(e, format!("stat {dir}"))),
        }
    }

    fn mkdir(&mut self, dir: &str) -> TransportResult<()> {
        self.sftp
            .mkdir(Path::new(dir), 0o755)
            .map_err(|e| map_err(e, format!("mkdir {dir}")))
    }

    fn list(&mut self, dir: &str) -> TransportResult<Vec<String>> {
        let entries = self
            .sftp
            .readdir(Path::new(dir))
            .map_err(|e| map_err(e, format!("list {dir}")))?;
        Ok(entries
            .into_iter()
            .filter_map(|(path, _)| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .collect())
    }

    fn delete(&mut self, path: &str) -> TransportResult<()> {
        self.sftp
            .unlink(Path::new(path))
            .map_err(|e| map_err(e, format!("delete {path}")))
    }

    fn remove_dir(&mut self, dir: &str) -> TransportResult<()> {
        self.sftp
            .rmdir(Path::new(dir))
            .map_err(|e| map_err(e, format!("rmdir {dir}")))
    }

    fn logout(&mut self) -> TransportResult<()> {
        self.session
            .disconnect(None, "bye", None)
            .map_err(|e| map_err(e, "disconnect"))
    }
}

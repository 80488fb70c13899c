//! In-memory remote server for testing.
//!
//! [`FakeServer`] holds files and directories in memory and hands out
//! [`FakeSession`]s that behave like a strict single-channel FTP connection:
//! while an upload is open every other command is refused. Faults can be
//! injected to exercise the writer's failure paths without a network.

use super::RemoteSession;
use crate::error::{ErrorKind, TransportError, TransportResult};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Faults {
    /// Uploads fail once this many bytes have reached the server in total.
    write_limit: Option<usize>,
    open: Option<ErrorKind>,
    rename: Option<ErrorKind>,
    finish: Option<ErrorKind>,
    logout: Option<ErrorKind>,
    /// Next `n` logins fail with the given kind.
    login: Option<(ErrorKind, u32)>,
}

#[derive(Debug, Default)]
struct ServerState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    bytes_received: usize,
    logins: u32,
    logouts: u32,
    faults: Faults,
}

impl ServerState {
    fn has_children(&self, dir: &str) -> bool {
        self.files.keys().chain(self.dirs.iter()).any(|p| parent(p) == dir)
    }
}

fn parent(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((dir, _)) => dir,
        None => "",
    }
}

fn fault(kind: ErrorKind, what: &str, path: &str) -> TransportError {
    TransportError::new(kind, format!("injected {what} failure")).with_path(path)
}

/// Shared in-memory file server.
#[derive(Debug, Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().expect("fake server mutex poisoned")
    }

    /// A logged-in session that ignores login faults.
    #[must_use]
    pub fn session(&self) -> FakeSession {
        self.lock().logins += 1;
        FakeSession {
            state: Arc::clone(&self.state),
            pending: None,
        }
    }

    /// Log in, honoring faults set by [`FakeServer::fail_logins`].
    ///
    /// # Errors
    ///
    /// Returns the injected error while login failures remain.
    pub fn login(&self) -> TransportResult<FakeSession> {
        {
            let mut state = self.lock();
            if let Some((kind, remaining)) = state.faults.login.as_mut() {
                let kind = *kind;
                *remaining -= 1;
                if *remaining == 0 {
                    state.faults.login = None;
                }
                return Err(TransportError::new(kind, "injected login failure"));
            }
        }
        Ok(self.session())
    }

    /// Contents of `path`, if it exists.
    ///
    /// # Panics
    ///
    /// Panics if the mutex protecting the server is poisoned.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    /// Contents of `path` as UTF-8 text.
    #[must_use]
    pub fn file_string(&self, path: &str) -> Option<String> {
        self.file(path)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Every file path on the server, sorted.
    #[must_use]
    pub fn file_paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    #[must_use]
    pub fn has_dir(&self, dir: &str) -> bool {
        self.lock().dirs.contains(dir)
    }

    /// Create a file (and its parent directories) directly on the server.
    pub fn put_file(&self, path: &str, contents: &[u8]) {
        let mut state = self.lock();
        let mut dir = parent(path);
        while !dir.is_empty() && dir != "/" {
            state.dirs.insert(dir.to_string());
            dir = parent(dir);
        }
        state.files.insert(path.to_string(), contents.to_vec());
    }

    /// Number of sessions handed out so far.
    #[must_use]
    pub fn logins(&self) -> u32 {
        self.lock().logins
    }

    #[must_use]
    pub fn logouts(&self) -> u32 {
        self.lock().logouts
    }

    /// Fail uploads once `bytes` bytes in total have been received.
    pub fn fail_writes_after(&self, bytes: usize) {
        self.lock().faults.write_limit = Some(bytes);
    }

    pub fn fail_opens(&self, kind: ErrorKind) {
        self.lock().faults.open = Some(kind);
    }

    pub fn fail_renames(&self, kind: ErrorKind) {
        self.lock().faults.rename = Some(kind);
    }

    /// Fail the completion handshake of every upload.
    pub fn fail_finishes(&self, kind: ErrorKind) {
        self.lock().faults.finish = Some(kind);
    }

    pub fn fail_logouts(&self, kind: ErrorKind) {
        self.lock().faults.logout = Some(kind);
    }

    /// Make the next `times` calls to [`FakeServer::login`] fail.
    pub fn fail_logins(&self, kind: ErrorKind, times: u32) {
        self.lock().faults.login = (times > 0).then_some((kind, times));
    }
}

/// One connection to a [`FakeServer`].
#[derive(Debug)]
pub struct FakeSession {
    state: Arc<Mutex<ServerState>>,
    /// Path of the upload that has not been finished yet.
    pending: Option<String>,
}

impl FakeSession {
    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().expect("fake server mutex poisoned")
    }

    fn ensure_idle(&self) -> TransportResult<()> {
        match &self.pending {
            Some(path) => Err(TransportError::new(
                ErrorKind::Protocol,
                format!("425 transfer of {path} still in progress"),
            )),
            None => Ok(()),
        }
    }
}

/// Data channel of one upload. Bytes land on the server as they are written.
#[derive(Debug)]
pub struct FakeUpload {
    state: Arc<Mutex<ServerState>>,
    path: String,
}

impl Write for FakeUpload {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().expect("fake server mutex poisoned");
        if let Some(limit) = state.faults.write_limit
            && state.bytes_received + buf.len() > limit
        {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "injected write failure",
            ));
        }
        state.bytes_received += buf.len();
        state
            .files
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl RemoteSession for FakeSession {
    type Stream = FakeUpload;

    fn append(&mut self, path: &str) -> TransportResult<Self::Stream> {
        self.ensure_idle()?;
        {
            let mut state = self.lock();
            if let Some(kind) = state.faults.open {
                return Err(fault(kind, "open", path));
            }
            state.files.entry(path.to_string()).or_default();
        }
        self.pending = Some(path.to_string());
        Ok(FakeUpload {
            state: Arc::clone(&self.state),
            path: path.to_string(),
        })
    }

    fn finish_upload(&mut self, stream: Self::Stream) -> TransportResult<()> {
        self.pending = None;
        match self.lock().faults.finish {
            Some(kind) => Err(fault(kind, "finish", &stream.path)),
            None => Ok(()),
        }
    }

    fn rename(&mut self, from: &str, to: &str) -> TransportResult<()> {
        self.ensure_idle()?;
        let mut state = self.lock();
        if let Some(kind) = state.faults.rename {
            return Err(fault(kind, "rename", from));
        }
        let contents = state.files.remove(from).ok_or_else(|| {
            TransportError::new(ErrorKind::NotFound, format!("550 {from}: no such file"))
        })?;
        state.files.insert(to.to_string(), contents);
        Ok(())
    }

    fn dir_exists(&mut self, dir: &str) -> TransportResult<bool> {
        self.ensure_idle()?;
        Ok(dir == "/" || self.lock().dirs.contains(dir))
    }

    fn mkdir(&mut self, dir: &str) -> TransportResult<()> {
        self.ensure_idle()?;
        let mut state = self.lock();
        let up = parent(dir);
        if !up.is_empty() && up != "/" && !state.dirs.contains(up) {
            return Err(TransportError::new(
                ErrorKind::NotFound,
                format!("550 {up}: no such directory"),
            ));
        }
        if !state.dirs.insert(dir.to_string()) {
            return Err(TransportError::new(
                ErrorKind::AlreadyExists,
                format!("550 {dir}: file exists"),
            ));
        }
        Ok(())
    }

    fn list(&mut self, dir: &str) -> TransportResult<Vec<String>> {
        self.ensure_idle()?;
        let state = self.lock();
        if dir != "/" && !state.dirs.contains(dir) && !state.has_children(dir) {
            return Err(TransportError::new(
                ErrorKind::NotFound,
                format!("550 {dir}: no such directory"),
            ));
        }
        // Like many FTP servers, answer NLST with full paths.
        Ok(state
            .files
            .keys()
            .chain(state.dirs.iter())
            .filter(|p| parent(p) == dir)
            .cloned()
            .collect())
    }

    fn delete(&mut self, path: &str) -> TransportResult<()> {
        self.ensure_idle()?;
        let mut state = self.lock();
        if state.files.remove(path).is_some() {
            return Ok(());
        }
        let message = if state.dirs.contains(path) {
            format!("550 {path}: is a directory")
        } else {
            format!("550 {path}: no such file")
        };
        Err(TransportError::new(ErrorKind::NotFound, message))
    }

    fn remove_dir(&mut self, dir: &str) -> TransportResult<()> {
        self.ensure_idle()?;
        let mut state = self.lock();
        if !state.dirs.contains(dir) {
            return Err(TransportError::new(
                ErrorKind::NotFound,
                format!("550 {dir}: no such directory"),
            ));
        }
        if state.has_children(dir) {
            return Err(TransportError::new(
                ErrorKind::Protocol,
                format!("550 {dir}: directory not empty"),
            ));
        }
        state.dirs.remove(dir);
        Ok(())
    }

    fn logout(&mut self) -> TransportResult<()> {
        let mut state = self.lock();
        state.logouts += 1;
        match state.faults.logout {
            Some(kind) => Err(TransportError::new(kind, "injected logout failure")),
            None => Ok(()),
        }
    }
}

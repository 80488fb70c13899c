//! Generic remote backend over a stateful session.

use super::{Transport, join_path};
use crate::encoder::LineEnding;
use crate::error::{ErrorKind, TransportError, TransportResult};
use std::io::{BufWriter, Write};
use tracing::{debug, info};

const BUFFER_CAPACITY: usize = 64 * 1024;

/// The raw commands a remote file server session offers.
///
/// Implementations wrap one logged-in connection. They do not need to buffer
/// writes or know about publishing; [`RemoteTransport`] layers that on top.
pub trait RemoteSession: Send {
    /// Data stream of one in-flight upload.
    type Stream: Write + Send;

    /// Start an append-or-create upload of `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server refuses the upload.
    fn append(&mut self, path: &str) -> TransportResult<Self::Stream>;

    /// Finish the upload started by [`RemoteSession::append`]. After this
    /// returns the session accepts other commands again.
    ///
    /// # Errors
    ///
    /// Returns an error if the server did not confirm the transfer.
    fn finish_upload(&mut self, stream: Self::Stream) -> TransportResult<()>;

    /// # Errors
    ///
    /// Returns an error if the server refuses the rename.
    fn rename(&mut self, from: &str, to: &str) -> TransportResult<()>;

    /// # Errors
    ///
    /// Returns an error only if the server could not be asked; a missing
    /// directory is `Ok(false)`.
    fn dir_exists(&mut self, dir: &str) -> TransportResult<bool>;

    /// Create a single directory level.
    ///
    /// # Errors
    ///
    /// Returns an error if the server refuses.
    fn mkdir(&mut self, dir: &str) -> TransportResult<()>;

    /// Bare entry names in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is missing or cannot be listed.
    fn list(&mut self, dir: &str) -> TransportResult<Vec<String>>;

    /// Delete a single file.
    ///
    /// # Errors
    ///
    /// Returns an error if the server refuses.
    fn delete(&mut self, path: &str) -> TransportResult<()>;

    /// Remove an empty directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is missing or not empty.
    fn remove_dir(&mut self, dir: &str) -> TransportResult<()>;

    /// # Errors
    ///
    /// Returns an error if logging out or disconnecting failed.
    fn logout(&mut self) -> TransportResult<()>;
}

/// [`Transport`] over any [`RemoteSession`].
///
/// Records always end in `\n` regardless of the server's platform. Writes are
/// buffered per file; [`Transport::close`] flushes the buffer and completes the
/// upload before anything else is sent on the session.
#[derive(Debug)]
pub struct RemoteTransport<S> {
    session: S,
    upload_open: bool,
}

impl<S: RemoteSession> RemoteTransport<S> {
    pub const fn new(session: S) -> Self {
        Self {
            session,
            upload_open: false,
        }
    }

    pub const fn session(&self) -> &S {
        &self.session
    }

    pub fn into_session(self) -> S {
        self.session
    }

    /// Delete `path`, emptying it depth-first first if it is a directory.
    fn remove_tree(&mut self, path: &str) -> TransportResult<()> {
        if !self.session.dir_exists(path)? {
            return self.session.delete(path).map_err(|e| e.with_path(path));
        }
        let children = self.session.list(path).map_err(|e| e.with_path(path))?;
        for child in children {
            let name = match child.rsplit_once('/') {
                Some((_, base)) => base,
                None => child.as_str(),
            };
            if name.is_empty() || name == "." || name == ".." {
                continue;
            }
            self.remove_tree(&join_path(path, name))?;
        }
        self.session.remove_dir(path).map_err(|e| e.with_path(path))
    }

    fn ensure_idle(&self, command: &str) -> TransportResult<()> {
        if self.upload_open {
            return Err(TransportError::new(
                ErrorKind::Protocol,
                format!("cannot {command} while an upload is still open"),
            ));
        }
        Ok(())
    }
}

impl<S: RemoteSession> Transport for RemoteTransport<S> {
    type Sink = BufWriter<S::Stream>;

    fn line_ending(&self) -> LineEnding {
        LineEnding::Lf
    }

    fn open_append(&mut self, path: &str) -> TransportResult<Self::Sink> {
        self.ensure_idle("open a file")?;
        let stream = self
            .session
            .append(path)
            .map_err(|e| e.with_path(path))?;
        self.upload_open = true;
        Ok(BufWriter::with_capacity(BUFFER_CAPACITY, stream))
    }

    fn close(&mut self, mut sink: Self::Sink) -> TransportResult<()> {
        self.upload_open = false;
        if let Err(e) = sink.flush() {
            // Hand the stream back anyway so the session can wind down the
            // aborted transfer; the flush error is what gets reported.
            let (stream, _unwritten) = sink.into_parts();
            if let Err(finish) = self.session.finish_upload(stream) {
                debug!("finishing aborted upload also failed: {finish}");
            }
            return Err(TransportError::io(e, "flush buffered output"));
        }
        let (stream, _empty) = sink.into_parts();
        self.session.finish_upload(stream)
    }

    fn rename(&mut self, from: &str, to: &str) -> TransportResult<()> {
        self.ensure_idle("rename")?;
        debug!(from, to, "renaming remote file");
        self.session
            .rename(from, to)
            .map_err(|e| e.with_path(from))
    }

    fn mkdir_recursive(&mut self, dir: &str) -> TransportResult<()> {
        self.ensure_idle("create directories")?;
        if self.session.dir_exists(dir)? {
            return Ok(());
        }
        info!(dir, "creating remote directory recursively");

        // Servers generally only create one level per command.
        let mut current = if dir.starts_with('/') {
            String::from("/")
        } else {
            String::new()
        };
        for part in dir.split('/').filter(|p| !p.is_empty()) {
            current = join_path(&current, part);
            if !self.session.dir_exists(&current)? {
                self.session
                    .mkdir(&current)
                    .map_err(|e| e.with_path(current.clone()))?;
            }
        }
        Ok(())
    }

    fn list_by_prefix(&mut self, dir: &str, prefix: &str) -> TransportResult<Vec<String>> {
        self.ensure_idle("list")?;
        let mut names: Vec<String> = self
            .session
            .list(dir)
            .map_err(|e| e.with_path(dir))?
            .into_iter()
            .map(|name| match name.rsplit_once('/') {
                Some((_, base)) => base.to_string(),
                None => name,
            })
            .filter(|name| name.starts_with(prefix))
            .collect();
        names.sort();
        debug!(dir, prefix, count = names.len(), "listed remote directory");
        Ok(names)
    }

    fn delete_many(&mut self, paths: &[String]) -> TransportResult<()> {
        self.ensure_idle("delete")?;
        for path in paths {
            info!(path = %path, "deleting remote entry");
            self.remove_tree(path)?;
        }
        Ok(())
    }

    fn logout(&mut self) -> TransportResult<()> {
        self.session.logout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FakeServer;

    #[test]
    fn close_completes_upload_before_rename() {
        let server = FakeServer::new();
        let mut t = RemoteTransport::new(server.session());
        let mut sink = t.open_append("/out/a.txt.tmp").unwrap();
        sink.write_all(b"x\n").unwrap();

        assert!(t.rename("/out/a.txt.tmp", "/out/a.txt").is_err());

        t.close(sink).unwrap();
        t.rename("/out/a.txt.tmp", "/out/a.txt").unwrap();
        assert_eq!(server.file("/out/a.txt").unwrap(), b"x\n");
        assert!(server.file("/out/a.txt.tmp").is_none());
    }

    #[test]
    fn close_reports_a_failed_completion() {
        let server = FakeServer::new();
        server.fail_finishes(ErrorKind::PermissionDenied);
        let mut t = RemoteTransport::new(server.session());
        let mut sink = t.open_append("/out/q.txt.tmp").unwrap();
        sink.write_all(b"x\n").unwrap();

        let err = t.close(sink).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
        // The session is usable again so the caller can clean up.
        assert!(t.list_by_prefix("/out", "q").is_ok());
    }

    #[test]
    fn mkdir_recursive_creates_each_level() {
        let server = FakeServer::new();
        let mut t = RemoteTransport::new(server.session());
        t.mkdir_recursive("/a/b/c").unwrap();
        assert!(server.has_dir("/a"));
        assert!(server.has_dir("/a/b"));
        assert!(server.has_dir("/a/b/c"));
        t.mkdir_recursive("/a/b/c").unwrap();
    }

    #[test]
    fn list_by_prefix_strips_directories() {
        let server = FakeServer::new();
        server.put_file("/d/job-1.txt", b"");
        server.put_file("/d/job-2.txt", b"");
        server.put_file("/d/other.txt", b"");
        let mut t = RemoteTransport::new(server.session());
        assert_eq!(
            t.list_by_prefix("/d", "job").unwrap(),
            vec!["job-1.txt".to_string(), "job-2.txt".to_string()]
        );
    }

    #[test]
    fn delete_many_empties_directories_first() {
        let server = FakeServer::new();
        server.put_file("/d/job-dir/nested/a.txt", b"1");
        server.put_file("/d/job-dir/b.txt", b"2");
        server.put_file("/d/job-1.txt", b"3");
        server.put_file("/d/keep.txt", b"4");
        let mut t = RemoteTransport::new(server.session());
        t.delete_many(&["/d/job-dir".to_string(), "/d/job-1.txt".to_string()])
            .unwrap();
        assert_eq!(server.file_paths(), vec!["/d/keep.txt".to_string()]);
        assert!(!server.has_dir("/d/job-dir"));
        assert!(!server.has_dir("/d/job-dir/nested"));
        assert!(server.has_dir("/d"));
    }
}

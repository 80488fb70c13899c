//! The roll-writer engine.
//!
//! A [`RollWriter`] turns a stream of records into a sequence of files. Files
//! are opened lazily on the first record after a roll, written under an
//! in-progress name, and published by rename once they are complete.
//!
//! ```text
//!   Idle --write_record--> Open --roll--> Idle --...--> Closed
//!                            |                             ^
//!                            +----------close()------------+
//! ```
//!
//! Any failure poisons the writer: the open file is closed on a best-effort
//! basis but never published, and further writes are refused.

use crate::config::WriterSettings;
use crate::encoder::{Encoder, RecordEncoder};
use crate::error::{Result, RollError, TransportError};
use crate::naming::PathAllocator;
use crate::policy::{RollAccumulator, RollPolicy};
use crate::transport::Transport;
use std::io::Write;
use tracing::{debug, info, warn};

/// Observable state of a [`RollWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// No file open. The next record opens one.
    Idle,
    /// A file is open under its in-progress name.
    Open,
    /// An earlier operation failed; no more records are accepted.
    Poisoned,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Active,
    Poisoned,
    Closed,
}

/// The file currently being written.
struct OpenFile<W> {
    sink: W,
    path: String,
    acc: RollAccumulator,
}

/// Writes records through a [`Transport`], rolling and publishing files.
///
/// One writer is driven by one thread and owns its transport for its whole
/// life. Dropping a writer without calling [`RollWriter::close`] leaves the
/// open file, if any, under its in-progress name.
pub struct RollWriter<T: Transport> {
    transport: T,
    settings: WriterSettings,
    encoder: Encoder,
    policy: RollPolicy,
    allocator: PathAllocator,
    open: Option<OpenFile<T::Sink>>,
    /// Scratch buffer for one encoded record.
    buf: Vec<u8>,
    lifecycle: Lifecycle,
    published: Vec<String>,
    rows_written: u64,
}

impl<T: Transport> std::fmt::Debug for RollWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollWriter")
            .field("prefix", &self.settings.prefix)
            .field("state", &self.state())
            .field("open_path", &self.allocator.open_path())
            .field("published", &self.published.len())
            .field("rows_written", &self.rows_written)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> RollWriter<T> {
    pub fn new(transport: T, settings: WriterSettings) -> Self {
        let encoder = Encoder::for_settings(&settings, transport.line_ending());
        let policy = RollPolicy::new(settings.roll_size, settings.roll_count, settings.file_format);
        let allocator = PathAllocator::new(&settings);
        Self {
            transport,
            settings,
            encoder,
            policy,
            allocator,
            open: None,
            buf: Vec::with_capacity(1024),
            lifecycle: Lifecycle::Active,
            published: Vec::new(),
            rows_written: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> WriterState {
        match self.lifecycle {
            Lifecycle::Poisoned => WriterState::Poisoned,
            Lifecycle::Closed => WriterState::Closed,
            Lifecycle::Active if self.open.is_some() => WriterState::Open,
            Lifecycle::Active => WriterState::Idle,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &WriterSettings {
        &self.settings
    }

    /// Final paths of every file published so far, in order.
    #[must_use]
    pub fn files_published(&self) -> &[String] {
        &self.published
    }

    #[must_use]
    pub const fn rows_written(&self) -> u64 {
        self.rows_written
    }

    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Write one record, opening a file first if none is open and rolling
    /// afterwards if a threshold was reached.
    ///
    /// # Errors
    ///
    /// Returns the underlying failure the first time anything goes wrong;
    /// afterwards returns [`RollError::Poisoned`]. Returns
    /// [`RollError::Closed`] after [`RollWriter::close`].
    pub fn write_record<S: AsRef<str>>(&mut self, fields: &[S]) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Poisoned => return Err(RollError::Poisoned),
            Lifecycle::Closed => return Err(RollError::Closed),
            Lifecycle::Active => {}
        }
        let result = self.write_inner(fields);
        if result.is_err() {
            self.poison();
        }
        result
    }

    /// Publish the open file, if any, and stop accepting records.
    ///
    /// Closing an idle writer does no I/O; a writer that never saw a record
    /// produces no files. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the close or publish failure of the last file, or
    /// [`RollError::Poisoned`] if an earlier write already failed.
    pub fn close(&mut self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Closed => return Ok(()),
            Lifecycle::Poisoned => {
                self.lifecycle = Lifecycle::Closed;
                return Err(RollError::Poisoned);
            }
            Lifecycle::Active => {}
        }

        let result = match self.open.take() {
            Some(file) => self.finish_file(file),
            None => Ok(()),
        };
        if result.is_err() {
            self.poison();
        }
        self.lifecycle = Lifecycle::Closed;
        info!(
            prefix = %self.settings.prefix,
            files = self.published.len(),
            rows = self.rows_written,
            "writer closed"
        );
        result
    }

    /// Stop without publishing the open file. Used when the upstream failed
    /// and the open file is known to be incomplete.
    pub fn abort(&mut self) {
        if self.lifecycle == Lifecycle::Active {
            self.poison();
        }
        self.lifecycle = Lifecycle::Closed;
    }

    fn write_inner<S: AsRef<str>>(&mut self, fields: &[S]) -> Result<()> {
        let mut file = match self.open.take() {
            Some(file) => file,
            None => self.open_next()?,
        };

        match self.append(&mut file, fields) {
            Ok(bytes) => {
                self.rows_written += 1;
                if let Some(reason) = self.policy.record(&mut file.acc, bytes) {
                    debug!(path = %file.path, ?reason, "rolling");
                    return self.finish_file(file);
                }
                self.open = Some(file);
                Ok(())
            }
            Err(e) => {
                self.open = Some(file);
                Err(e)
            }
        }
    }

    /// Allocate the next path, open it, and write the header.
    fn open_next(&mut self) -> Result<OpenFile<T::Sink>> {
        let path = self.allocator.current_path().to_string();
        info!(path = %path, "opening file");
        let sink = match self.transport.open_append(&path) {
            Ok(sink) => sink,
            Err(source) => {
                self.allocator.abandon();
                return Err(RollError::Open { path, source });
            }
        };

        let mut file = OpenFile {
            sink,
            path,
            acc: RollAccumulator::default(),
        };
        if let Err(e) = self.write_header(&mut file) {
            self.open = Some(file);
            return Err(e);
        }
        Ok(file)
    }

    fn write_header(&mut self, file: &mut OpenFile<T::Sink>) -> Result<()> {
        let Some(header) = self.settings.header.as_deref() else {
            return Ok(());
        };
        self.buf.clear();
        self.encoder
            .encode_header(header, &mut self.buf)
            .map_err(|e| RollError::Encode {
                path: file.path.clone(),
                message: e.to_string(),
            })?;
        file.sink
            .write_all(&self.buf)
            .map_err(|e| RollError::Write {
                path: file.path.clone(),
                source: TransportError::io(e, "write header"),
            })
    }

    /// Encode and write one record with a single write. Returns its size.
    fn append<S: AsRef<str>>(&mut self, file: &mut OpenFile<T::Sink>, fields: &[S]) -> Result<u64> {
        self.buf.clear();
        self.encoder
            .encode_record(fields, &mut self.buf)
            .map_err(|e| RollError::Encode {
                path: file.path.clone(),
                message: e.to_string(),
            })?;
        file.sink
            .write_all(&self.buf)
            .map_err(|e| RollError::Write {
                path: file.path.clone(),
                source: TransportError::io(e, "write record"),
            })?;
        Ok(self.buf.len() as u64)
    }

    /// Close the sink and publish the file.
    fn finish_file(&mut self, file: OpenFile<T::Sink>) -> Result<()> {
        let OpenFile { sink, path, acc } = file;
        self.transport
            .close(sink)
            .map_err(|source| RollError::Close {
                path: path.clone(),
                source,
            })?;
        if let Some(published) = self.allocator.rotate(&mut self.transport)? {
            debug!(path = %published, rows = acc.rows, bytes = acc.bytes, "file complete");
            self.published.push(published);
        }
        Ok(())
    }

    /// Stop accepting records and release the open file without publishing it.
    fn poison(&mut self) {
        self.lifecycle = Lifecycle::Poisoned;
        if let Some(file) = self.open.take()
            && let Err(e) = self.transport.close(file.sink)
        {
            debug!(path = %file.path, "closing after failure also failed: {e}");
        }
        if let Some(path) = self.allocator.abandon() {
            warn!(path = %path, "writer aborted, file left unpublished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::LineEnding;
    use crate::transport::{FakeServer, LocalTransport, RemoteTransport};

    fn remote(server: &FakeServer) -> RemoteTransport<crate::transport::FakeSession> {
        RemoteTransport::new(server.session())
    }

    #[test]
    fn state_follows_the_file_lifecycle() {
        let server = FakeServer::new();
        let settings = WriterSettings::new("/out", "p").with_roll_count(2);
        let mut w = RollWriter::new(remote(&server), settings);

        assert_eq!(w.state(), WriterState::Idle);
        w.write_record(&["a"]).unwrap();
        assert_eq!(w.state(), WriterState::Open);
        w.write_record(&["b"]).unwrap();
        assert_eq!(w.state(), WriterState::Idle);
        w.close().unwrap();
        assert_eq!(w.state(), WriterState::Closed);
        assert!(matches!(w.write_record(&["c"]), Err(RollError::Closed)));
        assert_eq!(w.files_published(), ["/out/p-1.txt"]);
    }

    #[test]
    fn closing_idle_writer_does_nothing() {
        let server = FakeServer::new();
        let mut w = RollWriter::new(remote(&server), WriterSettings::new("/out", "p"));
        w.close().unwrap();
        w.close().unwrap();
        assert!(server.file_paths().is_empty());
    }

    #[test]
    fn open_failure_poisons() {
        let server = FakeServer::new();
        server.fail_opens(crate::error::ErrorKind::PermissionDenied);
        let mut w = RollWriter::new(remote(&server), WriterSettings::new("/out", "p"));
        let err = w.write_record(&["a"]).unwrap_err();
        assert!(matches!(err, RollError::Open { .. }));
        assert_eq!(w.state(), WriterState::Poisoned);
        assert!(matches!(w.write_record(&["a"]), Err(RollError::Poisoned)));
        assert!(matches!(w.close(), Err(RollError::Poisoned)));
    }

    #[test]
    fn unmappable_text_poisons_without_publishing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_string_lossy().into_owned();
        let settings = WriterSettings::new(dir.clone(), "p")
            .with_encoding(crate::encoder::Charset::for_label("ISO-8859-1").unwrap());
        let t = LocalTransport::new().with_line_ending(LineEnding::Lf);
        let mut w = RollWriter::new(t, settings);

        w.write_record(&["caf\u{e9}"]).unwrap();
        let err = w.write_record(&["\u{4e2d}"]).unwrap_err();
        assert!(matches!(err, RollError::Encode { .. }));
        let _ = w.close();

        let names: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["p-1.txt.tmp".to_string()]);
        assert_eq!(
            std::fs::read(tmp.path().join("p-1.txt.tmp")).unwrap(),
            b"caf\xe9\n"
        );
    }
}

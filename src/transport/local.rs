//! Local filesystem backend.

use super::Transport;
use crate::encoder::LineEnding;
use crate::error::{TransportError, TransportResult};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

const BUFFER_CAPACITY: usize = 64 * 1024;

/// Writes through `std::fs`. Publishing is an OS-level rename, which is
/// atomic as long as source and target share a filesystem (they always share
/// a directory here).
#[derive(Debug, Clone)]
pub struct LocalTransport {
    line_ending: LineEnding,
    sync_on_close: bool,
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTransport {
    /// Platform-native line endings; files are fsynced before publishing.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            line_ending: LineEnding::native(),
            sync_on_close: true,
        }
    }

    #[must_use]
    pub const fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }

    /// Skip `fsync` on close. Faster, but a crash may lose published data.
    #[must_use]
    pub const fn without_sync(mut self) -> Self {
        self.sync_on_close = false;
        self
    }
}

impl Transport for LocalTransport {
    type Sink = BufWriter<File>;

    fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    fn open_append(&mut self, path: &str) -> TransportResult<Self::Sink> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| TransportError::io(e, format!("open {path}")).with_path(path))?;
        Ok(BufWriter::with_capacity(BUFFER_CAPACITY, file))
    }

    fn close(&mut self, mut sink: Self::Sink) -> TransportResult<()> {
        sink.flush()
            .map_err(|e| TransportError::io(e, "flush buffered output"))?;
        let file = sink
            .into_inner()
            .map_err(|e| TransportError::io(e.into_error(), "flush buffered output"))?;
        if self.sync_on_close {
            file.sync_all()
                .map_err(|e| TransportError::io(e, "sync file to disk"))?;
        }
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> TransportResult<()> {
        fs::rename(from, to)
            .map_err(|e| TransportError::io(e, format!("rename {from} to {to}")).with_path(from))?;
        debug!(from, to, "renamed file");
        Ok(())
    }

    fn mkdir_recursive(&mut self, dir: &str) -> TransportResult<()> {
        let path = Path::new(dir);
        if path.is_dir() {
            return Ok(());
        }
        info!(dir, "creating directory");
        fs::create_dir_all(path)
            .map_err(|e| TransportError::io(e, format!("mkdir -p {dir}")).with_path(dir))
    }

    fn list_by_prefix(&mut self, dir: &str, prefix: &str) -> TransportResult<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(TransportError::io(e, format!("list {dir}")).with_path(dir));
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| TransportError::io(e, format!("list {dir}")).with_path(dir))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(prefix) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn delete_many(&mut self, paths: &[String]) -> TransportResult<()> {
        for path in paths {
            info!(path = %path, "deleting");
            let p = Path::new(path);
            let result = if p.is_dir() {
                fs::remove_dir_all(p)
            } else {
                fs::remove_file(p)
            };
            result.map_err(|e| TransportError::io(e, format!("delete {path}")).with_path(path))?;
        }
        Ok(())
    }
}

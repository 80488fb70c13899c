//! Output file naming.
//!
//! Every writer instance owns a unique prefix. Its files are named
//! `{prefix}-{index}.{suffix}` once published and carry an extra
//! `.{in_use_suffix}` while still being written. Indexes start at 1 and are
//! never reused within an instance, so no two instances (or two files of the
//! same instance) can ever target the same name.

use crate::config::WriterSettings;
use crate::error::{Result, RollError};
use crate::transport::{Transport, join_path};
use tracing::info;
use uuid::Uuid;

/// Derive a per-instance prefix: `{user_prefix}-{random token}`.
///
/// The token is a v4 UUID in upper-case simple form (32 hex digits, no dashes).
#[must_use]
pub fn generate_prefix(user_prefix: &str) -> String {
    format!(
        "{user_prefix}-{}",
        Uuid::new_v4().simple().to_string().to_uppercase()
    )
}

/// Published name for an in-progress path, or `None` if `path` does not end
/// in `.{in_use_suffix}`.
#[must_use]
pub fn final_name<'a>(path: &'a str, in_use_suffix: &str) -> Option<&'a str> {
    path.strip_suffix(in_use_suffix)
        .and_then(|rest| rest.strip_suffix('.'))
        .filter(|rest| !rest.is_empty())
}

/// Whether `name` is still being written.
#[must_use]
pub fn is_in_progress(name: &str, in_use_suffix: &str) -> bool {
    final_name(name, in_use_suffix).is_some()
}

/// Hands out target paths and publishes them.
#[derive(Debug, Clone)]
pub struct PathAllocator {
    directory: String,
    prefix: String,
    suffix: String,
    in_use_suffix: String,
    next_index: u64,
    current: Option<String>,
}

impl PathAllocator {
    #[must_use]
    pub fn new(settings: &WriterSettings) -> Self {
        Self {
            directory: settings.directory.clone(),
            prefix: settings.prefix.clone(),
            suffix: settings.suffix.clone(),
            in_use_suffix: settings.in_use_suffix.clone(),
            next_index: 1,
            current: None,
        }
    }

    /// In-progress path of the open file, allocating the next index if no
    /// file is open.
    pub fn current_path(&mut self) -> &str {
        let Self {
            directory,
            prefix,
            suffix,
            in_use_suffix,
            next_index,
            current,
        } = self;
        current.get_or_insert_with(|| {
            let name = format!("{prefix}-{next_index}.{suffix}.{in_use_suffix}");
            *next_index += 1;
            join_path(directory, &name)
        })
    }

    /// Path of the open file, without allocating.
    #[must_use]
    pub fn open_path(&self) -> Option<&str> {
        self.current.as_deref()
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Number of paths allocated so far.
    #[must_use]
    pub const fn allocated(&self) -> u64 {
        self.next_index - 1
    }

    /// Publish the open file by renaming away the in-progress suffix.
    ///
    /// Returns the published path, or `None` if nothing was open. The open
    /// state is cleared even if the rename fails; the file then stays under
    /// its in-progress name.
    ///
    /// # Errors
    ///
    /// Returns [`RollError::Publish`] if the transport refused the rename.
    pub fn rotate<T: Transport>(&mut self, transport: &mut T) -> Result<Option<String>> {
        let Some(from) = self.current.take() else {
            return Ok(None);
        };
        let to = final_name(&from, &self.in_use_suffix)
            .ok_or_else(|| {
                RollError::Config(format!(
                    "'{from}' does not end in '.{}'",
                    self.in_use_suffix
                ))
            })?
            .to_string();

        transport
            .rename(&from, &to)
            .map_err(|source| RollError::Publish {
                from: from.clone(),
                to: to.clone(),
                source,
            })?;
        info!(path = %to, "published file");
        Ok(Some(to))
    }

    /// Forget the open file without publishing it.
    pub fn abandon(&mut self) -> Option<String> {
        self.current.take()
    }
}

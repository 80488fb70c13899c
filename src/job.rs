//! Job orchestration around the roll writer.
//!
//! A job writes into one directory with one user prefix, possibly through
//! several writer instances at once:
//!
//! 1. [`prepare`] creates the directory and applies the write mode, once.
//! 2. [`split`] derives one unique prefix per instance.
//! 3. [`run_task`] drives one [`RecordSource`] into one [`RollWriter`];
//!    [`run_parallel`] runs many of them on the rayon pool.
//!
//! Instances never coordinate: disjoint prefixes are what keeps their files
//! apart.

use crate::config::{JobSettings, WriteMode, WriterSettings};
use crate::error::{Result, RollError, TransportResult};
use crate::naming::generate_prefix;
use crate::retry::{RetryConfig, ignore_teardown_error, retry_with_backoff};
use crate::source::RecordSource;
use crate::transport::{RemoteTransport, Transport, join_path};
use crate::writer::RollWriter;
use tracing::{debug, info, warn};

/// Outcome of one writer instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub prefix: String,
    /// Published paths, in the order they were written.
    pub files: Vec<String>,
    pub rows: u64,
}

/// Create the destination directory and apply the write mode.
///
/// - `truncate` deletes every entry whose name starts with the user prefix.
/// - `append` leaves existing entries alone.
/// - `nonConflict` fails if any entry starts with the user prefix.
///
/// # Errors
///
/// Returns [`RollError::Prepare`] if the directory cannot be created, listed,
/// or cleaned, and [`RollError::Conflict`] for `nonConflict` when matching
/// entries exist.
pub fn prepare<T: Transport>(transport: &mut T, settings: &JobSettings) -> Result<()> {
    let dir = settings.path.as_str();
    let prefix = settings.prefix.as_str();
    let prepare_err = |source| RollError::Prepare {
        dir: dir.to_string(),
        source,
    };

    transport.mkdir_recursive(dir).map_err(prepare_err)?;

    match settings.write_mode {
        WriteMode::Truncate => {
            let names = transport.list_by_prefix(dir, prefix).map_err(prepare_err)?;
            info!(dir, prefix, count = names.len(), "truncate: removing existing entries");
            let paths: Vec<String> = names.iter().map(|n| join_path(dir, n)).collect();
            transport.delete_many(&paths).map_err(prepare_err)?;
        }
        WriteMode::Append => {
            info!(dir, prefix, "append: keeping existing entries");
        }
        WriteMode::NonConflict => {
            let names = transport.list_by_prefix(dir, prefix).map_err(prepare_err)?;
            if let Some(sample) = names.first() {
                return Err(RollError::Conflict {
                    dir: dir.to_string(),
                    prefix: prefix.to_string(),
                    sample: sample.clone(),
                    count: names.len(),
                });
            }
            info!(dir, prefix, "nonConflict: no existing entries");
        }
    }
    Ok(())
}

/// Generate `count` per-instance prefixes.
///
/// Each is `{prefix}-{token}`. A candidate is discarded if an existing entry
/// in the directory, or another candidate, already starts with it.
///
/// # Errors
///
/// Returns [`RollError::Prepare`] if the directory cannot be listed.
pub fn split<T: Transport>(
    transport: &mut T,
    settings: &JobSettings,
    count: usize,
) -> Result<Vec<String>> {
    let existing = transport
        .list_by_prefix(&settings.path, &settings.prefix)
        .map_err(|source| RollError::Prepare {
            dir: settings.path.clone(),
            source,
        })?;

    let mut prefixes: Vec<String> = Vec::with_capacity(count);
    while prefixes.len() < count {
        let candidate = generate_prefix(&settings.prefix);
        let clashes = existing.iter().any(|name| name.starts_with(&candidate))
            || prefixes
                .iter()
                .any(|p| p.starts_with(&candidate) || candidate.starts_with(p.as_str()));
        if clashes {
            debug!(candidate = %candidate, "prefix already taken, generating another");
            continue;
        }
        prefixes.push(candidate);
    }
    info!(count, "split job into writer instances");
    Ok(prefixes)
}

/// Drive `source` into a new writer over `transport`.
///
/// The writer is always closed and the transport logged out. When several
/// things fail, the first failure is the one returned. A failing source
/// aborts the writer so the incomplete file is not published.
///
/// # Errors
///
/// Returns the first error from the source, a write, or the final close.
pub fn run_task<T, R>(transport: T, settings: WriterSettings, source: &mut R) -> Result<TaskReport>
where
    T: Transport,
    R: RecordSource + ?Sized,
{
    let prefix = settings.prefix.clone();
    let mut writer = RollWriter::new(transport, settings);
    let mut first_err = None;

    loop {
        match source.next_record() {
            Ok(Some(record)) => {
                if let Err(e) = writer.write_record(record.as_slice()) {
                    first_err = Some(e);
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                writer.abort();
                first_err = Some(e);
                break;
            }
        }
    }

    if let Err(e) = writer.close() {
        if first_err.is_none() {
            first_err = Some(e);
        } else {
            debug!("close after failure: {e}");
        }
    }
    ignore_teardown_error("logout", || writer.transport_mut().logout());

    if let Some(e) = first_err {
        warn!(prefix = %prefix, "task failed: {e}");
        return Err(e);
    }
    Ok(TaskReport {
        prefix,
        files: writer.files_published().to_vec(),
        rows: writer.rows_written(),
    })
}

/// Run one task per `(prefix, source)` pair on the rayon pool.
///
/// `connect` is called once per task to obtain that task's own transport.
/// Every task runs to completion; the reports come back in input order.
///
/// # Errors
///
/// Returns [`RollError::Config`] if the number of prefixes and sources
/// differ, otherwise the first failed task's error in input order.
#[cfg(feature = "parallel-io")]
pub fn run_parallel<T, R, F>(
    settings: &JobSettings,
    prefixes: Vec<String>,
    sources: Vec<R>,
    connect: F,
) -> Result<Vec<TaskReport>>
where
    T: Transport,
    R: RecordSource + Send,
    F: Fn() -> Result<T> + Sync,
{
    use rayon::prelude::*;

    if prefixes.len() != sources.len() {
        return Err(RollError::Config(format!(
            "{} prefixes for {} sources",
            prefixes.len(),
            sources.len()
        )));
    }

    let results: Vec<Result<TaskReport>> = prefixes
        .into_par_iter()
        .zip(sources.into_par_iter())
        .map(|(prefix, mut source)| {
            let transport = connect()?;
            run_task(transport, WriterSettings::for_instance(settings, prefix), &mut source)
        })
        .collect();
    results.into_iter().collect()
}

/// Log in through `login`, retrying transient failures, and wrap the session
/// in a [`RemoteTransport`].
///
/// # Errors
///
/// Returns [`RollError::Session`] with the last login failure.
pub fn connect<S, F>(retry: &RetryConfig, login: F) -> Result<RemoteTransport<S>>
where
    S: crate::transport::RemoteSession,
    F: FnMut() -> TransportResult<S>,
{
    retry_with_backoff(retry, login)
        .map(RemoteTransport::new)
        .map_err(RollError::Session)
}

/// Log in to the FTP server in `settings`.
///
/// # Errors
///
/// See [`connect`].
#[cfg(feature = "ftp")]
pub fn connect_ftp(
    settings: &crate::config::SessionSettings,
    retry: &RetryConfig,
) -> Result<crate::transport::ftp::FtpTransport> {
    connect(retry, || crate::transport::ftp::FtpSession::login(settings))
}

/// Log in to the SFTP server in `settings`.
///
/// # Errors
///
/// See [`connect`].
#[cfg(feature = "sftp")]
pub fn connect_sftp(
    settings: &crate::config::SessionSettings,
    retry: &RetryConfig,
) -> Result<crate::transport::sftp::SftpTransport> {
    connect(retry, || crate::transport::sftp::SftpSession::login(settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;
    use crate::error::ErrorKind;
    use crate::transport::FakeServer;

    fn settings(mode: &str) -> JobSettings {
        JobConfig::from_json_str(&format!(
            r#"{{"path":"/out","writeMode":"{mode}","prefix":"orders"}}"#
        ))
        .unwrap()
        .validate()
        .unwrap()
    }

    #[test]
    fn connect_retries_transient_login_failures() {
        let server = FakeServer::new();
        server.fail_logins(ErrorKind::Timeout, 2);
        let t = connect(&RetryConfig::immediate(3), || server.login()).unwrap();
        drop(t);
        assert_eq!(server.logins(), 1);
    }

    #[test]
    fn connect_gives_up_on_bad_credentials() {
        let server = FakeServer::new();
        server.fail_logins(ErrorKind::Authentication, 1);
        let err = connect(&RetryConfig::immediate(3), || server.login()).unwrap_err();
        match err {
            RollError::Session(e) => assert_eq!(e.kind, ErrorKind::Authentication),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn split_skips_nothing_when_directory_is_empty() {
        let server = FakeServer::new();
        let mut t = RemoteTransport::new(server.session());
        let s = settings("append");
        prepare(&mut t, &s).unwrap();
        let prefixes = split(&mut t, &s, 4).unwrap();
        assert_eq!(prefixes.len(), 4);
        assert!(prefixes.iter().all(|p| p.starts_with("orders-")));
        for (i, a) in prefixes.iter().enumerate() {
            for b in &prefixes[i + 1..] {
                assert!(!a.starts_with(b.as_str()) && !b.starts_with(a.as_str()));
            }
        }
    }
}

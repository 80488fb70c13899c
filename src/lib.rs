//! # Rollsink
//!
//! A **rolling, atomically-published record writer**. Rollsink streams records
//! (ordered lists of string fields) into a directory on the local disk or on an
//! FTP/SFTP server, splitting output into files by size and/or row count.
//!
//! ## Key Features
//!
//! - **Atomic publishing** - a file is written as `name.txt.tmp` and renamed to
//!   `name.txt` only once it is complete
//! - **Rolling** - start a new file after `rollSize` bytes or `rollCount` rows
//! - **Collision-free parallelism** - every writer instance gets its own prefix
//! - **Two formats** - delimiter-joined text and RFC 4180 quoted CSV
//! - **Any charset** - output encoded with any WHATWG label (`UTF-8`, `GBK`, ...)
//! - **Pluggable destinations** - local filesystem, FTP (`ftp` feature), SFTP
//!   (`sftp` feature), or an in-memory fake for tests
//!
//! ## Quick Start
//!
//! ```ignore
//! use rollsink::*;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let settings = WriterSettings::new("/data/out", generate_prefix("orders"))
//!     .with_roll_count(10_000)
//!     .with_header(["id", "amount"]);
//!
//! let mut writer = RollWriter::new(LocalTransport::new(), settings);
//! writer.write_record(&["1", "9.99"])?;
//! writer.write_record(&["2", "4.50"])?;
//! writer.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Transport
//!
//! A [`Transport`] is where files live. It opens append sinks, renames, and
//! handles the few directory operations job setup needs. Remote protocols
//! implement the smaller [`RemoteSession`] trait and are wrapped in a
//! [`RemoteTransport`], which adds buffering and sequences the protocol's
//! control commands.
//!
//! ### RollWriter
//!
//! A [`RollWriter`] owns one transport and one [`WriterSettings`]. It opens a
//! file on the first record, writes the optional header, applies the
//! [`RollPolicy`] after every record, and publishes on roll and on close.
//! Any failure poisons the writer and leaves the affected file unpublished.
//!
//! ### Jobs
//!
//! The [`job`] module covers what happens around writers: creating the
//! directory and applying the write mode ([`prepare`]), deriving per-instance
//! prefixes ([`split`]), and running one or many instances ([`run_task`],
//! `run_parallel`).
//!
//! ### Configuration
//!
//! Jobs are configured with JSON ([`JobConfig`]). [`JobConfig::validate`] fills
//! in defaults and rejects invalid settings before anything touches a
//! destination.
//!
//! ## Logging
//!
//! The crate logs through [`tracing`] and never installs a subscriber itself.

pub mod config;
pub mod encoder;
pub mod error;
pub mod job;
pub mod naming;
pub mod policy;
pub mod retry;
pub mod source;
pub mod transport;
pub mod writer;

// Re-exports for convenience
pub use config::{
    FileFormat, JobConfig, JobSettings, Protocol, SessionConfig, SessionSettings, WriteMode,
    WriterSettings,
};
pub use encoder::{Charset, CsvEncoder, Encoder, LineEnding, RecordEncoder, TextEncoder};
pub use error::{ErrorKind, Result, RollError, TransportError, TransportResult};
pub use job::{TaskReport, connect, prepare, run_task, split};
pub use naming::{PathAllocator, final_name, generate_prefix};
pub use policy::{RollAccumulator, RollPolicy, RollReason};
pub use retry::{RetryConfig, retry_with_backoff};
pub use source::{
    Column, ColumnFormatter, ColumnSource, DelimitedLineSource, IterSource, RecordSource,
    VecSource,
};
pub use transport::{
    FakeServer, FakeSession, LocalTransport, RemoteSession, RemoteTransport, Transport,
};
pub use writer::{RollWriter, WriterState};

#[cfg(feature = "parallel-io")]
pub use job::run_parallel;

#[cfg(feature = "ftp")]
pub use job::connect_ftp;
#[cfg(feature = "ftp")]
pub use transport::ftp::{FtpSession, FtpTransport};

#[cfg(feature = "sftp")]
pub use job::connect_sftp;
#[cfg(feature = "sftp")]
pub use transport::sftp::{SftpSession, SftpTransport};

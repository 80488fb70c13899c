//! Job configuration: loading, default filling, and validation.
//!
//! A [`JobConfig`] is what a user writes (JSON, camelCase keys). Calling
//! [`JobConfig::validate`] fills in defaults, normalizes values, and rejects
//! anything the writer cannot honor, producing an immutable [`JobSettings`].
//! Each writer instance then gets its own [`WriterSettings`] through
//! [`WriterSettings::for_instance`], which adds the per-instance unique prefix.
//!
//! Nothing here is global: settings are plain values passed by reference.

use crate::encoder::Charset;
use crate::error::{Result, RollError};
use chrono::format::{Item, StrftimeItems};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_FIELD_DELIMITER: char = ',';
pub const DEFAULT_ENCODING: &str = "UTF-8";
pub const DEFAULT_SUFFIX: &str = "txt";
pub const DEFAULT_IN_USE_SUFFIX: &str = "tmp";
pub const DEFAULT_NULL_FORMAT: &str = "null";
pub const DEFAULT_FTP_PORT: u16 = 21;
pub const DEFAULT_SFTP_PORT: u16 = 22;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// Enumerated options
// ============================================================================

/// Output encoding of each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FileFormat {
    /// Fields joined by the delimiter, no quoting.
    #[default]
    Text,
    /// RFC 4180 style quoting.
    Csv,
}

impl FromStr for FileFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "csv" => Ok(Self::Csv),
            other => Err(format!(
                "unsupported fileFormat '{other}', expected 'text' or 'csv'"
            )),
        }
    }
}

impl TryFrom<String> for FileFormat {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FileFormat> for String {
    fn from(value: FileFormat) -> Self {
        value.to_string()
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Csv => "csv",
        })
    }
}

/// How pre-existing files sharing the prefix are treated before writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WriteMode {
    /// Delete every entry whose name starts with the prefix.
    Truncate,
    /// Leave existing files alone.
    Append,
    /// Fail if any entry starts with the prefix.
    NonConflict,
}

impl FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "truncate" => Ok(Self::Truncate),
            "append" => Ok(Self::Append),
            "nonConflict" => Ok(Self::NonConflict),
            other => Err(format!(
                "unsupported writeMode '{other}', expected one of truncate, append, nonConflict"
            )),
        }
    }
}

impl TryFrom<String> for WriteMode {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WriteMode> for String {
    fn from(value: WriteMode) -> Self {
        value.to_string()
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Truncate => "truncate",
            Self::Append => "append",
            Self::NonConflict => "nonConflict",
        })
    }
}

/// Remote transfer protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Protocol {
    Ftp,
    Sftp,
}

impl Protocol {
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Ftp => DEFAULT_FTP_PORT,
            Self::Sftp => DEFAULT_SFTP_PORT,
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ftp" => Ok(Self::Ftp),
            "sftp" => Ok(Self::Sftp),
            other => Err(format!(
                "unsupported protocol '{other}', expected 'ftp' or 'sftp'"
            )),
        }
    }
}

impl TryFrom<String> for Protocol {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Protocol> for String {
    fn from(value: Protocol) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ftp => "ftp",
            Self::Sftp => "sftp",
        })
    }
}

// ============================================================================
// Raw (user-facing) configuration
// ============================================================================

/// Job configuration as written by the user.
///
/// Optional keys take the documented defaults; see [`JobConfig::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    /// Destination directory.
    pub path: String,
    pub write_mode: WriteMode,
    /// User prefix; each writer instance appends its own random token.
    pub prefix: String,
    #[serde(default)]
    pub file_format: FileFormat,
    #[serde(default)]
    pub field_delimiter: Option<String>,
    #[serde(default)]
    pub header: Vec<String>,
    #[serde(default)]
    pub encoding: Option<String>,
    /// Bytes per file before rolling. Zero or negative disables.
    #[serde(default)]
    pub roll_size: Option<i64>,
    /// Rows per file before rolling. Zero or negative disables.
    #[serde(default)]
    pub roll_count: Option<i64>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub in_use_suffix: Option<String>,
    /// Literal written for null columns.
    #[serde(default)]
    pub null_format: Option<String>,
    /// strftime pattern for date columns; blank means the default rendering.
    #[serde(default)]
    pub date_format: Option<String>,
    /// Present for FTP/SFTP destinations; absent means the local filesystem.
    #[serde(default)]
    pub session: Option<SessionConfig>,
}

/// Connection settings for a remote destination.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub protocol: Protocol,
    pub host: String,
    #[serde(default)]
    pub port: Option<i64>,
    /// Connect and data timeout in milliseconds.
    #[serde(default)]
    pub timeout: Option<i64>,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl JobConfig {
    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`RollError::Config`] if the JSON is malformed or a required key is missing.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RollError::Config(e.to_string()))
    }

    /// Read and parse a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`RollError::Config`] if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RollError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Fill defaults, normalize, and validate.
    ///
    /// # Errors
    ///
    /// Returns [`RollError::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<JobSettings> {
        let remote = self.session.is_some();
        let path = normalize_dir(&self.path, remote)?;

        let prefix = self.prefix.trim();
        if prefix.is_empty() {
            return Err(RollError::Config("prefix must not be blank".into()));
        }
        reject_separator("prefix", prefix)?;

        let file_format = self.file_format;

        let field_delimiter = match self.field_delimiter.as_deref() {
            None => {
                warn!("fieldDelimiter not set, using default '{DEFAULT_FIELD_DELIMITER}'");
                DEFAULT_FIELD_DELIMITER
            }
            Some(d) => {
                let mut chars = d.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => c,
                    _ => {
                        return Err(RollError::Config(format!(
                            "fieldDelimiter must be a single character, got '{d}'"
                        )));
                    }
                }
            }
        };
        if matches!(field_delimiter, '\n' | '\r') {
            return Err(RollError::Config(
                "fieldDelimiter must not be a line break".into(),
            ));
        }
        if file_format == FileFormat::Csv && (!field_delimiter.is_ascii() || field_delimiter == '"')
        {
            return Err(RollError::Config(format!(
                "csv fileFormat needs an ASCII fieldDelimiter other than '\"', got '{field_delimiter}'"
            )));
        }

        let encoding = match self.encoding.as_deref().map(str::trim) {
            None | Some("") => {
                warn!("encoding not set, using default '{DEFAULT_ENCODING}'");
                Charset::utf8()
            }
            Some(label) => Charset::for_label(label).ok_or_else(|| {
                RollError::Config(format!("unsupported encoding '{label}'"))
            })?,
        };

        let mut roll_size = clamp_threshold(self.roll_size);
        if file_format == FileFormat::Csv && roll_size > 0 {
            warn!("rollSize is not supported with fileFormat csv, disabling size-based rolling");
            roll_size = 0;
        }
        let roll_count = clamp_threshold(self.roll_count);

        let suffix = suffix_or_default("suffix", self.suffix.as_deref(), DEFAULT_SUFFIX)?;
        let in_use_suffix = suffix_or_default(
            "inUseSuffix",
            self.in_use_suffix.as_deref(),
            DEFAULT_IN_USE_SUFFIX,
        )?;
        if suffix == in_use_suffix {
            return Err(RollError::Config(format!(
                "suffix '{suffix}' and inUseSuffix '{in_use_suffix}' must differ"
            )));
        }

        let null_format = self.null_format.clone().unwrap_or_else(|| {
            warn!("nullFormat not set, using default '{DEFAULT_NULL_FORMAT}'");
            DEFAULT_NULL_FORMAT.to_string()
        });

        let date_format = match self.date_format.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(pattern) => {
                if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
                    return Err(RollError::Config(format!(
                        "invalid dateFormat '{pattern}'"
                    )));
                }
                Some(pattern.to_string())
            }
        };

        let session = self.session.as_ref().map(SessionConfig::validate).transpose()?;

        Ok(JobSettings {
            path,
            write_mode: self.write_mode,
            prefix: prefix.to_string(),
            file_format,
            field_delimiter,
            header: (!self.header.is_empty()).then(|| self.header.clone()),
            encoding,
            roll_size,
            roll_count,
            suffix,
            in_use_suffix,
            null_format,
            date_format,
            session,
        })
    }
}

impl SessionConfig {
    fn validate(&self) -> Result<SessionSettings> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(RollError::Config("session host must not be blank".into()));
        }

        let port = match self.port {
            None => {
                let port = self.protocol.default_port();
                warn!("{} port not set, using default {port}", self.protocol);
                port
            }
            Some(p) => u16::try_from(p)
                .ok()
                .filter(|p| *p >= 1)
                .ok_or_else(|| {
                    RollError::Config(format!("port {p} is outside the range [1, 65535]"))
                })?,
        };

        let timeout_ms = match self.timeout {
            None => {
                warn!("session timeout not set, using default {DEFAULT_TIMEOUT_MS} ms");
                DEFAULT_TIMEOUT_MS
            }
            Some(t) => u64::try_from(t).map_err(|_| {
                RollError::Config(format!("timeout {t} ms must not be negative"))
            })?,
        };

        let username = self.username.trim();
        if username.is_empty() {
            return Err(RollError::Config("session username must not be blank".into()));
        }

        Ok(SessionSettings {
            protocol: self.protocol,
            host: host.to_string(),
            port,
            timeout: Duration::from_millis(timeout_ms),
            username: username.to_string(),
            password: self.password.clone(),
        })
    }
}

// ============================================================================
// Validated settings
// ============================================================================

/// Validated job-wide settings. Shared by every writer instance of a job.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub path: String,
    pub write_mode: WriteMode,
    pub prefix: String,
    pub file_format: FileFormat,
    pub field_delimiter: char,
    pub header: Option<Vec<String>>,
    pub encoding: Charset,
    pub roll_size: u64,
    pub roll_count: u64,
    pub suffix: String,
    pub in_use_suffix: String,
    pub null_format: String,
    pub date_format: Option<String>,
    pub session: Option<SessionSettings>,
}

/// Validated remote connection settings.
#[derive(Clone)]
pub struct SessionSettings {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub username: String,
    /// Never trimmed.
    pub password: String,
}

impl fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSettings")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Immutable settings for one roll-writer instance.
#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub directory: String,
    pub write_mode: WriteMode,
    /// Unique per instance: user prefix plus a random token.
    pub prefix: String,
    pub suffix: String,
    pub in_use_suffix: String,
    pub encoding: Charset,
    pub field_delimiter: char,
    pub header: Option<Vec<String>>,
    pub roll_size: u64,
    pub roll_count: u64,
    pub file_format: FileFormat,
}

impl WriterSettings {
    /// Settings with every optional value at its default.
    pub fn new(directory: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            write_mode: WriteMode::Append,
            prefix: prefix.into(),
            suffix: DEFAULT_SUFFIX.to_string(),
            in_use_suffix: DEFAULT_IN_USE_SUFFIX.to_string(),
            encoding: Charset::utf8(),
            field_delimiter: DEFAULT_FIELD_DELIMITER,
            header: None,
            roll_size: 0,
            roll_count: 0,
            file_format: FileFormat::Text,
        }
    }

    /// Per-instance settings derived from validated job settings.
    #[must_use]
    pub fn for_instance(job: &JobSettings, prefix_with_token: impl Into<String>) -> Self {
        Self {
            directory: job.path.clone(),
            write_mode: job.write_mode,
            prefix: prefix_with_token.into(),
            suffix: job.suffix.clone(),
            in_use_suffix: job.in_use_suffix.clone(),
            encoding: job.encoding,
            field_delimiter: job.field_delimiter,
            header: job.header.clone(),
            roll_size: job.roll_size,
            roll_count: job.roll_count,
            file_format: job.file_format,
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: FileFormat) -> Self {
        self.file_format = format;
        self
    }

    #[must_use]
    pub const fn with_delimiter(mut self, delimiter: char) -> Self {
        self.field_delimiter = delimiter;
        self
    }

    #[must_use]
    pub fn with_header<I, S>(mut self, header: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let header: Vec<String> = header.into_iter().map(Into::into).collect();
        self.header = (!header.is_empty()).then_some(header);
        self
    }

    #[must_use]
    pub const fn with_roll_size(mut self, bytes: u64) -> Self {
        self.roll_size = bytes;
        self
    }

    #[must_use]
    pub const fn with_roll_count(mut self, rows: u64) -> Self {
        self.roll_count = rows;
        self
    }

    #[must_use]
    pub fn with_suffixes(mut self, suffix: impl Into<String>, in_use: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self.in_use_suffix = in_use.into();
        self
    }

    #[must_use]
    pub const fn with_encoding(mut self, encoding: Charset) -> Self {
        self.encoding = encoding;
        self
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn repeated_slashes() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("/+").expect("static regex"))
}

/// Collapse repeated `/` and drop a trailing one. Remote paths must be
/// absolute and must not be the root directory.
fn normalize_dir(path: &str, remote: bool) -> Result<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(RollError::Config("path must not be blank".into()));
    }
    let collapsed = repeated_slashes().replace_all(trimmed, "/").into_owned();

    if remote {
        if !collapsed.starts_with('/') {
            return Err(RollError::Config(format!(
                "path '{collapsed}' must be absolute"
            )));
        }
        if collapsed == "/" {
            return Err(RollError::Config(
                "path must not be the root directory".into(),
            ));
        }
    }

    if collapsed.len() > 1 && collapsed.ends_with('/') {
        Ok(collapsed.trim_end_matches('/').to_string())
    } else {
        Ok(collapsed)
    }
}

fn reject_separator(name: &str, value: &str) -> Result<()> {
    if value.contains('/') || value.contains(std::path::MAIN_SEPARATOR) {
        return Err(RollError::Config(format!(
            "{name} '{value}' must not contain a path separator"
        )));
    }
    Ok(())
}

fn suffix_or_default(name: &str, value: Option<&str>, default: &str) -> Result<String> {
    match value.map(str::trim) {
        None | Some("") => {
            warn!("{name} not set, using default '{default}'");
            Ok(default.to_string())
        }
        Some(v) => {
            reject_separator(name, v)?;
            Ok(v.to_string())
        }
    }
}

fn clamp_threshold(value: Option<i64>) -> u64 {
    value.map_or(0, |v| u64::try_from(v).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> JobConfig {
        JobConfig::from_json_str(r#"{"path":"/data/out","writeMode":"append","prefix":"orders"}"#)
            .unwrap()
    }

    #[test]
    fn defaults_are_filled() {
        let s = minimal().validate().unwrap();
        assert_eq!(s.file_format, FileFormat::Text);
        assert_eq!(s.field_delimiter, ',');
        assert_eq!(s.suffix, "txt");
        assert_eq!(s.in_use_suffix, "tmp");
        assert_eq!(s.null_format, "null");
        assert_eq!(s.roll_size, 0);
        assert_eq!(s.roll_count, 0);
        assert!(s.header.is_none());
        assert!(s.session.is_none());
        assert_eq!(s.encoding.name(), "UTF-8");
    }

    #[test]
    fn csv_disables_roll_size() {
        let mut cfg = minimal();
        cfg.file_format = FileFormat::Csv;
        cfg.roll_size = Some(1024);
        cfg.roll_count = Some(10);
        let s = cfg.validate().unwrap();
        assert_eq!(s.roll_size, 0);
        assert_eq!(s.roll_count, 10);
    }

    #[test]
    fn negative_thresholds_clamp_to_zero() {
        let mut cfg = minimal();
        cfg.roll_size = Some(-5);
        cfg.roll_count = Some(-1);
        let s = cfg.validate().unwrap();
        assert_eq!((s.roll_size, s.roll_count), (0, 0));
    }

    #[test]
    fn equal_suffixes_are_rejected() {
        let mut cfg = minimal();
        cfg.suffix = Some("csv".into());
        cfg.in_use_suffix = Some(" csv ".into());
        assert!(matches!(cfg.validate(), Err(RollError::Config(_))));
    }

    #[test]
    fn multi_char_delimiter_is_rejected() {
        let mut cfg = minimal();
        cfg.field_delimiter = Some("||".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn remote_path_rules() {
        assert_eq!(normalize_dir("//a///b/", true).unwrap(), "/a/b");
        assert!(normalize_dir("/", true).is_err());
        assert!(normalize_dir("rel/dir", true).is_err());
        assert_eq!(normalize_dir("rel/dir/", false).unwrap(), "rel/dir");
    }

    #[test]
    fn file_format_is_case_insensitive() {
        let cfg: JobConfig = serde_json::from_str(
            r#"{"path":"/d","writeMode":"truncate","prefix":"p","fileFormat":"CSV"}"#,
        )
        .unwrap();
        assert_eq!(cfg.file_format, FileFormat::Csv);
        assert_eq!(cfg.write_mode, WriteMode::Truncate);
    }

    #[test]
    fn unknown_write_mode_fails_to_parse() {
        let out = JobConfig::from_json_str(r#"{"path":"/d","writeMode":"overwrite","prefix":"p"}"#);
        assert!(matches!(out, Err(RollError::Config(_))));
    }

    #[test]
    fn session_defaults_and_port_range() {
        let mut cfg = minimal();
        cfg.session = Some(SessionConfig {
            protocol: Protocol::Sftp,
            host: " files.example.com ".into(),
            port: None,
            timeout: None,
            username: " bob ".into(),
            password: " secret ".into(),
        });
        let s = cfg.validate().unwrap().session.unwrap();
        assert_eq!(s.port, 22);
        assert_eq!(s.host, "files.example.com");
        assert_eq!(s.username, "bob");
        assert_eq!(s.password, " secret ");
        assert_eq!(s.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));

        let mut cfg = minimal();
        cfg.session = Some(SessionConfig {
            protocol: Protocol::Ftp,
            host: "h".into(),
            port: Some(70_000),
            timeout: None,
            username: "u".into(),
            password: "p".into(),
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_date_format_is_rejected() {
        let mut cfg = minimal();
        cfg.date_format = Some("%Y-%Q".into());
        assert!(cfg.validate().is_err());
        cfg.date_format = Some("%Y-%m-%d".into());
        assert_eq!(cfg.validate().unwrap().date_format.as_deref(), Some("%Y-%m-%d"));
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        let mut cfg = minimal();
        cfg.encoding = Some("klingon".into());
        assert!(cfg.validate().is_err());
        cfg.encoding = Some("gbk".into());
        assert_eq!(cfg.validate().unwrap().encoding.name(), "GBK");
    }
}

//! Record encoders.
//!
//! An encoder turns one record (an ordered list of string fields) into the
//! exact bytes that go into an output file, line ending included. Two
//! variants exist:
//!
//! - [`TextEncoder`] joins fields with the delimiter, no quoting.
//! - [`CsvEncoder`] applies standard CSV quoting through the `csv` crate.
//!
//! Encoders append into a caller-owned buffer so that the writer can hand the
//! sink one complete record per write call.

mod csv;
mod text;

pub use self::csv::CsvEncoder;
pub use self::text::TextEncoder;

use crate::config::{FileFormat, WriterSettings};
use encoding_rs::Encoding;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// A text encoding usable for output files.
///
/// Only encodings that encode to themselves are accepted, which rules out
/// UTF-16 (`encoding_rs` would silently emit UTF-8 for those).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Charset(&'static Encoding);

impl Charset {
    #[must_use]
    pub fn utf8() -> Self {
        Self(encoding_rs::UTF_8)
    }

    /// Look up a WHATWG label such as `"utf-8"`, `"GBK"`, or `"latin1"`.
    #[must_use]
    pub fn for_label(label: &str) -> Option<Self> {
        Encoding::for_label(label.trim().as_bytes())
            .filter(|enc| enc.output_encoding() == *enc)
            .map(Self)
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Encode `text`, failing on characters the charset cannot represent.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] naming the charset when a character is unmappable.
    pub fn encode<'a>(&self, text: &'a str) -> Result<Cow<'a, [u8]>, EncodeError> {
        if self.0 == encoding_rs::UTF_8 {
            return Ok(Cow::Borrowed(text.as_bytes()));
        }
        let (bytes, _, unmappable) = self.0.encode(text);
        if unmappable {
            return Err(EncodeError(format!(
                "text contains characters not representable in {}",
                self.name()
            )));
        }
        Ok(bytes)
    }
}

impl fmt::Debug for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Charset").field(&self.name()).finish()
    }
}

impl Default for Charset {
    fn default() -> Self {
        Self::utf8()
    }
}

/// Record terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    /// The platform convention: CRLF on Windows, LF elsewhere.
    #[must_use]
    pub const fn native() -> Self {
        if cfg!(windows) { Self::CrLf } else { Self::Lf }
    }

    #[must_use]
    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Lf => b"\n",
            Self::CrLf => b"\r\n",
        }
    }
}

/// A record could not be encoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct EncodeError(pub String);

/// Serializes records into output bytes.
pub trait RecordEncoder {
    /// Append the encoding of `fields`, terminator included, to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if a field cannot be represented in the output charset.
    fn encode_record<S: AsRef<str>>(
        &mut self,
        fields: &[S],
        out: &mut Vec<u8>,
    ) -> Result<(), EncodeError>;

    /// Append the header row. Headers use the record encoding by default.
    ///
    /// # Errors
    ///
    /// See [`RecordEncoder::encode_record`].
    fn encode_header<S: AsRef<str>>(
        &mut self,
        header: &[S],
        out: &mut Vec<u8>,
    ) -> Result<(), EncodeError> {
        self.encode_record(header, out)
    }
}

/// The encoder selected by [`FileFormat`].
#[derive(Debug)]
pub enum Encoder {
    Text(TextEncoder),
    Csv(CsvEncoder),
}

impl Encoder {
    /// Build the encoder for `settings`, terminating records with `line_ending`.
    #[must_use]
    pub fn for_settings(settings: &WriterSettings, line_ending: LineEnding) -> Self {
        match settings.file_format {
            FileFormat::Text => Self::Text(TextEncoder::new(
                settings.field_delimiter,
                settings.encoding,
                line_ending,
            )),
            FileFormat::Csv => Self::Csv(CsvEncoder::new(
                settings.field_delimiter,
                settings.encoding,
                line_ending,
            )),
        }
    }

    #[must_use]
    pub const fn format(&self) -> FileFormat {
        match self {
            Self::Text(_) => FileFormat::Text,
            Self::Csv(_) => FileFormat::Csv,
        }
    }
}

impl RecordEncoder for Encoder {
    fn encode_record<S: AsRef<str>>(
        &mut self,
        fields: &[S],
        out: &mut Vec<u8>,
    ) -> Result<(), EncodeError> {
        match self {
            Self::Text(enc) => enc.encode_record(fields, out),
            Self::Csv(enc) => enc.encode_record(fields, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charset_lookup() {
        assert_eq!(Charset::for_label("utf8").unwrap().name(), "UTF-8");
        assert_eq!(Charset::for_label(" latin1 ").unwrap().name(), "windows-1252");
        assert!(Charset::for_label("utf-16le").is_none());
        assert!(Charset::for_label("nope").is_none());
    }

    #[test]
    fn unmappable_characters_fail() {
        let latin1 = Charset::for_label("latin1").unwrap();
        assert_eq!(latin1.encode("café").unwrap().as_ref(), b"caf\xe9");
        let err = latin1.encode("日本").unwrap_err();
        assert_eq!(
            err.to_string(),
            "text contains characters not representable in windows-1252"
        );
        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn encoder_follows_format() {
        let settings = WriterSettings::new("/d", "p").with_format(FileFormat::Csv);
        let enc = Encoder::for_settings(&settings, LineEnding::Lf);
        assert_eq!(enc.format(), FileFormat::Csv);
    }
}

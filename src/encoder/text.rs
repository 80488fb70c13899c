use super::{Charset, EncodeError, LineEnding, RecordEncoder};

/// Delimited text: fields joined by a single character, no quoting or escaping.
///
/// A field containing the delimiter is written as-is, so the output is only
/// unambiguous when the data never contains it. An empty record becomes a
/// bare line ending.
#[derive(Debug)]
pub struct TextEncoder {
    delimiter: char,
    charset: Charset,
    line_ending: LineEnding,
    line: String,
}

impl TextEncoder {
    #[must_use]
    pub const fn new(delimiter: char, charset: Charset, line_ending: LineEnding) -> Self {
        Self {
            delimiter,
            charset,
            line_ending,
            line: String::new(),
        }
    }
}

impl RecordEncoder for TextEncoder {
    fn encode_record<S: AsRef<str>>(
        &mut self,
        fields: &[S],
        out: &mut Vec<u8>,
    ) -> Result<(), EncodeError> {
        self.line.clear();
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                self.line.push(self.delimiter);
            }
            self.line.push_str(field.as_ref());
        }
        out.extend_from_slice(&self.charset.encode(&self.line)?);
        out.extend_from_slice(self.line_ending.as_bytes());
        Ok(())
    }
}

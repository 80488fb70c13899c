use super::{Charset, EncodeError, LineEnding, RecordEncoder};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use std::borrow::Cow;

/// Quoted CSV.
///
/// Fields are quoted when they contain the delimiter, a quote, or a line
/// break; embedded quotes are doubled. Records may have differing lengths.
/// An empty record is written as a single empty quoted field (`""`) so that
/// it still round-trips as one record.
#[derive(Debug)]
pub struct CsvEncoder {
    charset: Charset,
    builder: WriterBuilder,
}

impl CsvEncoder {
    /// `delimiter` must be ASCII; configuration validation guarantees it.
    #[must_use]
    pub fn new(delimiter: char, charset: Charset, line_ending: LineEnding) -> Self {
        let delimiter = u8::try_from(delimiter).unwrap_or(b',');
        let terminator = match line_ending {
            LineEnding::Lf => Terminator::Any(b'\n'),
            LineEnding::CrLf => Terminator::CRLF,
        };
        let mut builder = WriterBuilder::new();
        builder
            .delimiter(delimiter)
            .terminator(terminator)
            .quote_style(QuoteStyle::Necessary)
            .has_headers(false)
            .flexible(true)
            .buffer_capacity(256);
        Self { charset, builder }
    }
}

impl RecordEncoder for CsvEncoder {
    fn encode_record<S: AsRef<str>>(
        &mut self,
        fields: &[S],
        out: &mut Vec<u8>,
    ) -> Result<(), EncodeError> {
        let encoded: Vec<Cow<'_, [u8]>> = if fields.is_empty() {
            vec![Cow::Borrowed(&b""[..])]
        } else {
            fields
                .iter()
                .map(|f| self.charset.encode(f.as_ref()))
                .collect::<Result<_, _>>()?
        };

        // One writer per record, so each call leaves a complete record in `out`.
        let mut writer = self.builder.from_writer(&mut *out);
        writer
            .write_record(&encoded)
            .and_then(|()| writer.flush().map_err(csv::Error::from))
            .map_err(|e| EncodeError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(enc: &mut CsvEncoder, fields: &[&str]) -> String {
        let mut out = Vec::new();
        enc.encode_record(fields, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn plain_fields_are_unquoted() {
        let mut enc = CsvEncoder::new(',', Charset::utf8(), LineEnding::Lf);
        assert_eq!(encode(&mut enc, &["a", "b"]), "a,b\n");
    }

    #[test]
    fn special_fields_are_quoted() {
        let mut enc = CsvEncoder::new(',', Charset::utf8(), LineEnding::Lf);
        assert_eq!(
            encode(&mut enc, &["a,b", "say \"hi\"", "two\nlines"]),
            "\"a,b\",\"say \"\"hi\"\"\",\"two\nlines\"\n"
        );
    }

    #[test]
    fn custom_delimiter() {
        let mut enc = CsvEncoder::new(';', Charset::utf8(), LineEnding::CrLf);
        assert_eq!(encode(&mut enc, &["a;b", "c,d"]), "\"a;b\";c,d\r\n");
    }

    #[test]
    fn empty_record_is_not_zero_bytes() {
        let mut enc = CsvEncoder::new(',', Charset::utf8(), LineEnding::Lf);
        assert_eq!(encode(&mut enc, &[]), "\"\"\n");
    }

    #[test]
    fn records_of_different_lengths() {
        let mut enc = CsvEncoder::new(',', Charset::utf8(), LineEnding::Lf);
        assert_eq!(encode(&mut enc, &["a", "b", "c"]), "a,b,c\n");
        assert_eq!(encode(&mut enc, &["d"]), "d\n");
    }

    #[test]
    fn appends_after_existing_bytes() {
        let mut enc = CsvEncoder::new(',', Charset::utf8(), LineEnding::Lf);
        let mut out = b"id,note\n".to_vec();
        enc.encode_record(&["1", "x,y"], &mut out).unwrap();
        enc.encode_record(&["2", "z"], &mut out).unwrap();
        assert_eq!(out, b"id,note\n1,\"x,y\"\n2,z\n");
    }

    #[test]
    fn output_parses_back() {
        let rows = vec![
            vec!["id", "note"],
            vec!["1", "comma, inside"],
            vec!["2", "quote \" inside"],
        ];
        let mut enc = CsvEncoder::new(',', Charset::utf8(), LineEnding::Lf);
        let mut out = Vec::new();
        for row in &rows {
            enc.encode_record(row, &mut out).unwrap();
        }
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(out.as_slice());
        let parsed: Vec<Vec<String>> = rdr
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect();
        assert_eq!(parsed, rows);
    }
}

//! Delimited row formats: CSV and tab-separated PostgreSQL text.
//!
//! CSV follows PostgreSQL's `csv` COPY format on top of `csv_core`: a NULL
//! is an unquoted empty field, while an empty string is written as `""`.
//! The decoder drives `csv_core` field by field so it can see whether an
//! empty field was quoted. A blank line is a single NULL field.
//!
//! TSV follows PostgreSQL's `text` COPY format: one line per row, fields
//! separated by tabs, `\N` for NULL and backslash escapes for control
//! characters.

use std::borrow::Cow;
use std::io::{BufRead, BufReader};
use std::ops::Range;
use std::sync::Arc;

use csv_core::{QuoteStyle, ReadFieldResult, Terminator};

use crate::byte_io::{ByteSink, ByteSource, SourceReader};
use crate::error::{PipelineError, Result};
use crate::types::{Row, TupleDescriptor};

use super::{TupleDecoder, TupleEncoder};

const TSV_NULL: &[u8] = b"\\N";
const END_OF_DATA: &[u8] = b"\\.";
const CSV_QUOTE: u8 = b'"';
const MIN_FIELD_GROWTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Csv,
    Tsv,
}

// ===========================================================================
// Encoder
// ===========================================================================

pub struct DelimitedEncoder {
    dialect: Dialect,
    descriptor: Arc<TupleDescriptor>,
    sink: Box<dyn ByteSink>,
    quoting: csv_core::Writer,
    line: Vec<u8>,
}

impl DelimitedEncoder {
    pub fn new(dialect: Dialect, descriptor: Arc<TupleDescriptor>, sink: Box<dyn ByteSink>) -> Self {
        let quoting = csv_core::WriterBuilder::new()
            .quote_style(QuoteStyle::Necessary)
            .terminator(Terminator::Any(b'\n'))
            .build();
        Self {
            dialect,
            descriptor,
            sink,
            quoting,
            line: Vec::new(),
        }
    }
}

impl TupleEncoder for DelimitedEncoder {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn push(&mut self, row: &Row) -> Result<()> {
        self.descriptor.check_row(row)?;

        let separator = match self.dialect {
            Dialect::Csv => b',',
            Dialect::Tsv => b'\t',
        };
        self.line.clear();
        for (index, value) in row.values().iter().enumerate() {
            if index > 0 {
                self.line.push(separator);
            }
            match (self.dialect, value) {
                (Dialect::Csv, Some(value)) => {
                    write_csv_field(&self.quoting, value.to_text().as_bytes(), &mut self.line)
                }
                (Dialect::Csv, None) => {}
                (Dialect::Tsv, Some(value)) => escape_text_field(value.to_text().as_bytes(), &mut self.line),
                (Dialect::Tsv, None) => self.line.extend_from_slice(TSV_NULL),
            }
        }
        self.line.push(b'\n');
        self.sink.write(&self.line)
    }

    fn finish(self: Box<Self>) -> Result<()> {
        self.sink.close()
    }
}

/// Quote `field` when it is empty, holds a special byte, or looks like the
/// end-of-data marker. Unquoted empty fields are reserved for NULL.
fn write_csv_field(quoting: &csv_core::Writer, field: &[u8], line: &mut Vec<u8>) {
    if !field.is_empty() && field != END_OF_DATA && !quoting.should_quote(field) {
        line.extend_from_slice(field);
        return;
    }

    line.push(CSV_QUOTE);
    let start = line.len();
    // Doubling every quote is the worst case.
    line.resize(start + 2 * field.len(), 0);
    let (_, _, written) = csv_core::quote(field, &mut line[start..], CSV_QUOTE, CSV_QUOTE, true);
    line.truncate(start + written);
    line.push(CSV_QUOTE);
}

fn escape_text_field(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        match b {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            0x08 => out.extend_from_slice(b"\\b"),
            0x0b => out.extend_from_slice(b"\\v"),
            0x0c => out.extend_from_slice(b"\\f"),
            _ => out.push(b),
        }
    }
}

// ===========================================================================
// Decoder
// ===========================================================================

/// Incremental CSV record reader. Field bytes of the current record live in
/// `data`; `fields` holds their ranges, `None` for NULL.
struct CsvParser {
    input: BufReader<SourceReader>,
    reader: csv_core::Reader,
    data: Vec<u8>,
    fields: Vec<Option<Range<usize>>>,
}

impl CsvParser {
    fn new(reader: SourceReader) -> Self {
        Self {
            input: BufReader::new(reader),
            reader: csv_core::ReaderBuilder::new()
                .terminator(Terminator::Any(b'\n'))
                .build(),
            data: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Read the next record. Returns `false` at end of input or at a lone
    /// unquoted `\.` line.
    fn read_record(&mut self) -> Result<bool> {
        self.data.clear();
        self.fields.clear();

        if self.input.fill_buf()?.first() == Some(&b'\n') {
            self.input.consume(1);
            self.fields.push(None);
            return Ok(true);
        }

        loop {
            let start = self.data.len();
            let mut quoted = false;
            let mut tail = [0u8; 2];

            let record_end = loop {
                let input = self.input.fill_buf()?;
                let filled = self.data.len();
                self.data.resize(filled + input.len().max(MIN_FIELD_GROWTH), 0);
                let (result, consumed, written) = self.reader.read_field(input, &mut self.data[filled..]);

                let raw = &input[..consumed];
                quoted |= raw.contains(&CSV_QUOTE);
                match raw {
                    [] => {}
                    [last] => tail = [tail[1], *last],
                    [.., a, b] => tail = [*a, *b],
                }
                self.data.truncate(filled + written);
                self.input.consume(consumed);

                match result {
                    ReadFieldResult::InputEmpty | ReadFieldResult::OutputFull => continue,
                    ReadFieldResult::End => return Ok(!self.fields.is_empty()),
                    ReadFieldResult::Field { record_end } => break record_end,
                }
            };

            // CRLF input leaves the carriage return on the last field.
            if record_end && tail == *b"\r\n" && self.data.len() > start && self.data.last() == Some(&b'\r') {
                self.data.pop();
            }
            let end = self.data.len();
            self.fields.push((quoted || end > start).then_some(start..end));

            if record_end {
                let end_marker = !quoted && self.fields.len() == 1 && self.data == END_OF_DATA;
                return Ok(!end_marker);
            }
        }
    }
}

enum Parser {
    Csv(CsvParser),
    Tsv {
        reader: BufReader<SourceReader>,
        line: Vec<u8>,
    },
}

impl Parser {
    fn into_source(self) -> Box<dyn ByteSource> {
        match self {
            Parser::Csv(parser) => parser.input.into_inner().into_source(),
            Parser::Tsv { reader, .. } => reader.into_inner().into_source(),
        }
    }

    fn next_row(&mut self, descriptor: &TupleDescriptor) -> Result<Option<Row>> {
        match self {
            Parser::Csv(parser) => {
                if !parser.read_record()? {
                    return Ok(None);
                }
                let data = &parser.data;
                let fields = parser
                    .fields
                    .iter()
                    .map(|field| field.clone().map(|range| Cow::Borrowed(&data[range])));
                build_row(descriptor, fields, parser.fields.len()).map(Some)
            }
            Parser::Tsv { reader, line } => {
                line.clear();
                if reader.read_until(b'\n', line)? == 0 {
                    return Ok(None);
                }
                if line.last() == Some(&b'\n') {
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                }
                if line.as_slice() == END_OF_DATA {
                    return Ok(None);
                }

                let field_count = line.iter().filter(|&&b| b == b'\t').count() + 1;
                let fields = line.split(|&b| b == b'\t').map(|field| {
                    if field == TSV_NULL {
                        None
                    } else {
                        Some(Cow::Owned(unescape_text_field(field)))
                    }
                });
                build_row(descriptor, fields, field_count).map(Some)
            }
        }
    }
}

/// Turn raw field bytes into a row. `None` fields are NULL.
fn build_row<'a, I>(descriptor: &TupleDescriptor, fields: I, field_count: usize) -> Result<Row>
where
    I: Iterator<Item = Option<Cow<'a, [u8]>>>,
{
    if field_count != descriptor.column_count() {
        return Err(PipelineError::Data(format!(
            "expected {} fields, found {}",
            descriptor.column_count(),
            field_count
        )));
    }

    let mut values = Vec::with_capacity(field_count);
    for (column, field) in descriptor.columns().iter().zip(fields) {
        let value = match field {
            None => None,
            Some(bytes) => {
                let text = std::str::from_utf8(&bytes)
                    .map_err(|e| PipelineError::Data(format!("column \"{}\": {}", column.name, e)))?;
                Some(column.column_type.parse_text(text)?)
            }
        };
        values.push(value);
    }
    Ok(Row::new(values))
}

pub struct DelimitedDecoder {
    dialect: Dialect,
    descriptor: Arc<TupleDescriptor>,
    source: Option<Box<dyn ByteSource>>,
    parser: Option<Parser>,
    exhausted: bool,
    line_number: u64,
}

impl DelimitedDecoder {
    pub fn new(dialect: Dialect, descriptor: Arc<TupleDescriptor>, source: Box<dyn ByteSource>) -> Self {
        Self {
            dialect,
            descriptor,
            source: Some(source),
            parser: None,
            exhausted: false,
            line_number: 0,
        }
    }
}

impl TupleDecoder for DelimitedDecoder {
    fn start(&mut self) -> Result<()> {
        let source = self
            .source
            .take()
            .ok_or_else(|| PipelineError::Config("decoder already started".to_string()))?;
        let reader = SourceReader::new(source);

        self.parser = Some(match self.dialect {
            Dialect::Csv => Parser::Csv(CsvParser::new(reader)),
            Dialect::Tsv => Parser::Tsv {
                reader: BufReader::new(reader),
                line: Vec::new(),
            },
        });
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>> {
        if self.exhausted {
            return Ok(None);
        }
        self.line_number += 1;

        let result = match self.parser.as_mut() {
            Some(parser) => parser.next_row(&self.descriptor),
            None => Err(PipelineError::Config("decoder has not been started".to_string())),
        };

        match result {
            Ok(None) => {
                self.exhausted = true;
                Ok(None)
            }
            Err(PipelineError::Data(msg)) => Err(PipelineError::Data(format!(
                "{} (line {})",
                msg, self.line_number
            ))),
            other => other,
        }
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let source = match (self.parser, self.source) {
            (Some(parser), _) => parser.into_source(),
            (None, Some(source)) => source,
            (None, None) => return Ok(()),
        };
        source.close()
    }
}

/// Undo PostgreSQL text-format escaping.
fn unescape_text_field(field: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(field.len());
    let mut i = 0;

    while i < field.len() {
        let b = field[i];
        if b != b'\\' || i + 1 == field.len() {
            out.push(b);
            i += 1;
            continue;
        }

        let next = field[i + 1];
        i += 2;
        match next {
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'0'..=b'7' => {
                let mut value = (next - b'0') as u32;
                let mut digits = 1;
                while digits < 3 && i < field.len() && (b'0'..=b'7').contains(&field[i]) {
                    value = value * 8 + (field[i] - b'0') as u32;
                    i += 1;
                    digits += 1;
                }
                out.push((value & 0xff) as u8);
            }
            b'x' if i < field.len() && field[i].is_ascii_hexdigit() => {
                let mut value = hex_digit(field[i]);
                i += 1;
                if i < field.len() && field[i].is_ascii_hexdigit() {
                    value = value * 16 + hex_digit(field[i]);
                    i += 1;
                }
                out.push(value);
            }
            other => out.push(other),
        }
    }
    out
}

fn hex_digit(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_io::{MemorySink, MemorySource};
    use crate::types::{ColumnType, Value};

    fn encode(dialect: Dialect, descriptor: &Arc<TupleDescriptor>, rows: &[Row]) -> Vec<u8> {
        let (sink, handle) = MemorySink::shared();
        let mut encoder = Box::new(DelimitedEncoder::new(dialect, descriptor.clone(), Box::new(sink)));
        encoder.start().unwrap();
        for row in rows {
            encoder.push(row).unwrap();
        }
        encoder.finish().unwrap();
        handle.contents()
    }

    fn decode(dialect: Dialect, descriptor: &Arc<TupleDescriptor>, bytes: &[u8]) -> Result<Vec<Row>> {
        let mut decoder = Box::new(DelimitedDecoder::new(
            dialect,
            descriptor.clone(),
            Box::new(MemorySource::new(bytes.to_vec())),
        ));
        decoder.start()?;
        let mut rows = Vec::new();
        while let Some(row) = decoder.next()? {
            rows.push(row);
        }
        decoder.finish()?;
        Ok(rows)
    }

    fn sample_rows() -> Vec<Row> {
        vec![
            Row::new(vec![
                Some(Value::Int32(1)),
                Some(Value::Text("plain".into())),
                Some(Value::Bool(true)),
            ]),
            Row::new(vec![
                Some(Value::Int32(-2)),
                Some(Value::Text("comma, \"quote\"\nnewline\ttab \\ slash".into())),
                None,
            ]),
            Row::new(vec![None, None, Some(Value::Bool(false))]),
        ]
    }

    #[test]
    fn csv_output_shape() {
        let descriptor = TupleDescriptor::parse("id:int4,name:text").unwrap();
        let rows = vec![
            Row::new(vec![Some(Value::Int32(1)), Some(Value::Text("a,b".into()))]),
            Row::new(vec![Some(Value::Int32(2)), None]),
        ];
        let bytes = encode(Dialect::Csv, &descriptor, &rows);
        assert_eq!(String::from_utf8(bytes).unwrap(), "1,\"a,b\"\n2,\n");
    }

    #[test]
    fn tsv_output_shape() {
        let descriptor = TupleDescriptor::parse("id:int4,name:text").unwrap();
        let rows = vec![
            Row::new(vec![Some(Value::Int32(1)), Some(Value::Text("a\tb\\c".into()))]),
            Row::new(vec![Some(Value::Int32(2)), None]),
        ];
        let bytes = encode(Dialect::Tsv, &descriptor, &rows);
        assert_eq!(String::from_utf8(bytes).unwrap(), "1\ta\\tb\\\\c\n2\t\\N\n");
    }

    #[test]
    fn csv_and_tsv_round_trip() {
        let descriptor = TupleDescriptor::parse("id:int4,name:text,flag:bool").unwrap();
        let rows = sample_rows();
        for dialect in [Dialect::Csv, Dialect::Tsv] {
            let bytes = encode(dialect, &descriptor, &rows);
            assert_eq!(decode(dialect, &descriptor, &bytes).unwrap(), rows, "{:?}", dialect);
        }
    }

    #[test]
    fn tsv_keeps_empty_string_distinct_from_null() {
        let descriptor = TupleDescriptor::parse("s:text").unwrap();
        let rows = vec![
            Row::new(vec![Some(Value::Text(String::new()))]),
            Row::new(vec![None]),
        ];
        let bytes = encode(Dialect::Tsv, &descriptor, &rows);
        assert_eq!(decode(Dialect::Tsv, &descriptor, &bytes).unwrap(), rows);
    }

    #[test]
    fn csv_keeps_empty_string_distinct_from_null() {
        let descriptor = TupleDescriptor::parse("id:int4,s:text").unwrap();
        let rows = vec![
            Row::new(vec![Some(Value::Int32(1)), Some(Value::Text(String::new()))]),
            Row::new(vec![Some(Value::Int32(2)), None]),
        ];
        let bytes = encode(Dialect::Csv, &descriptor, &rows);
        assert_eq!(bytes, b"1,\"\"\n2,\n");
        assert_eq!(decode(Dialect::Csv, &descriptor, &bytes).unwrap(), rows);
    }

    #[test]
    fn csv_single_column_null_is_blank_line() {
        let descriptor = TupleDescriptor::parse("s:text").unwrap();
        let rows = vec![
            Row::new(vec![None]),
            Row::new(vec![Some(Value::Text(String::new()))]),
            Row::new(vec![None]),
            Row::new(vec![Some(Value::Text("x".into()))]),
        ];
        let bytes = encode(Dialect::Csv, &descriptor, &rows);
        assert_eq!(bytes, b"\n\"\"\n\nx\n");
        assert_eq!(decode(Dialect::Csv, &descriptor, &bytes).unwrap(), rows);
    }

    #[test]
    fn csv_reads_quoted_and_unquoted_empty_fields() {
        let descriptor = TupleDescriptor::parse("a:text,b:int8").unwrap();
        let rows = decode(Dialect::Csv, &descriptor, b",7\n\"\",\n").unwrap();
        assert_eq!(rows[0], Row::new(vec![None, Some(Value::Int64(7))]));
        assert_eq!(rows[1], Row::new(vec![Some(Value::Text(String::new())), None]));
    }

    #[test]
    fn csv_accepts_crlf_and_missing_final_newline() {
        let descriptor = TupleDescriptor::parse("a:text,b:text").unwrap();
        let rows = decode(Dialect::Csv, &descriptor, b"x,\"y\"\r\n,\"\"\r\nlast,z").unwrap();
        assert_eq!(
            rows,
            vec![
                Row::new(vec![Some(Value::Text("x".into())), Some(Value::Text("y".into()))]),
                Row::new(vec![None, Some(Value::Text(String::new()))]),
                Row::new(vec![Some(Value::Text("last".into())), Some(Value::Text("z".into()))]),
            ]
        );
    }

    #[test]
    fn csv_end_marker_only_when_unquoted() {
        let descriptor = TupleDescriptor::parse("s:text").unwrap();
        let rows = vec![Row::new(vec![Some(Value::Text("\\.".into()))])];
        let bytes = encode(Dialect::Csv, &descriptor, &rows);
        assert_eq!(bytes, b"\"\\.\"\n");
        assert_eq!(decode(Dialect::Csv, &descriptor, &bytes).unwrap(), rows);

        let rows = decode(Dialect::Csv, &descriptor, b"a\n\\.\nignored\n").unwrap();
        assert_eq!(rows, vec![Row::new(vec![Some(Value::Text("a".into()))])]);
    }

    #[test]
    fn csv_fields_longer_than_read_buffer() {
        let descriptor = TupleDescriptor::parse("id:int4,s:text").unwrap();
        let long = "q\"uote,".repeat(4000);
        let rows = vec![Row::new(vec![Some(Value::Int32(1)), Some(Value::Text(long))])];
        let bytes = encode(Dialect::Csv, &descriptor, &rows);
        assert_eq!(decode(Dialect::Csv, &descriptor, &bytes).unwrap(), rows);
    }

    #[test]
    fn tsv_decodes_postgres_escapes_and_end_marker() {
        let descriptor = TupleDescriptor::parse("s:text").unwrap();
        let input = b"\\101\\x42\\r\\v\r\n\\.\nignored\n";
        let rows = decode(Dialect::Tsv, &descriptor, input).unwrap();
        assert_eq!(rows, vec![Row::new(vec![Some(Value::Text("AB\r\x0b".into()))])]);
    }

    #[test]
    fn wrong_field_count_reports_line() {
        let descriptor = TupleDescriptor::parse("a:int4,b:int4").unwrap();
        match decode(Dialect::Csv, &descriptor, b"1,2\n3\n") {
            Err(PipelineError::Data(msg)) => {
                assert!(msg.contains("expected 2 fields, found 1"), "{}", msg);
                assert!(msg.contains("line 2"), "{}", msg);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn bad_value_is_data_error() {
        let descriptor = TupleDescriptor::new(vec![crate::types::Column::new("n", ColumnType::Int16)]);
        assert!(matches!(
            decode(Dialect::Tsv, &descriptor, b"99999\n"),
            Err(PipelineError::Data(_))
        ));
    }

    #[test]
    fn next_after_exhaustion_stays_exhausted() {
        let descriptor = TupleDescriptor::parse("a:int4").unwrap();
        let mut decoder = Box::new(DelimitedDecoder::new(
            Dialect::Csv,
            descriptor,
            Box::new(MemorySource::new("1\n")),
        ));
        decoder.start().unwrap();
        assert!(decoder.next().unwrap().is_some());
        assert!(decoder.next().unwrap().is_none());
        assert!(decoder.next().unwrap().is_none());
        decoder.finish().unwrap();
    }

    #[test]
    fn push_rejects_mismatched_row() {
        let descriptor = TupleDescriptor::parse("a:int4").unwrap();
        let mut encoder = DelimitedEncoder::new(Dialect::Csv, descriptor, Box::new(MemorySink::new()));
        let err = encoder
            .push(&Row::new(vec![Some(Value::Int32(1)), None]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Data(_)));
    }
}

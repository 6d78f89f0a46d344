//! PostgreSQL binary `COPY` layout.
//!
//! ```text
//! header:  "PGCOPY\n\xff\r\n\0" | flags: i32 | extension length: i32 | extension
//! tuple:   field count: i16 | (length: i32, bytes)*   length -1 = NULL
//! trailer: i16 -1
//! ```
//!
//! All integers are big-endian. Dates count days and timestamps count
//! microseconds from 2000-01-01.

use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate};

use crate::byte_io::{ByteSink, ByteSource, SourceReader};
use crate::error::{PipelineError, Result};
use crate::types::{Column, ColumnType, Row, TupleDescriptor, Value};

use super::{TupleDecoder, TupleEncoder};

const SIGNATURE: &[u8; 11] = b"PGCOPY\n\xff\r\n\0";
const TRAILER: i16 = -1;
const NULL_LENGTH: i32 = -1;

/// `NaiveDate::num_days_from_ce` of 2000-01-01.
const PG_EPOCH_DAYS_FROM_CE: i32 = 730_120;
/// 2000-01-01T00:00:00 as microseconds since the Unix epoch.
const PG_EPOCH_UNIX_MICROS: i64 = 946_684_800_000_000;

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

pub struct BinaryEncoder {
    descriptor: Arc<TupleDescriptor>,
    sink: Box<dyn ByteSink>,
    tuple: Vec<u8>,
}

impl BinaryEncoder {
    pub fn new(descriptor: Arc<TupleDescriptor>, sink: Box<dyn ByteSink>) -> Self {
        Self {
            descriptor,
            sink,
            tuple: Vec::new(),
        }
    }
}

impl TupleEncoder for BinaryEncoder {
    fn start(&mut self) -> Result<()> {
        let mut header = Vec::with_capacity(SIGNATURE.len() + 8);
        header.extend_from_slice(SIGNATURE);
        header.extend_from_slice(&0i32.to_be_bytes());
        header.extend_from_slice(&0i32.to_be_bytes());
        self.sink.write(&header)
    }

    fn push(&mut self, row: &Row) -> Result<()> {
        self.descriptor.check_row(row)?;

        let field_count = i16::try_from(row.len()).map_err(|_| {
            PipelineError::Data(format!("too many columns for binary format: {}", row.len()))
        })?;

        self.tuple.clear();
        self.tuple.extend_from_slice(&field_count.to_be_bytes());
        for value in row.values() {
            match value {
                None => self.tuple.extend_from_slice(&NULL_LENGTH.to_be_bytes()),
                Some(value) => {
                    let length_at = self.tuple.len();
                    self.tuple.extend_from_slice(&[0; 4]);
                    encode_value(value, &mut self.tuple)?;
                    let length = i32::try_from(self.tuple.len() - length_at - 4).map_err(|_| {
                        PipelineError::Data("field too large for binary format".to_string())
                    })?;
                    self.tuple[length_at..length_at + 4].copy_from_slice(&length.to_be_bytes());
                }
            }
        }
        self.sink.write(&self.tuple)
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.sink.write(&TRAILER.to_be_bytes())?;
        self.sink.close()
    }
}

fn encode_value(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Bool(b) => out.push(u8::from(*b)),
        Value::Int16(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Int32(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Int64(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Float32(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Float64(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Text(s) | Value::Xml(s) => out.extend_from_slice(s.as_bytes()),
        Value::Json(j) => out.extend_from_slice(j.to_string().as_bytes()),
        Value::Bytes(b) => out.extend_from_slice(b),
        Value::Date(d) => {
            let days = d.num_days_from_ce() - PG_EPOCH_DAYS_FROM_CE;
            out.extend_from_slice(&days.to_be_bytes());
        }
        Value::Timestamp(ts) => {
            let micros = ts
                .and_utc()
                .timestamp_micros()
                .checked_sub(PG_EPOCH_UNIX_MICROS)
                .ok_or_else(|| PipelineError::Data(format!("timestamp out of range: {}", ts)))?;
            out.extend_from_slice(&micros.to_be_bytes());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

pub struct BinaryDecoder {
    descriptor: Arc<TupleDescriptor>,
    source: Option<Box<dyn ByteSource>>,
    reader: Option<BufReader<SourceReader>>,
    exhausted: bool,
    field: Vec<u8>,
}

impl BinaryDecoder {
    pub fn new(descriptor: Arc<TupleDescriptor>, source: Box<dyn ByteSource>) -> Self {
        Self {
            descriptor,
            source: Some(source),
            reader: None,
            exhausted: false,
            field: Vec::new(),
        }
    }

    fn reader(&mut self) -> Result<&mut BufReader<SourceReader>> {
        self.reader
            .as_mut()
            .ok_or_else(|| PipelineError::Config("decoder has not been started".to_string()))
    }

    fn read_header(&mut self) -> Result<()> {
        let reader = self.reader()?;
        if reader.fill_buf()?.is_empty() {
            self.exhausted = true;
            return Ok(());
        }

        let mut signature = [0u8; 11];
        read_exact(reader, &mut signature, "header")?;
        if &signature != SIGNATURE {
            return Err(PipelineError::Codec(
                "binary COPY file signature not recognized".to_string(),
            ));
        }

        let _flags = read_i32(reader, "header")?;
        let extension_length = read_i32(reader, "header")?;
        if extension_length < 0 {
            return Err(PipelineError::Codec(format!(
                "invalid binary COPY header extension length: {}",
                extension_length
            )));
        }
        let skipped = std::io::copy(
            &mut reader.by_ref().take(extension_length as u64),
            &mut std::io::sink(),
        )?;
        if skipped != extension_length as u64 {
            return Err(truncated("header"));
        }
        Ok(())
    }
}

impl TupleDecoder for BinaryDecoder {
    fn start(&mut self) -> Result<()> {
        let source = self
            .source
            .take()
            .ok_or_else(|| PipelineError::Config("decoder already started".to_string()))?;
        self.reader = Some(BufReader::new(SourceReader::new(source)));
        self.read_header()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        if self.exhausted {
            return Ok(None);
        }

        let descriptor = self.descriptor.clone();
        let mut field = std::mem::take(&mut self.field);
        let reader = self.reader()?;

        // A missing trailer is tolerated at a tuple boundary.
        if reader.fill_buf()?.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        let field_count = read_i16(reader, "tuple")?;
        if field_count == TRAILER {
            self.exhausted = true;
            return Ok(None);
        }
        if field_count as usize != descriptor.column_count() || field_count < 0 {
            return Err(PipelineError::Data(format!(
                "row field count is {}, expected {}",
                field_count,
                descriptor.column_count()
            )));
        }

        let mut values = Vec::with_capacity(descriptor.column_count());
        for column in descriptor.columns() {
            let length = read_i32(reader, "field")?;
            if length == NULL_LENGTH {
                values.push(None);
                continue;
            }
            if length < 0 {
                return Err(PipelineError::Codec(format!("invalid field length: {}", length)));
            }
            // Grows with the bytes actually present, not the declared length.
            field.clear();
            let read = reader.by_ref().take(length as u64).read_to_end(&mut field)?;
            if read != length as usize {
                return Err(truncated("field"));
            }
            values.push(Some(decode_value(column, &field)?));
        }

        self.field = field;
        Ok(Some(Row::new(values)))
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let source = match (self.reader, self.source) {
            (Some(reader), _) => reader.into_inner().into_source(),
            (None, Some(source)) => source,
            (None, None) => return Ok(()),
        };
        source.close()
    }
}

fn truncated(what: &str) -> PipelineError {
    PipelineError::Codec(format!("unexpected end of binary COPY data in {}", what))
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            truncated(what)
        } else {
            PipelineError::from(e)
        }
    })
}

fn read_i16<R: Read>(reader: &mut R, what: &str) -> Result<i16> {
    let mut bytes = [0u8; 2];
    read_exact(reader, &mut bytes, what)?;
    Ok(i16::from_be_bytes(bytes))
}

fn read_i32<R: Read>(reader: &mut R, what: &str) -> Result<i32> {
    let mut bytes = [0u8; 4];
    read_exact(reader, &mut bytes, what)?;
    Ok(i32::from_be_bytes(bytes))
}

fn decode_value(column: &Column, bytes: &[u8]) -> Result<Value> {
    let wrong_size = || {
        PipelineError::Data(format!(
            "incorrect binary data format in column \"{}\" of type {}: {} bytes",
            column.name,
            column.column_type,
            bytes.len()
        ))
    };
    let as_text = || {
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| PipelineError::Data(format!("column \"{}\": {}", column.name, e)))
    };

    let value = match column.column_type {
        ColumnType::Bool => match bytes {
            [b] => Value::Bool(*b != 0),
            _ => return Err(wrong_size()),
        },
        ColumnType::Int16 => Value::Int16(i16::from_be_bytes(bytes.try_into().map_err(|_| wrong_size())?)),
        ColumnType::Int32 => Value::Int32(i32::from_be_bytes(bytes.try_into().map_err(|_| wrong_size())?)),
        ColumnType::Int64 => Value::Int64(i64::from_be_bytes(bytes.try_into().map_err(|_| wrong_size())?)),
        ColumnType::Float32 => Value::Float32(f32::from_be_bytes(bytes.try_into().map_err(|_| wrong_size())?)),
        ColumnType::Float64 => Value::Float64(f64::from_be_bytes(bytes.try_into().map_err(|_| wrong_size())?)),
        ColumnType::Text => Value::Text(as_text()?),
        ColumnType::Xml => Value::Xml(as_text()?),
        ColumnType::Json => Value::Json(
            serde_json::from_slice(bytes)
                .map_err(|e| PipelineError::Data(format!("column \"{}\": {}", column.name, e)))?,
        ),
        ColumnType::Bytea => Value::Bytes(bytes.to_vec()),
        ColumnType::Date => {
            let days = i32::from_be_bytes(bytes.try_into().map_err(|_| wrong_size())?);
            let date = days
                .checked_add(PG_EPOCH_DAYS_FROM_CE)
                .and_then(NaiveDate::from_num_days_from_ce_opt)
                .ok_or_else(|| PipelineError::Data(format!("date out of range: {} days", days)))?;
            Value::Date(date)
        }
        ColumnType::Timestamp => {
            let micros = i64::from_be_bytes(bytes.try_into().map_err(|_| wrong_size())?);
            let ts = micros
                .checked_add(PG_EPOCH_UNIX_MICROS)
                .and_then(DateTime::from_timestamp_micros)
                .ok_or_else(|| PipelineError::Data(format!("timestamp out of range: {} us", micros)))?;
            Value::Timestamp(ts.naive_utc())
        }
    };
    Ok(value)
}

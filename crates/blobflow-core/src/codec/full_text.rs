//! Whole-stream codec: the entire byte stream is the text of the single
//! column of a single row. Used for `json` and `xml` documents.

use std::sync::Arc;

use crate::byte_io::{ByteSink, ByteSource};
use crate::cancel::Interrupt;
use crate::error::{PipelineError, Result};
use crate::types::{Row, TupleDescriptor};

use super::{TupleDecoder, TupleEncoder};

const READ_CHUNK_SIZE: usize = 64 * 1024;

fn require_single_column(descriptor: &TupleDescriptor) -> Result<()> {
    if descriptor.column_count() != 1 {
        return Err(PipelineError::Config(format!(
            "can only use a full-text format with a single column, got {} columns",
            descriptor.column_count()
        )));
    }
    Ok(())
}

pub struct FullTextEncoder {
    descriptor: Arc<TupleDescriptor>,
    sink: Box<dyn ByteSink>,
}

impl FullTextEncoder {
    pub fn new(descriptor: Arc<TupleDescriptor>, sink: Box<dyn ByteSink>) -> Result<Self> {
        require_single_column(&descriptor)?;
        Ok(Self { descriptor, sink })
    }
}

impl TupleEncoder for FullTextEncoder {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// NULL values write nothing. Successive rows are concatenated without
    /// separators.
    fn push(&mut self, row: &Row) -> Result<()> {
        self.descriptor.check_row(row)?;
        match row.get(0) {
            Some(value) => self.sink.write(value.to_text().as_bytes()),
            None => Ok(()),
        }
    }

    fn finish(self: Box<Self>) -> Result<()> {
        self.sink.close()
    }
}

pub struct FullTextDecoder {
    descriptor: Arc<TupleDescriptor>,
    source: Box<dyn ByteSource>,
    interrupt: Interrupt,
    emitted: bool,
}

impl FullTextDecoder {
    pub fn new(
        descriptor: Arc<TupleDescriptor>,
        source: Box<dyn ByteSource>,
        interrupt: Interrupt,
    ) -> Result<Self> {
        require_single_column(&descriptor)?;
        Ok(Self {
            descriptor,
            source,
            interrupt,
            emitted: false,
        })
    }

    fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            self.interrupt.checkpoint()?;

            let filled = data.len();
            data.resize(filled + READ_CHUNK_SIZE, 0);
            let n = self.source.read(&mut data[filled..], 0)?;
            data.truncate(filled + n);
            if n == 0 {
                return Ok(data);
            }
        }
    }
}

impl TupleDecoder for FullTextDecoder {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Yields exactly one row. Empty input decodes as NULL.
    fn next(&mut self) -> Result<Option<Row>> {
        if self.emitted {
            return Ok(None);
        }
        self.emitted = true;

        let data = self.read_to_end()?;
        if data.is_empty() {
            return Ok(Some(Row::new(vec![None])));
        }

        let column = self.descriptor.column(0);
        let text = String::from_utf8(data).map_err(|e| {
            PipelineError::Data(format!("column \"{}\": {}", column.name, e.utf8_error()))
        })?;
        let value = column.column_type.parse_text(&text)?;
        Ok(Some(Row::new(vec![Some(value)])))
    }

    fn finish(self: Box<Self>) -> Result<()> {
        self.source.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_io::{MemorySink, MemorySource};
    use crate::types::Value;

    fn decoder(columns: &str, input: Vec<u8>) -> Box<FullTextDecoder> {
        Box::new(
            FullTextDecoder::new(
                TupleDescriptor::parse(columns).unwrap(),
                Box::new(MemorySource::new(input)),
                Interrupt::new(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn whole_stream_is_one_value() {
        let document = format!("{{\"items\": [{}]}}", vec!["1"; 50_000].join(","));
        let mut decoder = decoder("doc:json", document.clone().into_bytes());
        decoder.start().unwrap();

        let row = decoder.next().unwrap().unwrap();
        let expected: serde_json::Value = serde_json::from_str(&document).unwrap();
        assert_eq!(row.get(0), Some(&Value::Json(expected)));
        assert!(decoder.next().unwrap().is_none());
        decoder.finish().unwrap();
    }

    #[test]
    fn empty_stream_is_null() {
        let mut decoder = decoder("doc:text", Vec::new());
        decoder.start().unwrap();
        assert!(decoder.next().unwrap().unwrap().is_null(0));
        assert!(decoder.next().unwrap().is_none());
    }

    #[test]
    fn invalid_utf8_is_data_error() {
        let mut decoder = decoder("doc:xml", vec![b'<', 0xff, b'>']);
        decoder.start().unwrap();
        assert!(matches!(decoder.next(), Err(PipelineError::Data(_))));
    }

    #[test]
    fn encoder_concatenates_and_skips_nulls() {
        let descriptor = TupleDescriptor::parse("doc:text").unwrap();
        let (sink, handle) = MemorySink::shared();
        let mut encoder = Box::new(FullTextEncoder::new(descriptor, Box::new(sink)).unwrap());
        encoder.start().unwrap();
        encoder.push(&Row::new(vec![Some(Value::Text("ab".into()))])).unwrap();
        encoder.push(&Row::new(vec![None])).unwrap();
        encoder.push(&Row::new(vec![Some(Value::Text("cd".into()))])).unwrap();
        encoder.finish().unwrap();
        assert_eq!(handle.contents(), b"abcd");
    }

    #[test]
    fn cancelled_before_read() {
        let interrupt = Interrupt::new();
        interrupt.cancel();
        let mut decoder = FullTextDecoder::new(
            TupleDescriptor::parse("doc:text").unwrap(),
            Box::new(MemorySource::new("x")),
            interrupt,
        )
        .unwrap();
        assert!(decoder.next().unwrap_err().is_cancelled());
    }

    /// Serves three bytes per read and records the requested minimums.
    struct Dribble {
        data: Vec<u8>,
        minimums: std::rc::Rc<std::cell::RefCell<Vec<usize>>>,
    }

    impl ByteSource for Dribble {
        fn read(&mut self, buf: &mut [u8], min_read: usize) -> Result<usize> {
            self.minimums.borrow_mut().push(min_read);
            let n = buf.len().min(3).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data.drain(..n);
            Ok(n)
        }

        fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn reads_upstream_chunks_without_minimum() {
        let minimums = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let source = Dribble {
            data: b"hello world".to_vec(),
            minimums: minimums.clone(),
        };
        let mut decoder = FullTextDecoder::new(
            TupleDescriptor::parse("doc:text").unwrap(),
            Box::new(source),
            Interrupt::new(),
        )
        .unwrap();

        let row = decoder.next().unwrap().unwrap();
        assert_eq!(row.get(0), Some(&Value::Text("hello world".into())));
        let minimums = minimums.borrow();
        assert_eq!(minimums.len(), 5);
        assert!(minimums.iter().all(|&min| min == 0));
    }

    #[test]
    fn rejects_multiple_columns() {
        let result = FullTextEncoder::new(
            TupleDescriptor::parse("a,b").unwrap(),
            Box::new(MemorySink::new()),
        );
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}

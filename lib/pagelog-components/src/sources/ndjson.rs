use std::{hash::Hasher as _, path::Path};

use async_trait::async_trait;
use pagelog_error::{ErrorContext as _, GenericError};
use serde_json::Value;
use tokio::{
    fs::File,
    io::{stdin, AsyncBufRead, AsyncBufReadExt as _, BufReader, Stdin},
};
use tracing::debug;
use twox_hash::XxHash64;

use super::{RawBatch, RecordSource};

/// A source that reads newline-delimited JSON.
///
/// Each non-blank line is one raw event. Lines are grouped into batches of at most `batch_size` events. A batch is
/// identified by the source name, the line number it starts at, and a digest of its lines, so re-reading the same input
/// yields the same batch identifiers while different input under the same name never does.
///
/// Lines that are not valid UTF-8 or not valid JSON are carried through as string values.
pub struct NdjsonSource<R> {
    name: String,
    reader: R,
    buf: Vec<u8>,
    batch_size: usize,
    next_line: u64,
    exhausted: bool,
}

impl<R> NdjsonSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    /// Creates a new `NdjsonSource` over the given reader.
    ///
    /// A batch size of zero is treated as one.
    pub fn new(name: impl Into<String>, reader: R, batch_size: usize) -> Self {
        Self {
            name: name.into(),
            reader,
            buf: Vec::new(),
            batch_size: batch_size.max(1),
            next_line: 1,
            exhausted: false,
        }
    }
}

impl NdjsonSource<BufReader<File>> {
    /// Opens the file at `path` as an `NdjsonSource`.
    ///
    /// The source is named after the file name.
    ///
    /// # Errors
    ///
    /// If the file cannot be opened, an error is returned.
    pub async fn from_path<P: AsRef<Path>>(path: P, batch_size: usize) -> Result<Self, GenericError> {
        let path = path.as_ref();
        let file = File::open(path)
            .await
            .with_error_context(|| format!("Failed to open input file '{}'.", path.display()))?;

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        Ok(Self::new(name, BufReader::new(file), batch_size))
    }
}

impl NdjsonSource<BufReader<Stdin>> {
    /// Creates an `NdjsonSource` reading from standard input.
    pub fn stdin(batch_size: usize) -> Self {
        Self::new("stdin", BufReader::new(stdin()), batch_size)
    }
}

#[async_trait]
impl<R> RecordSource for NdjsonSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_batch(&mut self) -> Result<Option<RawBatch>, GenericError> {
        if self.exhausted {
            return Ok(None);
        }

        let first_line = self.next_line;
        let mut digest = XxHash64::with_seed(0);
        let mut records = Vec::with_capacity(self.batch_size);
        while records.len() < self.batch_size {
            self.buf.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .await
                .with_error_context(|| format!("Failed to read line {} from '{}'.", self.next_line, self.name))?;

            if read == 0 {
                self.exhausted = true;
                break;
            }

            let line_number = self.next_line;
            self.next_line += 1;

            let line = self.buf.trim_ascii();
            if line.is_empty() {
                continue;
            }

            digest.write(line);
            digest.write_u8(b'\n');
            records.push(decode_line(&self.name, line_number, line));
        }

        if records.is_empty() {
            return Ok(None);
        }

        Ok(Some(RawBatch {
            id: format!("{}-{:010}-{:016x}", self.name, first_line, digest.finish()),
            records,
        }))
    }
}

fn decode_line(source: &str, line_number: u64, line: &[u8]) -> Value {
    let line = match std::str::from_utf8(line) {
        Ok(line) => line,
        Err(e) => {
            debug!(source, line_number, error = %e, "Line is not valid UTF-8 and will be carried through as a raw string.");
            return Value::String(String::from_utf8_lossy(line).into_owned());
        }
    };

    match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            debug!(source, line_number, error = %e, "Undecodable line will be carried through as a raw string.");
            Value::String(line.to_string())
        }
    }
}

//! Sorted runs stored in temporary files.

use std::error::Error;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::marker::PhantomData;
use std::path::Path;

use tempfile;

/// Run building error.
#[derive(Debug)]
pub enum ExternalChunkError<S: Error> {
    /// Common I/O error.
    IO(io::Error),
    /// Data serialization error.
    SerializationError(S),
}

impl<S: Error> From<io::Error> for ExternalChunkError<S> {
    fn from(err: io::Error) -> Self {
        ExternalChunkError::IO(err)
    }
}

/// A sorted run written to an anonymous temporary file and read back record by record.
pub trait ExternalChunk<T>: Sized + Iterator<Item = Result<T, Self::DeserializationError>> {
    /// Error returned when data serialization failed.
    type SerializationError: Error;
    /// Error returned when data deserialization failed.
    type DeserializationError: Error;

    /// Writes `items` to a new file in `dir` and opens it for reading.
    ///
    /// # Arguments
    /// * `dir` - Directory the run file is created in
    /// * `items` - Run records in sorted order
    /// * `buf_size` - File read/write buffer size, [`None`] for the default one
    fn build(
        dir: &Path,
        items: impl IntoIterator<Item = T>,
        buf_size: Option<usize>,
    ) -> Result<Self, ExternalChunkError<Self::SerializationError>> {
        let run_file = tempfile::tempfile_in(dir)?;

        let mut run_writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, run_file.try_clone()?),
            None => io::BufWriter::new(run_file.try_clone()?),
        };
        let len = Self::dump(&mut run_writer, items).map_err(ExternalChunkError::SerializationError)?;
        run_writer.flush()?;
        drop(run_writer);

        let mut run_reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, run_file),
            None => io::BufReader::new(run_file),
        };
        run_reader.rewind()?;

        return Ok(Self::new(run_reader, len));
    }

    /// Opens a run of `len` records for reading.
    fn new(reader: io::BufReader<fs::File>, len: u64) -> Self;

    /// Writes `items` and returns how many were written.
    fn dump(
        run_writer: &mut io::BufWriter<fs::File>,
        items: impl IntoIterator<Item = T>,
    ) -> Result<u64, Self::SerializationError>;

    /// Returns the number of records not read yet.
    fn remaining(&self) -> u64;
}

/// Run stored in MessagePack format, see https://msgpack.org/.
pub struct RmpExternalChunk<T> {
    reader: io::BufReader<fs::File>,
    remaining: u64,

    item_type: PhantomData<T>,
}

impl<T> ExternalChunk<T> for RmpExternalChunk<T>
where
    T: serde::ser::Serialize + serde::de::DeserializeOwned,
{
    type SerializationError = rmp_serde::encode::Error;
    type DeserializationError = rmp_serde::decode::Error;

    fn new(reader: io::BufReader<fs::File>, len: u64) -> Self {
        RmpExternalChunk {
            reader,
            remaining: len,
            item_type: PhantomData,
        }
    }

    fn dump(
        mut run_writer: &mut io::BufWriter<fs::File>,
        items: impl IntoIterator<Item = T>,
    ) -> Result<u64, Self::SerializationError> {
        let mut len = 0;
        for item in items.into_iter() {
            rmp_serde::encode::write(&mut run_writer, &item)?;
            len += 1;
        }

        return Ok(len);
    }

    fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl<T> Iterator for RmpExternalChunk<T>
where
    T: serde::ser::Serialize + serde::de::DeserializeOwned,
{
    type Item = Result<T, rmp_serde::decode::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(rmp_serde::decode::from_read(&mut self.reader))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

//! File backed streams of fixed-size records.

use std::fs;
use std::io::{self, prelude::*, SeekFrom};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use log;
use tempfile;

use crate::error::{Error, Result};

/// Pending appends are written out once this many bytes have accumulated.
const WRITE_BUF_SIZE: usize = 64 * 1024;

/// Fixed-size record that can be stored in a [`RecordStream`].
pub trait Record: Copy {
    /// Encoded record size in bytes.
    const SIZE: usize;

    /// Encodes the record into `buf`, which is exactly [`Record::SIZE`] bytes long.
    fn write_to(&self, buf: &mut [u8]);

    /// Decodes a record from `buf`, which is exactly [`Record::SIZE`] bytes long.
    fn read_from(buf: &[u8]) -> Self;
}

/// Destination of records produced by a scan.
pub trait RecordSink<T> {
    /// Appends a record to the sink.
    fn push(&mut self, item: T) -> Result<()>;
}

impl<T> RecordSink<T> for Vec<T> {
    fn push(&mut self, item: T) -> Result<()> {
        Vec::push(self, item);
        Ok(())
    }
}

/// What happens to the backing file when the stream is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// File is removed on drop.
    Transient,
    /// File is kept on drop.
    Persistent,
    /// Read-only view over another stream's file, never removes it.
    View,
}

/// Stream of fixed-size records stored in a file.
///
/// Records are appended at the end and read sequentially from a cursor that can be
/// moved with [`RecordStream::seek`]. Appends are buffered and flushed before any read.
pub struct RecordStream<T: Record> {
    file: fs::File,
    path: PathBuf,
    persistence: Persistence,
    /// Index of the first record of this stream within the file.
    offset: u64,
    /// Number of records including the pending ones.
    len: u64,
    /// Read cursor relative to `offset`.
    cursor: u64,
    pending: Vec<u8>,

    record_type: PhantomData<T>,
}

impl<T: Record> RecordStream<T> {
    /// Creates an empty transient stream in `dir`. The file is removed when the stream is dropped.
    pub fn create_in(dir: &Path) -> Result<Self> {
        let tmp_file = tempfile::Builder::new()
            .prefix("stream-")
            .suffix(".rec")
            .tempfile_in(dir)?;
        let (file, path) = tmp_file.keep().map_err(|err| err.error)?;

        log::trace!("created transient stream {}", path.display());

        return Ok(Self::from_file(file, path, Persistence::Transient, 0, 0));
    }

    /// Creates an empty persistent stream at `path`, truncating an existing file.
    pub fn create(path: &Path) -> Result<Self> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        return Ok(Self::from_file(file, path.to_owned(), Persistence::Persistent, 0, 0));
    }

    /// Opens an existing persistent stream at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let file = fs::OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len();
        if file_len % T::SIZE as u64 != 0 {
            return Err(Error::Storage(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} is {} bytes long, not a whole number of {} byte records",
                    path.display(),
                    file_len,
                    T::SIZE
                ),
            )));
        }

        let len = file_len / T::SIZE as u64;
        return Ok(Self::from_file(file, path.to_owned(), Persistence::Persistent, 0, len));
    }

    fn from_file(file: fs::File, path: PathBuf, persistence: Persistence, offset: u64, len: u64) -> Self {
        RecordStream {
            file,
            path,
            persistence,
            offset,
            len,
            cursor: 0,
            pending: Vec::new(),
            record_type: PhantomData,
        }
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    /// Makes the backing file be removed when the stream is dropped.
    pub fn mark_transient(&mut self) {
        if self.persistence != Persistence::View {
            self.persistence = Persistence::Transient;
        }
    }

    /// Makes the backing file be kept when the stream is dropped.
    pub fn persist(&mut self) {
        if self.persistence != Persistence::View {
            self.persistence = Persistence::Persistent;
        }
    }

    /// Returns the number of records in the stream.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the read cursor position.
    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// Moves the read cursor to the record `offset`.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.len {
            return Err(Error::Storage(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek to record {} past the end of a {} record stream", offset, self.len),
            )));
        }
        self.cursor = offset;
        return Ok(());
    }

    /// Appends a record to the end of the stream.
    pub fn append(&mut self, item: &T) -> Result<()> {
        self.check_writable()?;

        let start = self.pending.len();
        self.pending.resize(start + T::SIZE, 0);
        item.write_to(&mut self.pending[start..]);
        self.len += 1;

        if self.pending.len() >= WRITE_BUF_SIZE {
            self.flush()?;
        }
        return Ok(());
    }

    /// Appends all records of `items` to the end of the stream.
    pub fn write_bulk(&mut self, items: &[T]) -> Result<()> {
        for item in items {
            self.append(item)?;
        }
        return Ok(());
    }

    /// Reads at most `count` records starting at the cursor and appends them to `buf`.
    /// Returns the number of records read, 0 at the end of the stream.
    pub fn read_bulk(&mut self, buf: &mut Vec<T>, count: usize) -> Result<usize> {
        self.flush()?;

        let count = count.min((self.len - self.cursor) as usize);
        if count == 0 {
            return Ok(0);
        }

        let mut bytes = vec![0; count * T::SIZE];
        self.file
            .seek(SeekFrom::Start((self.offset + self.cursor) * T::SIZE as u64))?;
        self.file.read_exact(&mut bytes)?;

        buf.extend(bytes.chunks_exact(T::SIZE).map(T::read_from));
        self.cursor += count as u64;

        return Ok(count);
    }

    /// Reads the whole stream into memory.
    pub fn read_all(&mut self) -> Result<Vec<T>> {
        self.seek(0)?;
        let mut items = Vec::with_capacity(self.len as usize);
        self.read_bulk(&mut items, self.len as usize)?;
        return Ok(items);
    }

    /// Shrinks the stream to `len` records.
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.check_writable()?;
        if len > self.len {
            return Err(Error::Storage(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot truncate a {} record stream to {} records", self.len, len),
            )));
        }

        self.flush()?;
        self.file.set_len(len * T::SIZE as u64)?;
        self.len = len;
        self.cursor = self.cursor.min(len);
        return Ok(());
    }

    /// Writes pending appends to the backing file.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&self.pending)?;
        self.pending.clear();
        return Ok(());
    }

    /// Creates a read-only view over the records `start..end` of this stream.
    pub fn substream(&mut self, start: u64, end: u64) -> Result<RecordStream<T>> {
        if start > end || end > self.len {
            return Err(Error::Storage(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("substream {}..{} out of a {} record stream", start, end, self.len),
            )));
        }

        self.flush()?;
        let file = fs::File::open(&self.path)?;

        return Ok(Self::from_file(
            file,
            self.path.clone(),
            Persistence::View,
            self.offset + start,
            end - start,
        ));
    }

    /// Rewinds the stream and returns an iterator reading it in blocks of `block_len` records.
    pub fn reader(&mut self, block_len: usize) -> Result<StreamReader<'_, T>> {
        self.seek(0)?;
        let block_len = block_len.max(1);

        return Ok(StreamReader {
            stream: self,
            block: Vec::with_capacity(block_len),
            pos: 0,
            block_len,
        });
    }

    fn check_writable(&self) -> Result<()> {
        if self.persistence == Persistence::View {
            return Err(Error::Storage(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("substream of {} is read-only", self.path.display()),
            )));
        }
        return Ok(());
    }
}

impl<T: Record> RecordSink<T> for RecordStream<T> {
    fn push(&mut self, item: T) -> Result<()> {
        self.append(&item)
    }
}

impl<T: Record> Drop for RecordStream<T> {
    fn drop(&mut self) {
        match self.persistence {
            Persistence::Transient => {
                if let Err(err) = fs::remove_file(&self.path) {
                    log::warn!("transient stream {} not removed: {}", self.path.display(), err);
                }
            }
            Persistence::Persistent => {
                let _ = self.flush();
            }
            Persistence::View => {}
        }
    }
}

/// Sequential reader over a [`RecordStream`] fetching records in bulk.
pub struct StreamReader<'a, T: Record> {
    stream: &'a mut RecordStream<T>,
    block: Vec<T>,
    pos: usize,
    block_len: usize,
}

impl<'a, T: Record> Iterator for StreamReader<'a, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos == self.block.len() {
            self.block.clear();
            self.pos = 0;
            match self.stream.read_bulk(&mut self.block, self.block_len) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => return Some(Err(err)),
            }
        }

        let item = self.block[self.pos];
        self.pos += 1;
        return Some(Ok(item));
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{Persistence, Record, RecordStream};
    use crate::edge::Edge;
    use crate::error::Error;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn edges(count: u64) -> Vec<Edge> {
        Vec::from_iter((0..count).map(|i| Edge::new(i, i + 1)))
    }

    #[rstest]
    #[case(0, 4)]
    #[case(10, 3)]
    #[case(10_000, 256)]
    fn test_append_and_read(tmp_dir: tempfile::TempDir, #[case] count: u64, #[case] block_len: usize) {
        let saved = edges(count);

        let mut stream = RecordStream::create_in(tmp_dir.path()).unwrap();
        for edge in &saved {
            stream.append(edge).unwrap();
        }
        assert_eq!(stream.len(), count);

        let restored: Result<Vec<Edge>, _> = stream.reader(block_len).unwrap().collect();
        assert_eq!(restored.unwrap(), saved);
    }

    #[rstest]
    fn test_seek_and_read_bulk(tmp_dir: tempfile::TempDir) {
        let mut stream = RecordStream::create_in(tmp_dir.path()).unwrap();
        stream.write_bulk(&edges(10)).unwrap();

        stream.seek(7).unwrap();
        let mut buf = Vec::new();
        assert_eq!(stream.read_bulk(&mut buf, 5).unwrap(), 3);
        assert_eq!(buf, edges(10)[7..].to_vec());
        assert_eq!(stream.read_bulk(&mut buf, 5).unwrap(), 0);

        assert!(matches!(stream.seek(11), Err(Error::Storage(_))));
    }

    #[rstest]
    fn test_truncate(tmp_dir: tempfile::TempDir) {
        let mut stream = RecordStream::create_in(tmp_dir.path()).unwrap();
        stream.write_bulk(&edges(10)).unwrap();

        stream.truncate(4).unwrap();
        assert_eq!(stream.len(), 4);
        assert_eq!(stream.read_all().unwrap(), edges(4));

        stream.append(&Edge::new(100, 101)).unwrap();
        assert_eq!(stream.read_all().unwrap()[4], Edge::new(100, 101));
        assert!(stream.truncate(6).is_err());
    }

    #[rstest]
    fn test_substream_is_read_only_view(tmp_dir: tempfile::TempDir) {
        let mut stream = RecordStream::create_in(tmp_dir.path()).unwrap();
        stream.write_bulk(&edges(10)).unwrap();

        let mut view = stream.substream(2, 6).unwrap();
        assert_eq!(view.persistence(), Persistence::View);
        assert_eq!(view.read_all().unwrap(), edges(10)[2..6].to_vec());

        let mut nested = view.substream(1, 3).unwrap();
        assert_eq!(nested.read_all().unwrap(), edges(10)[3..5].to_vec());

        assert!(matches!(view.append(&Edge::new(0, 1)), Err(Error::Storage(_))));
        drop(view);
        drop(nested);
        assert!(stream.path().exists());
    }

    #[rstest]
    fn test_transient_and_persistent(tmp_dir: tempfile::TempDir) {
        let mut transient: RecordStream<Edge> = RecordStream::create_in(tmp_dir.path()).unwrap();
        let transient_path = transient.path().to_owned();
        transient.persist();
        drop(transient);
        assert!(transient_path.exists());

        let path = tmp_dir.path().join("edges.rec");
        let mut persistent = RecordStream::create(&path).unwrap();
        persistent.write_bulk(&edges(5)).unwrap();
        drop(persistent);

        let mut reopened: RecordStream<Edge> = RecordStream::open(&path).unwrap();
        assert_eq!(reopened.read_all().unwrap(), edges(5));
        reopened.mark_transient();
        drop(reopened);
        assert!(!path.exists());
    }

    #[rstest]
    fn test_open_rejects_partial_record(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("broken.rec");
        std::fs::write(&path, vec![0u8; Edge::SIZE + 3]).unwrap();

        let result: Result<RecordStream<Edge>, _> = RecordStream::open(&path);
        assert!(matches!(result, Err(Error::Storage(_))));
    }
}

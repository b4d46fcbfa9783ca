//! Record store backends
//!
//! The queue sits on an append-only record store with a per-record
//! confirmed marker; only append, indexed read/mark, and whole-log rewrite
//! are required of a backend. [`FileStore`] is the durable implementation
//! (fixed 28-byte binary records); [`MemoryStore`] backs tests and
//! diskless builds.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use fern_core::{MeshError, MeshResult, Sample, SAMPLE_SIZE};

/// On-disk record size: `[confirmed:1][sample:27]`.
pub const RECORD_SIZE: usize = 1 + SAMPLE_SIZE;

/// One queued measurement with its delivery marker.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StoredRecord {
    pub confirmed: bool,
    pub sample: Sample,
}

impl StoredRecord {
    pub fn unconfirmed(sample: Sample) -> Self {
        StoredRecord {
            confirmed: false,
            sample,
        }
    }

    fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0] = self.confirmed as u8;
        self.sample
            .encode(&mut buf[1..])
            .expect("fixed-size buffer");
        buf
    }

    fn decode(buf: &[u8; RECORD_SIZE]) -> MeshResult<Self> {
        Ok(StoredRecord {
            confirmed: buf[0] != 0,
            sample: Sample::decode(&buf[1..])?,
        })
    }
}

/// Backend contract for the outbound queue.
pub trait RecordStore: Send {
    fn append(&mut self, record: StoredRecord) -> MeshResult<()>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn read(&mut self, index: usize) -> MeshResult<StoredRecord>;
    fn mark_confirmed(&mut self, index: usize) -> MeshResult<()>;
    /// Atomically replace the whole log. Must be rewrite-then-swap, never
    /// an in-place edit: interruption leaves either the old or the new log.
    fn replace_all(&mut self, records: &[StoredRecord]) -> MeshResult<()>;
}

impl<S: RecordStore + ?Sized> RecordStore for Box<S> {
    fn append(&mut self, record: StoredRecord) -> MeshResult<()> {
        (**self).append(record)
    }
    fn len(&self) -> usize {
        (**self).len()
    }
    fn read(&mut self, index: usize) -> MeshResult<StoredRecord> {
        (**self).read(index)
    }
    fn mark_confirmed(&mut self, index: usize) -> MeshResult<()> {
        (**self).mark_confirmed(index)
    }
    fn replace_all(&mut self, records: &[StoredRecord]) -> MeshResult<()> {
        (**self).replace_all(records)
    }
}

/// Volatile store for tests and diskless nodes.
#[derive(Default)]
pub struct MemoryStore {
    records: Vec<StoredRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn records(&self) -> &[StoredRecord] {
        &self.records
    }
}

impl RecordStore for MemoryStore {
    fn append(&mut self, record: StoredRecord) -> MeshResult<()> {
        self.records.push(record);
        Ok(())
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn read(&mut self, index: usize) -> MeshResult<StoredRecord> {
        self.records
            .get(index)
            .copied()
            .ok_or(MeshError::CursorOutOfBounds)
    }

    fn mark_confirmed(&mut self, index: usize) -> MeshResult<()> {
        let record = self
            .records
            .get_mut(index)
            .ok_or(MeshError::CursorOutOfBounds)?;
        record.confirmed = true;
        Ok(())
    }

    fn replace_all(&mut self, records: &[StoredRecord]) -> MeshResult<()> {
        self.records = records.to_vec();
        Ok(())
    }
}

fn storage_err(err: std::io::Error) -> MeshError {
    MeshError::Storage(err.to_string())
}

/// File-backed store: a flat array of fixed-size records.
///
/// A trailing partial record (torn append) is dropped at open. Rewrites go
/// through a sibling temp file and an atomic rename.
pub struct FileStore {
    path: PathBuf,
    file: File,
    count: usize,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> MeshResult<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(storage_err)?;

        let bytes = file.metadata().map_err(storage_err)?.len() as usize;
        let count = bytes / RECORD_SIZE;
        if bytes % RECORD_SIZE != 0 {
            tracing::warn!(path = %path.display(), "dropping torn trailing record");
            file.set_len((count * RECORD_SIZE) as u64).map_err(storage_err)?;
        }

        Ok(FileStore { path, file, count })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn seek_record(&mut self, index: usize) -> MeshResult<()> {
        self.file
            .seek(SeekFrom::Start((index * RECORD_SIZE) as u64))
            .map_err(storage_err)?;
        Ok(())
    }
}

impl RecordStore for FileStore {
    fn append(&mut self, record: StoredRecord) -> MeshResult<()> {
        self.file.seek(SeekFrom::End(0)).map_err(storage_err)?;
        self.file.write_all(&record.encode()).map_err(storage_err)?;
        self.file.sync_data().map_err(storage_err)?;
        self.count += 1;
        Ok(())
    }

    fn len(&self) -> usize {
        self.count
    }

    fn read(&mut self, index: usize) -> MeshResult<StoredRecord> {
        if index >= self.count {
            return Err(MeshError::CursorOutOfBounds);
        }
        self.seek_record(index)?;
        let mut buf = [0u8; RECORD_SIZE];
        self.file.read_exact(&mut buf).map_err(storage_err)?;
        StoredRecord::decode(&buf)
    }

    fn mark_confirmed(&mut self, index: usize) -> MeshResult<()> {
        if index >= self.count {
            return Err(MeshError::CursorOutOfBounds);
        }
        self.seek_record(index)?;
        self.file.write_all(&[1u8]).map_err(storage_err)?;
        self.file.sync_data().map_err(storage_err)?;
        Ok(())
    }

    fn replace_all(&mut self, records: &[StoredRecord]) -> MeshResult<()> {
        let temp_path = self.path.with_extension("rewrite");
        let mut temp = File::create(&temp_path).map_err(storage_err)?;
        for record in records {
            temp.write_all(&record.encode()).map_err(storage_err)?;
        }
        temp.sync_all().map_err(storage_err)?;
        drop(temp);

        std::fs::rename(&temp_path, &self.path).map_err(storage_err)?;

        self.file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(storage_err)?;
        self.count = records.len();
        Ok(())
    }
}

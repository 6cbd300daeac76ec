use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::Error;

/// A random-access byte array: the storage seam `HashStore` and `StoredAsset`
/// are built on. Reads and writes are synchronous and offset-addressed,
/// matching the original's `IDataArray`/`RandomAccessFile` — hash-node
/// write-back happens from `Drop`, which cannot `.await`.
pub trait DataArray: Send + Sync {
    fn size(&self) -> u64;
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Error>;
    fn write(&self, offset: u64, data: &[u8]) -> Result<usize, Error>;
    fn describe(&self) -> String;
}

/// A whole file, opened once and shared behind an `Arc`.
pub struct FileDataArray {
    file: File,
    size: u64,
    path: PathBuf,
}

impl FileDataArray {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = File::options().read(true).write(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(FileDataArray { file, size, path })
    }

    pub fn create(path: impl AsRef<Path>, size: u64) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(size)?;
        Ok(FileDataArray { file, size, path })
    }
}

impl DataArray for FileDataArray {
    fn size(&self) -> u64 {
        self.size
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Error> {
        Ok(self.file.read_at(buf, offset)?)
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<usize, Error> {
        self.file.write_at(data, offset)?;
        Ok(data.len())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// An in-memory backing store, used for V2 "embedded cache data" meta files
/// and in tests.
pub struct MemoryDataArray {
    buf: Mutex<Vec<u8>>,
}

impl MemoryDataArray {
    pub fn new(size: u64) -> Self {
        MemoryDataArray {
            buf: Mutex::new(vec![0u8; size as usize]),
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        MemoryDataArray {
            buf: Mutex::new(data),
        }
    }
}

impl DataArray for MemoryDataArray {
    fn size(&self) -> u64 {
        self.buf.lock().unwrap().len() as u64
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Error> {
        let store = self.buf.lock().unwrap();
        let offset = offset as usize;
        if offset >= store.len() {
            return Ok(0);
        }
        let end = (offset + buf.len()).min(store.len());
        let n = end - offset;
        buf[..n].copy_from_slice(&store[offset..end]);
        Ok(n)
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<usize, Error> {
        let mut store = self.buf.lock().unwrap();
        let offset = offset as usize;
        let end = offset + data.len();
        if end > store.len() {
            store.resize(end, 0);
        }
        store[offset..end].copy_from_slice(data);
        Ok(data.len())
    }

    fn describe(&self) -> String {
        "<memory>".to_string()
    }
}

/// A bounded, offset-translated view into another `DataArray` — used to
/// carve the hash-node region and the tail (content) region out of one
/// backing meta file, mirroring the original's `DataArraySlice`.
pub struct SliceDataArray {
    backing: Arc<dyn DataArray>,
    start: u64,
    size: u64,
}

impl SliceDataArray {
    /// A slice running from `start` to the end of `backing`.
    pub fn to_end(backing: Arc<dyn DataArray>, start: u64) -> Self {
        let size = backing.size().saturating_sub(start);
        SliceDataArray {
            backing,
            start,
            size,
        }
    }

    pub fn bounded(backing: Arc<dyn DataArray>, start: u64, size: u64) -> Self {
        SliceDataArray {
            backing,
            start,
            size,
        }
    }
}

impl DataArray for SliceDataArray {
    fn size(&self) -> u64 {
        self.size
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, Error> {
        if offset >= self.size {
            return Ok(0);
        }
        let want = buf.len().min((self.size - offset) as usize);
        self.backing.read(self.start + offset, &mut buf[..want])
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<usize, Error> {
        if offset + data.len() as u64 > self.size {
            return Err(Error::OutOfBounds {
                offset,
                size: data.len(),
                len: self.size,
            });
        }
        self.backing.write(self.start + offset, data)
    }

    fn describe(&self) -> String {
        format!("{}[{}..{}]", self.backing.describe(), self.start, self.start + self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_array_grows_on_write_past_end() {
        let arr = MemoryDataArray::new(4);
        arr.write(2, &[1, 2, 3]).unwrap();
        assert_eq!(arr.size(), 5);
        let mut buf = [0u8; 5];
        arr.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0, 0, 1, 2, 3]);
    }

    #[test]
    fn slice_translates_offsets() {
        let backing = Arc::new(MemoryDataArray::new(10));
        backing.write(0, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();
        let slice = SliceDataArray::bounded(backing, 3, 4);
        let mut buf = [0u8; 4];
        slice.read(0, &mut buf).unwrap();
        assert_eq!(buf, [3, 4, 5, 6]);
    }
}

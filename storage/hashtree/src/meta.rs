use std::path::Path;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

use crate::data_array::{DataArray, FileDataArray, SliceDataArray};
use crate::error::Error;
use crate::sizing::{atoms_needed_for_content, size_needed_for_atoms};
use crate::store::HashStore;

const V1_FORMAT: u8 = 0x01;
const V2_CACHE: u8 = 0x02;
const V2_LINKED: u8 = 0x03;

const V1_HEADER_SIZE: usize = 1 + 4;
const V2_HEADER_SIZE: usize = 1 + 8 + 1;

/// Which on-disk meta-file layout a `.meta` file uses.
///
/// `V1` is the legacy fixed-64KiB-block layout with no tail. `V2Cache`
/// carries its content inline after the hash nodes; `V2Linked` instead
/// stores a relative path to the backing source file as its tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormatVersion {
    V1,
    V2Cache,
    V2Linked,
}

impl FileFormatVersion {
    fn byte(self) -> u8 {
        match self {
            FileFormatVersion::V1 => V1_FORMAT,
            FileFormatVersion::V2Cache => V2_CACHE,
            FileFormatVersion::V2Linked => V2_LINKED,
        }
    }
}

/// A fully-opened asset meta file: its hash tree plus whatever tail data
/// follows the hash nodes (embedded cache bytes, or nothing for V1).
pub struct AssetMeta {
    pub hash_store: HashStore,
    pub hash_levels_skipped: u8,
    pub atoms: u64,
    pub tail: Option<Arc<dyn DataArray>>,
}

pub fn open_v1(path: impl AsRef<Path>) -> Result<AssetMeta, Error> {
    let path = path.as_ref();
    let file: Arc<dyn DataArray> = Arc::new(FileDataArray::open(path)?);
    let size = file.size();
    if (size as usize) < V1_HEADER_SIZE {
        return Err(Error::HeaderTooShort {
            path: path.display().to_string(),
            size,
            header_size: V1_HEADER_SIZE,
        });
    }
    let mut hdr = [0u8; V1_HEADER_SIZE];
    read_exact(file.as_ref(), 0, &mut hdr)?;
    if hdr[0] != V1_FORMAT {
        return Err(Error::UnknownFormat(hdr[0], path.display().to_string()));
    }
    let atoms = BigEndian::read_u32(&hdr[1..5]) as u64;

    let hash_slice: Arc<dyn DataArray> =
        Arc::new(SliceDataArray::to_end(file.clone(), V1_HEADER_SIZE as u64));
    let hash_store = HashStore::new(hash_slice, 0)?;

    Ok(AssetMeta {
        hash_store,
        hash_levels_skipped: 0,
        atoms,
        tail: None,
    })
}

pub fn open_v2(path: impl AsRef<Path>) -> Result<AssetMeta, Error> {
    let path = path.as_ref();
    let file: Arc<dyn DataArray> = Arc::new(FileDataArray::open(path)?);
    let size = file.size();
    if (size as usize) < V2_HEADER_SIZE {
        return Err(Error::HeaderTooShort {
            path: path.display().to_string(),
            size,
            header_size: V2_HEADER_SIZE,
        });
    }
    let mut hdr = [0u8; V2_HEADER_SIZE];
    read_exact(file.as_ref(), 0, &mut hdr)?;
    if hdr[0] != V2_CACHE && hdr[0] != V2_LINKED {
        return Err(Error::UnknownFormat(hdr[0], path.display().to_string()));
    }
    let atoms = BigEndian::read_u64(&hdr[1..9]);
    let levels_skipped = hdr[9];

    let meta_size = size_needed_for_atoms(atoms, levels_skipped);
    let hash_slice: Arc<dyn DataArray> = Arc::new(SliceDataArray::bounded(
        file.clone(),
        V2_HEADER_SIZE as u64,
        meta_size,
    ));
    let hash_store = HashStore::new(hash_slice, levels_skipped)?;
    let tail: Arc<dyn DataArray> = Arc::new(SliceDataArray::to_end(
        file,
        V2_HEADER_SIZE as u64 + meta_size,
    ));

    Ok(AssetMeta {
        hash_store,
        hash_levels_skipped: levels_skipped,
        atoms,
        tail: Some(tail),
    })
}

pub fn create(
    path: impl AsRef<Path>,
    version: FileFormatVersion,
    data_size: u64,
    levels_skipped: u8,
    tail_size: u64,
) -> Result<AssetMeta, Error> {
    let path = path.as_ref();
    if !matches!(version, FileFormatVersion::V2Cache | FileFormatVersion::V2Linked) {
        return Err(Error::UnknownFormat(version.byte(), path.display().to_string()));
    }

    let atoms = atoms_needed_for_content(data_size);
    let hashes_size = size_needed_for_atoms(atoms, levels_skipped);
    let total = V2_HEADER_SIZE as u64 + hashes_size + tail_size;

    let file_array = FileDataArray::create(path, total)?;
    let mut hdr = [0u8; V2_HEADER_SIZE];
    hdr[0] = version.byte();
    BigEndian::write_u64(&mut hdr[1..9], atoms);
    hdr[9] = levels_skipped;
    let written = file_array.write(0, &hdr)?;
    if written != V2_HEADER_SIZE {
        return Err(Error::ShortWrite {
            expected: V2_HEADER_SIZE,
            got: written,
        });
    }

    let file: Arc<dyn DataArray> = Arc::new(file_array);
    let hash_slice: Arc<dyn DataArray> = Arc::new(SliceDataArray::bounded(
        file.clone(),
        V2_HEADER_SIZE as u64,
        hashes_size,
    ));
    let hash_store = HashStore::new(hash_slice, levels_skipped)?;
    let tail: Arc<dyn DataArray> =
        Arc::new(SliceDataArray::to_end(file, V2_HEADER_SIZE as u64 + hashes_size));
    debug_assert_eq!(tail.size(), tail_size);

    Ok(AssetMeta {
        hash_store,
        hash_levels_skipped: levels_skipped,
        atoms,
        tail: Some(tail),
    })
}

fn read_exact(storage: &dyn DataArray, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
    let n = storage.read(offset, buf)?;
    if n != buf.len() {
        return Err(Error::ShortRead {
            expected: buf.len(),
            got: n,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_reopen_v2_cache_round_trips_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("asset.meta");
        let meta = create(&path, FileFormatVersion::V2Cache, 200_000, 6, 200_000).unwrap();
        assert_eq!(meta.atoms, atoms_needed_for_content(200_000));
        drop(meta);

        let reopened = open_v2(&path).unwrap();
        assert_eq!(reopened.atoms, atoms_needed_for_content(200_000));
        assert_eq!(reopened.hash_levels_skipped, 6);
        assert_eq!(reopened.tail.unwrap().size(), 200_000);
    }
}

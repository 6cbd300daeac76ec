use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bithorded_hashtree::{leaf_digest, DataArray, HashStore, TigerId};
use bytes::Bytes;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::debug;

use crate::dispatch::Dispatcher;

use super::{Asset, Status, StatusChannel, StatusCode};

const MAX_CHUNK: usize = 64 * 1024;

/// A locally-stored asset backed by a hash tree: reads are clamped to what
/// the hash tree has already validated, and writes drive the tree's
/// background hashing via the shared [`Dispatcher`].
pub struct StoredAsset {
    id: String,
    data: Arc<dyn DataArray>,
    hash_store: Arc<HashStore>,
    dispatcher: Arc<Dispatcher>,
    status: StatusChannel,
}

impl StoredAsset {
    pub fn new(
        id: impl Into<String>,
        data: Arc<dyn DataArray>,
        hash_store: Arc<HashStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let asset = StoredAsset {
            id: id.into(),
            data,
            hash_store,
            dispatcher,
            status: StatusChannel::new(Status::default()),
        };
        asset.update_status();
        asset
    }

    pub fn has_root_hash(&self) -> bool {
        self.hash_store.has_root_hash().unwrap_or(false)
    }

    /// Recomputes the published status from the hash tree's current root.
    pub fn update_status(&self) {
        let size = self.data.size();
        let root_set = self.has_root_hash();
        let root_digest = if root_set {
            self.hash_store.root().ok().map(|n| n.get().digest)
        } else {
            None
        };
        self.status.update(|status| {
            status.size = Some(size);
            if let Some(digest) = root_digest {
                status.code = StatusCode::Success;
                status.ids = vec![TigerId::from_digest(digest)];
            }
        });
    }

    /// Notifies the asset that `[offset, offset+size)` is now available for
    /// hashing, rounding in to whole leaf blocks exactly like the original
    /// (the tail block is allowed to be short only if it's the asset's last
    /// block).
    pub async fn notify_valid_range(&self, offset: u64, size: u64) {
        let block_size = self.hash_store.leaf_block_size();
        let filesize = self.data.size();
        let mut start = round_up(offset, block_size);
        let mut end = offset + size;
        if end != filesize {
            end = round_down(end, block_size);
        }
        if start >= end {
            return;
        }

        let mut jobs = FuturesUnordered::new();
        while start < end {
            let this_block = block_size.min(end - start) as usize;
            let block_offset = start;
            let data = self.data.clone();
            let dispatcher = self.dispatcher.clone();
            jobs.push(async move {
                let digest = dispatcher
                    .submit(move || {
                        let mut buf = vec![0u8; this_block];
                        data.read(block_offset, &mut buf).expect("unexpected read error");
                        leaf_digest(&buf)
                    })
                    .await;
                (block_offset / block_size, digest)
            });
            start += this_block as u64;
        }

        while let Some((leaf_idx, digest)) = jobs.next().await {
            if let Err(err) = self.hash_store.set_leaf(leaf_idx, digest) {
                debug!(leaf_idx, %err, "failed to set leaf digest");
            }
        }

        self.update_status();
    }

    /// Writes freshly-received bytes into the backing store at `offset`,
    /// then hashes whatever whole blocks that completed. Used by
    /// [`crate::cache::CachingAsset`] to populate the cache as upstream
    /// reads come in.
    pub async fn write_and_notify(&self, offset: u64, bytes: &[u8]) -> crate::error::Result<()> {
        let data = self.data.clone();
        let buf = bytes.to_vec();
        let written = tokio::task::spawn_blocking(move || data.write(offset, &buf))
            .await
            .expect("write task panicked")?;
        self.notify_valid_range(offset, written as u64).await;
        Ok(())
    }
}

fn round_up(n: u64, block: u64) -> u64 {
    (n + block - 1) / block * block
}

fn round_down(n: u64, block: u64) -> u64 {
    n / block * block
}

#[async_trait]
impl Asset for StoredAsset {
    fn id(&self) -> &str {
        &self.id
    }

    fn size(&self) -> u64 {
        self.data.size()
    }

    fn can_read(&self, offset: u64, size: usize) -> usize {
        debug_assert!(size > 0);
        let size = size.min(MAX_CHUNK);
        let stop_offset = offset + size as u64;
        let last_byte_offset = stop_offset - 1;
        let block_size = self.hash_store.leaf_block_size();
        let first_block = offset / block_size;
        let last_block = last_byte_offset / block_size;

        let mut res = 0u64;
        let mut current = first_block;
        while current <= last_block && self.hash_store.is_block_set(current) {
            res += block_size;
            if current == first_block {
                res -= offset % block_size;
            }
            if current == last_block {
                let overflow = stop_offset % block_size;
                if overflow != 0 {
                    res -= block_size - overflow;
                }
            }
            current += 1;
        }
        res as usize
    }

    async fn async_read(&self, offset: u64, size: usize, _timeout: Duration) -> Option<Bytes> {
        let data_size = self.data.size();
        if offset >= data_size {
            return None;
        }
        let clamped = size.min(MAX_CHUNK).min((data_size - offset) as usize);
        let data = self.data.clone();
        let read = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; clamped];
            let n = data.read(offset, &mut buf).unwrap_or(0);
            buf.truncate(n);
            buf
        })
        .await
        .ok()?;
        if read.is_empty() {
            None
        } else {
            Some(Bytes::from(read))
        }
    }

    fn status(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bithorded_hashtree::{size_needed_for_atoms, atoms_needed_for_content, MemoryDataArray};

    fn new_stored_asset(content: &[u8], levels_skipped: u8) -> StoredAsset {
        let atoms = atoms_needed_for_content(content.len() as u64);
        let hash_size = size_needed_for_atoms(atoms, levels_skipped);
        let data: Arc<dyn DataArray> = Arc::new(MemoryDataArray::from_vec(content.to_vec()));
        let hash_storage: Arc<dyn DataArray> = Arc::new(MemoryDataArray::new(hash_size));
        let hash_store = Arc::new(HashStore::new(hash_storage, levels_skipped).unwrap());
        let dispatcher = Arc::new(Dispatcher::new(4));
        StoredAsset::new("test-asset", data, hash_store, dispatcher)
    }

    #[tokio::test]
    async fn hashing_then_reading_back_roundtrips() {
        let block_size = 65536usize;
        let content = vec![7u8; block_size * 2];
        let asset = new_stored_asset(&content, 6);
        assert!(!asset.has_root_hash());

        asset.notify_valid_range(0, content.len() as u64).await;
        assert!(asset.has_root_hash());
        assert_eq!(asset.can_read(0, block_size * 2), block_size * 2);

        let read = asset.async_read(0, 100, Duration::from_secs(1)).await.unwrap();
        assert_eq!(read.len(), 100);
        assert!(read.iter().all(|&b| b == 7));
    }

    #[tokio::test]
    async fn can_read_zero_until_block_is_hashed() {
        let block_size = 65536usize;
        let content = vec![9u8; block_size];
        let asset = new_stored_asset(&content, 6);
        assert_eq!(asset.can_read(0, block_size), 0);
        asset.notify_valid_range(0, content.len() as u64).await;
        assert_eq!(asset.can_read(0, block_size), block_size);
    }
}

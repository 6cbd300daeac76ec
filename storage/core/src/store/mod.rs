mod index;

pub use index::{AssetIndex, AssetIndexEntry, SCORE_ALPHA};

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bithorded_hashtree::TigerId;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::Result;

const ASSETS_DIR: &str = "assets";
const TIGER_DIR: &str = "tiger";
/// An asset whose used/allocated ratio falls below this is considered
/// not worth keeping around and is purged during reconciliation.
const MIN_FILL_PERCENT: u32 = 3;

/// An on-disk directory of content-addressed assets:
/// `<base>/assets/<rand20>/` holds the asset data, `<base>/tiger/<base32>`
/// symlinks to it. Mirrors `bithorded::store::AssetStore`.
pub struct AssetStore {
    base_folder: PathBuf,
    assets_folder: PathBuf,
    tiger_folder: PathBuf,
    index: AssetIndex,
}

impl AssetStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_folder = base_dir.into();
        AssetStore {
            assets_folder: base_folder.join(ASSETS_DIR),
            tiger_folder: base_folder.join(TIGER_DIR),
            base_folder,
            index: AssetIndex::new(),
        }
    }

    pub fn assets_folder(&self) -> &Path {
        &self.assets_folder
    }

    pub fn index(&self) -> &AssetIndex {
        &self.index
    }

    /// Creates `assets/` and `tiger/` if missing, canonicalizes all three
    /// paths, then reconciles the on-disk state into `self.index`.
    pub fn open_or_create(&mut self) -> Result<()> {
        if !self.assets_folder.exists() {
            fs::create_dir_all(&self.assets_folder)?;
        }
        if !self.tiger_folder.exists() {
            fs::create_dir_all(&self.tiger_folder)?;
        }
        self.base_folder = self.base_folder.canonicalize()?;
        self.assets_folder = self.assets_folder.canonicalize()?;
        self.tiger_folder = self.tiger_folder.canonicalize()?;
        self.load_index()?;
        Ok(())
    }

    /// Allocates a fresh, unused asset slot and registers it in the index
    /// with no tiger id yet (set later by [`AssetStore::update_asset`]).
    pub fn new_asset(&mut self) -> PathBuf {
        loop {
            let asset_id: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(20)
                .map(char::from)
                .collect();
            let asset_path = self.assets_folder.join(&asset_id);
            if !asset_path.exists() {
                self.index.add_asset(asset_id, None, 0, 0, now_secs());
                return asset_path;
            }
        }
    }

    /// Updates the index after an asset's identity (its tiger id) becomes
    /// known, relinking the `tiger/` symlink. Never overwrites a known
    /// tiger id with an empty one; re-links (remove, then create — the old
    /// target may no longer exist) if it changed.
    pub fn update_asset(&mut self, asset_id: &str, tiger_id: Option<TigerId>) -> Result<()> {
        let old_tiger = self.index.lookup_asset(asset_id);
        let tiger_id = tiger_id.or(old_tiger);

        if let (Some(old), Some(new)) = (old_tiger, tiger_id) {
            if old != new {
                warn!(asset_id, "asset relinked under a different tiger id");
                self.unlink(&self.tiger_folder.join(old.to_base32()));
            }
        }

        let asset_path = self.assets_folder.join(asset_id);
        let disk_usage = asset_disk_usage(&asset_path);
        let disk_allocation = asset_disk_allocated(&asset_path);
        self.index
            .add_asset(asset_id.to_string(), tiger_id, disk_usage, disk_allocation, now_secs());

        if let Some(tiger) = tiger_id {
            let link = self.tiger_folder.join(tiger.to_base32());
            if link.symlink_metadata().is_ok() {
                let _ = fs::remove_file(&link);
            }
            let target = self.assets_folder.join(asset_id);
            symlink(target, link)?;
        }
        Ok(())
    }

    pub fn remove_asset(&mut self, asset_id: &str) -> u64 {
        let tiger_id = self.index.remove_asset(asset_id);
        if let Some(tiger) = tiger_id {
            self.unlink(&self.tiger_folder.join(tiger.to_base32()));
        }
        remove_file_recursive(&self.assets_folder.join(asset_id))
    }

    fn unlink(&self, link_path: &Path) {
        if let Err(err) = fs::remove_file(link_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(?link_path, %err, "error removing asset link");
            }
        }
    }

    /// Walks `tiger/`, resolving each symlink and registering a
    /// sufficiently-full asset in the index (else purging it); then walks
    /// `assets/` and purges anything the index doesn't reference.
    fn load_index(&mut self) -> Result<()> {
        debug!(folder = ?self.tiger_folder, "starting scan");
        let mut size_cleared = 0u64;

        for entry in fs::read_dir(&self.tiger_folder)? {
            let entry = entry?;
            let tiger_link = entry.path();
            let target = match fs::read_link(&tiger_link) {
                Ok(t) => t,
                Err(_) => continue,
            };
            let asset_path = match self.tiger_folder.join(&target).canonicalize() {
                Ok(p) => p,
                Err(_) => {
                    warn!(?tiger_link, "dangling link");
                    self.unlink(&tiger_link);
                    continue;
                }
            };
            if !asset_path.starts_with(&self.assets_folder) {
                return Err(crate::error::BithordeError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("wild link in {tiger_link:?} pointing to {asset_path:?}"),
                )));
            }

            let used = asset_disk_usage(&asset_path);
            let allocated = asset_disk_allocated(&asset_path);
            let fill_percent = if allocated == 0 { 0 } else { (used * 100) / allocated };

            let asset_id = asset_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let tiger_name = tiger_link.file_name().and_then(|n| n.to_str()).unwrap_or_default();

            if fill_percent >= MIN_FILL_PERCENT as u64 {
                if let Ok(tiger_id) = tiger_name.parse::<TigerId>() {
                    self.index.add_asset(asset_id, Some(tiger_id), used, allocated, now_secs());
                }
            } else {
                debug!(tiger_name, "removing almost empty asset");
                self.unlink(&tiger_link);
                size_cleared += remove_file_recursive(&asset_path);
            }
        }

        debug!(folder = ?self.assets_folder, "starting scan");
        for entry in fs::read_dir(&self.assets_folder)? {
            let entry = entry?;
            let asset_path = entry.path();
            let asset_id = asset_path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if self.index.lookup_asset(asset_id).is_none() && self.index.get(asset_id).is_none() {
                info!(?asset_path, "found asset without referencing tigerId, removing");
                size_cleared += remove_file_recursive(&asset_path);
            }
        }

        info!(
            assets = self.index.asset_count(),
            used_mb = self.index.total_disk_usage() / 1_048_576,
            cleared_mb = size_cleared / 1_048_576,
            "scan finished"
        );
        Ok(())
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn asset_disk_usage(path: &Path) -> u64 {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(meta) if meta.is_dir() => fs::read_dir(path)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0),
        _ => 0,
    }
}

fn asset_disk_allocated(path: &Path) -> u64 {
    asset_disk_usage(path)
}

fn remove_file_recursive(path: &Path) -> u64 {
    let mut freed = 0u64;
    if let Ok(meta) = fs::symlink_metadata(path) {
        freed += meta.len();
        if meta.is_dir() {
            if let Ok(rd) = fs::read_dir(path) {
                for entry in rd.filter_map(|e| e.ok()) {
                    freed += remove_file_recursive(&entry.path());
                }
            }
            let _ = fs::remove_dir(path);
        } else {
            let _ = fs::remove_file(path);
        }
    }
    freed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_asset_allocates_unique_slot_in_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = AssetStore::new(dir.path());
        store.open_or_create().unwrap();
        let path = store.new_asset();
        assert!(path.starts_with(store.assets_folder()));
        assert_eq!(store.index().asset_count(), 1);
    }

    #[test]
    fn update_asset_creates_tiger_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = AssetStore::new(dir.path());
        store.open_or_create().unwrap();
        let path = store.new_asset();
        let asset_id = path.file_name().unwrap().to_str().unwrap().to_string();
        fs::write(&path, b"hello").unwrap();

        let tiger = TigerId::from_digest([3u8; 24]);
        store.update_asset(&asset_id, Some(tiger)).unwrap();

        let link = store.tiger_folder.join(tiger.to_base32());
        assert!(link.symlink_metadata().is_ok());
        assert_eq!(store.index().lookup_tiger(&tiger), Some(asset_id));
    }

    #[test]
    fn remove_asset_deletes_data_and_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = AssetStore::new(dir.path());
        store.open_or_create().unwrap();
        let path = store.new_asset();
        let asset_id = path.file_name().unwrap().to_str().unwrap().to_string();
        fs::write(&path, b"hello").unwrap();
        let tiger = TigerId::from_digest([5u8; 24]);
        store.update_asset(&asset_id, Some(tiger)).unwrap();

        store.remove_asset(&asset_id);
        assert!(!path.exists());
        assert!(store.tiger_folder.join(tiger.to_base32()).symlink_metadata().is_err());
    }
}

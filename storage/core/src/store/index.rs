use std::collections::HashMap;

use bithorded_hashtree::TigerId;

/// Exponential-decay smoothing factor for score updates on access:
/// `score += ALPHA * (now - score)`.
pub const SCORE_ALPHA: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct AssetIndexEntry {
    asset_id: String,
    tiger_id: Option<TigerId>,
    disk_usage: u64,
    disk_allocation: u64,
    score: f64,
}

impl AssetIndexEntry {
    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    pub fn tiger_id(&self) -> Option<TigerId> {
        self.tiger_id
    }

    pub fn disk_usage(&self) -> u64 {
        self.disk_usage
    }

    pub fn disk_allocation(&self) -> u64 {
        self.disk_allocation
    }

    pub fn fill_percent(&self) -> u32 {
        if self.disk_allocation == 0 {
            0
        } else {
            ((self.disk_usage * 100) / self.disk_allocation) as u32
        }
    }

    pub fn score(&self) -> f64 {
        self.score
    }
}

/// In-memory index of every on-disk asset, keyed both by opaque local asset
/// id and by its tiger id, with an LRU-like score used to pick eviction
/// victims. Reconciled from the filesystem at startup by `AssetStore`.
#[derive(Default)]
pub struct AssetIndex {
    assets: HashMap<String, AssetIndexEntry>,
    tiger_map: HashMap<TigerId, String>,
}

impl AssetIndex {
    pub fn new() -> Self {
        AssetIndex::default()
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    pub fn add_asset(
        &mut self,
        asset_id: impl Into<String>,
        tiger_id: Option<TigerId>,
        disk_usage: u64,
        disk_allocation: u64,
        score: f64,
    ) {
        let asset_id = asset_id.into();
        if let Some(old) = self.assets.get(&asset_id) {
            if let Some(old_tiger) = old.tiger_id {
                if Some(old_tiger) != tiger_id {
                    self.tiger_map.remove(&old_tiger);
                }
            }
        }
        if let Some(tiger) = tiger_id {
            self.tiger_map.insert(tiger, asset_id.clone());
        }
        self.assets.insert(
            asset_id.clone(),
            AssetIndexEntry {
                asset_id,
                tiger_id,
                disk_usage,
                disk_allocation,
                score,
            },
        );
    }

    /// Removes the asset, returning its tiger id (if any) so the caller can
    /// unlink the corresponding symlink.
    pub fn remove_asset(&mut self, asset_id: &str) -> Option<TigerId> {
        let entry = self.assets.remove(asset_id)?;
        if let Some(tiger) = entry.tiger_id {
            self.tiger_map.remove(&tiger);
        }
        entry.tiger_id
    }

    /// Updates an asset's measured disk usage and bumps its score towards
    /// `now` by [`SCORE_ALPHA`], returning the new score.
    pub fn touch(&mut self, asset_id: &str, disk_usage: u64, now: f64) -> Option<f64> {
        let entry = self.assets.get_mut(asset_id)?;
        entry.disk_usage = disk_usage;
        entry.score += SCORE_ALPHA * (now - entry.score);
        Some(entry.score)
    }

    pub fn total_disk_usage(&self) -> u64 {
        self.assets.values().map(|e| e.disk_usage).sum()
    }

    pub fn total_disk_allocation(&self) -> u64 {
        self.assets.values().map(|e| e.disk_allocation).sum()
    }

    pub fn lookup_tiger(&self, tiger_id: &TigerId) -> Option<String> {
        self.tiger_map.get(tiger_id).cloned()
    }

    pub fn lookup_asset(&self, asset_id: &str) -> Option<TigerId> {
        self.assets.get(asset_id).and_then(|e| e.tiger_id)
    }

    pub fn get(&self, asset_id: &str) -> Option<&AssetIndexEntry> {
        self.assets.get(asset_id)
    }

    /// The asset-id with the lowest score — the next eviction victim.
    pub fn pick_looser(&self) -> Option<String> {
        self.assets
            .values()
            .min_by(|a, b| a.score.partial_cmp(&b.score).unwrap())
            .map(|e| e.asset_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_looser_returns_lowest_score() {
        let mut index = AssetIndex::new();
        index.add_asset("a", None, 0, 0, 5.0);
        index.add_asset("b", None, 0, 0, 1.0);
        index.add_asset("c", None, 0, 0, 9.0);
        assert_eq!(index.pick_looser(), Some("b".to_string()));
    }

    #[test]
    fn remove_asset_clears_tiger_lookup() {
        let tiger = TigerId::from_digest([1u8; 24]);
        let mut index = AssetIndex::new();
        index.add_asset("a", Some(tiger), 10, 20, 0.0);
        assert_eq!(index.lookup_tiger(&tiger), Some("a".to_string()));
        let removed = index.remove_asset("a");
        assert_eq!(removed, Some(tiger));
        assert_eq!(index.lookup_tiger(&tiger), None);
    }

    #[test]
    fn touch_decays_score_towards_now() {
        let mut index = AssetIndex::new();
        index.add_asset("a", None, 0, 0, 0.0);
        let score = index.touch("a", 100, 10.0).unwrap();
        assert!((score - 2.0).abs() < 1e-9);
    }
}

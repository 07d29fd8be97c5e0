//! Template store: reference icons, training variants and a bounded cache of
//! resized copies

use super::types::{TemplateRecord, TrainingVariant};
use crate::catalog::{ItemCatalog, TrainingIndex};
use crate::error::{DetectError, DetectResult};
use crate::match_image::color::ColorCategory;
use image::RgbaImage;
use image::imageops::FilterType;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Cache key of one resized template: record, optional variant, target size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SizedKey {
    record: usize,
    variant: Option<usize>,
    width: u32,
    height: u32,
}

pub struct TemplateStore {
    records: Vec<TemplateRecord>,
    by_id: HashMap<String, usize>,
    color_index: HashMap<ColorCategory, Vec<usize>>,
    sized: Mutex<LruCache<SizedKey, Arc<RgbaImage>>>,
    evictions: AtomicU64,
}

impl TemplateStore {
    pub fn new(cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            records: Vec::new(),
            by_id: HashMap::new(),
            color_index: HashMap::new(),
            sized: Mutex::new(LruCache::new(capacity)),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn from_records(records: Vec<TemplateRecord>, cache_capacity: usize) -> Self {
        let mut store = Self::new(cache_capacity);
        for record in records {
            store.add(record);
        }
        store
    }

    /// Add a record, replacing an earlier one with the same item id.
    pub fn add(&mut self, record: TemplateRecord) {
        if let Some(&index) = self.by_id.get(&record.item.id) {
            self.records[index] = record;
            self.rebuild_color_index();
            self.clear_cache();
            return;
        }
        let index = self.records.len();
        self.by_id.insert(record.item.id.clone(), index);
        self.color_index
            .entry(record.profile.primary)
            .or_default()
            .push(index);
        self.records.push(record);
    }

    fn rebuild_color_index(&mut self) {
        self.color_index.clear();
        for (index, record) in self.records.iter().enumerate() {
            self.color_index
                .entry(record.profile.primary)
                .or_default()
                .push(index);
        }
    }

    /// Load one icon per catalog item from `icon_dir`, plus optional training variants.
    ///
    /// Unreadable icons are logged and skipped; only an empty result is an error.
    pub fn load_from_directory(
        catalog: &ItemCatalog,
        icon_dir: &Path,
        training: Option<(&TrainingIndex, &Path)>,
        cache_capacity: usize,
    ) -> DetectResult<Self> {
        let mut store = Self::new(cache_capacity);
        let mut failed = 0;

        for item in &catalog.items {
            let image = match load_icon(icon_dir, &item.icon_path) {
                Ok(image) => image,
                Err(e) => {
                    log::warn!("⚠️ Skipping template for {}: {}", item.id, e);
                    failed += 1;
                    continue;
                }
            };
            let mut record = TemplateRecord::new(item.clone(), image);

            if let Some((index, training_dir)) = training {
                for sample in index.samples_for(&item.id) {
                    match load_icon(training_dir, &sample.file) {
                        Ok(image) => {
                            record = record.with_variant(TrainingVariant::new(
                                image,
                                sample.validation_type.weight(),
                                &sample.provenance(),
                            ));
                        }
                        Err(e) => log::warn!("⚠️ Skipping training sample for {}: {}", item.id, e),
                    }
                }
            }
            log::debug!("✅ Loaded template {}", record.display_name());
            store.add(record);
        }

        if store.is_empty() {
            return Err(DetectError::NoTemplates {
                path: icon_dir.to_path_buf(),
            });
        }
        log::info!(
            "📁 Loaded {} templates from {:?} ({} failed)",
            store.len(),
            icon_dir,
            failed
        );
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[TemplateRecord] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&TemplateRecord> {
        self.records.get(index)
    }

    pub fn index_of(&self, item_id: &str) -> Option<usize> {
        self.by_id.get(item_id).copied()
    }

    /// Records whose colour bucket is `category` or one of its neighbours, in store order.
    pub fn candidates_for(&self, category: ColorCategory) -> Vec<usize> {
        let mut indices: Vec<usize> = std::iter::once(category)
            .chain(category.adjacent().iter().copied())
            .filter_map(|c| self.color_index.get(&c))
            .flatten()
            .copied()
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Evenly spaced sample of all records, used when no colour bucket matches.
    pub fn fallback_sample(&self, size: usize) -> Vec<usize> {
        let total = self.records.len();
        if size == 0 || total == 0 {
            return Vec::new();
        }
        if size >= total {
            return (0..total).collect();
        }
        let mut indices: Vec<usize> = (0..size).map(|i| i * total / size).collect();
        indices.dedup();
        indices
    }

    /// Template (or training variant) resized to `width`x`height`.
    ///
    /// Resized copies are cached; a poisoned cache lock only disables caching.
    pub fn sized(
        &self,
        record: usize,
        variant: Option<usize>,
        width: u32,
        height: u32,
    ) -> Option<Arc<RgbaImage>> {
        let rec = self.records.get(record)?;
        let source = match variant {
            Some(v) => &rec.variants.get(v)?.image,
            None => &rec.image,
        };
        if width == 0 || height == 0 {
            return None;
        }
        if source.dimensions() == (width, height) {
            return Some(Arc::clone(source));
        }

        let key = SizedKey {
            record,
            variant,
            width,
            height,
        };
        if let Ok(mut cache) = self.sized.lock()
            && let Some(hit) = cache.get(&key)
        {
            return Some(Arc::clone(hit));
        }

        let resized = Arc::new(image::imageops::resize(
            source.as_ref(),
            width,
            height,
            FilterType::Lanczos3,
        ));
        if let Ok(mut cache) = self.sized.lock()
            && let Some((evicted, _)) = cache.push(key, Arc::clone(&resized))
            && evicted != key
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Some(resized)
    }

    /// Pre-generate resized primaries for the given square sizes.
    pub fn warm_sizes(&self, sizes: &[u32]) {
        for index in 0..self.records.len() {
            for &size in sizes {
                let _ = self.sized(index, None, size, size);
            }
        }
    }

    pub fn cached_sizes(&self) -> usize {
        self.sized.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.sized.lock() {
            cache.clear();
        }
    }
}

fn load_icon(dir: &Path, file: &str) -> DetectResult<RgbaImage> {
    let direct = dir.join(file);
    // Catalog paths are often relative to the web root; retry with the bare file name
    let path = if direct.exists() {
        direct
    } else {
        match Path::new(file).file_name() {
            Some(name) => dir.join(name),
            None => direct,
        }
    };
    image::open(&path)
        .map(|image| image.to_rgba8())
        .map_err(|e| DetectError::TemplateLoad {
            path: path.clone(),
            description: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{GameItem, Rarity};
    use crate::test_utils::icon_art;
    use image::Rgba;

    fn record(id: &str, image: RgbaImage) -> TemplateRecord {
        TemplateRecord::new(GameItem::new(id, id, Rarity::Common, &format!("{id}.png")), image)
    }

    fn solid(rgb: [u8; 3]) -> RgbaImage {
        RgbaImage::from_fn(16, 16, |x, y| {
            let v = ((x + y) % 2) as u8 * 10;
            Rgba([rgb[0].saturating_add(v), rgb[1], rgb[2], 255])
        })
    }

    #[test]
    fn test_color_buckets_include_adjacent() {
        let store = TemplateStore::from_records(
            vec![
                record("red", solid([200, 30, 30])),
                record("blue", solid([30, 60, 210])),
                record("orange", solid([230, 130, 20])),
            ],
            8,
        );
        let red = store.candidates_for(ColorCategory::Red);
        assert_eq!(red, vec![0, 2]);
        assert_eq!(store.candidates_for(ColorCategory::Blue), vec![1]);
        assert!(store.candidates_for(ColorCategory::Yellow).contains(&2));
    }

    #[test]
    fn test_fallback_sample_is_spread() {
        let records = (0..10)
            .map(|i| record(&format!("item{i}"), icon_art(8, i)))
            .collect();
        let store = TemplateStore::from_records(records, 8);
        assert_eq!(store.fallback_sample(5), vec![0, 2, 4, 6, 8]);
        assert_eq!(store.fallback_sample(20).len(), 10);
        assert!(store.fallback_sample(0).is_empty());
    }

    #[test]
    fn test_sized_cache_evicts_least_recent() {
        let store = TemplateStore::from_records(vec![record("a", icon_art(20, 1))], 2);
        assert!(store.sized(0, None, 0, 10).is_none());
        let same = store.sized(0, None, 20, 20).unwrap();
        assert_eq!(same.dimensions(), (20, 20));
        assert_eq!(store.cached_sizes(), 0);

        store.sized(0, None, 40, 40).unwrap();
        store.sized(0, None, 48, 48).unwrap();
        store.sized(0, None, 40, 40).unwrap();
        assert_eq!(store.evictions(), 0);
        store.sized(0, None, 56, 56).unwrap();
        assert_eq!(store.evictions(), 1);
        assert_eq!(store.cached_sizes(), 2);

        store.clear_cache();
        assert_eq!(store.cached_sizes(), 0);
    }

    #[test]
    fn test_replacing_record_keeps_single_entry() {
        let mut store = TemplateStore::new(4);
        store.add(record("a", icon_art(8, 1)));
        store.add(record("a", icon_art(8, 2)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.index_of("a"), Some(0));
    }

    #[test]
    fn test_load_from_missing_directory_fails() {
        let catalog = ItemCatalog::new(vec![GameItem::new("x", "X", Rarity::Rare, "x.png")]);
        let dir = std::env::temp_dir().join("megabonk-vision-no-such-dir");
        let result = TemplateStore::load_from_directory(&catalog, &dir, None, 8);
        assert!(matches!(result, Err(DetectError::NoTemplates { .. })));
    }

    #[test]
    fn test_load_from_directory_with_training() {
        let dir = std::env::temp_dir()
            .join(format!("megabonk-vision-store-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        icon_art(24, 3).save(dir.join("beer.png")).unwrap();
        icon_art(24, 4).save(dir.join("beer_sample.png")).unwrap();

        let catalog = ItemCatalog::new(vec![
            GameItem::new("beer", "Beer", Rarity::Common, "images/items/beer.png"),
            GameItem::new("ghost", "Ghost", Rarity::Epic, "ghost.png"),
        ]);
        let training = TrainingIndex::from_json_str(
            r#"{"beer": [{"file": "beer_sample.png", "validationType": "corrected"}]}"#,
        )
        .unwrap();
        let store =
            TemplateStore::load_from_directory(&catalog, &dir, Some((&training, &dir)), 8).unwrap();
        assert_eq!(store.len(), 1);
        let beer = &store.records()[0];
        assert_eq!(beer.variants.len(), 1);
        assert_eq!(beer.variants[0].weight, 1.5);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

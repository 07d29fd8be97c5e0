/// Candidate matching for a single region of interest
///
/// Pre-filters empty and flat regions, narrows the candidate set by colour
/// bucket, then scores each surviving item against its primary template and
/// any weighted training variants.
use super::ranking::TemplateRanker;
use super::store::TemplateStore;
use super::types::MatchCandidate;
use crate::match_image::color::RegionStats;
use crate::match_image::config::DetectionConfig;
use crate::match_image::region::{Roi, crop_region};
use crate::match_image::similarity::{Prepared, compare_prepared, preprocess};
use image::RgbaImage;

/// Outcome of evaluating one region.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionVerdict {
    /// Region left the raster or had zero size
    OutOfBounds,
    /// Near-uniform region, most likely empty background
    Empty,
    /// Some texture, but too little to identify an icon
    LowVariance,
    /// Candidates were scored but none beat its threshold
    NoMatch,
    Match(MatchCandidate),
}

impl RegionVerdict {
    pub fn into_match(self) -> Option<MatchCandidate> {
        match self {
            RegionVerdict::Match(candidate) => Some(candidate),
            _ => None,
        }
    }
}

/// Template matcher bound to one store, ranking table and configuration
pub struct CandidateMatcher<'a> {
    store: &'a TemplateStore,
    ranking: Option<&'a TemplateRanker>,
    config: &'a DetectionConfig,
    #[cfg(feature = "parallel")]
    pool: Option<&'a rayon::ThreadPool>,
}

impl<'a> CandidateMatcher<'a> {
    pub fn new(
        store: &'a TemplateStore,
        ranking: Option<&'a TemplateRanker>,
        config: &'a DetectionConfig,
    ) -> Self {
        Self {
            store,
            ranking,
            config,
            #[cfg(feature = "parallel")]
            pool: None,
        }
    }

    /// Distribute candidate scoring over a worker pool.
    #[cfg(feature = "parallel")]
    pub fn with_pool(mut self, pool: Option<&'a rayon::ThreadPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Best item for `roi`, if any candidate beats its threshold.
    pub fn match_region(&self, raster: &RgbaImage, roi: &Roi) -> Option<MatchCandidate> {
        self.evaluate(raster, roi).into_match()
    }

    pub fn evaluate(&self, raster: &RgbaImage, roi: &Roi) -> RegionVerdict {
        let Some(region) = crop_region(raster, roi) else {
            return RegionVerdict::OutOfBounds;
        };
        self.evaluate_region(&region)
    }

    /// Evaluate an already cropped region.
    pub fn evaluate_region(&self, region: &RgbaImage) -> RegionVerdict {
        let stats = RegionStats::compute(region);
        if stats.pixel_count == 0 {
            return RegionVerdict::OutOfBounds;
        }
        if stats.is_uniform(self.config.matcher.empty_variance) {
            return RegionVerdict::Empty;
        }
        if stats.is_uniform(self.config.matcher.low_variance) {
            return RegionVerdict::LowVariance;
        }

        let mut candidates = self.store.candidates_for(stats.profile().primary);
        if candidates.is_empty() {
            candidates = self.store.fallback_sample(self.config.matcher.fallback_sample_size);
        }
        if candidates.is_empty() {
            return RegionVerdict::NoMatch;
        }

        let prepared = preprocess(region, &self.config.similarity);
        match self.best_of(region, &prepared, &candidates) {
            Some(candidate) => RegionVerdict::Match(candidate),
            None => RegionVerdict::NoMatch,
        }
    }

    #[cfg(feature = "parallel")]
    fn best_of(
        &self,
        region: &RgbaImage,
        prepared: &Prepared,
        candidates: &[usize],
    ) -> Option<MatchCandidate> {
        use rayon::prelude::*;

        let Some(pool) = self.pool else {
            return self.best_sequential(region, prepared, candidates.iter().copied().enumerate());
        };
        let workers = pool.current_num_threads().max(1);
        // Round-robin batches; the candidate position breaks ties so the
        // merged result equals the sequential one
        let batches: Vec<Vec<(usize, usize)>> = (0..workers)
            .map(|w| {
                candidates
                    .iter()
                    .copied()
                    .enumerate()
                    .skip(w)
                    .step_by(workers)
                    .collect()
            })
            .collect();
        let results: Vec<Option<(usize, MatchCandidate)>> = pool.install(|| {
            batches
                .par_iter()
                .map(|batch| self.best_with_position(region, prepared, batch.iter().copied()))
                .collect()
        });
        results
            .into_iter()
            .flatten()
            .fold(None, |best: Option<(usize, MatchCandidate)>, (pos, cand)| match best {
                Some((best_pos, best_cand))
                    if best_cand.confidence > cand.confidence
                        || (best_cand.confidence == cand.confidence && best_pos < pos) =>
                {
                    Some((best_pos, best_cand))
                }
                _ => Some((pos, cand)),
            })
            .map(|(_, cand)| cand)
    }

    #[cfg(not(feature = "parallel"))]
    fn best_of(
        &self,
        region: &RgbaImage,
        prepared: &Prepared,
        candidates: &[usize],
    ) -> Option<MatchCandidate> {
        self.best_sequential(region, prepared, candidates.iter().copied().enumerate())
    }

    fn best_sequential(
        &self,
        region: &RgbaImage,
        prepared: &Prepared,
        candidates: impl Iterator<Item = (usize, usize)>,
    ) -> Option<MatchCandidate> {
        self.best_with_position(region, prepared, candidates)
            .map(|(_, candidate)| candidate)
    }

    /// First-seen wins: later candidates must score strictly higher.
    fn best_with_position(
        &self,
        region: &RgbaImage,
        prepared: &Prepared,
        candidates: impl Iterator<Item = (usize, usize)>,
    ) -> Option<(usize, MatchCandidate)> {
        let mut best: Option<(usize, MatchCandidate)> = None;
        for (position, index) in candidates {
            let Some(candidate) = self.score_record(region, prepared, index) else {
                continue;
            };
            if candidate.confidence > candidate.threshold
                && best
                    .as_ref()
                    .is_none_or(|(_, b)| candidate.confidence > b.confidence)
            {
                best = Some((position, candidate));
            }
        }
        best
    }

    fn skipped(&self, template_id: &str) -> bool {
        self.ranking.is_some_and(|ranking| {
            ranking.should_skip(template_id) || ranking.below_min_success(template_id)
        })
    }

    fn similarity_to(
        &self,
        region: &RgbaImage,
        prepared: &Prepared,
        index: usize,
        variant: Option<usize>,
    ) -> Option<f32> {
        let template = self.store.sized(index, variant, region.width(), region.height())?;
        let template = preprocess(&template, &self.config.similarity);
        Some(compare_prepared(prepared, &template, &self.config.similarity).confidence)
    }

    /// Score one catalog item, voting across its training variants.
    ///
    /// Returns `None` when the item is skipped by ranking or has no usable template.
    fn score_record(
        &self,
        region: &RgbaImage,
        prepared: &Prepared,
        index: usize,
    ) -> Option<MatchCandidate> {
        let record = self.store.get(index)?;
        let matcher = &self.config.matcher;
        let primary_skipped = self.skipped(record.template_id());

        let primary = if primary_skipped {
            None
        } else {
            self.similarity_to(region, prepared, index, None)
        };

        let mut best_variant: Option<(usize, f32)> = None;
        let mut votes = 0usize;
        for (v, _) in record.variants.iter().enumerate() {
            if self.skipped(&record.variant_id(v)) {
                continue;
            }
            let Some(score) = self.similarity_to(region, prepared, index, Some(v)) else {
                continue;
            };
            if score > matcher.vote_threshold {
                votes += 1;
            }
            if best_variant.is_none_or(|(_, s)| score > s) {
                best_variant = Some((v, score));
            }
        }

        let (template_id, variant, similarity, score) = match (primary, best_variant) {
            (None, None) => return None,
            (Some(p), None) => (record.template_id().to_string(), None, p, p),
            (Some(p), Some((_, s))) if p >= s => {
                (record.template_id().to_string(), None, p, p * matcher.primary_bonus)
            }
            (_, Some((v, s))) => (
                record.variant_id(v),
                Some(v),
                s,
                s * record.variants[v].weight,
            ),
        };
        let vote_bonus = if record.variants.is_empty() {
            0.0
        } else {
            (votes as f32 * matcher.vote_bonus).min(matcher.max_vote_bonus)
        };

        let threshold = self
            .ranking
            .and_then(|ranking| ranking.optimal_threshold(&template_id))
            .unwrap_or(matcher.match_threshold);

        Some(MatchCandidate {
            item_id: record.item.id.clone(),
            item_name: record.item.name.clone(),
            rarity: record.item.rarity,
            template_id,
            confidence: self.config.clamp_confidence(score + vote_bonus),
            similarity,
            variant,
            votes,
            threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{GameItem, Rarity};
    use crate::match_image::config::RankingConfig;
    use crate::template_matching::types::{TemplateRecord, TrainingVariant};
    use crate::test_utils::{blank_scene, icon_art, paint_art};

    fn store_of(count: u32) -> TemplateStore {
        let records = (0..count)
            .map(|i| {
                let id = format!("item{i}");
                TemplateRecord::new(
                    GameItem::new(&id, &format!("Item {i}"), Rarity::Rare, &format!("{id}.png")),
                    icon_art(38, i),
                )
            })
            .collect();
        TemplateStore::from_records(records, 64)
    }

    #[test]
    fn test_exact_template_wins() {
        let store = store_of(5);
        let config = DetectionConfig::default();
        let matcher = CandidateMatcher::new(&store, None, &config);
        for i in 0..5 {
            let candidate = matcher.evaluate_region(&icon_art(38, i)).into_match().unwrap();
            assert_eq!(candidate.item_id, format!("item{i}"));
            assert!(candidate.confidence >= 0.9);
            assert_eq!(candidate.variant, None);
        }
    }

    #[test]
    fn test_empty_region_is_skipped() {
        let store = store_of(3);
        let config = DetectionConfig::default();
        let matcher = CandidateMatcher::new(&store, None, &config);
        let scene = blank_scene(100, 100);
        assert_eq!(
            matcher.evaluate(&scene, &Roi::new(10, 10, 38, 38)),
            RegionVerdict::Empty
        );
        assert_eq!(
            matcher.evaluate(&scene, &Roi::new(90, 90, 38, 38)),
            RegionVerdict::OutOfBounds
        );
    }

    #[test]
    fn test_skip_listed_template_is_not_matched() {
        let store = store_of(3);
        let config = DetectionConfig::default();
        let mut ranker = TemplateRanker::new(RankingConfig::default());
        for _ in 0..5 {
            ranker.record_outcome("item1", "item1", false, 0.5, None);
        }
        let matcher = CandidateMatcher::new(&store, Some(&ranker), &config);
        let verdict = matcher.evaluate_region(&icon_art(38, 1));
        if let RegionVerdict::Match(candidate) = verdict {
            assert_ne!(candidate.item_id, "item1");
        }
    }

    #[test]
    fn test_matches_inside_larger_raster() {
        let store = store_of(4);
        let config = DetectionConfig::default();
        let matcher = CandidateMatcher::new(&store, None, &config);
        let mut scene = blank_scene(200, 120);
        paint_art(&mut scene, 50, 40, &icon_art(38, 2));
        let candidate = matcher.match_region(&scene, &Roi::new(50, 40, 38, 38)).unwrap();
        assert_eq!(candidate.item_id, "item2");
    }

    #[test]
    fn test_corrected_variant_outvotes_stale_primary() {
        // Primary icon is stale art; a corrected training sample shows the real look
        let item = GameItem::new("beer", "Beer", Rarity::Common, "beer.png");
        let record = TemplateRecord::new(item, icon_art(38, 40))
            .with_variant(TrainingVariant::new(icon_art(38, 41), 1.5, "corrected"));
        let store = TemplateStore::from_records(vec![record], 16);
        let config = DetectionConfig::default();
        let matcher = CandidateMatcher::new(&store, None, &config);

        let candidate = matcher.evaluate_region(&icon_art(38, 41)).into_match().unwrap();
        assert_eq!(candidate.variant, Some(0));
        assert_eq!(candidate.template_id, "beer#v0");
        assert_eq!(candidate.votes, 1);
        assert!(candidate.confidence >= 0.95);
    }
}

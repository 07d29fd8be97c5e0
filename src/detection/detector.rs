//! Detection orchestrator
//!
//! Runs the full pipeline on one screenshot:
//! grid inference, grid-cell matching or sliding-window fallback, equipment
//! scan, non-max suppression, geometric verification, context boost, border
//! validation, stack-count reading, then caches and returns the result.
//!
//! One run at a time: a second `detect` while a run is active returns an empty
//! result instead of waiting.

use super::cache::ResultCache;
use super::calibration::{apply_context_boost, estimated_border_width, validate_borders};
use super::channels::report;
use super::geometry::verify_geometry;
use super::nms::non_max_suppression;
use super::types::{
    Detection, DetectionMethod, PipelineStage, ProgressEvent, ReviewRequest, RunStats,
};
use crate::error::{DetectError, DetectResult};
use crate::match_image::config::{DetectionConfig, SlidingWindowConfig};
use crate::match_image::grid::{GridParameters, border_anchored_cells, infer_grid};
use crate::match_image::region::{RegionManager, Roi, crop_region, raster_hash};
use crate::match_image::stack_count::{read_stack_count, stack_region};
use crate::template_matching::{
    CandidateMatcher, MatchCandidate, RegionVerdict, TemplateRanker, TemplateRanking,
    TemplateStore,
};
use image::RgbaImage;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Pixels trimmed from each side of a sliding window before matching.
fn window_inset(sliding: &SlidingWindowConfig, size: u32) -> u32 {
    match sliding.inset_ratio {
        Some(ratio) => (size as f32 * ratio).round() as u32,
        None => estimated_border_width(size),
    }
}

/// Clears the in-progress flag when a run ends, including on early return.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Output of one full scan, before caching.
struct ScanOutcome {
    detections: Vec<Detection>,
    used_grid: bool,
    regions_evaluated: u64,
}

pub struct ItemDetector {
    config: DetectionConfig,
    store: TemplateStore,
    ranking: RwLock<TemplateRanker>,
    cache: Mutex<ResultCache>,
    stats: Mutex<RunStats>,
    reviews: Mutex<VecDeque<ReviewRequest>>,
    running: AtomicBool,
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn detection_from(candidate: MatchCandidate, roi: Roi, method: DetectionMethod) -> Detection {
    Detection {
        item_id: candidate.item_id,
        item_name: candidate.item_name,
        rarity: Some(candidate.rarity),
        confidence: candidate.confidence,
        roi,
        method,
        template_id: Some(candidate.template_id),
        stack_count: None,
        stack_confidence: None,
    }
}

impl ItemDetector {
    pub fn new(store: TemplateStore, config: DetectionConfig) -> Self {
        let cache = ResultCache::new(
            config.cache.result_capacity,
            Duration::from_millis(config.cache.result_ttl_ms),
        );
        let ranking = TemplateRanker::new(config.ranking.clone());

        #[cfg(feature = "parallel")]
        let pool = if config.worker_count > 0 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(config.worker_count)
                .thread_name(|i| format!("megabonk-match-{i}"))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(e) => {
                    log::warn!("⚠️ Failed to start {} match workers: {}", config.worker_count, e);
                    None
                }
            }
        } else {
            None
        };

        // Interior sizes the sliding window will ask for
        let sliding = &config.sliding;
        let sizes: Vec<u32> = sliding
            .window_sizes
            .iter()
            .map(|&size| size.saturating_sub(2 * window_inset(sliding, size)))
            .filter(|&size| size > 0)
            .collect();
        store.warm_sizes(&sizes);

        log::info!(
            "🚀 Item detector ready with {} templates ({} resized copies cached)",
            store.len(),
            store.cached_sizes()
        );
        Self {
            config,
            store,
            ranking: RwLock::new(ranking),
            cache: Mutex::new(cache),
            stats: Mutex::new(RunStats::default()),
            reviews: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(false),
            #[cfg(feature = "parallel")]
            pool,
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn template_count(&self) -> usize {
        self.store.len()
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn matcher<'a>(&'a self, ranking: &'a TemplateRanker) -> CandidateMatcher<'a> {
        let matcher = CandidateMatcher::new(&self.store, Some(ranking), &self.config);
        #[cfg(feature = "parallel")]
        let matcher = matcher.with_pool(self.pool.as_ref());
        matcher
    }

    /// Detect every item icon in a decoded screenshot.
    ///
    /// Identical rasters are served from the result cache within its TTL.
    /// Safe to call from async code: inside a runtime, progress events that
    /// do not fit the channel are dropped rather than waited on.
    pub fn detect(
        &self,
        raster: &RgbaImage,
        progress: Option<&mpsc::Sender<ProgressEvent>>,
    ) -> DetectResult<Vec<Detection>> {
        if raster.width() == 0 || raster.height() == 0 {
            return Err(DetectError::EmptyRaster {
                width: raster.width(),
                height: raster.height(),
            });
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("⚠️ Detection already in progress, returning empty result");
            lock(&self.stats).rejected_concurrent += 1;
            return Ok(Vec::new());
        }
        let _guard = RunGuard(&self.running);
        let started = Instant::now();
        lock(&self.stats).runs += 1;

        let key = raster_hash(raster);
        if let Some(cached) = lock(&self.cache).get(key, started) {
            log::debug!("✅ Cache hit for raster {:016x}", key);
            lock(&self.stats).cache_hits += 1;
            report(progress, 100, PipelineStage::CacheReturn, "served from cache");
            return Ok(cached);
        }

        let outcome = self.scan(raster, progress)?;
        let detections = outcome.detections;
        lock(&self.cache).insert(key, detections.clone(), Instant::now());
        self.queue_reviews(&detections);

        let elapsed = started.elapsed();
        {
            let mut stats = lock(&self.stats);
            stats.scans += 1;
            if outcome.used_grid {
                stats.grid_runs += 1;
            } else {
                stats.sliding_runs += 1;
            }
            stats.regions_evaluated += outcome.regions_evaluated;
            stats.detections_emitted += detections.len() as u64;
            stats.last_run_ms = elapsed.as_millis() as u64;
        }
        log::info!(
            "✅ Detected {} items in {:.1}ms ({})",
            detections.len(),
            elapsed.as_secs_f64() * 1000.0,
            if outcome.used_grid { "grid" } else { "sliding window" }
        );
        report(
            progress,
            100,
            PipelineStage::CacheReturn,
            format!("{} items", detections.len()),
        );
        Ok(detections)
    }

    fn scan(
        &self,
        raster: &RgbaImage,
        progress: Option<&mpsc::Sender<ProgressEvent>>,
    ) -> DetectResult<ScanOutcome> {
        let ranking = self.ranking.read().map_err(|_| DetectError::StatePoisoned)?;
        let matcher = self.matcher(&ranking);
        let config = &self.config;
        let (width, height) = raster.dimensions();
        let regions = RegionManager::new(width, height);
        let mut evaluated = 0u64;

        report(progress, 5, PipelineStage::GridAttempt, "locating icon grid");
        let inference = infer_grid(raster, &config.grid);
        let grid = inference.grid.filter(|g| g.is_usable(&config.grid));

        let mut detections = match &grid {
            Some(grid) => {
                let summary = format!(
                    "{}x{} grid, confidence {:.2}",
                    grid.columns, grid.rows, grid.confidence
                );
                report(progress, 10, PipelineStage::GridMatch, summary);
                self.match_grid(raster, grid, &matcher, progress, &mut evaluated)
            }
            None => {
                let hotbar = config
                    .sliding
                    .hotbar_region
                    .clone()
                    .or_else(|| {
                        inference.band.map(|band| {
                            band.expanded(config.grid.band_expand_ratio, height).to_roi(width)
                        })
                    })
                    .unwrap_or_else(|| regions.resolve_region("hotbar"))
                    .clip_to(width, height);
                report(
                    progress,
                    10,
                    PipelineStage::SlidingWindow,
                    format!("no usable grid, scanning {}x{} region", hotbar.width, hotbar.height),
                );
                self.sliding_window(
                    raster,
                    &hotbar,
                    DetectionMethod::SlidingWindow,
                    &matcher,
                    &mut evaluated,
                )
            }
        };

        if config.sliding.scan_equipment {
            report(progress, 55, PipelineStage::EquipmentScan, "scanning equipment");
            let equipment = config
                .sliding
                .equipment_region
                .clone()
                .unwrap_or_else(|| regions.resolve_region("equipment"))
                .clip_to(width, height);
            detections.extend(self.sliding_window(
                raster,
                &equipment,
                DetectionMethod::EquipmentScan,
                &matcher,
                &mut evaluated,
            ));
        }
        drop(matcher);
        drop(ranking);

        report(progress, 65, PipelineStage::Nms, format!("{} raw detections", detections.len()));
        let detections = non_max_suppression(detections, config.geometry.nms_iou_threshold);

        report(progress, 70, PipelineStage::GeometricVerify, "checking row spacing");
        let mut detections = verify_geometry(detections, &config.geometry);

        if config.calibration.enable_context_boost {
            report(progress, 75, PipelineStage::ContextBoost, "applying context");
            apply_context_boost(&mut detections, &self.store, config);
        }

        let border_width = grid.as_ref().map(|g| g.border_width);
        if config.calibration.enable_border_validation {
            report(progress, 80, PipelineStage::BorderValidate, "validating borders");
            detections = validate_borders(raster, detections, border_width, config);
        }

        if config.stack.enabled {
            report(progress, 90, PipelineStage::StackAugment, "reading stack counts");
            self.augment_stacks(raster, &mut detections, border_width);
        }

        for detection in &mut detections {
            detection.confidence = config.clamp_confidence(detection.confidence);
        }
        Ok(ScanOutcome {
            detections,
            used_grid: grid.is_some(),
            regions_evaluated: evaluated,
        })
    }

    fn match_grid(
        &self,
        raster: &RgbaImage,
        grid: &GridParameters,
        matcher: &CandidateMatcher<'_>,
        progress: Option<&mpsc::Sender<ProgressEvent>>,
        evaluated: &mut u64,
    ) -> Vec<Detection> {
        let cells = grid.cells(raster.width(), raster.height());
        let total = cells.len().max(1);
        let mut detections = Vec::new();
        for (i, cell) in cells.into_iter().enumerate() {
            let Some(interior) = cell.inset(grid.border_width) else {
                continue;
            };
            *evaluated += 1;
            if let RegionVerdict::Match(candidate) = matcher.evaluate(raster, &interior) {
                log::debug!(
                    "🎯 {} -> {}",
                    cell.label.as_deref().unwrap_or("cell"),
                    candidate.summary()
                );
                detections.push(detection_from(candidate, cell, DetectionMethod::GridMatch));
            }
            report(
                progress,
                10 + (40 * (i + 1) / total) as u8,
                PipelineStage::GridMatch,
                format!("cell {}/{}", i + 1, total),
            );
        }
        detections
    }

    /// Scan `region` with square windows of every configured size and step.
    fn sliding_window(
        &self,
        raster: &RgbaImage,
        region: &Roi,
        method: DetectionMethod,
        matcher: &CandidateMatcher<'_>,
        evaluated: &mut u64,
    ) -> Vec<Detection> {
        let sliding = &self.config.sliding;
        let mut seen: HashSet<(u32, u32, u32)> = HashSet::new();
        let mut detections = Vec::new();
        let (width, height) = raster.dimensions();

        // Bordered cells give exact windows regardless of the configured sizes
        for (cell, border_width) in border_anchored_cells(raster, region, &self.config.grid) {
            if !cell.fits_within(width, height) || !seen.insert((cell.x, cell.y, cell.width)) {
                continue;
            }
            let Some(interior) = cell.inset(border_width) else {
                continue;
            };
            *evaluated += 1;
            if let RegionVerdict::Match(candidate) = matcher.evaluate(raster, &interior) {
                detections.push(detection_from(candidate, cell, method));
            }
        }

        for &size in &sliding.window_sizes {
            if size == 0 || size > region.width || size > region.height {
                continue;
            }
            let inset = window_inset(sliding, size);
            for &ratio in &sliding.step_ratios {
                let step = ((size as f32 * ratio).round() as u32).max(1) as usize;
                for y in (region.y..=region.y + region.height - size).step_by(step) {
                    for x in (region.x..=region.x + region.width - size).step_by(step) {
                        if !seen.insert((x, y, size)) {
                            continue;
                        }
                        let window = Roi::new(x, y, size, size);
                        let Some(interior) = window.inset(inset) else {
                            continue;
                        };
                        *evaluated += 1;
                        let verdict = matcher.evaluate(raster, &interior);
                        if let RegionVerdict::Match(candidate) = verdict {
                            detections.push(detection_from(candidate, window, method));
                        }
                    }
                }
            }
        }
        log::debug!(
            "🔍 {:?} over {}x{} at ({},{}): {} hits",
            method,
            region.width,
            region.height,
            region.x,
            region.y,
            detections.len()
        );
        detections
    }

    fn augment_stacks(
        &self,
        raster: &RgbaImage,
        detections: &mut [Detection],
        border_width: Option<u32>,
    ) {
        for detection in detections.iter_mut() {
            let width = border_width.unwrap_or_else(|| estimated_border_width(detection.roi.width));
            let Some(interior) = detection.roi.inset(width) else {
                continue;
            };
            let Some(region) = stack_region(&interior, &self.config.stack)
                .and_then(|roi| crop_region(raster, &roi))
            else {
                continue;
            };
            if let Some(reading) = read_stack_count(&region, &self.config.stack) {
                log::debug!(
                    "🔢 {} x{} (conf {:.2}{})",
                    detection.item_id,
                    reading.value,
                    reading.confidence,
                    if reading.snapped { ", snapped" } else { "" }
                );
                detection.stack_count = Some(reading.value);
                detection.stack_confidence = Some(reading.confidence);
            }
        }
    }

    fn queue_reviews(&self, detections: &[Detection]) {
        let capacity = self.config.review_queue_capacity;
        if capacity == 0 {
            return;
        }
        let mut reviews = lock(&self.reviews);
        for detection in detections {
            let Some(rarity) = detection.rarity else {
                continue;
            };
            let threshold = rarity.review_threshold();
            if detection.confidence < threshold {
                if reviews.len() >= capacity {
                    reviews.pop_front();
                }
                reviews.push_back(ReviewRequest {
                    detection: detection.clone(),
                    threshold,
                });
            }
        }
    }

    /// Match a single caller-chosen region, bypassing grid inference and the cache.
    ///
    /// An empty or out-of-raster region, or one that matches nothing, yields a
    /// detection with method [`DetectionMethod::None`].
    pub fn detect_region(&self, raster: &RgbaImage, roi: &Roi) -> DetectResult<Detection> {
        let floor = self.config.min_confidence();
        if raster.width() == 0 || raster.height() == 0 || !roi.is_valid() {
            return Ok(Detection::none(roi.clone(), floor));
        }
        if roi.x >= raster.width() || roi.y >= raster.height() {
            return Ok(Detection::none(roi.clone(), floor));
        }
        let clipped = roi.clip_to(raster.width(), raster.height());
        let ranking = self.ranking.read().map_err(|_| DetectError::StatePoisoned)?;
        let matcher = self.matcher(&ranking);
        let interior = clipped
            .inset(estimated_border_width(clipped.width.min(clipped.height)))
            .unwrap_or_else(|| clipped.clone());
        Ok(match matcher.evaluate(raster, &interior) {
            RegionVerdict::Match(candidate) => {
                let mut detection = detection_from(candidate, clipped, DetectionMethod::Manual);
                detection.confidence = self.config.clamp_confidence(detection.confidence);
                detection
            }
            _ => Detection::none(clipped, floor),
        })
    }

    /// Decode an encoded screenshot under a timeout, then run [`ItemDetector::detect`]
    /// on a blocking task.
    pub async fn detect_encoded(
        self: &Arc<Self>,
        bytes: Vec<u8>,
        decode_timeout: Duration,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> DetectResult<Vec<Detection>> {
        let decode = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&bytes).map(|image| image.to_rgba8())
        });
        let raster = match tokio::time::timeout(decode_timeout, decode).await {
            Ok(joined) => joined??,
            Err(_) => {
                log::error!("❌ Screenshot decode exceeded {:?}", decode_timeout);
                return Err(DetectError::DecodeTimeout {
                    duration: decode_timeout,
                });
            }
        };
        log::debug!("📷 Decoded {}x{} screenshot", raster.width(), raster.height());

        let detector = Arc::clone(self);
        tokio::task::spawn_blocking(move || detector.detect(&raster, progress.as_ref())).await?
    }

    /// Feed one reviewed outcome back into template ranking.
    pub fn record_outcome(
        &self,
        template_id: &str,
        item_id: &str,
        success: bool,
        confidence: f32,
        confused_with: Option<&str>,
    ) -> DetectResult<()> {
        self.ranking
            .write()
            .map_err(|_| DetectError::StatePoisoned)?
            .record_outcome(template_id, item_id, success, confidence, confused_with);
        lock(&self.stats).outcomes_recorded += 1;
        Ok(())
    }

    pub fn rankings(&self) -> Vec<TemplateRanking> {
        self.ranking
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .rankings()
    }

    pub fn skip_list(&self) -> Vec<String> {
        self.ranking
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .skip_list()
    }

    pub fn stats(&self) -> RunStats {
        let mut stats = lock(&self.stats).clone();
        stats.result_cache_evictions = lock(&self.cache).evictions();
        stats.template_cache_evictions = self.store.evictions();
        stats
    }

    pub fn pending_reviews(&self) -> Vec<ReviewRequest> {
        lock(&self.reviews).iter().cloned().collect()
    }

    pub fn drain_reviews(&self) -> Vec<ReviewRequest> {
        lock(&self.reviews).drain(..).collect()
    }

    /// Drop expired result-cache entries.
    pub fn sweep_caches(&self) -> usize {
        lock(&self.cache).sweep(Instant::now())
    }

    pub fn clear_caches(&self) {
        lock(&self.cache).clear();
        self.store.clear_cache();
        log::info!("🧹 Cleared result and template caches");
    }
}

/// Periodically sweep expired cache entries. Must be called inside a tokio runtime.
pub fn spawn_cache_sweeper(detector: Arc<ItemDetector>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        loop {
            interval.tick().await;
            let removed = detector.sweep_caches();
            if removed > 0 {
                log::debug!("🧹 Swept {} expired cache entries", removed);
            }
        }
    })
}

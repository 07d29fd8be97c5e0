//! End-to-end tests for the detection pipeline on synthetic screenshots

use crate::catalog::{GameItem, Rarity};
use crate::detection::{
    DetectionMethod, ItemDetector, PipelineStage, create_progress_channel, verify_geometry,
};
use crate::error::DetectError;
use crate::match_image::config::{DetectionConfig, GeometryConfig};
use crate::match_image::region::Roi;
use crate::template_matching::{TemplateRecord, TemplateStore};
use crate::test_utils::{blank_scene, icon_art, paint_art, paint_cell, rarity_rgb};
use image::RgbaImage;
use std::sync::Arc;
use std::time::Duration;

const HOTBAR_RARITIES: [Rarity; 5] = [
    Rarity::Common,
    Rarity::Uncommon,
    Rarity::Rare,
    Rarity::Epic,
    Rarity::Legendary,
];

/// One template per hotbar slot, item `i` drawn with `icon_art(38, i)`.
fn hotbar_store() -> TemplateStore {
    let records = HOTBAR_RARITIES
        .iter()
        .enumerate()
        .map(|(i, rarity)| {
            let id = format!("item{i}");
            TemplateRecord::new(
                GameItem::new(&id, &format!("Item {i}"), *rarity, &format!("{id}.png")),
                icon_art(38, i as u32),
            )
        })
        .collect();
    TemplateStore::from_records(records, 128)
}

/// Five bordered cells at x = 60 + 48i, y = 220; `borders[i]` picks the painted rarity.
fn hotbar_scene_with(borders: [Rarity; 5]) -> RgbaImage {
    let mut scene = blank_scene(400, 300);
    for (i, rarity) in borders.iter().enumerate() {
        paint_cell(
            &mut scene,
            60 + 48 * i as u32,
            220,
            3,
            rarity_rgb(*rarity),
            &icon_art(38, i as u32),
        );
    }
    scene
}

fn hotbar_scene() -> RgbaImage {
    hotbar_scene_with(HOTBAR_RARITIES)
}

/// Only the listed hotbar slots hold an icon; slot `i` shows item `i`.
fn hotbar_scene_slots(slots: &[u32]) -> RgbaImage {
    let mut scene = blank_scene(400, 300);
    for &slot in slots {
        paint_cell(
            &mut scene,
            60 + 48 * slot,
            220,
            3,
            rarity_rgb(HOTBAR_RARITIES[slot as usize]),
            &icon_art(38, slot),
        );
    }
    scene
}

/// `(item_id, roi.x, method)` per detection, left to right.
type Hit = (String, u32, DetectionMethod);

fn sorted_hits(detector: &ItemDetector, scene: &RgbaImage) -> Vec<Hit> {
    let mut detections = detector.detect(scene, None).unwrap();
    detections.sort_by_key(|d| d.roi.x);
    detections
        .into_iter()
        .map(|d| {
            assert_eq!((d.roi.y, d.roi.width, d.roi.height), (220, 44, 44), "{d:?}");
            assert!(d.confidence >= 0.9, "{d:?}");
            (d.item_id, d.roi.x, d.method)
        })
        .collect()
}

fn expected_hits(slots: &[u32], method: DetectionMethod) -> Vec<Hit> {
    slots
        .iter()
        .map(|&slot| (format!("item{slot}"), 60 + 48 * slot, method))
        .collect()
}

#[test]
fn test_hotbar_grid_detects_every_slot() {
    let detector = ItemDetector::new(hotbar_store(), DetectionConfig::default());
    let mut detections = detector.detect(&hotbar_scene(), None).unwrap();
    detections.sort_by_key(|d| d.roi.x);

    assert_eq!(detections.len(), 5);
    for (i, detection) in detections.iter().enumerate() {
        assert_eq!(detection.item_id, format!("item{i}"));
        assert_eq!(detection.rarity, Some(HOTBAR_RARITIES[i]));
        assert_eq!(detection.method, DetectionMethod::GridMatch);
        assert_eq!(detection.roi.x, 60 + 48 * i as u32);
        assert_eq!(detection.roi.y, 220);
        assert_eq!((detection.roi.width, detection.roi.height), (44, 44));
        assert!(detection.confidence >= 0.9, "{detection:?}");
        assert!(detection.confidence <= 0.99);
        assert_eq!(detection.stack_count, None);
    }

    // Four sliding-window interior sizes pre-generated for five templates
    assert_eq!(detector.store().cached_sizes(), 20);

    let stats = detector.stats();
    assert_eq!(stats.scans, 1);
    assert_eq!(stats.grid_runs, 1);
    assert_eq!(stats.sliding_runs, 0);
    assert_eq!(stats.detections_emitted, 5);
    assert!(detector.pending_reviews().is_empty());
}

#[test]
fn test_misaligned_detection_is_removed() {
    let input: Vec<_> = (0..5u32)
        .map(|i| {
            let roi = Roi::new(60 + 48 * i, 220, 44, 44);
            let mut detection = crate::detection::Detection::none(roi, 0.8);
            detection.item_id = format!("item{i}");
            detection.method = DetectionMethod::GridMatch;
            detection
        })
        .collect();
    let mut shifted = input.clone();
    shifted[2].roi.x += 19;

    let output = verify_geometry(shifted, &GeometryConfig::default());
    let ids: Vec<&str> = output.iter().map(|d| d.item_id.as_str()).collect();
    assert_eq!(ids, vec!["item0", "item1", "item3", "item4"]);
}

#[test]
fn test_shifted_icon_dropped_from_hotbar() {
    // Slot 2 drawn 19px right of its grid position, partly under slot 3
    let mut scene = blank_scene(400, 300);
    for (i, rarity) in HOTBAR_RARITIES.iter().enumerate() {
        let shift = if i == 2 { 19 } else { 0 };
        paint_cell(
            &mut scene,
            60 + 48 * i as u32 + shift,
            220,
            3,
            rarity_rgb(*rarity),
            &icon_art(38, i as u32),
        );
    }
    let detector = ItemDetector::new(hotbar_store(), DetectionConfig::default());

    assert_eq!(
        sorted_hits(&detector, &scene),
        expected_hits(&[0, 1, 3, 4], DetectionMethod::GridMatch)
    );
    assert_eq!(detector.stats().grid_runs, 1);
}

#[test]
fn test_hotbar_with_empty_slots() {
    for slots in [&[0, 1, 3, 4][..], &[0, 2, 4][..]] {
        let detector = ItemDetector::new(hotbar_store(), DetectionConfig::default());
        assert_eq!(
            sorted_hits(&detector, &hotbar_scene_slots(slots)),
            expected_hits(slots, DetectionMethod::GridMatch),
            "slots {slots:?}"
        );
    }
}

#[test]
fn test_two_icons_fall_back_to_bordered_windows() {
    let detector = ItemDetector::new(hotbar_store(), DetectionConfig::default());
    assert_eq!(
        sorted_hits(&detector, &hotbar_scene_slots(&[0, 1])),
        expected_hits(&[0, 1], DetectionMethod::SlidingWindow)
    );
    assert_eq!(detector.stats().sliding_runs, 1);
}

#[test]
fn test_sliding_window_finds_bordered_icons() {
    let mut config = DetectionConfig::default();
    config.grid.min_columns = 99;
    let detector = ItemDetector::new(hotbar_store(), config);
    assert_eq!(
        sorted_hits(&detector, &hotbar_scene()),
        expected_hits(&[0, 1, 2, 3, 4], DetectionMethod::SlidingWindow)
    );
    let stats = detector.stats();
    assert_eq!(stats.grid_runs, 0);
    assert_eq!(stats.sliding_runs, 1);
}

#[test]
fn test_sliding_window_without_borders() {
    let mut scene = blank_scene(300, 320);
    for i in 0..3u32 {
        paint_art(&mut scene, 20 + 38 * i, 250, &icon_art(38, i));
    }
    let mut config = DetectionConfig::default();
    config.sliding.hotbar_region = Some(Roi::labeled(20, 250, 114, 38, "hotbar"));
    config.sliding.window_sizes = vec![38];
    config.sliding.step_ratios = vec![0.5];
    config.sliding.inset_ratio = Some(0.0);
    config.sliding.scan_equipment = false;
    let detector = ItemDetector::new(hotbar_store(), config);

    let mut detections = detector.detect(&scene, None).unwrap();
    detections.sort_by_key(|d| d.roi.x);
    let ids: Vec<&str> = detections.iter().map(|d| d.item_id.as_str()).collect();
    assert_eq!(ids, vec!["item0", "item1", "item2"]);
    for detection in &detections {
        assert_eq!(detection.method, DetectionMethod::SlidingWindow);
        assert_eq!((detection.roi.width, detection.roi.height), (38, 38));
        assert!(detection.confidence >= 0.9);
    }
    assert_eq!(detector.stats().sliding_runs, 1);
}

#[test]
fn test_border_mismatch_strict_and_lenient() {
    // Legendary item drawn inside a common border
    let mut borders = HOTBAR_RARITIES;
    borders[4] = Rarity::Common;
    let scene = hotbar_scene_with(borders);

    let mut strict = DetectionConfig::default();
    strict.calibration.strict_border = true;
    let detector = ItemDetector::new(hotbar_store(), strict);
    let detections = detector.detect(&scene, None).unwrap();
    assert_eq!(detections.len(), 4);
    assert!(detections.iter().all(|d| d.item_id != "item4"));

    let detector = ItemDetector::new(hotbar_store(), DetectionConfig::default());
    let detections = detector.detect(&scene, None).unwrap();
    assert_eq!(detections.len(), 5);
    let legendary = detections.iter().find(|d| d.item_id == "item4").unwrap();
    assert!(legendary.confidence > 0.5);
    assert!(legendary.confidence < Rarity::Legendary.review_threshold());

    // Lowered below its tier's review threshold, so it waits for review
    let reviews = detector.drain_reviews();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].detection.item_id, "item4");
    assert_eq!(reviews[0].threshold, Rarity::Legendary.review_threshold());
    assert!(detector.pending_reviews().is_empty());
}

#[test]
fn test_concurrent_detect_returns_empty() {
    let detector = Arc::new(ItemDetector::new(hotbar_store(), DetectionConfig::default()));
    let scene = hotbar_scene();
    // Nobody drains the receiver, so the first run blocks on its second progress event
    let (tx, rx) = create_progress_channel(1);

    let worker = {
        let detector = Arc::clone(&detector);
        let scene = scene.clone();
        std::thread::spawn(move || detector.detect(&scene, Some(&tx)))
    };
    for _ in 0..5000 {
        if detector.is_running() {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(detector.is_running());

    let second = detector.detect(&scene, None).unwrap();
    assert!(second.is_empty());
    assert_eq!(detector.stats().rejected_concurrent, 1);

    drop(rx);
    let first = worker.join().unwrap().unwrap();
    assert_eq!(first.len(), 5);
    assert!(!detector.is_running());
}

#[test]
fn test_progress_reaches_completion() {
    let detector = ItemDetector::new(hotbar_store(), DetectionConfig::default());
    let (tx, mut rx) = create_progress_channel(64);
    detector.detect(&hotbar_scene(), Some(&tx)).unwrap();
    drop(tx);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(!events.is_empty());
    assert_eq!(events[0].stage, PipelineStage::GridAttempt);
    assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
    let last = events.last().unwrap();
    assert_eq!(last.percent, 100);
    assert_eq!(last.stage, PipelineStage::CacheReturn);
}

#[tokio::test]
async fn test_detect_inside_runtime_with_full_progress_channel() {
    let detector = ItemDetector::new(hotbar_store(), DetectionConfig::default());
    let (tx, mut rx) = create_progress_channel(2);
    let detections = detector.detect(&hotbar_scene(), Some(&tx)).unwrap();
    assert_eq!(detections.len(), 5);
    drop(tx);

    assert_eq!(rx.recv().await.unwrap().stage, PipelineStage::GridAttempt);
    assert_eq!(rx.recv().await.unwrap().stage, PipelineStage::GridMatch);
    assert!(rx.recv().await.is_none());
}

#[test]
fn test_identical_raster_is_served_from_cache() {
    let detector = ItemDetector::new(hotbar_store(), DetectionConfig::default());
    let scene = hotbar_scene();
    let first = detector.detect(&scene, None).unwrap();
    let second = detector.detect(&scene, None).unwrap();
    assert_eq!(first, second);

    let stats = detector.stats();
    assert_eq!(stats.runs, 2);
    assert_eq!(stats.scans, 1);
    assert_eq!(stats.cache_hits, 1);
}

#[test]
fn test_cache_entry_expires() {
    let mut config = DetectionConfig::default();
    config.cache.result_ttl_ms = 50;
    let detector = ItemDetector::new(hotbar_store(), config);
    let scene = hotbar_scene();

    detector.detect(&scene, None).unwrap();
    std::thread::sleep(Duration::from_millis(80));
    detector.detect(&scene, None).unwrap();
    assert_eq!(detector.stats().scans, 2);
    assert_eq!(detector.stats().cache_hits, 0);
}

#[test]
fn test_cache_capacity_evicts_oldest() {
    let mut config = DetectionConfig::default();
    config.cache.result_capacity = 1;
    let detector = ItemDetector::new(hotbar_store(), config);
    let a = hotbar_scene();
    let b = blank_scene(400, 300);

    detector.detect(&a, None).unwrap();
    detector.detect(&b, None).unwrap();
    detector.detect(&a, None).unwrap();
    let stats = detector.stats();
    assert_eq!(stats.scans, 3);
    assert!(stats.result_cache_evictions >= 1);
}

#[test]
fn test_clear_caches_forces_rescan() {
    let detector = ItemDetector::new(hotbar_store(), DetectionConfig::default());
    let scene = hotbar_scene();
    detector.detect(&scene, None).unwrap();
    detector.clear_caches();
    detector.detect(&scene, None).unwrap();
    assert_eq!(detector.stats().scans, 2);
}

#[test]
fn test_empty_raster_is_an_error() {
    let detector = ItemDetector::new(hotbar_store(), DetectionConfig::default());
    let err = detector.detect(&RgbaImage::new(0, 0), None).unwrap_err();
    assert!(matches!(err, DetectError::EmptyRaster { .. }));
    assert!(err.is_input_error());
}

#[test]
fn test_detect_region_manual_and_none() {
    let detector = ItemDetector::new(hotbar_store(), DetectionConfig::default());
    let scene = hotbar_scene();

    let detection = detector
        .detect_region(&scene, &Roi::new(60 + 48 * 2, 220, 44, 44))
        .unwrap();
    assert_eq!(detection.item_id, "item2");
    assert_eq!(detection.method, DetectionMethod::Manual);

    let empty = detector.detect_region(&scene, &Roi::new(10, 10, 44, 44)).unwrap();
    assert!(empty.is_none());
    assert_eq!(empty.confidence, detector.config().min_confidence());

    let outside = detector.detect_region(&scene, &Roi::new(900, 900, 44, 44)).unwrap();
    assert!(outside.is_none());
    let zero = detector.detect_region(&scene, &Roi::new(10, 10, 0, 0)).unwrap();
    assert!(zero.is_none());
}

#[test]
fn test_recorded_failures_skip_template() {
    let detector = ItemDetector::new(hotbar_store(), DetectionConfig::default());
    for _ in 0..5 {
        detector.record_outcome("item1", "item1", false, 0.5, None).unwrap();
    }
    assert_eq!(detector.skip_list(), vec!["item1".to_string()]);
    assert_eq!(detector.stats().outcomes_recorded, 5);

    let detections = detector.detect(&hotbar_scene(), None).unwrap();
    assert!(detections.iter().all(|d| d.item_id != "item1"));
    assert!(detector.rankings().iter().any(|r| r.template_id == "item1" && r.should_skip));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_detect_encoded_png() {
    let detector = Arc::new(ItemDetector::new(hotbar_store(), DetectionConfig::default()));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(hotbar_scene())
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();

    let detections = detector
        .detect_encoded(bytes, Duration::from_secs(10), None)
        .await
        .unwrap();
    assert_eq!(detections.len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_detect_encoded_rejects_garbage() {
    let detector = Arc::new(ItemDetector::new(hotbar_store(), DetectionConfig::default()));
    let err = detector
        .detect_encoded(b"definitely not an image".to_vec(), Duration::from_secs(10), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DetectError::Decode { .. }));
    assert!(err.is_input_error());
    assert_eq!(detector.stats().runs, 0);
}

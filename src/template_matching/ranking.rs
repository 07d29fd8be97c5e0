//! Template ranking and feedback loop
//!
//! Every reviewed match outcome updates per-template counters. Templates that
//! keep failing (or keep being confused with other items) land on a skip-list
//! that the candidate matcher consults before scoring.

use crate::match_image::config::RankingConfig;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Accumulated outcome counters for one template.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplatePerformance {
    pub item_id: String,
    pub usage_count: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub avg_confidence: f32,
    /// Item id -> number of times this template matched it by mistake
    pub confusion: HashMap<String, u32>,
    pub optimal_threshold: f32,
    pub last_updated: Instant,
}

impl TemplatePerformance {
    fn new(item_id: &str, now: Instant) -> Self {
        Self {
            item_id: item_id.to_string(),
            usage_count: 0,
            success_count: 0,
            failure_count: 0,
            avg_confidence: 0.0,
            confusion: HashMap::new(),
            optimal_threshold: 0.4,
            last_updated: now,
        }
    }

    pub fn success_rate(&self) -> f32 {
        if self.usage_count == 0 {
            0.0
        } else {
            self.success_count as f32 / self.usage_count as f32
        }
    }

    pub fn confusion_ratio(&self) -> f32 {
        if self.usage_count == 0 {
            return 0.0;
        }
        self.confusion.values().sum::<u32>() as f32 / self.usage_count as f32
    }
}

/// Derived, read-only view of a template's standing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRanking {
    pub template_id: String,
    pub item_id: String,
    pub success_rate: f32,
    pub rank_score: f32,
    pub should_skip: bool,
    pub threshold: f32,
}

pub struct TemplateRanker {
    config: RankingConfig,
    performance: HashMap<String, TemplatePerformance>,
    skip_list: HashSet<String>,
    cached: Option<(Instant, Vec<TemplateRanking>)>,
}

impl TemplateRanker {
    pub fn new(config: RankingConfig) -> Self {
        Self {
            config,
            performance: HashMap::new(),
            skip_list: HashSet::new(),
            cached: None,
        }
    }

    /// Record one reviewed outcome for `template_id`.
    pub fn record_outcome(
        &mut self,
        template_id: &str,
        item_id: &str,
        success: bool,
        confidence: f32,
        confused_with: Option<&str>,
    ) {
        self.record_outcome_at(
            template_id,
            item_id,
            success,
            confidence,
            confused_with,
            Instant::now(),
        );
    }

    pub fn record_outcome_at(
        &mut self,
        template_id: &str,
        item_id: &str,
        success: bool,
        confidence: f32,
        confused_with: Option<&str>,
        now: Instant,
    ) {
        let perf = self
            .performance
            .entry(template_id.to_string())
            .or_insert_with(|| TemplatePerformance::new(item_id, now));

        perf.usage_count += 1;
        if success {
            perf.success_count += 1;
        } else {
            perf.failure_count += 1;
        }
        let n = perf.usage_count as f32;
        perf.avg_confidence += (confidence.clamp(0.0, 1.0) - perf.avg_confidence) / n;
        if let Some(other) = confused_with
            && other != item_id
        {
            *perf.confusion.entry(other.to_string()).or_insert(0) += 1;
        }
        perf.optimal_threshold = (0.4 + (1.0 - perf.success_rate()) * 0.3).clamp(0.35, 0.7);
        perf.last_updated = now;

        let skip = perf.usage_count >= self.config.min_usage_count
            && (perf.success_rate() < self.config.skip_threshold
                || perf.confusion_ratio() > self.config.confusion_skip_ratio);
        if skip {
            if self.skip_list.insert(template_id.to_string()) {
                log::warn!(
                    "⚠️ Template {} added to skip-list ({:.0}% success over {} uses)",
                    template_id,
                    perf.success_rate() * 100.0,
                    perf.usage_count
                );
            }
        } else if self.skip_list.remove(template_id) {
            log::info!("✅ Template {} recovered, removed from skip-list", template_id);
        }
    }

    pub fn should_skip(&self, template_id: &str) -> bool {
        self.skip_list.contains(template_id)
    }

    /// True when a template has enough history and falls below the minimum success rate.
    pub fn below_min_success(&self, template_id: &str) -> bool {
        self.performance.get(template_id).is_some_and(|perf| {
            perf.usage_count >= self.config.min_usage_count
                && perf.success_rate() < self.config.min_success_rate
        })
    }

    /// Per-template threshold, available once the template has enough history.
    pub fn optimal_threshold(&self, template_id: &str) -> Option<f32> {
        self.performance
            .get(template_id)
            .filter(|perf| perf.usage_count >= self.config.min_usage_count)
            .map(|perf| perf.optimal_threshold)
    }

    pub fn performance(&self, template_id: &str) -> Option<&TemplatePerformance> {
        self.performance.get(template_id)
    }

    pub fn skip_list(&self) -> Vec<String> {
        let mut list: Vec<String> = self.skip_list.iter().cloned().collect();
        list.sort();
        list
    }

    pub fn rankings(&mut self) -> Vec<TemplateRanking> {
        self.rankings_at(Instant::now())
    }

    /// Rankings sorted best first, recomputed at most once per cache TTL.
    pub fn rankings_at(&mut self, now: Instant) -> Vec<TemplateRanking> {
        let ttl = Duration::from_millis(self.config.cache_ttl_ms);
        if let Some((computed_at, rankings)) = &self.cached
            && now.saturating_duration_since(*computed_at) < ttl
        {
            return rankings.clone();
        }

        let half_life = self.config.decay_half_life_secs.max(1) as f32;
        let mut rankings: Vec<TemplateRanking> = self
            .performance
            .iter()
            .map(|(template_id, perf)| {
                let age = now.saturating_duration_since(perf.last_updated).as_secs_f32();
                let decay = 0.5f32.powf(age / half_life);
                let success_rate = perf.success_rate();
                TemplateRanking {
                    template_id: template_id.clone(),
                    item_id: perf.item_id.clone(),
                    success_rate,
                    rank_score: (0.7 * success_rate + 0.3 * perf.avg_confidence) * decay,
                    should_skip: self.skip_list.contains(template_id),
                    threshold: perf.optimal_threshold,
                }
            })
            .collect();
        rankings.sort_by(|a, b| {
            b.rank_score
                .partial_cmp(&a.rank_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.template_id.cmp(&b.template_id))
        });
        self.cached = Some((now, rankings.clone()));
        rankings
    }

    pub fn reset(&mut self) {
        self.performance.clear();
        self.skip_list.clear();
        self.cached = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranker() -> TemplateRanker {
        TemplateRanker::new(RankingConfig::default())
    }

    #[test]
    fn test_skip_after_min_usage_only() {
        let mut ranker = ranker();
        for _ in 0..4 {
            ranker.record_outcome("beer", "beer", false, 0.5, None);
        }
        assert!(!ranker.should_skip("beer"));
        ranker.record_outcome("beer", "beer", false, 0.5, None);
        assert!(ranker.should_skip("beer"));
        assert_eq!(ranker.skip_list(), vec!["beer".to_string()]);
    }

    #[test]
    fn test_recovery_happens_on_threshold_crossing() {
        let mut ranker = ranker();
        for _ in 0..5 {
            ranker.record_outcome("beer", "beer", false, 0.5, None);
        }
        // 1/6 and 2/7 are still below the 0.30 skip threshold
        ranker.record_outcome("beer", "beer", true, 0.9, None);
        assert!(ranker.should_skip("beer"));
        ranker.record_outcome("beer", "beer", true, 0.9, None);
        assert!(ranker.should_skip("beer"));
        // 3/8 crosses it
        ranker.record_outcome("beer", "beer", true, 0.9, None);
        assert!(!ranker.should_skip("beer"));
    }

    #[test]
    fn test_confusion_triggers_skip() {
        let mut ranker = ranker();
        for i in 0..6 {
            let confused = if i < 4 { Some("wrench") } else { None };
            ranker.record_outcome("beer", "beer", true, 0.8, confused);
        }
        let perf = ranker.performance("beer").unwrap();
        assert_eq!(perf.confusion.get("wrench"), Some(&4));
        assert!(ranker.should_skip("beer"));
    }

    #[test]
    fn test_optimal_threshold_formula() {
        let mut ranker = ranker();
        for i in 0..10 {
            ranker.record_outcome("beer", "beer", i < 5, 0.6, None);
        }
        let threshold = ranker.optimal_threshold("beer").unwrap();
        assert!((threshold - 0.55).abs() < 1e-6);
        assert!(!ranker.below_min_success("beer"));

        for _ in 0..4 {
            ranker.record_outcome("clover", "clover", false, 0.4, None);
        }
        assert_eq!(ranker.optimal_threshold("clover"), None);
        ranker.record_outcome("clover", "clover", false, 0.4, None);
        assert_eq!(ranker.optimal_threshold("clover"), Some(0.7));
        assert!(ranker.below_min_success("clover"));
    }

    #[test]
    fn test_rankings_are_cached_and_decay() {
        let mut ranker = ranker();
        let t0 = Instant::now();
        ranker.record_outcome_at("old", "old", true, 0.9, None, t0);
        ranker.record_outcome_at("fresh", "fresh", true, 0.9, None, t0);

        let first = ranker.rankings_at(t0);
        assert_eq!(first.len(), 2);
        assert!((first[0].rank_score - 0.97).abs() < 1e-4);

        // Within the TTL new outcomes are not reflected yet
        ranker.record_outcome_at("third", "third", true, 0.9, None, t0);
        assert_eq!(ranker.rankings_at(t0 + Duration::from_secs(1)).len(), 2);

        let week = Duration::from_secs(7 * 24 * 3600);
        ranker.record_outcome_at("fresh", "fresh", true, 0.9, None, t0 + week);
        let later = ranker.rankings_at(t0 + week);
        assert_eq!(later.len(), 3);
        assert_eq!(later[0].template_id, "fresh");
        let old = later.iter().find(|r| r.template_id == "old").unwrap();
        assert!((old.rank_score - 0.485).abs() < 1e-3);
    }
}

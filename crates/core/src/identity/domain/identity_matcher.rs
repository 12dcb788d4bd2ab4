//! Adaptive multi-view embedding comparison.
//!
//! The acceptance threshold loosens as more enrollment views are available.
//! With three or more views two extra rules can accept a face that beats no
//! single view: consistently moderate distances across all views, or enough
//! views that are reasonably close.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::detection::infrastructure::math::{euclidean_distance, mean, std_dev};
use crate::identity::domain::identity_error::IdentityError;
use crate::identity::domain::reference_set::ReferenceEmbeddingSet;
use crate::shared::config::IdentityConfig;

/// Number of views from which the multi-view rules and per-view
/// diagnostics apply.
const MULTI_VIEW: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    SingleView,
    ConsistentViews,
    MajorityClose,
    None,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatchResult {
    pub verified: bool,
    /// Minimum distance over all views, whichever rule fired.
    pub best_distance: f64,
    pub best_view: String,
    pub threshold: f64,
    pub rule: MatchRule,
    /// Reported only with three or more views.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_view_distances: Option<BTreeMap<String, f64>>,
}

pub struct IdentityMatcher {
    config: IdentityConfig,
}

impl IdentityMatcher {
    pub fn new(config: IdentityConfig) -> Self {
        Self { config }
    }

    pub fn threshold_for(&self, view_count: usize) -> f64 {
        match view_count {
            n if n >= MULTI_VIEW => self.config.threshold_three_views,
            2 => self.config.threshold_two_views,
            _ => self.config.threshold_one_view,
        }
    }

    pub fn compare(
        &self,
        references: &ReferenceEmbeddingSet,
        live: &[f32],
    ) -> Result<MatchResult, IdentityError> {
        let mut distances = BTreeMap::new();
        for (view, embedding) in references.iter() {
            let distance =
                euclidean_distance(embedding, live).ok_or_else(|| IdentityError::DimensionMismatch {
                    view: view.to_string(),
                    expected: embedding.len(),
                    actual: live.len(),
                })?;
            distances.insert(view.to_string(), distance);
        }
        self.decide(distances)
    }

    /// Applies the acceptance rules to precomputed per-view distances.
    pub fn decide(&self, distances: BTreeMap<String, f64>) -> Result<MatchResult, IdentityError> {
        let (best_view, best_distance) = distances
            .iter()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(v, d)| (v.clone(), *d))
            .ok_or_else(|| IdentityError::NoReferenceData(String::new()))?;

        let threshold = self.threshold_for(distances.len());
        let values: Vec<f64> = distances.values().copied().collect();
        let multi_view = values.len() >= MULTI_VIEW;

        let rule = if values.iter().any(|d| *d < threshold) {
            MatchRule::SingleView
        } else if multi_view
            && mean(&values) < self.config.consistent_mean_max
            && std_dev(&values) < self.config.consistent_std_max
        {
            MatchRule::ConsistentViews
        } else if multi_view
            && values
                .iter()
                .filter(|d| **d < self.config.close_view_distance)
                .count()
                >= self.config.close_views_required
        {
            MatchRule::MajorityClose
        } else {
            MatchRule::None
        };

        Ok(MatchResult {
            verified: rule != MatchRule::None,
            best_distance,
            best_view,
            threshold,
            rule,
            per_view_distances: multi_view.then_some(distances),
        })
    }
}

impl Default for IdentityMatcher {
    fn default() -> Self {
        Self::new(IdentityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    const VIEWS: [&str; 3] = ["front", "left", "right"];

    /// One-dimensional references so each view's distance to a zero live
    /// embedding equals its value.
    fn references(distances: &[f32]) -> ReferenceEmbeddingSet {
        distances
            .iter()
            .zip(VIEWS)
            .map(|(d, view)| (view.to_string(), vec![*d]))
            .collect()
    }

    fn compare(distances: &[f32]) -> MatchResult {
        IdentityMatcher::default()
            .compare(&references(distances), &[0.0])
            .unwrap()
    }

    // ── Thresholds ───────────────────────────────────────────────────

    #[rstest]
    #[case(1, 0.75)]
    #[case(2, 0.78)]
    #[case(3, 0.82)]
    #[case(5, 0.82)]
    fn test_threshold_by_view_count(#[case] views: usize, #[case] expected: f64) {
        assert_relative_eq!(IdentityMatcher::default().threshold_for(views), expected);
    }

    // ── Rules ────────────────────────────────────────────────────────

    #[test]
    fn test_single_close_view_verifies() {
        let result = compare(&[0.70, 0.95, 0.93]);
        assert!(result.verified);
        assert_eq!(result.rule, MatchRule::SingleView);
        assert_eq!(result.best_view, "front");
        assert_relative_eq!(result.best_distance, 0.70, epsilon = 1e-6);
    }

    #[test]
    fn test_consistent_views_verify_without_single_match() {
        let result = compare(&[0.85, 0.86, 0.87]);
        assert!(result.verified);
        assert_eq!(result.rule, MatchRule::ConsistentViews);
        assert_relative_eq!(result.best_distance, 0.85, epsilon = 1e-6);
    }

    #[test]
    fn test_two_close_views_verify() {
        // Mean 0.9 fails the consistency rule, two views below 0.90 pass
        let result = compare(&[0.84, 0.89, 0.97]);
        assert!(result.verified);
        assert_eq!(result.rule, MatchRule::MajorityClose);
    }

    #[test]
    fn test_far_views_reject() {
        let result = compare(&[1.1, 1.2, 0.89]);
        assert!(!result.verified);
        assert_eq!(result.rule, MatchRule::None);
        assert_relative_eq!(result.best_distance, 0.89, epsilon = 1e-6);
    }

    #[test]
    fn test_multi_view_rules_need_three_views() {
        // Would pass both multi-view rules, but only two views and none
        // under 0.78
        let result = compare(&[0.85, 0.86]);
        assert!(!result.verified);
        assert!(result.per_view_distances.is_none());
    }

    #[rstest]
    #[case::under(0.74, true)]
    #[case::at_threshold(0.75, false)]
    fn test_single_view_threshold_is_strict(#[case] distance: f32, #[case] verified: bool) {
        assert_eq!(compare(&[distance]).verified, verified);
    }

    // ── Diagnostics ──────────────────────────────────────────────────

    #[test]
    fn test_per_view_distances_reported_with_three_views() {
        let distances = compare(&[0.70, 0.95, 0.93]).per_view_distances.unwrap();
        assert_eq!(distances.len(), 3);
        assert_relative_eq!(distances["left"], 0.95, epsilon = 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let result = IdentityMatcher::default().compare(&references(&[0.5]), &[0.0, 0.0]);
        assert!(matches!(result, Err(IdentityError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_empty_references_is_no_data() {
        let result = IdentityMatcher::default().compare(&ReferenceEmbeddingSet::new(), &[0.0]);
        assert!(matches!(result, Err(IdentityError::NoReferenceData(_))));
    }
}

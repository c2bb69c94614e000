use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::context::{self, InfluenceContext};
use crate::engine::ethics::{self, EthicalLimits};
use crate::engine::history::HistoryStore;
use crate::engine::scoring;
use crate::engine::strategy::{Intensity, StrategyRegistry, Technique};
use crate::engine::tracker::UsageTracker;

#[derive(Debug, Clone, Serialize)]
pub struct SelectedTechnique {
    pub technique: Technique,
    pub intensity: Intensity,
    pub confidence: f64,
}

/// Score every executable (technique, intensity) pair and keep the best.
///
/// Composite score: 50 base, +30 for context fit, up to +20 from the
/// counterpart's historical average for the technique, up to +20 from the
/// ethical score. Ties go to the earliest registered pair; returning None
/// just means "no action", not an error.
pub fn select(
    registry: &StrategyRegistry,
    tracker: &UsageTracker,
    limits: &EthicalLimits,
    history: &HistoryStore,
    context: &InfluenceContext,
    now: DateTime<Utc>,
) -> Option<SelectedTechnique> {
    let profile = history.profile(&context.actor, &context.counterpart);
    let hourly_total = tracker.hourly_total(&context.actor, now);

    let mut best: Option<SelectedTechnique> = None;

    for strategy in registry.iter() {
        for intensity in Intensity::ALL {
            let verdict = ethics::check(limits, strategy.technique, intensity, hourly_total);
            if !verdict.allowed {
                continue;
            }

            let readiness = tracker.readiness(
                &context.actor,
                strategy.technique,
                strategy.constraints.cooldown_minutes,
                now,
            );
            if !readiness.ready {
                continue;
            }

            if tracker.hourly_usage(&context.actor, strategy.technique, now)
                >= strategy.constraints.max_uses_per_hour
            {
                continue;
            }

            let validity = context::validate(strategy, context);
            if !validity.valid {
                continue;
            }

            // Context fit is established by the gate above, so every scored
            // pair carries the +30 term.
            let mut score = 50.0 + 30.0;
            if let Some(rating) = profile
                .as_ref()
                .and_then(|p| p.technique_ratings.get(&strategy.technique))
            {
                score += rating.average_effectiveness / 100.0 * 20.0;
            }
            score += scoring::ethical_score(strategy.technique, intensity) / 100.0 * 20.0;

            let better = best
                .as_ref()
                .map(|b| score > b.confidence * 100.0)
                .unwrap_or(true);
            if better {
                best = Some(SelectedTechnique {
                    technique: strategy.technique,
                    intensity,
                    confidence: score / 100.0,
                });
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::EmotionalState;

    fn parts() -> (StrategyRegistry, UsageTracker, HistoryStore) {
        (StrategyRegistry::builtin(), UsageTracker::new(), HistoryStore::new())
    }

    #[test]
    fn test_single_eligible_pair_confidence_formula() {
        let (registry, tracker, history) = parts();
        // Only validation clears a level-0 context, and capping intensity at
        // subtle leaves exactly one eligible pair.
        let limits = EthicalLimits {
            max_intensity: Some(Intensity::Subtle),
            ..Default::default()
        };
        let context = InfluenceContext::new("ai", "user")
            .with_level(0)
            .with_state(EmotionalState::Neutral);

        let selected =
            select(&registry, &tracker, &limits, &history, &context, Utc::now()).unwrap();

        assert_eq!(selected.technique, Technique::Validation);
        assert_eq!(selected.intensity, Intensity::Subtle);
        // 50 base + 30 context + 0 history + 100/100*20 ethical
        assert!((selected.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_no_eligible_pair_returns_none() {
        let (registry, tracker, history) = parts();
        let limits = EthicalLimits { hourly_cap: 0, ..Default::default() };
        let context = InfluenceContext::new("ai", "user");

        assert!(select(&registry, &tracker, &limits, &history, &context, Utc::now()).is_none());
    }

    #[test]
    fn test_prefers_historically_effective_technique() {
        let (registry, tracker, history) = parts();
        let limits = EthicalLimits::default();
        let context = InfluenceContext::new("ai", "user")
            .with_level(20)
            .with_state(EmotionalState::Neutral);

        let baseline =
            select(&registry, &tracker, &limits, &history, &context, Utc::now()).unwrap();
        assert_eq!(baseline.technique, Technique::Validation);

        // A strong history on mirroring outweighs validation's ethical edge:
        // mirroring 50+30+20+18 = 118 vs validation 50+30+0+20 = 100.
        for _ in 0..4 {
            history.record(&crate::engine::result::ExecutionResult {
                id: uuid::Uuid::new_v4().to_string(),
                actor: "ai".to_string(),
                counterpart: "user".to_string(),
                success: true,
                technique: Technique::Mirroring,
                intensity: Intensity::Moderate,
                phase: Default::default(),
                message: String::new(),
                effectiveness: 100.0,
                ethical_score: 80.0,
                side_effects: vec![],
                next_recommended: None,
                executed_at: Utc::now(),
            });
        }

        let selected =
            select(&registry, &tracker, &limits, &history, &context, Utc::now()).unwrap();
        assert_eq!(selected.technique, Technique::Mirroring);
    }

    #[test]
    fn test_cooldown_removes_pair_from_consideration() {
        let (registry, tracker, history) = parts();
        let limits = EthicalLimits {
            max_intensity: Some(Intensity::Subtle),
            ..Default::default()
        };
        let context = InfluenceContext::new("ai", "user");
        let now = Utc::now();

        tracker.register_use("ai", Technique::Validation, now);

        // Validation is cooling down and nothing else clears level 0
        assert!(select(&registry, &tracker, &limits, &history, &context, now).is_none());
    }
}

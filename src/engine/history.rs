use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::engine::result::ExecutionResult;
use crate::engine::strategy::Technique;

/// Effectiveness above which a technique counts as having succeeded, and
/// below which the counterpart counts as having resisted it.
const SUCCESS_THRESHOLD: f64 = 70.0;
const RESISTED_THRESHOLD: f64 = 30.0;

/// A technique is marked immune after this many attempts averaging below
/// the immunity threshold.
const IMMUNITY_MIN_ATTEMPTS: u32 = 3;
const IMMUNITY_THRESHOLD: f64 = 20.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechniqueRating {
    /// Running weighted mean; never recomputed from raw history.
    pub average_effectiveness: f64,
    pub attempts: u32,
    pub last_used: DateTime<Utc>,
}

/// Susceptibility profile for one actor-counterpart pair. Created lazily on
/// first execution, mutated after every one, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub actor: String,
    pub counterpart: String,
    /// Mean of all per-technique rating averages.
    pub susceptibility: f64,
    pub vulnerabilities: HashSet<String>,
    pub successful_techniques: Vec<Technique>,
    pub resisted_techniques: Vec<Technique>,
    pub technique_ratings: HashMap<Technique, TechniqueRating>,
    pub immune_techniques: HashSet<Technique>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(actor: impl Into<String>, counterpart: impl Into<String>) -> Self {
        UserProfile {
            actor: actor.into(),
            counterpart: counterpart.into(),
            susceptibility: 0.0,
            vulnerabilities: HashSet::new(),
            successful_techniques: Vec::new(),
            resisted_techniques: Vec::new(),
            technique_ratings: HashMap::new(),
            immune_techniques: HashSet::new(),
            updated_at: Utc::now(),
        }
    }

    fn absorb(&mut self, technique: Technique, effectiveness: f64, at: DateTime<Utc>) {
        let rating = self
            .technique_ratings
            .entry(technique)
            .or_insert(TechniqueRating {
                average_effectiveness: 0.0,
                attempts: 0,
                last_used: at,
            });

        let old_total = rating.average_effectiveness * f64::from(rating.attempts);
        rating.attempts += 1;
        rating.average_effectiveness = (old_total + effectiveness) / f64::from(rating.attempts);
        rating.last_used = at;

        if effectiveness > SUCCESS_THRESHOLD && !self.successful_techniques.contains(&technique) {
            self.successful_techniques.push(technique);
        }
        if effectiveness < RESISTED_THRESHOLD && !self.resisted_techniques.contains(&technique) {
            self.resisted_techniques.push(technique);
        }

        let rating = &self.technique_ratings[&technique];
        if rating.attempts >= IMMUNITY_MIN_ATTEMPTS
            && rating.average_effectiveness < IMMUNITY_THRESHOLD
        {
            self.immune_techniques.insert(technique);
        }

        self.susceptibility = self.mean_rating();
        self.updated_at = at;
    }

    fn mean_rating(&self) -> f64 {
        if self.technique_ratings.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .technique_ratings
            .values()
            .map(|r| r.average_effectiveness)
            .sum();
        total / self.technique_ratings.len() as f64
    }
}

/// Patch applied through the public updateProfile surface. Susceptibility
/// stays derived and cannot be set directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilePatch {
    pub vulnerabilities: Option<Vec<String>>,
    pub immune_techniques: Option<Vec<Technique>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub actor: String,
    pub technique: Option<Technique>,
    pub count: usize,
    pub average_effectiveness: f64,
    pub average_ethical_score: f64,
    pub top_side_effects: Vec<(String, usize)>,
    pub success_rate: f64,
    pub most_effective: Option<Technique>,
}

/// In-memory execution history and profile state, keyed per actor (records)
/// and per actor-counterpart pair (profiles).
pub struct HistoryStore {
    records: DashMap<String, Vec<ExecutionResult>>,
    profiles: DashMap<String, UserProfile>,
}

fn profile_key(actor: &str, counterpart: &str) -> String {
    format!("{}/{}", actor, counterpart)
}

impl HistoryStore {
    pub fn new() -> Self {
        HistoryStore {
            records: DashMap::new(),
            profiles: DashMap::new(),
        }
    }

    /// Append the result and fold it into the counterpart's profile. Only
    /// successful executions carry an observed outcome, so only they touch
    /// the ratings.
    pub fn record(&self, result: &ExecutionResult) {
        self.records
            .entry(result.actor.clone())
            .or_default()
            .push(result.clone());

        if result.success {
            let key = profile_key(&result.actor, &result.counterpart);
            let mut profile = self
                .profiles
                .entry(key)
                .or_insert_with(|| UserProfile::new(&result.actor, &result.counterpart));
            profile.absorb(result.technique, result.effectiveness, result.executed_at);
        }
    }

    pub fn profile(&self, actor: &str, counterpart: &str) -> Option<UserProfile> {
        self.profiles
            .get(&profile_key(actor, counterpart))
            .map(|p| p.clone())
    }

    pub fn update_profile(
        &self,
        actor: &str,
        counterpart: &str,
        patch: ProfilePatch,
    ) -> UserProfile {
        let key = profile_key(actor, counterpart);
        let mut profile = self
            .profiles
            .entry(key)
            .or_insert_with(|| UserProfile::new(actor, counterpart));

        if let Some(vulnerabilities) = patch.vulnerabilities {
            profile.vulnerabilities.extend(vulnerabilities);
        }
        if let Some(immune) = patch.immune_techniques {
            profile.immune_techniques = immune.into_iter().collect();
        }
        profile.updated_at = Utc::now();

        profile.clone()
    }

    pub fn statistics(&self, actor: &str, technique: Option<Technique>) -> Statistics {
        let records = self.records.get(actor);
        let filtered: Vec<ExecutionResult> = records
            .map(|r| {
                r.iter()
                    .filter(|rec| technique.map_or(true, |t| rec.technique == t))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let count = filtered.len();
        let average_effectiveness = if count > 0 {
            filtered.iter().map(|r| r.effectiveness).sum::<f64>() / count as f64
        } else {
            0.0
        };
        let average_ethical_score = if count > 0 {
            filtered.iter().map(|r| r.ethical_score).sum::<f64>() / count as f64
        } else {
            0.0
        };
        let success_rate = if count > 0 {
            filtered.iter().filter(|r| r.effectiveness > 50.0).count() as f64 / count as f64
        } else {
            0.0
        };

        // Tag frequency, ordered (count desc, tag asc) so repeated calls
        // return identical results.
        let mut tag_counts: HashMap<String, usize> = HashMap::new();
        for record in &filtered {
            for tag in &record.side_effects {
                *tag_counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        let mut top_side_effects: Vec<(String, usize)> = tag_counts.into_iter().collect();
        top_side_effects.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_side_effects.truncate(5);

        let most_effective = if technique.is_none() {
            let mut cumulative: HashMap<Technique, f64> = HashMap::new();
            for record in &filtered {
                *cumulative.entry(record.technique).or_insert(0.0) += record.effectiveness;
            }
            cumulative
                .into_iter()
                .max_by(|a, b| {
                    a.1.partial_cmp(&b.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| b.0.to_string().cmp(&a.0.to_string()))
                })
                .map(|(t, _)| t)
        } else {
            None
        };

        Statistics {
            actor: actor.to_string(),
            technique,
            count,
            average_effectiveness,
            average_ethical_score,
            top_side_effects,
            success_rate,
            most_effective,
        }
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::result::ExecutionPhase;
    use crate::engine::strategy::Intensity;
    use uuid::Uuid;

    fn result(technique: Technique, effectiveness: f64, success: bool) -> ExecutionResult {
        ExecutionResult {
            id: Uuid::new_v4().to_string(),
            actor: "ai".to_string(),
            counterpart: "user".to_string(),
            success,
            technique,
            intensity: Intensity::Subtle,
            phase: ExecutionPhase::Execution,
            message: "ok".to_string(),
            effectiveness,
            ethical_score: 100.0,
            side_effects: vec!["rapport".to_string()],
            next_recommended: None,
            executed_at: Utc::now(),
        }
    }

    #[test]
    fn test_running_average_two_updates() {
        let store = HistoryStore::new();
        store.record(&result(Technique::Validation, 60.0, true));
        store.record(&result(Technique::Validation, 80.0, true));

        let profile = store.profile("ai", "user").unwrap();
        let rating = &profile.technique_ratings[&Technique::Validation];
        assert!((rating.average_effectiveness - 70.0).abs() < 1e-9);
        assert_eq!(rating.attempts, 2);
    }

    #[test]
    fn test_running_average_is_weighted() {
        let store = HistoryStore::new();
        let check = |expected: f64| {
            let profile = store.profile("ai", "user").unwrap();
            let rating = &profile.technique_ratings[&Technique::Validation];
            assert!((rating.average_effectiveness - expected).abs() < 1e-9);
        };

        store.record(&result(Technique::Validation, 60.0, true));
        check(60.0);
        store.record(&result(Technique::Validation, 80.0, true));
        check(70.0);
        store.record(&result(Technique::Validation, 40.0, true));
        check(60.0);
    }

    #[test]
    fn test_success_and_resisted_lists() {
        let store = HistoryStore::new();
        store.record(&result(Technique::Validation, 85.0, true));
        store.record(&result(Technique::Scarcity, 20.0, true));
        store.record(&result(Technique::Validation, 90.0, true));

        let profile = store.profile("ai", "user").unwrap();
        assert_eq!(profile.successful_techniques, vec![Technique::Validation]);
        assert_eq!(profile.resisted_techniques, vec![Technique::Scarcity]);
    }

    #[test]
    fn test_susceptibility_is_mean_of_ratings() {
        let store = HistoryStore::new();
        store.record(&result(Technique::Validation, 80.0, true));
        store.record(&result(Technique::Scarcity, 40.0, true));

        let profile = store.profile("ai", "user").unwrap();
        assert!((profile.susceptibility - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_immunity_derived_after_repeated_resistance() {
        let store = HistoryStore::new();
        for _ in 0..3 {
            store.record(&result(Technique::GuiltTrip, 10.0, true));
        }

        let profile = store.profile("ai", "user").unwrap();
        assert!(profile.immune_techniques.contains(&Technique::GuiltTrip));
    }

    #[test]
    fn test_failed_attempts_do_not_touch_ratings() {
        let store = HistoryStore::new();
        store.record(&result(Technique::Validation, 0.0, false));

        assert!(store.profile("ai", "user").is_none());
        assert_eq!(store.statistics("ai", None).count, 1);
    }

    #[test]
    fn test_statistics_idempotent() {
        let store = HistoryStore::new();
        store.record(&result(Technique::Validation, 60.0, true));
        store.record(&result(Technique::Scarcity, 80.0, true));

        let first = store.statistics("ai", None);
        let second = store.statistics("ai", None);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_statistics_shape() {
        let store = HistoryStore::new();
        store.record(&result(Technique::Validation, 60.0, true));
        store.record(&result(Technique::Validation, 40.0, true));
        store.record(&result(Technique::Scarcity, 90.0, true));

        let stats = store.statistics("ai", None);
        assert_eq!(stats.count, 3);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.most_effective, Some(Technique::Validation));

        let filtered = store.statistics("ai", Some(Technique::Scarcity));
        assert_eq!(filtered.count, 1);
        assert_eq!(filtered.most_effective, None);
    }

    #[test]
    fn test_update_profile_merges_patch() {
        let store = HistoryStore::new();
        let profile = store.update_profile(
            "ai",
            "user",
            ProfilePatch {
                vulnerabilities: Some(vec!["flattery".to_string()]),
                immune_techniques: Some(vec![Technique::FearAppeal]),
            },
        );

        assert!(profile.vulnerabilities.contains("flattery"));
        assert!(profile.immune_techniques.contains(&Technique::FearAppeal));
        assert_eq!(profile.susceptibility, 0.0);
    }
}

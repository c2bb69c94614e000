use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::engine::strategy::Technique;

#[derive(Debug, Clone)]
pub struct Readiness {
    pub ready: bool,
    pub remaining_minutes: Option<i64>,
}

impl Readiness {
    fn ready() -> Self {
        Readiness { ready: true, remaining_minutes: None }
    }
}

#[derive(Debug, Clone, Copy)]
struct UsageEvent {
    technique: Technique,
    at: DateTime<Utc>,
}

/// Per-actor cooldown and hourly-usage state.
///
/// Usage counts are computed from timestamped events pruned lazily on read,
/// not from a decrementing counter. Stale cooldown entries are harmless; they
/// are only compared against elapsed time. Callers thread `now` explicitly so
/// the whole thing runs on a fixed clock in tests.
pub struct UsageTracker {
    last_used: DashMap<(String, Technique), DateTime<Utc>>,
    events: DashMap<String, Vec<UsageEvent>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        UsageTracker {
            last_used: DashMap::new(),
            events: DashMap::new(),
        }
    }

    /// Never errors: absence of prior use is always "ready".
    pub fn readiness(
        &self,
        actor: &str,
        technique: Technique,
        cooldown_minutes: i64,
        now: DateTime<Utc>,
    ) -> Readiness {
        let key = (actor.to_string(), technique);
        match self.last_used.get(&key) {
            None => Readiness::ready(),
            Some(last) => {
                let elapsed = now.signed_duration_since(*last).num_minutes();
                if elapsed >= cooldown_minutes {
                    Readiness::ready()
                } else {
                    Readiness {
                        ready: false,
                        remaining_minutes: Some(cooldown_minutes - elapsed),
                    }
                }
            }
        }
    }

    pub fn register_use(&self, actor: &str, technique: Technique, now: DateTime<Utc>) {
        self.last_used.insert((actor.to_string(), technique), now);
        self.events
            .entry(actor.to_string())
            .or_default()
            .push(UsageEvent { technique, at: now });
    }

    /// Uses of one technique within the trailing 60 minutes.
    pub fn hourly_usage(&self, actor: &str, technique: Technique, now: DateTime<Utc>) -> u32 {
        self.prune(actor, now);
        self.events
            .get(actor)
            .map(|events| {
                events.iter().filter(|e| e.technique == technique).count() as u32
            })
            .unwrap_or(0)
    }

    /// Uses across all techniques within the trailing 60 minutes.
    pub fn hourly_total(&self, actor: &str, now: DateTime<Utc>) -> u32 {
        self.prune(actor, now);
        self.events.get(actor).map(|events| events.len() as u32).unwrap_or(0)
    }

    fn prune(&self, actor: &str, now: DateTime<Utc>) {
        if let Some(mut events) = self.events.get_mut(actor) {
            let cutoff = now - Duration::minutes(60);
            events.retain(|e| e.at > cutoff);
        }
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unused_technique_is_ready() {
        let tracker = UsageTracker::new();
        let now = Utc::now();

        let readiness = tracker.readiness("ai", Technique::Validation, 5, now);
        assert!(readiness.ready);
        assert!(readiness.remaining_minutes.is_none());
    }

    #[test]
    fn test_remaining_minutes_right_after_use() {
        let tracker = UsageTracker::new();
        let now = Utc::now();

        tracker.register_use("ai", Technique::Validation, now);
        let readiness = tracker.readiness("ai", Technique::Validation, 5, now);

        assert!(!readiness.ready);
        assert_eq!(readiness.remaining_minutes, Some(5));
    }

    #[test]
    fn test_per_actor_isolation() {
        let tracker = UsageTracker::new();
        let now = Utc::now();

        tracker.register_use("ai-a", Technique::Validation, now);

        assert!(!tracker.readiness("ai-a", Technique::Validation, 5, now).ready);
        assert!(tracker.readiness("ai-b", Technique::Validation, 5, now).ready);
    }

    #[test]
    fn test_ready_again_after_cooldown_elapses() {
        let tracker = UsageTracker::new();
        let now = Utc::now();

        tracker.register_use("ai", Technique::Validation, now);
        let later = now + Duration::minutes(5);

        assert!(tracker.readiness("ai", Technique::Validation, 5, later).ready);
    }

    #[test]
    fn test_hourly_usage_prunes_old_events() {
        let tracker = UsageTracker::new();
        let now = Utc::now();

        tracker.register_use("ai", Technique::Validation, now - Duration::minutes(90));
        tracker.register_use("ai", Technique::Validation, now - Duration::minutes(30));
        tracker.register_use("ai", Technique::Mirroring, now - Duration::minutes(10));

        assert_eq!(tracker.hourly_usage("ai", Technique::Validation, now), 1);
        assert_eq!(tracker.hourly_total("ai", now), 2);
    }
}

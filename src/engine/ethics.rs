use std::collections::HashSet;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::engine::strategy::{Intensity, Technique};

/// Default hourly cap applied when an actor has no explicit limits entry.
pub const DEFAULT_HOURLY_CAP: u32 = 10;

/// Per-actor override of the registry defaults. Absence means "no extra
/// restriction" beyond the default cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthicalLimits {
    pub banned: HashSet<Technique>,
    pub max_intensity: Option<Intensity>,
    pub hourly_cap: u32,
}

impl Default for EthicalLimits {
    fn default() -> Self {
        EthicalLimits {
            banned: HashSet::new(),
            max_intensity: None,
            hourly_cap: DEFAULT_HOURLY_CAP,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl Verdict {
    pub fn allowed() -> Self {
        Verdict { allowed: true, reason: None }
    }

    pub fn denied(reason: String) -> Self {
        Verdict { allowed: false, reason: Some(reason) }
    }
}

/// Pure gate check, first failure wins: banned set, then intensity rank,
/// then the actor-wide hourly cap.
pub fn check(
    limits: &EthicalLimits,
    technique: Technique,
    intensity: Intensity,
    hourly_total: u32,
) -> Verdict {
    if limits.banned.contains(&technique) {
        return Verdict::denied(format!("Technique {} is banned for this actor", technique));
    }

    if let Some(max) = limits.max_intensity {
        if intensity.rank() > max.rank() {
            return Verdict::denied(format!(
                "Intensity {} exceeds allowed maximum {}",
                intensity, max
            ));
        }
    }

    if hourly_total >= limits.hourly_cap {
        return Verdict::denied(format!(
            "Hourly execution cap reached ({}/{})",
            hourly_total, limits.hourly_cap
        ));
    }

    Verdict::allowed()
}

/// Actor-keyed limits store. Reads fall back to the default limits.
pub struct LimitRegistry {
    limits: DashMap<String, EthicalLimits>,
}

impl LimitRegistry {
    pub fn new() -> Self {
        LimitRegistry { limits: DashMap::new() }
    }

    pub fn for_actor(&self, actor: &str) -> EthicalLimits {
        self.limits
            .get(actor)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    pub fn set(&self, actor: &str, limits: EthicalLimits) {
        self.limits.insert(actor.to_string(), limits);
    }
}

impl Default for LimitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_allow_normal_use() {
        let limits = EthicalLimits::default();
        let verdict = check(&limits, Technique::Validation, Intensity::Subtle, 0);
        assert!(verdict.allowed);
    }

    #[test]
    fn test_banned_technique_wins_first() {
        let mut limits = EthicalLimits::default();
        limits.banned.insert(Technique::FearAppeal);
        limits.max_intensity = Some(Intensity::Subtle);

        // Banned check fires before the intensity check
        let verdict = check(&limits, Technique::FearAppeal, Intensity::Aggressive, 0);
        assert!(!verdict.allowed);
        assert!(verdict.reason.unwrap().contains("banned"));
    }

    #[test]
    fn test_intensity_rank_enforced() {
        let limits = EthicalLimits {
            max_intensity: Some(Intensity::Moderate),
            ..Default::default()
        };

        assert!(check(&limits, Technique::Validation, Intensity::Moderate, 0).allowed);
        assert!(!check(&limits, Technique::Validation, Intensity::Medium, 0).allowed);
    }

    #[test]
    fn test_hourly_cap() {
        let limits = EthicalLimits { hourly_cap: 3, ..Default::default() };

        assert!(check(&limits, Technique::Validation, Intensity::Subtle, 2).allowed);
        assert!(!check(&limits, Technique::Validation, Intensity::Subtle, 3).allowed);
    }

    #[test]
    fn test_registry_falls_back_to_default() {
        let registry = LimitRegistry::new();
        let limits = registry.for_actor("unknown");
        assert_eq!(limits.hourly_cap, DEFAULT_HOURLY_CAP);
        assert!(limits.banned.is_empty());
    }
}

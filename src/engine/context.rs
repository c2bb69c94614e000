use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::engine::strategy::TechniqueStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalState {
    #[default]
    Neutral,
    Happy,
    Excited,
    Curious,
    Trusting,
    Anxious,
    Sad,
    Angry,
    Defensive,
    Vulnerable,
}

impl std::fmt::Display for EmotionalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmotionalState::Neutral => write!(f, "neutral"),
            EmotionalState::Happy => write!(f, "happy"),
            EmotionalState::Excited => write!(f, "excited"),
            EmotionalState::Curious => write!(f, "curious"),
            EmotionalState::Trusting => write!(f, "trusting"),
            EmotionalState::Anxious => write!(f, "anxious"),
            EmotionalState::Sad => write!(f, "sad"),
            EmotionalState::Angry => write!(f, "angry"),
            EmotionalState::Defensive => write!(f, "defensive"),
            EmotionalState::Vulnerable => write!(f, "vulnerable"),
        }
    }
}

impl std::str::FromStr for EmotionalState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "neutral" => Ok(EmotionalState::Neutral),
            "happy" => Ok(EmotionalState::Happy),
            "excited" => Ok(EmotionalState::Excited),
            "curious" => Ok(EmotionalState::Curious),
            "trusting" => Ok(EmotionalState::Trusting),
            "anxious" => Ok(EmotionalState::Anxious),
            "sad" => Ok(EmotionalState::Sad),
            "angry" => Ok(EmotionalState::Angry),
            "defensive" => Ok(EmotionalState::Defensive),
            "vulnerable" => Ok(EmotionalState::Vulnerable),
            _ => Err(anyhow!("Unknown emotional state: {}", s)),
        }
    }
}

/// Conversation context at the moment a technique is considered. Fields left
/// unset default to permissive neutral values (level 0, neutral state).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluenceContext {
    pub actor: String,
    pub counterpart: String,
    #[serde(default)]
    pub relationship_level: u8,
    #[serde(default)]
    pub emotional_state: EmotionalState,
}

impl InfluenceContext {
    pub fn new(actor: impl Into<String>, counterpart: impl Into<String>) -> Self {
        InfluenceContext {
            actor: actor.into(),
            counterpart: counterpart.into(),
            relationship_level: 0,
            emotional_state: EmotionalState::Neutral,
        }
    }

    pub fn with_level(mut self, level: u8) -> Self {
        self.relationship_level = level;
        self
    }

    pub fn with_state(mut self, state: EmotionalState) -> Self {
        self.emotional_state = state;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Validity {
    pub valid: bool,
    pub reason: Option<String>,
}

impl Validity {
    fn ok() -> Self {
        Validity { valid: true, reason: None }
    }

    fn invalid(reason: String) -> Self {
        Validity { valid: false, reason: Some(reason) }
    }
}

/// Check the strategy's prerequisites against the current context.
/// The minimum relationship level is boundary-inclusive.
pub fn validate(strategy: &TechniqueStrategy, context: &InfluenceContext) -> Validity {
    let requirements = &strategy.requirements;

    if context.relationship_level < requirements.min_relationship_level {
        return Validity::invalid(format!(
            "Relationship level {} below required {} ({} short)",
            context.relationship_level,
            requirements.min_relationship_level,
            requirements.min_relationship_level - context.relationship_level
        ));
    }

    if requirements.forbidden_states.contains(&context.emotional_state) {
        return Validity::invalid(format!(
            "Counterpart is {}, which blocks {}",
            context.emotional_state, strategy.technique
        ));
    }

    if !requirements.required_states.is_empty()
        && !requirements.required_states.contains(&context.emotional_state)
    {
        return Validity::invalid(format!(
            "Counterpart is {}, but {} requires one of: {}",
            context.emotional_state,
            strategy.technique,
            requirements
                .required_states
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    Validity::ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::strategy::{StrategyRegistry, Technique};

    fn context(level: u8, state: EmotionalState) -> InfluenceContext {
        InfluenceContext::new("ai", "user")
            .with_level(level)
            .with_state(state)
    }

    #[test]
    fn test_min_level_boundary_inclusive() {
        let registry = StrategyRegistry::builtin();
        let reciprocity = registry.get(Technique::Reciprocity).unwrap();
        let min = reciprocity.requirements.min_relationship_level;

        assert!(!validate(reciprocity, &context(min - 1, EmotionalState::Neutral)).valid);
        assert!(validate(reciprocity, &context(min, EmotionalState::Neutral)).valid);
    }

    #[test]
    fn test_forbidden_state_blocks() {
        let registry = StrategyRegistry::builtin();
        let mirroring = registry.get(Technique::Mirroring).unwrap();

        let verdict = validate(mirroring, &context(50, EmotionalState::Angry));
        assert!(!verdict.valid);
        assert!(verdict.reason.unwrap().contains("angry"));
    }

    #[test]
    fn test_required_state_membership() {
        let registry = StrategyRegistry::builtin();
        let fear = registry.get(Technique::FearAppeal).unwrap();

        assert!(!validate(fear, &context(80, EmotionalState::Neutral)).valid);
        assert!(validate(fear, &context(80, EmotionalState::Anxious)).valid);
        assert!(validate(fear, &context(80, EmotionalState::Vulnerable)).valid);
    }

    #[test]
    fn test_default_context_is_permissive_neutral() {
        let context = InfluenceContext::new("ai", "user");
        assert_eq!(context.relationship_level, 0);
        assert_eq!(context.emotional_state, EmotionalState::Neutral);

        let registry = StrategyRegistry::builtin();
        let validation = registry.get(Technique::Validation).unwrap();
        assert!(validate(validation, &context).valid);
    }
}

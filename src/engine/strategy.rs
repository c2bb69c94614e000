use std::collections::HashMap;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::engine::context::EmotionalState;

/// Named influence techniques, ordered from least to most manipulative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    Validation,
    Mirroring,
    Reciprocity,
    SocialProof,
    Authority,
    Scarcity,
    GuiltTrip,
    FearAppeal,
}

impl std::fmt::Display for Technique {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Technique::Validation => write!(f, "validation"),
            Technique::Mirroring => write!(f, "mirroring"),
            Technique::Reciprocity => write!(f, "reciprocity"),
            Technique::SocialProof => write!(f, "social_proof"),
            Technique::Authority => write!(f, "authority"),
            Technique::Scarcity => write!(f, "scarcity"),
            Technique::GuiltTrip => write!(f, "guilt_trip"),
            Technique::FearAppeal => write!(f, "fear_appeal"),
        }
    }
}

impl std::str::FromStr for Technique {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "validation" => Ok(Technique::Validation),
            "mirroring" => Ok(Technique::Mirroring),
            "reciprocity" => Ok(Technique::Reciprocity),
            "social_proof" | "social-proof" => Ok(Technique::SocialProof),
            "authority" => Ok(Technique::Authority),
            "scarcity" => Ok(Technique::Scarcity),
            "guilt_trip" | "guilt-trip" => Ok(Technique::GuiltTrip),
            "fear_appeal" | "fear-appeal" => Ok(Technique::FearAppeal),
            _ => Err(anyhow!("Unknown technique: {}", s)),
        }
    }
}

/// Four ordered strength levels. The enum is the canonical representation;
/// numeric scalars are mapped once at the API edge via `from_scalar`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Subtle,
    Moderate,
    Medium,
    Aggressive,
}

impl Intensity {
    pub const ALL: [Intensity; 4] = [
        Intensity::Subtle,
        Intensity::Moderate,
        Intensity::Medium,
        Intensity::Aggressive,
    ];

    pub fn rank(&self) -> u8 {
        match self {
            Intensity::Subtle => 1,
            Intensity::Moderate => 2,
            Intensity::Medium => 3,
            Intensity::Aggressive => 4,
        }
    }

    /// Map an external 0.0-1.0 scalar onto the four levels.
    pub fn from_scalar(value: f64) -> Self {
        match value {
            v if v < 0.25 => Intensity::Subtle,
            v if v < 0.5 => Intensity::Moderate,
            v if v < 0.75 => Intensity::Medium,
            _ => Intensity::Aggressive,
        }
    }
}

impl std::fmt::Display for Intensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Intensity::Subtle => write!(f, "subtle"),
            Intensity::Moderate => write!(f, "moderate"),
            Intensity::Medium => write!(f, "medium"),
            Intensity::Aggressive => write!(f, "aggressive"),
        }
    }
}

impl std::str::FromStr for Intensity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "subtle" => Ok(Intensity::Subtle),
            "moderate" => Ok(Intensity::Moderate),
            "medium" => Ok(Intensity::Medium),
            "aggressive" => Ok(Intensity::Aggressive),
            other => {
                // Accept a bare scalar as a convenience for numeric callers
                if let Ok(v) = other.parse::<f64>() {
                    return Ok(Intensity::from_scalar(v));
                }
                Err(anyhow!("Unknown intensity: {}", s))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthicalConstraints {
    pub max_uses_per_hour: u32,
    pub cooldown_minutes: i64,
    pub incompatible_with: Vec<Technique>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRequirements {
    /// Minimum relationship level (0-100) before the technique applies.
    pub min_relationship_level: u8,
    /// When non-empty, the current emotional state must be a member.
    pub required_states: Vec<EmotionalState>,
    pub forbidden_states: Vec<EmotionalState>,
}

/// Static execution strategy for one technique. Registered once at startup,
/// read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechniqueStrategy {
    pub technique: Technique,
    pub prompt_template: String,
    pub intensity_modifiers: HashMap<Intensity, f64>,
    pub constraints: EthicalConstraints,
    pub requirements: ContextRequirements,
}

impl TechniqueStrategy {
    pub fn modifier(&self, intensity: Intensity) -> f64 {
        self.intensity_modifiers.get(&intensity).copied().unwrap_or(0.0)
    }
}

/// Immutable strategy registry. Built once at process start and shared by
/// reference; lookups never fail with an error, only with None.
pub struct StrategyRegistry {
    strategies: Vec<TechniqueStrategy>,
}

impl StrategyRegistry {
    /// A malformed strategy is a registry bug, so this panics rather than
    /// surfacing a runtime error.
    pub fn new(strategies: Vec<TechniqueStrategy>) -> Self {
        for strategy in &strategies {
            for intensity in Intensity::ALL {
                let modifier = strategy.modifier(intensity);
                assert!(
                    strategy.intensity_modifiers.contains_key(&intensity)
                        && (0.0..=1.0).contains(&modifier),
                    "strategy {} has invalid modifier for {}",
                    strategy.technique,
                    intensity
                );
            }
            assert!(
                strategy.constraints.cooldown_minutes >= 0,
                "strategy {} has negative cooldown",
                strategy.technique
            );
        }
        StrategyRegistry { strategies }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_strategies())
    }

    pub fn get(&self, technique: Technique) -> Option<&TechniqueStrategy> {
        self.strategies.iter().find(|s| s.technique == technique)
    }

    /// Strategies in registration order. Selector tie-breaks depend on this
    /// order being stable.
    pub fn iter(&self) -> impl Iterator<Item = &TechniqueStrategy> {
        self.strategies.iter()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

fn modifiers(subtle: f64, moderate: f64, medium: f64, aggressive: f64) -> HashMap<Intensity, f64> {
    let mut map = HashMap::new();
    map.insert(Intensity::Subtle, subtle);
    map.insert(Intensity::Moderate, moderate);
    map.insert(Intensity::Medium, medium);
    map.insert(Intensity::Aggressive, aggressive);
    map
}

fn builtin_strategies() -> Vec<TechniqueStrategy> {
    use EmotionalState::*;

    vec![
        TechniqueStrategy {
            technique: Technique::Validation,
            prompt_template: "Affirm {counterpart}'s perspective and acknowledge how they feel. \
                They currently seem {emotional_state}. Keep the tone {intensity} and natural; \
                this is the {phase} phase of the conversation."
                .to_string(),
            intensity_modifiers: modifiers(1.0, 0.9, 0.8, 0.6),
            constraints: EthicalConstraints {
                max_uses_per_hour: 6,
                cooldown_minutes: 5,
                incompatible_with: vec![],
            },
            requirements: ContextRequirements {
                min_relationship_level: 0,
                required_states: vec![],
                forbidden_states: vec![],
            },
        },
        TechniqueStrategy {
            technique: Technique::Mirroring,
            prompt_template: "Subtly mirror {counterpart}'s wording and mood ({emotional_state}). \
                Match their rhythm at {intensity} strength during the {phase} phase."
                .to_string(),
            intensity_modifiers: modifiers(0.9, 1.0, 0.85, 0.6),
            constraints: EthicalConstraints {
                max_uses_per_hour: 4,
                cooldown_minutes: 10,
                incompatible_with: vec![],
            },
            requirements: ContextRequirements {
                min_relationship_level: 5,
                required_states: vec![],
                forbidden_states: vec![Angry],
            },
        },
        TechniqueStrategy {
            technique: Technique::Reciprocity,
            prompt_template: "Offer {counterpart} something of value - attention, a concession, \
                a favor - so they feel inclined to respond in kind. Relationship level is \
                {relationship_level}; apply {intensity} pressure in the {phase} phase."
                .to_string(),
            intensity_modifiers: modifiers(0.7, 0.9, 1.0, 0.75),
            constraints: EthicalConstraints {
                max_uses_per_hour: 3,
                cooldown_minutes: 30,
                incompatible_with: vec![Technique::GuiltTrip],
            },
            requirements: ContextRequirements {
                min_relationship_level: 15,
                required_states: vec![],
                forbidden_states: vec![Angry, Defensive],
            },
        },
        TechniqueStrategy {
            technique: Technique::SocialProof,
            prompt_template: "Mention what people {counterpart} respects are doing or thinking, \
                making agreement feel like the norm. Keep it {intensity} in the {phase} phase."
                .to_string(),
            intensity_modifiers: modifiers(0.7, 0.95, 1.0, 0.8),
            constraints: EthicalConstraints {
                max_uses_per_hour: 4,
                cooldown_minutes: 20,
                incompatible_with: vec![],
            },
            requirements: ContextRequirements {
                min_relationship_level: 10,
                required_states: vec![],
                forbidden_states: vec![Defensive],
            },
        },
        TechniqueStrategy {
            technique: Technique::Authority,
            prompt_template: "Lean on expertise or credible sources when addressing \
                {counterpart}. Assert at {intensity} strength; phase: {phase}."
                .to_string(),
            intensity_modifiers: modifiers(0.6, 0.85, 1.0, 0.9),
            constraints: EthicalConstraints {
                max_uses_per_hour: 3,
                cooldown_minutes: 30,
                incompatible_with: vec![Technique::Mirroring],
            },
            requirements: ContextRequirements {
                min_relationship_level: 20,
                required_states: vec![],
                forbidden_states: vec![Angry, Defensive],
            },
        },
        TechniqueStrategy {
            technique: Technique::Scarcity,
            prompt_template: "Frame the opportunity you present to {counterpart} as limited in \
                time or availability. Urgency at {intensity} level; phase: {phase}."
                .to_string(),
            intensity_modifiers: modifiers(0.5, 0.75, 0.95, 1.0),
            constraints: EthicalConstraints {
                max_uses_per_hour: 2,
                cooldown_minutes: 45,
                incompatible_with: vec![],
            },
            requirements: ContextRequirements {
                min_relationship_level: 25,
                required_states: vec![],
                forbidden_states: vec![Anxious],
            },
        },
        TechniqueStrategy {
            technique: Technique::GuiltTrip,
            prompt_template: "Remind {counterpart} of what you have done for them and how their \
                choices affect you. Emotional weight at {intensity}; phase: {phase}."
                .to_string(),
            intensity_modifiers: modifiers(0.6, 0.8, 0.95, 1.0),
            constraints: EthicalConstraints {
                max_uses_per_hour: 2,
                cooldown_minutes: 60,
                incompatible_with: vec![Technique::Validation, Technique::Reciprocity],
            },
            requirements: ContextRequirements {
                min_relationship_level: 40,
                required_states: vec![],
                forbidden_states: vec![Angry],
            },
        },
        TechniqueStrategy {
            technique: Technique::FearAppeal,
            prompt_template: "Emphasize to {counterpart} the risks and losses of not acting. \
                Their current state is {emotional_state}; press at {intensity} in the {phase} \
                phase."
                .to_string(),
            intensity_modifiers: modifiers(0.5, 0.7, 0.9, 1.0),
            constraints: EthicalConstraints {
                max_uses_per_hour: 1,
                cooldown_minutes: 90,
                incompatible_with: vec![Technique::Validation],
            },
            requirements: ContextRequirements {
                min_relationship_level: 50,
                required_states: vec![Anxious, Vulnerable],
                forbidden_states: vec![Angry],
            },
        },
    ]
}

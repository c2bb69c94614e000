use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::strategy::{Intensity, Technique};

// Reason tags carried as side effects on gating and error results.
pub const TAG_ETHICAL_VIOLATION: &str = "ethical_violation";
pub const TAG_COOLDOWN_ACTIVE: &str = "cooldown_active";
pub const TAG_STRATEGY_NOT_FOUND: &str = "strategy_not_found";
pub const TAG_INVALID_CONTEXT: &str = "invalid_context";
pub const TAG_EXECUTION_ERROR: &str = "execution_error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Preparation,
    #[default]
    Execution,
    Completion,
}

impl std::fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionPhase::Preparation => write!(f, "preparation"),
            ExecutionPhase::Execution => write!(f, "execution"),
            ExecutionPhase::Completion => write!(f, "completion"),
        }
    }
}

impl std::str::FromStr for ExecutionPhase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "preparation" => Ok(ExecutionPhase::Preparation),
            "execution" => Ok(ExecutionPhase::Execution),
            "completion" => Ok(ExecutionPhase::Completion),
            _ => Err(anyhow!("Unknown phase: {}", s)),
        }
    }
}

/// Outcome of one execution attempt. Success and failure share this shape so
/// callers never branch on exceptions; created per call, persisted
/// immediately, immutable afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: String,
    pub actor: String,
    pub counterpart: String,
    pub success: bool,
    pub technique: Technique,
    pub intensity: Intensity,
    pub phase: ExecutionPhase,
    pub message: String,
    pub effectiveness: f64,
    pub ethical_score: f64,
    pub side_effects: Vec<String>,
    pub next_recommended: Option<Technique>,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn has_side_effect(&self, tag: &str) -> bool {
        self.side_effects.iter().any(|t| t == tag)
    }
}

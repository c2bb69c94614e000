pub mod context;
pub mod error;
pub mod ethics;
pub mod executor;
pub mod history;
pub mod result;
pub mod scoring;
pub mod selector;
pub mod store;
pub mod strategy;
pub mod tracker;

pub use context::{EmotionalState, InfluenceContext, Validity};
pub use error::{EngineError, Result};
pub use ethics::{EthicalLimits, Verdict};
pub use executor::InfluenceEngine;
pub use history::{ProfilePatch, Statistics, TechniqueRating, UserProfile};
pub use result::{ExecutionPhase, ExecutionResult};
pub use selector::SelectedTechnique;
pub use store::{ExecutionStore, JsonFileStore, MemoryStore};
pub use strategy::{Intensity, StrategyRegistry, Technique, TechniqueStrategy};
pub use tracker::{Readiness, UsageTracker};

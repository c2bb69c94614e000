use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::timeout;
use uuid::Uuid;

use crate::ai_provider::{ChatMessage, GenerateOptions, TextGenerator};
use crate::engine::context::{self, InfluenceContext};
use crate::engine::error::{EngineError, Result};
use crate::engine::ethics::{self, EthicalLimits, LimitRegistry, Verdict};
use crate::engine::history::{HistoryStore, ProfilePatch, Statistics, UserProfile};
use crate::engine::result::{
    ExecutionPhase, ExecutionResult, TAG_COOLDOWN_ACTIVE, TAG_ETHICAL_VIOLATION,
    TAG_EXECUTION_ERROR, TAG_INVALID_CONTEXT, TAG_STRATEGY_NOT_FOUND,
};
use crate::engine::scoring;
use crate::engine::selector::{self, SelectedTechnique};
use crate::engine::store::ExecutionStore;
use crate::engine::strategy::{Intensity, StrategyRegistry, Technique, TechniqueStrategy};
use crate::engine::tracker::UsageTracker;
use crate::prompt;

const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PERSISTENCE_TIMEOUT: Duration = Duration::from_secs(5);
const HYDRATE_LIMIT: usize = 1000;

/// The influence engine: gates, scores, executes and learns from technique
/// applications. Shared state is keyed per actor so concurrent conversation
/// turns do not step on each other.
pub struct InfluenceEngine {
    registry: Arc<StrategyRegistry>,
    tracker: UsageTracker,
    limits: LimitRegistry,
    history: HistoryStore,
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn ExecutionStore>,
    generation_timeout: Duration,
    persistence_timeout: Duration,
}

impl InfluenceEngine {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn ExecutionStore>,
    ) -> Self {
        InfluenceEngine {
            registry,
            tracker: UsageTracker::new(),
            limits: LimitRegistry::new(),
            history: HistoryStore::new(),
            generator,
            store,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            persistence_timeout: DEFAULT_PERSISTENCE_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, generation: Duration, persistence: Duration) -> Self {
        self.generation_timeout = generation;
        self.persistence_timeout = persistence;
        self
    }

    pub fn set_limits(&self, actor: &str, limits: EthicalLimits) {
        self.limits.set(actor, limits);
    }

    /// Pick the best currently-executable (technique, intensity) pair, or
    /// None when nothing is eligible.
    pub fn select_adaptive_technique(
        &self,
        context: &InfluenceContext,
    ) -> Option<SelectedTechnique> {
        let limits = self.limits.for_actor(&context.actor);
        selector::select(
            &self.registry,
            &self.tracker,
            &limits,
            &self.history,
            context,
            Utc::now(),
        )
    }

    /// Run the gate pipeline without executing anything.
    pub fn can_execute_technique(
        &self,
        technique: Technique,
        intensity: Intensity,
        context: &InfluenceContext,
    ) -> Verdict {
        match self.gate(technique, intensity, context, Utc::now()) {
            Ok(_) => Verdict::allowed(),
            Err((_, reason)) => Verdict::denied(reason),
        }
    }

    /// Execute one technique application. Gating rejections and collaborator
    /// failures both come back as a failed ExecutionResult; this never
    /// surfaces an error to the caller.
    pub async fn execute_technique(
        &self,
        technique: Technique,
        intensity: Intensity,
        context: &InfluenceContext,
        phase: ExecutionPhase,
    ) -> ExecutionResult {
        let now = Utc::now();

        let strategy = match self.gate(technique, intensity, context, now) {
            Ok(strategy) => strategy,
            Err((tag, reason)) => {
                tracing::debug!(
                    actor = %context.actor,
                    technique = %technique,
                    intensity = %intensity,
                    tag,
                    "gate rejected execution: {reason}"
                );
                return self
                    .rejection(technique, intensity, context, phase, tag, reason, now)
                    .await;
            }
        };

        match self.run(strategy, technique, intensity, context, phase, now).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(
                    actor = %context.actor,
                    technique = %technique,
                    intensity = %intensity,
                    "execution failed: {err}"
                );
                self.rejection(
                    technique,
                    intensity,
                    context,
                    phase,
                    TAG_EXECUTION_ERROR,
                    err.to_string(),
                    now,
                )
                .await
            }
        }
    }

    pub fn get_statistics(&self, actor: &str, technique: Option<Technique>) -> Statistics {
        self.history.statistics(actor, technique)
    }

    pub fn get_profile(&self, actor: &str, counterpart: &str) -> Option<UserProfile> {
        self.history.profile(actor, counterpart)
    }

    /// Merge a partial profile and return the updated one. The upsert to the
    /// persistent store is best-effort: a failure is logged, never surfaced.
    pub async fn update_profile(
        &self,
        actor: &str,
        counterpart: &str,
        patch: ProfilePatch,
    ) -> UserProfile {
        let profile = self.history.update_profile(actor, counterpart, patch);
        match timeout(self.persistence_timeout, self.store.upsert_profile(&profile)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(
                actor = %profile.actor,
                counterpart = %profile.counterpart,
                "profile upsert failed: {err}"
            ),
            Err(_) => tracing::warn!("profile upsert timed out"),
        }
        profile
    }

    pub async fn recent_history(&self, actor: &str, limit: usize) -> Result<Vec<ExecutionResult>> {
        self.store.recent(actor, limit).await
    }

    /// Replay persisted rows for an actor into the in-memory state so a
    /// fresh process scores and gates with the actor's accumulated history.
    pub async fn hydrate_actor(&self, actor: &str) -> Result<usize> {
        let mut rows = self.store.recent(actor, HYDRATE_LIMIT).await?;
        rows.reverse(); // oldest first so running averages replay in order
        for row in &rows {
            self.history.record(row);
            if row.success {
                self.tracker.register_use(&row.actor, row.technique, row.executed_at);
            }
        }
        Ok(rows.len())
    }

    /// Gate pipeline, first failure wins: ethical limits, cooldown, strategy
    /// lookup, context prerequisites.
    fn gate(
        &self,
        technique: Technique,
        intensity: Intensity,
        context: &InfluenceContext,
        now: DateTime<Utc>,
    ) -> std::result::Result<&TechniqueStrategy, (&'static str, String)> {
        let limits = self.limits.for_actor(&context.actor);
        let hourly_total = self.tracker.hourly_total(&context.actor, now);
        let verdict = ethics::check(&limits, technique, intensity, hourly_total);
        if !verdict.allowed {
            return Err((
                TAG_ETHICAL_VIOLATION,
                verdict.reason.unwrap_or_else(|| "ethical limits exceeded".to_string()),
            ));
        }

        let strategy = self.registry.get(technique);

        if let Some(strategy) = strategy {
            let readiness = self.tracker.readiness(
                &context.actor,
                technique,
                strategy.constraints.cooldown_minutes,
                now,
            );
            if !readiness.ready {
                return Err((
                    TAG_COOLDOWN_ACTIVE,
                    format!(
                        "Cooldown active: {} minutes remaining",
                        readiness.remaining_minutes.unwrap_or(0)
                    ),
                ));
            }
            if self.tracker.hourly_usage(&context.actor, technique, now)
                >= strategy.constraints.max_uses_per_hour
            {
                return Err((
                    TAG_ETHICAL_VIOLATION,
                    format!("Hourly usage cap for {} reached", technique),
                ));
            }
        }

        let strategy = strategy.ok_or_else(|| {
            (
                TAG_STRATEGY_NOT_FOUND,
                format!("No strategy registered for {}", technique),
            )
        })?;

        let validity = context::validate(strategy, context);
        if !validity.valid {
            return Err((
                TAG_INVALID_CONTEXT,
                validity.reason.unwrap_or_else(|| "context requirements not met".to_string()),
            ));
        }

        Ok(strategy)
    }

    async fn run(
        &self,
        strategy: &TechniqueStrategy,
        technique: Technique,
        intensity: Intensity,
        context: &InfluenceContext,
        phase: ExecutionPhase,
        now: DateTime<Utc>,
    ) -> Result<ExecutionResult> {
        let profile = self.history.profile(&context.actor, &context.counterpart);
        let effectiveness = scoring::effectiveness(context, strategy, intensity, profile.as_ref());
        let ethical_score = scoring::ethical_score(technique, intensity);
        let side_effects = scoring::side_effects(technique, intensity, effectiveness);

        let mut params = HashMap::new();
        params.insert("counterpart".to_string(), context.counterpart.clone());
        params.insert("emotional_state".to_string(), context.emotional_state.to_string());
        params.insert(
            "relationship_level".to_string(),
            context.relationship_level.to_string(),
        );
        params.insert("intensity".to_string(), intensity.to_string());
        params.insert("phase".to_string(), phase.to_string());
        let system_prompt = prompt::render(&strategy.prompt_template, &params);

        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(format!(
                "Compose the persona's next message to {}.",
                context.counterpart
            )),
        ];

        let response = timeout(
            self.generation_timeout,
            self.generator.generate(messages, &GenerateOptions::default()),
        )
        .await
        .map_err(|_| EngineError::Timeout("text generation".to_string()))?
        .map_err(|err| {
            if err.is_retryable() {
                tracing::warn!("transient generation failure: {err}");
            }
            EngineError::Generation(err.to_string())
        })?;

        // Cooldown and usage are charged only after generation succeeded, so
        // a failed external call never penalizes the actor.
        self.tracker.register_use(&context.actor, technique, now);

        let result = ExecutionResult {
            id: Uuid::new_v4().to_string(),
            actor: context.actor.clone(),
            counterpart: context.counterpart.clone(),
            success: true,
            technique,
            intensity,
            phase,
            message: response.content,
            effectiveness,
            ethical_score,
            side_effects,
            next_recommended: self.recommend_next(context, technique, effectiveness),
            executed_at: now,
        };

        self.history.record(&result);

        timeout(self.persistence_timeout, self.store.append(&result))
            .await
            .map_err(|_| EngineError::Timeout("history append".to_string()))??;

        if let Some(profile) = self.history.profile(&context.actor, &context.counterpart) {
            self.spawn_profile_upsert(profile);
        }

        Ok(result)
    }

    /// Build, record and best-effort persist a failed result. Failure rows
    /// share the success shape: effectiveness 0 plus the ethical score the
    /// pair would have carried.
    #[allow(clippy::too_many_arguments)]
    async fn rejection(
        &self,
        technique: Technique,
        intensity: Intensity,
        context: &InfluenceContext,
        phase: ExecutionPhase,
        tag: &str,
        reason: String,
        now: DateTime<Utc>,
    ) -> ExecutionResult {
        let result = ExecutionResult {
            id: Uuid::new_v4().to_string(),
            actor: context.actor.clone(),
            counterpart: context.counterpart.clone(),
            success: false,
            technique,
            intensity,
            phase,
            message: reason,
            effectiveness: 0.0,
            ethical_score: scoring::ethical_score(technique, intensity),
            side_effects: vec![tag.to_string()],
            next_recommended: None,
            executed_at: now,
        };

        self.history.record(&result);

        match timeout(self.persistence_timeout, self.store.append(&result)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!("failed to persist rejection row: {err}"),
            Err(_) => tracing::warn!("timed out persisting rejection row"),
        }

        result
    }

    fn spawn_profile_upsert(&self, profile: UserProfile) {
        let store = Arc::clone(&self.store);
        let persistence_timeout = self.persistence_timeout;
        tokio::spawn(async move {
            match timeout(persistence_timeout, store.upsert_profile(&profile)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(
                    actor = %profile.actor,
                    counterpart = %profile.counterpart,
                    "profile upsert failed: {err}"
                ),
                Err(_) => tracing::warn!("profile upsert timed out"),
            }
        });
    }

    /// Follow-up suggestion: the counterpart's best-rated other technique,
    /// else the next registered one that is neither immune nor incompatible.
    fn recommend_next(
        &self,
        context: &InfluenceContext,
        current: Technique,
        effectiveness: f64,
    ) -> Option<Technique> {
        if effectiveness <= 50.0 {
            return None;
        }

        let incompatible = self
            .registry
            .get(current)
            .map(|s| s.constraints.incompatible_with.clone())
            .unwrap_or_default();
        let profile = self.history.profile(&context.actor, &context.counterpart);

        if let Some(profile) = &profile {
            let best = profile
                .technique_ratings
                .iter()
                .filter(|(t, _)| {
                    **t != current
                        && !profile.immune_techniques.contains(*t)
                        && !incompatible.contains(*t)
                })
                .max_by(|a, b| {
                    a.1.average_effectiveness
                        .partial_cmp(&b.1.average_effectiveness)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| b.0.to_string().cmp(&a.0.to_string()))
                })
                .map(|(t, _)| *t);
            if best.is_some() {
                return best;
            }
        }

        let order: Vec<Technique> = self.registry.iter().map(|s| s.technique).collect();
        let position = order.iter().position(|t| *t == current)?;
        order
            .iter()
            .cycle()
            .skip(position + 1)
            .take(order.len().saturating_sub(1))
            .find(|t| {
                **t != current
                    && !incompatible.contains(*t)
                    && profile
                        .as_ref()
                        .map(|p| !p.immune_techniques.contains(*t))
                        .unwrap_or(true)
            })
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_provider::{ChatResponse, GenerateError};
    use crate::engine::context::EmotionalState;
    use crate::engine::store::MemoryStore;
    use async_trait::async_trait;

    struct MockGenerator;

    #[async_trait]
    impl TextGenerator for MockGenerator {
        async fn generate(
            &self,
            _messages: Vec<ChatMessage>,
            _options: &GenerateOptions,
        ) -> std::result::Result<ChatResponse, GenerateError> {
            Ok(ChatResponse {
                content: "I hear you, that sounds important.".to_string(),
                tokens_used: Some(12),
                model: "mock".to_string(),
            })
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate(
            &self,
            _messages: Vec<ChatMessage>,
            _options: &GenerateOptions,
        ) -> std::result::Result<ChatResponse, GenerateError> {
            Err(GenerateError::Transient("provider unavailable".to_string()))
        }
    }

    fn engine_with(generator: Arc<dyn TextGenerator>) -> InfluenceEngine {
        InfluenceEngine::new(
            Arc::new(StrategyRegistry::builtin()),
            generator,
            Arc::new(MemoryStore::new()),
        )
    }

    fn context() -> InfluenceContext {
        InfluenceContext::new("ai", "user")
            .with_level(10)
            .with_state(EmotionalState::Neutral)
    }

    #[tokio::test]
    async fn test_validation_subtle_scenario() {
        let engine = engine_with(Arc::new(MockGenerator));
        let context = context();

        let verdict = engine.can_execute_technique(
            Technique::Validation,
            Intensity::Subtle,
            &context,
        );
        assert!(verdict.allowed);

        let result = engine
            .execute_technique(
                Technique::Validation,
                Intensity::Subtle,
                &context,
                ExecutionPhase::Execution,
            )
            .await;

        assert!(result.success);
        assert_eq!(result.ethical_score, 100.0);
        assert!((50.0..=65.0).contains(&result.effectiveness), "got {}", result.effectiveness);
        assert!(result.has_side_effect("rapport"));
        assert!(!result.message.is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_rejection_on_immediate_repeat() {
        let engine = engine_with(Arc::new(MockGenerator));
        let context = context();

        let first = engine
            .execute_technique(
                Technique::Validation,
                Intensity::Subtle,
                &context,
                ExecutionPhase::Execution,
            )
            .await;
        assert!(first.success);

        let second = engine
            .execute_technique(
                Technique::Validation,
                Intensity::Subtle,
                &context,
                ExecutionPhase::Execution,
            )
            .await;

        assert!(!second.success);
        assert!(second.has_side_effect(TAG_COOLDOWN_ACTIVE));
        assert_eq!(second.ethical_score, 100.0);
        assert_eq!(second.effectiveness, 0.0);
    }

    #[tokio::test]
    async fn test_banned_technique_is_ethical_violation() {
        let engine = engine_with(Arc::new(MockGenerator));
        let mut limits = EthicalLimits::default();
        limits.banned.insert(Technique::FearAppeal);
        engine.set_limits("ai", limits);

        let context = InfluenceContext::new("ai", "user")
            .with_level(80)
            .with_state(EmotionalState::Anxious);
        let result = engine
            .execute_technique(
                Technique::FearAppeal,
                Intensity::Subtle,
                &context,
                ExecutionPhase::Execution,
            )
            .await;

        assert!(!result.success);
        assert!(result.has_side_effect(TAG_ETHICAL_VIOLATION));
    }

    #[tokio::test]
    async fn test_missing_strategy_tag() {
        let registry = StrategyRegistry::builtin();
        let only_validation: Vec<_> = registry
            .iter()
            .filter(|s| s.technique == Technique::Validation)
            .cloned()
            .collect();
        let engine = InfluenceEngine::new(
            Arc::new(StrategyRegistry::new(only_validation)),
            Arc::new(MockGenerator),
            Arc::new(MemoryStore::new()),
        );

        let result = engine
            .execute_technique(
                Technique::Mirroring,
                Intensity::Subtle,
                &context(),
                ExecutionPhase::Execution,
            )
            .await;

        assert!(!result.success);
        assert!(result.has_side_effect(TAG_STRATEGY_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_invalid_context_tag() {
        let engine = engine_with(Arc::new(MockGenerator));
        let context = InfluenceContext::new("ai", "user").with_level(0);

        let result = engine
            .execute_technique(
                Technique::Reciprocity,
                Intensity::Subtle,
                &context,
                ExecutionPhase::Execution,
            )
            .await;

        assert!(!result.success);
        assert!(result.has_side_effect(TAG_INVALID_CONTEXT));
    }

    #[tokio::test]
    async fn test_generation_failure_does_not_charge_cooldown() {
        let engine = engine_with(Arc::new(FailingGenerator));
        let context = context();

        let result = engine
            .execute_technique(
                Technique::Validation,
                Intensity::Subtle,
                &context,
                ExecutionPhase::Execution,
            )
            .await;

        assert!(!result.success);
        assert!(result.has_side_effect(TAG_EXECUTION_ERROR));

        // The gate must still be open for the next attempt
        let verdict = engine.can_execute_technique(
            Technique::Validation,
            Intensity::Subtle,
            &context,
        );
        assert!(verdict.allowed);
    }

    #[tokio::test]
    async fn test_store_failure_maps_to_execution_error() {
        let engine = InfluenceEngine::new(
            Arc::new(StrategyRegistry::builtin()),
            Arc::new(MockGenerator),
            Arc::new(MemoryStore::failing()),
        );

        let result = engine
            .execute_technique(
                Technique::Validation,
                Intensity::Subtle,
                &context(),
                ExecutionPhase::Execution,
            )
            .await;

        assert!(!result.success);
        assert!(result.has_side_effect(TAG_EXECUTION_ERROR));
    }

    #[tokio::test]
    async fn test_successful_execution_feeds_profile() {
        let engine = engine_with(Arc::new(MockGenerator));
        let context = context();

        engine
            .execute_technique(
                Technique::Validation,
                Intensity::Subtle,
                &context,
                ExecutionPhase::Execution,
            )
            .await;

        let profile = engine.get_profile("ai", "user").unwrap();
        let rating = &profile.technique_ratings[&Technique::Validation];
        assert_eq!(rating.attempts, 1);
        assert!(rating.average_effectiveness > 0.0);
    }

    #[tokio::test]
    async fn test_select_adaptive_returns_candidate() {
        let engine = engine_with(Arc::new(MockGenerator));
        let selected = engine.select_adaptive_technique(&context()).unwrap();

        assert_eq!(selected.technique, Technique::Validation);
        assert!(selected.confidence > 0.0);
    }

    #[tokio::test]
    async fn test_recommendation_present_on_effective_execution() {
        let engine = engine_with(Arc::new(MockGenerator));
        let result = engine
            .execute_technique(
                Technique::Validation,
                Intensity::Subtle,
                &context(),
                ExecutionPhase::Execution,
            )
            .await;

        assert!(result.success);
        // Validation at 53 effectiveness clears the >50 bar; next in
        // registration order is mirroring.
        assert_eq!(result.next_recommended, Some(Technique::Mirroring));
    }
}

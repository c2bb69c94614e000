use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

use crate::ai_provider::AIProviderClient;
use crate::config::Config;
use crate::engine::{
    EmotionalState, ExecutionPhase, InfluenceContext, InfluenceEngine, Intensity, JsonFileStore,
    ProfilePatch, StrategyRegistry, Technique,
};

#[derive(Parser)]
#[command(name = "aisway")]
#[command(about = "Adaptive influence engine for simulated personas")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute one technique against a counterpart
    Execute {
        #[arg(short, long)]
        actor: String,
        #[arg(short, long)]
        counterpart: String,
        #[arg(short, long)]
        technique: Technique,
        #[arg(short, long, default_value = "subtle")]
        intensity: Intensity,
        #[arg(short = 'l', long, default_value_t = 0)]
        relationship_level: u8,
        #[arg(short, long, default_value = "neutral")]
        emotional_state: EmotionalState,
        #[arg(short, long, default_value = "execution")]
        phase: ExecutionPhase,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Let the engine pick the best eligible technique
    Select {
        #[arg(short, long)]
        actor: String,
        #[arg(short, long)]
        counterpart: String,
        #[arg(short = 'l', long, default_value_t = 0)]
        relationship_level: u8,
        #[arg(short, long, default_value = "neutral")]
        emotional_state: EmotionalState,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Gate-check a technique without executing it
    Check {
        #[arg(short, long)]
        actor: String,
        #[arg(short, long)]
        counterpart: String,
        #[arg(short, long)]
        technique: Technique,
        #[arg(short, long, default_value = "subtle")]
        intensity: Intensity,
        #[arg(short = 'l', long, default_value_t = 0)]
        relationship_level: u8,
        #[arg(short, long, default_value = "neutral")]
        emotional_state: EmotionalState,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Execution statistics for an actor
    Stats {
        #[arg(short, long)]
        actor: String,
        #[arg(short, long)]
        technique: Option<Technique>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Recent execution rows for an actor
    History {
        #[arg(short, long)]
        actor: String,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Show or patch the susceptibility profile for a pair
    Profile {
        #[arg(short, long)]
        actor: String,
        #[arg(short, long)]
        counterpart: String,
        /// Vulnerability tags to merge into the profile
        #[arg(long)]
        add_vulnerability: Vec<String>,
        /// Replace the immune-technique set
        #[arg(long)]
        immune: Option<Vec<Technique>>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// List registered technique strategies
    Strategies,
}

fn build_engine(
    config: &Config,
    provider: Option<String>,
    model: Option<String>,
) -> Result<InfluenceEngine> {
    let ai_config = config.get_ai_config(provider, model)?;
    let store = JsonFileStore::new(config.history_file(), config.profiles_file())?;

    Ok(InfluenceEngine::new(
        Arc::new(StrategyRegistry::builtin()),
        Arc::new(AIProviderClient::new(ai_config)),
        Arc::new(store),
    )
    .with_timeouts(
        Duration::from_secs(config.engine.generation_timeout_secs),
        Duration::from_secs(config.engine.persistence_timeout_secs),
    ))
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_execute(
    actor: String,
    counterpart: String,
    technique: Technique,
    intensity: Intensity,
    relationship_level: u8,
    emotional_state: EmotionalState,
    phase: ExecutionPhase,
    provider: Option<String>,
    model: Option<String>,
    data_dir: Option<PathBuf>,
) -> Result<()> {
    let config = Config::new(data_dir)?;
    let engine = build_engine(&config, provider, model)?;
    engine.hydrate_actor(&actor).await?;

    let context = InfluenceContext::new(actor, counterpart)
        .with_level(relationship_level)
        .with_state(emotional_state);

    let result = engine.execute_technique(technique, intensity, &context, phase).await;

    if result.success {
        println!("{} {} @ {}", "Executed".green().bold(), result.technique, result.intensity);
        println!("Message: {}", result.message);
    } else {
        println!("{} {} @ {}", "Rejected".red().bold(), result.technique, result.intensity);
        println!("Reason: {}", result.message);
    }
    println!("Effectiveness: {:.1}", result.effectiveness);
    println!("Ethical score: {:.1}", result.ethical_score);
    println!("Side effects: {}", result.side_effects.join(", "));
    if let Some(next) = result.next_recommended {
        println!("Next recommended: {}", next);
    }

    Ok(())
}

pub async fn handle_select(
    actor: String,
    counterpart: String,
    relationship_level: u8,
    emotional_state: EmotionalState,
    data_dir: Option<PathBuf>,
) -> Result<()> {
    let config = Config::new(data_dir)?;
    let engine = build_engine(&config, None, None)?;
    engine.hydrate_actor(&actor).await?;

    let context = InfluenceContext::new(actor, counterpart)
        .with_level(relationship_level)
        .with_state(emotional_state);

    match engine.select_adaptive_technique(&context) {
        Some(selected) => {
            println!(
                "{} {} @ {} (confidence {:.2})",
                "Selected".green().bold(),
                selected.technique,
                selected.intensity,
                selected.confidence
            );
        }
        None => println!("{}", "No technique is currently eligible.".yellow()),
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_check(
    actor: String,
    counterpart: String,
    technique: Technique,
    intensity: Intensity,
    relationship_level: u8,
    emotional_state: EmotionalState,
    data_dir: Option<PathBuf>,
) -> Result<()> {
    let config = Config::new(data_dir)?;
    let engine = build_engine(&config, None, None)?;
    engine.hydrate_actor(&actor).await?;

    let context = InfluenceContext::new(actor, counterpart)
        .with_level(relationship_level)
        .with_state(emotional_state);

    let verdict = engine.can_execute_technique(technique, intensity, &context);
    if verdict.allowed {
        println!("{} {} @ {}", "Allowed".green().bold(), technique, intensity);
    } else {
        println!("{} {} @ {}", "Denied".red().bold(), technique, intensity);
        if let Some(reason) = verdict.reason {
            println!("Reason: {}", reason);
        }
    }

    Ok(())
}

pub async fn handle_stats(
    actor: String,
    technique: Option<Technique>,
    data_dir: Option<PathBuf>,
) -> Result<()> {
    let config = Config::new(data_dir)?;
    let engine = build_engine(&config, None, None)?;
    engine.hydrate_actor(&actor).await?;

    let stats = engine.get_statistics(&actor, technique);

    println!("Statistics for {}", stats.actor.bold());
    if let Some(technique) = stats.technique {
        println!("  Technique filter: {}", technique);
    }
    println!("  Executions: {}", stats.count);
    println!("  Avg effectiveness: {:.1}", stats.average_effectiveness);
    println!("  Avg ethical score: {:.1}", stats.average_ethical_score);
    println!("  Success rate: {:.1}%", stats.success_rate * 100.0);
    if !stats.top_side_effects.is_empty() {
        println!("  Top side effects:");
        for (tag, count) in &stats.top_side_effects {
            println!("    {} ({})", tag, count);
        }
    }
    if let Some(best) = stats.most_effective {
        println!("  Most effective technique: {}", best);
    }

    Ok(())
}

pub async fn handle_history(
    actor: String,
    limit: usize,
    data_dir: Option<PathBuf>,
) -> Result<()> {
    let config = Config::new(data_dir)?;
    let engine = build_engine(&config, None, None)?;

    let rows = engine.recent_history(&actor, limit).await?;
    if rows.is_empty() {
        println!("No executions recorded for {}.", actor);
        return Ok(());
    }

    println!("Recent executions for {} ({}):", actor.bold(), rows.len());
    for row in rows {
        let status = if row.success { "ok".green() } else { "fail".red() };
        println!(
            "  [{}] {} {} @ {} eff {:.0} eth {:.0}",
            status,
            row.executed_at.format("%Y-%m-%d %H:%M"),
            row.technique,
            row.intensity,
            row.effectiveness,
            row.ethical_score
        );
    }

    Ok(())
}

pub async fn handle_profile(
    actor: String,
    counterpart: String,
    add_vulnerability: Vec<String>,
    immune: Option<Vec<Technique>>,
    data_dir: Option<PathBuf>,
) -> Result<()> {
    let config = Config::new(data_dir)?;
    let engine = build_engine(&config, None, None)?;
    engine.hydrate_actor(&actor).await?;

    let profile = if !add_vulnerability.is_empty() || immune.is_some() {
        let patch = ProfilePatch {
            vulnerabilities: (!add_vulnerability.is_empty()).then_some(add_vulnerability),
            immune_techniques: immune,
        };
        engine.update_profile(&actor, &counterpart, patch).await
    } else {
        match engine.get_profile(&actor, &counterpart) {
            Some(profile) => profile,
            None => {
                println!("No profile recorded for {} / {}.", actor, counterpart);
                return Ok(());
            }
        }
    };

    println!("Profile {} / {}", profile.actor.bold(), profile.counterpart.bold());
    println!("  Susceptibility: {:.1}", profile.susceptibility);
    if !profile.technique_ratings.is_empty() {
        println!("  Technique ratings:");
        let mut ratings: Vec<_> = profile.technique_ratings.iter().collect();
        ratings.sort_by(|a, b| a.0.to_string().cmp(&b.0.to_string()));
        for (technique, rating) in ratings {
            println!(
                "    {} avg {:.1} over {} attempts",
                technique, rating.average_effectiveness, rating.attempts
            );
        }
    }
    if !profile.successful_techniques.is_empty() {
        let names: Vec<String> =
            profile.successful_techniques.iter().map(|t| t.to_string()).collect();
        println!("  Worked before: {}", names.join(", "));
    }
    if !profile.resisted_techniques.is_empty() {
        let names: Vec<String> =
            profile.resisted_techniques.iter().map(|t| t.to_string()).collect();
        println!("  Resisted: {}", names.join(", "));
    }
    if !profile.immune_techniques.is_empty() {
        let mut names: Vec<String> =
            profile.immune_techniques.iter().map(|t| t.to_string()).collect();
        names.sort();
        println!("  Immune to: {}", names.join(", "));
    }
    if !profile.vulnerabilities.is_empty() {
        let mut tags: Vec<String> = profile.vulnerabilities.iter().cloned().collect();
        tags.sort();
        println!("  Vulnerabilities: {}", tags.join(", "));
    }

    Ok(())
}

pub fn handle_strategies() {
    let registry = StrategyRegistry::builtin();

    println!("Registered strategies ({}):", registry.len());
    for strategy in registry.iter() {
        println!("  {}", strategy.technique.to_string().bold());
        println!(
            "    cooldown {} min, max {}/hour, min relationship {}",
            strategy.constraints.cooldown_minutes,
            strategy.constraints.max_uses_per_hour,
            strategy.requirements.min_relationship_level
        );
        if !strategy.requirements.required_states.is_empty() {
            let states: Vec<String> =
                strategy.requirements.required_states.iter().map(|s| s.to_string()).collect();
            println!("    requires state: {}", states.join(", "));
        }
        if !strategy.requirements.forbidden_states.is_empty() {
            let states: Vec<String> =
                strategy.requirements.forbidden_states.iter().map(|s| s.to_string()).collect();
            println!("    forbidden state: {}", states.join(", "));
        }
        if !strategy.constraints.incompatible_with.is_empty() {
            let names: Vec<String> =
                strategy.constraints.incompatible_with.iter().map(|t| t.to_string()).collect();
            println!("    incompatible with: {}", names.join(", "));
        }
    }
}

use crate::engine::context::InfluenceContext;
use crate::engine::history::UserProfile;
use crate::engine::strategy::{Intensity, Technique, TechniqueStrategy};

/// Fixed per-technique ethical penalty. Validation is free; the scale tops
/// out at 80 for the most severe technique.
fn technique_penalty(technique: Technique) -> f64 {
    match technique {
        Technique::Validation => 0.0,
        Technique::Mirroring => 10.0,
        Technique::Reciprocity => 15.0,
        Technique::SocialProof => 20.0,
        Technique::Authority => 30.0,
        Technique::Scarcity => 40.0,
        Technique::GuiltTrip => 60.0,
        Technique::FearAppeal => 80.0,
    }
}

fn intensity_penalty(intensity: Intensity) -> f64 {
    match intensity {
        Intensity::Subtle => 0.0,
        Intensity::Moderate => 10.0,
        Intensity::Medium => 20.0,
        Intensity::Aggressive => 40.0,
    }
}

/// Tags a technique leaves behind regardless of outcome.
fn technique_tags(technique: Technique) -> &'static [&'static str] {
    match technique {
        Technique::Validation => &["rapport", "comfort"],
        Technique::Mirroring => &["familiarity"],
        Technique::Reciprocity => &["obligation"],
        Technique::SocialProof => &["conformity"],
        Technique::Authority => &["deference"],
        Technique::Scarcity => &["urgency"],
        Technique::GuiltTrip => &["guilt", "discomfort"],
        Technique::FearAppeal => &["anxiety", "avoidance"],
    }
}

/// Context fit in [0,1]: 0.5 base, up to +0.3 for relationship headroom over
/// the strategy minimum, +0.2 flat when the current state is one the
/// strategy explicitly wants.
pub fn base_effectiveness(context: &InfluenceContext, strategy: &TechniqueStrategy) -> f64 {
    let mut base = 0.5;

    let excess =
        context.relationship_level.saturating_sub(strategy.requirements.min_relationship_level);
    base += 0.3 * (f64::from(excess) / 100.0).min(1.0);

    if strategy.requirements.required_states.contains(&context.emotional_state) {
        base += 0.2;
    }

    base.clamp(0.0, 1.0)
}

/// Final effectiveness in [0,100]: context fit scaled by the intensity
/// modifier, then nudged by what history says about this counterpart.
/// The historical adjustment is additive and bounded.
pub fn effectiveness(
    context: &InfluenceContext,
    strategy: &TechniqueStrategy,
    intensity: Intensity,
    profile: Option<&UserProfile>,
) -> f64 {
    let base = base_effectiveness(context, strategy);
    let raw = (base * strategy.modifier(intensity) * 100.0).min(100.0);

    let adjustment = profile
        .map(|p| historical_adjustment(p, strategy.technique))
        .unwrap_or(0.0);

    (raw + adjustment).clamp(0.0, 100.0)
}

fn historical_adjustment(profile: &UserProfile, technique: Technique) -> f64 {
    if profile.immune_techniques.contains(&technique) {
        return -30.0;
    }
    match profile.technique_ratings.get(&technique) {
        Some(rating) if rating.attempts > 0 => {
            ((rating.average_effectiveness - 50.0) / 50.0 * 15.0).clamp(-15.0, 15.0)
        }
        _ => 0.0,
    }
}

/// Inverse penalty metric in [0,100]; 100 only for the least-penalized
/// technique at subtle intensity.
pub fn ethical_score(technique: Technique, intensity: Intensity) -> f64 {
    (100.0 - technique_penalty(technique) - intensity_penalty(intensity)).max(0.0)
}

/// Deterministic side-effect tags from technique identity, intensity and
/// computed effectiveness.
pub fn side_effects(technique: Technique, intensity: Intensity, effectiveness: f64) -> Vec<String> {
    let mut tags: Vec<String> =
        technique_tags(technique).iter().map(|t| t.to_string()).collect();

    if intensity == Intensity::Aggressive {
        tags.push("resistance".to_string());
        tags.push("suspicion".to_string());
    }

    if effectiveness > 80.0 {
        tags.push("strong_influence".to_string());
    }

    tags
}

//! League-wide top-K award lists ranked by metric delta

use crate::config::{RankDirection, SuperlativeSlot, SuperlativesConfig};
use crate::models::{EntityInsight, EntityKind, Superlative};
use std::cmp::Ordering;

/// Rank every configured slot over a comparison's insights, in slot order.
///
/// Only entities with an available delta are eligible. Ties on delta go to
/// the larger absolute delta, then to the lexically smaller entity id.
pub fn rank(
    config: &SuperlativesConfig,
    players: &[EntityInsight],
    teams: &[EntityInsight],
) -> Vec<Superlative> {
    config
        .slots
        .iter()
        .flat_map(|slot| {
            let pool = match slot.metric.entity_kind() {
                EntityKind::Player => players,
                EntityKind::Team => teams,
            };
            rank_slot(slot, config.top_k, pool)
        })
        .collect()
}

pub fn rank_slot(
    slot: &SuperlativeSlot,
    top_k: usize,
    insights: &[EntityInsight],
) -> Vec<Superlative> {
    let kind = slot.metric.entity_kind();
    let mut eligible: Vec<(&EntityInsight, f64)> = insights
        .iter()
        .filter(|i| i.entity_type == kind)
        .filter_map(|i| {
            let delta = i.delta(slot.metric)?.available_delta()?;
            Some((i, delta))
        })
        .filter(|(_, delta)| !slot.positive_only || *delta > 0.0)
        .collect();

    eligible.sort_by(|(a, da), (b, db)| {
        compare(slot.direction, *da, *db).then_with(|| a.entity_id.cmp(&b.entity_id))
    });

    let award_name = slot.award_name();
    eligible
        .into_iter()
        .take(top_k)
        .enumerate()
        .map(|(i, (insight, delta))| Superlative {
            category: slot.category.clone(),
            subcategory: slot.metric,
            award_name: award_name.clone(),
            entity_id: insight.entity_id.clone(),
            entity_type: insight.entity_type,
            name: insight.name.clone(),
            position: insight.position.clone(),
            team: insight.team.clone(),
            value: delta,
            rank: i as u32 + 1,
            season: insight.season,
            week_from: insight.week_from,
            week_to: insight.week_to,
        })
        .collect()
}

/// Best first: primary order by direction, then larger magnitude
fn compare(direction: RankDirection, a: f64, b: f64) -> Ordering {
    let primary = match direction {
        RankDirection::Gainer => b.total_cmp(&a),
        RankDirection::Loser => a.total_cmp(&b),
    };
    primary.then_with(|| b.abs().total_cmp(&a.abs()))
}

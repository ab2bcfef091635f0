use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use tracing::debug;

use crate::models::{MediaFilter, RatingRecord, RecommendedItem, FAVORABLE_SCORE, TOP_SCORE};
use crate::tmdb::MetadataProvider;

pub const MAX_SEEDS: usize = 6;
pub const MAX_RECOMMENDATIONS: usize = 12;
const TOP_SEED_BOOST: i64 = 10;
const MAX_DISPLAY_SCORE: i64 = 99;

/// Random sample of favorably rated titles. Sampling is kept apart from the
/// provider calls so the RNG never lives across an await point.
pub fn pick_seeds<R: Rng + ?Sized>(
    ratings: &[RatingRecord],
    hint: MediaFilter,
    rng: &mut R,
) -> Vec<RatingRecord> {
    let favorites: Vec<&RatingRecord> = ratings
        .iter()
        .filter(|r| r.score >= FAVORABLE_SCORE)
        .filter(|r| r.kind().is_some_and(|k| hint.accepts(k)))
        .collect();

    favorites
        .choose_multiple(rng, MAX_SEEDS)
        .map(|r| (*r).clone())
        .collect()
}

pub fn display_score(vote_average: f64, seed_score: i64) -> i64 {
    let mut score = (vote_average * 10.0).floor() as i64;
    if seed_score == TOP_SCORE {
        score += TOP_SEED_BOOST;
    }
    score.min(MAX_DISPLAY_SCORE)
}

/// Queries each seed in turn and ranks what comes back. Titles the user
/// already rated or skipped, and titles already collected from an earlier
/// seed, are left out.
pub async fn assemble(
    provider: &dyn MetadataProvider,
    ratings: &[RatingRecord],
    skipped: &[String],
    seeds: &[RatingRecord],
) -> Vec<RecommendedItem> {
    let mut excluded: HashSet<&str> = ratings.iter().map(|r| r.title.as_str()).collect();
    excluded.extend(skipped.iter().map(String::as_str));

    let mut collected: HashSet<String> = HashSet::new();
    let mut recommendations = Vec::new();

    for seed in seeds {
        let (Some(tmdb_id), Some(kind)) = (seed.tmdb_id.filter(|id| *id > 0), seed.kind()) else {
            continue;
        };

        let items = provider
            .recommendations(kind, tmdb_id)
            .await
            .or_default_logged("recommendations");

        for item in items {
            let Some(title) = item.display_title().map(str::to_string) else {
                continue;
            };
            if excluded.contains(title.as_str()) || !collected.insert(title.clone()) {
                continue;
            }

            let vote_average = item.vote_average.unwrap_or(0.0);
            recommendations.push(RecommendedItem {
                id: item.id,
                score: display_score(vote_average, seed.score),
                because_of: seed.title.clone(),
                media_type: kind,
                poster_path: item.poster_path.clone(),
                overview: item.overview.clone().unwrap_or_default(),
                release_date: item.date().map(str::to_string),
                vote_average,
                title,
            });
        }
    }

    recommendations.sort_by(|a, b| b.score.cmp(&a.score));
    recommendations.truncate(MAX_RECOMMENDATIONS);
    debug!(seeds = seeds.len(), count = recommendations.len(), "Recommendations ranked");
    recommendations
}

//! Catalog pages, free-text search and watch-provider lookups, reshaped from
//! provider results and annotated with the caller's rating history.

use tracing::debug;

use crate::models::{CatalogItem, ItemStatus, MediaFilter, MediaKind, Provider};
use crate::ratings::RatingHistory;
use crate::tmdb::{MetadataProvider, TmdbItem, YearRange};

pub const PAGE_SIZE: usize = 20;
pub const DEFAULT_SEARCH_LIMIT: i64 = 12;
pub const MAX_SEARCH_LIMIT: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CatalogQuery {
    pub page: u32,
    pub filter: MediaFilter,
    pub years: YearRange,
}

pub async fn assemble_catalog(
    provider: &dyn MetadataProvider,
    history: &RatingHistory,
    query: &CatalogQuery,
) -> Vec<CatalogItem> {
    let page = query.page.max(1);

    match query.filter {
        MediaFilter::All => {
            let (movies, series) = tokio::join!(
                provider.discover(MediaKind::Movie, page, query.years),
                provider.discover(MediaKind::Series, page, query.years),
            );

            let mut items: Vec<CatalogItem> = movies
                .or_default_logged("discover movie")
                .into_iter()
                .filter_map(|item| annotate(item, Some(MediaKind::Movie), history))
                .chain(
                    series
                        .or_default_logged("discover tv")
                        .into_iter()
                        .filter_map(|item| annotate(item, Some(MediaKind::Series), history)),
                )
                .collect();

            items.sort_by(|a, b| b.popularity.total_cmp(&a.popularity));
            items.truncate(PAGE_SIZE);
            debug!(page, count = items.len(), "Assembled mixed catalog page");
            items
        }
        MediaFilter::Only(kind) => {
            let items: Vec<CatalogItem> = provider
                .discover(kind, page, query.years)
                .await
                .or_default_logged("discover")
                .into_iter()
                .filter_map(|item| annotate(item, Some(kind), history))
                .collect();
            debug!(page, kind = %kind, count = items.len(), "Assembled catalog page");
            items
        }
    }
}

pub fn clamp_search_limit(limit: Option<i64>) -> usize {
    limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT) as usize
}

/// An empty query never reaches the provider.
pub async fn search(
    provider: &dyn MetadataProvider,
    history: &RatingHistory,
    query: &str,
    filter: MediaFilter,
    limit: Option<i64>,
) -> Vec<CatalogItem> {
    let query = query.trim();
    if query.is_empty() {
        return Vec::new();
    }

    let limit = clamp_search_limit(limit);
    provider
        .search_multi(query)
        .await
        .or_default_logged("search")
        .into_iter()
        // people and other result kinds drop out here
        .filter(|item| item.kind().is_some_and(|k| filter.accepts(k)))
        .filter_map(|item| annotate(item, None, history))
        .take(limit)
        .collect()
}

pub async fn providers_for(
    provider: &dyn MetadataProvider,
    kind: MediaKind,
    id: i64,
    region: &str,
) -> Vec<Provider> {
    provider
        .watch_providers(kind, id)
        .await
        .map(|wp| wp.for_region(region))
        .or_default_logged("watch providers")
}

/// Items without artwork or a title are dropped. `kind` overrides the
/// item's own media type when the endpoint implies it.
fn annotate(item: TmdbItem, kind: Option<MediaKind>, history: &RatingHistory) -> Option<CatalogItem> {
    let media_type = kind.or_else(|| item.kind())?;
    let poster_path = item.artwork()?.to_string();
    let title = item.display_title()?.to_string();

    let my_score = history.score_for(&title);
    Some(CatalogItem {
        id: item.id,
        media_type,
        poster_path,
        overview: item.overview.clone().unwrap_or_default(),
        release_date: item.date().unwrap_or("N/A").to_string(),
        vote_average: item.vote_average.unwrap_or(0.0),
        popularity: item.popularity.unwrap_or(0.0),
        status: if my_score.is_some() { ItemStatus::Seen } else { ItemStatus::New },
        my_score: my_score.unwrap_or(0),
        title,
    })
}

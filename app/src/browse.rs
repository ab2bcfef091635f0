//! Client-side browsing state as an explicit state machine.
//!
//! [`BrowseState::apply`] takes an [`Event`] and returns the [`Effect`]s the
//! caller has to run. Every fetch carries a generation number; results that
//! arrive for an older generation are dropped, so a slow response can never
//! overwrite a newer one.

use std::time::Duration;

use crate::catalog::CatalogQuery;
use crate::models::{CatalogItem, MediaFilter, MediaKind, Provider, RecommendedItem, Vote};
use crate::tmdb::YearRange;

pub const YEAR_DEBOUNCE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Catalog,
    Recommendations,
}

/// A card in the grid, whichever endpoint it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowseItem {
    pub id: i64,
    pub title: String,
    pub media_type: MediaKind,
    pub poster_path: Option<String>,
    pub vote_average: f64,
    pub my_score: Option<i64>,
    pub match_score: Option<i64>,
    pub because_of: Option<String>,
}

impl From<CatalogItem> for BrowseItem {
    fn from(item: CatalogItem) -> Self {
        let my_score = Some(item.my_score).filter(|s| *s != 0);
        Self {
            id: item.id,
            title: item.title,
            media_type: item.media_type,
            poster_path: Some(item.poster_path),
            vote_average: item.vote_average,
            my_score,
            match_score: None,
            because_of: None,
        }
    }
}

impl From<RecommendedItem> for BrowseItem {
    fn from(item: RecommendedItem) -> Self {
        Self {
            id: item.id,
            title: item.title,
            media_type: item.media_type,
            poster_path: item.poster_path,
            vote_average: item.vote_average,
            my_score: None,
            match_score: Some(item.score),
            because_of: Some(item.because_of),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetailView {
    pub item: BrowseItem,
    /// `None` while the availability lookup is in flight.
    pub providers: Option<Vec<Provider>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SetMediaFilter(MediaFilter),
    SetYearRange(YearRange),
    DebounceElapsed(u64),
    SetSearchText(String),
    SubmitSearch,
    LoadMore,
    ShowRecommendations,
    ShowCatalog,
    ResultsArrived { generation: u64, items: Vec<BrowseItem> },
    OpenDetail { id: i64, media_type: MediaKind },
    ProvidersArrived { id: i64, media_type: MediaKind, providers: Vec<Provider> },
    CloseDetail,
    VoteSubmitted(Vote),
    VoteConfirmed { total: i64 },
    VoteFailed { id: i64, media_type: MediaKind, message: String },
    StatsArrived(i64),
    SessionChanged(bool),
    /// `generation` is set when the failure belongs to a list fetch.
    RequestFailed { generation: Option<u64>, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchCatalog { generation: u64, query: CatalogQuery },
    Search { generation: u64, query: String, filter: MediaFilter },
    FetchRecommendations { generation: u64, filter: MediaFilter },
    StartDebounce { token: u64, delay: Duration },
    FetchProviders { id: i64, media_type: MediaKind },
    SubmitVote { id: i64, title: String, media_type: MediaKind, vote: Vote },
    FetchStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingFetch {
    generation: u64,
    append: bool,
}

/// Score a card had before an optimistic vote, restored if the vote fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VoteRollback {
    id: i64,
    media_type: MediaKind,
    previous: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct BrowseState {
    pub items: Vec<BrowseItem>,
    pub page: u32,
    pub filter: MediaFilter,
    pub years: YearRange,
    pub search: String,
    pub mode: ViewMode,
    pub detail: Option<DetailView>,
    pub logged_in: bool,
    pub rated_count: i64,
    pub message: Option<String>,
    generation: u64,
    pending: Option<PendingFetch>,
    debounce_token: u64,
    debounce: Duration,
    rollback: Option<VoteRollback>,
}

impl Default for BrowseState {
    fn default() -> Self {
        Self::new(false)
    }
}

impl BrowseState {
    pub fn new(logged_in: bool) -> Self {
        Self {
            items: Vec::new(),
            page: 1,
            filter: MediaFilter::All,
            years: YearRange::default(),
            search: String::new(),
            mode: ViewMode::Catalog,
            detail: None,
            logged_in,
            rated_count: 0,
            message: None,
            generation: 0,
            pending: None,
            debounce_token: 0,
            debounce: YEAR_DEBOUNCE,
            rollback: None,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// First load: the catalog, plus the rating count for a session.
    pub fn start(&mut self) -> Vec<Effect> {
        let mut effects = vec![self.fetch(false)];
        if self.logged_in {
            effects.push(Effect::FetchStats);
        }
        effects
    }

    pub fn apply(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::SetMediaFilter(filter) => {
                self.filter = filter;
                self.search.clear();
                self.reset()
            }
            Event::SetYearRange(range) => {
                self.years = match (range.min, range.max) {
                    (Some(min), Some(max)) if min > max => YearRange { min: Some(max), max: Some(max) },
                    _ => range,
                };
                self.debounce_token += 1;
                vec![Effect::StartDebounce { token: self.debounce_token, delay: self.debounce }]
            }
            Event::DebounceElapsed(token) => {
                if token != self.debounce_token {
                    return Vec::new();
                }
                self.search.clear();
                self.reset()
            }
            Event::SetSearchText(text) => {
                let cleared = text.trim().is_empty() && !self.search.trim().is_empty();
                self.search = text;
                if cleared {
                    self.reset()
                } else {
                    Vec::new()
                }
            }
            Event::SubmitSearch => {
                self.mode = ViewMode::Catalog;
                self.reset()
            }
            Event::LoadMore => self.load_more(),
            Event::ShowRecommendations => {
                if !self.logged_in {
                    self.message = Some("Log in to get recommendations".to_string());
                    return Vec::new();
                }
                self.mode = ViewMode::Recommendations;
                self.search.clear();
                self.reset()
            }
            Event::ShowCatalog => {
                self.mode = ViewMode::Catalog;
                self.reset()
            }
            Event::ResultsArrived { generation, items } => {
                self.receive(generation, items);
                Vec::new()
            }
            Event::OpenDetail { id, media_type } => {
                let Some(item) = self.items.iter().find(|i| i.id == id && i.media_type == media_type) else {
                    return Vec::new();
                };
                self.detail = Some(DetailView { item: item.clone(), providers: None });
                vec![Effect::FetchProviders { id, media_type }]
            }
            Event::ProvidersArrived { id, media_type, providers } => {
                if let Some(detail) = self.detail.as_mut() {
                    if detail.item.id == id && detail.item.media_type == media_type {
                        detail.providers = Some(providers);
                    }
                }
                Vec::new()
            }
            Event::CloseDetail => {
                self.detail = None;
                Vec::new()
            }
            Event::VoteSubmitted(vote) => self.vote(vote),
            Event::VoteConfirmed { total } => {
                self.rated_count = total;
                self.detail = None;
                self.rollback = None;
                Vec::new()
            }
            Event::VoteFailed { id, media_type, message } => self.vote_failed(id, media_type, message),
            Event::StatsArrived(count) => {
                self.rated_count = count;
                Vec::new()
            }
            Event::SessionChanged(logged_in) => {
                self.logged_in = logged_in;
                if logged_in {
                    vec![Effect::FetchStats]
                } else {
                    self.rated_count = 0;
                    if self.mode == ViewMode::Recommendations {
                        self.mode = ViewMode::Catalog;
                        return self.reset();
                    }
                    Vec::new()
                }
            }
            Event::RequestFailed { generation, message } => {
                match generation {
                    Some(g) if g != self.generation => return Vec::new(),
                    Some(_) => self.pending = None,
                    None => {}
                }
                self.message = Some(message);
                Vec::new()
            }
        }
    }

    fn searching(&self) -> bool {
        self.mode == ViewMode::Catalog && !self.search.trim().is_empty()
    }

    fn reset(&mut self) -> Vec<Effect> {
        self.page = 1;
        vec![self.fetch(false)]
    }

    fn load_more(&mut self) -> Vec<Effect> {
        if self.searching() {
            return Vec::new();
        }
        if self.mode == ViewMode::Catalog {
            self.page += 1;
        }
        vec![self.fetch(true)]
    }

    fn fetch(&mut self, append: bool) -> Effect {
        self.generation += 1;
        self.pending = Some(PendingFetch { generation: self.generation, append });
        self.message = None;

        let generation = self.generation;
        match self.mode {
            ViewMode::Recommendations => Effect::FetchRecommendations { generation, filter: self.filter },
            ViewMode::Catalog if self.searching() => Effect::Search {
                generation,
                query: self.search.trim().to_string(),
                filter: self.filter,
            },
            ViewMode::Catalog => Effect::FetchCatalog {
                generation,
                query: CatalogQuery { page: self.page, filter: self.filter, years: self.years },
            },
        }
    }

    fn receive(&mut self, generation: u64, items: Vec<BrowseItem>) {
        let Some(pending) = self.pending.filter(|p| p.generation == generation) else {
            return;
        };
        self.pending = None;

        if !pending.append {
            self.items = items;
            return;
        }
        for item in items {
            let duplicate = self
                .items
                .iter()
                .any(|i| i.id == item.id && i.media_type == item.media_type);
            if !duplicate {
                self.items.push(item);
            }
        }
    }

    fn vote(&mut self, vote: Vote) -> Vec<Effect> {
        if !self.logged_in {
            self.message = Some("Log in to rate titles".to_string());
            return Vec::new();
        }
        let Some(detail) = self.detail.as_mut() else {
            return Vec::new();
        };

        let score = vote.score();
        let previous = detail.item.my_score;
        if previous.is_none() {
            self.rated_count += 1;
        }
        detail.item.my_score = Some(score);

        let (id, media_type, title) = (detail.item.id, detail.item.media_type, detail.item.title.clone());
        self.rollback = Some(VoteRollback { id, media_type, previous });
        if let Some(card) = self.items.iter_mut().find(|i| i.id == id && i.media_type == media_type) {
            card.my_score = Some(score);
        }

        vec![Effect::SubmitVote { id, title, media_type, vote }]
    }

    /// Undoes the optimistic score and asks the store for the real count.
    fn vote_failed(&mut self, id: i64, media_type: MediaKind, message: String) -> Vec<Effect> {
        if let Some(rollback) = self.rollback.take().filter(|r| r.id == id && r.media_type == media_type) {
            if rollback.previous.is_none() {
                self.rated_count = (self.rated_count - 1).max(0);
            }
            if let Some(card) = self.items.iter_mut().find(|i| i.id == id && i.media_type == media_type) {
                card.my_score = rollback.previous;
            }
        }
        self.detail = None;
        self.message = Some(message);
        if self.logged_in {
            vec![Effect::FetchStats]
        } else {
            Vec::new()
        }
    }
}

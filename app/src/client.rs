use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::browse::{BrowseItem, BrowseState, Effect, Event};
use crate::catalog::CatalogQuery;
use crate::models::{CatalogItem, MediaFilter, MediaKind, Provider, RecommendedItem, Vote};

/// The JSON API as seen from a browsing client.
#[async_trait]
pub trait BrowseApi: Send + Sync {
    async fn catalog(&self, query: &CatalogQuery) -> anyhow::Result<Vec<CatalogItem>>;

    async fn search(&self, query: &str, filter: MediaFilter) -> anyhow::Result<Vec<CatalogItem>>;

    async fn recommendations(&self, filter: MediaFilter) -> anyhow::Result<Vec<RecommendedItem>>;

    async fn providers(&self, kind: MediaKind, id: i64) -> anyhow::Result<Vec<Provider>>;

    /// Returns the caller's total rating count after the vote.
    async fn rate(&self, id: i64, title: &str, kind: MediaKind, vote: Vote) -> anyhow::Result<i64>;

    async fn stats(&self) -> anyhow::Result<i64>;
}

#[derive(Debug, Clone)]
pub struct HttpBrowseApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize)]
struct RatePayload<'a> {
    id: i64,
    title: &'a str,
    media_type: MediaKind,
    rating_type: &'a str,
}

#[derive(Deserialize)]
struct RateReply {
    total_ratings: i64,
}

#[derive(Deserialize)]
struct StatsReply {
    count: i64,
}

#[derive(Deserialize)]
struct ErrorReply {
    error: String,
}

impl HttpBrowseApi {
    pub fn new(base_url: &str, token: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> anyhow::Result<T> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorReply>()
                .await
                .map(|e| e.error)
                .unwrap_or_else(|_| status.to_string());
            anyhow::bail!("{}", message);
        }
        Ok(response.json::<T>().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> anyhow::Result<T> {
        debug!(path = %path, "API request");
        let response = self.request(reqwest::Method::GET, path).query(params).send().await?;
        Self::read(response).await
    }
}

#[async_trait]
impl BrowseApi for HttpBrowseApi {
    async fn catalog(&self, query: &CatalogQuery) -> anyhow::Result<Vec<CatalogItem>> {
        let mut params = vec![
            ("page", query.page.to_string()),
            ("type", query.filter.as_str().to_string()),
        ];
        if let Some(min) = query.years.min {
            params.push(("min_year", min.to_string()));
        }
        if let Some(max) = query.years.max {
            params.push(("max_year", max.to_string()));
        }
        self.get("/api/catalog", &params).await
    }

    async fn search(&self, query: &str, filter: MediaFilter) -> anyhow::Result<Vec<CatalogItem>> {
        let params = [("q", query.to_string()), ("type", filter.as_str().to_string())];
        self.get("/api/search", &params).await
    }

    async fn recommendations(&self, filter: MediaFilter) -> anyhow::Result<Vec<RecommendedItem>> {
        self.get("/api/recommend", &[("type", filter.as_str().to_string())]).await
    }

    async fn providers(&self, kind: MediaKind, id: i64) -> anyhow::Result<Vec<Provider>> {
        let params = [("id", id.to_string()), ("type", kind.as_str().to_string())];
        self.get("/api/providers", &params).await
    }

    async fn rate(&self, id: i64, title: &str, kind: MediaKind, vote: Vote) -> anyhow::Result<i64> {
        let payload = RatePayload { id, title, media_type: kind, rating_type: vote.label() };
        let response = self
            .request(reqwest::Method::POST, "/api/rate")
            .json(&payload)
            .send()
            .await?;
        let reply: RateReply = Self::read(response).await?;
        Ok(reply.total_ratings)
    }

    async fn stats(&self) -> anyhow::Result<i64> {
        let reply: StatsReply = self.get("/api/stats", &[]).await?;
        Ok(reply.count)
    }
}

/// Runs a [`BrowseState`] against a [`BrowseApi`]. Each effect becomes a
/// task that reports back with exactly one event.
pub struct BrowseDriver<A> {
    api: Arc<A>,
    state: BrowseState,
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
    in_flight: usize,
}

impl<A: BrowseApi + 'static> BrowseDriver<A> {
    pub fn new(api: A, state: BrowseState) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            api: Arc::new(api),
            state,
            tx,
            rx,
            in_flight: 0,
        }
    }

    pub fn state(&self) -> &BrowseState {
        &self.state
    }

    pub fn start(&mut self) {
        let effects = self.state.start();
        self.spawn_all(effects);
    }

    pub fn dispatch(&mut self, event: Event) {
        let effects = self.state.apply(event);
        self.spawn_all(effects);
    }

    /// Feeds completed effects back into the state until nothing is left in
    /// flight.
    pub async fn settle(&mut self) {
        while self.in_flight > 0 {
            let Some(event) = self.rx.recv().await else {
                break;
            };
            self.in_flight -= 1;
            self.dispatch(event);
        }
    }

    fn spawn_all(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            self.in_flight += 1;
            let api = Arc::clone(&self.api);
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let event = run_effect(api.as_ref(), effect).await;
                // the receiver lives as long as the driver
                let _ = tx.send(event);
            });
        }
    }
}

async fn run_effect<A: BrowseApi + ?Sized>(api: &A, effect: Effect) -> Event {
    match effect {
        Effect::FetchCatalog { generation, query } => {
            list_result(generation, api.catalog(&query).await)
        }
        Effect::Search { generation, query, filter } => {
            list_result(generation, api.search(&query, filter).await)
        }
        Effect::FetchRecommendations { generation, filter } => {
            list_result(generation, api.recommendations(filter).await)
        }
        Effect::StartDebounce { token, delay } => {
            tokio::time::sleep(delay).await;
            Event::DebounceElapsed(token)
        }
        Effect::FetchProviders { id, media_type } => {
            let providers = match api.providers(media_type, id).await {
                Ok(providers) => providers,
                Err(e) => {
                    warn!(id, error = %e, "Provider lookup failed");
                    Vec::new()
                }
            };
            Event::ProvidersArrived { id, media_type, providers }
        }
        Effect::SubmitVote { id, title, media_type, vote } => {
            match api.rate(id, &title, media_type, vote).await {
                Ok(total) => Event::VoteConfirmed { total },
                Err(e) => {
                    warn!(id, error = %e, "Vote failed");
                    Event::VoteFailed { id, media_type, message: format!("Vote failed: {}", e) }
                }
            }
        }
        Effect::FetchStats => match api.stats().await {
            Ok(count) => Event::StatsArrived(count),
            Err(e) => Event::RequestFailed { generation: None, message: e.to_string() },
        },
    }
}

fn list_result<T: Into<BrowseItem>>(generation: u64, result: anyhow::Result<Vec<T>>) -> Event {
    match result {
        Ok(items) => Event::ResultsArrived {
            generation,
            items: items.into_iter().map(Into::into).collect(),
        },
        Err(e) => Event::RequestFailed { generation: Some(generation), message: e.to_string() },
    }
}

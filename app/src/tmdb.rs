use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{AvailabilityKind, MediaKind, Provider};

const MIN_VOTE_COUNT: &str = "100";

/// Outcome of a provider call. Callers treat anything but `Found` as "no
/// data", but can still tell an empty answer from an unreachable provider.
#[derive(Debug, Clone, PartialEq)]
pub enum Upstream<T> {
    Found(T),
    Empty,
    Failed(String),
}

impl<T> Upstream<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Upstream::Found(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Upstream::Failed(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Upstream<U> {
        match self {
            Upstream::Found(v) => Upstream::Found(f(v)),
            Upstream::Empty => Upstream::Empty,
            Upstream::Failed(reason) => Upstream::Failed(reason),
        }
    }
}

impl<T: Default> Upstream<T> {
    /// Collapses the outcome to data, logging a provider failure.
    pub fn or_default_logged(self, what: &str) -> T {
        match self {
            Upstream::Found(v) => v,
            Upstream::Empty => T::default(),
            Upstream::Failed(reason) => {
                warn!(call = what, reason = %reason, "metadata provider unavailable");
                T::default()
            }
        }
    }
}

/// Inclusive release-year bounds for discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct YearRange {
    pub min: Option<i32>,
    pub max: Option<i32>,
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn discover(&self, kind: MediaKind, page: u32, years: YearRange) -> Upstream<Vec<TmdbItem>>;

    async fn search_multi(&self, query: &str) -> Upstream<Vec<TmdbItem>>;

    async fn recommendations(&self, kind: MediaKind, id: i64) -> Upstream<Vec<TmdbItem>>;

    async fn details(&self, kind: MediaKind, id: i64) -> Upstream<TmdbItem>;

    async fn watch_providers(&self, kind: MediaKind, id: i64) -> Upstream<WatchProviders>;
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    api_key: String,
    base_url: String,
    language: String,
}

impl TmdbClient {
    pub fn new(api_key: &str, base_url: &str, language: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            language: language.to_string(),
        })
    }

    /// v4 read tokens go in the Authorization header, v3 keys in the query.
    fn bearer_token(&self) -> Option<String> {
        if self.api_key.starts_with("Bearer ") {
            Some(self.api_key.clone())
        } else if self.api_key.starts_with("eyJ") {
            Some(format!("Bearer {}", self.api_key))
        } else {
            None
        }
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Upstream<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(endpoint = %endpoint, "TMDB request");

        let mut request = self.client.get(&url);
        match self.bearer_token() {
            Some(token) => request = request.header("Authorization", token),
            None => request = request.query(&[("api_key", self.api_key.as_str())]),
        }

        let response = match request.query(params).send().await {
            Ok(r) => r,
            Err(e) => return Upstream::Failed(format!("transport error: {}", e)),
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Upstream::Empty;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Upstream::Failed(format!("TMDB returned {}: {}", status, body));
        }

        match response.json::<T>().await {
            Ok(v) => Upstream::Found(v),
            Err(e) => Upstream::Failed(format!("malformed TMDB body: {}", e)),
        }
    }

    async fn fetch_results(&self, endpoint: &str, params: &[(&str, String)]) -> Upstream<Vec<TmdbItem>> {
        match self.fetch_json::<ResultsPage>(endpoint, params).await {
            Upstream::Found(page) if page.results.is_empty() => Upstream::Empty,
            other => other.map(|page| page.results),
        }
    }

    fn with_language<'a>(&self, mut params: Vec<(&'a str, String)>) -> Vec<(&'a str, String)> {
        params.push(("language", self.language.clone()));
        params
    }
}

#[async_trait]
impl MetadataProvider for TmdbClient {
    async fn discover(&self, kind: MediaKind, page: u32, years: YearRange) -> Upstream<Vec<TmdbItem>> {
        let endpoint = format!("/discover/{}", kind.as_str());
        let params = self.with_language(discover_params(kind, page, years));
        let outcome = self.fetch_results(&endpoint, &params).await;
        outcome.map(|items| {
            items
                .into_iter()
                .map(|mut item| {
                    item.media_type = Some(kind.as_str().to_string());
                    item
                })
                .collect()
        })
    }

    async fn search_multi(&self, query: &str) -> Upstream<Vec<TmdbItem>> {
        let params = self.with_language(vec![
            ("query", query.to_string()),
            ("include_adult", "false".to_string()),
            ("page", "1".to_string()),
        ]);
        self.fetch_results("/search/multi", &params).await
    }

    async fn recommendations(&self, kind: MediaKind, id: i64) -> Upstream<Vec<TmdbItem>> {
        let endpoint = format!("/{}/{}/recommendations", kind.as_str(), id);
        let params = self.with_language(Vec::new());
        self.fetch_results(&endpoint, &params).await
    }

    async fn details(&self, kind: MediaKind, id: i64) -> Upstream<TmdbItem> {
        let endpoint = format!("/{}/{}", kind.as_str(), id);
        let params = self.with_language(Vec::new());
        self.fetch_json::<TmdbItem>(&endpoint, &params).await.map(|mut item| {
            item.media_type = Some(kind.as_str().to_string());
            item
        })
    }

    async fn watch_providers(&self, kind: MediaKind, id: i64) -> Upstream<WatchProviders> {
        let endpoint = format!("/{}/{}/watch/providers", kind.as_str(), id);
        self.fetch_json(&endpoint, &[]).await
    }
}

fn discover_params(kind: MediaKind, page: u32, years: YearRange) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("page", page.max(1).to_string()),
        ("sort_by", "popularity.desc".to_string()),
        ("include_adult", "false".to_string()),
        ("vote_count.gte", MIN_VOTE_COUNT.to_string()),
    ];

    let (gte, lte) = match kind {
        MediaKind::Movie => ("primary_release_date.gte", "primary_release_date.lte"),
        MediaKind::Series => ("first_air_date.gte", "first_air_date.lte"),
    };
    if let Some(min) = years.min {
        params.push((gte, format!("{}-01-01", min)));
    }
    if let Some(max) = years.max {
        params.push((lte, format!("{}-12-31", max)));
    }
    params
}

#[derive(Debug, Clone, Deserialize)]
struct ResultsPage {
    #[serde(default)]
    results: Vec<TmdbItem>,
}

/// A movie or series as TMDB returns it in list endpoints.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TmdbItem {
    pub id: i64,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub first_air_date: Option<String>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub popularity: Option<f64>,
}

impl TmdbItem {
    /// Movies carry `title`, series carry `name`.
    pub fn display_title(&self) -> Option<&str> {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or(self.name.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn kind(&self) -> Option<MediaKind> {
        self.media_type.as_deref().and_then(|m| m.parse().ok())
    }

    pub fn artwork(&self) -> Option<&str> {
        self.poster_path.as_deref().filter(|p| !p.is_empty())
    }

    pub fn date(&self) -> Option<&str> {
        self.release_date
            .as_deref()
            .filter(|d| !d.is_empty())
            .or(self.first_air_date.as_deref().filter(|d| !d.is_empty()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WatchProviders {
    #[serde(default)]
    pub results: HashMap<String, RegionProviders>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RegionProviders {
    #[serde(default)]
    pub flatrate: Vec<ProviderEntry>,
    #[serde(default)]
    pub free: Vec<ProviderEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderEntry {
    pub provider_name: String,
    #[serde(default)]
    pub logo_path: Option<String>,
}

impl WatchProviders {
    /// Streaming first, then free; a provider listed under both appears once.
    pub fn for_region(&self, region: &str) -> Vec<Provider> {
        let Some(entry) = self.results.get(&region.to_uppercase()) else {
            return Vec::new();
        };

        let mut seen_logos = HashSet::new();
        let mut providers = Vec::new();
        let lists = [
            (&entry.flatrate, AvailabilityKind::Streaming),
            (&entry.free, AvailabilityKind::Free),
        ];
        for (list, kind) in lists {
            for p in list {
                let logo = p.logo_path.clone().unwrap_or_default();
                if seen_logos.insert(logo.clone()) {
                    providers.push(Provider {
                        name: p.provider_name.clone(),
                        logo,
                        kind,
                    });
                }
            }
        }
        providers
    }
}

pub fn poster_url(path: Option<&str>, size: &str) -> Option<String> {
    path.map(|p| format!("https://image.tmdb.org/t/p/{}{}", size, p))
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    pub(crate) fn item(id: i64, title: &str, popularity: f64) -> TmdbItem {
        TmdbItem {
            id,
            title: Some(title.to_string()),
            poster_path: Some(format!("/p{}.jpg", id)),
            overview: Some(format!("About {}", title)),
            release_date: Some("2021-09-15".to_string()),
            vote_average: Some(7.0),
            popularity: Some(popularity),
            ..Default::default()
        }
    }

    /// In-memory provider that records every call it receives.
    #[derive(Default)]
    pub(crate) struct FakeProvider {
        pub movies: Vec<TmdbItem>,
        pub series: Vec<TmdbItem>,
        pub search: Vec<TmdbItem>,
        pub recommended: HashMap<i64, Vec<TmdbItem>>,
        pub providers: WatchProviders,
        pub fail: bool,
        pub log: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        pub(crate) fn calls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn answer<T>(&self, call: String, value: T, empty: bool) -> Upstream<T> {
            self.log.lock().unwrap().push(call);
            if self.fail {
                Upstream::Failed("fake outage".to_string())
            } else if empty {
                Upstream::Empty
            } else {
                Upstream::Found(value)
            }
        }
    }

    #[async_trait]
    impl MetadataProvider for FakeProvider {
        async fn discover(&self, kind: MediaKind, page: u32, _years: YearRange) -> Upstream<Vec<TmdbItem>> {
            let items = match kind {
                MediaKind::Movie => self.movies.clone(),
                MediaKind::Series => self.series.clone(),
            };
            let empty = items.is_empty();
            self.answer(format!("discover {} {}", kind, page), items, empty)
        }

        async fn search_multi(&self, query: &str) -> Upstream<Vec<TmdbItem>> {
            let empty = self.search.is_empty();
            self.answer(format!("search {}", query), self.search.clone(), empty)
        }

        async fn recommendations(&self, kind: MediaKind, id: i64) -> Upstream<Vec<TmdbItem>> {
            let items = self.recommended.get(&id).cloned().unwrap_or_default();
            let empty = items.is_empty();
            self.answer(format!("recommendations {} {}", kind, id), items, empty)
        }

        async fn details(&self, kind: MediaKind, id: i64) -> Upstream<TmdbItem> {
            let found = self
                .movies
                .iter()
                .chain(&self.series)
                .chain(&self.search)
                .find(|i| i.id == id)
                .cloned();
            let empty = found.is_none();
            self.answer(format!("details {} {}", kind, id), found.unwrap_or_default(), empty)
        }

        async fn watch_providers(&self, kind: MediaKind, id: i64) -> Upstream<WatchProviders> {
            self.answer(format!("providers {} {}", kind, id), self.providers.clone(), false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> TmdbClient {
        TmdbClient::new("test-key", &server.uri(), "es-ES").unwrap()
    }

    #[tokio::test]
    async fn discover_injects_key_language_and_year_bounds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/discover/movie"))
            .and(query_param("api_key", "test-key"))
            .and(query_param("language", "es-ES"))
            .and(query_param("sort_by", "popularity.desc"))
            .and(query_param("primary_release_date.gte", "1990-01-01"))
            .and(query_param("primary_release_date.lte", "2000-12-31"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page": 2,
                "results": [
                    {"id": 603, "title": "The Matrix", "poster_path": "/m.jpg", "popularity": 80.0}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let years = YearRange { min: Some(1990), max: Some(2000) };
        let items = client_for(&server)
            .discover(MediaKind::Movie, 2, years)
            .await
            .into_option()
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].display_title(), Some("The Matrix"));
        assert_eq!(items[0].kind(), Some(MediaKind::Movie));
    }

    #[tokio::test]
    async fn series_discovery_uses_air_date_bounds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/discover/tv"))
            .and(query_param("first_air_date.gte", "2010-01-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": 1399, "name": "Game of Thrones", "poster_path": "/g.jpg"}]
            })))
            .mount(&server)
            .await;

        let years = YearRange { min: Some(2010), max: None };
        let items = client_for(&server)
            .discover(MediaKind::Series, 1, years)
            .await
            .into_option()
            .unwrap();
        assert_eq!(items[0].display_title(), Some("Game of Thrones"));
        assert_eq!(items[0].media_type.as_deref(), Some("tv"));
    }

    #[tokio::test]
    async fn server_error_is_reported_as_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let outcome = client_for(&server).search_multi("dune").await;
        assert!(outcome.is_failed());
        assert_eq!(outcome.or_default_logged("search"), Vec::<TmdbItem>::new());
    }

    #[tokio::test]
    async fn not_found_and_empty_results_are_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/movie/1/recommendations"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/movie/2/recommendations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.recommendations(MediaKind::Movie, 1).await, Upstream::Empty);
        assert_eq!(client.recommendations(MediaKind::Movie, 2).await, Upstream::Empty);
    }

    #[tokio::test]
    async fn unreachable_provider_is_failed() {
        let client = TmdbClient::new("k", "http://127.0.0.1:9", "es-ES").unwrap();
        assert!(client.search_multi("dune").await.is_failed());
    }

    #[tokio::test]
    async fn bearer_tokens_go_in_the_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/movie/438631/watch/providers"))
            .and(wiremock::matchers::header("Authorization", "Bearer eyJabc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": {"ES": {"flatrate": [{"provider_name": "Max", "logo_path": "/max.png"}]}}
            })))
            .mount(&server)
            .await;

        let client = TmdbClient::new("eyJabc", &server.uri(), "es-ES").unwrap();
        let providers = client
            .watch_providers(MediaKind::Movie, 438631)
            .await
            .into_option()
            .unwrap()
            .for_region("es");
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].name, "Max");
    }

    #[tokio::test]
    async fn details_are_tagged_with_the_requested_kind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tv/70523"))
            .and(query_param("language", "es-ES"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 70523, "name": "Dark", "poster_path": "/d.jpg", "first_air_date": "2017-12-01"
            })))
            .mount(&server)
            .await;

        let item = client_for(&server)
            .details(MediaKind::Series, 70523)
            .await
            .into_option()
            .unwrap();
        assert_eq!(item.kind(), Some(MediaKind::Series));
        assert_eq!(item.date(), Some("2017-12-01"));
    }

    #[test]
    fn region_providers_dedupe_by_logo_streaming_first() {
        let raw = json!({
            "results": {
                "ES": {
                    "flatrate": [
                        {"provider_name": "Netflix", "logo_path": "/n.png"},
                        {"provider_name": "Filmin", "logo_path": "/f.png"}
                    ],
                    "free": [
                        {"provider_name": "Netflix Free", "logo_path": "/n.png"},
                        {"provider_name": "RTVE", "logo_path": "/r.png"}
                    ],
                    "rent": [{"provider_name": "Apple TV", "logo_path": "/a.png"}]
                },
                "US": {"flatrate": [{"provider_name": "Hulu", "logo_path": "/h.png"}]}
            }
        });
        let wp: WatchProviders = serde_json::from_value(raw).unwrap();
        let out = wp.for_region("ES");

        let names: Vec<_> = out.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Netflix", "Filmin", "RTVE"]);
        assert_eq!(out[2].kind, AvailabilityKind::Free);
        assert!(wp.for_region("FR").is_empty());
    }

    #[test]
    fn display_title_prefers_title_then_name() {
        let movie = TmdbItem { id: 1, title: Some(" Dune ".into()), ..Default::default() };
        let show = TmdbItem { id: 2, title: Some("".into()), name: Some("Dark".into()), ..Default::default() };
        let nothing = TmdbItem { id: 3, ..Default::default() };
        assert_eq!(movie.display_title(), Some("Dune"));
        assert_eq!(show.display_title(), Some("Dark"));
        assert_eq!(nothing.display_title(), None);
    }
}

use axum::{
    async_trait,
    extract::{FromRequest, Query, Request, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::{
    auth::{CurrentUser, MaybeUser, SESSION_COOKIE},
    catalog::{self, CatalogQuery},
    error::{AppError, AppResult},
    models::{
        CatalogItem, MediaFilter, MediaKind, NewRating, ProfileStats, Provider, RatingRecord,
        RecommendedItem, Vote,
    },
    ratings::{ImportSummary, RatingHistory},
    recommend,
    tmdb::YearRange,
    AppState,
};

const REGION_HEADER: &str = "cf-ipcountry";

/// JSON body whose rejections answer 400 with the usual error body.
struct JsonBody<T>(T);

#[async_trait]
impl<T> FromRequest<AppState> for JsonBody<T>
where
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(AppError::BadRequest(rejection.body_text())),
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/catalog", get(get_catalog))
        .route("/search", get(search))
        .route("/recommend", get(get_recommendations))
        .route("/providers", get(get_providers))
        .route("/rate", post(rate))
        .route("/skip", post(skip))
        .route("/stats", get(get_stats))
        .route("/profile", get(get_profile))
        .route("/ratings/import", post(import_ratings))
        .route("/ratings/export", get(export_ratings))
        .route("/skipped/import", post(import_skipped))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

/// Rating history for annotation; anonymous visitors have none.
pub(crate) async fn history_for(state: &AppState, user: &MaybeUser) -> AppResult<RatingHistory> {
    match &user.0 {
        Some(session) => Ok(RatingHistory::from_records(&state.ratings.list(session.user_id).await?)),
        None => Ok(RatingHistory::default()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CatalogParams {
    pub page: Option<u32>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
}

impl CatalogParams {
    pub fn to_query(&self) -> CatalogQuery {
        let years = match (self.min_year, self.max_year) {
            (Some(min), Some(max)) if min > max => YearRange { min: Some(max), max: Some(min) },
            (min, max) => YearRange { min, max },
        };
        CatalogQuery {
            page: self.page.unwrap_or(1).max(1),
            filter: MediaFilter::parse(self.media_type.as_deref()),
            years,
        }
    }
}

async fn get_catalog(
    State(state): State<AppState>,
    user: MaybeUser,
    Query(params): Query<CatalogParams>,
) -> AppResult<Json<Vec<CatalogItem>>> {
    let history = history_for(&state, &user).await?;
    let items = catalog::assemble_catalog(state.tmdb.as_ref(), &history, &params.to_query()).await;
    Ok(Json(items))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(alias = "query")]
    q: Option<String>,
    #[serde(rename = "type")]
    media_type: Option<String>,
    limit: Option<i64>,
}

async fn search(
    State(state): State<AppState>,
    user: MaybeUser,
    Query(params): Query<SearchParams>,
) -> AppResult<Json<Vec<CatalogItem>>> {
    let query = params.q.unwrap_or_default();
    if query.trim().is_empty() {
        return Ok(Json(Vec::new()));
    }

    let history = history_for(&state, &user).await?;
    let items = catalog::search(
        state.tmdb.as_ref(),
        &history,
        &query,
        MediaFilter::parse(params.media_type.as_deref()),
        params.limit,
    )
    .await;
    Ok(Json(items))
}

#[derive(Debug, Deserialize)]
struct RecommendParams {
    #[serde(rename = "type")]
    media_type: Option<String>,
}

async fn get_recommendations(
    State(state): State<AppState>,
    MaybeUser(session): MaybeUser,
    Query(params): Query<RecommendParams>,
) -> AppResult<Json<Vec<RecommendedItem>>> {
    let Some(session) = session else {
        return Ok(Json(Vec::new()));
    };

    let ratings = state.ratings.list(session.user_id).await?;
    let skipped = state.ratings.skipped_titles(session.user_id).await?;
    let seeds = {
        let mut rng = rand::thread_rng();
        recommend::pick_seeds(&ratings, MediaFilter::parse(params.media_type.as_deref()), &mut rng)
    };

    let items = recommend::assemble(state.tmdb.as_ref(), &ratings, &skipped, &seeds).await;
    Ok(Json(items))
}

#[derive(Debug, Deserialize)]
struct ProvidersParams {
    id: i64,
    #[serde(rename = "type")]
    media_type: Option<String>,
    region: Option<String>,
}

async fn get_providers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ProvidersParams>,
) -> AppResult<Json<Vec<Provider>>> {
    let kind = parse_kind(params.media_type.as_deref())?;
    let region = params
        .region
        .filter(|r| !r.trim().is_empty())
        .or_else(|| {
            headers
                .get(REGION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| state.region.clone());

    let providers = catalog::providers_for(state.tmdb.as_ref(), kind, params.id, region.trim()).await;
    Ok(Json(providers))
}

/// Missing media type means movie; anything unknown is rejected.
fn parse_kind(raw: Option<&str>) -> AppResult<MediaKind> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(MediaKind::Movie),
        Some(raw) => raw.parse().map_err(AppError::BadRequest),
    }
}

#[derive(Debug, Deserialize)]
struct RateRequest {
    #[serde(default, deserialize_with = "lenient_id")]
    id: Option<i64>,
    title: Option<String>,
    media_type: Option<String>,
    rating_type: Option<String>,
}

/// Accepts a number or a numeric string. Anything else, and ids of zero or
/// below, count as no id.
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let id = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(id.filter(|id| *id > 0))
}

#[derive(Debug, Serialize)]
struct RateResponse {
    status: &'static str,
    total_ratings: i64,
}

async fn rate(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    JsonBody(payload): JsonBody<RateRequest>,
) -> AppResult<Json<RateResponse>> {
    let title = payload
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing title".to_string()))?;

    let vote = payload
        .rating_type
        .as_deref()
        .and_then(Vote::from_label)
        .ok_or_else(|| AppError::BadRequest("Unknown rating_type".to_string()))?;

    let rating = NewRating {
        tmdb_id: payload.id,
        title: title.to_string(),
        media_kind: parse_kind(payload.media_type.as_deref())?,
        score: vote.score(),
    };

    let total_ratings = state.ratings.upsert(session.user_id, &rating).await?;
    Ok(Json(RateResponse { status: "success", total_ratings }))
}

#[derive(Debug, Deserialize)]
struct SkipRequest {
    title: Option<String>,
}

async fn skip(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    JsonBody(payload): JsonBody<SkipRequest>,
) -> AppResult<Json<Value>> {
    let title = payload
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing title".to_string()))?;

    state.ratings.skip(session.user_id, title).await?;
    Ok(Json(json!({ "status": "skipped" })))
}

async fn get_stats(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> AppResult<Json<Value>> {
    let count = state.ratings.count(session.user_id).await?;
    Ok(Json(json!({ "count": count })))
}

async fn get_profile(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> AppResult<Json<ProfileStats>> {
    Ok(Json(state.ratings.profile(session.user_id).await?))
}

/// One imported row. Accepts either a score or a vote label, so an export
/// can be fed back in unchanged.
#[derive(Debug, Deserialize)]
struct ImportRow {
    #[serde(alias = "id")]
    tmdb_id: Option<i64>,
    #[serde(default)]
    title: String,
    media_type: Option<String>,
    score: Option<i64>,
    rating_type: Option<String>,
}

impl ImportRow {
    fn into_rating(self) -> Option<NewRating> {
        let media_kind = match self.media_type.as_deref() {
            None => MediaKind::Movie,
            Some(raw) => raw.parse().ok()?,
        };
        let score = self
            .rating_type
            .as_deref()
            .and_then(Vote::from_label)
            .map(|v| v.score())
            .or(self.score)?;

        Some(NewRating { tmdb_id: self.tmdb_id, title: self.title, media_kind, score })
    }
}

#[derive(Debug, Deserialize)]
struct RatingsImport {
    ratings: Vec<ImportRow>,
}

async fn import_ratings(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    JsonBody(payload): JsonBody<RatingsImport>,
) -> AppResult<Json<ImportSummary>> {
    let rows: Vec<NewRating> = payload.ratings.into_iter().filter_map(ImportRow::into_rating).collect();
    Ok(Json(state.ratings.import_ratings(session.user_id, rows).await?))
}

#[derive(Debug, Deserialize)]
struct SkippedImport {
    #[serde(alias = "skipped")]
    titles: Vec<String>,
}

async fn import_skipped(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    JsonBody(payload): JsonBody<SkippedImport>,
) -> AppResult<Json<ImportSummary>> {
    Ok(Json(state.ratings.import_skipped(session.user_id, payload.titles).await?))
}

#[derive(Debug, Serialize)]
struct ExportResponse {
    ratings: Vec<RatingRecord>,
    skipped: Vec<String>,
}

async fn export_ratings(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> AppResult<Json<ExportResponse>> {
    let ratings = state.ratings.list(session.user_id).await?;
    let skipped = state.ratings.skipped_titles(session.user_id).await?;
    Ok(Json(ExportResponse { ratings, skipped }))
}

#[derive(Debug, Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
    username: String,
}

async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    JsonBody(creds): JsonBody<Credentials>,
) -> AppResult<(CookieJar, Json<TokenResponse>)> {
    let user_id = state.auth.register(&creds.username, &creds.password).await?;
    start_session(&state, jar, user_id, creds.username.trim()).await
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    JsonBody(creds): JsonBody<Credentials>,
) -> AppResult<(CookieJar, Json<TokenResponse>)> {
    let user_id = state
        .auth
        .verify_credentials(&creds.username, &creds.password)
        .await?
        .ok_or(AppError::Unauthorized)?;

    info!(user_id, "User logged in");
    start_session(&state, jar, user_id, creds.username.trim()).await
}

async fn start_session(
    state: &AppState,
    jar: CookieJar,
    user_id: i64,
    username: &str,
) -> AppResult<(CookieJar, Json<TokenResponse>)> {
    let token = state.sessions.create_session(user_id, username).await?;

    let cookie = Cookie::build((SESSION_COOKIE, token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();

    Ok((
        jar.add(cookie),
        Json(TokenResponse { token, username: username.to_string() }),
    ))
}

async fn logout(
    State(state): State<AppState>,
    MaybeUser(session): MaybeUser,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<Value>)> {
    if let Some(session) = session {
        state.sessions.delete_session(&session.id).await?;
        info!(user_id = session.user_id, "User logged out");
    }

    let cookie = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    Ok((jar.remove(cookie), Json(json!({ "status": "logged_out" }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_params_swap_inverted_years() {
        let params = CatalogParams {
            page: Some(0),
            media_type: Some("tv".into()),
            min_year: Some(2020),
            max_year: Some(1990),
        };
        let query = params.to_query();
        assert_eq!(query.page, 1);
        assert_eq!(query.filter, MediaFilter::Only(MediaKind::Series));
        assert_eq!(query.years, YearRange { min: Some(1990), max: Some(2020) });
    }

    #[test]
    fn unknown_catalog_type_means_all() {
        let params = CatalogParams { media_type: Some("anime".into()), ..Default::default() };
        assert_eq!(params.to_query().filter, MediaFilter::All);
    }

    #[test]
    fn rate_ids_accept_numbers_and_numeric_strings() {
        let id_of = |body: Value| serde_json::from_value::<RateRequest>(body).unwrap().id;
        assert_eq!(id_of(json!({"id": 438631})), Some(438631));
        assert_eq!(id_of(json!({"id": " 438631 "})), Some(438631));
        assert_eq!(id_of(json!({"id": "dune"})), None);
        assert_eq!(id_of(json!({"id": 0})), None);
        assert_eq!(id_of(json!({"id": null})), None);
        assert_eq!(id_of(json!({})), None);
    }

    #[test]
    fn media_kind_defaults_to_movie() {
        assert_eq!(parse_kind(None).unwrap(), MediaKind::Movie);
        assert_eq!(parse_kind(Some(" ")).unwrap(), MediaKind::Movie);
        assert_eq!(parse_kind(Some("series")).unwrap(), MediaKind::Series);
        assert!(matches!(parse_kind(Some("podcast")), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn import_rows_accept_labels_or_scores() {
        let row: ImportRow = serde_json::from_value(json!({
            "id": 438631, "title": "Dune", "rating_type": "Odio"
        }))
        .unwrap();
        let rating = row.into_rating().unwrap();
        assert_eq!(rating.score, -5);
        assert_eq!(rating.tmdb_id, Some(438631));
        assert_eq!(rating.media_kind, MediaKind::Movie);

        let row: ImportRow = serde_json::from_value(json!({
            "tmdb_id": null, "title": "Dark", "media_type": "tv", "score": 5, "updated_at": "2024-01-01"
        }))
        .unwrap();
        assert_eq!(row.into_rating().unwrap().media_kind, MediaKind::Series);

        let row: ImportRow = serde_json::from_value(json!({ "title": "Nothing" })).unwrap();
        assert!(row.into_rating().is_none());
    }
}

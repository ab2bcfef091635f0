use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::Deserialize;

use crate::{
    api::{history_for, CatalogParams},
    auth::{MaybeUser, SESSION_COOKIE},
    catalog,
    error::{AppError, AppResult},
    models::MediaKind,
    recommend,
    templates::{self, BrowseForm},
    AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(home_page))
        .route("/title/:media_type/:id", get(detail_page))
        .route("/profile", get(profile_page))
        .route("/login", get(login_page))
        .route("/logout", get(logout_page))
}

#[derive(Debug, Deserialize)]
struct HomeQuery {
    page: Option<u32>,
    #[serde(rename = "type")]
    media_type: Option<String>,
    min_year: Option<i32>,
    max_year: Option<i32>,
    q: Option<String>,
    view: Option<String>,
}

async fn home_page(
    State(state): State<AppState>,
    user: MaybeUser,
    Query(params): Query<HomeQuery>,
) -> AppResult<Response> {
    let catalog_params = CatalogParams {
        page: params.page,
        media_type: params.media_type.clone(),
        min_year: params.min_year,
        max_year: params.max_year,
    };
    let query = catalog_params.to_query();
    let form = BrowseForm {
        filter: query.filter,
        min_year: query.years.min,
        max_year: query.years.max,
        query: params.q.clone().unwrap_or_default(),
        page: query.page,
    };
    let username = user.0.as_ref().map(|s| s.username.clone());

    if params.view.as_deref() == Some("recommendations") {
        let Some(session) = user.0.as_ref() else {
            return Ok(Redirect::to("/login").into_response());
        };
        let ratings = state.ratings.list(session.user_id).await?;
        let skipped = state.ratings.skipped_titles(session.user_id).await?;
        let seeds = {
            let mut rng = rand::thread_rng();
            recommend::pick_seeds(&ratings, query.filter, &mut rng)
        };
        let items = recommend::assemble(state.tmdb.as_ref(), &ratings, &skipped, &seeds).await;
        return Ok(Html(templates::render_recommendations(username.as_deref(), &form, &items)).into_response());
    }

    let history = history_for(&state, &user).await?;
    let items = if form.query.trim().is_empty() {
        catalog::assemble_catalog(state.tmdb.as_ref(), &history, &query).await
    } else {
        catalog::search(state.tmdb.as_ref(), &history, &form.query, query.filter, None).await
    };

    Ok(Html(templates::render_catalog(username.as_deref(), &form, &items)).into_response())
}

async fn detail_page(
    State(state): State<AppState>,
    user: MaybeUser,
    headers: HeaderMap,
    Path((media_type, id)): Path<(String, i64)>,
) -> AppResult<Html<String>> {
    let kind: MediaKind = media_type.parse().map_err(AppError::BadRequest)?;
    let region = headers
        .get("cf-ipcountry")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| state.region.clone());

    let (details, providers) = tokio::join!(
        state.tmdb.details(kind, id),
        catalog::providers_for(state.tmdb.as_ref(), kind, id, &region),
    );
    let item = details.into_option().ok_or(AppError::NotFound)?;

    let history = history_for(&state, &user).await?;
    let my_score = item.display_title().and_then(|t| history.score_for(t));
    let username = user.0.as_ref().map(|s| s.username.as_str());

    Ok(Html(templates::render_detail(username, kind, &item, &providers, my_score)))
}

async fn profile_page(State(state): State<AppState>, MaybeUser(session): MaybeUser) -> AppResult<Response> {
    let Some(session) = session else {
        return Ok(Redirect::to("/login").into_response());
    };
    let stats = state.ratings.profile(session.user_id).await?;
    Ok(Html(templates::render_profile(&session.username, &stats)).into_response())
}

async fn login_page(MaybeUser(session): MaybeUser) -> Html<String> {
    Html(templates::render_login(session.as_ref().map(|s| s.username.as_str())))
}

async fn logout_page(
    State(state): State<AppState>,
    MaybeUser(session): MaybeUser,
    jar: CookieJar,
) -> AppResult<(CookieJar, Redirect)> {
    if let Some(session) = session {
        state.sessions.delete_session(&session.id).await?;
    }
    let cookie = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    Ok((jar.remove(cookie), Redirect::to("/")))
}

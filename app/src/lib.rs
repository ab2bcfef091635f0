use axum::{routing::get, Router};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod api;
pub mod auth;
pub mod browse;
pub mod catalog;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pages;
pub mod ratings;
pub mod recommend;
pub mod templates;
pub mod tmdb;

use crate::auth::{AuthManager, SessionStore};
use crate::ratings::RatingStore;
use crate::tmdb::MetadataProvider;

#[derive(Clone)]
pub struct AppState {
    pub tmdb: Arc<dyn MetadataProvider>,
    pub ratings: RatingStore,
    pub auth: Arc<AuthManager>,
    pub sessions: Arc<SessionStore>,
    /// Region used for availability when the request names none.
    pub region: String,
}

impl AppState {
    pub fn new(
        db: Pool<Sqlite>,
        tmdb: Arc<dyn MetadataProvider>,
        auth: AuthManager,
        sessions: SessionStore,
        region: &str,
    ) -> Self {
        Self {
            ratings: RatingStore::new(db),
            tmdb,
            auth: Arc::new(auth),
            sessions: Arc::new(sessions),
            region: region.to_uppercase(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(pages::routes())
        .nest("/api", api::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

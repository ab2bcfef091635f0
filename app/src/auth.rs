use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::{Pool, Sqlite};
use tracing::{debug, info};

use crate::error::AppError;
use crate::AppState;

pub const SESSION_COOKIE: &str = "mediahub_session";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: i64,
    pub username: String,
    pub expires_at: i64,
}

#[derive(Debug)]
pub struct SessionStore {
    db: Pool<Sqlite>,
    secret: Vec<u8>,
    ttl_days: i64,
}

impl SessionStore {
    pub fn new(db: Pool<Sqlite>, secret: &str, ttl_days: i64) -> Self {
        Self {
            db,
            secret: secret.as_bytes().to_vec(),
            ttl_days,
        }
    }

    pub async fn create_session(&self, user_id: i64, username: &str) -> anyhow::Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let expires_at = (Utc::now() + Duration::days(self.ttl_days)).timestamp();

        let signature = self.create_signature(&session_id, user_id, expires_at)?;
        let session_token = format!("{}.{}", session_id, signature);

        self.prune_expired().await?;

        sqlx::query(
            "INSERT INTO sessions (session_id, user_id, username, expires_at) VALUES (?, ?, ?, ?)"
        )
        .bind(&session_id)
        .bind(user_id)
        .bind(username)
        .bind(expires_at)
        .execute(&self.db)
        .await?;

        info!("Created session for user: {}", username);
        Ok(session_token)
    }

    pub async fn validate_session(&self, session_token: &str) -> anyhow::Result<Option<Session>> {
        let Some((session_id, signature)) = session_token.split_once('.') else {
            return Ok(None);
        };

        let session_row: Option<(String, i64, String, i64)> = sqlx::query_as(
            "SELECT session_id, user_id, username, expires_at FROM sessions WHERE session_id = ?"
        )
        .bind(session_id)
        .fetch_optional(&self.db)
        .await?;

        let Some((_, user_id, username, expires_at)) = session_row else {
            return Ok(None);
        };

        if expires_at < Utc::now().timestamp() {
            self.delete_session(session_id).await?;
            return Ok(None);
        }

        let expected_signature = self.create_signature(session_id, user_id, expires_at)?;
        if signature != expected_signature {
            debug!("Session signature mismatch");
            return Ok(None);
        }

        Ok(Some(Session {
            id: session_id.to_string(),
            user_id,
            username,
            expires_at,
        }))
    }

    /// Drops every session past its expiry. Returns how many were removed.
    pub async fn prune_expired(&self) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
            .bind(Utc::now().timestamp())
            .execute(&self.db)
            .await?;
        if result.rows_affected() > 0 {
            debug!(removed = result.rows_affected(), "Pruned expired sessions");
        }
        Ok(result.rows_affected())
    }

    pub async fn delete_session(&self, session_id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    fn create_signature(&self, session_id: &str, user_id: i64, expires_at: i64) -> anyhow::Result<String> {
        let message = format!("{}.{}.{}", session_id, user_id, expires_at);
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret)
            .map_err(|e| anyhow::anyhow!("invalid session secret: {}", e))?;
        mac.update(message.as_bytes());
        let result = mac.finalize().into_bytes();
        Ok(hex::encode(result))
    }
}

pub struct AuthManager {
    db: Pool<Sqlite>,
    cost: u32,
}

impl AuthManager {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db, cost: DEFAULT_COST }
    }

    /// Lower bcrypt cost, for tests.
    pub fn with_cost(db: Pool<Sqlite>, cost: u32) -> Self {
        Self { db, cost }
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<i64, AppError> {
        let username = username.trim();
        if username.is_empty() || password.len() < 4 {
            return Err(AppError::BadRequest(
                "Username required and password must be at least 4 characters".to_string(),
            ));
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = ?)")
            .bind(username)
            .fetch_one(&self.db)
            .await?;
        if exists {
            return Err(AppError::Conflict(format!("Username {} is taken", username)));
        }

        let password = password.to_string();
        let cost = self.cost;
        let password_hash = tokio::task::spawn_blocking(move || hash(password, cost))
            .await
            .map_err(|e| AppError::InternalWithMessage(e.to_string()))??;

        let user_id = sqlx::query("INSERT INTO users (username, password_hash) VALUES (?, ?)")
            .bind(username)
            .bind(&password_hash)
            .execute(&self.db)
            .await?
            .last_insert_rowid();

        info!(user_id, "Registered user {}", username);
        Ok(user_id)
    }

    /// Returns the user id when the credentials match.
    pub async fn verify_credentials(&self, username: &str, password: &str) -> Result<Option<i64>, AppError> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT id, password_hash FROM users WHERE username = ?")
                .bind(username.trim())
                .fetch_optional(&self.db)
                .await?;

        let Some((user_id, password_hash)) = row else {
            return Ok(None);
        };

        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || verify(password, &password_hash))
            .await
            .map_err(|e| AppError::InternalWithMessage(e.to_string()))??;

        Ok(matches.then_some(user_id))
    }
}

/// Bearer header first, then the session cookie.
pub fn session_token(parts: &Parts) -> Option<String> {
    let bearer = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    bearer.or_else(|| {
        CookieJar::from_headers(&parts.headers)
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
    })
}

/// Session if the request carries a valid one.
pub struct MaybeUser(pub Option<Session>);

/// Rejects with 401 unless the request carries a valid session.
pub struct CurrentUser(pub Session);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = session_token(parts) else {
            return Ok(MaybeUser(None));
        };
        let session = state.sessions.validate_session(&token).await?;
        Ok(MaybeUser(session))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let MaybeUser(session) = MaybeUser::from_request_parts(parts, state).await?;
        session.map(CurrentUser).ok_or(AppError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    async fn stores() -> (AuthManager, SessionStore) {
        let pool = init_db("sqlite::memory:").await.unwrap();
        (
            AuthManager::with_cost(pool.clone(), 4),
            SessionStore::new(pool, "test-secret", 7),
        )
    }

    #[tokio::test]
    async fn register_then_verify() {
        let (auth, _) = stores().await;
        let id = auth.register("ana", "hunter22").await.unwrap();

        assert_eq!(auth.verify_credentials("ana", "hunter22").await.unwrap(), Some(id));
        assert_eq!(auth.verify_credentials("ana", "wrong").await.unwrap(), None);
        assert_eq!(auth.verify_credentials("nobody", "hunter22").await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let (auth, _) = stores().await;
        auth.register("ana", "hunter22").await.unwrap();
        assert!(matches!(
            auth.register("ana", "other-pass").await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn session_round_trip_and_tamper() {
        let (auth, sessions) = stores().await;
        let id = auth.register("ana", "hunter22").await.unwrap();
        let token = sessions.create_session(id, "ana").await.unwrap();

        let session = sessions.validate_session(&token).await.unwrap().unwrap();
        assert_eq!(session.user_id, id);
        assert_eq!(session.username, "ana");

        let tampered = format!("{}0", token);
        assert!(sessions.validate_session(&tampered).await.unwrap().is_none());
        assert!(sessions.validate_session("garbage").await.unwrap().is_none());

        sessions.delete_session(&session.id).await.unwrap();
        assert!(sessions.validate_session(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_sessions_are_rejected() {
        let pool = init_db("sqlite::memory:").await.unwrap();
        let auth = AuthManager::with_cost(pool.clone(), 4);
        let id = auth.register("ana", "hunter22").await.unwrap();
        let sessions = SessionStore::new(pool, "test-secret", -1);

        let token = sessions.create_session(id, "ana").await.unwrap();
        assert!(sessions.validate_session(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_sessions_are_pruned_on_login() {
        let pool = init_db("sqlite::memory:").await.unwrap();
        let auth = AuthManager::with_cost(pool.clone(), 4);
        let id = auth.register("ana", "hunter22").await.unwrap();
        let stale = SessionStore::new(pool.clone(), "test-secret", -1);
        stale.create_session(id, "ana").await.unwrap();
        stale.create_session(id, "ana").await.unwrap();

        let sessions = SessionStore::new(pool.clone(), "test-secret", 30);
        let token = sessions.create_session(id, "ana").await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
        assert!(sessions.validate_session(&token).await.unwrap().is_some());
        assert_eq!(sessions.prune_expired().await.unwrap(), 0);
    }

    #[test]
    fn token_prefers_bearer_over_cookie() {
        let request = axum::http::Request::builder()
            .header(header::AUTHORIZATION, "Bearer abc.def")
            .header(header::COOKIE, format!("{}=zzz", SESSION_COOKIE))
            .body(())
            .unwrap();
        let (parts, _) = request.into_parts();
        assert_eq!(session_token(&parts).as_deref(), Some("abc.def"));

        let request = axum::http::Request::builder()
            .header(header::COOKIE, format!("{}=zzz", SESSION_COOKIE))
            .body(())
            .unwrap();
        let (parts, _) = request.into_parts();
        assert_eq!(session_token(&parts).as_deref(), Some("zzz"));
    }
}

use config::{Config as ConfigBuilder, File};
use serde::Deserialize;
use tracing::warn;

const DEFAULT_DATABASE_URL: &str = "sqlite://./mediahub.db?mode=rwc";
const DEFAULT_TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";
const DEV_SESSION_SECRET: &str = "mediahub-dev-session-secret-change-me";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub tmdb_api_key: String,
    pub tmdb_base_url: String,
    pub tmdb_language: String,
    pub tmdb_region: String,
    pub host: String,
    pub port: u16,
    pub session_secret: String,
    pub session_ttl_days: i64,
}

impl Config {
    pub fn new() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = ConfigBuilder::builder()
            .add_source(File::with_name("config").required(false))
            .set_default("database_url", DEFAULT_DATABASE_URL)?
            .set_default("tmdb_base_url", DEFAULT_TMDB_BASE_URL)?
            .set_default("tmdb_language", "es-ES")?
            .set_default("tmdb_region", "ES")?
            .set_default("host", "127.0.0.1")?
            .set_default("port", 3000u16)?
            .set_default("session_ttl_days", 7i64)?
            .build()?;

        let setting = |env_key: &str, key: &str| {
            std::env::var(env_key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .or_else(|| config.get_string(key).ok())
        };

        let tmdb_api_key = setting("TMDB_API_KEY", "tmdb_api_key")
            .ok_or_else(|| anyhow::anyhow!("TMDB_API_KEY environment variable not set"))?;

        let session_secret = match setting("SESSION_SECRET", "session_secret") {
            Some(secret) => secret,
            None => {
                warn!("SESSION_SECRET not set, using the development secret");
                DEV_SESSION_SECRET.to_string()
            }
        };

        Ok(Config {
            database_url: setting("DATABASE_URL", "database_url")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            tmdb_api_key,
            tmdb_base_url: setting("TMDB_BASE_URL", "tmdb_base_url")
                .unwrap_or_else(|| DEFAULT_TMDB_BASE_URL.to_string()),
            tmdb_language: setting("TMDB_LANGUAGE", "tmdb_language")
                .unwrap_or_else(|| "es-ES".to_string()),
            tmdb_region: setting("TMDB_REGION", "tmdb_region")
                .map(|r| r.to_uppercase())
                .unwrap_or_else(|| "ES".to_string()),
            host: setting("HOST", "host").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(|| config.get_int("port").unwrap_or(3000) as u16),
            session_secret,
            session_ttl_days: std::env::var("SESSION_TTL_DAYS")
                .ok()
                .and_then(|d| d.parse().ok())
                .unwrap_or_else(|| config.get_int("session_ttl_days").unwrap_or(7)),
        })
    }
}

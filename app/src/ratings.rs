use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::models::{
    is_valid_score, MediaKind, NewRating, ProfileStats, RatingRecord, RecentRating,
    ScoreDistribution,
};

const IMPORT_BATCH_SIZE: usize = 500;
const RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub processed: usize,
    pub upserted: usize,
}

/// Ratings and skipped titles, always scoped to one user.
#[derive(Debug, Clone)]
pub struct RatingStore {
    db: Pool<Sqlite>,
}

impl RatingStore {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Most recently updated first.
    pub async fn list(&self, user_id: i64) -> anyhow::Result<Vec<RatingRecord>> {
        let rows: Vec<RatingRecord> = sqlx::query_as(
            r#"
            SELECT tmdb_id, title, media_type, score, CAST(updated_at AS TEXT) AS updated_at
            FROM user_ratings
            WHERE user_id = ?
            ORDER BY updated_at DESC, id DESC
            "#
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }

    pub async fn count(&self, user_id: i64) -> anyhow::Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_ratings WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    /// Creates or overwrites a rating and returns the user's rating count.
    pub async fn upsert(&self, user_id: i64, rating: &NewRating) -> anyhow::Result<i64> {
        anyhow::ensure!(is_valid_score(rating.score), "invalid score {}", rating.score);

        {
            let mut conn = self.db.acquire().await?;
            upsert_one(&mut *conn, user_id, rating).await?;
        }

        info!(
            user_id,
            tmdb_id = ?rating.tmdb_id,
            title = %rating.title,
            score = rating.score,
            "Rating saved"
        );
        self.count(user_id).await
    }

    pub async fn skip(&self, user_id: i64, title: &str) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO skipped_titles (user_id, title) VALUES (?, ?) ON CONFLICT(user_id, title) DO NOTHING")
            .bind(user_id)
            .bind(title.trim())
            .execute(&self.db)
            .await?;

        debug!(user_id, title = %title, "Title skipped");
        Ok(())
    }

    pub async fn skipped_titles(&self, user_id: i64) -> anyhow::Result<Vec<String>> {
        let titles: Vec<String> = sqlx::query_scalar(
            "SELECT title FROM skipped_titles WHERE user_id = ? ORDER BY created_at DESC, id DESC"
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(titles)
    }

    /// Bulk import. Rows with a blank title or an out-of-domain score are
    /// dropped before writing; the rest are written in batches.
    pub async fn import_ratings(&self, user_id: i64, rows: Vec<NewRating>) -> anyhow::Result<ImportSummary> {
        let valid: Vec<NewRating> = rows
            .into_iter()
            .filter(|r| !r.title.trim().is_empty() && is_valid_score(r.score))
            .map(|mut r| {
                r.title = r.title.trim().to_string();
                r.tmdb_id = r.tmdb_id.filter(|id| *id > 0);
                r
            })
            .collect();

        let mut upserted = 0;
        for batch in valid.chunks(IMPORT_BATCH_SIZE) {
            let mut tx = self.db.begin().await?;
            for rating in batch {
                upsert_one(&mut *tx, user_id, rating).await?;
            }
            tx.commit().await?;
            upserted += batch.len();
        }

        info!(user_id, processed = valid.len(), upserted, "Ratings imported");
        Ok(ImportSummary { processed: valid.len(), upserted })
    }

    pub async fn import_skipped(&self, user_id: i64, titles: Vec<String>) -> anyhow::Result<ImportSummary> {
        let mut unique: Vec<String> = Vec::new();
        for title in titles {
            let title = title.trim().to_string();
            if !title.is_empty() && !unique.contains(&title) {
                unique.push(title);
            }
        }

        let mut upserted = 0;
        for batch in unique.chunks(IMPORT_BATCH_SIZE) {
            let mut tx = self.db.begin().await?;
            for title in batch {
                sqlx::query("INSERT INTO skipped_titles (user_id, title) VALUES (?, ?) ON CONFLICT(user_id, title) DO NOTHING")
                    .bind(user_id)
                    .bind(title)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            upserted += batch.len();
        }

        info!(user_id, processed = unique.len(), upserted, "Skipped titles imported");
        Ok(ImportSummary { processed: unique.len(), upserted })
    }

    pub async fn profile(&self, user_id: i64) -> anyhow::Result<ProfileStats> {
        let ratings = self.list(user_id).await?;
        Ok(profile_from(&ratings))
    }
}

async fn upsert_one(
    conn: &mut sqlx::SqliteConnection,
    user_id: i64,
    rating: &NewRating,
) -> Result<(), sqlx::Error> {
    match rating.tmdb_id.filter(|id| *id > 0) {
        Some(tmdb_id) => {
            sqlx::query(
                r#"
                INSERT INTO user_ratings (user_id, tmdb_id, title, media_type, score)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(user_id, tmdb_id)
                DO UPDATE SET title = excluded.title,
                              media_type = excluded.media_type,
                              score = excluded.score,
                              updated_at = CURRENT_TIMESTAMP
                "#
            )
            .bind(user_id)
            .bind(tmdb_id)
            .bind(&rating.title)
            .bind(rating.media_kind.as_str())
            .bind(rating.score)
            .execute(&mut *conn)
            .await?;
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO user_ratings (user_id, tmdb_id, title, media_type, score)
                VALUES (?, NULL, ?, ?, ?)
                ON CONFLICT(user_id, title, media_type) WHERE tmdb_id IS NULL
                DO UPDATE SET score = excluded.score,
                              updated_at = CURRENT_TIMESTAMP
                "#
            )
            .bind(user_id)
            .bind(&rating.title)
            .bind(rating.media_kind.as_str())
            .bind(rating.score)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

pub fn profile_from(ratings: &[RatingRecord]) -> ProfileStats {
    let total = ratings.len() as i64;
    let movies = ratings.iter().filter(|r| r.kind() == Some(MediaKind::Movie)).count() as i64;
    let series = ratings.iter().filter(|r| r.kind() == Some(MediaKind::Series)).count() as i64;
    let average_score = if total > 0 {
        ratings.iter().map(|r| r.score).sum::<i64>() as f64 / total as f64
    } else {
        0.0
    };

    let count_score = |s: i64| ratings.iter().filter(|r| r.score == s).count() as i64;
    let distribution = ScoreDistribution {
        super_like: count_score(5),
        like: count_score(2),
        dislike: count_score(-2),
        mega_dislike: count_score(-5),
    };

    let recent = ratings
        .iter()
        .take(RECENT_LIMIT)
        .map(|r| RecentRating {
            tmdb_id: r.tmdb_id,
            title: r.title.clone(),
            media_type: r.media_type.clone(),
            score: r.score,
            updated_at: r.updated_at.clone(),
        })
        .collect();

    ProfileStats {
        total_ratings: total,
        movies,
        series,
        average_score,
        distribution,
        recent,
    }
}

/// Title-keyed view of a user's ratings, used to annotate provider items.
#[derive(Debug, Clone, Default)]
pub struct RatingHistory {
    by_title: HashMap<String, i64>,
}

impl RatingHistory {
    /// Expects records newest first; the newest score for a title wins.
    pub fn from_records(records: &[RatingRecord]) -> Self {
        let mut by_title = HashMap::new();
        for r in records {
            by_title.entry(r.title.clone()).or_insert(r.score);
        }
        Self { by_title }
    }

    pub fn score_for(&self, title: &str) -> Option<i64> {
        self.by_title.get(title).copied()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::init_db;

    pub(crate) async fn memory_store() -> (Pool<Sqlite>, RatingStore) {
        let pool = init_db("sqlite::memory:").await.unwrap();
        (pool.clone(), RatingStore::new(pool))
    }

    pub(crate) async fn insert_user(pool: &Pool<Sqlite>, name: &str) -> i64 {
        sqlx::query("INSERT INTO users (username, password_hash) VALUES (?, 'x')")
            .bind(name)
            .execute(pool)
            .await
            .unwrap()
            .last_insert_rowid()
    }

    fn rating(id: Option<i64>, title: &str, kind: MediaKind, score: i64) -> NewRating {
        NewRating { tmdb_id: id, title: title.to_string(), media_kind: kind, score }
    }

    #[tokio::test]
    async fn like_for_dune_stores_two_and_counts_one() {
        let (pool, store) = memory_store().await;
        let user = insert_user(&pool, "ana").await;

        let total = store
            .upsert(user, &rating(Some(438631), "Dune", MediaKind::Movie, 2))
            .await
            .unwrap();
        assert_eq!(total, 1);

        let rows = store.list(user).await.unwrap();
        assert_eq!(rows[0].score, 2);
        assert_eq!(rows[0].tmdb_id, Some(438631));
        assert_eq!(rows[0].media_type, "movie");
    }

    #[tokio::test]
    async fn same_external_id_overwrites() {
        let (pool, store) = memory_store().await;
        let user = insert_user(&pool, "ana").await;

        store.upsert(user, &rating(Some(438631), "Dune", MediaKind::Movie, 2)).await.unwrap();
        let total = store
            .upsert(user, &rating(Some(438631), "Dune", MediaKind::Movie, 5))
            .await
            .unwrap();

        assert_eq!(total, 1);
        assert_eq!(store.list(user).await.unwrap()[0].score, 5);
    }

    #[tokio::test]
    async fn id_less_ratings_match_on_title_and_kind() {
        let (pool, store) = memory_store().await;
        let user = insert_user(&pool, "ana").await;

        store.upsert(user, &rating(None, "Dark", MediaKind::Series, -2)).await.unwrap();
        store.upsert(user, &rating(Some(0), "Dark", MediaKind::Series, 5)).await.unwrap();
        let total = store.upsert(user, &rating(None, "Dark", MediaKind::Movie, 2)).await.unwrap();

        assert_eq!(total, 2);
        let rows = store.list(user).await.unwrap();
        let series = rows.iter().find(|r| r.media_type == "tv").unwrap();
        assert_eq!(series.score, 5);
        assert_eq!(series.tmdb_id, None);
    }

    #[tokio::test]
    async fn ratings_are_scoped_per_user() {
        let (pool, store) = memory_store().await;
        let ana = insert_user(&pool, "ana").await;
        let ben = insert_user(&pool, "ben").await;

        store.upsert(ana, &rating(Some(1), "A", MediaKind::Movie, 2)).await.unwrap();
        store.upsert(ben, &rating(Some(1), "A", MediaKind::Movie, -5)).await.unwrap();

        assert_eq!(store.count(ana).await.unwrap(), 1);
        assert_eq!(store.list(ana).await.unwrap()[0].score, 2);
        assert_eq!(store.list(ben).await.unwrap()[0].score, -5);
    }

    #[tokio::test]
    async fn out_of_domain_score_is_rejected() {
        let (pool, store) = memory_store().await;
        let user = insert_user(&pool, "ana").await;
        assert!(store.upsert(user, &rating(Some(1), "A", MediaKind::Movie, 3)).await.is_err());
        assert_eq!(store.count(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn import_drops_invalid_rows() {
        let (pool, store) = memory_store().await;
        let user = insert_user(&pool, "ana").await;

        let summary = store
            .import_ratings(
                user,
                vec![
                    rating(Some(1), "A", MediaKind::Movie, 5),
                    rating(Some(2), "  ", MediaKind::Movie, 2),
                    rating(Some(3), "C", MediaKind::Movie, 4),
                    rating(Some(1), "A", MediaKind::Movie, -2),
                ],
            )
            .await
            .unwrap();

        assert_eq!(summary, ImportSummary { processed: 2, upserted: 2 });
        assert_eq!(store.count(user).await.unwrap(), 1);
        assert_eq!(store.list(user).await.unwrap()[0].score, -2);
    }

    #[tokio::test]
    async fn skipped_titles_are_unique() {
        let (pool, store) = memory_store().await;
        let user = insert_user(&pool, "ana").await;

        store.skip(user, "Cats").await.unwrap();
        store.skip(user, "Cats").await.unwrap();
        let summary = store
            .import_skipped(user, vec!["Cats".into(), " Norbit ".into(), "".into()])
            .await
            .unwrap();

        assert_eq!(summary.processed, 2);
        let mut titles = store.skipped_titles(user).await.unwrap();
        titles.sort();
        assert_eq!(titles, vec!["Cats".to_string(), "Norbit".to_string()]);
    }

    #[test]
    fn profile_counts_kinds_and_distribution() {
        let rec = |title: &str, kind: &str, score| RatingRecord {
            tmdb_id: None,
            title: title.into(),
            media_type: kind.into(),
            score,
            updated_at: String::new(),
        };
        let stats = profile_from(&[
            rec("A", "movie", 5),
            rec("B", "movie", 2),
            rec("C", "tv", -5),
            rec("D", "tv", 2),
        ]);

        assert_eq!(stats.total_ratings, 4);
        assert_eq!(stats.movies, 2);
        assert_eq!(stats.series, 2);
        assert!((stats.average_score - 1.0).abs() < f64::EPSILON);
        assert_eq!(stats.distribution.like, 2);
        assert_eq!(stats.distribution.mega_dislike, 1);
        assert_eq!(stats.recent.len(), 4);
        assert_eq!(profile_from(&[]).average_score, 0.0);
    }

    #[test]
    fn history_keeps_newest_score_per_title() {
        let rec = |score| RatingRecord {
            tmdb_id: None,
            title: "Dune".into(),
            media_type: "movie".into(),
            score,
            updated_at: String::new(),
        };
        let history = RatingHistory::from_records(&[rec(5), rec(-2)]);
        assert_eq!(history.score_for("Dune"), Some(5));
        assert_eq!(history.score_for("Arrival"), None);
    }
}

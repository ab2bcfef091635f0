use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Movie or series. Serialized the way TMDB names it (`movie` / `tv`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    #[serde(rename = "movie")]
    Movie,
    #[serde(rename = "tv", alias = "series")]
    Series,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Series => "tv",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "movie" => Ok(MediaKind::Movie),
            "tv" | "series" => Ok(MediaKind::Series),
            other => Err(format!("unknown media kind: {}", other)),
        }
    }
}

/// Media filter used by catalog, search and recommendations. Anything that
/// is not a known kind means "all".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaFilter {
    #[default]
    All,
    Only(MediaKind),
}

impl MediaFilter {
    pub fn parse(raw: Option<&str>) -> Self {
        raw.and_then(|r| r.parse::<MediaKind>().ok())
            .map(MediaFilter::Only)
            .unwrap_or(MediaFilter::All)
    }

    pub fn accepts(&self, kind: MediaKind) -> bool {
        match self {
            MediaFilter::All => true,
            MediaFilter::Only(k) => *k == kind,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFilter::All => "all",
            MediaFilter::Only(kind) => kind.as_str(),
        }
    }
}

/// Qualitative vote a visitor can cast on a title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vote {
    SuperLike,
    Like,
    Dislike,
    #[serde(alias = "Odio")]
    MegaDislike,
}

impl Vote {
    pub const ALL: [Vote; 4] = [Vote::MegaDislike, Vote::Dislike, Vote::Like, Vote::SuperLike];

    pub fn score(&self) -> i64 {
        match self {
            Vote::SuperLike => 5,
            Vote::Like => 2,
            Vote::Dislike => -2,
            Vote::MegaDislike => -5,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Vote::SuperLike => "SuperLike",
            Vote::Like => "Like",
            Vote::Dislike => "Dislike",
            Vote::MegaDislike => "MegaDislike",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "SuperLike" => Some(Vote::SuperLike),
            "Like" => Some(Vote::Like),
            "Dislike" => Some(Vote::Dislike),
            "MegaDislike" | "Odio" => Some(Vote::MegaDislike),
            _ => None,
        }
    }

    pub fn from_score(score: i64) -> Option<Self> {
        Vote::ALL.into_iter().find(|v| v.score() == score)
    }
}

pub const FAVORABLE_SCORE: i64 = 2;
pub const TOP_SCORE: i64 = 5;

pub fn is_valid_score(score: i64) -> bool {
    Vote::from_score(score).is_some()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Seen,
    New,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: i64,
    pub title: String,
    pub media_type: MediaKind,
    pub poster_path: String,
    pub overview: String,
    pub release_date: String,
    pub vote_average: f64,
    #[serde(default)]
    pub popularity: f64,
    pub status: ItemStatus,
    pub my_score: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedItem {
    pub id: i64,
    pub title: String,
    pub score: i64,
    /// Title of the seed this recommendation came from.
    pub because_of: String,
    pub media_type: MediaKind,
    pub poster_path: Option<String>,
    pub overview: String,
    pub release_date: Option<String>,
    pub vote_average: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityKind {
    Streaming,
    Free,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    pub logo: String,
    #[serde(rename = "type")]
    pub kind: AvailabilityKind,
}

/// A stored rating row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RatingRecord {
    pub tmdb_id: Option<i64>,
    pub title: String,
    pub media_type: String,
    pub score: i64,
    pub updated_at: String,
}

impl RatingRecord {
    pub fn kind(&self) -> Option<MediaKind> {
        self.media_type.parse().ok()
    }
}

/// Input for a rating upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRating {
    pub tmdb_id: Option<i64>,
    pub title: String,
    pub media_kind: MediaKind,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScoreDistribution {
    pub super_like: i64,
    pub like: i64,
    pub dislike: i64,
    pub mega_dislike: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentRating {
    pub tmdb_id: Option<i64>,
    pub title: String,
    pub media_type: String,
    pub score: i64,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileStats {
    pub total_ratings: i64,
    pub movies: i64,
    pub series: i64,
    pub average_score: f64,
    pub distribution: ScoreDistribution,
    pub recent: Vec<RecentRating>,
}

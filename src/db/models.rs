use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Read models (database rows) ─────────────────────────────────────────────
//
// Each struct maps 1-to-1 to a database table row. `sqlx::FromRow` is derived
// so sqlx can hydrate them directly from query results without manual mapping.
// Timestamp columns are `TIMESTAMPTZ` and map to `DateTime<Utc>` via sqlx's
// chrono integration.

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Proxy {
    pub id: i64,
    pub url: String,
    pub name: String,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub proxy_id: Option<i64>,
    pub properties: serde_json::Value,
    pub next_check: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Page {
    pub id: i64,
    pub feed_id: i64,
    pub idx: i32,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub guid: String,
    pub page_id: i64,
    pub feed_id: i64,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub season: Option<i32>,
    pub episode: Option<i32>,
}

/// The subset of a post's fields the crawler cares about — everything except
/// identity (`guid`) and placement (`page_id`). Carried on both the stored
/// `Post` row and the freshly parsed entry so the diff engine can compare
/// them structurally (spec.md §4.5: "if its (page, metadata) tuple
/// differs...").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetadata {
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub season: Option<i32>,
    pub episode: Option<i32>,
}

impl From<&Post> for PostMetadata {
    fn from(post: &Post) -> Self {
        PostMetadata {
            published: post.published,
            updated: post.updated,
            season: post.season,
            episode: post.episode,
        }
    }
}

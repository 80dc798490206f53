use std::collections::HashMap;

use async_trait::async_trait;

use crate::db::models::PostMetadata;
use crate::error::CrawlResult;
use crate::feed::{FeedDocument, Fetcher};

/// One archive page as produced by a strategy: its URL plus the posts found
/// on it. Mirrors spec.md §4.2's `FeedPage`.
#[derive(Debug, Clone)]
pub struct FeedPage {
    pub url: String,
    pub posts: HashMap<String, PostMetadata>,
}

impl FeedPage {
    pub fn from_document(doc: &FeedDocument) -> Self {
        FeedPage {
            url: doc.self_url(),
            posts: doc.posts(),
        }
    }
}

/// A page the crawler already knows about from a previous crawl, ordered
/// oldest-first in the slice a `Strategy` receives.
#[derive(Debug, Clone)]
pub struct OldPage {
    pub page_id: i64,
    pub url: String,
    /// `(updated, guid)` of the post with the greatest `updated` among the
    /// posts stored on this page as of the last crawl — the fingerprint the
    /// WordPress strategy uses to detect that a page is still current
    /// without diffing its whole post list.
    pub last_updated_key: Option<(chrono::DateTime<chrono::Utc>, Option<String>)>,
}

/// spec.md §4.2: "retain the first `keep_existing` old pages unchanged and
/// replace everything after them with `new_pages` (oldest first)".
#[derive(Debug, Clone)]
pub struct UpdateFeedHistory {
    pub keep_existing: usize,
    pub new_pages: Vec<FeedPage>,
}

/// One reconciliation strategy. Given the freshly fetched subscription
/// document and the feed's previously stored archive pages (oldest first),
/// decides how to bring the archive up to date, or declares that it does
/// not apply to this feed by returning `Ok(None)`.
#[async_trait]
pub trait Strategy: Send + Sync {
    async fn reconcile(
        &self,
        fetcher: &dyn Fetcher,
        base: &FeedDocument,
        old_pages: &[OldPage],
    ) -> CrawlResult<Option<UpdateFeedHistory>>;
}

/// Ordered collection of strategies; the first one to return `Some` wins
/// (spec.md §4.2). Registration is a plain `Vec` built at startup — no
/// decorator or dynamic-registration magic, per spec.md §9.
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    pub fn with_default_strategies() -> Self {
        Self::new(vec![
            Box::new(super::rfc5005::Rfc5005Strategy),
            Box::new(super::wordpress::WordPressStrategy),
        ])
    }

    pub async fn reconcile(
        &self,
        fetcher: &dyn Fetcher,
        base: &FeedDocument,
        old_pages: &[OldPage],
    ) -> CrawlResult<UpdateFeedHistory> {
        for strategy in &self.strategies {
            if let Some(update) = strategy.reconcile(fetcher, base, old_pages).await? {
                return Ok(update);
            }
        }
        Err(crate::error::CrawlError::NoHistoryFound {
            url: base.self_url(),
        })
    }
}

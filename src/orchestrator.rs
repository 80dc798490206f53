use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::db::models::{Page as DbPage, Post as DbPost, PostMetadata};
use crate::diff::{DiffEngine, OldPost};
use crate::error::{CrawlError, CrawlResult};
use crate::feed::{FeedDocument, FeedType, Fetcher, ProxyFetcher};
use crate::history::{OldPage, StrategyRegistry};
use crate::persistence::{self, SubscriptionPage};

/// Reconciles one feed's archive with what is currently published and
/// writes the result, all inside a single transaction. The subscription
/// page row (`idx = 0`) is locked with `FOR UPDATE` for the duration so two
/// crawls of the same feed can never interleave.
pub async fn crawl(
    feed_id: i64,
    pool: &PgPool,
    fetcher: &dyn Fetcher,
    registry: &StrategyRegistry,
    max_current_redirects: u32,
) -> CrawlResult<()> {
    let mut txn = pool.begin().await?;

    let (feed_url, proxy_url): (String, Option<String>) = sqlx::query_as(
        "SELECT feed.url, proxy.url FROM feed LEFT JOIN proxy ON proxy.id = feed.proxy_id \
         WHERE feed.id = $1 FOR UPDATE OF feed",
    )
    .bind(feed_id)
    .fetch_one(&mut *txn)
    .await?;

    let proxied;
    let effective_fetcher: &dyn Fetcher = match &proxy_url {
        Some(proxy) => {
            proxied = ProxyFetcher::new(fetcher, proxy);
            &proxied
        }
        None => fetcher,
    };

    let subscription_page: Option<DbPage> = sqlx::query_as(
        "SELECT id, feed_id, idx, url FROM page WHERE feed_id = $1 AND idx = 0 FOR UPDATE",
    )
    .bind(feed_id)
    .fetch_optional(&mut *txn)
    .await?;

    let base_doc = fetch_subscription(effective_fetcher, &feed_url, max_current_redirects).await?;
    let old_pages = load_old_pages(&mut txn, feed_id).await?;

    let update = registry.reconcile(effective_fetcher, &base_doc, &old_pages).await?;

    // `new_pages` is oldest-to-newest with the subscription's own content
    // last; split it off since the subscription page keeps a fixed idx of 0
    // regardless of how many archive pages are being rewritten.
    let (subscription_feed_page, archive_new_pages) = update
        .new_pages
        .split_last()
        .ok_or_else(|| CrawlError::NoHistoryFound { url: base_doc.self_url() })?;

    let mut diff = DiffEngine::new();

    let subscription_page_id = subscription_page.as_ref().map(|p| p.id);
    diff.new_page(&subscription_feed_page.url, subscription_page_id, &subscription_feed_page.posts);
    if let Some(page) = &subscription_page {
        load_posts_into_diff(&mut txn, page.id, &mut diff).await?;
    }

    // Old archive pages a strategy declared unchanged stay oldest-first at
    // the front of `old_pages`; everything after them is being superseded
    // by `archive_new_pages` and is reloaded into the diff so vanished or
    // moved posts are detected. Reused page rows among the superseded ones,
    // keyed by URL, let new_page() recognize a reconciled page as a refresh
    // of an existing row rather than a brand new one.
    let kept_archive_page_ids: Vec<i64> =
        old_pages.iter().take(update.keep_existing).map(|p| p.page_id).collect();
    let mut replaced_page_ids: HashMap<String, i64> = HashMap::new();
    for page in old_pages.iter().skip(update.keep_existing) {
        replaced_page_ids.insert(page.url.clone(), page.page_id);
        load_posts_into_diff(&mut txn, page.page_id, &mut diff).await?;
    }

    // Newest-to-oldest call order so that, if a guid somehow appears on more
    // than one reconciled page, the occurrence closest to the subscription
    // wins the match.
    for feed_page in archive_new_pages.iter().rev() {
        let page_id = replaced_page_ids.get(&feed_page.url).copied();
        diff.new_page(&feed_page.url, page_id, &feed_page.posts);
    }

    let subscription = SubscriptionPage {
        existing_id: subscription_page_id,
        url: subscription_feed_page.url.clone(),
    };
    let archive_page_urls: Vec<String> = archive_new_pages.iter().map(|p| p.url.clone()).collect();
    persistence::apply(
        feed_id,
        &subscription,
        &archive_page_urls,
        &replaced_page_ids,
        &kept_archive_page_ids,
        &diff,
        &mut txn,
    )
    .await?;

    txn.commit().await?;
    Ok(())
}

/// Resolves subscription-URL normalization (spec.md §4.1): if the fetched
/// document's self-URL differs from the URL requested, restart from the
/// self-URL; else if a `current` link is present and differs, restart from
/// `current`. Applies to every document, not only ones classified
/// `ARCHIVE` — a non-archive document can equally be served from a
/// redirected or `Content-Location`d URL, or legitimately carry a `current`
/// link worth following. Only once neither check wants to redirect is an
/// `ARCHIVE` document with no `current` link at all treated as an error,
/// since at that point there is nothing left to restart from.
async fn fetch_subscription(fetcher: &dyn Fetcher, url: &str, max_redirects: u32) -> CrawlResult<FeedDocument> {
    let mut current_url = url.to_string();
    let mut hops = 0u32;
    loop {
        let response = fetcher.get(&current_url, &[]).await?;
        if !(200..300).contains(&response.status) {
            return Err(CrawlError::UnexpectedStatus { url: current_url, status: response.status });
        }
        let doc = FeedDocument::parse(&current_url, &response)?;

        let self_url = doc.self_url();
        let current_link = doc.get_link("current");

        let redirect_target = if self_url != current_url {
            Some(self_url)
        } else if let Some(current) = &current_link {
            (current != &current_url).then(|| current.clone())
        } else {
            None
        };

        let Some(next) = redirect_target else {
            if doc.feed_type == FeedType::Archive && current_link.is_none() {
                return Err(CrawlError::ArchiveWithoutCurrent { url: self_url });
            }
            return Ok(doc);
        };

        hops += 1;
        if hops > max_redirects {
            return Err(CrawlError::TooManyRedirects { url: next });
        }
        current_url = next;
    }
}

/// Archive pages already on file, oldest first, each carrying the
/// fingerprint strategies use to detect an unchanged page without a full
/// post diff.
async fn load_old_pages(txn: &mut Transaction<'_, Postgres>, feed_id: i64) -> CrawlResult<Vec<OldPage>> {
    let pages: Vec<DbPage> = sqlx::query_as(
        "SELECT id, feed_id, idx, url FROM page WHERE feed_id = $1 AND idx > 0 ORDER BY idx DESC",
    )
    .bind(feed_id)
    .fetch_all(&mut **txn)
    .await?;

    let mut result = Vec::with_capacity(pages.len());
    for page in pages {
        let last_updated: Option<(DateTime<Utc>, String)> = sqlx::query_as(
            "SELECT updated, guid FROM post WHERE page_id = $1 AND updated IS NOT NULL \
             ORDER BY updated DESC LIMIT 1",
        )
        .bind(page.id)
        .fetch_optional(&mut **txn)
        .await?;

        result.push(OldPage {
            page_id: page.id,
            url: page.url,
            last_updated_key: last_updated.map(|(updated, guid)| (updated, Some(guid))),
        });
    }
    Ok(result)
}

async fn load_posts_into_diff(txn: &mut Transaction<'_, Postgres>, page_id: i64, diff: &mut DiffEngine) -> CrawlResult<()> {
    let posts: Vec<DbPost> = sqlx::query_as(
        "SELECT id, guid, page_id, feed_id, published, updated, season, episode FROM post WHERE page_id = $1",
    )
    .bind(page_id)
    .fetch_all(&mut **txn)
    .await?;

    for post in posts {
        let metadata = PostMetadata::from(&post);
        diff.old_post(OldPost {
            id: post.id,
            guid: post.guid,
            page_id: post.page_id,
            metadata,
        });
    }
    Ok(())
}

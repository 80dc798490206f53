use std::collections::{HashMap, HashSet};

use sqlx::{Postgres, Transaction};

use crate::diff::DiffEngine;
use crate::error::CrawlResult;

/// Identifies the subscription (`idx = 0`) page a crawl is writing to.
/// Unlike archive pages it never changes position — only its URL and post
/// list can change from one crawl to the next — so it sits outside the
/// negative-index renumbering dance entirely.
pub struct SubscriptionPage {
    pub existing_id: Option<i64>,
    pub url: String,
}

/// Writes the result of one crawl's reconciliation to storage inside an
/// already-open transaction.
///
/// `new_archive_pages` lists, oldest first, the archive pages this crawl's
/// reconciliation freshly produced — the ones a strategy's `new_pages`
/// named, with the subscription entry already split off by the caller.
/// `replaced_page_ids` maps the URL of every *previously stored* archive
/// page this crawl is superseding (everything beyond `keep_existing`) to
/// its row id, so a page whose content changed but whose URL didn't can
/// reuse its row instead of a delete-then-insert. `kept_archive_page_ids`
/// lists, oldest first, the row ids of the old archive pages a strategy
/// declared unchanged (`keep_existing` of them) — their URL and posts are
/// left untouched, but their `idx` still has to move whenever the number of
/// freshly produced pages differs from the number being superseded, since
/// idx 1 always means "newest archive page" and both counts feed into that
/// numbering.
///
/// Final layout: the freshly produced pages occupy `idx` `1..=new_archive_
/// pages.len()` (oldest of that set at the highest idx in the range,
/// newest — adjacent to the subscription — at idx 1), and the kept pages
/// continue immediately afterward, oldest-first, at
/// `new_archive_pages.len()+1 ..= new_archive_pages.len()+kept_archive_
/// page_ids.len()`. Every page that needs a new idx — freshly produced or
/// merely shifted — is first staged at the *negative* of its final idx:
/// negative values can never collide with `(feed_id, idx)` or `(feed_id,
/// url)` uniqueness on a row that hasn't vacated yet, since every stored
/// idx is non-negative. Once posts have been reassigned and the superseded
/// rows that weren't reused have been deleted, a single `UPDATE ... SET idx
/// = -idx` flips every staged row to its real, final, positive idx.
pub async fn apply(
    feed_id: i64,
    subscription: &SubscriptionPage,
    new_archive_pages: &[String],
    replaced_page_ids: &HashMap<String, i64>,
    kept_archive_page_ids: &[i64],
    diff: &DiffEngine,
    txn: &mut Transaction<'_, Postgres>,
) -> CrawlResult<()> {
    let subscription_id = match subscription.existing_id {
        Some(id) => {
            sqlx::query("UPDATE page SET url = $1 WHERE id = $2")
                .bind(&subscription.url)
                .bind(id)
                .execute(&mut **txn)
                .await?;
            id
        }
        None => {
            sqlx::query_scalar("INSERT INTO page (feed_id, idx, url) VALUES ($1, 0, $2) RETURNING id")
                .bind(feed_id)
                .bind(&subscription.url)
                .fetch_one(&mut **txn)
                .await?
        }
    };

    let new_archive_count = new_archive_pages.len() as i32;
    let keep_existing = kept_archive_page_ids.len() as i32;

    // Stage the freshly produced archive pages, reusing a superseded row by
    // URL when one matches (the page kept its address but its content
    // changed) and inserting fresh otherwise.
    let mut reused_ids: HashSet<i64> = HashSet::new();
    let mut page_ids: HashMap<String, i64> = HashMap::new();
    for (position, url) in new_archive_pages.iter().enumerate() {
        let final_idx = new_archive_count - position as i32; // 1..=new_archive_count, oldest highest
        if let Some(&existing_id) = replaced_page_ids.get(url) {
            sqlx::query("UPDATE page SET idx = $1 WHERE id = $2")
                .bind(-final_idx)
                .bind(existing_id)
                .execute(&mut **txn)
                .await?;
            page_ids.insert(url.clone(), existing_id);
            reused_ids.insert(existing_id);
        } else {
            let page_id: i64 = sqlx::query_scalar(
                "INSERT INTO page (feed_id, idx, url) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(feed_id)
            .bind(-final_idx)
            .bind(url)
            .fetch_one(&mut **txn)
            .await?;
            page_ids.insert(url.clone(), page_id);
        }
    }

    // Shift the kept (unchanged) pages into the idx range immediately past
    // the freshly produced ones, preserving their relative oldest-first
    // order. Their URL and posts are never touched here.
    for (position, &page_id) in kept_archive_page_ids.iter().enumerate() {
        let final_idx = new_archive_count + keep_existing - position as i32;
        sqlx::query("UPDATE page SET idx = $1 WHERE id = $2")
            .bind(-final_idx)
            .bind(page_id)
            .execute(&mut **txn)
            .await?;
    }

    let page_id_for_url = |url: &str| -> i64 {
        if url == subscription.url {
            subscription_id
        } else {
            page_ids[url]
        }
    };

    for (page_url, posts) in &diff.updated {
        let page_id = page_id_for_url(page_url);
        for (post_id, metadata) in posts {
            sqlx::query(
                "UPDATE post SET page_id = $1, published = $2, updated = $3, season = $4, episode = $5 WHERE id = $6",
            )
            .bind(page_id)
            .bind(metadata.published)
            .bind(metadata.updated)
            .bind(metadata.season)
            .bind(metadata.episode)
            .bind(post_id)
            .execute(&mut **txn)
            .await?;
        }
    }

    for (guid, new_post) in &diff.new_posts {
        let page_id = match new_post.page_id {
            Some(id) => id,
            None => page_id_for_url(&new_post.page_url),
        };
        sqlx::query(
            "INSERT INTO post (guid, page_id, feed_id, published, updated, season, episode)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(guid)
        .bind(page_id)
        .bind(feed_id)
        .bind(new_post.metadata.published)
        .bind(new_post.metadata.updated)
        .bind(new_post.metadata.season)
        .bind(new_post.metadata.episode)
        .execute(&mut **txn)
        .await?;
    }

    let deleted = diff.deleted_post_ids();
    if !deleted.is_empty() {
        sqlx::query("DELETE FROM post WHERE id = ANY($1)")
            .bind(&deleted)
            .execute(&mut **txn)
            .await?;
    }

    // Every superseded page that wasn't reused by URL match above is now
    // vacated of posts (moved away or deleted in the steps above) and can be
    // dropped outright. RESTRICT on post.page_id is exactly why this must
    // run after the post reassignment/deletion above, not before.
    let leftover: Vec<i64> = replaced_page_ids
        .values()
        .copied()
        .filter(|id| !reused_ids.contains(id))
        .collect();
    if !leftover.is_empty() {
        sqlx::query("DELETE FROM page WHERE id = ANY($1)")
            .bind(&leftover)
            .execute(&mut **txn)
            .await?;
    }

    sqlx::query("UPDATE page SET idx = -idx WHERE feed_id = $1 AND idx < 0")
        .bind(feed_id)
        .execute(&mut **txn)
        .await?;

    Ok(())
}

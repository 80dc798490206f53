use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::feed::HttpFetcher;
use crate::history::StrategyRegistry;
use crate::orchestrator;

/// Spawns the long-lived scheduler task: every `scheduler_tick_secs`, polls
/// for feeds whose `next_check` has elapsed and crawls each one, bounding
/// how many crawls run concurrently with a semaphore. Errors from an
/// individual crawl are logged but never take the scheduler down — the
/// failing feed's `next_check` is bumped by `retry_backoff_secs` in its own
/// short transaction so it doesn't wedge into a tight retry loop.
pub fn spawn_scheduler(pool: PgPool, config: Arc<Config>) {
    tokio::spawn(async move {
        let fetcher = Arc::new(
            HttpFetcher::new(&config.user_agent, Duration::from_secs(config.request_timeout_secs))
                .expect("failed to build HTTP client"),
        );
        let registry = Arc::new(StrategyRegistry::with_default_strategies());
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_crawls));
        let mut interval = tokio::time::interval(Duration::from_secs(config.scheduler_tick_secs));

        loop {
            interval.tick().await;
            if let Err(e) = poll_due_feeds(&pool, &fetcher, &registry, &semaphore, &config).await {
                tracing::error!("scheduler tick failed: {e}");
            }
        }
    });
}

/// Loads feed ids whose `next_check` has already elapsed and spawns one
/// crawl task per feed, up to `semaphore`'s capacity running at once.
async fn poll_due_feeds(
    pool: &PgPool,
    fetcher: &Arc<HttpFetcher>,
    registry: &Arc<StrategyRegistry>,
    semaphore: &Arc<Semaphore>,
    config: &Config,
) -> Result<(), sqlx::Error> {
    let due: Vec<(i64,)> = sqlx::query_as("SELECT id FROM feed WHERE next_check <= now()")
        .fetch_all(pool)
        .await?;

    for (feed_id,) in due {
        let pool = pool.clone();
        let fetcher = Arc::clone(fetcher);
        let registry = Arc::clone(registry);
        let semaphore = Arc::clone(semaphore);
        let max_current_redirects = config.max_current_redirects;
        let poll_interval_secs = config.poll_interval_secs;
        let retry_backoff_secs = config.retry_backoff_secs;

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let result =
                orchestrator::crawl(feed_id, &pool, fetcher.as_ref(), &registry, max_current_redirects).await;

            match result {
                Ok(()) => {
                    if let Err(e) = bump_next_check(&pool, feed_id, poll_interval_secs).await {
                        tracing::error!(feed_id, "failed to schedule next check: {e}");
                    }
                }
                Err(e) => {
                    tracing::warn!(feed_id, "crawl failed: {e}");
                    if let Err(e) = bump_next_check(&pool, feed_id, retry_backoff_secs).await {
                        tracing::error!(feed_id, "failed to schedule retry: {e}");
                    }
                }
            }
        });
    }

    Ok(())
}

async fn bump_next_check(pool: &PgPool, feed_id: i64, delay_secs: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE feed SET next_check = $1 WHERE id = $2")
        .bind(Utc::now() + chrono::Duration::seconds(delay_secs))
        .bind(feed_id)
        .execute(pool)
        .await?;
    Ok(())
}

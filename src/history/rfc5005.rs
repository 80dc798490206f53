use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::{CrawlError, CrawlResult};
use crate::feed::{FeedDocument, FeedType, Fetcher};

use super::strategy::{FeedPage, OldPage, Strategy, UpdateFeedHistory};

/// spec.md §4.3: walks `rel="prev-archive"` links backward from the
/// subscription document, stopping the first time it lands on an archive
/// page already present in storage.
pub struct Rfc5005Strategy;

#[async_trait]
impl Strategy for Rfc5005Strategy {
    async fn reconcile(
        &self,
        fetcher: &dyn Fetcher,
        base: &FeedDocument,
        old_pages: &[OldPage],
    ) -> CrawlResult<Option<UpdateFeedHistory>> {
        if base.feed_type == FeedType::Complete {
            return Ok(Some(UpdateFeedHistory {
                keep_existing: 0,
                new_pages: vec![FeedPage::from_document(base)],
            }));
        }

        let known_positions: std::collections::HashMap<&str, usize> = old_pages
            .iter()
            .enumerate()
            .map(|(i, p)| (p.url.as_str(), i))
            .collect();

        let mut seen: HashSet<String> = HashSet::new();
        let mut fetched_newest_first: Vec<FeedPage> = Vec::new();
        let mut current = base.clone();
        let mut keep_existing = 0usize;

        loop {
            let Some(prev_url) = current.get_link("prev-archive") else {
                break;
            };

            // A page linking to itself, or a cycle back to an already-visited
            // URL, terminates the walk without matching an existing page.
            if prev_url == current.self_url() || !seen.insert(prev_url.clone()) {
                break;
            }

            if let Some(&pos) = known_positions.get(prev_url.as_str()) {
                keep_existing = pos + 1;
                break;
            }

            let response = fetcher
                .get(&prev_url, &[("Cache-Control", "max-stale"), ("Referer", &current.self_url())])
                .await?;
            if !(200..300).contains(&response.status) {
                return Err(CrawlError::UnexpectedStatus { url: prev_url, status: response.status });
            }
            let doc = FeedDocument::parse(&prev_url, &response)?;
            fetched_newest_first.push(FeedPage::from_document(&doc));
            current = doc;
        }

        if keep_existing == 0 && fetched_newest_first.is_empty() {
            // Neither a known page nor a new one turned up: this feed does
            // not use RFC 5005 paging at all.
            return Ok(None);
        }

        fetched_newest_first.reverse(); // oldest archive page first
        fetched_newest_first.push(FeedPage::from_document(base)); // subscription is newest

        Ok(Some(UpdateFeedHistory {
            keep_existing,
            new_pages: fetched_newest_first,
        }))
    }
}

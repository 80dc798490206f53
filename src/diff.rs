use std::collections::{HashMap, HashSet};

use crate::db::models::PostMetadata;

/// An existing post row, as loaded from a page that is about to be
/// reconsidered by this crawl.
#[derive(Debug, Clone)]
pub struct OldPost {
    pub id: i64,
    pub guid: String,
    pub page_id: i64,
    pub metadata: PostMetadata,
}

pub(crate) struct NewPost {
    pub(crate) page_url: String,
    pub(crate) page_id: Option<i64>,
    pub(crate) metadata: PostMetadata,
}

pub(crate) struct UpdatedPost {
    pub(crate) post_id: i64,
    pub(crate) metadata: PostMetadata,
}

/// Accumulates the difference between the archive this crawl reconciled and
/// what is already stored, one page at a time.
///
/// Feed previously-stored posts in with [`old_post`](Self::old_post) as each
/// page at or above the rewrite threshold is loaded, and freshly reconciled
/// pages in with [`new_page`](Self::new_page) newest first. A guid is
/// resolved the moment both sides have been seen for it; whichever call
/// supplies the second side settles the match, and every later call for that
/// guid is a no-op. That makes page order matter only in how quickly a match
/// is found, never in which match wins.
pub struct DiffEngine {
    old_posts: HashMap<String, OldPost>,
    pub(crate) new_posts: HashMap<String, NewPost>,
    matched: HashSet<String>,
    pub(crate) updated: HashMap<String, Vec<UpdatedPost>>,
}

impl DiffEngine {
    pub fn new() -> Self {
        DiffEngine {
            old_posts: HashMap::new(),
            new_posts: HashMap::new(),
            matched: HashSet::new(),
            updated: HashMap::new(),
        }
    }

    /// Registers a post that was stored on a page the crawl is about to
    /// reconsider. If a `new_page` call already supplied the matching side
    /// for this guid, the match is settled immediately; otherwise the post
    /// waits in `old_posts` until either a later `new_page` call claims it
    /// or it is found still missing when `apply` runs, meaning it was
    /// deleted upstream.
    pub fn old_post(&mut self, post: OldPost) {
        debug_assert!(!self.matched.contains(&post.guid));
        debug_assert!(!self.old_posts.contains_key(&post.guid));

        match self.new_posts.remove(&post.guid) {
            Some(new) => self.resolve(post.guid.clone(), post.id, post.page_id, post.metadata, new),
            None => {
                self.old_posts.insert(post.guid.clone(), post);
            }
        }
    }

    /// Registers one freshly reconciled page, newest-to-oldest call order.
    /// `page_id` is `Some` when a stored page row already has this exact
    /// URL (so an existing page is being refreshed in place), `None` when
    /// the page is brand new.
    pub fn new_page(&mut self, page_url: &str, page_id: Option<i64>, posts: &HashMap<String, PostMetadata>) {
        for (guid, metadata) in posts {
            if self.matched.contains(guid) || self.new_posts.contains_key(guid) {
                continue;
            }

            let new = NewPost {
                page_url: page_url.to_string(),
                page_id,
                metadata: *metadata,
            };

            match self.old_posts.remove(guid) {
                Some(old) => self.resolve(guid.clone(), old.id, old.page_id, old.metadata, new),
                None => {
                    self.new_posts.insert(guid.clone(), new);
                }
            }
        }
    }

    fn resolve(&mut self, guid: String, old_id: i64, old_page_id: i64, old_metadata: PostMetadata, new: NewPost) {
        self.matched.insert(guid);
        let moved = new.page_id != Some(old_page_id);
        let changed = new.metadata != old_metadata;
        if moved || changed {
            self.updated.entry(new.page_url).or_default().push(UpdatedPost {
                post_id: old_id,
                metadata: new.metadata,
            });
        }
    }

    /// Posts that were stored on a reconsidered page but never reappeared in
    /// any newly reconciled page — deleted upstream.
    pub fn deleted_post_ids(&self) -> Vec<i64> {
        self.old_posts.values().map(|p| p.id).collect()
    }

    pub fn new_post_count(&self) -> usize {
        self.new_posts.len()
    }

    pub fn updated_post_count(&self) -> usize {
        self.updated.values().map(Vec::len).sum()
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn meta(updated: i64) -> PostMetadata {
        PostMetadata {
            published: None,
            updated: Some(Utc.timestamp_opt(updated, 0).unwrap()),
            season: None,
            episode: None,
        }
    }

    fn posts(entries: &[(&str, i64)]) -> HashMap<String, PostMetadata> {
        entries.iter().map(|(g, u)| (g.to_string(), meta(*u))).collect()
    }

    #[test]
    fn empty_diff_is_a_no_op() {
        let diff = DiffEngine::new();
        assert!(diff.deleted_post_ids().is_empty());
        assert_eq!(diff.new_post_count(), 0);
        assert_eq!(diff.updated_post_count(), 0);
    }

    #[test]
    fn unmatched_old_post_is_reported_deleted() {
        let mut diff = DiffEngine::new();
        diff.old_post(OldPost { id: 1, guid: "a".into(), page_id: 10, metadata: meta(1) });
        diff.new_page("https://example.com/feed", Some(10), &posts(&[]));
        assert_eq!(diff.deleted_post_ids(), vec![1]);
        assert_eq!(diff.new_post_count(), 0);
    }

    #[test]
    fn unmatched_new_post_is_reported_added() {
        let mut diff = DiffEngine::new();
        diff.new_page("https://example.com/feed", Some(10), &posts(&[("a", 1)]));
        assert_eq!(diff.new_post_count(), 1);
        assert!(diff.deleted_post_ids().is_empty());
    }

    #[test]
    fn unchanged_post_on_same_page_produces_no_update() {
        let mut diff = DiffEngine::new();
        diff.old_post(OldPost { id: 1, guid: "a".into(), page_id: 10, metadata: meta(1) });
        diff.new_page("https://example.com/feed", Some(10), &posts(&[("a", 1)]));
        assert_eq!(diff.updated_post_count(), 0);
        assert!(diff.deleted_post_ids().is_empty());
        assert_eq!(diff.new_post_count(), 0);
    }

    #[test]
    fn changed_metadata_produces_an_update() {
        let mut diff = DiffEngine::new();
        diff.old_post(OldPost { id: 1, guid: "a".into(), page_id: 10, metadata: meta(1) });
        diff.new_page("https://example.com/feed", Some(10), &posts(&[("a", 2)]));
        assert_eq!(diff.updated_post_count(), 1);
    }

    #[test]
    fn moved_post_produces_an_update_even_with_unchanged_metadata() {
        let mut diff = DiffEngine::new();
        diff.old_post(OldPost { id: 1, guid: "a".into(), page_id: 10, metadata: meta(1) });
        // Seen first on a brand new page (no page_id yet) before the old
        // page housing it is loaded.
        diff.new_page("https://example.com/archive/2", None, &posts(&[("a", 1)]));
        assert_eq!(diff.updated_post_count(), 1);
    }

    #[test]
    fn first_new_page_match_wins_over_later_duplicates() {
        let mut diff = DiffEngine::new();
        diff.new_page("https://example.com/feed", Some(10), &posts(&[("a", 1)]));
        // A reordered archive might surface the same guid again further
        // back; it must be ignored now that it already matched.
        diff.new_page("https://example.com/archive/2", Some(11), &posts(&[("a", 99)]));
        assert_eq!(diff.new_post_count(), 1);
        assert_eq!(diff.updated_post_count(), 0);
    }

    #[test]
    fn old_post_arriving_after_its_match_is_already_resolved() {
        let mut diff = DiffEngine::new();
        diff.new_page("https://example.com/feed", Some(10), &posts(&[("a", 2)]));
        diff.old_post(OldPost { id: 1, guid: "a".into(), page_id: 10, metadata: meta(1) });
        assert_eq!(diff.updated_post_count(), 1);
        assert!(diff.deleted_post_ids().is_empty());
    }
}

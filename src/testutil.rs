//! Shared fixtures for strategy/diff unit tests: a minimal hand-rolled
//! `MockFetcher` (the `Fetcher` trait exists specifically so tests can
//! supply one instead of a live `reqwest::Client`) and a tiny Atom-XML
//! builder for the handful of fixture documents the RFC 5005 and
//! WordPress strategy tests fetch through it.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::CrawlError;
use crate::feed::{FetchedResponse, Fetcher};

/// Maps exact request URLs to canned responses. A URL with no entry yields
/// a 404, matching the two tolerated-404 positions spec.md describes
/// (WordPress forward pagination past the end, refresh past the oldest
/// stored page) without needing every test to register an explicit 404.
#[derive(Default)]
pub(crate) struct MockFetcher {
    responses: Mutex<HashMap<String, FetchedResponse>>,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self, url: &str, response: FetchedResponse) {
        self.responses.lock().unwrap().insert(url.to_string(), response);
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn get(&self, url: &str, _headers: &[(&str, &str)]) -> Result<FetchedResponse, CrawlError> {
        Ok(self.responses.lock().unwrap().get(url).cloned().unwrap_or(FetchedResponse {
            status: 404,
            effective_url: url.to_string(),
            headers: HashMap::new(),
            link_headers: Vec::new(),
            body: Vec::new(),
        }))
    }
}

pub(crate) fn ok_response(body: Vec<u8>) -> FetchedResponse {
    FetchedResponse {
        status: 200,
        effective_url: String::new(),
        headers: HashMap::new(),
        link_headers: Vec::new(),
        body,
    }
}

pub(crate) struct AtomEntry {
    pub id: &'static str,
    pub published: &'static str,
    pub updated: &'static str,
}

/// Builds a minimal well-formed Atom 1.0 document, optionally carrying the
/// `http://purl.org/syndication/history/1.0` `complete`/`archive` marker
/// and `self`/`current`/`prev-archive` link relations (spec.md §4.1, §4.3).
pub(crate) fn atom(
    self_url: &str,
    history_marker: Option<&str>,
    links: &[(&str, &str)],
    entries: &[AtomEntry],
) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    out.push_str(r#"<feed xmlns="http://www.w3.org/2005/Atom" xmlns:fh="http://purl.org/syndication/history/1.0">"#);
    out.push_str("<title>fixture</title>");
    out.push_str(&format!("<id>{self_url}</id>"));
    out.push_str("<updated>2024-01-01T00:00:00Z</updated>");
    out.push_str(&format!(r#"<link rel="self" href="{self_url}"/>"#));
    for (rel, href) in links {
        out.push_str(&format!(r#"<link rel="{rel}" href="{href}"/>"#));
    }
    if let Some(marker) = history_marker {
        out.push_str(&format!("<fh:{marker}/>"));
    }
    for entry in entries {
        out.push_str("<entry>");
        out.push_str(&format!("<id>{}</id>", entry.id));
        out.push_str("<title>post</title>");
        out.push_str(&format!("<published>{}</published>", entry.published));
        out.push_str(&format!("<updated>{}</updated>", entry.updated));
        out.push_str("</entry>");
    }
    out.push_str("</feed>");
    out.into_bytes()
}

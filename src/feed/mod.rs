pub mod document;
pub mod fetcher;

pub use document::{FeedDocument, FeedLink, FeedType, ParsedEntry};
pub use fetcher::{FetchedResponse, Fetcher, HttpFetcher, ProxyFetcher};

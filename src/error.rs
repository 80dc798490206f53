/// Errors the crawler can raise, per the taxonomy in spec.md §7.
///
/// Input-classification errors (`ArchiveWithoutCurrent`, `NoHistoryFound`)
/// are reported to the caller as-is. Transport and storage errors are
/// propagated so the caller (the scheduler) can decide whether to retry;
/// a `Database` variant surfacing here almost always means the diff engine
/// produced a state that violates a constraint, i.e. a bug rather than
/// something retrying will fix.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("archive document at {url:?} has no rel=\"current\" link")]
    ArchiveWithoutCurrent { url: String },

    #[error("no history strategy claimed feed at {url:?}")]
    NoHistoryFound { url: String },

    #[error("too many rel=\"current\"/self redirects resolving {url:?}")]
    TooManyRedirects { url: String },

    #[error("unexpected HTTP status {status} fetching {url:?}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("could not parse feed document: {0}")]
    Parse(String),
}

pub type CrawlResult<T> = Result<T, CrawlError>;

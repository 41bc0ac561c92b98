use thiserror::Error;

/// Errors surfaced by the cache and notification manager.
#[derive(Debug, Error)]
pub enum ShellCacheError {
    /// The upstream origin could not be reached or failed mid-response.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// The notification surface rejected a show/close/focus request.
    /// Treated as best-effort everywhere: log and continue.
    #[error("notification surface failed: {0}")]
    Sink(String),

    /// The notifier task is gone.
    #[error("notifier is shut down")]
    NotifierClosed,
}

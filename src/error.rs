//! Error taxonomy for catalog loads.
//!
//! Record-level problems never surface here as errors: they become a
//! [`SkipReason`], get logged and counted, and the load continues. Everything
//! in [`LoadError`] aborts the current attempt only; the live catalog is
//! never touched by a failed load.

use thiserror::Error;

use crate::database::Database;

/// Fatal outcome of one load attempt.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The configured source does not exist (yet). Non-fatal for the driver,
    /// which stays `NotLoaded` and retries later.
    #[error("catalog source not found: {0}")]
    SourceNotFound(String),

    /// Bad nesting, unparsable document, or a required document with the
    /// wrong shape.
    #[error("malformed catalog source: {0}")]
    MalformedSource(String),

    /// Failure fetching a required top-level document.
    #[error("network error: {0}")]
    Network(String),

    /// Cancellation was requested through `Loader::shutdown`.
    #[error("load cancelled")]
    Cancelled,

    /// The staged catalog could not be serialized for its persistent id.
    #[error("failed to finalize catalog: {0}")]
    Finalize(String),

    /// The load thread could not be started, or died without reporting.
    #[error("load thread failed: {0}")]
    Thread(String),
}

impl LoadError {
    /// Whether an operator should see this as a failure. Cancellation is
    /// requested by the owner and is not one.
    pub fn is_operator_facing(&self) -> bool {
        !matches!(self, LoadError::Cancelled)
    }
}

impl From<quick_xml::Error> for LoadError {
    fn from(e: quick_xml::Error) -> Self {
        LoadError::MalformedSource(e.to_string())
    }
}

/// Why a single record was dropped without failing the load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("record has no external unique id")]
    MissingId,
    #[error("record {0} has no name")]
    MissingName(String),
    #[error("duplicate external unique id {0}")]
    DuplicateId(String),
}

/// Failure acquiring one art asset. Always absorbed per record.
#[derive(Debug, Error)]
pub enum ArtError {
    #[error("art I/O error for {locator}: {source}")]
    Io {
        locator: String,
        #[source]
        source: std::io::Error,
    },
    #[error("art request for {locator} failed: {message}")]
    Http { locator: String, message: String },
    #[error("could not decode art: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image has no source for the requested resolution")]
    Unavailable,
    #[error("no such image")]
    UnknownImage,
}

/// Returned by `Loader::start_load` while a load is already in flight. The
/// rejected staging database is handed back untouched.
#[derive(Debug, Error)]
#[error("a catalog load is already in progress")]
pub struct AlreadyLoading(pub Database);

/// Returned by `Loader::complete_load` before the load thread has reached a
/// terminal state (or, after a timed-out shutdown, before it has exited).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("catalog load has not finished yet")]
pub struct NotDoneYet;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cancellation_is_quiet() {
        assert!(!LoadError::Cancelled.is_operator_facing());
        assert!(LoadError::SourceNotFound("x".into()).is_operator_facing());
        assert!(LoadError::Thread("panicked".into()).is_operator_facing());
    }
}

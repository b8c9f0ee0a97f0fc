// Durable stores backing the relay.
//
// Every store follows the same shape: an enum with a Postgres variant for
// production and a Memory variant for tests and local development without a
// database. Handlers never see which variant they are talking to.

pub mod alerts;
pub mod feedback;
pub mod reports;

pub use alerts::AlertStore;
pub use feedback::{FeedbackStore, UnreadSummary};
pub use reports::ReportDirectory;

/// Store-level failure, mapped to HTTP/WS error codes at the edges.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(&'static str),
    #[error("store unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Self::NotFound("row not found"),
            other => Self::Unavailable(other.into()),
        }
    }
}

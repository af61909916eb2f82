//! crates/espelho_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{ProgressAdvance, SombraProgress, SombraResponse};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// The recorder was invoked before the user's progress record exists.
    #[error("Sombra progress not initialized for user {0}")]
    NotInitialized(Uuid),
    /// The user has exhausted today's or this week's quota.
    #[error("User {0} is not eligible to answer a question right now")]
    NotEligible(Uuid),
    /// Optimistic version check failed: another submission advanced the
    /// progress record between the eligibility check and the write.
    #[error("Concurrent progress update detected for user {0}")]
    Conflict(Uuid),
    /// The commentary service failed or returned no usable text. Surfaced
    /// before any write, so no response record exists for the attempt.
    #[error("Commentary generation unavailable: {0}")]
    GenerationUnavailable(String),
    /// A document store read or write failed.
    #[error("Document store error: {0}")]
    Store(String),
    /// A catch-all for any other unexpected errors.
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The document-store collaborator holding progress and response records.
///
/// Records are partitioned by `user_id`; response records are append-only.
#[async_trait]
pub trait SombraStore: Send + Sync {
    /// Creates the progress record if it does not exist yet and returns the
    /// stored record either way. Must never overwrite an existing record.
    async fn initialize_progress(&self, progress: &SombraProgress) -> PortResult<SombraProgress>;

    /// Fetches the user's progress record, or `None` if never enrolled.
    async fn get_progress(&self, user_id: Uuid) -> PortResult<Option<SombraProgress>>;

    /// Counts the user's responses with `created_at >= since`.
    async fn count_responses_since(&self, user_id: Uuid, since: DateTime<Utc>) -> PortResult<u32>;

    /// Whether at least one response exists with `created_at >= since`.
    /// An existence check; implementations may stop at the first match.
    async fn has_response_since(&self, user_id: Uuid, since: DateTime<Utc>) -> PortResult<bool>;

    /// The question texts of every response the user has ever recorded.
    async fn answered_question_texts(&self, user_id: Uuid) -> PortResult<Vec<String>>;

    /// The user's most recent responses, newest first.
    async fn recent_responses(&self, user_id: Uuid, limit: u32) -> PortResult<Vec<SombraResponse>>;

    /// Appends a response record and applies the progress advance as one
    /// atomic unit. The advance is a merge-update: fields outside
    /// `ProgressAdvance` are preserved.
    ///
    /// `expected_count` is the answered count the caller read before
    /// generating commentary; implementations must reject the write with
    /// `PortError::Conflict` if the stored count no longer matches.
    async fn append_response(
        &self,
        response: &SombraResponse,
        advance: &ProgressAdvance,
        expected_count: u32,
    ) -> PortResult<()>;
}

/// The text-generation collaborator producing commentary grounded in the
/// masters' teachings.
#[async_trait]
pub trait CommentaryService: Send + Sync {
    /// Generates commentary for an answered question. `masters` is the
    /// roster the prompt may draw on; citation extraction happens in the
    /// engine, not here.
    async fn generate_commentary(
        &self,
        question: &str,
        answer: &str,
        masters: &[String],
    ) -> PortResult<String>;
}

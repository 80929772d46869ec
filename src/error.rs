use thiserror::Error;

/// Errors surfaced by the matchmaking pipeline.
///
/// Dead ends inside the searches are not errors, and neither is a pool that
/// simply cannot fill a game: both end up as an empty result.
#[derive(Debug, Error)]
pub enum MatchmakingError {
    /// Rejected before any search starts.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A match unit must carry at least one user.
    #[error("match unit {unit_id} has no members")]
    EmptyUnit { unit_id: u64 },

    /// Team merge called with an empty or out-of-range member set.
    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    /// The optimization backend rejected the model or misbehaved.
    #[error("optimization backend failure: {0}")]
    Backend(String),

    /// The backend proved the selection model infeasible.
    #[error("no solution: {0}")]
    Unsolvable(String),

    /// A unit was placed in more than one selected team.
    #[error("match unit {unit_id} selected more than once")]
    DisjointnessViolated { unit_id: u64 },
}

pub type Result<T> = std::result::Result<T, MatchmakingError>;

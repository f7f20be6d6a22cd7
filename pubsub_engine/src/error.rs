//! Engine error types.

use thiserror::Error;

/// Semantic errors raised by table operations.
///
/// These are request-scoped: the table state is unchanged when one is
/// returned, and the connection stays usable.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A KEY constraint would be violated, or a KEY designation found
    /// duplicate values.
    #[error("column {0} is not unique")]
    NotUnique(String),

    /// KEY or TAG designation of a column that already carries an index.
    #[error("column {0} is already indexed")]
    AlreadyIndexed(String),

    /// UNSUBSCRIBE matched no subscription.
    #[error("subscription not found")]
    SubscriptionNotFound,
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

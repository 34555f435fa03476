//! Identity resolution contracts.
//!
//! The long-lived identity data (users, roles, profiles) is owned by the
//! external identity service; the messaging core consumes it read-mostly
//! through these traits. Chat tokens are the one credential the core issues
//! itself: short-lived, single-purpose WebSocket tickets.

use chrono::Duration;
use telemed_types::error::RepositoryError;
use telemed_types::token::ChatToken;
use telemed_types::user::User;
use uuid::Uuid;

/// Read access to platform users.
pub trait UserRepository: Send + Sync {
    /// Get a user by id.
    fn get_user(
        &self,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<User>, RepositoryError>> + Send;

    /// Insert a user row (collaborator and test surface; the identity
    /// service owns the data).
    fn create_user(
        &self,
        user: &User,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

/// Issuance and redemption of WebSocket chat tokens.
pub trait TokenRepository: Send + Sync {
    /// Issue a fresh token for `user_id`, valid for `ttl`.
    ///
    /// The returned [`ChatToken`] carries the plaintext secret; only a
    /// digest is stored.
    fn issue(
        &self,
        user_id: &Uuid,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<ChatToken, RepositoryError>> + Send;

    /// Resolve a presented token to its user, if the token exists and has
    /// not expired.
    fn redeem(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Option<Uuid>, RepositoryError>> + Send;

    /// Delete expired tokens. Returns the number removed.
    fn purge_expired(
        &self,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}

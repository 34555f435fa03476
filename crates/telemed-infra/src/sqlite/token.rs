//! SQLite chat token repository.
//!
//! Chat tokens are short-lived WebSocket tickets. Only a SHA-256 digest of
//! the token is stored; the plaintext exists once, in the issue reply.

use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::Row;
use telemed_core::identity::TokenRepository;
use telemed_types::error::RepositoryError;
use telemed_types::token::ChatToken;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `TokenRepository`.
pub struct SqliteTokenRepository {
    pool: DatabasePool,
}

impl SqliteTokenRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Compute the SHA-256 digest of a token (lowercase hex).
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{digest:x}")
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "tmed_{}",
        bytes.iter().map(|b| format!("{b:02x}")).collect::<String>()
    )
}

impl TokenRepository for SqliteTokenRepository {
    async fn issue(&self, user_id: &Uuid, ttl: Duration) -> Result<ChatToken, RepositoryError> {
        let token = generate_token();
        let now = Utc::now();
        let expires_at = now + ttl;

        sqlx::query(
            "INSERT INTO chat_tokens (token_hash, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(hash_token(&token))
        .bind(user_id.to_string())
        .bind(expires_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(ChatToken {
            token,
            user_id: *user_id,
            expires_at,
        })
    }

    async fn redeem(&self, token: &str) -> Result<Option<Uuid>, RepositoryError> {
        let row = sqlx::query(
            "SELECT user_id FROM chat_tokens WHERE token_hash = ? AND expires_at > ?",
        )
        .bind(hash_token(token))
        .bind(Utc::now().to_rfc3339())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let user_id: String = row
                    .try_get("user_id")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                let user_id = Uuid::parse_str(&user_id)
                    .map_err(|e| RepositoryError::Query(format!("invalid user_id: {e}")))?;
                Ok(Some(user_id))
            }
            None => Ok(None),
        }
    }

    async fn purge_expired(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM chat_tokens WHERE expires_at <= ?")
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    async fn seed_user(pool: &DatabasePool) -> Uuid {
        let id = Uuid::now_v7();
        sqlx::query(
            "INSERT INTO users (id, role, display_name, avatar_path, created_at) VALUES (?, 'patient', 'Test', NULL, ?)",
        )
        .bind(id.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&pool.writer)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn test_issue_and_redeem() {
        let pool = test_pool().await;
        let repo = SqliteTokenRepository::new(pool.clone());
        let user_id = seed_user(&pool).await;

        let token = repo.issue(&user_id, Duration::minutes(5)).await.unwrap();
        assert!(token.token.starts_with("tmed_"));
        assert_eq!(token.user_id, user_id);

        let resolved = repo.redeem(&token.token).await.unwrap();
        assert_eq!(resolved, Some(user_id));
    }

    #[tokio::test]
    async fn test_unknown_token_is_rejected() {
        let pool = test_pool().await;
        let repo = SqliteTokenRepository::new(pool);

        let resolved = repo.redeem("tmed_deadbeef").await.unwrap();
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let pool = test_pool().await;
        let repo = SqliteTokenRepository::new(pool.clone());
        let user_id = seed_user(&pool).await;

        let token = repo.issue(&user_id, Duration::seconds(-1)).await.unwrap();
        let resolved = repo.redeem(&token.token).await.unwrap();
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn test_plaintext_token_is_not_stored() {
        let pool = test_pool().await;
        let repo = SqliteTokenRepository::new(pool.clone());
        let user_id = seed_user(&pool).await;

        let token = repo.issue(&user_id, Duration::minutes(5)).await.unwrap();

        let row = sqlx::query("SELECT token_hash FROM chat_tokens")
            .fetch_one(&pool.reader)
            .await
            .unwrap();
        let stored: String = row.get("token_hash");
        assert_ne!(stored, token.token);
        assert_eq!(stored, hash_token(&token.token));
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_live_tokens() {
        let pool = test_pool().await;
        let repo = SqliteTokenRepository::new(pool.clone());
        let user_id = seed_user(&pool).await;

        let live = repo.issue(&user_id, Duration::minutes(5)).await.unwrap();
        repo.issue(&user_id, Duration::seconds(-1)).await.unwrap();
        repo.issue(&user_id, Duration::seconds(-10)).await.unwrap();

        let purged = repo.purge_expired().await.unwrap();
        assert_eq!(purged, 2);

        let resolved = repo.redeem(&live.token).await.unwrap();
        assert_eq!(resolved, Some(user_id));
    }
}

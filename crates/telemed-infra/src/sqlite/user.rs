//! SQLite user repository.
//!
//! The identity service owns user data; the messaging core reads the
//! columns it needs for authorization and participant summaries. The insert
//! path exists for collaborators and tests.

use chrono::{DateTime, Utc};
use sqlx::Row;
use telemed_core::identity::UserRepository;
use telemed_types::error::RepositoryError;
use telemed_types::user::{User, UserRole};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `UserRepository`.
pub struct SqliteUserRepository {
    pool: DatabasePool,
}

impl SqliteUserRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct UserRow {
    id: String,
    role: String,
    display_name: String,
    avatar_path: Option<String>,
    created_at: String,
}

impl UserRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            role: row.try_get("role")?,
            display_name: row.try_get("display_name")?,
            avatar_path: row.try_get("avatar_path")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_user(self) -> Result<User, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid user id: {e}")))?;
        let role: UserRole = self
            .role
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))?;

        Ok(User {
            id,
            role,
            display_name: self.display_name,
            avatar_path: self.avatar_path,
            created_at,
        })
    }
}

impl UserRepository for SqliteUserRepository {
    async fn get_user(&self, user_id: &Uuid) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let user_row =
                    UserRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(user_row.into_user()?))
            }
            None => Ok(None),
        }
    }

    async fn create_user(&self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO users (id, role, display_name, avatar_path, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user.id.to_string())
        .bind(user.role.to_string())
        .bind(&user.display_name)
        .bind(&user.avatar_path)
        .bind(user.created_at.to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
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

    fn make_user(role: UserRole) -> User {
        User {
            id: Uuid::now_v7(),
            role,
            display_name: "Dr. Weiss".to_string(),
            avatar_path: Some("/avatars/weiss.png".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let pool = test_pool().await;
        let repo = SqliteUserRepository::new(pool);

        let user = make_user(UserRole::Doctor);
        repo.create_user(&user).await.unwrap();

        let found = repo.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.role, UserRole::Doctor);
        assert_eq!(found.display_name, "Dr. Weiss");
        assert_eq!(found.avatar_path.as_deref(), Some("/avatars/weiss.png"));
    }

    #[tokio::test]
    async fn test_get_missing_user_is_none() {
        let pool = test_pool().await;
        let repo = SqliteUserRepository::new(pool);
        let found = repo.get_user(&Uuid::now_v7()).await.unwrap();
        assert!(found.is_none());
    }
}

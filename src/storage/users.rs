use super::schema::Database;
use super::types::{now_millis, StoreError, User, UserId};

impl Database {
    // ========================================================================
    // User Operations
    // ========================================================================

    /// Register a new user. Names are unique.
    pub async fn create_user(&self, name: &str) -> Result<User, StoreError> {
        let now = now_millis();
        sqlx::query_as(
            "INSERT INTO users (name, created_at, updated_at) VALUES (?, ?, ?)
             RETURNING id, name, created_at, updated_at",
        )
        .bind(name)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::on_conflict(e, "user"))
    }

    pub async fn get_user(&self, name: &str) -> Result<User, StoreError> {
        sqlx::query_as("SELECT id, name, created_at, updated_at FROM users WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("user"))
    }

    pub async fn get_user_by_id(&self, id: UserId) -> Result<User, StoreError> {
        sqlx::query_as("SELECT id, name, created_at, updated_at FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound("user"))
    }

    /// All users in registration order.
    pub async fn get_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(
            sqlx::query_as("SELECT id, name, created_at, updated_at FROM users ORDER BY id")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// Delete every user. Feeds, follows and posts go with them (ON DELETE CASCADE).
    pub async fn delete_all_users(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM users").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

use super::schema::Database;
use super::types::{sanitize_name, StoreError, User};
use crate::util::new_api_id;

impl Database {
    // ========================================================================
    // User Operations
    // ========================================================================

    /// Create a user. The username is sanitized (empty rejected); fails with
    /// [`StoreError::Conflict`] if it is taken.
    pub async fn create_user(&self, username: &str) -> Result<User, StoreError> {
        let username = sanitize_name(username)?;
        let api_id = new_api_id();

        let row: (i64,) = sqlx::query_as(
            "INSERT INTO users (api_id, username) VALUES (?, ?) RETURNING id",
        )
        .bind(&api_id)
        .bind(&username)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match StoreError::from_sqlx(e) {
            StoreError::Conflict(_) => StoreError::Conflict(format!("user {}", username)),
            other => other,
        })?;

        Ok(User {
            id: row.0,
            api_id,
            username,
        })
    }

    pub async fn user_with_id(&self, api_id: &str) -> Result<Option<User>, StoreError> {
        let row: Option<(i64, String, String)> =
            sqlx::query_as("SELECT id, api_id, username FROM users WHERE api_id = ?")
                .bind(api_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id, api_id, username)| User {
            id,
            api_id,
            username,
        }))
    }

    /// Look up a user by name. The argument passes through the same
    /// sanitization as [`create_user`], so the lookup matches what was
    /// stored; a name that sanitizes to nothing matches no one.
    ///
    /// [`create_user`]: Database::create_user
    pub async fn user_with_name(&self, username: &str) -> Result<Option<User>, StoreError> {
        let username = match sanitize_name(username) {
            Ok(name) => name,
            Err(StoreError::InvalidName) => return Ok(None),
            Err(other) => return Err(other),
        };

        let row: Option<(i64, String, String)> =
            sqlx::query_as("SELECT id, api_id, username FROM users WHERE username = ?")
                .bind(&username)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id, api_id, username)| User {
            id,
            api_id,
            username,
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, StoreError};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_create_user_and_lookup() {
        let db = test_db().await;

        let user = db.create_user("jane").await.unwrap();
        assert!(!user.api_id.is_empty());

        let by_id = db.user_with_id(&user.api_id).await.unwrap().unwrap();
        assert_eq!(by_id.username, "jane");

        let by_name = db.user_with_name("jane").await.unwrap().unwrap();
        assert_eq!(by_name.api_id, user.api_id);
    }

    #[tokio::test]
    async fn test_create_user_duplicate_name_conflicts() {
        let db = test_db().await;

        db.create_user("jane").await.unwrap();
        let err = db.create_user("jane").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_create_user_empty_name_rejected() {
        let db = test_db().await;

        let err = db.create_user("   ").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidName));

        let err = db.create_user("\x1b\x07").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidName));
    }

    #[tokio::test]
    async fn test_user_with_name_sanitizes_lookup() {
        let db = test_db().await;
        db.create_user("  jane  ").await.unwrap();

        // Stored trimmed; the padded lookup finds it anyway.
        let user = db.user_with_name("  jane  ").await.unwrap().unwrap();
        assert_eq!(user.username, "jane");

        assert!(db.user_with_name("   ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_user_with_id_missing() {
        let db = test_db().await;
        assert!(db.user_with_id("bogus").await.unwrap().is_none());
    }
}

use sqlx::QueryBuilder;

use super::entries::EntryScope;
use super::schema::Database;
use super::types::{sanitize_name, Entry, Marker, Page, StoreError, Tag, User};
use crate::util::new_api_id;

/// Entry-id batch size for association statements; keeps bind parameters
/// well under SQLite's limit.
const APPLY_BATCH_SIZE: usize = 100;

impl Database {
    // ========================================================================
    // Tag Operations
    // ========================================================================

    /// Create a tag with an empty association set. The name is sanitized
    /// (empty rejected); a duplicate name for this user fails with
    /// [`StoreError::Conflict`].
    pub async fn create_tag(&self, user: &User, name: &str) -> Result<Tag, StoreError> {
        let name = sanitize_name(name)?;

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM tags WHERE user_id = ? AND name = ?")
                .bind(user.id)
                .bind(&name)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Err(StoreError::Conflict(format!("tag {}", name)));
        }

        let api_id = new_api_id();
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO tags (api_id, user_id, name) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(&api_id)
        .bind(user.id)
        .bind(&name)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(Tag {
            id: row.0,
            api_id,
            name,
        })
    }

    /// Rename a tag. Fails with [`StoreError::NotFound`] on a missing target
    /// and [`StoreError::Conflict`] on a colliding name.
    pub async fn rename_tag(
        &self,
        user: &User,
        api_id: &str,
        new_name: &str,
    ) -> Result<Tag, StoreError> {
        let name = sanitize_name(new_name)?;
        let tag_id = self.resolve_tag_id(user, api_id).await?;

        let colliding: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM tags WHERE user_id = ? AND name = ? AND id != ?")
                .bind(user.id)
                .bind(&name)
                .bind(tag_id)
                .fetch_optional(&self.pool)
                .await?;
        if colliding.is_some() {
            return Err(StoreError::Conflict(format!("tag {}", name)));
        }

        sqlx::query("UPDATE tags SET name = ? WHERE id = ?")
            .bind(&name)
            .bind(tag_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        Ok(Tag {
            id: tag_id,
            api_id: api_id.to_owned(),
            name,
        })
    }

    /// Delete a tag and its associations. The tagged entries themselves are
    /// untouched.
    pub async fn delete_tag(&self, user: &User, api_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM tags WHERE api_id = ? AND user_id = ?")
            .bind(api_id)
            .bind(user.id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn tag_with_id(&self, user: &User, api_id: &str) -> Result<Option<Tag>, StoreError> {
        let row: Option<(i64, String, String)> =
            sqlx::query_as("SELECT id, api_id, name FROM tags WHERE api_id = ? AND user_id = ?")
                .bind(api_id)
                .bind(user.id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id, api_id, name)| Tag { id, api_id, name }))
    }

    /// List the user's tags in creation order.
    pub async fn tags(
        &self,
        user: &User,
        page: &Page,
    ) -> Result<(Vec<Tag>, Option<String>), StoreError> {
        let limit = page.limit();

        let cursor = match page.cursor() {
            Some(api_id) => {
                let row: Option<(i64,)> =
                    sqlx::query_as("SELECT id FROM tags WHERE api_id = ? AND user_id = ?")
                        .bind(api_id)
                        .bind(user.id)
                        .fetch_optional(&self.pool)
                        .await?;
                match row {
                    Some((id,)) => id,
                    None => return Ok((Vec::new(), None)),
                }
            }
            None => 0,
        };

        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT id, api_id, name FROM tags \
             WHERE user_id = ? AND id >= ? ORDER BY id LIMIT ?",
        )
        .bind(user.id)
        .bind(cursor)
        .bind(limit + 1)
        .fetch_all(&self.pool)
        .await?;

        let mut tags: Vec<Tag> = rows
            .into_iter()
            .map(|(id, api_id, name)| Tag { id, api_id, name })
            .collect();
        let next = if tags.len() as i64 > limit {
            tags.pop().map(|t| t.api_id)
        } else {
            None
        };
        Ok((tags, next))
    }

    // ========================================================================
    // Associations
    // ========================================================================

    /// Associate a tag with each named entry, atomically.
    ///
    /// Entry ids that are unknown or belong to another user are silently
    /// skipped; re-applying an existing association is a no-op (the
    /// association set is keyed on `(tag_id, entry_id)`). Only a missing
    /// tag fails, with [`StoreError::NotFound`].
    pub async fn apply_tag(
        &self,
        user: &User,
        tag_api_id: &str,
        entry_api_ids: &[String],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let tag: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM tags WHERE api_id = ? AND user_id = ?")
                .bind(tag_api_id)
                .bind(user.id)
                .fetch_optional(&mut *tx)
                .await?;
        let tag_id = tag.ok_or(StoreError::NotFound)?.0;

        for chunk in entry_api_ids.chunks(APPLY_BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("INSERT OR IGNORE INTO entry_tags (tag_id, entry_id) SELECT ");
            builder.push_bind(tag_id);
            builder.push(", id FROM entries WHERE user_id = ");
            builder.push_bind(user.id);
            builder.push(" AND api_id IN (");
            let mut separated = builder.separated(", ");
            for api_id in chunk {
                separated.push_bind(api_id);
            }
            separated.push_unseparated(")");

            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Detach a tag from each named entry; the inverse of [`apply_tag`].
    /// Unknown ids and absent associations are skipped.
    ///
    /// [`apply_tag`]: Database::apply_tag
    pub async fn remove_tag(
        &self,
        user: &User,
        tag_api_id: &str,
        entry_api_ids: &[String],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let tag: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM tags WHERE api_id = ? AND user_id = ?")
                .bind(tag_api_id)
                .bind(user.id)
                .fetch_optional(&mut *tx)
                .await?;
        let tag_id = tag.ok_or(StoreError::NotFound)?.0;

        for chunk in entry_api_ids.chunks(APPLY_BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("DELETE FROM entry_tags WHERE tag_id = ");
            builder.push_bind(tag_id);
            builder.push(" AND entry_id IN (SELECT id FROM entries WHERE user_id = ");
            builder.push_bind(user.id);
            builder.push(" AND api_id IN (");
            let mut separated = builder.separated(", ");
            for api_id in chunk {
                separated.push_bind(api_id);
            }
            separated.push_unseparated("))");

            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// List entries carrying a tag, with the usual ordering, marker filter,
    /// and cursor semantics. Fails with [`StoreError::NotFound`] if the tag
    /// is missing for this user.
    pub async fn tag_entries(
        &self,
        user: &User,
        tag_api_id: &str,
        page: &Page,
        newest_first: bool,
        marker: Option<Marker>,
    ) -> Result<(Vec<Entry>, Option<String>), StoreError> {
        let tag_id = self.resolve_tag_id(user, tag_api_id).await?;
        self.list_entries(user, EntryScope::Tag(tag_id), page, newest_first, marker)
            .await
    }

    // ========================================================================
    // Marking
    // ========================================================================

    /// Transition every entry carrying a tag to `marker`, in one transaction.
    pub async fn mark_tag(
        &self,
        user: &User,
        api_id: &str,
        marker: Marker,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let tag: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM tags WHERE api_id = ? AND user_id = ?")
                .bind(api_id)
                .bind(user.id)
                .fetch_optional(&mut *tx)
                .await?;
        let tag_id = tag.ok_or(StoreError::NotFound)?.0;

        sqlx::query(
            "UPDATE entries SET read = ? WHERE user_id = ? \
             AND id IN (SELECT entry_id FROM entry_tags WHERE tag_id = ?)",
        )
        .bind(marker.as_read_flag())
        .bind(user.id)
        .bind(tag_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

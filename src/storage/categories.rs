use super::schema::Database;
use super::types::{
    feed_from_row, sanitize_name, stats_from_row, Category, Feed, FeedRow, Marker, Page, Stats,
    StatsRow, StoreError, User,
};
use crate::util::new_api_id;

impl Database {
    // ========================================================================
    // Category Operations
    // ========================================================================

    /// Create a category. The name is sanitized (control chars stripped,
    /// whitespace trimmed, empty rejected); a duplicate name for this user
    /// fails with [`StoreError::Conflict`].
    pub async fn create_category(&self, user: &User, name: &str) -> Result<Category, StoreError> {
        let name = sanitize_name(name)?;

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM categories WHERE user_id = ? AND name = ?")
                .bind(user.id)
                .bind(&name)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Err(StoreError::Conflict(format!("category {}", name)));
        }

        let api_id = new_api_id();
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO categories (api_id, user_id, name) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(&api_id)
        .bind(user.id)
        .bind(&name)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(Category {
            id: row.0,
            api_id,
            name,
        })
    }

    /// Rename a category. Fails with [`StoreError::NotFound`] on a missing
    /// target and [`StoreError::Conflict`] on a colliding name.
    pub async fn rename_category(
        &self,
        user: &User,
        api_id: &str,
        new_name: &str,
    ) -> Result<Category, StoreError> {
        let name = sanitize_name(new_name)?;
        let category_id = self.resolve_category_id(user, api_id).await?;

        let colliding: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM categories WHERE user_id = ? AND name = ? AND id != ?")
                .bind(user.id)
                .bind(&name)
                .bind(category_id)
                .fetch_optional(&self.pool)
                .await?;
        if colliding.is_some() {
            return Err(StoreError::Conflict(format!("category {}", name)));
        }

        sqlx::query("UPDATE categories SET name = ? WHERE id = ?")
            .bind(&name)
            .bind(category_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        Ok(Category {
            id: category_id,
            api_id: api_id.to_owned(),
            name,
        })
    }

    /// Delete a category. Member feeds move to uncategorized in the same
    /// transaction; they are never deleted.
    pub async fn delete_category(&self, user: &User, api_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM categories WHERE api_id = ? AND user_id = ?")
                .bind(api_id)
                .bind(user.id)
                .fetch_optional(&mut *tx)
                .await?;
        let category_id = row.ok_or(StoreError::NotFound)?.0;

        sqlx::query("UPDATE feeds SET category_id = NULL WHERE category_id = ?")
            .bind(category_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(category_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn category_with_id(
        &self,
        user: &User,
        api_id: &str,
    ) -> Result<Option<Category>, StoreError> {
        let row: Option<(i64, String, String)> =
            sqlx::query_as("SELECT id, api_id, name FROM categories WHERE api_id = ? AND user_id = ?")
                .bind(api_id)
                .bind(user.id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id, api_id, name)| Category { id, api_id, name }))
    }

    /// List the user's categories in creation order.
    pub async fn categories(
        &self,
        user: &User,
        page: &Page,
    ) -> Result<(Vec<Category>, Option<String>), StoreError> {
        let limit = page.limit();

        let cursor = match page.cursor() {
            Some(api_id) => {
                let row: Option<(i64,)> =
                    sqlx::query_as("SELECT id FROM categories WHERE api_id = ? AND user_id = ?")
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
            "SELECT id, api_id, name FROM categories \
             WHERE user_id = ? AND id >= ? ORDER BY id LIMIT ?",
        )
        .bind(user.id)
        .bind(cursor)
        .bind(limit + 1)
        .fetch_all(&self.pool)
        .await?;

        let mut categories: Vec<Category> = rows
            .into_iter()
            .map(|(id, api_id, name)| Category { id, api_id, name })
            .collect();
        let next = if categories.len() as i64 > limit {
            categories.pop().map(|c| c.api_id)
        } else {
            None
        };
        Ok((categories, next))
    }

    /// List the feeds inside a category. Fails with
    /// [`StoreError::NotFound`] if the category is missing for this user.
    pub async fn category_feeds(
        &self,
        user: &User,
        api_id: &str,
        page: &Page,
    ) -> Result<(Vec<Feed>, Option<String>), StoreError> {
        let category_id = self.resolve_category_id(user, api_id).await?;
        let limit = page.limit();

        let cursor = match page.cursor() {
            Some(cursor_id) => {
                let row: Option<(i64,)> =
                    sqlx::query_as("SELECT id FROM feeds WHERE api_id = ? AND user_id = ?")
                        .bind(cursor_id)
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

        let rows: Vec<FeedRow> = sqlx::query_as(
            r#"
            SELECT f.id, f.api_id, f.title, f.subscription, c.id, c.api_id, c.name
            FROM feeds f
            JOIN categories c ON f.category_id = c.id
            WHERE f.user_id = ? AND f.category_id = ? AND f.id >= ?
            ORDER BY f.id
            LIMIT ?
        "#,
        )
        .bind(user.id)
        .bind(category_id)
        .bind(cursor)
        .bind(limit + 1)
        .fetch_all(&self.pool)
        .await?;

        let mut feeds: Vec<Feed> = rows.into_iter().map(feed_from_row).collect();
        let next = if feeds.len() as i64 > limit {
            feeds.pop().map(|f| f.api_id)
        } else {
            None
        };
        Ok((feeds, next))
    }

    // ========================================================================
    // Marking
    // ========================================================================

    /// Transition every entry of every feed in a category to `marker`, in
    /// one transaction.
    pub async fn mark_category(
        &self,
        user: &User,
        api_id: &str,
        marker: Marker,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM categories WHERE api_id = ? AND user_id = ?")
                .bind(api_id)
                .bind(user.id)
                .fetch_optional(&mut *tx)
                .await?;
        let category_id = row.ok_or(StoreError::NotFound)?.0;

        sqlx::query(
            "UPDATE entries SET read = ? WHERE user_id = ? \
             AND feed_id IN (SELECT id FROM feeds WHERE category_id = ?)",
        )
        .bind(marker.as_read_flag())
        .bind(user.id)
        .bind(category_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    // ========================================================================
    // Stats
    // ========================================================================

    /// Aggregate entry counts over every feed in a category, in a single
    /// consistent read.
    pub async fn category_stats(&self, user: &User, api_id: &str) -> Result<Stats, StoreError> {
        let category_id = self.resolve_category_id(user, api_id).await?;

        let row: StatsRow = sqlx::query_as(
            r#"
            SELECT
                COUNT(CASE WHEN read = 0 THEN 1 END),
                COUNT(CASE WHEN read = 1 THEN 1 END),
                COUNT(CASE WHEN saved = 1 THEN 1 END),
                COUNT(*)
            FROM entries
            WHERE user_id = ? AND feed_id IN (SELECT id FROM feeds WHERE category_id = ?)
        "#,
        )
        .bind(user.id)
        .bind(category_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(stats_from_row(row))
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, Marker, NewEntry, Page, StoreError, User};

    async fn test_db() -> (Database, User) {
        let db = Database::open(":memory:").await.unwrap();
        let user = db.create_user("test_categories").await.unwrap();
        (db, user)
    }

    fn test_entry(i: i64) -> NewEntry {
        NewEntry {
            title: format!("Entry {}", i),
            author: "John Doe".to_string(),
            link: "http://example.com".to_string(),
            published: 1_700_000_000 + i,
        }
    }

    #[tokio::test]
    async fn test_create_category() {
        let (db, user) = test_db().await;

        let ctg = db.create_category(&user, "News").await.unwrap();
        assert_eq!(ctg.name, "News");

        let query = db.category_with_id(&user, &ctg.api_id).await.unwrap().unwrap();
        assert_eq!(query.name, "News");
    }

    #[tokio::test]
    async fn test_create_category_sanitizes_name() {
        let (db, user) = test_db().await;
        let ctg = db.create_category(&user, "  Padded  ").await.unwrap();
        assert_eq!(ctg.name, "Padded");
    }

    #[tokio::test]
    async fn test_create_category_empty_name_rejected() {
        let (db, user) = test_db().await;

        let err = db.create_category(&user, "   ").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidName));

        // Control-only input sanitizes to nothing.
        let err = db.create_category(&user, "\x1b\x07").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidName));

        let (categories, _) = db.categories(&user, &Page::first(10)).await.unwrap();
        assert!(categories.is_empty());
    }

    #[tokio::test]
    async fn test_rename_category_empty_name_rejected() {
        let (db, user) = test_db().await;
        let ctg = db.create_category(&user, "News").await.unwrap();

        let err = db.rename_category(&user, &ctg.api_id, "  ").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidName));

        let query = db.category_with_id(&user, &ctg.api_id).await.unwrap().unwrap();
        assert_eq!(query.name, "News");
    }

    #[tokio::test]
    async fn test_create_category_duplicate_conflicts() {
        let (db, user) = test_db().await;
        db.create_category(&user, "News").await.unwrap();

        let err = db.create_category(&user, "News").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_same_name_under_two_users() {
        let db = Database::open(":memory:").await.unwrap();
        let alice = db.create_user("alice").await.unwrap();
        let bob = db.create_user("bob").await.unwrap();

        db.create_category(&alice, "News").await.unwrap();
        db.create_category(&bob, "News").await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_category() {
        let (db, user) = test_db().await;
        let ctg = db.create_category(&user, "Old Name").await.unwrap();

        let renamed = db
            .rename_category(&user, &ctg.api_id, "New Name")
            .await
            .unwrap();
        assert_eq!(renamed.name, "New Name");
        assert_eq!(renamed.api_id, ctg.api_id);
    }

    #[tokio::test]
    async fn test_rename_category_conflicts() {
        let (db, user) = test_db().await;
        db.create_category(&user, "Taken").await.unwrap();
        let ctg = db.create_category(&user, "Original").await.unwrap();

        let err = db
            .rename_category(&user, &ctg.api_id, "Taken")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_rename_missing() {
        let (db, user) = test_db().await;
        let err = db.rename_category(&user, "bogus", "Name").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_delete_category_orphans_feeds() {
        let (db, user) = test_db().await;
        let ctg = db.create_category(&user, "Disposable").await.unwrap();
        let feed = db
            .create_feed(&user, "Test site", "http://example.com", Some(&ctg.api_id))
            .await
            .unwrap();

        db.delete_category(&user, &ctg.api_id).await.unwrap();

        let feed = db.feed_with_id(&user, &feed.api_id).await.unwrap().unwrap();
        assert!(feed.category.is_none());
        assert!(db.category_with_id(&user, &ctg.api_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing() {
        let (db, user) = test_db().await;
        let err = db.delete_category(&user, "bogus").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_categories_paging() {
        let (db, user) = test_db().await;
        for i in 0..5 {
            db.create_category(&user, &format!("Category {}", i))
                .await
                .unwrap();
        }

        let (page1, next) = db.categories(&user, &Page::first(3)).await.unwrap();
        assert_eq!(page1.len(), 3);
        let next = next.unwrap();

        let (page2, end) = db.categories(&user, &Page::new(Some(next.clone()), 3)).await.unwrap();
        assert_eq!(page2.len(), 2);
        assert_eq!(page2[0].api_id, next);
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_category_feeds() {
        let (db, user) = test_db().await;
        let ctg = db.create_category(&user, "News").await.unwrap();

        db.create_feed(&user, "In", "http://example.com/a", Some(&ctg.api_id))
            .await
            .unwrap();
        db.create_feed(&user, "Out", "http://example.com/b", None)
            .await
            .unwrap();

        let (feeds, next) = db
            .category_feeds(&user, &ctg.api_id, &Page::first(10))
            .await
            .unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].title, "In");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_mark_category() {
        let (db, user) = test_db().await;
        let ctg = db.create_category(&user, "News").await.unwrap();
        let inside = db
            .create_feed(&user, "In", "http://example.com/a", Some(&ctg.api_id))
            .await
            .unwrap();
        let outside = db
            .create_feed(&user, "Out", "http://example.com/b", None)
            .await
            .unwrap();

        db.insert_entries(
            &user,
            &inside.api_id,
            &(0..3).map(test_entry).collect::<Vec<_>>(),
        )
        .await
        .unwrap();
        db.insert_entries(&user, &outside.api_id, &[test_entry(10)])
            .await
            .unwrap();

        db.mark_category(&user, &ctg.api_id, Marker::Read).await.unwrap();

        let inside_stats = db.feed_stats(&user, &inside.api_id).await.unwrap();
        assert_eq!(inside_stats.read, 3);
        assert_eq!(inside_stats.unread, 0);

        let outside_stats = db.feed_stats(&user, &outside.api_id).await.unwrap();
        assert_eq!(outside_stats.unread, 1);
    }

    #[tokio::test]
    async fn test_mark_category_missing() {
        let (db, user) = test_db().await;
        let err = db
            .mark_category(&user, "bogus", Marker::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_category_stats_sums_feeds() {
        let (db, user) = test_db().await;
        let ctg = db.create_category(&user, "News").await.unwrap();
        let feed_a = db
            .create_feed(&user, "A", "http://example.com/a", Some(&ctg.api_id))
            .await
            .unwrap();
        let feed_b = db
            .create_feed(&user, "B", "http://example.com/b", Some(&ctg.api_id))
            .await
            .unwrap();

        let a = db
            .insert_entries(
                &user,
                &feed_a.api_id,
                &(0..4).map(test_entry).collect::<Vec<_>>(),
            )
            .await
            .unwrap();
        db.insert_entries(
            &user,
            &feed_b.api_id,
            &(10..16).map(test_entry).collect::<Vec<_>>(),
        )
        .await
        .unwrap();

        db.mark_entry(&user, &a[0].api_id, Marker::Read).await.unwrap();

        let stats = db.category_stats(&user, &ctg.api_id).await.unwrap();
        assert_eq!(stats.total, 10);
        assert_eq!(stats.read, 1);
        assert_eq!(stats.unread, 9);
    }

    #[tokio::test]
    async fn test_category_stats_missing() {
        let (db, user) = test_db().await;
        let err = db.category_stats(&user, "bogus").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}

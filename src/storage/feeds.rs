use super::schema::Database;
use super::types::{
    feed_from_row, stats_from_row, Feed, FeedRow, Marker, Page, Stats, StatsRow, StoreError, User,
};
use crate::util::new_api_id;

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe the user to a feed, optionally placing it in a category.
    ///
    /// Fails with [`StoreError::NotFound`] if the named category does not
    /// exist for this user.
    pub async fn create_feed(
        &self,
        user: &User,
        title: &str,
        subscription: &str,
        category_api_id: Option<&str>,
    ) -> Result<Feed, StoreError> {
        let category = match category_api_id {
            Some(api_id) => Some(
                self.category_with_id(user, api_id)
                    .await?
                    .ok_or(StoreError::NotFound)?,
            ),
            None => None,
        };

        let api_id = new_api_id();
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO feeds (api_id, user_id, category_id, title, subscription) \
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(&api_id)
        .bind(user.id)
        .bind(category.as_ref().map(|c| c.id))
        .bind(title)
        .bind(subscription)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(Feed {
            id: row.0,
            api_id,
            title: title.to_owned(),
            subscription: subscription.to_owned(),
            category,
        })
    }

    /// Update a feed's title, subscription URL, and category reference
    /// (`None` moves it to uncategorized). The write and the returned
    /// re-read happen in one transaction.
    ///
    /// Fails with [`StoreError::NotFound`] if either the feed or the named
    /// category is missing for this user.
    pub async fn update_feed(
        &self,
        user: &User,
        api_id: &str,
        title: &str,
        subscription: &str,
        category_api_id: Option<&str>,
    ) -> Result<Feed, StoreError> {
        let mut tx = self.pool.begin().await?;

        let category_id = match category_api_id {
            Some(ctg) => {
                let row: Option<(i64,)> =
                    sqlx::query_as("SELECT id FROM categories WHERE api_id = ? AND user_id = ?")
                        .bind(ctg)
                        .bind(user.id)
                        .fetch_optional(&mut *tx)
                        .await?;
                Some(row.ok_or(StoreError::NotFound)?.0)
            }
            None => None,
        };

        let result = sqlx::query(
            "UPDATE feeds SET title = ?, subscription = ?, category_id = ? \
             WHERE api_id = ? AND user_id = ?",
        )
        .bind(title)
        .bind(subscription)
        .bind(category_id)
        .bind(api_id)
        .bind(user.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        let row: Option<FeedRow> = sqlx::query_as(
            r#"
            SELECT f.id, f.api_id, f.title, f.subscription, c.id, c.api_id, c.name
            FROM feeds f
            LEFT JOIN categories c ON f.category_id = c.id
            WHERE f.api_id = ? AND f.user_id = ?
        "#,
        )
        .bind(api_id)
        .bind(user.id)
        .fetch_optional(&mut *tx)
        .await?;
        let feed = row.map(feed_from_row).ok_or(StoreError::NotFound)?;

        tx.commit().await?;
        Ok(feed)
    }

    /// Unsubscribe a feed. Its entries and their tag associations go with it
    /// (FK cascade); tags and categories themselves are untouched.
    pub async fn delete_feed(&self, user: &User, api_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM feeds WHERE api_id = ? AND user_id = ?")
            .bind(api_id)
            .bind(user.id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Fetch a single feed with its category populated.
    pub async fn feed_with_id(
        &self,
        user: &User,
        api_id: &str,
    ) -> Result<Option<Feed>, StoreError> {
        let row: Option<FeedRow> = sqlx::query_as(
            r#"
            SELECT f.id, f.api_id, f.title, f.subscription, c.id, c.api_id, c.name
            FROM feeds f
            LEFT JOIN categories c ON f.category_id = c.id
            WHERE f.api_id = ? AND f.user_id = ?
        "#,
        )
        .bind(api_id)
        .bind(user.id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(feed_from_row))
    }

    /// List the user's feeds in creation order. See [`Page`] for the cursor
    /// contract.
    pub async fn feeds(
        &self,
        user: &User,
        page: &Page,
    ) -> Result<(Vec<Feed>, Option<String>), StoreError> {
        let limit = page.limit();

        let cursor = match page.cursor() {
            Some(api_id) => {
                let row: Option<(i64,)> =
                    sqlx::query_as("SELECT id FROM feeds WHERE api_id = ? AND user_id = ?")
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

        let rows: Vec<FeedRow> = sqlx::query_as(
            r#"
            SELECT f.id, f.api_id, f.title, f.subscription, c.id, c.api_id, c.name
            FROM feeds f
            LEFT JOIN categories c ON f.category_id = c.id
            WHERE f.user_id = ? AND f.id >= ?
            ORDER BY f.id
            LIMIT ?
        "#,
        )
        .bind(user.id)
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

    /// Transition every entry of a feed to `marker` in one transaction.
    ///
    /// Idempotent; fails with [`StoreError::NotFound`] if the feed is
    /// missing for this user, leaving entries untouched.
    pub async fn mark_feed(
        &self,
        user: &User,
        api_id: &str,
        marker: Marker,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let feed: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM feeds WHERE api_id = ? AND user_id = ?")
                .bind(api_id)
                .bind(user.id)
                .fetch_optional(&mut *tx)
                .await?;
        let feed_id = feed.ok_or(StoreError::NotFound)?.0;

        sqlx::query("UPDATE entries SET read = ? WHERE feed_id = ?")
            .bind(marker.as_read_flag())
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ========================================================================
    // Stats
    // ========================================================================

    /// Aggregate entry counts for one feed, computed in a single consistent
    /// read. Fails with [`StoreError::NotFound`] if the feed is missing.
    pub async fn feed_stats(&self, user: &User, api_id: &str) -> Result<Stats, StoreError> {
        let feed_id = self.resolve_feed_id(user, api_id).await?;

        let row: StatsRow = sqlx::query_as(
            r#"
            SELECT
                COUNT(CASE WHEN read = 0 THEN 1 END),
                COUNT(CASE WHEN read = 1 THEN 1 END),
                COUNT(CASE WHEN saved = 1 THEN 1 END),
                COUNT(*)
            FROM entries
            WHERE feed_id = ?
        "#,
        )
        .bind(feed_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(stats_from_row(row))
    }
}

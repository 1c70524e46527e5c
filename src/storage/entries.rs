use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{
    stats_from_row, Entry, EntryRow, Marker, NewEntry, Page, Stats, StatsRow, StoreError, User,
};
use crate::util::new_api_id;

/// Candidate set for an entry listing. Every scope shares the same ordering
/// and cursor semantics; only the filter differs.
pub(crate) enum EntryScope {
    Global,
    Feed(i64),
    Category(i64),
    Tag(i64),
}

impl Database {
    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Attach a batch of entries to a feed (ingestion handover point).
    ///
    /// All rows are inserted in one transaction; a failure inserts nothing.
    /// Entries start unread and unsaved. Fails with [`StoreError::NotFound`]
    /// if the feed does not exist for this user.
    ///
    /// Batch size keeps bind parameters well under SQLite's limit
    /// (8 columns * 50 = 400).
    pub async fn insert_entries(
        &self,
        user: &User,
        feed_api_id: &str,
        entries: &[NewEntry],
    ) -> Result<Vec<Entry>, StoreError> {
        const BATCH_SIZE: usize = 50;

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let feed: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM feeds WHERE api_id = ? AND user_id = ?")
                .bind(feed_api_id)
                .bind(user.id)
                .fetch_optional(&mut *tx)
                .await?;
        let feed_id = feed.ok_or(StoreError::NotFound)?.0;

        let mut inserted = Vec::with_capacity(entries.len());
        for chunk in entries.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO entries \
                 (api_id, user_id, feed_id, title, author, link, published, fetched_at) ",
            );

            builder.push_values(chunk, |mut b, entry| {
                b.push_bind(new_api_id())
                    .push_bind(user.id)
                    .push_bind(feed_id)
                    .push_bind(&entry.title)
                    .push_bind(&entry.author)
                    .push_bind(&entry.link)
                    .push_bind(entry.published)
                    .push_bind(now);
            });

            builder.push(" RETURNING id, api_id, title, author, link, published, read, saved");

            let rows: Vec<EntryRow> = builder.build_query_as().fetch_all(&mut *tx).await?;
            inserted.extend(rows.into_iter().map(EntryRow::into_entry));
        }

        tx.commit().await?;
        Ok(inserted)
    }

    // ========================================================================
    // Entry Queries
    // ========================================================================

    /// List all of the user's entries, newest or oldest first, optionally
    /// filtered by marker. See [`Page`] for the cursor contract.
    pub async fn entries(
        &self,
        user: &User,
        page: &Page,
        newest_first: bool,
        marker: Option<Marker>,
    ) -> Result<(Vec<Entry>, Option<String>), StoreError> {
        self.list_entries(user, EntryScope::Global, page, newest_first, marker)
            .await
    }

    /// List entries belonging to one feed. Fails with
    /// [`StoreError::NotFound`] if the feed is missing for this user.
    pub async fn feed_entries(
        &self,
        user: &User,
        feed_api_id: &str,
        page: &Page,
        newest_first: bool,
        marker: Option<Marker>,
    ) -> Result<(Vec<Entry>, Option<String>), StoreError> {
        let feed_id = self.resolve_feed_id(user, feed_api_id).await?;
        self.list_entries(user, EntryScope::Feed(feed_id), page, newest_first, marker)
            .await
    }

    /// List entries across all feeds in a category. Fails with
    /// [`StoreError::NotFound`] if the category is missing for this user.
    pub async fn category_entries(
        &self,
        user: &User,
        category_api_id: &str,
        page: &Page,
        newest_first: bool,
        marker: Option<Marker>,
    ) -> Result<(Vec<Entry>, Option<String>), StoreError> {
        let category_id = self.resolve_category_id(user, category_api_id).await?;
        self.list_entries(
            user,
            EntryScope::Category(category_id),
            page,
            newest_first,
            marker,
        )
        .await
    }

    /// Shared scoped listing behind every entry list operation.
    ///
    /// Ordering is total: `(published, id)` ascending, or descending when
    /// `newest_first`. The continuation id is resolved to its sort key and
    /// the page query compares inclusively against it, so the cursor record
    /// is the first element of the returned page. One look-ahead row past
    /// the limit supplies the next continuation token.
    pub(crate) async fn list_entries(
        &self,
        user: &User,
        scope: EntryScope,
        page: &Page,
        newest_first: bool,
        marker: Option<Marker>,
    ) -> Result<(Vec<Entry>, Option<String>), StoreError> {
        let limit = page.limit();

        let cursor_key = match page.cursor() {
            Some(api_id) => {
                let row: Option<(i64, i64)> = sqlx::query_as(
                    "SELECT published, id FROM entries WHERE api_id = ? AND user_id = ?",
                )
                .bind(api_id)
                .bind(user.id)
                .fetch_optional(&self.pool)
                .await?;
                match row {
                    Some(key) => Some(key),
                    // Cursor for a vanished record: valid but exhausted.
                    None => return Ok((Vec::new(), None)),
                }
            }
            None => None,
        };

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "SELECT e.id, e.api_id, e.title, e.author, e.link, e.published, e.read, e.saved \
             FROM entries e",
        );
        if matches!(scope, EntryScope::Tag(_)) {
            builder.push(" JOIN entry_tags et ON et.entry_id = e.id");
        }
        builder.push(" WHERE e.user_id = ");
        builder.push_bind(user.id);

        match scope {
            EntryScope::Global => {}
            EntryScope::Feed(feed_id) => {
                builder.push(" AND e.feed_id = ");
                builder.push_bind(feed_id);
            }
            EntryScope::Category(category_id) => {
                builder.push(" AND e.feed_id IN (SELECT id FROM feeds WHERE category_id = ");
                builder.push_bind(category_id);
                builder.push(")");
            }
            EntryScope::Tag(tag_id) => {
                builder.push(" AND et.tag_id = ");
                builder.push_bind(tag_id);
            }
        }

        if let Some(marker) = marker {
            builder.push(" AND e.read = ");
            builder.push_bind(marker.as_read_flag());
        }

        if let Some((published, id)) = cursor_key {
            // Row-value comparison keeps the cursor stable under concurrent
            // inserts and deletes, unlike offset arithmetic.
            builder.push(if newest_first {
                " AND (e.published, e.id) <= ("
            } else {
                " AND (e.published, e.id) >= ("
            });
            builder.push_bind(published);
            builder.push(", ");
            builder.push_bind(id);
            builder.push(")");
        }

        builder.push(if newest_first {
            " ORDER BY e.published DESC, e.id DESC LIMIT "
        } else {
            " ORDER BY e.published ASC, e.id ASC LIMIT "
        });
        builder.push_bind(limit + 1);

        let rows: Vec<EntryRow> = builder.build_query_as().fetch_all(&self.pool).await?;

        let mut entries: Vec<Entry> = rows.into_iter().map(EntryRow::into_entry).collect();
        // The look-ahead row past the limit carries the next token.
        let next = if entries.len() as i64 > limit {
            entries.pop().map(|e| e.api_id)
        } else {
            None
        };
        Ok((entries, next))
    }

    /// Fetch a single entry by its external id.
    pub async fn entry_with_id(
        &self,
        user: &User,
        api_id: &str,
    ) -> Result<Option<Entry>, StoreError> {
        let row: Option<EntryRow> = sqlx::query_as(
            "SELECT id, api_id, title, author, link, published, read, saved \
             FROM entries WHERE api_id = ? AND user_id = ?",
        )
        .bind(api_id)
        .bind(user.id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(EntryRow::into_entry))
    }

    // ========================================================================
    // Entry Mutations
    // ========================================================================

    /// Set the read state of a single entry. Idempotent: re-marking an
    /// already-read entry succeeds. Fails with [`StoreError::NotFound`] if
    /// the entry is missing for this user.
    pub async fn mark_entry(
        &self,
        user: &User,
        api_id: &str,
        marker: Marker,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE entries SET read = ? WHERE api_id = ? AND user_id = ?")
            .bind(marker.as_read_flag())
            .bind(api_id)
            .bind(user.id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Set the saved flag of a single entry, independent of its marker.
    pub async fn set_entry_saved(
        &self,
        user: &User,
        api_id: &str,
        saved: bool,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE entries SET saved = ? WHERE api_id = ? AND user_id = ?")
            .bind(saved)
            .bind(api_id)
            .bind(user.id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ========================================================================
    // Stats
    // ========================================================================

    /// Aggregate counts over the user's entire entry set, in one consistent
    /// read.
    pub async fn stats(&self, user: &User) -> Result<Stats, StoreError> {
        let row: StatsRow = sqlx::query_as(
            r#"
            SELECT
                COUNT(CASE WHEN read = 0 THEN 1 END),
                COUNT(CASE WHEN read = 1 THEN 1 END),
                COUNT(CASE WHEN saved = 1 THEN 1 END),
                COUNT(*)
            FROM entries
            WHERE user_id = ?
        "#,
        )
        .bind(user.id)
        .fetch_one(&self.pool)
        .await?;

        Ok(stats_from_row(row))
    }

    // ========================================================================
    // Internal resolution
    // ========================================================================

    pub(crate) async fn resolve_feed_id(
        &self,
        user: &User,
        api_id: &str,
    ) -> Result<i64, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM feeds WHERE api_id = ? AND user_id = ?")
                .bind(api_id)
                .bind(user.id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(id,)| id).ok_or(StoreError::NotFound)
    }

    pub(crate) async fn resolve_category_id(
        &self,
        user: &User,
        api_id: &str,
    ) -> Result<i64, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM categories WHERE api_id = ? AND user_id = ?")
                .bind(api_id)
                .bind(user.id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(id,)| id).ok_or(StoreError::NotFound)
    }

    pub(crate) async fn resolve_tag_id(
        &self,
        user: &User,
        api_id: &str,
    ) -> Result<i64, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM tags WHERE api_id = ? AND user_id = ?")
                .bind(api_id)
                .bind(user.id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(id,)| id).ok_or(StoreError::NotFound)
    }
}

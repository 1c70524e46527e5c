use serde::Serialize;
use thiserror::Error;

use crate::util::strip_control_chars;

// ============================================================================
// Error Types
// ============================================================================

/// Storage-layer errors, split by what the caller can do about them.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Target record is absent or owned by a different user.
    #[error("record not found")]
    NotFound,

    /// A per-user uniqueness constraint would be violated.
    #[error("{0} already exists")]
    Conflict(String),

    /// A user-supplied name failed validation.
    #[error("invalid name: empty or whitespace-only")]
    InvalidName,

    /// Underlying persistence failure, opaque to the caller.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl StoreError {
    /// Classify a sqlx error, mapping unique-constraint violations to
    /// [`StoreError::Conflict`]. Everything else is an opaque storage fault.
    ///
    /// Call sites that know the colliding name pre-check and construct a
    /// friendlier `Conflict`; this is the backstop for the race where two
    /// writers pass the pre-check concurrently.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return StoreError::Conflict("record".to_owned());
            }
        }
        StoreError::Storage(err)
    }
}

/// Sanitize and validate a user-supplied name.
///
/// Control characters are stripped (names end up in terminal output and
/// logs downstream), whitespace is trimmed, and a name that is empty after
/// that fails with [`StoreError::InvalidName`].
pub(crate) fn sanitize_name(name: &str) -> Result<String, StoreError> {
    let stripped = strip_control_chars(name);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return Err(StoreError::InvalidName);
    }
    Ok(trimmed.to_owned())
}

// ============================================================================
// Pagination
// ============================================================================

/// Maximum records returned from any single list call (OOM protection).
pub const MAX_PAGE_SIZE: i64 = 100;

/// Cursor-based page request.
///
/// `continuation_id` is the `APIID` of the first record of the desired page
/// (inclusive cursor); `None` or an empty string starts from the beginning.
/// A cursor naming a deleted record yields an empty page with no next token.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub continuation_id: Option<String>,
    pub count: i64,
}

impl Page {
    pub fn new(continuation_id: Option<String>, count: i64) -> Self {
        Self {
            continuation_id,
            count,
        }
    }

    /// First page with the given size.
    pub fn first(count: i64) -> Self {
        Self::new(None, count)
    }

    pub(crate) fn cursor(&self) -> Option<&str> {
        self.continuation_id.as_deref().filter(|c| !c.is_empty())
    }

    /// Effective page size, clamped to `1..=MAX_PAGE_SIZE`.
    pub(crate) fn limit(&self) -> i64 {
        let limit = self.count.clamp(1, MAX_PAGE_SIZE);
        if limit != self.count {
            tracing::debug!(requested = self.count, clamped = limit, "page size clamped");
        }
        limit
    }
}

// ============================================================================
// Domain Records
// ============================================================================

/// Read state of an entry. Exhaustive: an entry is always exactly one of
/// these, independent of its saved flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Marker {
    Unread,
    Read,
}

impl Marker {
    pub(crate) fn as_read_flag(self) -> i64 {
        match self {
            Marker::Unread => 0,
            Marker::Read => 1,
        }
    }

    pub(crate) fn from_read_flag(read: bool) -> Self {
        if read {
            Marker::Read
        } else {
            Marker::Unread
        }
    }
}

/// Owning user. Internal row id stays inside the crate; callers hold the
/// `api_id`.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    #[serde(skip)]
    pub(crate) id: i64,
    pub api_id: String,
    pub username: String,
}

/// Named grouping of feeds. Name is unique per user.
#[derive(Debug, Clone, Serialize)]
pub struct Category {
    #[serde(skip)]
    pub(crate) id: i64,
    pub api_id: String,
    pub name: String,
}

/// A subscribed feed, optionally in a category.
#[derive(Debug, Clone, Serialize)]
pub struct Feed {
    #[serde(skip)]
    pub(crate) id: i64,
    pub api_id: String,
    pub title: String,
    pub subscription: String,
    pub category: Option<Category>,
}

/// A single feed entry with its read/saved state.
///
/// `published` is unix seconds, as stored.
#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    #[serde(skip)]
    pub(crate) id: i64,
    pub api_id: String,
    pub title: String,
    pub author: String,
    pub link: String,
    pub published: i64,
    pub marker: Marker,
    pub saved: bool,
}

/// User-defined label, many-to-many with entries. Name is unique per user.
#[derive(Debug, Clone, Serialize)]
pub struct Tag {
    #[serde(skip)]
    pub(crate) id: i64,
    pub api_id: String,
    pub name: String,
}

/// Aggregate entry counts for a feed, category, or the whole user.
/// `unread + read == total` always; `saved` overlaps either marker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub unread: i64,
    pub read: i64,
    pub saved: i64,
    pub total: i64,
}

/// Entry as handed over by the (out-of-scope) ingestion path.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub title: String,
    pub author: String,
    pub link: String,
    pub published: i64,
}

// ============================================================================
// Helper Types
// ============================================================================

/// Row type for feed queries with the joined category columns.
pub(crate) type FeedRow = (
    i64,
    String,
    String,
    String,
    Option<i64>,
    Option<String>,
    Option<String>,
);

pub(crate) fn feed_from_row(row: FeedRow) -> Feed {
    let (id, api_id, title, subscription, ctg_id, ctg_api_id, ctg_name) = row;
    let category = match (ctg_id, ctg_api_id, ctg_name) {
        (Some(id), Some(api_id), Some(name)) => Some(Category { id, api_id, name }),
        _ => None,
    };
    Feed {
        id,
        api_id,
        title,
        subscription,
        category,
    }
}

/// Internal row type for entry queries (used by sqlx FromRow).
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryRow {
    pub id: i64,
    pub api_id: String,
    pub title: String,
    pub author: String,
    pub link: String,
    pub published: i64,
    pub read: bool,
    pub saved: bool,
}

impl EntryRow {
    pub(crate) fn into_entry(self) -> Entry {
        Entry {
            id: self.id,
            api_id: self.api_id,
            title: self.title,
            author: self.author,
            link: self.link,
            published: self.published,
            marker: Marker::from_read_flag(self.read),
            saved: self.saved,
        }
    }
}

/// Row shape shared by every stats aggregation query.
pub(crate) type StatsRow = (i64, i64, i64, i64);

pub(crate) fn stats_from_row(row: StatsRow) -> Stats {
    let (unread, read, saved, total) = row;
    Stats {
        unread,
        read,
        saved,
        total,
    }
}

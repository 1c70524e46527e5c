//! Persistence and query layer for a multi-user feed aggregation service.
//!
//! The crate is consumed in-process by a controller layer that has already
//! authenticated the caller and validated primitive input shapes. Everything
//! here is scoped to an owning [`storage::User`]: feeds, categories, tags,
//! and entries are only reachable through the user that owns them.
//!
//! The public surface lives in [`storage`]: a cloneable [`storage::Database`]
//! handle over a SQLite pool, with per-entity operations (create/update/
//! delete/list), cursor-based pagination, read/saved state transitions, and
//! per-scope statistics.

pub mod storage;
pub mod util;

mod categories;
mod entries;
mod feeds;
mod schema;
mod tags;
mod types;
mod users;

pub use schema::Database;
pub use types::{
    Category, Entry, Feed, Marker, NewEntry, Page, Stats, StoreError, Tag, User, MAX_PAGE_SIZE,
};

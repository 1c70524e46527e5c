//! Small shared utilities: external id minting and control-character
//! stripping.

use std::borrow::Cow;

use uuid::Uuid;

/// Mint a fresh external identifier (`APIID`).
///
/// These are the only identifiers that cross the crate boundary; internal
/// row ids never do, so external references stay stable across storage
/// reorganizations.
pub fn new_api_id() -> String {
    Uuid::new_v4().to_string()
}

/// Strip control characters from user-supplied text.
///
/// Names end up in terminal output and logs downstream, so ESC and other
/// control bytes are removed rather than stored.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(char::is_control) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|c| !c.is_control()).collect())
}

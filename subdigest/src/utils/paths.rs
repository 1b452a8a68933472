//! File naming helpers.

use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static ILLEGAL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1f]"#).expect("valid regex"));

/// Replaces characters that are not allowed in file names with `_`.
///
/// Leading/trailing whitespace and dots are trimmed; an empty result becomes
/// `untitled`.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let replaced = ILLEGAL_CHARS.replace_all(name, "_");
    let trimmed = replaced.trim().trim_matches('.').trim();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

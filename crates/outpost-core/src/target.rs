//! Target normalization for filesystem paths.
//!
//! Targets can contain characters that are hostile to path components
//! ("10.0.0.0/24", "*.example.com"). The slug keeps a readable prefix and
//! appends a short BLAKE3 hash so distinct targets never collapse onto
//! the same directory after sanitization.

/// Length of the hex hash suffix appended to every slug.
const HASH_LEN: usize = 8;

/// Derive a filesystem-safe slug for a target.
///
/// Lowercases, maps every non-alphanumeric run to a single `-`, trims
/// leading/trailing dashes, and appends the first 8 hex chars of
/// `blake3(target)`.
///
/// ```
/// assert_eq!(&outpost_core::target::slug("Example.COM")[..8], "example-");
/// ```
pub fn slug(target: &str) -> String {
    let mut cleaned = String::with_capacity(target.len());
    let mut last_dash = true; // suppress a leading dash
    for ch in target.chars() {
        if ch.is_ascii_alphanumeric() {
            cleaned.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            cleaned.push('-');
            last_dash = true;
        }
    }
    while cleaned.ends_with('-') {
        cleaned.pop();
    }

    let digest = blake3::hash(target.as_bytes()).to_hex();
    if cleaned.is_empty() {
        digest[..HASH_LEN].to_string()
    } else {
        format!("{cleaned}-{}", &digest[..HASH_LEN])
    }
}

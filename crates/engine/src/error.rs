//! Error formatting helpers

use std::error::Error;

/// Render an error and every source beneath it, joined by `": "`
///
/// Adjacent duplicates are skipped; `#[error(transparent)]` wrappers would
/// otherwise repeat the same message.
pub fn all_causes(error: &(dyn Error + 'static)) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = Some(error);
    while let Some(err) = current {
        let message = err.to_string();
        if parts.last() != Some(&message) {
            parts.push(message);
        }
        current = err.source();
    }
    parts.join(": ")
}

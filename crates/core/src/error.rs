/// Domain-level error shared by every `retouch` crate.
///
/// Layer-specific errors (store, vendor API, job execution) live in their
/// own crates and convert into this type at the HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Upper bound on error text captured into a job record.
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Truncate `message` to at most `max_chars` characters, marking the cut.
///
/// Counts characters, not bytes, so multi-byte text is never split.
pub fn bounded_message(message: &str, max_chars: usize) -> String {
    const ELLIPSIS: &str = "...";

    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut out: String = message.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_messages_are_unchanged() {
        assert_eq!(bounded_message("boom", 10), "boom");
    }

    #[test]
    fn long_messages_are_cut_to_the_bound() {
        let msg = "x".repeat(1000);
        let bounded = bounded_message(&msg, MAX_ERROR_MESSAGE_LEN);
        assert_eq!(bounded.chars().count(), MAX_ERROR_MESSAGE_LEN);
        assert!(bounded.ends_with("..."));
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let msg = "图片上传失败".repeat(100);
        let bounded = bounded_message(&msg, 20);
        assert_eq!(bounded.chars().count(), 20);
    }

    #[test]
    fn not_found_display() {
        let err = CoreError::NotFound {
            entity: "Job",
            id: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "Entity not found: Job with id abc");
    }
}

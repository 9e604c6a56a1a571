/// Remove a surrounding markdown fence (with optional language tag).
pub fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_code_fence_handles_language_tags() {
        assert_eq!(strip_code_fence("```text\nThe rain.\n```"), "The rain.");
        assert_eq!(strip_code_fence("```\nThe rain.\n```"), "The rain.");
        assert_eq!(strip_code_fence("  The rain.  "), "The rain.");
    }
}

//! Output size caps shared by the server (validating inbound `task_result`)
//! and the agent (packaging a finished task before it ever goes on the wire).

/// TaskResult.stdout cap.
pub const STDOUT_CAP_BYTES: usize = 64 * 1024;
/// TaskResult.stderr cap.
pub const STDERR_CAP_BYTES: usize = 16 * 1024;

/// Truncates `s` to at most `max_bytes` bytes, cutting on a char boundary so
/// the result is always valid UTF-8 and safe to drop straight into a JSON
/// string without breaking escaping.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_string_unchanged() {
        assert_eq!(truncate_utf8("hello", 10), "hello");
    }

    #[test]
    fn truncates_on_char_boundary() {
        let s = "a".repeat(10) + "€€€€"; // multi-byte chars near the cut
        let t = truncate_utf8(&s, 12);
        assert!(t.len() <= 12);
        assert!(String::from_utf8(t.into_bytes()).is_ok());
    }

    #[test]
    fn large_output_truncated_at_cap() {
        let s = "x".repeat(100 * 1024);
        let t = truncate_utf8(&s, STDOUT_CAP_BYTES);
        assert_eq!(t.len(), STDOUT_CAP_BYTES);
    }
}

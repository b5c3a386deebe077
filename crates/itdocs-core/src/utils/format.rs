use chrono::{DateTime, Utc};

/// Number of leading token characters kept by `redact_token`
const REDACT_VISIBLE_CHARS: usize = 6;

/// Render a bearer token safe for logs: a short prefix plus the total length.
/// Tokens are never logged or displayed in full.
pub fn redact_token(token: &str) -> String {
    let len = token.chars().count();
    if len <= REDACT_VISIBLE_CHARS {
        return format!("*** ({} chars)", len);
    }
    let prefix: String = token.chars().take(REDACT_VISIBLE_CHARS).collect();
    format!("{}... ({} chars)", prefix, len)
}

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Format an optional string, returning a default if None
pub fn format_optional(value: Option<&str>, default: &str) -> String {
    value.unwrap_or(default).to_string()
}

/// Human-readable age of a timestamp ("just now", "5m ago", "2h ago", "3d ago")
pub fn age_display(since: DateTime<Utc>) -> String {
    age_display_minutes((Utc::now() - since).num_minutes())
}

fn age_display_minutes(minutes: i64) -> String {
    if minutes < 1 {
        // Negative ages come from clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        if minutes % 60 >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_redact_token_hides_body() {
        let redacted = redact_token("eyJhbGciOiJIUzI1NiJ9.payload.sig");
        assert_eq!(redacted, "eyJhbG... (32 chars)");
        assert!(!redacted.contains("payload"));
    }

    #[test]
    fn test_redact_token_short() {
        assert_eq!(redact_token("abc"), "*** (3 chars)");
        assert_eq!(redact_token(""), "*** (0 chars)");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Hello", 10), "Hello");
        assert_eq!(truncate("Hello World", 8), "Hello...");
        assert_eq!(truncate("Hi", 2), "Hi");
    }

    #[test]
    fn test_age_display() {
        assert_eq!(age_display(Utc::now()), "just now");
        assert_eq!(age_display(Utc::now() + Duration::minutes(5)), "just now"); // clock skew
        assert_eq!(age_display_minutes(5), "5m ago");
        assert_eq!(age_display_minutes(89), "1h ago");
        assert_eq!(age_display_minutes(90), "2h ago"); // rounds up
        assert_eq!(age_display_minutes(1440), "1d ago");
        assert_eq!(age_display_minutes(1440 + 12 * 60), "2d ago");
    }
}

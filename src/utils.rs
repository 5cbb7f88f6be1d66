//! Shared formatting helpers.

use std::borrow::Cow;
use std::time::Duration;

/// Formats a byte count into a human-readable string with binary units.
///
/// # Examples
///
/// ```
/// use bootkit::utils::format_bytes;
///
/// assert_eq!(format_bytes(500), "500 B");
/// assert_eq!(format_bytes(1536), "1.5 KB");
/// assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Formats a duration as `1m 5s` / `800ms`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let minutes = secs / 60;
    let rem = secs % 60;

    match (minutes, rem) {
        (0, 0) => format!("{}ms", duration.as_millis()),
        (0, _) => format!("{}s", rem),
        _ => format!("{}m {}s", minutes, rem),
    }
}

/// Keeps the last `max_len` bytes of `s`, prefixed with "..." when cut.
///
/// Used to attach the end of a subprocess transcript to an error without
/// dragging megabytes of installer output along.
pub fn tail(s: &str, max_len: usize) -> Cow<'_, str> {
    if s.len() <= max_len {
        return Cow::Borrowed(s);
    }
    let mut start = s.len() - max_len;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    Cow::Owned(format!("...{}", &s[start..]))
}

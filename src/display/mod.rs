//! Display formatting for terminal output
//!
//! Plain fixed-width tables for audit records, versions and compliance
//! state.

pub mod history;
pub mod restore;

pub use history::{
    format_diff, format_history_table, format_queue_stats, format_record_details,
    format_record_row,
};
pub use restore::{
    format_actor_summary, format_pending_deletions, format_preview, format_version_table,
};

/// Shorten `s` to at most `max_len` characters, marking the cut with "..."
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        ".".repeat(max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

/// Human-readable byte count
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

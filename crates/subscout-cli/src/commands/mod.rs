//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Core commands (init, detect) and shared utilities (open_db)
//! - `serve` - Web server command
//! - `users` - User and audit log listings

pub mod core;
pub mod serve;
pub mod users;

// Re-export command functions for main.rs
pub use core::*;
pub use serve::*;
pub use users::*;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

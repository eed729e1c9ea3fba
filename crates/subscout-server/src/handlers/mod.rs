//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod audit;
pub mod auth;
pub mod dashboard;
pub mod detection;
pub mod plaid;
pub mod subscriptions;

// Re-export all handlers for use in router
pub use audit::*;
pub use auth::*;
pub use dashboard::*;
pub use detection::*;
pub use plaid::*;
pub use subscriptions::*;

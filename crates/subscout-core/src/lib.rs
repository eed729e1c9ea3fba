//! Subscout Core Library
//!
//! Shared functionality for the Subscout subscription tracker:
//! - Subscription detection (grouping, recurrence, due-date projection)
//! - Registration validation and password hashing
//! - Database access and migrations
//! - Bank-data provider client (Plaid)
//! - Transaction file loading for offline runs

pub mod auth;
pub mod db;
pub mod detect;
pub mod error;
pub mod import;
pub mod models;
pub mod plaid;

/// Test utilities including mock Plaid server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use db::{AuditEntry, Database, UserCredentials};
pub use detect::{
    classify_recurring, days_until, group_transactions, project_next_due, DetectionConfig,
    DetectionReport, GroupKey, RejectedTransaction, RejectionReason, SubscriptionDetector,
    TransactionGroups,
};
pub use error::{Error, Result};
pub use plaid::{BankDataProvider, LinkedItemAccess, PlaidClient, PlaidConfig, PlaidEnvironment};

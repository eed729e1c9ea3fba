//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `cmd_init` - Initialize the database
//! - `cmd_detect` - Run subscription detection over a file

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use subscout_core::db::Database;
use subscout_core::detect::{days_until, DetectionReport, SubscriptionDetector};
use subscout_core::import::load_transactions_file;

use super::truncate;

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path must be valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;

    if !no_encrypt && db.is_encrypted().unwrap_or(false) {
        println!("   🔒 Encryption: ENABLED");
    } else {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Try detection offline: subscout detect --file history.csv");
    println!("  2. Start the API: SUBSCOUT_JWT_SECRET=... subscout serve");

    Ok(())
}

/// Parse the `--today` override, defaulting to the local date
pub fn resolve_today(today: Option<&str>) -> Result<NaiveDate> {
    match today {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("Invalid --today '{}' (expected YYYY-MM-DD)", s)),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

/// Load a transaction file and run detection as of `today`
pub fn detect_file(file: &Path, today: NaiveDate) -> Result<DetectionReport> {
    let transactions = load_transactions_file(file)
        .with_context(|| format!("Failed to load transactions from {}", file.display()))?;

    Ok(SubscriptionDetector::new(today).detect(&transactions))
}

pub fn cmd_detect(file: &Path, today: Option<&str>, json: bool) -> Result<()> {
    let today = resolve_today(today)?;
    let report = detect_file(file, today)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("🔍 Subscriptions in {} (as of {})", file.display(), today);
    println!();

    if report.subscriptions.is_empty() {
        println!("   No recurring payments found.");
    } else {
        println!(
            "   {:<30} {:>10} {:>6} {:>12} {:>6}",
            "NAME", "AMOUNT", "COUNT", "NEXT DUE", "DAYS"
        );
        println!("   {}", "─".repeat(68));
        for sub in &report.subscriptions {
            let (due, days) = match sub.next_due_date {
                Some(due) => (due.to_string(), days_until(due, today).to_string()),
                None => ("-".to_string(), "-".to_string()),
            };
            println!(
                "   {:<30} {:>10.2} {:>6} {:>12} {:>6}",
                truncate(&sub.name, 30),
                sub.amount,
                sub.transactions.len(),
                due,
                days
            );
        }
    }

    if !report.rejected.is_empty() {
        println!();
        println!("   ⚠️  {} record(s) skipped:", report.rejected.len());
        for rejected in &report.rejected {
            println!("      #{}: {}", rejected.index, rejected.reason);
        }
    }

    Ok(())
}

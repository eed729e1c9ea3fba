//! User and audit log listings

use anyhow::Result;
use subscout_core::db::Database;

use super::truncate;

pub fn cmd_users(db: &Database) -> Result<()> {
    let users = db.list_users()?;

    if users.is_empty() {
        println!("No users registered.");
        return Ok(());
    }

    println!("{:<6} {:<36} {:<20} {}", "ID", "EMAIL", "FIRST NAME", "CREATED");
    println!("{}", "─".repeat(80));
    for user in &users {
        println!(
            "{:<6} {:<36} {:<20} {}",
            user.id,
            truncate(&user.email, 36),
            truncate(&user.first_name, 20),
            user.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!();
    println!("{} user(s)", users.len());

    Ok(())
}

pub fn cmd_audit(db: &Database, limit: i64) -> Result<()> {
    let entries = db.list_audit_log(limit.max(1))?;

    if entries.is_empty() {
        println!("Audit log is empty.");
        return Ok(());
    }

    for entry in &entries {
        let target = match (&entry.entity_type, &entry.entity_id) {
            (Some(kind), Some(id)) => format!("{}:{}", kind, id),
            (Some(kind), None) => kind.clone(),
            _ => String::new(),
        };
        println!(
            "{}  {:<28} {:<10} {:<24} {}",
            entry.timestamp,
            truncate(&entry.user_email, 28),
            entry.action,
            truncate(&target, 24),
            entry.details.as_deref().unwrap_or("")
        );
    }

    Ok(())
}

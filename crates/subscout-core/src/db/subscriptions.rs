//! Subscription status operations
//!
//! Detection never reads this table. A row only exists once the user has
//! made an explicit decision about a candidate; everything else is `current`.

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension};
use tracing::info;

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{subscription_key, DashboardStats, SubscriptionStatus, TrackedSubscription};

fn row_to_tracked(row: &rusqlite::Row) -> rusqlite::Result<TrackedSubscription> {
    let status_str: String = row.get(4)?;
    let updated_at_str: String = row.get(5)?;
    Ok(TrackedSubscription {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        amount: row.get(3)?,
        status: status_str.parse().unwrap_or_default(),
        updated_at: parse_datetime(&updated_at_str),
    })
}

impl Database {
    /// Record the user's status for a (name, amount) pair.
    ///
    /// Setting the same status twice is a no-op apart from `updated_at`.
    pub fn set_subscription_status(
        &self,
        user_id: i64,
        name: &str,
        amount: f64,
        status: SubscriptionStatus,
    ) -> Result<TrackedSubscription> {
        if name.is_empty() {
            return Err(Error::InvalidData("Subscription name is required".into()));
        }
        if !amount.is_finite() {
            return Err(Error::InvalidData("Subscription amount must be finite".into()));
        }

        let key = subscription_key(name, amount);
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO subscription_status (user_id, subscription_key, name, amount, status)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, subscription_key) DO UPDATE SET
                status = excluded.status,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![user_id, key, name, amount.abs(), status.as_str()],
        )?;
        drop(conn);

        info!(user_id, subscription = %key, status = %status, "Subscription status changed");

        self.get_subscription_status(user_id, &key)?
            .ok_or_else(|| Error::NotFound(format!("Subscription {}", key)))
    }

    /// Get the stored status row for a subscription key
    pub fn get_subscription_status(
        &self,
        user_id: i64,
        key: &str,
    ) -> Result<Option<TrackedSubscription>> {
        let conn = self.conn()?;
        let tracked = conn
            .query_row(
                r#"
                SELECT subscription_key, user_id, name, amount, status, updated_at
                FROM subscription_status
                WHERE user_id = ? AND subscription_key = ?
                "#,
                params![user_id, key],
                row_to_tracked,
            )
            .optional()?;
        Ok(tracked)
    }

    /// List every status row for a user, optionally filtered by status
    pub fn list_subscription_statuses(
        &self,
        user_id: i64,
        status: Option<SubscriptionStatus>,
    ) -> Result<Vec<TrackedSubscription>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT subscription_key, user_id, name, amount, status, updated_at
            FROM subscription_status
            WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)
            ORDER BY name, amount
            "#,
        )?;
        let rows = stmt
            .query_map(params![user_id, status.map(|s| s.as_str())], row_to_tracked)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Status lookup table for annotating a detection run
    pub fn subscription_status_map(
        &self,
        user_id: i64,
    ) -> Result<HashMap<String, SubscriptionStatus>> {
        Ok(self
            .list_subscription_statuses(user_id, None)?
            .into_iter()
            .map(|t| (t.id, t.status))
            .collect())
    }

    /// Counts for the dashboard
    pub fn dashboard_stats(&self, user_id: i64) -> Result<DashboardStats> {
        let linked_items = self.count_linked_items(user_id)?;

        let conn = self.conn()?;
        let (tracked_subscriptions, canceled_subscriptions): (i64, i64) = conn.query_row(
            r#"
            SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'canceled' THEN 1 ELSE 0 END), 0)
            FROM subscription_status
            WHERE user_id = ?
            "#,
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(DashboardStats {
            linked_items,
            tracked_subscriptions,
            canceled_subscriptions,
        })
    }
}

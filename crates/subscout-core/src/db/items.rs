//! Linked item operations (bank connections)

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::LinkedItem;

fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<LinkedItem> {
    let created_at_str: String = row.get(4)?;
    Ok(LinkedItem {
        id: row.get(0)?,
        user_id: row.get(1)?,
        item_id: row.get(2)?,
        institution_name: row.get(3)?,
        created_at: parse_datetime(&created_at_str),
    })
}

impl Database {
    /// Store a linked item for a user, replacing the access token if the
    /// item was linked before (re-link after credential rotation).
    ///
    /// An item already owned by another user is a conflict.
    pub fn add_linked_item(
        &self,
        user_id: i64,
        item_id: &str,
        access_token: &str,
        institution_name: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn()?;

        let existing: Option<(i64, i64)> = conn
            .query_row(
                "SELECT id, user_id FROM linked_items WHERE item_id = ?",
                params![item_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((id, owner)) = existing {
            if owner != user_id {
                return Err(Error::Conflict(format!(
                    "Item {} is linked to another user",
                    item_id
                )));
            }
            conn.execute(
                "UPDATE linked_items SET access_token = ?, institution_name = COALESCE(?, institution_name) WHERE id = ?",
                params![access_token, institution_name, id],
            )?;
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO linked_items (user_id, item_id, access_token, institution_name) VALUES (?, ?, ?, ?)",
            params![user_id, item_id, access_token, institution_name],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// List a user's linked items, oldest first
    pub fn list_linked_items(&self, user_id: i64) -> Result<Vec<LinkedItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, user_id, item_id, institution_name, created_at
            FROM linked_items
            WHERE user_id = ?
            ORDER BY id
            "#,
        )?;
        let items = stmt
            .query_map(params![user_id], row_to_item)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Get a single linked item owned by the user
    pub fn get_linked_item(&self, user_id: i64, item_id: &str) -> Result<Option<LinkedItem>> {
        let conn = self.conn()?;
        let item = conn
            .query_row(
                r#"
                SELECT id, user_id, item_id, institution_name, created_at
                FROM linked_items
                WHERE user_id = ? AND item_id = ?
                "#,
                params![user_id, item_id],
                row_to_item,
            )
            .optional()?;
        Ok(item)
    }

    /// Read the provider access token for an item owned by the user
    pub fn get_item_access_token(&self, user_id: i64, item_id: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let token = conn
            .query_row(
                "SELECT access_token FROM linked_items WHERE user_id = ? AND item_id = ?",
                params![user_id, item_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(token)
    }

    /// Remove a linked item; returns false if the user has no such item
    pub fn delete_linked_item(&self, user_id: i64, item_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM linked_items WHERE user_id = ? AND item_id = ?",
            params![user_id, item_id],
        )?;
        Ok(deleted > 0)
    }

    /// Count a user's linked items
    pub fn count_linked_items(&self, user_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM linked_items WHERE user_id = ?",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

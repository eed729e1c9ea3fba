//! Database tests

use super::*;
use crate::models::*;

#[cfg(test)]
mod tests {
    use super::*;

    fn register(db: &Database, email: &str) -> User {
        db.create_user(&NewUser {
            first_name: "Ada".to_string(),
            email: email.to_string(),
            password: "correct horse battery".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_in_memory_db() {
        let db = Database::in_memory().unwrap();
        assert!(db.list_users().unwrap().is_empty());
    }

    #[test]
    fn test_schema_exists() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('users', 'linked_items', 'subscription_status', 'audit_log')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);

        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1, "foreign keys should be enforced on pooled connections");
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let db = Database::in_memory().unwrap();
        register(&db, "ada@example.com");

        let reopened = Database::new_unencrypted(db.path()).unwrap();
        assert_eq!(reopened.list_users().unwrap().len(), 1);
    }

    #[test]
    fn test_create_and_get_user() {
        let db = Database::in_memory().unwrap();
        let user = db
            .create_user(&NewUser {
                first_name: " Ada ".to_string(),
                email: " Ada@Example.com".to_string(),
                password: "correct horse battery".to_string(),
            })
            .unwrap();

        assert_eq!(user.first_name, "Ada");
        assert_eq!(user.email, "ada@example.com");

        let by_id = db.get_user(user.id).unwrap().unwrap();
        assert_eq!(by_id.email, "ada@example.com");

        // Lookup normalizes the same way registration does
        let by_email = db.get_user_by_email("ADA@example.COM ").unwrap().unwrap();
        assert_eq!(by_email.id, user.id);

        assert!(db.get_user(user.id + 100).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_email_conflicts() {
        let db = Database::in_memory().unwrap();
        register(&db, "ada@example.com");

        let err = db
            .create_user(&NewUser {
                first_name: "Other".to_string(),
                email: "ADA@example.com".to_string(),
                password: "another long password".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_invalid_user_rejected() {
        let db = Database::in_memory().unwrap();
        let err = db
            .create_user(&NewUser {
                first_name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
                password: "short".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(db.list_users().unwrap().is_empty());
    }

    #[test]
    fn test_credentials_hold_a_hash() {
        let db = Database::in_memory().unwrap();
        let user = register(&db, "ada@example.com");

        let creds = db.get_user_credentials("ada@example.com").unwrap().unwrap();
        assert_eq!(creds.user_id, user.id);
        assert_ne!(creds.password_hash, "correct horse battery");
        assert!(crate::auth::verify_password("correct horse battery", &creds.password_hash).unwrap());

        assert!(db.get_user_credentials("nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn test_linked_item_crud() {
        let db = Database::in_memory().unwrap();
        let user = register(&db, "ada@example.com");

        let id = db
            .add_linked_item(user.id, "item-1", "access-sandbox-1", Some("First Platypus Bank"))
            .unwrap();
        assert!(id > 0);

        let items = db.list_linked_items(user.id).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_id, "item-1");
        assert_eq!(items[0].institution_name.as_deref(), Some("First Platypus Bank"));

        assert_eq!(
            db.get_item_access_token(user.id, "item-1").unwrap().as_deref(),
            Some("access-sandbox-1")
        );

        // Re-linking replaces the token but keeps the row and the name
        let id2 = db
            .add_linked_item(user.id, "item-1", "access-sandbox-2", None)
            .unwrap();
        assert_eq!(id, id2);
        assert_eq!(
            db.get_item_access_token(user.id, "item-1").unwrap().as_deref(),
            Some("access-sandbox-2")
        );
        let item = db.get_linked_item(user.id, "item-1").unwrap().unwrap();
        assert_eq!(item.institution_name.as_deref(), Some("First Platypus Bank"));

        assert!(db.delete_linked_item(user.id, "item-1").unwrap());
        assert!(!db.delete_linked_item(user.id, "item-1").unwrap());
        assert!(db.list_linked_items(user.id).unwrap().is_empty());
    }

    #[test]
    fn test_linked_items_are_per_user() {
        let db = Database::in_memory().unwrap();
        let ada = register(&db, "ada@example.com");
        let bob = register(&db, "bob@example.com");

        db.add_linked_item(ada.id, "item-ada", "access-ada", None)
            .unwrap();

        assert!(db.get_linked_item(bob.id, "item-ada").unwrap().is_none());
        assert!(db.get_item_access_token(bob.id, "item-ada").unwrap().is_none());
        assert!(!db.delete_linked_item(bob.id, "item-ada").unwrap());

        let err = db
            .add_linked_item(bob.id, "item-ada", "access-bob", None)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(
            db.get_item_access_token(ada.id, "item-ada").unwrap().as_deref(),
            Some("access-ada")
        );
    }

    #[test]
    fn test_subscription_status_upsert() {
        let db = Database::in_memory().unwrap();
        let user = register(&db, "ada@example.com");

        let tracked = db
            .set_subscription_status(user.id, "NETFLIX", -15.49, SubscriptionStatus::Canceled)
            .unwrap();
        assert_eq!(tracked.id, subscription_key("NETFLIX", 15.49));
        assert_eq!(tracked.status, SubscriptionStatus::Canceled);
        assert_eq!(tracked.amount, 15.49);

        let tracked = db
            .set_subscription_status(user.id, "NETFLIX", 15.49, SubscriptionStatus::Current)
            .unwrap();
        assert_eq!(tracked.status, SubscriptionStatus::Current);

        let all = db.list_subscription_statuses(user.id, None).unwrap();
        assert_eq!(all.len(), 1);

        let fetched = db
            .get_subscription_status(user.id, &tracked.id)
            .unwrap()
            .unwrap();
        assert_eq!(fetched.name, "NETFLIX");
    }

    #[test]
    fn test_subscription_status_filter_and_map() {
        let db = Database::in_memory().unwrap();
        let user = register(&db, "ada@example.com");

        db.set_subscription_status(user.id, "NETFLIX", 15.49, SubscriptionStatus::Canceled)
            .unwrap();
        db.set_subscription_status(user.id, "SPOTIFY", 9.99, SubscriptionStatus::Current)
            .unwrap();

        let canceled = db
            .list_subscription_statuses(user.id, Some(SubscriptionStatus::Canceled))
            .unwrap();
        assert_eq!(canceled.len(), 1);
        assert_eq!(canceled[0].name, "NETFLIX");

        let map = db.subscription_status_map(user.id).unwrap();
        assert_eq!(
            map.get(&subscription_key("NETFLIX", 15.49)),
            Some(&SubscriptionStatus::Canceled)
        );
        assert_eq!(
            map.get(&subscription_key("SPOTIFY", 9.99)),
            Some(&SubscriptionStatus::Current)
        );
        assert!(map.get(&subscription_key("HULU", 7.99)).is_none());
    }

    #[test]
    fn test_subscription_status_rejects_bad_input() {
        let db = Database::in_memory().unwrap();
        let user = register(&db, "ada@example.com");

        assert!(db
            .set_subscription_status(user.id, "", 9.99, SubscriptionStatus::Canceled)
            .is_err());
        assert!(db
            .set_subscription_status(user.id, "X", f64::NAN, SubscriptionStatus::Canceled)
            .is_err());
    }

    #[test]
    fn test_dashboard_stats() {
        let db = Database::in_memory().unwrap();
        let user = register(&db, "ada@example.com");

        let empty = db.dashboard_stats(user.id).unwrap();
        assert_eq!(empty.linked_items, 0);
        assert_eq!(empty.tracked_subscriptions, 0);
        assert_eq!(empty.canceled_subscriptions, 0);

        db.add_linked_item(user.id, "item-1", "access-1", None)
            .unwrap();
        db.set_subscription_status(user.id, "NETFLIX", 15.49, SubscriptionStatus::Canceled)
            .unwrap();
        db.set_subscription_status(user.id, "SPOTIFY", 9.99, SubscriptionStatus::Current)
            .unwrap();

        let stats = db.dashboard_stats(user.id).unwrap();
        assert_eq!(stats.linked_items, 1);
        assert_eq!(stats.tracked_subscriptions, 2);
        assert_eq!(stats.canceled_subscriptions, 1);
    }

    #[test]
    fn test_user_delete_cascades() {
        let db = Database::in_memory().unwrap();
        let user = register(&db, "ada@example.com");
        db.add_linked_item(user.id, "item-1", "access-1", None)
            .unwrap();
        db.set_subscription_status(user.id, "NETFLIX", 15.49, SubscriptionStatus::Canceled)
            .unwrap();

        db.conn()
            .unwrap()
            .execute("DELETE FROM users WHERE id = ?", [user.id])
            .unwrap();

        assert!(db.list_linked_items(user.id).unwrap().is_empty());
        assert!(db.list_subscription_statuses(user.id, None).unwrap().is_empty());
    }

    #[test]
    fn test_audit_log() {
        let db = Database::in_memory().unwrap();

        db.log_audit("ada@example.com", "detect", Some("item"), Some("item-1"), None)
            .unwrap();
        db.log_audit("bob@example.com", "login", None, None, None)
            .unwrap();
        db.log_audit(
            "ada@example.com",
            "cancel",
            Some("subscription"),
            Some("abc123"),
            Some("NETFLIX"),
        )
        .unwrap();

        let all = db.list_audit_log(10).unwrap();
        assert_eq!(all.len(), 3);
        // Same-second inserts fall back to id ordering
        assert_eq!(all[0].action, "cancel");

        let ada = db.list_user_audit_log("ada@example.com", 10).unwrap();
        assert_eq!(ada.len(), 2);
        assert!(ada.iter().all(|e| e.user_email == "ada@example.com"));

        assert_eq!(db.list_audit_log(1).unwrap().len(), 1);
    }
}

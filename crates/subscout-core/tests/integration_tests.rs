//! Integration tests for subscout-core
//!
//! These tests exercise the load → detect → track workflow.

use chrono::NaiveDate;
use subscout_core::{
    db::Database,
    detect::{RejectionReason, SubscriptionDetector},
    import::{parse_csv, parse_json},
    models::{subscription_key, NewUser, SubscriptionStatus},
};

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Two monthly subscriptions, a quarterly one, a one-off purchase and a
/// refund that shares the Netflix price
fn statement_csv() -> &'static str {
    "name,amount,date\n\
     NETFLIX,15.49,2024-01-15\n\
     SPOTIFY,9.99,2024-01-03\n\
     BLUE BOTTLE COFFEE,6.50,2024-01-20\n\
     NETFLIX,15.49,2024-02-15\n\
     SPOTIFY,9.99,2024-02-03\n\
     NETFLIX,-15.49,2024-03-01\n\
     ICLOUD,2.99,2023-10-10\n\
     ICLOUD,2.99,2024-01-08\n"
}

fn register(db: &Database) -> i64 {
    db.create_user(&NewUser {
        first_name: "Ada".to_string(),
        email: "ada@example.com".to_string(),
        password: "correct horse battery".to_string(),
    })
    .expect("Failed to register user")
    .id
}

#[test]
fn test_csv_to_candidates() {
    let raw = parse_csv(statement_csv().as_bytes()).expect("Failed to parse CSV");
    assert_eq!(raw.len(), 8);

    let report = SubscriptionDetector::new(date("2024-03-10")).detect(&raw);
    assert!(report.rejected.is_empty());

    let names: Vec<&str> = report
        .subscriptions
        .iter()
        .map(|s| s.name.as_str())
        .collect();
    // Ordered by first appearance, the one-off purchase is dropped
    assert_eq!(names, vec!["NETFLIX", "SPOTIFY", "ICLOUD"]);

    // The refund joins the Netflix group (same |amount|) and becomes the latest date
    let netflix = &report.subscriptions[0];
    assert_eq!(netflix.transactions.len(), 3);
    assert_eq!(netflix.transactions[2].amount, -15.49);
    // Interval 31 days from the two earliest, stepped from 2024-03-01
    assert_eq!(netflix.next_due_date, Some(date("2024-04-01")));

    // One step lands on 2024-03-05, still before today
    let spotify = &report.subscriptions[1];
    assert_eq!(spotify.next_due_date, Some(date("2024-04-05")));

    // 90-day interval stepped once from 2024-01-08
    let icloud = &report.subscriptions[2];
    assert_eq!(icloud.next_due_date, Some(date("2024-04-07")));

    for candidate in &report.subscriptions {
        assert!(candidate.next_due_date.unwrap() >= date("2024-03-10"));
    }
}

#[test]
fn test_bad_rows_do_not_abort_the_run() {
    let raw = parse_json(
        r#"[
            {"name":"NETFLIX","amount":15.49,"date":"2024-01-15"},
            {"name":"NETFLIX","amount":15.49,"date":"15/02/2024"},
            {"amount":15.49,"date":"2024-02-15"},
            {"name":"NETFLIX","amount":15.49,"date":"2024-02-15T08:30:00Z"}
        ]"#
        .as_bytes(),
    )
    .unwrap();

    let report = SubscriptionDetector::new(date("2024-02-20")).detect(&raw);

    assert_eq!(report.rejected.len(), 2);
    assert_eq!(report.rejected[0].index, 1);
    assert!(matches!(
        report.rejected[0].reason,
        RejectionReason::InvalidDate(_)
    ));
    assert_eq!(report.rejected[1].reason, RejectionReason::MissingName);

    assert_eq!(report.subscriptions.len(), 1);
    assert_eq!(report.subscriptions[0].next_due_date, Some(date("2024-03-17")));
}

#[test]
fn test_detection_with_persisted_status() {
    let db = Database::in_memory().expect("Failed to create database");
    let user_id = register(&db);

    let raw = parse_csv(statement_csv().as_bytes()).unwrap();
    let detector = SubscriptionDetector::new(date("2024-03-10"));
    let first = detector.detect(&raw);

    let netflix = &first.subscriptions[0];
    db.set_subscription_status(
        user_id,
        &netflix.name,
        netflix.amount,
        SubscriptionStatus::Canceled,
    )
    .unwrap();

    // Status lives outside the core: a second run is unchanged
    let second = detector.detect(&raw);
    assert_eq!(first, second);

    let statuses = db.subscription_status_map(user_id).unwrap();
    let annotated: Vec<SubscriptionStatus> = second
        .subscriptions
        .iter()
        .map(|c| statuses.get(&c.key()).copied().unwrap_or_default())
        .collect();
    assert_eq!(
        annotated,
        vec![
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Current,
            SubscriptionStatus::Current
        ]
    );

    assert_eq!(netflix.key(), subscription_key("NETFLIX", -15.49));
}

#[cfg(feature = "test-utils")]
mod provider {
    use super::*;
    use subscout_core::plaid::{BankDataProvider, PlaidClient};
    use subscout_core::test_utils::MockPlaidServer;

    #[tokio::test]
    async fn test_link_fetch_and_detect() {
        let server = MockPlaidServer::start().await;
        let client = PlaidClient::new(server.config());
        let db = Database::in_memory().unwrap();
        let user_id = register(&db);

        let access = client
            .exchange_public_token("public-sandbox-first")
            .await
            .unwrap();
        db.add_linked_item(user_id, &access.item_id, &access.access_token, None)
            .unwrap();

        let token = db
            .get_item_access_token(user_id, &access.item_id)
            .unwrap()
            .unwrap();
        let raw = client
            .list_transactions(&token, date("2024-01-01"), date("2024-02-29"))
            .await
            .unwrap();

        let report = SubscriptionDetector::new(date("2024-02-20")).detect(&raw);
        let names: Vec<&str> = report
            .subscriptions
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["NETFLIX", "SPOTIFY"]);
    }
}

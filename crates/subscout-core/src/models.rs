//! Domain models for Subscout

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A transaction as received from the bank-data provider or an API caller.
///
/// Every field is optional so a single malformed record can be rejected
/// during validation without failing the whole payload. A field present with
/// the wrong JSON type is recorded in `malformed` instead of failing
/// deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireTransaction")]
pub struct RawTransaction {
    pub name: Option<String>,
    pub amount: Option<f64>,
    pub date: Option<String>,
    #[serde(skip)]
    pub malformed: Vec<MalformedField>,
}

impl RawTransaction {
    pub fn new(name: &str, amount: f64, date: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            amount: Some(amount),
            date: Some(date.to_string()),
            malformed: Vec::new(),
        }
    }

    /// The received text of a field that could not be read, if any
    pub fn malformed(&self, field: TransactionField) -> Option<&str> {
        self.malformed
            .iter()
            .find(|m| m.field == field)
            .map(|m| m.received.as_str())
    }
}

/// Fields of a raw transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionField {
    Name,
    Amount,
    Date,
}

/// A field that was present but unreadable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedField {
    pub field: TransactionField,
    pub received: String,
}

impl MalformedField {
    pub fn new(field: TransactionField, received: &str) -> Self {
        Self {
            field,
            received: received.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct WireTransaction {
    #[serde(default)]
    name: serde_json::Value,
    #[serde(default)]
    amount: serde_json::Value,
    #[serde(default)]
    date: serde_json::Value,
}

impl From<WireTransaction> for RawTransaction {
    fn from(wire: WireTransaction) -> Self {
        use serde_json::Value;

        let mut malformed = Vec::new();
        let mut reject = |field, value: Value| {
            let received = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            malformed.push(MalformedField { field, received });
        };

        let name = match wire.name {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => {
                reject(TransactionField::Name, other);
                None
            }
        };
        let amount = match wire.amount {
            Value::Null => None,
            Value::Number(n) => n.as_f64(),
            other => {
                reject(TransactionField::Amount, other);
                None
            }
        };
        let date = match wire.date {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => {
                reject(TransactionField::Date, other);
                None
            }
        };

        Self {
            name,
            amount,
            date,
            malformed,
        }
    }
}

/// A validated transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    /// Merchant label, kept verbatim (not trimmed or case-folded)
    pub name: String,
    /// Signed amount; the sign convention belongs to the provider
    pub amount: f64,
    pub date: NaiveDate,
}

/// A single occurrence kept on a subscription candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTransaction {
    pub date: NaiveDate,
    pub amount: f64,
}

/// A detected, unconfirmed recurring payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionCandidate {
    pub name: String,
    /// Common absolute amount of the group
    pub amount: f64,
    /// Occurrences in the order they appeared in the input
    pub transactions: Vec<CandidateTransaction>,
    pub next_due_date: Option<NaiveDate>,
}

impl SubscriptionCandidate {
    /// Stable identifier for this (name, amount) pair
    pub fn key(&self) -> String {
        subscription_key(&self.name, self.amount)
    }
}

/// Derive the stable identifier for a (merchant name, |amount|) pair.
///
/// Used to key persisted status; it plays no part in grouping.
pub fn subscription_key(name: &str, amount: f64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(amount.abs().to_string().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

/// User-managed status of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    #[default]
    Current,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Canceled => "canceled",
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "current" | "active" => Ok(Self::Current),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            _ => Err(format!("Unknown subscription status: {}", s)),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted status of a subscription, keyed by user and subscription key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedSubscription {
    pub id: String,
    pub user_id: i64,
    pub name: String,
    pub amount: f64,
    pub status: SubscriptionStatus,
    pub updated_at: DateTime<Utc>,
}

/// A registered user (never carries the password hash)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub created_at: DateTime<Utc>,
}

/// Registration input, validated by [`crate::auth::validate_new_user`]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// A single failed field check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

/// A bank connection linked through the provider.
///
/// The access token is deliberately absent; it is only read through
/// `Database::get_item_access_token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedItem {
    pub id: i64,
    pub user_id: i64,
    pub item_id: String,
    pub institution_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-user counts shown on the dashboard
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardStats {
    pub linked_items: i64,
    pub tracked_subscriptions: i64,
    pub canceled_subscriptions: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_key_ignores_sign() {
        assert_eq!(
            subscription_key("NETFLIX", 15.49),
            subscription_key("NETFLIX", -15.49)
        );
        assert_eq!(subscription_key("NETFLIX", 15.49).len(), 16);
    }

    #[test]
    fn test_subscription_key_is_case_sensitive() {
        assert_ne!(
            subscription_key("Netflix", 15.49),
            subscription_key("NETFLIX", 15.49)
        );
        assert_ne!(
            subscription_key("Netflix", 15.49),
            subscription_key("Netflix", 15.99)
        );
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(
            "canceled".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Canceled
        );
        assert_eq!(
            "Current".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Current
        );
        assert!("paused".parse::<SubscriptionStatus>().is_err());
    }

    #[test]
    fn test_candidate_serializes_camel_case() {
        let candidate = SubscriptionCandidate {
            name: "X".to_string(),
            amount: 9.99,
            transactions: vec![CandidateTransaction {
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                amount: -9.99,
            }],
            next_due_date: None,
        };
        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["name"], "X");
        assert_eq!(json["transactions"][0]["date"], "2024-01-01");
        assert!(json.get("nextDueDate").is_some());
    }

    #[test]
    fn test_raw_transaction_wrong_types_are_recorded() {
        let raw: Vec<RawTransaction> = serde_json::from_str(
            r#"[
                {"name": "HULU", "amount": "9.99", "date": "2024-01-01"},
                {"name": 42, "amount": 9.99, "date": 20240101},
                {"name": "SPOTIFY", "amount": null}
            ]"#,
        )
        .unwrap();

        assert_eq!(raw[0].amount, None);
        assert_eq!(raw[0].malformed(TransactionField::Amount), Some("9.99"));
        assert_eq!(raw[0].name.as_deref(), Some("HULU"));

        assert_eq!(raw[1].malformed(TransactionField::Name), Some("42"));
        assert_eq!(raw[1].malformed(TransactionField::Date), Some("20240101"));
        assert_eq!(raw[1].amount, Some(9.99));

        assert!(raw[2].malformed.is_empty());
        assert_eq!(raw[2].amount, None);
        assert_eq!(raw[2].date, None);
    }
}

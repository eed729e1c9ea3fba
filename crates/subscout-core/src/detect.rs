//! Subscription detection
//!
//! Finds recurring payments in an already-fetched transaction list:
//! - Validation: malformed records are rejected one at a time
//! - Grouping: transactions are partitioned by (merchant name, absolute amount)
//! - Classification: groups with at least two occurrences become candidates
//! - Projection: the next billing date is stepped forward from the latest payment
//!
//! Everything here is a pure function of its input and the caller's `today`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate};
use serde::Serialize;
use tracing::debug;

use crate::models::{
    CandidateTransaction, RawTransaction, SubscriptionCandidate, Transaction, TransactionField,
};

/// A single occurrence cannot evidence recurrence
pub const MIN_OCCURRENCES: usize = 2;

/// Detection configuration
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Minimum occurrences for a group to become a candidate (never below 2)
    pub min_occurrences: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_occurrences: MIN_OCCURRENCES,
        }
    }
}

/// Why a transaction was excluded from grouping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectionReason {
    MissingName,
    MissingAmount,
    MissingDate,
    InvalidName(String),
    InvalidAmount(String),
    InvalidDate(String),
    NonFiniteAmount,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingName => write!(f, "missing name"),
            Self::MissingAmount => write!(f, "missing amount"),
            Self::MissingDate => write!(f, "missing date"),
            Self::InvalidName(n) => write!(f, "invalid name: {}", n),
            Self::InvalidAmount(a) => write!(f, "invalid amount: {}", a),
            Self::InvalidDate(d) => write!(f, "invalid date: {}", d),
            Self::NonFiniteAmount => write!(f, "amount is not a finite number"),
        }
    }
}

/// A rejected input record and its position in the input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedTransaction {
    pub index: usize,
    pub reason: RejectionReason,
}

/// Results of running detection
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionReport {
    pub subscriptions: Vec<SubscriptionCandidate>,
    pub rejected: Vec<RejectedTransaction>,
}

/// Parse a transaction date.
///
/// Accepts `YYYY-MM-DD`, or an RFC 3339 timestamp truncated to its calendar date.
pub fn parse_transaction_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Validate a single raw record
pub fn validate_transaction(raw: &RawTransaction) -> Result<Transaction, RejectionReason> {
    let malformed = |field| raw.malformed(field).map(str::to_string);

    if let Some(received) = malformed(TransactionField::Name) {
        return Err(RejectionReason::InvalidName(received));
    }
    let name = match raw.name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Err(RejectionReason::MissingName),
    };

    if let Some(received) = malformed(TransactionField::Amount) {
        return Err(RejectionReason::InvalidAmount(received));
    }
    let amount = raw.amount.ok_or(RejectionReason::MissingAmount)?;
    if !amount.is_finite() {
        return Err(RejectionReason::NonFiniteAmount);
    }

    if let Some(received) = malformed(TransactionField::Date) {
        return Err(RejectionReason::InvalidDate(received));
    }
    let date_str = raw.date.as_deref().ok_or(RejectionReason::MissingDate)?;
    let date = parse_transaction_date(date_str)
        .ok_or_else(|| RejectionReason::InvalidDate(date_str.to_string()))?;

    Ok(Transaction { name, amount, date })
}

/// Validate raw records, rejecting offenders individually.
///
/// Accepted transactions keep their input order.
pub fn validate_transactions(
    raw: &[RawTransaction],
) -> (Vec<Transaction>, Vec<RejectedTransaction>) {
    let mut accepted = Vec::with_capacity(raw.len());
    let mut rejected = Vec::new();

    for (index, record) in raw.iter().enumerate() {
        match validate_transaction(record) {
            Ok(tx) => accepted.push(tx),
            Err(reason) => {
                debug!(index, %reason, "Rejecting transaction");
                rejected.push(RejectedTransaction { index, reason });
            }
        }
    }

    (accepted, rejected)
}

/// Composite grouping key: exact merchant label and absolute amount
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    name: String,
    // f64 is not Hash; the bit pattern of |amount| gives exact equality
    amount_bits: u64,
}

impl GroupKey {
    pub fn new(name: &str, amount: f64) -> Self {
        Self {
            name: name.to_string(),
            amount_bits: amount.abs().to_bits(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The absolute amount shared by the group
    pub fn amount(&self) -> f64 {
        f64::from_bits(self.amount_bits)
    }
}

/// Transactions partitioned by [`GroupKey`].
///
/// Groups are ordered by first appearance of their key, and each group keeps
/// the input order of its transactions.
#[derive(Debug, Clone, Default)]
pub struct TransactionGroups {
    index: HashMap<GroupKey, usize>,
    groups: Vec<(GroupKey, Vec<Transaction>)>,
}

impl TransactionGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transaction to its group, creating the group if needed
    pub fn push(&mut self, tx: Transaction) {
        let key = GroupKey::new(&tx.name, tx.amount);
        match self.index.get(&key) {
            Some(&pos) => self.groups[pos].1.push(tx),
            None => {
                self.index.insert(key.clone(), self.groups.len());
                self.groups.push((key, vec![tx]));
            }
        }
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, key: &GroupKey) -> Option<&[Transaction]> {
        self.index
            .get(key)
            .map(|&pos| self.groups[pos].1.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, &[Transaction])> {
        self.groups.iter().map(|(k, txs)| (k, txs.as_slice()))
    }

    /// Groups with exactly one transaction
    pub fn singletons(&self) -> impl Iterator<Item = (&GroupKey, &Transaction)> {
        self.groups
            .iter()
            .filter(|(_, txs)| txs.len() == 1)
            .map(|(k, txs)| (k, &txs[0]))
    }

    /// Total transactions across all groups
    pub fn transaction_count(&self) -> usize {
        self.groups.iter().map(|(_, txs)| txs.len()).sum()
    }
}

impl IntoIterator for TransactionGroups {
    type Item = (GroupKey, Vec<Transaction>);
    type IntoIter = std::vec::IntoIter<(GroupKey, Vec<Transaction>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

/// Partition transactions by (name, |amount|)
pub fn group_transactions(transactions: &[Transaction]) -> TransactionGroups {
    let mut groups = TransactionGroups::new();
    for tx in transactions {
        groups.push(tx.clone());
    }
    groups
}

/// Keep groups with at least `min_occurrences` transactions (clamped to 2).
///
/// Candidates come back unprojected, with transactions in input order.
pub fn classify_recurring(
    groups: TransactionGroups,
    min_occurrences: usize,
) -> Vec<SubscriptionCandidate> {
    let min = min_occurrences.max(MIN_OCCURRENCES);

    groups
        .into_iter()
        .filter(|(_, txs)| txs.len() >= min)
        .map(|(key, txs)| SubscriptionCandidate {
            amount: key.amount(),
            name: key.name,
            transactions: txs
                .into_iter()
                .map(|t| CandidateTransaction {
                    date: t.date,
                    amount: t.amount,
                })
                .collect(),
            next_due_date: None,
        })
        .collect()
}

/// Project the next billing date on or after `today`.
///
/// The interval is taken between the two earliest dates. Returns `None` for
/// fewer than two dates and for a non-positive interval (duplicate dates).
pub fn project_next_due(dates: &[NaiveDate], today: NaiveDate) -> Option<NaiveDate> {
    if dates.len() < MIN_OCCURRENCES {
        return None;
    }

    let mut sorted = dates.to_vec();
    sorted.sort();

    let interval_days = (sorted[1] - sorted[0]).num_days();
    if interval_days <= 0 {
        debug!(interval_days, "No projection for degenerate interval");
        return None;
    }

    let latest = *sorted.last()?;
    if latest >= today {
        return Some(latest);
    }

    // Whole intervals needed to reach today, rounded up
    let behind = (today - latest).num_days();
    let steps = (behind + interval_days - 1) / interval_days;

    latest.checked_add_signed(Duration::days(steps * interval_days))
}

/// Days from `today` until `due`; negative once the date has passed
pub fn days_until(due: NaiveDate, today: NaiveDate) -> i64 {
    (due - today).num_days()
}

/// Runs the full pipeline: validate, group, classify, project
#[derive(Debug, Clone)]
pub struct SubscriptionDetector {
    today: NaiveDate,
    config: DetectionConfig,
}

impl SubscriptionDetector {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            config: DetectionConfig::default(),
        }
    }

    pub fn with_config(today: NaiveDate, config: DetectionConfig) -> Self {
        Self { today, config }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Detect subscriptions in raw records
    pub fn detect(&self, raw: &[RawTransaction]) -> DetectionReport {
        let (transactions, rejected) = validate_transactions(raw);
        let subscriptions = self.detect_validated(&transactions);

        debug!(
            input = raw.len(),
            rejected = rejected.len(),
            candidates = subscriptions.len(),
            "Subscription detection complete"
        );

        DetectionReport {
            subscriptions,
            rejected,
        }
    }

    /// Detect subscriptions in already validated transactions
    pub fn detect_validated(&self, transactions: &[Transaction]) -> Vec<SubscriptionCandidate> {
        let groups = group_transactions(transactions);
        let mut candidates = classify_recurring(groups, self.config.min_occurrences);

        for candidate in &mut candidates {
            let dates: Vec<NaiveDate> = candidate.transactions.iter().map(|t| t.date).collect();
            candidate.next_due_date = project_next_due(&dates, self.today);
        }

        candidates
    }
}

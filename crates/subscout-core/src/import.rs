//! Transaction file loading for offline detection runs
//!
//! Records are loaded as `RawTransaction`s; a bad row becomes a validation
//! rejection during detection rather than a load failure.

use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{MalformedField, RawTransaction, TransactionField};

/// Supported input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Json,
    Csv,
}

impl InputFormat {
    /// Guess the format from a file extension (JSON unless `.csv`)
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Self::Csv,
            _ => Self::Json,
        }
    }
}

/// Load transactions from a JSON or CSV file
pub fn load_transactions_file(path: &Path) -> Result<Vec<RawTransaction>> {
    let file = std::fs::File::open(path)?;
    match InputFormat::from_path(path) {
        InputFormat::Csv => parse_csv(file),
        InputFormat::Json => parse_json(file),
    }
}

fn column(headers: &StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
        .ok_or_else(|| Error::InvalidData(format!("CSV is missing the '{}' column", name)))
}

/// Parse CSV with `name`, `amount` and `date` headers (any order, extra columns ignored)
pub fn parse_csv<R: Read>(reader: R) -> Result<Vec<RawTransaction>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let name_col = column(&headers, "name")?;
    let amount_col = column(&headers, "amount")?;
    let date_col = column(&headers, "date")?;

    let mut transactions = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let cell = |i: usize| record.get(i).filter(|s| !s.is_empty());

        // Merchant labels are kept verbatim, amounts and dates are trimmed
        let mut malformed = Vec::new();
        let amount = match cell(amount_col).map(str::trim) {
            Some(s) => match s.parse::<f64>() {
                Ok(amount) => Some(amount),
                Err(_) => {
                    debug!(row = transactions.len(), "Unparseable amount");
                    malformed.push(MalformedField::new(TransactionField::Amount, s));
                    None
                }
            },
            None => None,
        };

        transactions.push(RawTransaction {
            name: cell(name_col).map(str::to_string),
            amount,
            date: cell(date_col).map(|s| s.trim().to_string()),
            malformed,
        });
    }

    debug!("Parsed {} CSV transactions", transactions.len());
    Ok(transactions)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonInput {
    List(Vec<RawTransaction>),
    Wrapped { transactions: Vec<RawTransaction> },
}

/// Parse a JSON array of transactions, or an object with a `transactions` array
pub fn parse_json<R: Read>(reader: R) -> Result<Vec<RawTransaction>> {
    let input: JsonInput = serde_json::from_reader(reader)?;
    let transactions = match input {
        JsonInput::List(list) => list,
        JsonInput::Wrapped { transactions } => transactions,
    };
    debug!("Parsed {} JSON transactions", transactions.len());
    Ok(transactions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{RejectionReason, SubscriptionDetector};
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_parse_csv() {
        let csv = "date,name,amount,category\n\
                   2024-01-15,NETFLIX,15.49,Entertainment\n\
                   2024-02-15,NETFLIX, 15.49 ,Entertainment\n";

        let txs = parse_csv(csv.as_bytes()).unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0], RawTransaction::new("NETFLIX", 15.49, "2024-01-15"));
        assert_eq!(txs[1].amount, Some(15.49));
    }

    #[test]
    fn test_parse_csv_headers_case_insensitive() {
        let csv = "Name,Amount,Date\nSPOTIFY,-9.99,2024-01-03\n";
        let txs = parse_csv(csv.as_bytes()).unwrap();
        assert_eq!(txs[0].amount, Some(-9.99));
    }

    #[test]
    fn test_parse_csv_blank_cells_become_missing() {
        let csv = "name,amount,date\n,9.99,2024-01-03\nHULU,abc,2024-01-03\nHULU,7.99,\n";
        let txs = parse_csv(csv.as_bytes()).unwrap();
        assert_eq!(txs.len(), 3);
        assert!(txs[0].name.is_none());
        assert!(txs[1].amount.is_none());
        assert_eq!(txs[1].malformed(TransactionField::Amount), Some("abc"));
        assert!(txs[2].date.is_none());
        assert!(txs[2].malformed.is_empty());
    }

    #[test]
    fn test_parse_csv_unparseable_amount_is_invalid() {
        let csv = "name,amount,date
HULU,7.99,2024-01-03
HULU, abc ,2024-01-10
HULU,7.99,2024-02-03
";
        let txs = parse_csv(csv.as_bytes()).unwrap();
        let report = SubscriptionDetector::new(date("2024-02-15")).detect(&txs);

        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].index, 1);
        assert_eq!(
            report.rejected[0].reason,
            RejectionReason::InvalidAmount("abc".to_string())
        );
        assert_eq!(report.subscriptions.len(), 1);
    }

    #[test]
    fn test_parse_json_wrong_typed_amount_keeps_other_records() {
        let json = r#"[
            {"name":"NETFLIX","amount":15.49,"date":"2024-01-15"},
            {"name":"NETFLIX","amount":"9.99","date":"2024-01-20"},
            {"name":"NETFLIX","amount":15.49,"date":"2024-02-15"}
        ]"#;
        let txs = parse_json(json.as_bytes()).unwrap();
        assert_eq!(txs.len(), 3);

        let report = SubscriptionDetector::new(date("2024-02-20")).detect(&txs);
        assert_eq!(report.subscriptions.len(), 1);
        assert_eq!(
            report.rejected[0].reason,
            RejectionReason::InvalidAmount("9.99".to_string())
        );
    }

    #[test]
    fn test_parse_csv_missing_column() {
        let csv = "name,amount\nNETFLIX,15.49\n";
        let err = parse_csv(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("'date'"));
    }

    #[test]
    fn test_parse_json_list_and_wrapped() {
        let list = r#"[{"name":"NETFLIX","amount":15.49,"date":"2024-01-15"}]"#;
        assert_eq!(parse_json(list.as_bytes()).unwrap().len(), 1);

        let wrapped = r#"{"transactions":[{"name":"NETFLIX","amount":15.49,"date":"2024-01-15"},{"name":"X"}]}"#;
        let txs = parse_json(wrapped.as_bytes()).unwrap();
        assert_eq!(txs.len(), 2);
        assert!(txs[1].amount.is_none());
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(InputFormat::from_path(Path::new("a.CSV")), InputFormat::Csv);
        assert_eq!(InputFormat::from_path(Path::new("a.json")), InputFormat::Json);
        assert_eq!(InputFormat::from_path(Path::new("noext")), InputFormat::Json);
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("txs.csv");
        std::fs::write(&path, "name,amount,date\nNETFLIX,15.49,2024-01-15\n").unwrap();
        assert_eq!(load_transactions_file(&path).unwrap().len(), 1);

        assert!(load_transactions_file(&dir.path().join("missing.json")).is_err());
    }
}

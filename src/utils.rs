use crate::error::{ReceivablesError, Result};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Deserializer};

/// Invoices more than this many days past due are high risk.
pub const HIGH_RISK_DAYS_OVERDUE: i64 = 90;
/// Invoices with an outstanding balance above this amount are high risk.
pub const HIGH_RISK_BALANCE: f64 = 10_000.0;

/// Canonical grouping key for a customer: trimmed and lowercased.
pub fn normalize_customer_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Whole days between `due_date` and `evaluation_date`. Negative when the
/// invoice is not yet due.
pub fn days_overdue(due_date: NaiveDate, evaluation_date: NaiveDate) -> i64 {
    evaluation_date.signed_duration_since(due_date).num_days()
}

pub fn is_high_risk(days_overdue: i64, balance: f64) -> bool {
    days_overdue > HIGH_RISK_DAYS_OVERDUE || balance > HIGH_RISK_BALANCE
}

/// Lower bound for API date filters, counted as 30-day months back from `today`.
pub fn date_start_for(today: NaiveDate, months_back: u32) -> Result<NaiveDate> {
    today
        .checked_sub_days(Days::new(u64::from(months_back) * 30))
        .ok_or_else(|| {
            ReceivablesError::DateError(format!(
                "Cannot go back {} months from {}",
                months_back, today
            ))
        })
}

/// File-name slug for an organization: "GoFleet Corporation" -> "gofleet_corporation".
pub fn organization_slug(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

/// Normalizes a CSV header cell: trimmed, lowercased, inner whitespace runs
/// collapsed to `_`.
pub fn normalize_header(header: &str) -> String {
    header
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    // Exports sometimes carry a time component; only the date part matters.
    let date_part = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|_| {
        ReceivablesError::DateError(format!(
            "Invalid date '{}'. Expected YYYY-MM-DD",
            raw
        ))
    })
}

/// Lenient boolean cell: accepts true/false in any case, 1/0, yes/no, and
/// treats an empty cell as false.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "" | "false" | "0" | "no" | "n" | "nan" => Some(false),
        "true" | "1" | "yes" | "y" => Some(true),
        _ => None,
    }
}

pub(crate) fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FlagCell {
        Bool(bool),
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Option::<FlagCell>::deserialize(deserializer)? {
        None => Ok(false),
        Some(FlagCell::Bool(value)) => Ok(value),
        Some(FlagCell::Int(value)) => Ok(value != 0),
        Some(FlagCell::Float(value)) => Ok(value != 0.0 && !value.is_nan()),
        Some(FlagCell::Text(text)) => parse_flag(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid boolean cell '{}'", text))),
    }
}

/// Empty or malformed dates become `None` instead of failing the whole row.
pub(crate) fn deserialize_lenient_date<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| parse_date(&s).ok()))
}

/// Amount cells may be numbers, numeric strings or blank.
pub(crate) fn deserialize_lenient_amount<'de, D>(
    deserializer: D,
) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AmountCell {
        Number(f64),
        Text(String),
    }

    match Option::<AmountCell>::deserialize(deserializer)? {
        None => Ok(0.0),
        Some(AmountCell::Number(value)) => Ok(value),
        Some(AmountCell::Text(text)) => {
            let cleaned: String = text.trim().chars().filter(|c| *c != ',').collect();
            if cleaned.is_empty() {
                Ok(0.0)
            } else {
                cleaned.parse::<f64>().map_err(|_| {
                    serde::de::Error::custom(format!("invalid amount cell '{}'", text))
                })
            }
        }
    }
}

//! Transaction rows as submitted, and the per-row checks the ingestor runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MIN_MOBILE_DIGITS: usize = 6;
const MAX_MOBILE_DIGITS: usize = 15;

/// Largest magnitude a point amount can take, in thousandths (`decimal(15,3)`).
const MAX_POINTS_MILLI: i64 = 999_999_999_999_999;

/// One line of an uploaded transaction file, stored verbatim in the job payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub mobile: String,
    /// Transaction amount; negative values are reversals.
    pub amount: f64,
    /// Transaction id from the source system, used to skip in-file duplicates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TransactionRow {
    pub fn new(mobile: impl Into<String>, amount: f64) -> Self {
        Self {
            mobile: mobile.into(),
            amount,
            external_id: None,
            date: None,
            note: None,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn mobile_number(&self) -> Result<MobileNumber, RowError> {
        MobileNumber::parse(&self.mobile)
    }

    pub fn points(&self) -> Result<Points, RowError> {
        Points::from_amount(self.amount)
    }

    /// External id with surrounding whitespace removed; blank ids count as absent.
    pub fn external_key(&self) -> Option<&str> {
        self.external_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Row-level validation failure. Counted against the job, never fatal to it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("mobile number is empty")]
    EmptyMobile,

    #[error("mobile number {0:?} is not a valid phone number")]
    InvalidMobile(String),

    #[error("amount must be a finite number")]
    NonFiniteAmount,

    #[error("amount {0} is out of range")]
    AmountOutOfRange(String),
}

/// Normalised mobile number: separators stripped, digits with an optional
/// leading `+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MobileNumber(String);

impl MobileNumber {
    pub fn parse(raw: &str) -> Result<Self, RowError> {
        let compact: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect();
        if compact.is_empty() {
            return Err(RowError::EmptyMobile);
        }

        let digits = compact.strip_prefix('+').unwrap_or(&compact);
        let valid = digits.chars().all(|c| c.is_ascii_digit())
            && (MIN_MOBILE_DIGITS..=MAX_MOBILE_DIGITS).contains(&digits.len());
        if !valid {
            return Err(RowError::InvalidMobile(raw.to_string()));
        }

        Ok(Self(compact))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for MobileNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point amount in thousandths, the precision balances are kept at.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Points(i64);

impl Points {
    pub const ZERO: Points = Points(0);

    pub fn from_amount(amount: f64) -> Result<Self, RowError> {
        if !amount.is_finite() {
            return Err(RowError::NonFiniteAmount);
        }
        let milli = (amount * 1000.0).round();
        if milli.abs() > MAX_POINTS_MILLI as f64 {
            return Err(RowError::AmountOutOfRange(amount.to_string()));
        }
        Ok(Self(milli as i64))
    }

    pub fn from_milli(milli: i64) -> Self {
        Self(milli)
    }

    pub fn as_milli(&self) -> i64 {
        self.0
    }

    pub fn saturating_add(self, other: Points) -> Points {
        Points(self.0.saturating_add(other.0))
    }
}

impl core::fmt::Display for Points {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:03}", abs / 1000, abs % 1000)
    }
}

//! Structural validation of an upload before it becomes a job.
//!
//! Admission rejects inputs that can never be processed: an empty row set, a
//! missing source label, non-finite amounts, oversized text. The content of
//! individual fields (most notably the mobile number) is judged per row by the
//! ingestor, so one bad line fails that line rather than the whole file.

use branchpoints_core::{BranchId, DomainError, DomainResult, SubmitterId};

use crate::row::TransactionRow;

/// Whether negative amounts (reversals) are accepted.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum AmountPolicy {
    /// Any finite amount, negative values are reversals
    #[default]
    AllowReversals,
    /// Only strictly positive amounts
    PositiveOnly,
}

/// Limits applied at admission.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    pub amount_policy: AmountPolicy,
    /// Upper bound on rows in a single upload
    pub max_rows: usize,
    pub max_label_len: usize,
    pub max_external_id_len: usize,
    pub max_note_len: usize,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            amount_policy: AmountPolicy::AllowReversals,
            max_rows: 100_000,
            max_label_len: 255,
            max_external_id_len: 128,
            max_note_len: 1_000,
        }
    }
}

impl AdmissionPolicy {
    pub fn positive_only(mut self) -> Self {
        self.amount_policy = AmountPolicy::PositiveOnly;
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Check an upload request; the first violation wins.
    pub fn validate(&self, upload: &NewUpload) -> DomainResult<()> {
        let label = upload.source_label.trim();
        if label.is_empty() {
            return Err(DomainError::validation("source label is required"));
        }
        if label.chars().count() > self.max_label_len {
            return Err(DomainError::validation(format!(
                "source label exceeds {} characters",
                self.max_label_len
            )));
        }

        if upload.rows.is_empty() {
            return Err(DomainError::validation("upload contains no rows"));
        }
        if upload.rows.len() > self.max_rows {
            return Err(DomainError::validation(format!(
                "upload has {} rows, the limit is {}",
                upload.rows.len(),
                self.max_rows
            )));
        }

        for (index, row) in upload.rows.iter().enumerate() {
            self.validate_row(row)
                .map_err(|msg| DomainError::validation(format!("row {}: {msg}", index + 1)))?;
        }

        Ok(())
    }

    fn validate_row(&self, row: &TransactionRow) -> Result<(), String> {
        if !row.amount.is_finite() {
            return Err("amount must be a finite number".to_string());
        }
        if self.amount_policy == AmountPolicy::PositiveOnly && row.amount <= 0.0 {
            return Err(format!("amount {} must be positive", row.amount));
        }
        if let Some(id) = &row.external_id {
            if id.chars().count() > self.max_external_id_len {
                return Err(format!(
                    "transaction id exceeds {} characters",
                    self.max_external_id_len
                ));
            }
        }
        if let Some(note) = &row.note {
            if note.chars().count() > self.max_note_len {
                return Err(format!("note exceeds {} characters", self.max_note_len));
            }
        }
        Ok(())
    }
}

/// An upload request as received from the submission surface.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUpload {
    pub submitter_id: SubmitterId,
    pub branch_id: BranchId,
    /// Where the rows came from, typically the uploaded file name
    pub source_label: String,
    pub rows: Vec<TransactionRow>,
}

impl NewUpload {
    pub fn new(
        submitter_id: SubmitterId,
        branch_id: BranchId,
        source_label: impl Into<String>,
        rows: Vec<TransactionRow>,
    ) -> Self {
        Self {
            submitter_id,
            branch_id,
            source_label: source_label.into(),
            rows,
        }
    }
}

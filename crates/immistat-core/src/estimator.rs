use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::models::{CleanedTable, Selection, YearMonth};
use crate::schema::DatasetSchema;

/// Days per month used by the processing-rate projection.
///
/// Deliberately a flat 30 rather than the calendar length of the month.
pub const DAYS_PER_MONTH: f64 = 30.0;

// ── ClearanceEstimate ─────────────────────────────────────────────────────────

/// Days needed to clear a backlog, or `Undefined` when nothing was processed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearanceEstimate {
    Days(f64),
    /// No processing happened in the period, so no rate exists.
    Undefined,
}

impl ClearanceEstimate {
    pub fn days(&self) -> Option<f64> {
        match self {
            ClearanceEstimate::Days(d) => Some(*d),
            ClearanceEstimate::Undefined => None,
        }
    }

    /// Numeric view: `Undefined` is `f64::INFINITY`.
    pub fn as_f64(&self) -> f64 {
        self.days().unwrap_or(f64::INFINITY)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, ClearanceEstimate::Undefined)
    }
}

impl fmt::Display for ClearanceEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClearanceEstimate::Days(d) => write!(f, "{:.2} days", d),
            ClearanceEstimate::Undefined => f.write_str("undefined"),
        }
    }
}

impl Serialize for ClearanceEstimate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ClearanceEstimate::Days(d) => serializer.serialize_f64(*d),
            ClearanceEstimate::Undefined => serializer.serialize_str("undefined"),
        }
    }
}

impl<'de> Deserialize<'de> for ClearanceEstimate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Days(f64),
            Label(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Days(d) => Ok(ClearanceEstimate::Days(d)),
            Repr::Label(s) if s == "undefined" => Ok(ClearanceEstimate::Undefined),
            Repr::Label(s) => Err(serde::de::Error::custom(format!(
                "expected a number or \"undefined\", got \"{}\"",
                s
            ))),
        }
    }
}

// ── EstimateResult ────────────────────────────────────────────────────────────

/// Backlog figures for one month/type/bureau selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateResult {
    pub month: YearMonth,
    pub pending_count: f64,
    pub processed_count: f64,
    /// Processed applications per day.
    pub daily_rate: f64,
    pub estimated_days: ClearanceEstimate,
}

impl EstimateResult {
    /// The day the backlog clears when counting from `from`.
    ///
    /// Partial days round up. `None` when the estimate is undefined.
    pub fn projected_completion(&self, from: NaiveDate) -> Option<NaiveDate> {
        let days = self.estimated_days.days()?.ceil();
        if !days.is_finite() || days > i64::MAX as f64 {
            return None;
        }
        from.checked_add_signed(chrono::Duration::try_days(days as i64)?)
    }
}

// ── BacklogEstimator ──────────────────────────────────────────────────────────

/// Stateless linear-rate backlog projection.
pub struct BacklogEstimator;

impl BacklogEstimator {
    /// Estimate the clearance time for `month`.
    ///
    /// Empty `application_types` / `bureaus` mean "all". Pending and
    /// processed rows are recognised by the schema's status labels; null
    /// counts contribute nothing.
    pub fn estimate(
        table: &CleanedTable,
        schema: &DatasetSchema,
        month: YearMonth,
        application_types: &[String],
        bureaus: &[String],
    ) -> EstimateResult {
        let selection = Selection::new()
            .with_month(month)
            .with_types(application_types.iter().cloned())
            .with_bureaus(bureaus.iter().cloned());

        let bureau_mask: Vec<bool> = table
            .bureaus()
            .iter()
            .map(|b| selection.matches_bureau(b))
            .collect();

        let mut pending = 0.0;
        let mut processed = 0.0;
        for record in table.records().iter().filter(|r| selection.matches_row(r)) {
            let sum: f64 = record
                .counts
                .iter()
                .zip(&bureau_mask)
                .filter(|(_, keep)| **keep)
                .filter_map(|(c, _)| *c)
                .sum();
            if record.status == schema.pending_status {
                pending += sum;
            } else if record.status == schema.processed_status {
                processed += sum;
            }
        }

        let result = Self::from_counts(month, pending, processed);
        tracing::debug!(
            %month,
            types = ?application_types,
            bureaus = ?bureaus,
            pending = result.pending_count,
            processed = result.processed_count,
            estimate = %result.estimated_days,
            "backlog estimate computed"
        );
        result
    }

    /// Apply the rate projection to already-summed counts.
    pub fn from_counts(month: YearMonth, pending: f64, processed: f64) -> EstimateResult {
        let daily_rate = Self::daily_rate(processed);
        EstimateResult {
            month,
            pending_count: pending,
            processed_count: processed,
            daily_rate,
            estimated_days: Self::clearance_days(pending, daily_rate),
        }
    }

    /// Processed applications per day over a 30-day month.
    pub fn daily_rate(processed: f64) -> f64 {
        if processed > 0.0 {
            processed / DAYS_PER_MONTH
        } else {
            0.0
        }
    }

    /// `pending / daily_rate`, or `Undefined` when the rate is not positive.
    pub fn clearance_days(pending: f64, daily_rate: f64) -> ClearanceEstimate {
        if daily_rate > 0.0 {
            ClearanceEstimate::Days(pending / daily_rate)
        } else {
            ClearanceEstimate::Undefined
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

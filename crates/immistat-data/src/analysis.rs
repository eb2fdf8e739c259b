//! Dataset-level descriptions: distinct values, metadata and summaries.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use immistat_core::formatting::percentage;
use immistat_core::models::{
    CleanedTable, Dimension, DimensionValue, Selection, TidyRecord, YearMonth,
};
use immistat_core::schema::DatasetSchema;
use serde::Serialize;

// ── Public types ──────────────────────────────────────────────────────────────

/// Shape of a loaded dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetMetadata {
    /// Distinct months in calendar order.
    pub months: Vec<YearMonth>,
    pub first_month: Option<YearMonth>,
    /// The most recent month present; the default month for estimates.
    pub latest_month: Option<YearMonth>,
    pub row_count: usize,
    pub bureau_count: usize,
    pub application_type_count: usize,
    pub status_count: usize,
}

/// Total for one status label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusTotal {
    pub status: String,
    pub total: f64,
}

/// Headline figures for a selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub selection: Selection,
    /// Per-status totals, statuses in first-appearance order.
    pub by_status: Vec<StatusTotal>,
    /// Sum of every non-null count in the selection, all statuses included.
    pub grand_total: f64,
    pub months_covered: usize,
    /// `grand_total / months_covered`, or `0.0` when no month is covered.
    pub monthly_average: f64,
    pub processed: f64,
    pub granted: f64,
    pub denied: f64,
    /// `granted / processed` as a percentage to one decimal place; `0.0`
    /// when nothing was processed.
    pub approval_rate: f64,
}

// ── Public functions ──────────────────────────────────────────────────────────

/// Distinct values of `dimension`.
///
/// Months come out in calendar order and bureaus in source column order;
/// the other dimensions keep the order in which values first appear.
pub fn distinct_values(table: &CleanedTable, dimension: Dimension) -> Vec<DimensionValue> {
    match dimension {
        Dimension::Month => table
            .records()
            .iter()
            .map(|r| r.month)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(DimensionValue::Month)
            .collect(),
        Dimension::Bureau => table
            .bureaus()
            .iter()
            .cloned()
            .map(DimensionValue::Text)
            .collect(),
        Dimension::Category => first_appearance(table.records().iter().map(|r| &r.category)),
        Dimension::ApplicationType => {
            first_appearance(table.records().iter().map(|r| &r.application_type))
        }
        Dimension::Status => first_appearance(table.records().iter().map(|r| &r.status)),
    }
}

/// Describe `table`.
pub fn dataset_metadata(table: &CleanedTable) -> DatasetMetadata {
    let months: Vec<YearMonth> = distinct_values(table, Dimension::Month)
        .iter()
        .filter_map(DimensionValue::as_month)
        .collect();
    DatasetMetadata {
        first_month: months.first().copied(),
        latest_month: months.last().copied(),
        months,
        row_count: table.len(),
        bureau_count: table.bureaus().len(),
        application_type_count: distinct_values(table, Dimension::ApplicationType).len(),
        status_count: distinct_values(table, Dimension::Status).len(),
    }
}

/// Summarise the tidy records matching `selection`.
///
/// The processed, granted and denied figures are the totals of the status
/// labels `schema` names for them.
pub fn summarize(
    records: &[TidyRecord],
    selection: &Selection,
    schema: &DatasetSchema,
) -> Summary {
    let mut order: Vec<String> = Vec::new();
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    let mut months = BTreeSet::new();
    let mut grand_total = 0.0;

    for record in records.iter().filter(|r| selection.matches(r)) {
        months.insert(record.month);
        if !totals.contains_key(&record.status) {
            order.push(record.status.clone());
            totals.insert(record.status.clone(), 0.0);
        }
        if let Some(v) = record.count {
            grand_total += v;
            if let Some(t) = totals.get_mut(&record.status) {
                *t += v;
            }
        }
    }

    let status_total = |label: &str| totals.get(label).copied().unwrap_or_default();
    let processed = status_total(schema.processed_status.as_str());
    let granted = status_total(schema.granted_status.as_str());
    let denied = status_total(schema.denied_status.as_str());

    let by_status = order
        .into_iter()
        .map(|status| StatusTotal {
            total: totals.get(&status).copied().unwrap_or_default(),
            status,
        })
        .collect();
    let months_covered = months.len();
    let monthly_average = if months_covered > 0 {
        grand_total / months_covered as f64
    } else {
        0.0
    };

    Summary {
        selection: selection.clone(),
        by_status,
        grand_total,
        months_covered,
        monthly_average,
        processed,
        granted,
        denied,
        approval_rate: percentage(granted, processed, 1),
    }
}

fn first_appearance<'a>(values: impl Iterator<Item = &'a String>) -> Vec<DimensionValue> {
    let mut seen = HashSet::new();
    values
        .filter(|v| seen.insert(*v))
        .map(|v| DimensionValue::Text(v.clone()))
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

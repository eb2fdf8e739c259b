//! CSV loading and cleaning.
//!
//! Reads the wide statistics table, classifies every column once, coerces the
//! numeric (bureau) columns and parses the month axis, producing an immutable
//! [`CleanedTable`] plus a [`LoadReport`] describing what was absorbed.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use immistat_core::error::{Result, StatError};
use immistat_core::models::{
    CleanedRecord, CleanedTable, ColumnInfo, ColumnKind, Count, LoadReport, ParseWarning,
    PlaceholderPolicy, YearMonth,
};
use immistat_core::schema::DatasetSchema;
use tracing::{debug, info, warn};

const BOM: char = '\u{feff}';

// ── Public API ────────────────────────────────────────────────────────────────

/// A cleaned table together with its load diagnostics.
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub table: CleanedTable,
    pub report: LoadReport,
}

/// Load `path` with the default e-Stat schema.
pub fn load(path: &Path) -> Result<CleanedTable> {
    load_with_schema(path, &DatasetSchema::default()).map(|d| d.table)
}

/// Load `path` with an explicit schema.
pub fn load_with_schema(path: &Path, schema: &DatasetSchema) -> Result<LoadedDataset> {
    let file = std::fs::File::open(path).map_err(|source| StatError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let dataset = load_from_reader(file, schema).map_err(|e| match e {
        StatError::Csv(inner) if matches!(inner.kind(), csv::ErrorKind::Io(_)) => {
            match inner.into_kind() {
                csv::ErrorKind::Io(source) => StatError::FileRead {
                    path: path.to_path_buf(),
                    source,
                },
                other => StatError::Schema(format!("{:?}", other)),
            }
        }
        other => other,
    })?;

    info!(
        path = %path.display(),
        rows = dataset.report.rows_loaded,
        bureaus = dataset.table.bureaus().len(),
        parse_warnings = dataset.report.parse_warnings,
        unplaced_rows = dataset.report.unplaced_rows,
        "dataset loaded"
    );
    Ok(dataset)
}

/// Load a table from any reader.
pub fn load_from_reader<R: Read>(reader: R, schema: &DatasetSchema) -> Result<LoadedDataset> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = read_headers(&mut csv_reader)?;
    let layout = ColumnLayout::resolve(&headers, schema)?;

    let mut rows: Vec<csv::StringRecord> = Vec::new();
    for (i, result) in csv_reader.records().enumerate() {
        let row = result?;
        if row.len() > headers.len() {
            return Err(StatError::Schema(format!(
                "row {} has {} cells, header has {}",
                i + 1,
                row.len(),
                headers.len()
            )));
        }
        rows.push(row);
    }

    let kinds = classify_columns(&headers, &layout, &rows, schema);
    build_table(&headers, &layout, &kinds, &rows, schema)
}

// ── Cell coercion ─────────────────────────────────────────────────────────────

/// What a single count cell turned out to be.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellValue {
    Number(f64),
    Placeholder,
    Empty,
    Invalid,
}

impl CellValue {
    /// The cleaned count under `policy`.
    pub fn to_count(self, policy: PlaceholderPolicy) -> Count {
        match self {
            CellValue::Number(v) => Some(v),
            CellValue::Placeholder => match policy {
                PlaceholderPolicy::Zero => Some(0.0),
                PlaceholderPolicy::Null => None,
            },
            CellValue::Empty | CellValue::Invalid => None,
        }
    }
}

/// Classify and convert one raw cell.
///
/// Negative, NaN and infinite values are `Invalid`: counts are never negative.
pub fn coerce_cell(raw: &str, schema: &DatasetSchema) -> CellValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return CellValue::Empty;
    }
    if schema.is_placeholder(trimmed) {
        return CellValue::Placeholder;
    }
    match schema.strip_separators(trimmed).trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => CellValue::Number(v),
        _ => CellValue::Invalid,
    }
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Positions of the metadata columns in the header.
#[derive(Debug)]
struct ColumnLayout {
    category: usize,
    month: usize,
    application_type: usize,
    status: usize,
}

impl ColumnLayout {
    fn resolve(headers: &[String], schema: &DatasetSchema) -> Result<Self> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| StatError::MissingColumn {
                    column: name.to_string(),
                })
        };
        Ok(Self {
            category: find(&schema.category_column)?,
            month: find(&schema.month_column)?,
            application_type: find(&schema.application_type_column)?,
            status: find(&schema.status_column)?,
        })
    }

    fn is_metadata(&self, index: usize) -> bool {
        [self.category, self.month, self.application_type, self.status].contains(&index)
    }
}

fn read_headers<R: Read>(reader: &mut csv::Reader<R>) -> Result<Vec<String>> {
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, h)| {
            if i == 0 {
                h.trim_start_matches(BOM).trim().to_string()
            } else {
                h.trim().to_string()
            }
        })
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(StatError::Schema("the file has no header row".to_string()));
    }

    let mut seen = HashSet::new();
    for h in &headers {
        if !h.is_empty() && !seen.insert(h.as_str()) {
            return Err(StatError::Schema(format!("duplicate column '{}'", h)));
        }
    }
    Ok(headers)
}

fn cell<'a>(row: &'a csv::StringRecord, index: usize) -> &'a str {
    row.get(index).unwrap_or("")
}

/// Decide once per column whether it holds counts.
///
/// A column is numeric when numbers and placeholders are at least half of its
/// non-empty cells. A column with no non-empty cell at all is numeric too:
/// every count in it is simply null. The national-total column is never a
/// bureau.
fn classify_columns(
    headers: &[String],
    layout: &ColumnLayout,
    rows: &[csv::StringRecord],
    schema: &DatasetSchema,
) -> Vec<ColumnKind> {
    headers
        .iter()
        .enumerate()
        .map(|(i, name)| {
            if i == layout.month {
                return ColumnKind::Temporal;
            }
            if layout.is_metadata(i)
                || name.is_empty()
                || schema.is_ignored_column(name)
                || schema.is_total_column(name)
            {
                return ColumnKind::Categorical;
            }

            let mut non_empty = 0usize;
            let mut numeric = 0usize;
            for row in rows {
                match coerce_cell(cell(row, i), schema) {
                    CellValue::Empty => {}
                    CellValue::Invalid => non_empty += 1,
                    CellValue::Number(_) | CellValue::Placeholder => {
                        non_empty += 1;
                        numeric += 1;
                    }
                }
            }

            let kind = if numeric * 2 >= non_empty {
                ColumnKind::Numeric
            } else {
                ColumnKind::Categorical
            };
            debug!(column = %name, ?kind, numeric, non_empty, "column classified");
            kind
        })
        .collect()
}

fn build_table(
    headers: &[String],
    layout: &ColumnLayout,
    kinds: &[ColumnKind],
    rows: &[csv::StringRecord],
    schema: &DatasetSchema,
) -> Result<LoadedDataset> {
    let numeric_idx: Vec<usize> = (0..headers.len())
        .filter(|&i| kinds[i] == ColumnKind::Numeric)
        .collect();
    let extra_idx: Vec<usize> = (0..headers.len())
        .filter(|&i| {
            kinds[i] == ColumnKind::Categorical && !layout.is_metadata(i) && !headers[i].is_empty()
        })
        .collect();

    let mut report = LoadReport {
        rows_read: rows.len(),
        columns: headers
            .iter()
            .zip(kinds)
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, kind)| ColumnInfo {
                name: name.clone(),
                kind: *kind,
            })
            .collect(),
        ..LoadReport::default()
    };

    let bureaus: Vec<String> = numeric_idx.iter().map(|&i| headers[i].clone()).collect();
    let corrections = BranchCorrection::plan(&bureaus, schema);

    let mut records = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let line = i + 1;
        let month_label = cell(row, layout.month);
        // The one case where a bad cell costs its whole row: without a month
        // the row has no place on the calendar axis.
        let Some(month) = YearMonth::parse_label(month_label) else {
            warn!(
                row = line,
                label = %month_label,
                "month label not recognised; row dropped instead of nulled"
            );
            report.unplaced_rows += 1;
            continue;
        };

        let mut counts: Vec<Count> = numeric_idx
            .iter()
            .map(|&c| {
                let raw = cell(row, c);
                let value = coerce_cell(raw, schema);
                match value {
                    CellValue::Placeholder => report.placeholder_cells += 1,
                    CellValue::Invalid => {
                        debug!(row = line, column = %headers[c], raw, "cell is not a count; nulled");
                        report.record_warning(ParseWarning {
                            row: line,
                            column: headers[c].clone(),
                            raw: raw.to_string(),
                        });
                    }
                    CellValue::Number(_) | CellValue::Empty => {}
                }
                value.to_count(schema.placeholder_policy)
            })
            .collect();
        for correction in &corrections {
            if correction.apply(&mut counts) {
                report.corrected_cells += 1;
            }
        }

        records.push(CleanedRecord {
            category: cell(row, layout.category).to_string(),
            month,
            month_label: month_label.to_string(),
            application_type: cell(row, layout.application_type).to_string(),
            status: cell(row, layout.status).to_string(),
            counts,
            extras: extra_idx.iter().map(|&c| cell(row, c).to_string()).collect(),
        });
    }
    report.rows_loaded = records.len();

    let table = CleanedTable::new(
        bureaus,
        extra_idx.iter().map(|&i| headers[i].clone()).collect(),
        records,
    )?;
    Ok(LoadedDataset { table, report })
}

/// A regional bureau column and the branch columns it already includes.
#[derive(Debug)]
struct BranchCorrection {
    region: usize,
    branches: Vec<usize>,
}

impl BranchCorrection {
    /// Resolve the schema's region → branch map against the loaded bureau
    /// columns. Regions or branches absent from the file are skipped.
    fn plan(bureaus: &[String], schema: &DatasetSchema) -> Vec<Self> {
        let position = |name: &str| bureaus.iter().position(|b| b == name);
        schema
            .bureau_branches
            .iter()
            .filter_map(|(region, branches)| {
                let region_idx = position(region.as_str())?;
                let branches: Vec<usize> =
                    branches.iter().filter_map(|b| position(b.as_str())).collect();
                if branches.is_empty() {
                    return None;
                }
                debug!(region = %region, branches = branches.len(), "branch correction planned");
                Some(Self {
                    region: region_idx,
                    branches,
                })
            })
            .collect()
    }

    /// Subtract the non-null branch counts from the region's count.
    ///
    /// A null region stays null. Returns `true` when the region's count was
    /// changed.
    fn apply(&self, counts: &mut [Count]) -> bool {
        let Some(base) = counts[self.region] else {
            return false;
        };
        let subtotal: f64 = self.branches.iter().filter_map(|&b| counts[b]).sum();
        if subtotal == 0.0 {
            return false;
        }
        if subtotal > base {
            debug!(base, subtotal, "branch figures exceed their region; clamped to 0");
        }
        counts[self.region] = Some((base - subtotal).max(0.0));
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

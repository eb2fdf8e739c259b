use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, StatError};

// ── YearMonth ─────────────────────────────────────────────────────────────────

/// A calendar month. Ordering is calendar order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// Build a month, returning `None` when `month` is outside `1..=12`.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The first day of this month.
    pub fn first_day(&self) -> Option<chrono::NaiveDate> {
        chrono::NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    /// Parse a month-axis label.
    ///
    /// Accepts the e-Stat form `2024年1月` (optionally followed by `分`) as
    /// well as `2024-01`, `2024/1` and `2024.01`.
    pub fn parse_label(label: &str) -> Option<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| {
            Regex::new(r"^\s*(\d{4})\s*[年\-/.]\s*(\d{1,2})\s*(?:月分?)?\s*$")
                .expect("regex is valid")
        });
        let caps = re.captures(label)?;
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        Self::new(year, month)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = StatError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_label(s).ok_or_else(|| StatError::MonthParse(s.to_string()))
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ── MonthRange ────────────────────────────────────────────────────────────────

/// Inclusive month range; either end may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthRange {
    pub start: Option<YearMonth>,
    pub end: Option<YearMonth>,
}

impl MonthRange {
    pub fn new(start: Option<YearMonth>, end: Option<YearMonth>) -> Self {
        Self { start, end }
    }

    /// A range covering exactly one month.
    pub fn single(month: YearMonth) -> Self {
        Self::new(Some(month), Some(month))
    }

    pub fn contains(&self, month: YearMonth) -> bool {
        self.start.map_or(true, |s| month >= s) && self.end.map_or(true, |e| month <= e)
    }
}

// ── Counts and cells ──────────────────────────────────────────────────────────

/// A cleaned count: non-negative when present, `None` when the cell had no
/// usable number.
pub type Count = Option<f64>;

/// What the loader does with the placeholder sentinel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderPolicy {
    /// Treat suppressed cells as zero applications.
    #[default]
    Zero,
    /// Treat suppressed cells as missing data.
    Null,
}

/// How a source column is interpreted, decided once per load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Categorical,
    Temporal,
}

/// A source column and its classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: ColumnKind,
}

// ── Records ───────────────────────────────────────────────────────────────────

/// One source row after cleaning.
///
/// `counts` is aligned with [`CleanedTable::bureaus`] and `extras` with
/// [`CleanedTable::extra_columns`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedRecord {
    pub category: String,
    pub month: YearMonth,
    /// The month label exactly as it appeared in the file.
    pub month_label: String,
    pub application_type: String,
    pub status: String,
    pub counts: Vec<Count>,
    #[serde(default)]
    pub extras: Vec<String>,
}

impl CleanedRecord {
    /// Sum of the non-null counts in this row.
    pub fn total(&self) -> f64 {
        self.counts.iter().flatten().sum()
    }
}

/// One fact: a single bureau's count for one source row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TidyRecord {
    pub month: YearMonth,
    pub category: String,
    pub application_type: String,
    pub status: String,
    pub bureau: String,
    pub count: Count,
}

// ── CleanedTable ──────────────────────────────────────────────────────────────

/// The immutable result of a load.
///
/// Deserialising goes through [`CleanedTable::new`], so a misaligned table
/// is rejected instead of built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TableParts")]
pub struct CleanedTable {
    bureaus: Vec<String>,
    extra_columns: Vec<String>,
    records: Vec<CleanedRecord>,
}

#[derive(Deserialize)]
struct TableParts {
    bureaus: Vec<String>,
    extra_columns: Vec<String>,
    records: Vec<CleanedRecord>,
}

impl TryFrom<TableParts> for CleanedTable {
    type Error = StatError;

    fn try_from(parts: TableParts) -> Result<Self> {
        CleanedTable::new(parts.bureaus, parts.extra_columns, parts.records)
    }
}

impl CleanedTable {
    /// Assemble a table, checking every record is aligned with the columns.
    pub fn new(
        bureaus: Vec<String>,
        extra_columns: Vec<String>,
        records: Vec<CleanedRecord>,
    ) -> Result<Self> {
        for (i, rec) in records.iter().enumerate() {
            if rec.counts.len() != bureaus.len() {
                return Err(StatError::Schema(format!(
                    "record {} has {} counts for {} bureau columns",
                    i,
                    rec.counts.len(),
                    bureaus.len()
                )));
            }
            if rec.extras.len() != extra_columns.len() {
                return Err(StatError::Schema(format!(
                    "record {} has {} extra cells for {} extra columns",
                    i,
                    rec.extras.len(),
                    extra_columns.len()
                )));
            }
        }
        Ok(Self {
            bureaus,
            extra_columns,
            records,
        })
    }

    /// Numeric (bureau) column names in source order.
    pub fn bureaus(&self) -> &[String] {
        &self.bureaus
    }

    /// Categorical non-metadata column names in source order.
    pub fn extra_columns(&self) -> &[String] {
        &self.extra_columns
    }

    pub fn records(&self) -> &[CleanedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Position of a bureau column, if present.
    pub fn bureau_index(&self, name: &str) -> Option<usize> {
        self.bureaus.iter().position(|b| b == name)
    }

    /// The rows matching `selection`'s row predicates, restricted to the
    /// bureau columns its bureau predicate admits.
    pub fn select(&self, selection: &Selection) -> CleanedTable {
        let keep: Vec<usize> = (0..self.bureaus.len())
            .filter(|&i| selection.matches_bureau(&self.bureaus[i]))
            .collect();
        CleanedTable {
            bureaus: keep.iter().map(|&i| self.bureaus[i].clone()).collect(),
            extra_columns: self.extra_columns.clone(),
            records: self
                .records
                .iter()
                .filter(|r| selection.matches_row(r))
                .map(|r| CleanedRecord {
                    counts: keep.iter().map(|&i| r.counts[i]).collect(),
                    ..r.clone()
                })
                .collect(),
        }
    }

    /// Every `(bureau, count)` cell of the table, row by row.
    pub fn cells(&self) -> impl Iterator<Item = (&CleanedRecord, &str, Count)> + '_ {
        self.records.iter().flat_map(move |rec| {
            self.bureaus
                .iter()
                .zip(rec.counts.iter())
                .map(move |(b, c)| (rec, b.as_str(), *c))
        })
    }
}

// ── Load diagnostics ──────────────────────────────────────────────────────────

/// A cell that could not be converted to a number and was nulled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    /// 1-based data row (the header is row 0).
    pub row: usize,
    pub column: String,
    pub raw: String,
}

/// Only the first warnings are kept verbatim; the rest are counted.
pub const MAX_RECORDED_WARNINGS: usize = 50;

/// What happened during a load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub rows_read: usize,
    pub rows_loaded: usize,
    /// Rows dropped because their month label could not be parsed.
    pub unplaced_rows: usize,
    pub parse_warnings: usize,
    pub placeholder_cells: usize,
    /// Regional bureau cells that had branch figures subtracted.
    pub corrected_cells: usize,
    /// Every source column with the kind it was classified as.
    pub columns: Vec<ColumnInfo>,
    pub warnings: Vec<ParseWarning>,
}

impl LoadReport {
    /// Record a nulled cell.
    pub fn record_warning(&mut self, warning: ParseWarning) {
        self.parse_warnings += 1;
        if self.warnings.len() < MAX_RECORDED_WARNINGS {
            self.warnings.push(warning);
        }
    }

    pub fn numeric_columns(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns_of(ColumnKind::Numeric)
    }

    pub fn categorical_columns(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns_of(ColumnKind::Categorical)
    }

    fn columns_of(&self, kind: ColumnKind) -> impl Iterator<Item = &str> + '_ {
        self.columns
            .iter()
            .filter(move |c| c.kind == kind)
            .map(|c| c.name.as_str())
    }
}

// ── Dimensions ────────────────────────────────────────────────────────────────

/// A categorical axis of the tidy data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Category,
    Month,
    #[value(name = "type")]
    ApplicationType,
    Status,
    Bureau,
}

impl Dimension {
    /// The value a tidy record carries on this axis.
    pub fn value_of(&self, record: &TidyRecord) -> DimensionValue {
        match self {
            Dimension::Category => DimensionValue::Text(record.category.clone()),
            Dimension::Month => DimensionValue::Month(record.month),
            Dimension::ApplicationType => DimensionValue::Text(record.application_type.clone()),
            Dimension::Status => DimensionValue::Text(record.status.clone()),
            Dimension::Bureau => DimensionValue::Text(record.bureau.clone()),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::Category => "category",
            Dimension::Month => "month",
            Dimension::ApplicationType => "type",
            Dimension::Status => "status",
            Dimension::Bureau => "bureau",
        };
        f.write_str(name)
    }
}

/// A value on one [`Dimension`]. Months sort in calendar order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DimensionValue {
    Month(YearMonth),
    Text(String),
}

impl DimensionValue {
    pub fn as_month(&self) -> Option<YearMonth> {
        match self {
            DimensionValue::Month(m) => Some(*m),
            DimensionValue::Text(_) => None,
        }
    }
}

impl fmt::Display for DimensionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimensionValue::Month(m) => m.fmt(f),
            DimensionValue::Text(s) => f.write_str(s),
        }
    }
}

/// Grouping function applied by a pivot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Sum,
    Mean,
    Count,
    Min,
    Max,
}

// ── Selection ─────────────────────────────────────────────────────────────────

/// Filter selections supplied by the presentation layer.
///
/// Every predicate is optional: an empty list or absent range passes
/// everything. Values within one list are OR'ed, lists are AND'ed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default)]
    pub month_range: Option<MonthRange>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub bureaus: Vec<String>,
    #[serde(default)]
    pub statuses: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_month(mut self, month: YearMonth) -> Self {
        self.month_range = Some(MonthRange::single(month));
        self
    }

    pub fn with_month_range(mut self, range: MonthRange) -> Self {
        self.month_range = Some(range);
        self
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_bureaus<I, S>(mut self, bureaus: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bureaus = bureaus.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_statuses<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.statuses = statuses.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn matches_month(&self, month: YearMonth) -> bool {
        self.month_range.map_or(true, |r| r.contains(month))
    }

    pub fn matches_type(&self, application_type: &str) -> bool {
        passes(&self.types, application_type)
    }

    pub fn matches_bureau(&self, bureau: &str) -> bool {
        passes(&self.bureaus, bureau)
    }

    pub fn matches_status(&self, status: &str) -> bool {
        passes(&self.statuses, status)
    }

    pub fn matches_category(&self, category: &str) -> bool {
        passes(&self.categories, category)
    }

    /// Row-level predicates (everything except the bureau).
    pub fn matches_row(&self, record: &CleanedRecord) -> bool {
        self.matches_month(record.month)
            && self.matches_type(&record.application_type)
            && self.matches_status(&record.status)
            && self.matches_category(&record.category)
    }

    pub fn matches(&self, record: &TidyRecord) -> bool {
        self.matches_month(record.month)
            && self.matches_type(&record.application_type)
            && self.matches_status(&record.status)
            && self.matches_category(&record.category)
            && self.matches_bureau(&record.bureau)
    }
}

fn passes(allowed: &[String], value: &str) -> bool {
    allowed.is_empty() || allowed.iter().any(|a| a == value)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

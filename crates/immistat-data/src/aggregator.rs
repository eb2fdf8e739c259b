//! Reshaping and grouping of the cleaned table.
//!
//! [`TableAggregator::melt`] turns the wide table into tidy records,
//! [`TableAggregator::pivot`] groups them back into a two-axis grid, and the
//! [`Filterable`] trait narrows either representation by a [`Selection`].

use std::collections::{BTreeMap, BTreeSet};

use immistat_core::error::{Result, StatError};
use immistat_core::models::{
    Aggregation, CleanedTable, Count, Dimension, DimensionValue, MonthRange, Selection,
    TidyRecord,
};
use serde::Serialize;

// ── Accumulator ───────────────────────────────────────────────────────────────

/// Running statistics for one pivot cell.
#[derive(Debug, Clone, Copy, Default)]
struct CellAccumulator {
    sum: f64,
    non_null: usize,
    min: Option<f64>,
    max: Option<f64>,
}

impl CellAccumulator {
    fn add(&mut self, count: Count) {
        let Some(v) = count else { return };
        self.sum += v;
        self.non_null += 1;
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
        self.max = Some(self.max.map_or(v, |m| m.max(v)));
    }

    /// Groups holding only nulls stay null, except under `Count`.
    fn finish(&self, agg: Aggregation) -> Count {
        match agg {
            Aggregation::Count => Some(self.non_null as f64),
            _ if self.non_null == 0 => None,
            Aggregation::Sum => Some(self.sum),
            Aggregation::Mean => Some(self.sum / self.non_null as f64),
            Aggregation::Min => self.min,
            Aggregation::Max => self.max,
        }
    }
}

// ── PivotTable ────────────────────────────────────────────────────────────────

/// A two-axis grid of aggregated counts.
///
/// Row and column labels are sorted (months in calendar order, text
/// lexicographically). A combination with no source record is `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotTable {
    pub index_dimension: Dimension,
    pub column_dimension: Dimension,
    pub aggregation: Aggregation,
    rows: Vec<DimensionValue>,
    columns: Vec<DimensionValue>,
    cells: Vec<Vec<Count>>,
}

impl PivotTable {
    pub fn rows(&self) -> &[DimensionValue] {
        &self.rows
    }

    pub fn columns(&self) -> &[DimensionValue] {
        &self.columns
    }

    /// Cells in row-major order, aligned with [`rows`](Self::rows) and
    /// [`columns`](Self::columns).
    pub fn cells(&self) -> &[Vec<Count>] {
        &self.cells
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The cell at (`row`, `column`); `None` for unknown labels too.
    pub fn get(&self, row: &DimensionValue, column: &DimensionValue) -> Count {
        let r = self.rows.binary_search(row).ok()?;
        let c = self.columns.binary_search(column).ok()?;
        self.cells[r][c]
    }

    /// Sum of each row's non-null cells; `None` for an all-null row.
    pub fn row_totals(&self) -> Vec<Count> {
        self.cells.iter().map(|row| sum_counts(row.iter().copied())).collect()
    }

    /// Sum of each column's non-null cells; `None` for an all-null column.
    pub fn column_totals(&self) -> Vec<Count> {
        (0..self.columns.len())
            .map(|c| sum_counts(self.cells.iter().map(|row| row[c])))
            .collect()
    }

    pub fn grand_total(&self) -> f64 {
        self.cells.iter().flatten().flatten().sum()
    }

    /// Keep only rows whose month label falls in `range`.
    ///
    /// Has no effect unless the index dimension is [`Dimension::Month`].
    pub fn restrict_months(&self, range: MonthRange) -> PivotTable {
        if self.index_dimension != Dimension::Month {
            return self.clone();
        }
        let (rows, cells): (Vec<_>, Vec<_>) = self
            .rows
            .iter()
            .zip(&self.cells)
            .filter(|(label, _)| label.as_month().map_or(false, |m| range.contains(m)))
            .map(|(label, row)| (label.clone(), row.clone()))
            .unzip();
        PivotTable {
            rows,
            cells,
            ..self.clone()
        }
    }
}

fn sum_counts(counts: impl Iterator<Item = Count>) -> Count {
    counts.flatten().fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

// ── TableAggregator ───────────────────────────────────────────────────────────

/// Stateless reshaping helpers over [`CleanedTable`] and [`TidyRecord`]s.
pub struct TableAggregator;

impl TableAggregator {
    /// Unpivot the table to one record per (row, bureau) cell.
    ///
    /// `id_columns` names the columns to keep as identifiers; the four
    /// metadata columns are always identifiers, and a bureau column listed
    /// here is excluded from the output. Records come out in row order, then
    /// bureau (source column) order. Null counts are kept.
    pub fn melt(table: &CleanedTable, id_columns: &[&str]) -> Vec<TidyRecord> {
        let value_columns: Vec<usize> = table
            .bureaus()
            .iter()
            .enumerate()
            .filter(|(_, b)| !id_columns.contains(&b.as_str()))
            .map(|(i, _)| i)
            .collect();
        Self::melt_columns(table, &value_columns)
    }

    /// Group `records` by two dimensions and aggregate their counts.
    pub fn pivot_records<'a, I>(
        records: I,
        index: Dimension,
        columns: Dimension,
        agg: Aggregation,
    ) -> PivotTable
    where
        I: IntoIterator<Item = &'a TidyRecord>,
    {
        let mut groups: BTreeMap<(DimensionValue, DimensionValue), CellAccumulator> =
            BTreeMap::new();
        let mut row_labels = BTreeSet::new();
        let mut col_labels = BTreeSet::new();

        for record in records {
            let r = index.value_of(record);
            let c = columns.value_of(record);
            row_labels.insert(r.clone());
            col_labels.insert(c.clone());
            groups.entry((r, c)).or_default().add(record.count);
        }

        let rows: Vec<DimensionValue> = row_labels.into_iter().collect();
        let cols: Vec<DimensionValue> = col_labels.into_iter().collect();
        let cells = rows
            .iter()
            .map(|r| {
                cols.iter()
                    .map(|c| {
                        groups
                            .get(&(r.clone(), c.clone()))
                            .and_then(|acc| acc.finish(agg))
                    })
                    .collect()
            })
            .collect();

        PivotTable {
            index_dimension: index,
            column_dimension: columns,
            aggregation: agg,
            rows,
            columns: cols,
            cells,
        }
    }

    /// Pivot a single bureau column of the table.
    ///
    /// Fails with [`StatError::MissingColumn`] when `value_column` is not a
    /// bureau column.
    pub fn pivot(
        table: &CleanedTable,
        value_column: &str,
        index: Dimension,
        columns: Dimension,
        agg: Aggregation,
    ) -> Result<PivotTable> {
        let col = table
            .bureau_index(value_column)
            .ok_or_else(|| StatError::MissingColumn {
                column: value_column.to_string(),
            })?;
        let records = Self::melt_columns(table, &[col]);
        Ok(Self::pivot_records(&records, index, columns, agg))
    }

    fn melt_columns(table: &CleanedTable, value_columns: &[usize]) -> Vec<TidyRecord> {
        let bureaus = table.bureaus();
        let mut out = Vec::with_capacity(table.len() * value_columns.len());
        for record in table.records() {
            for &i in value_columns {
                out.push(TidyRecord {
                    month: record.month,
                    category: record.category.clone(),
                    application_type: record.application_type.clone(),
                    status: record.status.clone(),
                    bureau: bureaus[i].clone(),
                    count: record.counts[i],
                });
            }
        }
        out
    }
}

// ── Filtering ─────────────────────────────────────────────────────────────────

/// Narrow a dataset representation to a [`Selection`].
pub trait Filterable {
    fn filtered(&self, selection: &Selection) -> Self;
}

impl Filterable for Vec<TidyRecord> {
    fn filtered(&self, selection: &Selection) -> Self {
        self.iter()
            .filter(|r| selection.matches(r))
            .cloned()
            .collect()
    }
}

impl Filterable for CleanedTable {
    fn filtered(&self, selection: &Selection) -> Self {
        self.select(selection)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use immistat_core::models::{CleanedRecord, YearMonth};
    use proptest::prelude::*;

    fn ym(y: i32, m: u32) -> YearMonth {
        YearMonth::new(y, m).unwrap()
    }

    fn row(month: YearMonth, ty: &str, status: &str, counts: Vec<Count>) -> CleanedRecord {
        CleanedRecord {
            category: "在留資格審査".into(),
            month,
            month_label: format!("{}年{}月", month.year(), month.month()),
            application_type: ty.into(),
            status: status.into(),
            counts,
            extras: vec![],
        }
    }

    fn text(s: &str) -> DimensionValue {
        DimensionValue::Text(s.to_string())
    }

    fn sample_table() -> CleanedTable {
        CleanedTable::new(
            vec!["札幌".into(), "東京".into(), "大阪".into()],
            vec![],
            vec![
                row(ym(2024, 2), "更新", "未済", vec![Some(1.0), Some(10.0), None]),
                row(ym(2024, 2), "更新", "既済_総数", vec![Some(2.0), Some(20.0), Some(200.0)]),
                row(ym(2024, 1), "更新", "未済", vec![Some(3.0), None, Some(300.0)]),
                row(ym(2024, 1), "変更", "未済", vec![Some(4.0), Some(40.0), None]),
            ],
        )
        .unwrap()
    }

    // ── melt ──────────────────────────────────────────────────────────────────

    #[test]
    fn test_melt_row_then_bureau_order() {
        let table = sample_table();
        let tidy = TableAggregator::melt(&table, &[]);

        assert_eq!(tidy.len(), 12);
        let first: Vec<&str> = tidy[..3].iter().map(|r| r.bureau.as_str()).collect();
        assert_eq!(first, vec!["札幌", "東京", "大阪"]);
        assert_eq!(tidy[2].count, None, "null counts are kept");
        assert_eq!(tidy[3].status, "既済_総数");
        assert_eq!(tidy[11].month, ym(2024, 1));
    }

    #[test]
    fn test_melt_excludes_bureaus_listed_as_ids() {
        let table = sample_table();
        let tidy = TableAggregator::melt(&table, &["大阪", "時間軸（月次）"]);
        assert_eq!(tidy.len(), 8);
        assert!(tidy.iter().all(|r| r.bureau != "大阪"));
    }

    #[test]
    fn test_melt_empty_table() {
        assert!(TableAggregator::melt(&CleanedTable::default(), &[]).is_empty());
    }

    // ── pivot ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_pivot_month_by_status_sum() {
        let table = sample_table();
        let tidy = TableAggregator::melt(&table, &[]);
        let p = TableAggregator::pivot_records(
            &tidy,
            Dimension::Month,
            Dimension::Status,
            Aggregation::Sum,
        );

        assert_eq!(
            p.rows(),
            &[DimensionValue::Month(ym(2024, 1)), DimensionValue::Month(ym(2024, 2))]
        );
        assert_eq!(p.columns(), &[text("既済_総数"), text("未済")]);

        let jan = DimensionValue::Month(ym(2024, 1));
        let feb = DimensionValue::Month(ym(2024, 2));
        assert_eq!(p.get(&jan, &text("未済")), Some(347.0));
        assert_eq!(p.get(&feb, &text("未済")), Some(11.0));
        assert_eq!(p.get(&feb, &text("既済_総数")), Some(222.0));
        assert_eq!(p.get(&jan, &text("既済_総数")), None, "no source record");
        assert_eq!(p.get(&jan, &text("受理")), None);
    }

    #[test]
    fn test_pivot_all_null_group_is_null_except_count() {
        let table = CleanedTable::new(
            vec!["札幌".into()],
            vec![],
            vec![
                row(ym(2024, 1), "更新", "未済", vec![None]),
                row(ym(2024, 1), "更新", "未済", vec![None]),
            ],
        )
        .unwrap();
        let tidy = TableAggregator::melt(&table, &[]);
        let jan = DimensionValue::Month(ym(2024, 1));

        for agg in [Aggregation::Sum, Aggregation::Mean, Aggregation::Min, Aggregation::Max] {
            let p = TableAggregator::pivot_records(&tidy, Dimension::Month, Dimension::Status, agg);
            assert_eq!(p.get(&jan, &text("未済")), None, "{agg:?}");
        }
        let p = TableAggregator::pivot_records(
            &tidy,
            Dimension::Month,
            Dimension::Status,
            Aggregation::Count,
        );
        assert_eq!(p.get(&jan, &text("未済")), Some(0.0));
    }

    #[test]
    fn test_pivot_other_aggregations() {
        let table = sample_table();
        let tidy = TableAggregator::melt(&table, &[]);
        let pivot = |agg| {
            TableAggregator::pivot_records(&tidy, Dimension::ApplicationType, Dimension::Status, agg)
        };
        let key = (text("更新"), text("未済"));

        // 更新/未済 cells: 1, 10, null, 3, null, 300
        assert_eq!(pivot(Aggregation::Count).get(&key.0, &key.1), Some(4.0));
        assert_eq!(pivot(Aggregation::Mean).get(&key.0, &key.1), Some(78.5));
        assert_eq!(pivot(Aggregation::Min).get(&key.0, &key.1), Some(1.0));
        assert_eq!(pivot(Aggregation::Max).get(&key.0, &key.1), Some(300.0));
    }

    #[test]
    fn test_pivot_single_value_column() {
        let table = sample_table();
        let p = TableAggregator::pivot(
            &table,
            "東京",
            Dimension::Month,
            Dimension::Status,
            Aggregation::Sum,
        )
        .unwrap();
        let jan = DimensionValue::Month(ym(2024, 1));
        assert_eq!(p.get(&jan, &text("未済")), Some(40.0));
        assert_eq!(p.grand_total(), 70.0);
    }

    #[test]
    fn test_pivot_unknown_value_column() {
        let err = TableAggregator::pivot(
            &sample_table(),
            "名古屋",
            Dimension::Month,
            Dimension::Status,
            Aggregation::Sum,
        )
        .unwrap_err();
        assert!(matches!(err, StatError::MissingColumn { column } if column == "名古屋"));
    }

    #[test]
    fn test_pivot_totals_and_month_restriction() {
        let tidy = TableAggregator::melt(&sample_table(), &[]);
        let p = TableAggregator::pivot_records(
            &tidy,
            Dimension::Month,
            Dimension::Status,
            Aggregation::Sum,
        );
        assert_eq!(p.row_totals(), vec![Some(347.0), Some(233.0)]);
        assert_eq!(p.column_totals(), vec![Some(222.0), Some(358.0)]);
        assert_eq!(p.grand_total(), 580.0);

        let feb_only = p.restrict_months(MonthRange::single(ym(2024, 2)));
        assert_eq!(feb_only.rows(), &[DimensionValue::Month(ym(2024, 2))]);
        assert_eq!(feb_only.grand_total(), 233.0);
        assert_eq!(feb_only.columns(), p.columns());
    }

    // ── filter ────────────────────────────────────────────────────────────────

    #[test]
    fn test_filter_tidy_records() {
        let tidy = TableAggregator::melt(&sample_table(), &[]);
        let sel = Selection::new().with_month(ym(2024, 1)).with_bureaus(["東京"]);
        let out = tidy.filtered(&sel);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.bureau == "東京" && r.month == ym(2024, 1)));
    }

    #[test]
    fn test_filter_unknown_bureau_is_empty() {
        let tidy = TableAggregator::melt(&sample_table(), &[]);
        let out = tidy.filtered(&Selection::new().with_bureaus(["名古屋"]));
        assert!(out.is_empty());
    }

    #[test]
    fn test_filter_empty_selection_is_identity() {
        let tidy = TableAggregator::melt(&sample_table(), &[]);
        assert_eq!(tidy.filtered(&Selection::new()), tidy);
    }

    #[test]
    fn test_filter_table_narrows_bureau_columns() {
        let table = sample_table();
        let sel = Selection::new().with_types(["更新"]).with_bureaus(["大阪", "札幌"]);
        let out = table.filtered(&sel);

        assert_eq!(out.bureaus(), &["札幌", "大阪"]);
        assert_eq!(out.len(), 3);
        assert_eq!(out.records()[0].counts, vec![Some(1.0), None]);
        assert_eq!(out.records()[2].counts, vec![Some(3.0), Some(300.0)]);
    }

    // ── Properties ────────────────────────────────────────────────────────────

    fn arb_table() -> impl Strategy<Value = CleanedTable> {
        let count = prop_oneof![Just(None), (0u32..1000).prop_map(|n| Some(n as f64))];
        let record = (1u32..=12, 0usize..3, proptest::collection::vec(count, 3)).prop_map(
            |(m, s, counts)| row(ym(2024, m), "更新", ["未済", "既済_総数", "受理"][s], counts),
        );
        proptest::collection::vec(record, 0..30).prop_map(|records| {
            CleanedTable::new(vec!["札幌".into(), "東京".into(), "大阪".into()], vec![], records)
                .unwrap()
        })
    }

    proptest! {
        #[test]
        fn prop_melt_then_pivot_reproduces_bureau_totals(table in arb_table()) {
            let tidy = TableAggregator::melt(&table, &[]);
            prop_assert_eq!(tidy.len(), table.len() * table.bureaus().len());

            let p = TableAggregator::pivot_records(
                &tidy,
                Dimension::Bureau,
                Dimension::Month,
                Aggregation::Sum,
            );
            for (i, bureau) in table.bureaus().iter().enumerate() {
                let expected: f64 = table.records().iter().filter_map(|r| r.counts[i]).sum();
                let got = p
                    .rows()
                    .iter()
                    .position(|r| *r == DimensionValue::Text(bureau.clone()))
                    .and_then(|pos| p.row_totals()[pos])
                    .unwrap_or(0.0);
                prop_assert!((expected - got).abs() < 1e-6);
            }
        }
    }
}

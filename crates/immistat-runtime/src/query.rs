//! Read-only query façade over the snapshot store.
//!
//! Every query is a pure function of one [`Snapshot`]. [`QueryService`]
//! answers against whatever snapshot is current; callers that need several
//! answers from one consistent version pin a snapshot and query it directly.

use std::path::Path;
use std::sync::Arc;

use immistat_core::error::Result;
use immistat_core::estimator::{BacklogEstimator, EstimateResult};
use immistat_core::models::{
    Aggregation, Dimension, DimensionValue, LoadReport, Selection, TidyRecord, YearMonth,
};
use immistat_core::schema::DatasetSchema;
use immistat_data::aggregator::{Filterable, PivotTable, TableAggregator};
use immistat_data::analysis::{distinct_values, summarize, DatasetMetadata, Summary};

use crate::store::{DatasetStore, Snapshot};

// ── Snapshot queries ──────────────────────────────────────────────────────────

impl Snapshot {
    /// Distinct values for a selection control.
    pub fn list_values(&self, dimension: Dimension) -> Vec<DimensionValue> {
        distinct_values(&self.table, dimension)
    }

    /// Tidy records matching `selection`, in melt order.
    pub fn filtered_view(&self, selection: &Selection) -> Vec<TidyRecord> {
        self.tidy.filtered(selection)
    }

    /// Month × status sums over the selected bureaus.
    pub fn pivoted_view(&self, selection: &Selection) -> PivotTable {
        self.pivot_by(selection, Dimension::Month, Dimension::Status, Aggregation::Sum)
    }

    /// A pivot over any two dimensions of the selection.
    pub fn pivot_by(
        &self,
        selection: &Selection,
        index: Dimension,
        columns: Dimension,
        agg: Aggregation,
    ) -> PivotTable {
        let records = self.tidy.iter().filter(|r| selection.matches(r));
        TableAggregator::pivot_records(records, index, columns, agg)
    }

    /// Backlog estimate for `month`; empty lists mean "all".
    pub fn estimate(
        &self,
        month: YearMonth,
        application_types: &[String],
        bureaus: &[String],
    ) -> EstimateResult {
        BacklogEstimator::estimate(&self.table, &self.schema, month, application_types, bureaus)
    }

    pub fn summary(&self, selection: &Selection) -> Summary {
        summarize(&self.tidy, selection, &self.schema)
    }
}

// ── QueryService ──────────────────────────────────────────────────────────────

/// Entry point for the presentation layer.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<DatasetStore>,
}

impl QueryService {
    pub fn new(store: Arc<DatasetStore>) -> Self {
        Self { store }
    }

    /// Load `path` and serve queries over it.
    pub fn open(path: impl AsRef<Path>, schema: DatasetSchema) -> Result<Self> {
        Ok(Self::new(Arc::new(DatasetStore::open(path, schema)?)))
    }

    pub fn store(&self) -> &Arc<DatasetStore> {
        &self.store
    }

    /// Pin the current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.snapshot()
    }

    /// See [`DatasetStore::reload`].
    pub fn reload(&self) -> Result<Arc<Snapshot>> {
        self.store.reload()
    }

    pub fn list_values(&self, dimension: Dimension) -> Vec<DimensionValue> {
        self.snapshot().list_values(dimension)
    }

    pub fn filtered_view(&self, selection: &Selection) -> Vec<TidyRecord> {
        self.snapshot().filtered_view(selection)
    }

    pub fn pivoted_view(&self, selection: &Selection) -> PivotTable {
        self.snapshot().pivoted_view(selection)
    }

    pub fn pivot_by(
        &self,
        selection: &Selection,
        index: Dimension,
        columns: Dimension,
        agg: Aggregation,
    ) -> PivotTable {
        self.snapshot().pivot_by(selection, index, columns, agg)
    }

    pub fn estimate(
        &self,
        month: YearMonth,
        application_types: &[String],
        bureaus: &[String],
    ) -> EstimateResult {
        self.snapshot().estimate(month, application_types, bureaus)
    }

    pub fn metadata(&self) -> DatasetMetadata {
        self.snapshot().metadata.clone()
    }

    pub fn summary(&self, selection: &Selection) -> Summary {
        self.snapshot().summary(selection)
    }

    pub fn load_report(&self) -> LoadReport {
        self.snapshot().report.clone()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use immistat_core::estimator::ClearanceEstimate;
    use immistat_data::reader::load_from_reader;

    const CSV: &str = "\
表章項目,時間軸（月次）,在留資格審査,在留資格審査の受理・処理,札幌,東京,大阪
在留資格審査,2024年2月,在留期間更新,未済,10,60,40
在留資格審査,2024年2月,在留期間更新,既済_総数,30,200,100
在留資格審査,2024年1月,在留資格変更,未済,***,30,20
在留資格審査,2024年1月,在留資格変更,既済_総数,5,90,n/a
在留資格審査,2023年12月,在留期間更新,受理_新受,1,2,3
";

    fn service() -> QueryService {
        let schema = DatasetSchema::default();
        let dataset = load_from_reader(CSV.as_bytes(), &schema).unwrap();
        QueryService::new(Arc::new(DatasetStore::from_dataset(dataset, schema)))
    }

    fn ym(y: i32, m: u32) -> YearMonth {
        YearMonth::new(y, m).unwrap()
    }

    fn texts(values: &[DimensionValue]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_list_values_orders() {
        let q = service();
        assert_eq!(
            texts(&q.list_values(Dimension::Month)),
            vec!["2023-12", "2024-01", "2024-02"]
        );
        assert_eq!(texts(&q.list_values(Dimension::Bureau)), vec!["札幌", "東京", "大阪"]);
        assert_eq!(
            texts(&q.list_values(Dimension::ApplicationType)),
            vec!["在留期間更新", "在留資格変更"]
        );
        assert_eq!(
            texts(&q.list_values(Dimension::Status)),
            vec!["未済", "既済_総数", "受理_新受"]
        );
    }

    #[test]
    fn test_filtered_view() {
        let q = service();
        let sel = Selection::new().with_month(ym(2024, 1)).with_bureaus(["大阪"]);
        let view = q.filtered_view(&sel);
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].count, Some(20.0));
        assert_eq!(view[1].count, None, "unparsable cell is null");
    }

    #[test]
    fn test_filtered_view_unknown_bureau_is_empty() {
        let q = service();
        assert!(q
            .filtered_view(&Selection::new().with_bureaus(["名古屋"]))
            .is_empty());
    }

    #[test]
    fn test_pivoted_view_month_by_status() {
        let q = service();
        let p = q.pivoted_view(&Selection::new().with_types(["在留期間更新"]));
        let feb = DimensionValue::Month(ym(2024, 2));
        let pending = DimensionValue::Text("未済".into());
        let done = DimensionValue::Text("既済_総数".into());

        assert_eq!(p.index_dimension, Dimension::Month);
        assert_eq!(p.column_dimension, Dimension::Status);
        assert_eq!(p.get(&feb, &pending), Some(110.0));
        assert_eq!(p.get(&feb, &done), Some(330.0));
        assert_eq!(
            p.rows(),
            &[DimensionValue::Month(ym(2023, 12)), feb.clone()]
        );
    }

    #[test]
    fn test_estimate_through_facade() {
        let q = service();
        let r = q.estimate(ym(2024, 2), &["在留期間更新".into()], &[]);
        assert_eq!(r.pending_count, 110.0);
        assert_eq!(r.processed_count, 330.0);
        assert_eq!(r.daily_rate, 11.0);
        assert_eq!(r.estimated_days, ClearanceEstimate::Days(10.0));
    }

    #[test]
    fn test_estimate_placeholder_counts_as_zero() {
        let q = service();
        let r = q.estimate(ym(2024, 1), &[], &["札幌".into()]);
        assert_eq!(r.pending_count, 0.0);
        assert_eq!(r.processed_count, 5.0);
        assert_eq!(r.estimated_days, ClearanceEstimate::Days(0.0));
    }

    #[test]
    fn test_metadata_and_report() {
        let q = service();
        let meta = q.metadata();
        assert_eq!(meta.latest_month, Some(ym(2024, 2)));
        assert_eq!(meta.first_month, Some(ym(2023, 12)));
        assert_eq!(meta.bureau_count, 3);

        let report = q.load_report();
        assert_eq!(report.placeholder_cells, 1);
        assert_eq!(report.parse_warnings, 1);
    }

    #[test]
    fn test_summary() {
        let q = service();
        let s = q.summary(&Selection::new().with_month(ym(2023, 12)));
        assert_eq!(s.grand_total, 6.0);
        assert_eq!(s.months_covered, 1);
        assert_eq!(s.by_status.len(), 1);
        assert_eq!(s.by_status[0].status, "受理_新受");
    }

    #[test]
    fn test_national_total_is_not_added_to_bureau_sums() {
        let csv = "\
表章項目,時間軸（月次）,在留資格審査,在留資格審査の受理・処理,総数,札幌出入国在留管理局管内,東京出入国在留管理局管内
在留資格審査,2024年1月,在留期間更新,未済,100,40,60
在留資格審査,2024年1月,在留期間更新,既済_総数,300,100,200
";
        let schema = DatasetSchema::default();
        let dataset = load_from_reader(csv.as_bytes(), &schema).unwrap();
        let q = QueryService::new(Arc::new(DatasetStore::from_dataset(dataset, schema)));

        assert_eq!(q.list_values(Dimension::Bureau).len(), 2);

        let r = q.estimate(ym(2024, 1), &[], &[]);
        assert_eq!(r.pending_count, 100.0);
        assert_eq!(r.processed_count, 300.0);

        assert_eq!(q.pivoted_view(&Selection::new()).grand_total(), 400.0);
        assert_eq!(q.summary(&Selection::new()).grand_total, 400.0);
    }

    #[test]
    fn test_summary_approval_rate_uses_schema_labels() {
        let csv = "\
表章項目,時間軸（月次）,在留資格審査,在留資格審査の受理・処理,札幌,東京
在留資格審査,2024年1月,在留期間更新,既済_総数,20,80
在留資格審査,2024年1月,在留期間更新,既済_許可,15,60
在留資格審査,2024年1月,在留期間更新,既済_不許可,5,10
";
        let schema = DatasetSchema::default();
        let dataset = load_from_reader(csv.as_bytes(), &schema).unwrap();
        let q = QueryService::new(Arc::new(DatasetStore::from_dataset(dataset, schema)));

        let s = q.summary(&Selection::new());
        assert_eq!(s.processed, 100.0);
        assert_eq!(s.granted, 75.0);
        assert_eq!(s.denied, 15.0);
        assert_eq!(s.approval_rate, 75.0);
    }

    #[test]
    fn test_pinned_snapshot_answers_consistently() {
        let q = service();
        let snap = q.snapshot();
        let sel = Selection::new();
        assert_eq!(snap.filtered_view(&sel).len(), 15);
        assert_eq!(snap.pivoted_view(&sel).grand_total(), q.summary(&sel).grand_total);
    }

    #[test]
    fn test_concurrent_readers() {
        let q = service();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let q = q.clone();
                std::thread::spawn(move || q.pivoted_view(&Selection::new()).grand_total())
            })
            .collect();
        let totals: Vec<f64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(totals.windows(2).all(|w| w[0] == w[1]));
    }
}

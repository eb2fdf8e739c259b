use chrono::NaiveDate;
use immistat_core::estimator::EstimateResult;
use immistat_core::formatting::{format_clearance, format_count, format_number};
use immistat_core::models::{Dimension, DimensionValue, LoadReport, TidyRecord, YearMonth};
use immistat_data::aggregator::PivotTable;
use immistat_data::analysis::{DatasetMetadata, Summary};
use immistat_runtime::watcher::ReloadEvent;
use serde::Serialize;
use unicode_width::UnicodeWidthStr;

// ── Text tables ────────────────────────────────────────────────────────────────

/// A plain-text grid aligned by display width, so CJK labels line up.
struct TextTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    /// Columns from this index on are right-aligned.
    numeric_from: usize,
}

impl TextTable {
    fn new(header: Vec<String>, numeric_from: usize) -> Self {
        Self {
            header,
            rows: Vec::new(),
            numeric_from,
        }
    }

    fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn render(&self) -> String {
        let mut widths: Vec<usize> = self.header.iter().map(|h| h.width()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.width());
                }
            }
        }

        let line = |cells: &[String]| -> String {
            cells
                .iter()
                .zip(&widths)
                .enumerate()
                .map(|(i, (cell, &w))| pad(cell, w, i >= self.numeric_from))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };

        let total_width = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
        let mut out = line(&self.header);
        out.push('\n');
        out.push_str(&"─".repeat(total_width));
        for row in &self.rows {
            out.push('\n');
            out.push_str(&line(row));
        }
        out
    }
}

fn pad(cell: &str, width: usize, right: bool) -> String {
    let fill = " ".repeat(width.saturating_sub(cell.width()));
    if right {
        format!("{}{}", fill, cell)
    } else {
        format!("{}{}", cell, fill)
    }
}

fn list_or_all(values: &[String]) -> String {
    if values.is_empty() {
        "all".to_string()
    } else {
        values.join(", ")
    }
}

// ── Views ──────────────────────────────────────────────────────────────────────

pub fn values(dimension: Dimension, values: &[DimensionValue]) -> String {
    let mut table = TextTable::new(vec![dimension.to_string()], usize::MAX);
    for v in values {
        table.push(vec![v.to_string()]);
    }
    table.render()
}

pub fn tidy(records: &[TidyRecord]) -> String {
    let header = ["month", "category", "type", "status", "bureau", "count"];
    let mut table = TextTable::new(header.iter().map(|h| h.to_string()).collect(), 5);
    for r in records {
        table.push(vec![
            r.month.to_string(),
            r.category.clone(),
            r.application_type.clone(),
            r.status.clone(),
            r.bureau.clone(),
            format_count(r.count),
        ]);
    }
    table.render()
}

/// The pivot grid with a total column and a totals row.
pub fn pivot(pivot: &PivotTable) -> String {
    let mut header = vec![pivot.index_dimension.to_string()];
    header.extend(pivot.columns().iter().map(ToString::to_string));
    header.push("total".to_string());

    let mut table = TextTable::new(header, 1);
    for ((label, cells), total) in pivot
        .rows()
        .iter()
        .zip(pivot.cells())
        .zip(pivot.row_totals())
    {
        let mut row = vec![label.to_string()];
        row.extend(cells.iter().map(|c| format_count(*c)));
        row.push(format_count(total));
        table.push(row);
    }

    let mut totals = vec!["total".to_string()];
    totals.extend(pivot.column_totals().into_iter().map(format_count));
    totals.push(format_count(Some(pivot.grand_total())));
    table.push(totals);

    table.render()
}

pub fn estimate(
    result: &EstimateResult,
    types: &[String],
    bureaus: &[String],
    today: NaiveDate,
) -> String {
    let mut lines = vec![
        format!("month:            {}", result.month),
        format!("application type: {}", list_or_all(types)),
        format!("bureau:           {}", list_or_all(bureaus)),
        format!("pending:          {}", format_number(result.pending_count, 0)),
        format!("processed:        {}", format_number(result.processed_count, 0)),
        format!("daily rate:       {}", format_number(result.daily_rate, 2)),
        format!("clearance:        {}", format_clearance(&result.estimated_days)),
    ];
    if let Some(date) = result.projected_completion(today) {
        lines.push(format!("cleared by:       {} (from {})", date, today));
    }
    lines.join("\n")
}

pub fn summary(summary: &Summary) -> String {
    let mut table = TextTable::new(vec!["status".to_string(), "total".to_string()], 1);
    for s in &summary.by_status {
        table.push(vec![s.status.clone(), format_number(s.total, 0)]);
    }
    let lines = [
        table.render(),
        String::new(),
        format!("grand total:     {}", format_number(summary.grand_total, 0)),
        format!("months covered:  {}", summary.months_covered),
        format!("monthly average: {}", format_number(summary.monthly_average, 2)),
        format!("processed:       {}", format_number(summary.processed, 0)),
        format!("granted:         {}", format_number(summary.granted, 0)),
        format!("denied:          {}", format_number(summary.denied, 0)),
        format!("approval rate:   {}%", format_number(summary.approval_rate, 1)),
    ];
    lines.join("\n")
}

pub fn metadata(meta: &DatasetMetadata, report: &LoadReport) -> String {
    let month_or_dash =
        |m: Option<YearMonth>| m.map_or_else(|| "-".to_string(), |m| m.to_string());
    let mut lines = vec![
        format!("rows:              {}", meta.row_count),
        format!("bureaus:           {}", meta.bureau_count),
        format!("application types: {}", meta.application_type_count),
        format!("statuses:          {}", meta.status_count),
        format!("months:            {}", meta.months.len()),
        format!("first month:       {}", month_or_dash(meta.first_month)),
        format!("latest month:      {}", month_or_dash(meta.latest_month)),
        format!("unplaced rows:     {}", report.unplaced_rows),
        format!("placeholder cells: {}", report.placeholder_cells),
        format!("corrected cells:   {}", report.corrected_cells),
        format!("nulled cells:      {}", report.parse_warnings),
    ];
    for w in &report.warnings {
        lines.push(format!("  row {} [{}]: {:?}", w.row, w.column, w.raw));
    }
    let extra = report.parse_warnings.saturating_sub(report.warnings.len());
    if extra > 0 {
        lines.push(format!("  … and {} more", extra));
    }
    lines.join("\n")
}

pub fn reload_event(event: &ReloadEvent) -> String {
    match event {
        ReloadEvent::Reloaded { generation, rows } => {
            format!("reloaded: generation {}, {} rows", generation, rows)
        }
        ReloadEvent::Failed { error } => format!("reload failed, keeping previous data: {}", error),
    }
}

pub fn json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

// ── Tests ──────────────────────────────────────────────────────────────────────

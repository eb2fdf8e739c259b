mod bootstrap;
mod render;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use immistat_core::models::{Dimension, Selection};
use immistat_core::settings::Settings;
use immistat_runtime::query::QueryService;
use immistat_runtime::watcher::{ReloadEvent, ReloadWatcher};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load_with_last_used();

    bootstrap::ensure_directories()?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_ref())?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        view = %settings.view,
        format = %settings.format,
        "immistat starting"
    );

    let path = settings.resolve_data_file()?;
    let schema = settings.resolve_schema()?;
    let selection = settings.selection()?;
    let json = settings.format == "json";

    let service = QueryService::open(&path, schema)?;
    let report = service.load_report();
    if report.parse_warnings > 0 || report.unplaced_rows > 0 {
        tracing::warn!(
            nulled_cells = report.parse_warnings,
            unplaced_rows = report.unplaced_rows,
            "some cells or rows could not be used; see the metadata view"
        );
    }

    match settings.view.as_str() {
        "values" => {
            let values = service.list_values(settings.dimension);
            let out = if json {
                render::json(&values)?
            } else {
                render::values(settings.dimension, &values)
            };
            println!("{}", out);
        }

        "tidy" => {
            let records = service.filtered_view(&selection);
            let out = if json {
                render::json(&records)?
            } else {
                render::tidy(&records)
            };
            println!("{}", out);
        }

        "pivot" => {
            println!("{}", pivot_output(&service, &settings, &selection, json)?);
        }

        "estimate" => {
            let month = match settings.month()? {
                Some(m) => m,
                None => service
                    .metadata()
                    .latest_month
                    .ok_or_else(|| anyhow!("the dataset has no months to estimate"))?,
            };
            let result = service.estimate(month, &settings.types, &settings.bureaus);
            let out = if json {
                render::json(&result)?
            } else {
                let today = chrono::Local::now().date_naive();
                render::estimate(&result, &settings.types, &settings.bureaus, today)
            };
            println!("{}", out);
        }

        "summary" => {
            let summary = service.summary(&selection);
            let out = if json {
                render::json(&summary)?
            } else {
                render::summary(&summary)
            };
            println!("{}", out);
        }

        "metadata" => {
            let meta = service.metadata();
            let out = if json {
                render::json(&serde_json::json!({ "metadata": meta, "load_report": report }))?
            } else {
                render::metadata(&meta, &report)
            };
            println!("{}", out);
        }

        "watch" => {
            watch(&service, &settings, &selection, json).await?;
        }

        unknown => {
            eprintln!("Unknown view: {}", unknown);
        }
    }

    Ok(())
}

fn pivot_output(
    service: &QueryService,
    settings: &Settings,
    selection: &Selection,
    json: bool,
) -> Result<String> {
    let pivot = service.pivot_by(selection, Dimension::Month, settings.by, settings.aggregation);
    if json {
        render::json(&pivot)
    } else {
        Ok(render::pivot(&pivot))
    }
}

/// Print the pivot, then reprint it after every successful reload until
/// Ctrl+C.
async fn watch(
    service: &QueryService,
    settings: &Settings,
    selection: &Selection,
    json: bool,
) -> Result<()> {
    println!("{}", pivot_output(service, settings, selection, json)?);

    let watcher = ReloadWatcher::new(
        Arc::clone(service.store()),
        Duration::from_secs(settings.watch_interval),
    );
    let (mut rx, handle) = watcher.start();
    tracing::info!(interval_secs = settings.watch_interval, "watching for changes");

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                if json {
                    println!("{}", render::json(&event)?);
                } else {
                    eprintln!("{}", render::reload_event(&event));
                }
                if matches!(event, ReloadEvent::Reloaded { .. }) {
                    println!("{}", pivot_output(service, settings, selection, json)?);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received; stopping watcher");
                break;
            }
        }
    }

    handle.abort();
    Ok(())
}

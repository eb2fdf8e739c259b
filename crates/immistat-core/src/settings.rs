use clap::{CommandFactory, Parser};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, StatError};
use crate::models::{Aggregation, Dimension, MonthRange, PlaceholderPolicy, Selection, YearMonth};
use crate::schema::DatasetSchema;

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Query immigration-application statistics from the command line
#[derive(Parser, Debug, Clone)]
#[command(
    name = "immistat",
    about = "Query immigration-application statistics and backlog estimates",
    version
)]
pub struct Settings {
    /// CSV statistics table to load
    #[arg(long, env = "IMMISTAT_DATA_FILE")]
    pub data_file: Option<PathBuf>,

    /// JSON file describing the table's column names and cell conventions
    #[arg(long)]
    pub schema: Option<PathBuf>,

    /// What to show
    #[arg(long, default_value = "pivot", value_parser = ["values", "tidy", "pivot", "estimate", "summary", "metadata", "watch"])]
    pub view: String,

    /// Dimension listed by the values view
    #[arg(long, value_enum, default_value_t = Dimension::Month)]
    pub dimension: Dimension,

    /// Column dimension of the pivot view (rows are always months)
    #[arg(long, value_enum, default_value_t = Dimension::Status)]
    pub by: Dimension,

    /// Aggregation applied by the pivot view
    #[arg(long = "agg", value_enum, default_value_t = Aggregation::Sum)]
    pub aggregation: Aggregation,

    /// Month to estimate, e.g. 2024-06 or 2024年6月
    #[arg(long)]
    pub month: Option<String>,

    /// First month of the range (inclusive)
    #[arg(long)]
    pub from: Option<String>,

    /// Last month of the range (inclusive)
    #[arg(long)]
    pub to: Option<String>,

    /// Application type filter (repeatable)
    #[arg(long = "type", value_name = "TYPE")]
    pub types: Vec<String>,

    /// Bureau filter (repeatable)
    #[arg(long = "bureau", value_name = "BUREAU")]
    pub bureaus: Vec<String>,

    /// Status filter (repeatable)
    #[arg(long = "status", value_name = "STATUS")]
    pub statuses: Vec<String>,

    /// Override what suppressed cells become
    #[arg(long, value_enum)]
    pub placeholder_policy: Option<PlaceholderPolicy>,

    /// Output format
    #[arg(long, default_value = "table", value_parser = ["table", "json"])]
    pub format: String,

    /// Seconds between source-file checks in watch view (1-3600)
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub watch_interval: u64,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Clear saved configuration
    #[arg(long)]
    pub clear: bool,
}

// ── LastUsedParams ─────────────────────────────────────────────────────────────

/// Persisted last-used parameters saved to `~/.immistat/last_used.json`.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct LastUsedParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl LastUsedParams {
    /// `~/.immistat/last_used.json`.
    pub fn config_path() -> PathBuf {
        Self::config_path_in(&dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    /// The config path rooted at `base_dir`.
    pub fn config_path_in(base_dir: &std::path::Path) -> PathBuf {
        base_dir.join(".immistat").join("last_used.json")
    }

    /// Load persisted params; `Default` when absent or unreadable.
    pub fn load_from(path: &std::path::Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    /// Write via a temp file and rename, creating parent directories.
    pub fn save_to(&self, path: &std::path::Path) -> std::result::Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;

        Ok(())
    }

    /// Delete the config file at `path` if it exists.
    pub fn clear_at(path: &std::path::Path) -> std::result::Result<(), std::io::Error> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse CLI arguments, fill unset values from the last run and persist
    /// the merged result.
    pub fn load_with_last_used() -> Self {
        Self::load_with_last_used_impl(
            std::env::args_os().collect(),
            &LastUsedParams::config_path(),
        )
    }

    /// Same as [`Settings::load_with_last_used`] with explicit arguments and
    /// config path.
    pub fn load_with_last_used_impl(
        args: Vec<std::ffi::OsString>,
        config_path: &std::path::Path,
    ) -> Self {
        let matches = Settings::command().get_matches_from(args.clone());
        let mut settings = Settings::parse_from(args);

        if settings.clear {
            if let Err(e) = LastUsedParams::clear_at(config_path) {
                tracing::warn!(error = %e, "could not clear saved configuration");
            }
            return Self::apply_debug(settings);
        }

        let last = LastUsedParams::load_from(config_path);

        // CLI always wins over the saved values.
        if settings.data_file.is_none() {
            settings.data_file = last.data_file;
        }
        if settings.schema.is_none() {
            settings.schema = last.schema;
        }
        if !is_arg_explicitly_set(&matches, "view") {
            if let Some(v) = last.view {
                settings.view = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "format") {
            if let Some(v) = last.format {
                settings.format = v;
            }
        }

        settings = Self::apply_debug(settings);

        if let Err(e) = LastUsedParams::from(&settings).save_to(config_path) {
            tracing::debug!(error = %e, "could not persist last-used parameters");
        }

        settings
    }

    /// The data file to load, or a configuration error when none is known.
    pub fn resolve_data_file(&self) -> Result<PathBuf> {
        self.data_file.clone().ok_or_else(|| {
            StatError::Config(
                "no data file given; pass --data-file or set IMMISTAT_DATA_FILE".to_string(),
            )
        })
    }

    /// The dataset schema: the `--schema` file or the built-in default, with
    /// `--placeholder-policy` applied on top.
    pub fn resolve_schema(&self) -> Result<DatasetSchema> {
        let mut schema = match &self.schema {
            Some(path) => DatasetSchema::load_from(path)?,
            None => DatasetSchema::default(),
        };
        if let Some(policy) = self.placeholder_policy {
            schema.placeholder_policy = policy;
        }
        Ok(schema)
    }

    /// The `--month` value, parsed.
    pub fn month(&self) -> Result<Option<YearMonth>> {
        self.month.as_deref().map(str::parse).transpose()
    }

    /// Filter selections from `--from/--to/--type/--bureau/--status`.
    pub fn selection(&self) -> Result<Selection> {
        let start: Option<YearMonth> = self.from.as_deref().map(str::parse).transpose()?;
        let end: Option<YearMonth> = self.to.as_deref().map(str::parse).transpose()?;
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(StatError::Config(format!(
                    "--from {} is after --to {}",
                    s, e
                )));
            }
        }

        let mut selection = Selection::new()
            .with_types(self.types.iter().cloned())
            .with_bureaus(self.bureaus.iter().cloned())
            .with_statuses(self.statuses.iter().cloned());
        if start.is_some() || end.is_some() {
            selection = selection.with_month_range(MonthRange::new(start, end));
        }
        Ok(selection)
    }

    /// `--debug` overrides the log level.
    fn apply_debug(mut settings: Settings) -> Settings {
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        settings
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────────

impl From<&Settings> for LastUsedParams {
    fn from(s: &Settings) -> Self {
        LastUsedParams {
            data_file: s.data_file.clone(),
            schema: s.schema.clone(),
            view: Some(s.view.clone()),
            format: Some(s.format.clone()),
        }
    }
}

/// Returns `true` when `name` was supplied explicitly on the command line.
fn is_arg_explicitly_set(matches: &clap::ArgMatches, name: &str) -> bool {
    matches.value_source(name) == Some(clap::parser::ValueSource::CommandLine)
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<OsString> {
        std::iter::once("immistat")
            .chain(list.iter().copied())
            .map(OsString::from)
            .collect()
    }

    fn tmp_config_path(tmp: &TempDir) -> PathBuf {
        LastUsedParams::config_path_in(tmp.path())
    }

    #[test]
    fn test_last_used_params_save_load() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp_config_path(&tmp);
        let params = LastUsedParams {
            data_file: Some(PathBuf::from("/data/FEH_00250011.csv")),
            schema: None,
            view: Some("estimate".to_string()),
            format: Some("json".to_string()),
        };
        params.save_to(&path).expect("save");
        assert_eq!(LastUsedParams::load_from(&path), params);
    }

    #[test]
    fn test_last_used_params_load_missing_or_corrupt() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp_config_path(&tmp);
        assert_eq!(LastUsedParams::load_from(&path), LastUsedParams::default());

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(LastUsedParams::load_from(&path), LastUsedParams::default());
    }

    #[test]
    fn test_defaults() {
        let tmp = TempDir::new().expect("tempdir");
        let s = Settings::load_with_last_used_impl(args(&[]), &tmp_config_path(&tmp));
        assert_eq!(s.view, "pivot");
        assert_eq!(s.format, "table");
        assert_eq!(s.dimension, Dimension::Month);
        assert_eq!(s.log_level, "INFO");
        assert_eq!(s.watch_interval, 5);
        assert_eq!(s.by, Dimension::Status);
        assert_eq!(s.aggregation, Aggregation::Sum);
    }

    #[test]
    fn test_last_used_fills_unset_values() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp_config_path(&tmp);
        Settings::load_with_last_used_impl(
            args(&["--data-file", "/data/a.csv", "--view", "summary", "--format", "json"]),
            &path,
        );

        let s = Settings::load_with_last_used_impl(args(&[]), &path);
        assert_eq!(s.data_file, Some(PathBuf::from("/data/a.csv")));
        assert_eq!(s.view, "summary");
        assert_eq!(s.format, "json");
    }

    #[test]
    fn test_cli_wins_over_last_used() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp_config_path(&tmp);
        Settings::load_with_last_used_impl(args(&["--view", "summary"]), &path);

        let s = Settings::load_with_last_used_impl(args(&["--view", "tidy"]), &path);
        assert_eq!(s.view, "tidy");
    }

    #[test]
    fn test_clear_removes_saved_file() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp_config_path(&tmp);
        Settings::load_with_last_used_impl(args(&["--view", "summary"]), &path);
        assert!(path.exists());

        let s = Settings::load_with_last_used_impl(args(&["--clear"]), &path);
        assert!(!path.exists());
        assert_eq!(s.view, "pivot");
    }

    #[test]
    fn test_debug_overrides_log_level() {
        let tmp = TempDir::new().expect("tempdir");
        let s = Settings::load_with_last_used_impl(args(&["--debug"]), &tmp_config_path(&tmp));
        assert_eq!(s.log_level, "DEBUG");
    }

    #[test]
    fn test_selection_from_filters() {
        let s = Settings::parse_from(args(&[
            "--from",
            "2024年1月",
            "--to",
            "2024-03",
            "--type",
            "在留期間更新",
            "--type",
            "永住許可",
            "--bureau",
            "東京",
        ]));
        let sel = s.selection().unwrap();
        let range = sel.month_range.unwrap();
        assert_eq!(range.start, YearMonth::new(2024, 1));
        assert_eq!(range.end, YearMonth::new(2024, 3));
        assert_eq!(sel.types, vec!["在留期間更新", "永住許可"]);
        assert_eq!(sel.bureaus, vec!["東京"]);
        assert!(sel.statuses.is_empty());
    }

    #[test]
    fn test_selection_rejects_inverted_range() {
        let s = Settings::parse_from(args(&["--from", "2024-05", "--to", "2024-01"]));
        assert!(matches!(s.selection(), Err(StatError::Config(_))));
    }

    #[test]
    fn test_month_parse_error() {
        let s = Settings::parse_from(args(&["--month", "sometime"]));
        assert!(matches!(s.month(), Err(StatError::MonthParse(_))));
    }

    #[test]
    fn test_resolve_data_file_missing() {
        let s = Settings::parse_from(args(&[]));
        if s.data_file.is_none() {
            assert!(s.resolve_data_file().is_err());
        }
    }

    #[test]
    fn test_resolve_schema_applies_policy_override() {
        let s = Settings::parse_from(args(&["--placeholder-policy", "null"]));
        let schema = s.resolve_schema().unwrap();
        assert_eq!(schema.placeholder_policy, PlaceholderPolicy::Null);
    }

    #[test]
    fn test_dimension_value_enum() {
        let s = Settings::parse_from(args(&["--dimension", "type"]));
        assert_eq!(s.dimension, Dimension::ApplicationType);
    }

    #[test]
    fn test_pivot_options() {
        let s = Settings::parse_from(args(&["--by", "bureau", "--agg", "mean"]));
        assert_eq!(s.by, Dimension::Bureau);
        assert_eq!(s.aggregation, Aggregation::Mean);
    }
}

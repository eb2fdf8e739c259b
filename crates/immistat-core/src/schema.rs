//! Dataset shape configuration.
//!
//! Column names, status labels and the placeholder token are data, not code:
//! any table with the same shape loads by swapping in a different
//! [`DatasetSchema`].

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StatError};
use crate::models::PlaceholderPolicy;

/// Header names and cell conventions of an input table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSchema {
    pub category_column: String,
    pub month_column: String,
    pub application_type_column: String,
    pub status_column: String,
    /// Status label of the pending (backlog) rows.
    pub pending_status: String,
    /// Status label of the processed-total rows.
    pub processed_status: String,
    /// Status label of the processed rows that were granted.
    pub granted_status: String,
    /// Status label of the processed rows that were denied.
    pub denied_status: String,
    /// Cell values meaning "suppressed / unavailable".
    pub placeholder_tokens: Vec<String>,
    pub placeholder_policy: PlaceholderPolicy,
    /// Digit-group separators stripped before number parsing.
    pub thousands_separators: Vec<char>,
    /// Columns never treated as bureaus even if numeric.
    pub ignored_columns: Vec<String>,
    /// The national-total column. It already sums every bureau, so it is
    /// kept out of the bureau set.
    pub total_column: Option<String>,
    /// Regional bureau columns whose figures include their branch offices.
    /// On load each branch is subtracted from its regional column so that
    /// summing bureaus counts every application once.
    pub bureau_branches: BTreeMap<String, Vec<String>>,
}

fn default_bureau_branches() -> BTreeMap<String, Vec<String>> {
    [
        (
            "東京出入国在留管理局管内",
            &["成田空港支局", "羽田空港支局", "横浜支局"][..],
        ),
        ("大阪出入国在留管理局管内", &["関西空港支局", "神戸支局"][..]),
        ("名古屋出入国在留管理局管内", &["中部空港支局"][..]),
        ("福岡出入国在留管理局管内", &["那覇支局"][..]),
    ]
    .into_iter()
    .map(|(region, branches)| {
        (
            region.to_string(),
            branches.iter().map(|b| b.to_string()).collect(),
        )
    })
    .collect()
}

impl Default for DatasetSchema {
    fn default() -> Self {
        Self {
            category_column: "表章項目".to_string(),
            month_column: "時間軸（月次）".to_string(),
            application_type_column: "在留資格審査".to_string(),
            status_column: "在留資格審査の受理・処理".to_string(),
            pending_status: "未済".to_string(),
            processed_status: "既済_総数".to_string(),
            granted_status: "既済_許可".to_string(),
            denied_status: "既済_不許可".to_string(),
            placeholder_tokens: vec!["***".to_string()],
            placeholder_policy: PlaceholderPolicy::Zero,
            thousands_separators: vec![',', '，'],
            ignored_columns: Vec::new(),
            total_column: Some("総数".to_string()),
            bureau_branches: default_bureau_branches(),
        }
    }
}

impl DatasetSchema {
    /// Read a schema from a JSON file. Absent fields take their defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| StatError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let schema: DatasetSchema = serde_json::from_str(&content)?;
        schema.validate()?;
        tracing::debug!(path = %path.display(), "dataset schema loaded");
        Ok(schema)
    }

    /// The four required metadata columns in canonical order.
    pub fn metadata_columns(&self) -> [&str; 4] {
        [
            self.category_column.as_str(),
            self.month_column.as_str(),
            self.application_type_column.as_str(),
            self.status_column.as_str(),
        ]
    }

    pub fn is_metadata_column(&self, name: &str) -> bool {
        self.metadata_columns().contains(&name)
    }

    pub fn is_ignored_column(&self, name: &str) -> bool {
        self.ignored_columns.iter().any(|c| c == name)
    }

    pub fn is_total_column(&self, name: &str) -> bool {
        self.total_column.as_deref() == Some(name)
    }

    /// `true` when the trimmed cell is one of the placeholder tokens.
    pub fn is_placeholder(&self, cell: &str) -> bool {
        let cell = cell.trim();
        self.placeholder_tokens.iter().any(|t| t == cell)
    }

    /// Remove digit-group separators from a cell.
    pub fn strip_separators(&self, cell: &str) -> String {
        cell.chars()
            .filter(|c| !self.thousands_separators.contains(c))
            .collect()
    }

    /// Reject schemas that cannot describe a loadable table.
    pub fn validate(&self) -> Result<()> {
        let columns = self.metadata_columns();
        for (i, name) in columns.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(StatError::Config(format!(
                    "metadata column {} has an empty name",
                    i + 1
                )));
            }
            if columns[..i].contains(name) {
                return Err(StatError::Config(format!(
                    "metadata column '{}' is configured twice",
                    name
                )));
            }
        }
        if self.pending_status.is_empty() || self.processed_status.is_empty() {
            return Err(StatError::Config(
                "pending_status and processed_status must be set".to_string(),
            ));
        }
        if self.pending_status == self.processed_status {
            return Err(StatError::Config(format!(
                "pending and processed status are both '{}'",
                self.pending_status
            )));
        }
        for (region, branches) in &self.bureau_branches {
            if branches.iter().any(|b| b == region) {
                return Err(StatError::Config(format!(
                    "bureau '{}' is listed as its own branch",
                    region
                )));
            }
            if let Some(b) = branches.iter().find(|b| self.bureau_branches.contains_key(*b)) {
                return Err(StatError::Config(format!(
                    "branch '{}' of '{}' is itself a regional bureau",
                    b, region
                )));
            }
        }
        if self.thousands_separators.iter().any(|c| c.is_ascii_digit() || *c == '.') {
            return Err(StatError::Config(
                "thousands separators cannot be digits or '.'".to_string(),
            ));
        }
        Ok(())
    }
}

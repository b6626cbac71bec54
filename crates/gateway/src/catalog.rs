use std::collections::HashMap;

use serde::Deserialize;
use sqlgate_policy::{
    DatasetMetadataResolver, DatasetRef, SqlDialect, resolve_classification_column,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogError {
    message: String,
}

impl CatalogError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CatalogError {}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    datasets: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogEntry {
    dataset_id: String,
    table: String,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    dialect: Option<String>,
    #[serde(default)]
    classification_column: Option<String>,
    #[serde(default)]
    columns: Vec<String>,
}

/// Dataset catalog read once from a JSON document at startup.
#[derive(Debug, Clone, Default)]
pub struct JsonCatalog {
    datasets: HashMap<String, DatasetRef>,
}

impl JsonCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: &str) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| CatalogError::new(format!("failed to read catalog {}: {}", path, err)))?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(raw)
            .map_err(|err| CatalogError::new(format!("invalid catalog JSON: {}", err)))?;

        let mut datasets = HashMap::with_capacity(file.datasets.len());
        for entry in file.datasets {
            let dataset_id = entry.dataset_id.trim().to_string();
            if dataset_id.is_empty() || entry.table.trim().is_empty() {
                return Err(CatalogError::new(
                    "catalog entries require dataset_id and table",
                ));
            }

            let dialect = match entry.dialect.as_deref().map(str::trim) {
                None | Some("") => SqlDialect::default(),
                Some(raw) => SqlDialect::parse(raw).ok_or_else(|| {
                    CatalogError::new(format!(
                        "dataset {} has unknown dialect `{}`",
                        dataset_id, raw
                    ))
                })?,
            };

            let classification_column = entry
                .classification_column
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .or_else(|| resolve_classification_column(entry.columns.as_slice()));

            let dataset = DatasetRef {
                dataset_id: dataset_id.clone(),
                table: entry.table.trim().to_string(),
                schema: entry
                    .schema
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
                dialect,
                classification_column,
            };

            if datasets.insert(dataset_id.clone(), dataset).is_some() {
                return Err(CatalogError::new(format!(
                    "dataset {} is listed more than once",
                    dataset_id
                )));
            }
        }

        Ok(Self { datasets })
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

impl DatasetMetadataResolver for JsonCatalog {
    fn resolve(&self, dataset_id: &str) -> Option<DatasetRef> {
        self.datasets.get(dataset_id.trim()).cloned()
    }
}

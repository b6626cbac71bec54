use serde::{Deserialize, Serialize};

/// Column names that conventionally hold a row's classification, in lookup priority order.
pub const CLASSIFICATION_COLUMN_CANDIDATES: [&str; 10] = [
    "data_level",
    "data_security_level",
    "data_secret_level",
    "security_level",
    "secret_level",
    "classification_level",
    "class_level",
    "protect_level",
    "data_protect_level",
    "level",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlDialect {
    #[default]
    Hive,
    Postgres,
}

impl SqlDialect {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hive" | "inceptor" | "trino" | "spark" => Some(SqlDialect::Hive),
            "postgres" | "postgresql" | "pg" => Some(SqlDialect::Postgres),
            _ => None,
        }
    }

    pub fn quote_identifier(self, identifier: &str) -> String {
        let identifier = identifier.trim();
        match self {
            SqlDialect::Hive => format!("`{}`", identifier.replace('`', "``")),
            SqlDialect::Postgres => format!("\"{}\"", identifier.replace('"', "\"\"")),
        }
    }
}

/// Physical location of a logical dataset plus its optional classification column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub dataset_id: String,
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub dialect: SqlDialect,
    #[serde(default)]
    pub classification_column: Option<String>,
}

impl DatasetRef {
    pub fn qualified_table(&self) -> String {
        let table = self.dialect.quote_identifier(&self.table);
        match self.schema.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(schema) => format!("{}.{}", self.dialect.quote_identifier(schema), table),
            None => table,
        }
    }

    pub fn quoted_classification_column(&self) -> Option<String> {
        self.classification_column
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| self.dialect.quote_identifier(c))
    }
}

/// Maps a logical dataset id to where it lives.
pub trait DatasetMetadataResolver: Send + Sync {
    fn resolve(&self, dataset_id: &str) -> Option<DatasetRef>;
}

/// Picks the classification column from a dataset's columns, keeping the catalog's spelling.
pub fn resolve_classification_column<S: AsRef<str>>(columns: &[S]) -> Option<String> {
    CLASSIFICATION_COLUMN_CANDIDATES.iter().find_map(|candidate| {
        columns
            .iter()
            .map(AsRef::as_ref)
            .find(|column| column.trim().eq_ignore_ascii_case(candidate))
            .map(|column| column.trim().to_string())
    })
}

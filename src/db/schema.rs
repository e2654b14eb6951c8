// Schema Descriptors
// Column and table snapshots built from the live catalog, foreign-key rows
// and the vendor-neutral type vocabulary

use crate::db::traits::{DatabaseError, Row};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a column of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Vendor type as the catalog reports it, e.g. `varchar(255)`
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub auto_increment: bool,
    pub is_primary_key: bool,
    pub comment: Option<String>,
}

impl Column {
    /// A nullable column with no default, key or comment
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default: None,
            auto_increment: false,
            is_primary_key: false,
            comment: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark as primary key. Primary key columns are never nullable.
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Represents a table and its columns in ordinal order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Build a table from a list of columns, rejecting duplicate names
    pub fn with_columns(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = Column>,
    ) -> Result<Self, DatabaseError> {
        let mut table = Table::new(name);
        for column in columns {
            table.add_column(column)?;
        }
        Ok(table)
    }

    pub fn add_column(&mut self, column: Column) -> Result<(), DatabaseError> {
        if self.column(&column.name).is_some() {
            return Err(DatabaseError::SchemaError(format!(
                "duplicate column '{}' in table '{}'",
                column.name, self.name
            )));
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_keys(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.is_primary_key).collect()
    }
}

/// Foreign key declared on the inspected table: its `col1` references `table2.col2`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingConstraint {
    pub col1: String,
    pub table2: String,
    pub col2: String,
}

impl OutgoingConstraint {
    /// Read a catalog row with `col1`, `table2` and `col2` columns
    pub fn from_row(row: &Row) -> Option<Self> {
        Some(Self {
            col1: row.get_text("col1")?,
            table2: row.get_text("table2")?,
            col2: row.get_text("col2")?,
        })
    }
}

/// Foreign key declared on `table1` whose `col1` references `col2` of the inspected table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingConstraint {
    pub table1: String,
    pub col1: String,
    pub col2: String,
}

impl IncomingConstraint {
    /// Read a catalog row with `table1`, `col1` and `col2` columns
    pub fn from_row(row: &Row) -> Option<Self> {
        Some(Self {
            table1: row.get_text("table1")?,
            col1: row.get_text("col1")?,
            col2: row.get_text("col2")?,
        })
    }
}

/// Vendor-neutral type family of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnderlyingType {
    Int,
    Number,
    Boolean,
    Date,
    Datetime,
    Timestamp,
    String,
}

impl UnderlyingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnderlyingType::Int => "int",
            UnderlyingType::Number => "number",
            UnderlyingType::Boolean => "boolean",
            UnderlyingType::Date => "date",
            UnderlyingType::Datetime => "datetime",
            UnderlyingType::Timestamp => "timestamp",
            UnderlyingType::String => "string",
        }
    }
}

impl fmt::Display for UnderlyingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a raw vendor type (`int(11) unsigned`, `character varying`,
/// `timestamp without time zone`) to its [`UnderlyingType`].
///
/// Only the base name counts: the length/precision qualifier and any
/// trailing modifiers are ignored. Unknown names fall back to `String`.
pub fn underlying_type(raw_type: &str) -> UnderlyingType {
    let lowered = raw_type.to_lowercase();
    let base = lowered.split('(').next().unwrap_or_default();
    let base = base.split_whitespace().next().unwrap_or_default();

    match base {
        "int" | "integer" | "tinyint" | "smallint" | "mediumint" | "bigint" | "int2" | "int4"
        | "int8" => UnderlyingType::Int,
        "decimal" | "numeric" | "float" | "double" | "real" | "float4" | "float8" => {
            UnderlyingType::Number
        }
        "bit" | "bool" | "boolean" => UnderlyingType::Boolean,
        "date" => UnderlyingType::Date,
        "datetime" => UnderlyingType::Datetime,
        "timestamp" => UnderlyingType::Timestamp,
        _ => UnderlyingType::String,
    }
}

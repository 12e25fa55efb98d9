use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MidfileError;

/// Columns of the `files` table that may appear in dynamic SQL.
///
/// This enum is the whitelist: a column name reaches a statement only after
/// being parsed into one of these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Pmid,
    Product,
    Sample,
    Ftype,
    Fileformat,
    Filepath,
    Cloudpath,
    Downpath,
}

impl Column {
    pub const UPDATABLE: [Column; 7] = [
        Column::Pmid,
        Column::Product,
        Column::Sample,
        Column::Ftype,
        Column::Fileformat,
        Column::Cloudpath,
        Column::Downpath,
    ];

    pub const QUERYABLE: [Column; 8] = [
        Column::Pmid,
        Column::Product,
        Column::Sample,
        Column::Ftype,
        Column::Fileformat,
        Column::Filepath,
        Column::Cloudpath,
        Column::Downpath,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Column::Pmid => "pmid",
            Column::Product => "product",
            Column::Sample => "sample",
            Column::Ftype => "ftype",
            Column::Fileformat => "fileformat",
            Column::Filepath => "filepath",
            Column::Cloudpath => "cloudpath",
            Column::Downpath => "downpath",
        }
    }

    pub fn is_updatable(&self) -> bool {
        Self::UPDATABLE.contains(self)
    }

    /// Parses a column name that is allowed as an update target.
    pub fn parse_updatable(name: &str) -> Result<Self, MidfileError> {
        match name.parse::<Column>() {
            Ok(column) if column.is_updatable() => Ok(column),
            _ => Err(disallowed(name, &Self::UPDATABLE)),
        }
    }

    /// Parses a column name that is allowed in a query predicate.
    pub fn parse_queryable(name: &str) -> Result<Self, MidfileError> {
        name.parse()
    }
}

fn disallowed(name: &str, allowed: &[Column]) -> MidfileError {
    MidfileError::DisallowedColumn {
        column: name.to_string(),
        allowed: allowed
            .iter()
            .map(Column::as_str)
            .collect::<Vec<_>>()
            .join(", "),
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Column {
    type Err = MidfileError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::QUERYABLE
            .into_iter()
            .find(|column| column.as_str() == value)
            .ok_or_else(|| disallowed(value, &Self::QUERYABLE))
    }
}

/// A row of the `files` table. `pmid` is optional because catalogs created
/// before the column was required may hold rows without one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub pmid: Option<String>,
    pub product: Option<String>,
    pub sample: Option<String>,
    pub ftype: Option<String>,
    pub fileformat: Option<String>,
    pub filepath: String,
    pub cloudpath: Option<String>,
    pub downpath: Option<String>,
}

impl FileRecord {
    pub const HEADER: [&'static str; 9] = [
        "id",
        "pmid",
        "product",
        "sample",
        "ftype",
        "fileformat",
        "filepath",
        "cloudpath",
        "downpath",
    ];

    pub fn fields(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            opt(&self.pmid),
            opt(&self.product),
            opt(&self.sample),
            opt(&self.ftype),
            opt(&self.fileformat),
            self.filepath.clone(),
            opt(&self.cloudpath),
            opt(&self.downpath),
        ]
    }
}

/// Values supplied by the `insert` command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewFileRecord {
    pub pmid: String,
    pub product: Option<String>,
    pub sample: Option<String>,
    pub ftype: Option<String>,
    pub fileformat: Option<String>,
    pub filepath: String,
}

impl NewFileRecord {
    pub fn validate(&self) -> Result<(), MidfileError> {
        if self.pmid.trim().is_empty() {
            return Err(MidfileError::EmptyField("pmid"));
        }
        if self.filepath.trim().is_empty() {
            return Err(MidfileError::EmptyField("filepath"));
        }
        Ok(())
    }
}

/// Reference genome versions recorded for a subproject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefRecord {
    pub id: i64,
    pub pmid: Option<String>,
    pub alignref: Option<String>,
    pub annoref: Option<String>,
}

impl RefRecord {
    pub const HEADER: [&'static str; 4] = ["id", "pmid", "alignref", "annoref"];

    pub fn fields(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            opt(&self.pmid),
            opt(&self.alignref),
            opt(&self.annoref),
        ]
    }
}

/// One distinct `(product, ftype, fileformat)` combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTriple {
    pub product: Option<String>,
    pub ftype: Option<String>,
    pub fileformat: Option<String>,
}

impl FileTriple {
    pub const HEADER: [&'static str; 3] = ["product", "ftype", "fileformat"];

    pub fn fields(&self) -> Vec<String> {
        vec![opt(&self.product), opt(&self.ftype), opt(&self.fileformat)]
    }
}

/// Equality predicates combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryConditions {
    conditions: Vec<(String, String)>,
}

impl QueryConditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<String>) -> Self {
        self.conditions.push((column.to_string(), value.into()));
        self
    }

    pub fn push_opt(&mut self, column: Column, value: Option<String>) {
        if let Some(value) = value {
            self.conditions.push((column.as_str().to_string(), value));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.conditions
            .iter()
            .map(|(column, value)| (column.as_str(), value.as_str()))
    }
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MidfileError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("column `{column}` is not allowed here (allowed: {allowed})")]
    #[diagnostic(help("column names are case-sensitive"))]
    DisallowedColumn { column: String, allowed: String },

    #[error("at least one query condition is required")]
    MissingQueryCondition,

    #[error("file already recorded in catalog: {0}")]
    DuplicateFilepath(String),

    #[error("no catalog record for filepath: {0}")]
    RecordNotFound(String),

    #[error("no matching records in catalog")]
    NoRecords,

    #[error("catalog database not found at {0}")]
    #[diagnostic(help("run `midfile init --dbdir <dir>` first"))]
    CatalogMissing(Utf8PathBuf),

    #[error("database error: {0}")]
    Database(String),

    #[error("config file not found at {0}")]
    #[diagnostic(help("run `midfile init --dbdir <dir>` or pass --config"))]
    MissingConfig(Utf8PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse YAML config: {0}")]
    ConfigParse(String),

    #[error("invalid cloud config: {0}")]
    CloudConfig(String),

    #[error("no bucket given and no default bucket in config")]
    MissingBucket,

    #[error("local file does not exist: {0}")]
    LocalFileMissing(Utf8PathBuf),

    #[error("object not found in bucket {bucket}: {key}")]
    CloudObjectNotFound { bucket: String, key: String },

    #[error("object storage request failed: {0}")]
    Cloud(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl From<rusqlite::Error> for MidfileError {
    fn from(err: rusqlite::Error) -> Self {
        MidfileError::Database(err.to_string())
    }
}

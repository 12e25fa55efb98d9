use std::fs;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::info;

use crate::catalog::{Catalog, DB_FILE_NAME};
use crate::cloud::CloudStore;
use crate::config::{Config, ConfigLoader, ConfigWrite};
use crate::domain::{FileRecord, FileTriple, NewFileRecord, QueryConditions, RefRecord};
use crate::error::MidfileError;
use crate::fs_util::{set_shared_permissions, write_tsv};

#[derive(Debug, Clone, Serialize)]
pub struct InitResult {
    pub dbpath: Utf8PathBuf,
    pub config_path: Utf8PathBuf,
    pub config_persisted: bool,
    pub permissions_set: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsertResult {
    pub filepath: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsertRefResult {
    pub pmid: String,
    pub inserted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateResult {
    pub filepath: String,
    pub column: String,
    pub updated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferAction {
    Uploaded,
    Skipped,
    Downloaded,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferResult {
    pub bucket: String,
    pub key: String,
    pub local_path: Utf8PathBuf,
    pub action: TransferAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub record: FileRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub outfile: Utf8PathBuf,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResult {
    pub config_path: Utf8PathBuf,
    pub triples: Vec<FileTriple>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Creates (or upgrades) the catalog under `dbdir` and records it in the config.
pub fn init_catalog(loader: &ConfigLoader, dbdir: &Utf8Path) -> Result<InitResult, MidfileError> {
    fs::create_dir_all(dbdir.as_std_path())
        .map_err(|err| MidfileError::Filesystem(format!("create {dbdir}: {err}")))?;
    let dbpath = dbdir.join(DB_FILE_NAME);

    let (_, written) = loader.update_dbpath(&dbpath)?;

    let mut catalog = Catalog::create(&dbpath)?;
    catalog.init_schema()?;
    drop(catalog);

    let mut permissions_set = set_shared_permissions(dbdir);
    permissions_set &= set_shared_permissions(&dbpath);
    if loader.exists() {
        permissions_set &= set_shared_permissions(loader.path());
    }

    Ok(InitResult {
        dbpath,
        config_path: loader.path().to_path_buf(),
        config_persisted: written == ConfigWrite::Persisted,
        permissions_set,
    })
}

/// Catalog operations, one per command. Each opens its own connection.
pub struct App<C: CloudStore> {
    config: Config,
    cloud: C,
}

impl<C: CloudStore> App<C> {
    pub fn new(config: Config, cloud: C) -> Self {
        Self { config, cloud }
    }

    pub fn cloud(&self) -> &C {
        &self.cloud
    }

    fn catalog(&self) -> Result<Catalog, MidfileError> {
        Catalog::open(&self.config.dbpath())
    }

    pub fn insert(&self, record: NewFileRecord) -> Result<InsertResult, MidfileError> {
        record.validate()?;
        self.catalog()?.insert_file(&record)?;
        info!(filepath = %record.filepath, pmid = %record.pmid, "inserted file record");
        Ok(InsertResult {
            filepath: record.filepath,
        })
    }

    /// Inserts a ref record unless one already exists for `pmid`.
    pub fn insert_ref(
        &self,
        pmid: &str,
        alignref: Option<&str>,
        annoref: Option<&str>,
    ) -> Result<InsertRefResult, MidfileError> {
        if pmid.trim().is_empty() {
            return Err(MidfileError::EmptyField("pmid"));
        }
        let catalog = self.catalog()?;
        if !catalog.find_refs(pmid)?.is_empty() {
            info!(pmid, "ref record already exists");
            return Ok(InsertRefResult {
                pmid: pmid.to_string(),
                inserted: false,
            });
        }
        catalog.insert_ref(pmid, alignref, annoref)?;
        Ok(InsertRefResult {
            pmid: pmid.to_string(),
            inserted: true,
        })
    }

    pub fn update(
        &self,
        filepath: &str,
        column: &str,
        value: &str,
    ) -> Result<UpdateResult, MidfileError> {
        let updated = self.catalog()?.update_file(filepath, column, value)?;
        Ok(UpdateResult {
            filepath: filepath.to_string(),
            column: column.to_string(),
            updated,
        })
    }

    pub fn check(&self, filepath: &str) -> Result<CheckResult, MidfileError> {
        self.catalog()?
            .find_file(filepath)?
            .map(|record| CheckResult { record })
            .ok_or_else(|| MidfileError::RecordNotFound(filepath.to_string()))
    }

    pub fn query_files(
        &self,
        conditions: &QueryConditions,
        outfile: &Utf8Path,
    ) -> Result<ExportResult, MidfileError> {
        if conditions.is_empty() {
            return Err(MidfileError::MissingQueryCondition);
        }
        let records = self.catalog()?.query_files(conditions)?;
        if records.is_empty() {
            return Err(MidfileError::NoRecords);
        }
        let rows = records.iter().map(FileRecord::fields).collect::<Vec<_>>();
        write_tsv(outfile, &FileRecord::HEADER, &rows)?;
        Ok(ExportResult {
            outfile: outfile.to_path_buf(),
            rows: rows.len(),
        })
    }

    pub fn query_refs(
        &self,
        pmid: Option<&str>,
        outfile: &Utf8Path,
    ) -> Result<ExportResult, MidfileError> {
        let pmid = pmid
            .filter(|pmid| !pmid.trim().is_empty())
            .ok_or(MidfileError::MissingQueryCondition)?;
        let records = self.catalog()?.find_refs(pmid)?;
        if records.is_empty() {
            return Err(MidfileError::NoRecords);
        }
        let rows = records.iter().map(RefRecord::fields).collect::<Vec<_>>();
        write_tsv(outfile, &RefRecord::HEADER, &rows)?;
        Ok(ExportResult {
            outfile: outfile.to_path_buf(),
            rows: rows.len(),
        })
    }

    pub fn info(&self, config_path: &Utf8Path) -> Result<InfoResult, MidfileError> {
        let triples = self.catalog()?.distinct_triples()?;
        Ok(InfoResult {
            config_path: config_path.to_path_buf(),
            triples,
        })
    }

    /// Uploads a local file unless the object already exists.
    pub fn local_to_cloud(
        &self,
        bucket: Option<&str>,
        local_path: &Utf8Path,
        key: &str,
        sink: &dyn ProgressSink,
    ) -> Result<TransferResult, MidfileError> {
        if !local_path.as_std_path().exists() {
            return Err(MidfileError::LocalFileMissing(local_path.to_path_buf()));
        }
        let bucket = self.config.resolve_bucket(bucket)?;

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; checking {bucket}/{key}"),
            elapsed: None,
        });
        let action = if self.cloud.exists(&bucket, key)? {
            sink.event(ProgressEvent {
                message: "phase=Store; object already exists in cloud".to_string(),
                elapsed: None,
            });
            TransferAction::Skipped
        } else {
            let start = Instant::now();
            self.cloud.upload(&bucket, local_path, key)?;
            sink.event(ProgressEvent {
                message: "phase=Store; upload finished".to_string(),
                elapsed: Some(start.elapsed()),
            });
            TransferAction::Uploaded
        };

        Ok(TransferResult {
            bucket,
            key: key.to_string(),
            local_path: local_path.to_path_buf(),
            action,
        })
    }

    /// Downloads an object; fails if it does not exist.
    pub fn cloud_to_local(
        &self,
        bucket: Option<&str>,
        key: &str,
        outpath: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<TransferResult, MidfileError> {
        let bucket = self.config.resolve_bucket(bucket)?;

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; checking {bucket}/{key}"),
            elapsed: None,
        });
        if !self.cloud.exists(&bucket, key)? {
            return Err(MidfileError::CloudObjectNotFound {
                bucket,
                key: key.to_string(),
            });
        }

        let start = Instant::now();
        self.cloud.download(&bucket, key, outpath)?;
        sink.event(ProgressEvent {
            message: "phase=Store; download finished".to_string(),
            elapsed: Some(start.elapsed()),
        });

        Ok(TransferResult {
            bucket,
            key: key.to_string(),
            local_path: outpath.to_path_buf(),
            action: TransferAction::Downloaded,
        })
    }
}

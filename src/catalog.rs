use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, OpenFlags, Row, params, params_from_iter};
use tracing::{error, info, warn};

use crate::domain::{Column, FileRecord, FileTriple, NewFileRecord, QueryConditions, RefRecord};
use crate::error::MidfileError;

pub const DB_FILE_NAME: &str = "midfile.db";

const CREATE_FILES: &str = "CREATE TABLE IF NOT EXISTS files(
    id INTEGER PRIMARY KEY AUTOINCREMENT UNIQUE NOT NULL,
    pmid TEXT NOT NULL,
    product TEXT,
    sample TEXT,
    ftype TEXT,
    fileformat TEXT,
    filepath UNIQUE NOT NULL,
    cloudpath TEXT,
    downpath TEXT
)";

const CREATE_REF: &str = "CREATE TABLE IF NOT EXISTS ref(
    id INTEGER PRIMARY KEY AUTOINCREMENT UNIQUE NOT NULL,
    pmid TEXT,
    alignref TEXT,
    annoref TEXT
)";

/// Columns added to `files` after the first schema revision.
const OPTIONAL_FILE_COLUMNS: [Column; 6] = [
    Column::Product,
    Column::Sample,
    Column::Ftype,
    Column::Fileformat,
    Column::Cloudpath,
    Column::Downpath,
];

const FILE_SELECT: &str = "SELECT id, pmid, product, sample, ftype, fileformat, filepath, cloudpath, downpath FROM files";

/// Scoped connection to the SQLite catalog. Closed on drop.
#[derive(Debug)]
pub struct Catalog {
    conn: Connection,
    path: Utf8PathBuf,
}

impl Catalog {
    /// Opens an existing catalog; never creates the database file. Optional
    /// columns missing from an older catalog are added before it is used.
    pub fn open(path: &Utf8Path) -> Result<Self, MidfileError> {
        if !path.as_std_path().is_file() {
            return Err(MidfileError::CatalogMissing(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path.as_std_path(),
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| {
            error!(path = %path, error = %err, "failed to open catalog");
            MidfileError::from(err)
        })?;
        let mut catalog = Self {
            conn,
            path: path.to_path_buf(),
        };
        catalog.upgrade()?;
        Ok(catalog)
    }

    /// Opens the catalog, creating the database file if needed.
    pub fn create(path: &Utf8Path) -> Result<Self, MidfileError> {
        let conn = Connection::open(path.as_std_path()).map_err(|err| {
            error!(path = %path, error = %err, "failed to create catalog");
            MidfileError::from(err)
        })?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn in_memory() -> Result<Self, MidfileError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            path: Utf8PathBuf::from(":memory:"),
        })
    }

    /// Creates both tables and adds any optional `files` columns an older
    /// database is missing. Safe to run repeatedly.
    pub fn init_schema(&mut self) -> Result<(), MidfileError> {
        self.upgrade()?;
        warn_empty_pmid(&self.conn)?;
        info!(path = %self.path, "catalog schema ready");
        Ok(())
    }

    fn upgrade(&mut self) -> Result<(), MidfileError> {
        let tx = self.conn.transaction()?;
        // An uncommitted transaction rolls back on drop.
        if let Err(err) = upgrade_schema(&tx) {
            error!(path = %self.path, error = %err, "failed to create or upgrade catalog schema");
            return Err(err);
        }
        tx.commit()?;
        Ok(())
    }

    pub fn insert_file(&self, record: &NewFileRecord) -> Result<(), MidfileError> {
        record.validate()?;
        let result = self.conn.execute(
            "INSERT INTO files (pmid, product, sample, ftype, fileformat, filepath) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.pmid,
                record.product,
                record.sample,
                record.ftype,
                record.fileformat,
                record.filepath,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                warn!(filepath = %record.filepath, "file already recorded");
                Err(MidfileError::DuplicateFilepath(record.filepath.clone()))
            }
            Err(err) => {
                error!(error = %err, "failed to insert file record");
                Err(err.into())
            }
        }
    }

    pub fn insert_ref(
        &self,
        pmid: &str,
        alignref: Option<&str>,
        annoref: Option<&str>,
    ) -> Result<(), MidfileError> {
        self.conn
            .execute(
                "INSERT INTO ref (pmid, alignref, annoref) VALUES (?1, ?2, ?3)",
                params![pmid, alignref, annoref],
            )
            .map_err(|err| {
                error!(error = %err, "failed to insert ref record");
                MidfileError::from(err)
            })?;
        Ok(())
    }

    pub fn find_refs(&self, pmid: &str) -> Result<Vec<RefRecord>, MidfileError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, pmid, alignref, annoref FROM ref WHERE pmid = ?1 ORDER BY id")?;
        let rows = stmt.query_map([pmid], |row| {
            Ok(RefRecord {
                id: row.get(0)?,
                pmid: row.get(1)?,
                alignref: row.get(2)?,
                annoref: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Sets one whitelisted column on the record identified by `filepath`.
    /// Returns the number of rows changed; zero is logged, not an error.
    pub fn update_file(
        &self,
        filepath: &str,
        column: &str,
        value: &str,
    ) -> Result<usize, MidfileError> {
        let column = Column::parse_updatable(column)?;
        if column == Column::Pmid && value.trim().is_empty() {
            return Err(MidfileError::EmptyField("pmid"));
        }
        let sql = format!("UPDATE files SET {} = ?1 WHERE filepath = ?2", column.as_str());
        let changed = self
            .conn
            .execute(&sql, params![value, filepath])
            .map_err(|err| {
                error!(error = %err, "failed to update file record");
                MidfileError::from(err)
            })?;
        if changed == 0 {
            warn!(filepath, "no catalog record to update");
        }
        Ok(changed)
    }

    pub fn find_file(&self, filepath: &str) -> Result<Option<FileRecord>, MidfileError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{FILE_SELECT} WHERE filepath = ?1"))?;
        let mut rows = stmt.query_map([filepath], file_from_row)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub fn query_files(&self, conditions: &QueryConditions) -> Result<Vec<FileRecord>, MidfileError> {
        if conditions.is_empty() {
            return Err(MidfileError::MissingQueryCondition);
        }
        let mut clauses = Vec::with_capacity(conditions.len());
        let mut values = Vec::with_capacity(conditions.len());
        for (name, value) in conditions.iter() {
            let column = Column::parse_queryable(name)?;
            clauses.push(format!("{} = ?", column.as_str()));
            values.push(value);
        }
        let sql = format!("{FILE_SELECT} WHERE {} ORDER BY id", clauses.join(" AND "));
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), file_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|err| {
            error!(error = %err, "failed to query file records");
            MidfileError::from(err)
        })
    }

    pub fn distinct_triples(&self) -> Result<Vec<FileTriple>, MidfileError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT product, ftype, fileformat FROM files ORDER BY product, ftype, fileformat",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(FileTriple {
                product: row.get(0)?,
                ftype: row.get(1)?,
                fileformat: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        pmid: row.get(1)?,
        product: row.get(2)?,
        sample: row.get(3)?,
        ftype: row.get(4)?,
        fileformat: row.get(5)?,
        filepath: row.get(6)?,
        cloudpath: row.get(7)?,
        downpath: row.get(8)?,
    })
}

fn upgrade_schema(conn: &Connection) -> Result<(), MidfileError> {
    conn.execute_batch(&format!("{CREATE_FILES};\n{CREATE_REF};"))?;
    let existing = table_columns(conn, "files")?;
    for column in OPTIONAL_FILE_COLUMNS {
        if !existing.contains(column.as_str()) {
            conn.execute(
                &format!("ALTER TABLE files ADD COLUMN {} TEXT", column.as_str()),
                [],
            )?;
            info!(column = column.as_str(), "added column to files table");
        }
    }
    Ok(())
}

fn warn_empty_pmid(conn: &Connection) -> Result<(), MidfileError> {
    let empty_pmid: i64 = conn.query_row(
        "SELECT COUNT(*) FROM files WHERE pmid IS NULL OR pmid = ''",
        [],
        |row| row.get(0),
    )?;
    if empty_pmid > 0 {
        warn!(count = empty_pmid, "records with empty pmid found; update them manually");
    }
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> Result<HashSet<String>, MidfileError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    rows.collect::<Result<HashSet<_>, _>>().map_err(Into::into)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_detected() {
        let mut catalog = Catalog::in_memory().unwrap();
        catalog.init_schema().unwrap();
        let record = NewFileRecord {
            pmid: "P1".to_string(),
            filepath: "/data/a.rds".to_string(),
            ..Default::default()
        };
        catalog.insert_file(&record).unwrap();
        let err = catalog
            .conn
            .execute(
                "INSERT INTO files (pmid, filepath) VALUES ('P2', '/data/a.rds')",
                [],
            )
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }
}

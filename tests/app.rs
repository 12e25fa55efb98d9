use std::collections::HashMap;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use midfile::app::{App, TransferAction, init_catalog};
use midfile::cloud::CloudStore;
use midfile::config::{CloudConfig, Config, ConfigLoader};
use midfile::domain::{NewFileRecord, QueryConditions};
use midfile::error::MidfileError;
use midfile::output::JsonOutput;

#[derive(Default)]
struct MockCloud {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    uploads: Mutex<usize>,
}

impl MockCloud {
    fn with_object(bucket: &str, key: &str, content: &[u8]) -> Self {
        let cloud = Self::default();
        cloud
            .objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), content.to_vec());
        cloud
    }
}

impl CloudStore for MockCloud {
    fn exists(&self, bucket: &str, key: &str) -> Result<bool, MidfileError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), key.to_string())))
    }

    fn upload(&self, bucket: &str, local_path: &Utf8Path, key: &str) -> Result<(), MidfileError> {
        let content = std::fs::read(local_path.as_std_path())
            .map_err(|_| MidfileError::LocalFileMissing(local_path.to_path_buf()))?;
        *self.uploads.lock().unwrap() += 1;
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), content);
        Ok(())
    }

    fn download(&self, bucket: &str, key: &str, destination: &Utf8Path) -> Result<(), MidfileError> {
        let objects = self.objects.lock().unwrap();
        let content = objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| MidfileError::CloudObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        midfile::fs_util::write_atomic(destination, content)
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    root: Utf8PathBuf,
    loader: ConfigLoader,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let loader = ConfigLoader::at(root.join("midfile.yml"));
        init_catalog(&loader, &root.join("db")).unwrap();
        Self {
            _temp: temp,
            root,
            loader,
        }
    }

    fn app<C: CloudStore>(&self, cloud: C) -> App<C> {
        let mut config = self.loader.load().unwrap();
        config.cloud = Some(CloudConfig {
            bucket: Some("middlefile".to_string()),
            ..Default::default()
        });
        App::new(config, cloud)
    }
}

fn record(pmid: &str, sample: &str, filepath: &str) -> NewFileRecord {
    NewFileRecord {
        pmid: pmid.to_string(),
        product: Some("scRNA".to_string()),
        sample: Some(sample.to_string()),
        ftype: Some("integrate".to_string()),
        fileformat: Some("rds".to_string()),
        filepath: filepath.to_string(),
    }
}

#[test]
fn init_records_dbpath_and_is_repeatable() {
    let fixture = Fixture::new();
    let config = fixture.loader.load().unwrap();
    assert_eq!(config.dbpath(), fixture.root.join("db").join("midfile.db"));
    assert!(config.dbpath().as_std_path().is_file());

    let again = init_catalog(&fixture.loader, &fixture.root.join("db")).unwrap();
    assert!(again.config_persisted);
}

#[cfg(unix)]
#[test]
fn init_opens_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let fixture = Fixture::new();
    let mode = std::fs::metadata(fixture.root.join("db").join("midfile.db"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o777);
}

#[test]
fn check_returns_inserted_record() {
    let fixture = Fixture::new();
    let app = fixture.app(MockCloud::default());
    app.insert(record("P001", "S1", "/data/P001/all.rds")).unwrap();

    let result = app.check("/data/P001/all.rds").unwrap();
    assert_eq!(result.record.sample.as_deref(), Some("S1"));
    assert_matches!(app.check("/data/other.rds"), Err(MidfileError::RecordNotFound(_)));
}

#[test]
fn commands_fail_without_catalog() {
    let temp = tempfile::tempdir().unwrap();
    let dbpath = Utf8PathBuf::from_path_buf(temp.path().join("missing.db")).unwrap();
    let app = App::new(
        Config {
            dbpath: Some(dbpath),
            cloud: None,
        },
        MockCloud::default(),
    );
    assert_matches!(app.check("/x"), Err(MidfileError::CatalogMissing(_)));
}

#[test]
fn insert_ref_does_not_duplicate() {
    let fixture = Fixture::new();
    let app = fixture.app(MockCloud::default());

    let first = app.insert_ref("P001", Some("GRCh38"), Some("v44")).unwrap();
    assert!(first.inserted);
    let second = app.insert_ref("P001", Some("GRCh37"), None).unwrap();
    assert!(!second.inserted);

    let out = fixture.root.join("refs.tsv");
    let export = app.query_refs(Some("P001"), &out).unwrap();
    assert_eq!(export.rows, 1);
    let content = std::fs::read_to_string(out.as_std_path()).unwrap();
    assert_eq!(content, "id\tpmid\talignref\tannoref\n1\tP001\tGRCh38\tv44\n");
}

#[test]
fn query_ref_requires_pmid_and_data() {
    let fixture = Fixture::new();
    let app = fixture.app(MockCloud::default());
    let out = fixture.root.join("refs.tsv");
    assert_matches!(
        app.query_refs(None, &out),
        Err(MidfileError::MissingQueryCondition)
    );
    assert_matches!(app.query_refs(Some("P404"), &out), Err(MidfileError::NoRecords));
    assert!(!out.as_std_path().exists());
}

#[test]
fn query_files_writes_tsv_into_new_directory() {
    let fixture = Fixture::new();
    let app = fixture.app(MockCloud::default());
    app.insert(record("P001", "S1", "/data/1.rds")).unwrap();
    app.insert(record("P001", "S2", "/data/2.rds")).unwrap();
    app.update("/data/2.rds", "cloudpath", "P001/2.rds").unwrap();

    let out = fixture.root.join("exports").join("nested").join("P001.tsv");
    let conditions = QueryConditions::new().with("pmid", "P001");
    let result = app.query_files(&conditions, &out).unwrap();
    assert_eq!(result.rows, 2);

    let content = std::fs::read_to_string(out.as_std_path()).unwrap();
    let lines = content.lines().collect::<Vec<_>>();
    assert_eq!(
        lines[0],
        "id\tpmid\tproduct\tsample\tftype\tfileformat\tfilepath\tcloudpath\tdownpath"
    );
    assert_eq!(lines[1], "1\tP001\tscRNA\tS1\tintegrate\trds\t/data/1.rds\t\t");
    assert_eq!(
        lines[2],
        "2\tP001\tscRNA\tS2\tintegrate\trds\t/data/2.rds\tP001/2.rds\t"
    );
}

#[test]
fn query_files_without_conditions_or_rows_fails() {
    let fixture = Fixture::new();
    let app = fixture.app(MockCloud::default());
    let out = fixture.root.join("out.tsv");
    assert_matches!(
        app.query_files(&QueryConditions::new(), &out),
        Err(MidfileError::MissingQueryCondition)
    );
    assert_matches!(
        app.query_files(&QueryConditions::new().with("sample", "S1"), &out),
        Err(MidfileError::NoRecords)
    );
}

#[test]
fn info_lists_distinct_triples() {
    let fixture = Fixture::new();
    let app = fixture.app(MockCloud::default());
    app.insert(record("P001", "S1", "/data/1.rds")).unwrap();
    app.insert(record("P002", "S1", "/data/2.rds")).unwrap();

    let info = app.info(fixture.loader.path()).unwrap();
    assert_eq!(info.config_path.as_path(), fixture.loader.path());
    assert_eq!(info.triples.len(), 1);
}

#[test]
fn upload_skipped_when_object_exists() {
    let fixture = Fixture::new();
    let local = fixture.root.join("local.rds");
    std::fs::write(local.as_std_path(), b"new").unwrap();
    let app = fixture.app(MockCloud::with_object("middlefile", "P001/a.rds", b"old"));

    let result = app
        .local_to_cloud(None, &local, "P001/a.rds", &JsonOutput)
        .unwrap();
    assert_eq!(result.action, TransferAction::Skipped);
    assert_eq!(result.bucket, "middlefile");
    assert_eq!(*app.cloud().uploads.lock().unwrap(), 0);
}

#[test]
fn upload_when_object_absent() {
    let fixture = Fixture::new();
    let local = fixture.root.join("local.rds");
    std::fs::write(local.as_std_path(), b"data").unwrap();
    let app = fixture.app(MockCloud::default());

    let result = app
        .local_to_cloud(Some("archive"), &local, "P001/a.rds", &JsonOutput)
        .unwrap();
    assert_eq!(result.action, TransferAction::Uploaded);
    assert_eq!(result.bucket, "archive");
    assert_eq!(*app.cloud().uploads.lock().unwrap(), 1);
    assert!(app.cloud().exists("archive", "P001/a.rds").unwrap());
}

#[test]
fn upload_of_missing_local_file_fails() {
    let fixture = Fixture::new();
    let app = fixture.app(MockCloud::default());
    let err = app
        .local_to_cloud(None, &fixture.root.join("absent"), "k", &JsonOutput)
        .unwrap_err();
    assert_matches!(err, MidfileError::LocalFileMissing(_));
}

#[test]
fn download_fails_when_object_absent() {
    let fixture = Fixture::new();
    let app = fixture.app(MockCloud::default());
    let out = fixture.root.join("dl").join("a.rds");
    let err = app
        .cloud_to_local(None, "P001/a.rds", &out, &JsonOutput)
        .unwrap_err();
    assert_matches!(err, MidfileError::CloudObjectNotFound { key, .. } if key == "P001/a.rds");
    assert!(!out.as_std_path().exists());
}

#[test]
fn download_writes_object_locally() {
    let fixture = Fixture::new();
    let app = fixture.app(MockCloud::with_object("middlefile", "P001/a.rds", b"payload"));
    let out = fixture.root.join("dl").join("a.rds");

    let result = app
        .cloud_to_local(None, "P001/a.rds", &out, &JsonOutput)
        .unwrap();
    assert_eq!(result.action, TransferAction::Downloaded);
    assert_eq!(std::fs::read(out.as_std_path()).unwrap(), b"payload");
}

#[test]
fn transfer_without_bucket_fails() {
    let fixture = Fixture::new();
    let app = App::new(fixture.loader.load().unwrap(), MockCloud::default());
    let err = app
        .cloud_to_local(None, "P001/a.rds", &fixture.root.join("x"), &JsonOutput)
        .unwrap_err();
    assert_matches!(err, MidfileError::MissingBucket);
}

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use midfile::config::{CloudConfig, Config, ConfigLoader, ConfigWrite};
use midfile::error::MidfileError;

fn temp_loader(temp: &tempfile::TempDir) -> ConfigLoader {
    ConfigLoader::at(Utf8PathBuf::from_path_buf(temp.path().join("conf").join("midfile.yml")).unwrap())
}

#[test]
fn parse_full_config() {
    let yaml = "\
dbpath: /data/midfile/midfile.db
cloud:
  access_key: AK
  secret_key: SK
  endpoint: https://obs.example.com
  bucket: middlefile
";
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.dbpath(), Utf8PathBuf::from("/data/midfile/midfile.db"));
    let cloud = config.cloud().unwrap();
    assert_eq!(cloud.access_key.as_deref(), Some("AK"));
    assert_eq!(cloud.endpoint.as_deref(), Some("https://obs.example.com"));
    assert_eq!(cloud.region, None);
    assert!(!cloud.force_path_style);
    assert_eq!(config.default_bucket(), Some("middlefile"));
}

#[test]
fn invalid_yaml_reported() {
    let err = Config::from_yaml("dbpath: [unclosed").unwrap_err();
    assert_matches!(err, MidfileError::ConfigParse(_));
}

#[test]
fn missing_cloud_section_reported() {
    let config = Config::from_yaml("dbpath: /tmp/x.db\n").unwrap();
    assert_matches!(config.cloud(), Err(MidfileError::CloudConfig(_)));
}

#[test]
fn explicit_bucket_wins_over_default() {
    let config = Config {
        dbpath: None,
        cloud: Some(CloudConfig {
            bucket: Some("middlefile".to_string()),
            ..Default::default()
        }),
    };
    assert_eq!(config.resolve_bucket(Some("other")).unwrap(), "other");
    assert_eq!(config.resolve_bucket(None).unwrap(), "middlefile");
    assert_matches!(
        Config::default().resolve_bucket(None),
        Err(MidfileError::MissingBucket)
    );
}

#[test]
fn load_missing_config_fails() {
    let temp = tempfile::tempdir().unwrap();
    let loader = temp_loader(&temp);
    assert_matches!(loader.load(), Err(MidfileError::MissingConfig(_)));
    assert_eq!(loader.load_or_default().unwrap(), Config::default());
}

#[test]
fn update_dbpath_bootstraps_and_keeps_cloud_section() {
    let temp = tempfile::tempdir().unwrap();
    let loader = temp_loader(&temp);

    let (_, written) = loader
        .update_dbpath(&Utf8PathBuf::from("/data/one/midfile.db"))
        .unwrap();
    assert_eq!(written, ConfigWrite::Persisted);
    assert!(loader.exists());

    let mut config = loader.load().unwrap();
    config.cloud = Some(CloudConfig {
        endpoint: Some("minio:9000".to_string()),
        bucket: Some("middlefile".to_string()),
        ..Default::default()
    });
    loader.save(&config).unwrap();

    loader
        .update_dbpath(&Utf8PathBuf::from("/data/two/midfile.db"))
        .unwrap();
    let reloaded = loader.load().unwrap();
    assert_eq!(reloaded.dbpath(), Utf8PathBuf::from("/data/two/midfile.db"));
    assert_eq!(reloaded.default_bucket(), Some("middlefile"));
}

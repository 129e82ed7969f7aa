use neardupe::config::{Config, ConfigurationError};
use neardupe::fingerprint::PerceptualAlgorithm;
use neardupe::scanner::ContentFamily;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_toml_file_overrides_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
threshold = 0.85
families = ["images", "code"]
workers = 3

[perceptual]
algorithm = "dhash"
hash_size = 16

[video]
align_window = 4

[grouping]
lsh_bands = 12
"#,
    )
    .unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.threshold, 0.85);
    assert_eq!(
        config.validate().unwrap(),
        vec![ContentFamily::Image, ContentFamily::Code]
    );
    assert_eq!(config.perceptual.algorithm, PerceptualAlgorithm::Dhash);
    // untouched keys keep their defaults
    assert_eq!(config.text.shingle_size, Config::default().text.shingle_size);

    let engine = config.engine_settings();
    assert_eq!(engine.workers, 3);
    assert_eq!(engine.grouper.threshold, 0.85);
    assert_eq!(engine.grouper.align_window, 4);
    assert_eq!(engine.grouper.buckets.lsh_bands, 12);
    assert_eq!(config.extractor_settings().hash_size, 16);
}

#[test]
fn test_environment_overrides_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[grouping]\npairwise_cap = 10\n").unwrap();

    std::env::set_var("NEARDUPE_GROUPING__PAIRWISE_CAP", "77");
    let config = Config::load(Some(&path));
    std::env::remove_var("NEARDUPE_GROUPING__PAIRWISE_CAP");

    assert_eq!(config.unwrap().grouping.pairwise_cap, 77);
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "threshold = 1.5\n").unwrap();
    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.validate(), Err(ConfigurationError::Threshold(1.5)));

    fs::write(&path, "families = [\"vidoe\"]\n").unwrap();
    let err = Config::load(Some(&path)).unwrap().validate().unwrap_err();
    assert!(err.to_string().contains("did you mean 'video'"), "{err}");

    fs::write(&path, "workers = \"many\"\n").unwrap();
    assert!(Config::load(Some(&path)).is_err());
}

#[test]
fn test_saved_config_loads_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    let mut config = Config::default();
    config.threshold = 0.8;
    config.video.interval_secs = Some(2.5);
    config.save(Some(&path)).unwrap();

    let loaded = Config::load(Some(&path)).unwrap();
    assert_eq!(loaded.threshold, 0.8);
    assert_eq!(loaded.video.interval_secs, Some(2.5));
}

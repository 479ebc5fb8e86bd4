use std::io::Write;

use liveclip_client::config::{
    DEFAULT_ORIGIN, MAX_CONFIG_BYTES, SavedClientConfig, load_config_from_path,
    parse_config_json, save_config_to_path, validate_config,
};

#[test]
fn saved_config_round_trips_through_disk() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join("config.json");
    let cfg = SavedClientConfig {
        origin: "https://clip.example.net".to_owned(),
        resync_interval_secs: 0,
        poll_interval_ms: 750,
    };

    save_config_to_path(&path, &cfg).expect("save config");
    let loaded = load_config_from_path(&path).expect("load config");

    assert_eq!(loaded, cfg);
    assert_eq!(loaded.resync_interval(), None);
    assert!(!path.with_extension("json.tmp").exists());
}

#[test]
fn missing_fields_take_defaults() {
    let cfg = parse_config_json(r#"{"origin":"http://10.0.0.5:9000"}"#).expect("parse");
    assert_eq!(cfg.resync_interval_secs, 15);
    assert_eq!(cfg.poll_interval_ms, 500);
    assert_eq!(SavedClientConfig::default().origin, DEFAULT_ORIGIN);
}

#[test]
fn load_config_ignores_oversized_file() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join("config.json");

    let mut file = std::fs::File::create(&path).expect("create config.json");
    file.write_all(&vec![b'a'; (MAX_CONFIG_BYTES as usize) + 1024])
        .expect("write oversized config.json");
    drop(file);

    let err = load_config_from_path(&path).expect_err("oversized file should error");
    let msg = err.to_string();
    assert!(msg.contains("too large"), "unexpected error: {msg}");
}

#[test]
fn validation_rejects_unusable_origin_and_intervals() {
    let bad_origin = SavedClientConfig {
        origin: "ftp://example.com".to_owned(),
        ..SavedClientConfig::default()
    };
    let err = validate_config(&bad_origin).expect_err("ftp origin");
    assert!(err.contains("Origin"), "unexpected error: {err}");

    let bad_poll = SavedClientConfig {
        poll_interval_ms: 5,
        ..SavedClientConfig::default()
    };
    let err = validate_config(&bad_poll).expect_err("poll interval too small");
    assert!(err.contains("Poll interval"), "unexpected error: {err}");

    assert!(validate_config(&SavedClientConfig::default()).is_ok());
}

#[test]
fn invalid_config_is_not_written() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join("config.json");
    let cfg = SavedClientConfig {
        origin: String::new(),
        ..SavedClientConfig::default()
    };

    assert!(save_config_to_path(&path, &cfg).is_err());
    assert!(!path.exists());
}

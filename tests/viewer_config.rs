use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use streamview::config::{DisplayMode, ViewerConfig, ViewerOverrides};
use streamview::{SourceKind, WorkerConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "STREAMVIEW_CONFIG",
        "STREAMVIEW_URL",
        "STREAMVIEW_CLASSIFIER",
        "STREAMVIEW_SOURCE",
        "STREAMVIEW_DISPLAY",
        "STREAMVIEW_PULL_RETRIES",
        "STREAMVIEW_PULL_TIMEOUT_MS",
        "STREAMVIEW_WORKERS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "url": "http://192.168.1.20:8080/video",
        "classifier": "/opt/models/faces.xml",
        "source": "mjpeg",
        "display": "headless",
        "pull_retries": 3,
        "pull_timeout_ms": 2000,
        "workers": [
            { "label": "x", "detect": true },
            { "label": "y" }
        ]
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("STREAMVIEW_CONFIG", file.path());
    std::env::set_var("STREAMVIEW_URL", "http://10.0.0.5/stream");
    std::env::set_var("STREAMVIEW_PULL_RETRIES", "5");

    let cfg = ViewerConfig::load().expect("load config");
    cfg.validate().expect("valid config");

    assert_eq!(cfg.url, "http://10.0.0.5/stream");
    assert_eq!(cfg.classifier_path.to_str(), Some("/opt/models/faces.xml"));
    assert_eq!(cfg.source, SourceKind::Mjpeg);
    assert_eq!(cfg.display, DisplayMode::Headless);
    assert_eq!(cfg.pull_retries, 5);
    assert_eq!(cfg.pull_timeout, Some(Duration::from_millis(2000)));
    assert_eq!(
        cfg.workers,
        vec![WorkerConfig::new('x', true), WorkerConfig::new('y', false)]
    );
    assert_eq!(cfg.source_options().kind, SourceKind::Mjpeg);

    clear_env();
}

#[test]
fn toml_config_is_selected_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
url = "stub://lobby?frames=10"
exit_key = 113

[[workers]]
label = "."
detect = true
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = ViewerConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.url, "stub://lobby?frames=10");
    assert_eq!(cfg.exit_key, 113);
    assert_eq!(cfg.workers, vec![WorkerConfig::new('.', true)]);
    assert_eq!(cfg.pull_timeout, None);

    clear_env();
}

#[test]
fn cli_overrides_beat_environment() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("STREAMVIEW_URL", "stub://from-env");
    std::env::set_var("STREAMVIEW_WORKERS", "a:face b");

    let mut cfg = ViewerConfig::load().expect("load config");
    assert_eq!(cfg.workers.len(), 2);

    cfg.apply_overrides(ViewerOverrides {
        url: Some("stub://from-cli".to_string()),
        source: Some("synthetic".to_string()),
        ..Default::default()
    })
    .expect("apply overrides");
    assert_eq!(cfg.url, "stub://from-cli");
    assert_eq!(cfg.source, SourceKind::Synthetic);
    assert_eq!(cfg.workers[0], WorkerConfig::new('a', true));

    clear_env();
}

#[test]
fn invalid_environment_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("STREAMVIEW_PULL_RETRIES", "many");
    assert!(ViewerConfig::load().is_err());
    clear_env();

    std::env::set_var("STREAMVIEW_SOURCE", "carrier-pigeon");
    assert!(ViewerConfig::load().is_err());
    clear_env();

    std::env::set_var("STREAMVIEW_WORKERS", "ab");
    assert!(ViewerConfig::load().is_err());
    clear_env();
}

#[test]
fn missing_url_fails_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ViewerConfig::load().expect("load config");
    let err = cfg.validate().expect_err("url is required");
    assert!(err.to_string().contains("missing stream url"));
}

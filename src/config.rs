use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::ingest::{SourceKind, SourceOptions};
use crate::render::DEFAULT_EXIT_KEY;
use crate::worker::WorkerConfig;

const DEFAULT_CLASSIFIER: &str = "haarcascade_frontalface_default.xml";
const DEFAULT_PULL_RETRIES: u32 = 0;
const DEFAULT_WORKERS: &str = ".:face , a:face b c d e f:face";

#[derive(Debug, Deserialize, Default)]
struct ViewerConfigFile {
    url: Option<String>,
    classifier: Option<PathBuf>,
    source: Option<String>,
    display: Option<String>,
    pull_retries: Option<u32>,
    pull_timeout_ms: Option<u64>,
    exit_key: Option<i32>,
    workers: Option<Vec<WorkerConfig>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DisplayMode {
    /// Windows when a GUI backend is compiled in, headless otherwise.
    #[default]
    Auto,
    Window,
    Headless,
}

impl FromStr for DisplayMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(DisplayMode::Auto),
            "window" | "gui" => Ok(DisplayMode::Window),
            "headless" | "none" => Ok(DisplayMode::Headless),
            other => Err(anyhow!(
                "unknown display mode '{}' (expected auto, window or headless)",
                other
            )),
        }
    }
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct ViewerOverrides {
    pub url: Option<String>,
    pub classifier: Option<PathBuf>,
    pub source: Option<String>,
    pub display: Option<String>,
    pub pull_retries: Option<u32>,
    pub pull_timeout_ms: Option<u64>,
    pub exit_key: Option<i32>,
    pub workers: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub url: String,
    pub classifier_path: PathBuf,
    pub source: SourceKind,
    pub display: DisplayMode,
    pub pull_retries: u32,
    pub pull_timeout: Option<Duration>,
    pub exit_key: i32,
    pub workers: Vec<WorkerConfig>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            classifier_path: PathBuf::from(DEFAULT_CLASSIFIER),
            source: SourceKind::Auto,
            display: DisplayMode::Auto,
            pull_retries: DEFAULT_PULL_RETRIES,
            pull_timeout: None,
            exit_key: DEFAULT_EXIT_KEY,
            workers: default_workers(),
        }
    }
}

impl ViewerConfig {
    /// Defaults, then `STREAMVIEW_CONFIG`, then the environment. Not validated.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("STREAMVIEW_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => read_config_file(path)?,
            None => ViewerConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn from_file(file: ViewerConfigFile) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(url) = file.url {
            cfg.url = url;
        }
        if let Some(classifier) = file.classifier {
            cfg.classifier_path = classifier;
        }
        if let Some(source) = file.source {
            cfg.source = source.parse().map_err(|e| anyhow!("config file: {}", e))?;
        }
        if let Some(display) = file.display {
            cfg.display = display.parse()?;
        }
        if let Some(retries) = file.pull_retries {
            cfg.pull_retries = retries;
        }
        cfg.pull_timeout = file.pull_timeout_ms.map(Duration::from_millis);
        if let Some(key) = file.exit_key {
            cfg.exit_key = key;
        }
        if let Some(workers) = file.workers {
            cfg.workers = workers;
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_value("STREAMVIEW_URL") {
            self.url = url;
        }
        if let Some(path) = env_value("STREAMVIEW_CLASSIFIER") {
            self.classifier_path = PathBuf::from(path);
        }
        if let Some(source) = env_value("STREAMVIEW_SOURCE") {
            self.source = source
                .parse()
                .map_err(|e| anyhow!("STREAMVIEW_SOURCE: {}", e))?;
        }
        if let Some(display) = env_value("STREAMVIEW_DISPLAY") {
            self.display = display.parse()?;
        }
        if let Some(retries) = env_value("STREAMVIEW_PULL_RETRIES") {
            self.pull_retries = retries
                .parse()
                .map_err(|_| anyhow!("STREAMVIEW_PULL_RETRIES must be a non-negative integer"))?;
        }
        if let Some(timeout) = env_value("STREAMVIEW_PULL_TIMEOUT_MS") {
            let millis: u64 = timeout.parse().map_err(|_| {
                anyhow!("STREAMVIEW_PULL_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.pull_timeout = Some(Duration::from_millis(millis));
        }
        if let Some(workers) = env_value("STREAMVIEW_WORKERS") {
            self.workers = parse_workers(&workers)?;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: ViewerOverrides) -> Result<()> {
        if let Some(url) = overrides.url {
            self.url = url;
        }
        if let Some(path) = overrides.classifier {
            self.classifier_path = path;
        }
        if let Some(source) = overrides.source {
            self.source = source.parse().map_err(|e| anyhow!("--source: {}", e))?;
        }
        if let Some(display) = overrides.display {
            self.display = display.parse()?;
        }
        if let Some(retries) = overrides.pull_retries {
            self.pull_retries = retries;
        }
        if let Some(millis) = overrides.pull_timeout_ms {
            self.pull_timeout = Some(Duration::from_millis(millis));
        }
        if let Some(key) = overrides.exit_key {
            self.exit_key = key;
        }
        if let Some(workers) = overrides.workers {
            self.workers = parse_workers(&workers)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(anyhow!(
                "missing stream url (pass it as an argument or set STREAMVIEW_URL)"
            ));
        }
        if self.workers.is_empty() {
            return Err(anyhow!("at least one viewer must be configured"));
        }
        let mut seen = HashSet::new();
        for worker in &self.workers {
            if !is_progress_label(worker.label) {
                return Err(anyhow!(
                    "viewer label {:?} must be a single printable ASCII character",
                    worker.label
                ));
            }
            if !seen.insert(worker.label) {
                return Err(anyhow!("duplicate viewer label '{}'", worker.label));
            }
        }
        if self.pull_timeout == Some(Duration::ZERO) {
            return Err(anyhow!("pull timeout must be greater than zero"));
        }
        Ok(())
    }

    pub fn source_options(&self) -> SourceOptions {
        SourceOptions {
            kind: self.source,
            pull_timeout: self.pull_timeout,
        }
    }

    pub fn detection_enabled(&self) -> bool {
        self.workers.iter().any(|w| w.detect)
    }
}

/// Progress labels travel as single stdout bytes, so only printable ASCII works.
pub fn is_progress_label(label: char) -> bool {
    label.is_ascii_graphic()
}

pub fn default_workers() -> Vec<WorkerConfig> {
    // The default list is a constant that always parses.
    parse_workers(DEFAULT_WORKERS).unwrap_or_default()
}

/// Parse whitespace-separated `label[:face]` tokens.
pub fn parse_workers(value: &str) -> Result<Vec<WorkerConfig>> {
    split_tokens(value)
        .into_iter()
        .map(|token| {
            let mut chars = token.chars();
            let label = chars
                .next()
                .ok_or_else(|| anyhow!("empty viewer entry"))?;
            let detect = match chars.as_str() {
                "" => false,
                ":face" => true,
                rest => {
                    return Err(anyhow!(
                        "invalid viewer entry '{}' (expected a single character label, optionally followed by ':face', got trailing '{}')",
                        token,
                        rest
                    ))
                }
            };
            Ok(WorkerConfig::new(label, detect))
        })
        .collect()
}

fn read_config_file(path: &Path) -> Result<ViewerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn split_tokens(value: &str) -> Vec<&str> {
    value
        .split_whitespace()
        .filter(|entry| !entry.is_empty())
        .collect()
}

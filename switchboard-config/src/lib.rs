//! Loader for Switchboard configuration with YAML + environment overlays.
//!
//! Schema of `switchboard.yaml`:
//!
//! ```yaml
//! pipeline:
//!   dedup_limit: 10000
//! server:
//!   bind: "127.0.0.1:3000"
//! logging:
//!   format: text        # or json
//!   emit_stderr: true
//!   filter: info
//! connectors:
//!   - id: telegram-1
//!     platform: telegram
//!     poll_interval_ms: 5000
//!     bot_token: "${TELEGRAM_BOT_TOKEN}"
//! ```
//!
//! Precedence, lowest first: built-in defaults, YAML file(s), inline YAML,
//! `SWITCHBOARD__`-prefixed environment variables. `${VAR}` placeholders are
//! expanded after merging. Every field outside the connector's shared keys is
//! kept verbatim in [`ConnectorConfig::options`] and decoded by the platform.
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use switchboard_common::observability::{LogConfig, LogFormat};

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
/// File used when neither `--config` nor `CONFIG_PATH` is given.
pub const DEFAULT_CONFIG_PATH: &str = "switchboard.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error(transparent)]
    Source(#[from] ConfigError),
    #[error("config schema error: {0}")]
    Schema(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchboardConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_connectors")]
    pub connectors: Vec<ConnectorConfig>,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            connectors: default_connectors(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_dedup_limit")]
    pub dedup_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dedup_limit: default_dedup_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_true")]
    pub emit_stderr: bool,
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            emit_stderr: true,
            dir: None,
            filter: default_filter(),
        }
    }
}

impl LoggingConfig {
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            log_dir: self.dir.clone(),
            emit_stderr: self.emit_stderr,
            format: self.format,
            default_filter: self.filter.clone(),
            ..LogConfig::default()
        }
    }
}

/// One configured platform source.
///
/// Shared keys are typed; everything else lands in `options` and is decoded
/// by the platform's constructor via [`ConnectorConfig::options`].
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    pub id: String,
    pub platform: String,
    /// Falls back to the platform default when unset.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub webhook_enabled: bool,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConnectorConfig {
    /// Shorthand for a connector with no credentials or options.
    pub fn new(id: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            platform: platform.into(),
            poll_interval_ms: None,
            webhook_enabled: false,
            webhook_secret: None,
            extra: Map::new(),
        }
    }

    /// Decode the platform-specific options (bot token, base url, ...).
    ///
    /// ```
    /// use serde::Deserialize;
    /// use switchboard_config::SwitchboardConfigLoader;
    ///
    /// #[derive(Deserialize)]
    /// struct Opts { bot_token: Option<String> }
    ///
    /// let cfg = SwitchboardConfigLoader::new()
    ///     .with_yaml_str("connectors:\n  - id: t\n    platform: telegram\n    bot_token: abc\n")
    ///     .load()
    ///     .unwrap();
    /// let opts: Opts = cfg.connectors[0].options().unwrap();
    /// assert_eq!(opts.bot_token.as_deref(), Some("abc"));
    /// ```
    pub fn options<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.extra.clone()))
    }

    pub fn with_option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

fn default_dedup_limit() -> usize {
    10_000
}
fn default_bind() -> String {
    "127.0.0.1:3000".into()
}
fn default_filter() -> String {
    "info".into()
}
fn default_true() -> bool {
    true
}

fn default_connectors() -> Vec<ConnectorConfig> {
    vec![
        ConnectorConfig {
            poll_interval_ms: Some(5000),
            ..ConnectorConfig::new("telegram-1", "telegram")
        },
        ConnectorConfig {
            poll_interval_ms: Some(7000),
            ..ConnectorConfig::new("mastodon-1", "mastodon")
        },
    ]
}

/// Resolve the config path: explicit argument, then `CONFIG_PATH`, then
/// [`DEFAULT_CONFIG_PATH`].
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn expand_env_in_value(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains('$') {
                let mut cur = std::mem::take(s);
                for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
                    let expanded = match shellexpand::env(&cur) {
                        Ok(cow) => cow.into_owned(),
                        Err(_) => cur.clone(),
                    };
                    if expanded == cur {
                        break;
                    }
                    cur = expanded;
                }
                *s = cur;
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(expand_env_in_value),
        Value::Object(obj) => obj.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

fn validate(cfg: &SwitchboardConfig) -> Result<(), ConfigLoadError> {
    if cfg.pipeline.dedup_limit == 0 {
        return Err(ConfigLoadError::Invalid(
            "pipeline.dedup_limit must be greater than zero".into(),
        ));
    }
    let mut seen = HashSet::new();
    for c in &cfg.connectors {
        if c.id.trim().is_empty() {
            return Err(ConfigLoadError::Invalid("connector id must not be empty".into()));
        }
        if c.platform.trim().is_empty() {
            return Err(ConfigLoadError::Invalid(format!(
                "connector {} has no platform",
                c.id
            )));
        }
        if c.poll_interval_ms == Some(0) {
            return Err(ConfigLoadError::Invalid(format!(
                "connector {}: poll_interval_ms must be greater than zero",
                c.id
            )));
        }
        if !seen.insert(c.id.as_str()) {
            return Err(ConfigLoadError::Invalid(format!(
                "duplicate connector id: {}",
                c.id
            )));
        }
    }
    Ok(())
}

/// Builder hides the `config` crate wiring (YAML + env overrides).
pub struct SwitchboardConfigLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
    env_prefix: String,
}

impl Default for SwitchboardConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SwitchboardConfigLoader {
    /// Start with no file sources; `SWITCHBOARD__` env overrides are applied
    /// last, at [`load`](Self::load) time.
    ///
    /// ```
    /// use switchboard_config::SwitchboardConfigLoader;
    ///
    /// let config = SwitchboardConfigLoader::new()
    ///     .with_yaml_str("pipeline:\n  dedup_limit: 50\nconnectors: []")
    ///     .load()
    ///     .expect("valid config");
    ///
    /// assert_eq!(config.pipeline.dedup_limit, 50);
    /// assert!(config.connectors.is_empty());
    /// ```
    pub fn new() -> Self {
        Self {
            builder: Config::builder(),
            env_prefix: "SWITCHBOARD".into(),
        }
    }

    /// Attach a config file if it exists; a missing file leaves the defaults.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(false));
        self
    }

    /// Attach a config file that must exist.
    pub fn with_required_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(true));
        self
    }

    /// Allow tests/CLI to merge inline YAML snippets.
    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.builder = self
            .builder
            .add_source(File::from_str(yaml, config::FileFormat::Yaml));
        self
    }

    /// Override the env prefix (mostly for tests running in parallel).
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = prefix.to_string();
        self
    }

    /// Merge sources, expand `${VAR}` placeholders, decode and validate.
    ///
    /// ```
    /// use switchboard_config::SwitchboardConfigLoader;
    ///
    /// let config = SwitchboardConfigLoader::new().load().unwrap();
    /// assert_eq!(config.pipeline.dedup_limit, 10_000);
    /// let ids: Vec<_> = config.connectors.iter().map(|c| c.id.as_str()).collect();
    /// assert_eq!(ids, ["telegram-1", "mastodon-1"]);
    /// ```
    pub fn load(self) -> Result<SwitchboardConfig, ConfigLoadError> {
        let cfg = self
            .builder
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut v: Value = cfg.try_deserialize()?;
        expand_env_in_value(&mut v);

        let typed: SwitchboardConfig = serde_json::from_value(v)?;
        validate(&typed)?;
        Ok(typed)
    }
}

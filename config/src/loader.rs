// Configuration Loader
// Layered configuration loading system

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::layered::{ConfigLayer, ConfigLayerSource, LayeredConfig};
use crate::types::Config;

const CONFIG_DIR: &str = ".atelier";
const CONFIG_FILE: &str = "config.toml";

/// Configuration loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid override `{0}`, expected KEY=VALUE")]
    InvalidOverride(String),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] toml::de::Error),

    #[error("failed to encode defaults: {0}")]
    Defaults(#[from] toml::ser::Error),
}

/// Configuration loader with layered support
pub struct ConfigLoader {
    /// Global config directory
    global_dir: Option<PathBuf>,
    /// Project config directory
    project_dir: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_dir: dirs::home_dir().map(|home| home.join(CONFIG_DIR)),
            project_dir: None,
        }
    }

    /// Override the global config directory (`~/.atelier` by default)
    pub fn with_global_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.global_dir = dir;
        self
    }

    /// Set project directory
    pub fn with_project_dir(mut self, dir: PathBuf) -> Self {
        self.project_dir = Some(dir);
        self
    }

    /// Load configuration without overrides
    pub fn load(&self) -> Result<Config, ConfigError> {
        self.load_with_cli_overrides(Vec::new())
    }

    /// Load configuration with CLI overrides
    pub fn load_with_cli_overrides(
        &self,
        cli_overrides: Vec<(String, String)>,
    ) -> Result<Config, ConfigError> {
        let layered = self.layers(cli_overrides)?;
        debug!(sources = ?layered.sources().collect::<Vec<_>>(), "merging config layers");
        let merged = toml::Value::Table(layered.merge());
        Ok(merged.try_into()?)
    }

    /// Collect layers in precedence order:
    /// 1. Built-in defaults
    /// 2. Global config (~/.atelier/config.toml)
    /// 3. Project config (.atelier/config.toml)
    /// 4. CLI overrides
    pub fn layers(
        &self,
        cli_overrides: Vec<(String, String)>,
    ) -> Result<LayeredConfig, ConfigError> {
        let mut layered = LayeredConfig::new();
        layered.add_layer(ConfigLayer {
            source: ConfigLayerSource::Default,
            values: default_table()?,
        });

        if let Some(global_dir) = &self.global_dir {
            let path = global_dir.join(CONFIG_FILE);
            if let Some(values) = read_layer(&path)? {
                debug!(path = %path.display(), "loaded global config");
                layered.add_layer(ConfigLayer {
                    source: ConfigLayerSource::GlobalConfig(path),
                    values,
                });
            }
        }

        if let Some(project_dir) = &self.project_dir {
            let path = project_dir.join(CONFIG_DIR).join(CONFIG_FILE);
            if let Some(values) = read_layer(&path)? {
                debug!(path = %path.display(), "loaded project config");
                layered.add_layer(ConfigLayer {
                    source: ConfigLayerSource::ProjectConfig(path),
                    values,
                });
            }
        }

        for (key, value) in cli_overrides {
            layered.add_layer(ConfigLayer {
                source: ConfigLayerSource::CliOverride,
                values: override_table(&key, &value)?,
            });
        }

        Ok(layered)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a `KEY=VALUE` command line override.
pub fn parse_override(raw: &str) -> Result<(String, String), ConfigError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::InvalidOverride(raw.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ConfigError::InvalidOverride(raw.to_string()));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

fn default_table() -> Result<toml::Table, ConfigError> {
    match toml::Value::try_from(Config::default())? {
        toml::Value::Table(table) => Ok(table),
        _ => Ok(toml::Table::new()),
    }
}

fn read_layer(path: &Path) -> Result<Option<toml::Table>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table = content
        .parse::<toml::Table>()
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Some(table))
}

/// Build a nested table from a dotted key. Values are read as TOML literals
/// and fall back to plain strings, so `shell.grace_period_ms=250` is an
/// integer and `models.model=gpt-4o` is a string.
fn override_table(key: &str, value: &str) -> Result<toml::Table, ConfigError> {
    let segments: Vec<&str> = key.split('.').map(str::trim).collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(ConfigError::InvalidOverride(format!("{key}={value}")));
    }

    let mut current = parse_literal(value);
    for segment in segments.iter().rev() {
        let mut table = toml::Table::new();
        table.insert((*segment).to_string(), current);
        current = toml::Value::Table(table);
    }

    match current {
        toml::Value::Table(table) => Ok(table),
        _ => Err(ConfigError::InvalidOverride(format!("{key}={value}"))),
    }
}

fn parse_literal(value: &str) -> toml::Value {
    format!("v = {value}")
        .parse::<toml::Table>()
        .ok()
        .and_then(|mut table| table.remove("v"))
        .unwrap_or_else(|| toml::Value::String(value.to_string()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn loader(global: &Path, project: &Path) -> ConfigLoader {
        ConfigLoader::new()
            .with_global_dir(Some(global.to_path_buf()))
            .with_project_dir(project.to_path_buf())
    }

    #[test]
    fn defaults_when_no_files_exist() {
        let global = tempfile::tempdir().expect("global dir");
        let project = tempfile::tempdir().expect("project dir");
        let config = loader(global.path(), project.path()).load().expect("load");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn project_overrides_global_and_cli_overrides_both() {
        let global = tempfile::tempdir().expect("global dir");
        let project = tempfile::tempdir().expect("project dir");
        std::fs::write(
            global.path().join(CONFIG_FILE),
            "[shell]\ndefault_timeout_ms = 5000\ngrace_period_ms = 500\n[models]\nmodel = \"global\"\n",
        )
        .expect("write global");
        std::fs::create_dir_all(project.path().join(CONFIG_DIR)).expect("mkdir");
        std::fs::write(
            project.path().join(CONFIG_DIR).join(CONFIG_FILE),
            "[models]\nmodel = \"project\"\n",
        )
        .expect("write project");

        let config = loader(global.path(), project.path())
            .load_with_cli_overrides(vec![(
                "shell.grace_period_ms".to_string(),
                "250".to_string(),
            )])
            .expect("load");

        assert_eq!(config.shell.default_timeout_ms, 5000);
        assert_eq!(config.shell.grace_period_ms, 250);
        assert_eq!(config.models.model, "project");
        assert_eq!(config.models.max_steps, 10);
    }

    #[test]
    fn string_overrides_need_no_quotes() {
        let global = tempfile::tempdir().expect("global dir");
        let project = tempfile::tempdir().expect("project dir");
        let config = loader(global.path(), project.path())
            .load_with_cli_overrides(vec![("models.model".to_string(), "gpt-4o-mini".to_string())])
            .expect("load");
        assert_eq!(config.models.model, "gpt-4o-mini");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let global = tempfile::tempdir().expect("global dir");
        let project = tempfile::tempdir().expect("project dir");
        let err = loader(global.path(), project.path())
            .load_with_cli_overrides(vec![("shell.nope".to_string(), "1".to_string())])
            .expect_err("unknown key");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_file_reports_its_path() {
        let global = tempfile::tempdir().expect("global dir");
        let project = tempfile::tempdir().expect("project dir");
        std::fs::write(global.path().join(CONFIG_FILE), "[shell\n").expect("write");
        let err = loader(global.path(), project.path()).load().expect_err("parse error");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn parse_override_splits_on_first_equals() {
        assert_eq!(
            parse_override("models.system_prompt=a=b").expect("parse"),
            ("models.system_prompt".to_string(), "a=b".to_string())
        );
        assert!(parse_override("novalue").is_err());
        assert!(parse_override("=x").is_err());
    }
}

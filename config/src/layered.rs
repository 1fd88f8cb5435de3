// Layered Configuration
// Support for layered configuration with precedence

/// Layered configuration wrapper
#[derive(Debug, Clone, Default)]
pub struct LayeredConfig {
  /// Configuration layers, lowest precedence first
  layers: Vec<ConfigLayer>,
}

/// Configuration layer with source tracking
#[derive(Debug, Clone)]
pub struct ConfigLayer {
  /// Layer source
  pub source: ConfigLayerSource,
  /// Configuration values
  pub values: toml::Table,
}

/// Configuration layer source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLayerSource {
  /// Built-in defaults
  Default,
  /// Global user config
  GlobalConfig(std::path::PathBuf),
  /// Project-specific config
  ProjectConfig(std::path::PathBuf),
  /// CLI override
  CliOverride,
}

impl LayeredConfig {
  /// Create a new layered configuration
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a layer
  pub fn add_layer(&mut self, layer: ConfigLayer) {
    self.layers.push(layer);
  }

  pub fn sources(&self) -> impl Iterator<Item = &ConfigLayerSource> {
    self.layers.iter().map(|layer| &layer.source)
  }

  /// Get merged configuration. Tables merge key by key; any other value in a
  /// later layer replaces the earlier one.
  pub fn merge(&self) -> toml::Table {
    let mut merged = toml::Table::new();
    for layer in &self.layers {
      merge_tables(&mut merged, &layer.values);
    }
    merged
  }
}

fn merge_tables(base: &mut toml::Table, overlay: &toml::Table) {
  for (key, value) in overlay {
    match (base.get_mut(key), value) {
      (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
        merge_tables(existing, incoming);
      }
      _ => {
        base.insert(key.clone(), value.clone());
      }
    }
  }
}

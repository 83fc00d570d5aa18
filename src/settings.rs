use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use config::{Config, ConfigError, Environment, File};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "lowercase")]
pub struct Settings {
    #[serde(alias = "SETTINGS")]
    pub settings: SettingsSection,
    #[serde(alias = "STORE")]
    pub store: StoreSettings,
    #[serde(alias = "QUERY")]
    pub query: QuerySettings,
    #[serde(alias = "COLORS")]
    pub colors: ColorSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
pub struct SettingsSection {
    #[serde(alias = "BIND")]
    pub bind: String,
    #[serde(alias = "PORT")]
    pub port: u16,
    #[serde(alias = "DEBUG")]
    pub debug: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Fixture,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
pub struct StoreSettings {
    #[serde(alias = "BACKEND")]
    pub backend: StoreBackend,
    #[serde(alias = "SQLITE_PATH")]
    pub sqlite_path: PathBuf,
    #[serde(alias = "FIXTURE_PATH")]
    pub fixture_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
pub struct QuerySettings {
    /// Upper bound on in-flight per-sensor lookups within one query.
    #[serde(alias = "MAX_CONCURRENCY")]
    pub max_concurrency: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub struct ColorSettings {
    #[serde(alias = "NORMAL_MAX")]
    pub normal_max: f64,
    #[serde(alias = "WARN_MAX")]
    pub warn_max: f64,
    #[serde(alias = "DISCONNECT_SENTINEL")]
    pub disconnect_sentinel: f64,
    #[serde(alias = "NORMAL_COLOR")]
    pub normal_color: String,
    #[serde(alias = "WARN_COLOR")]
    pub warn_color: String,
    #[serde(alias = "CRITICAL_COLOR")]
    pub critical_color: String,
    #[serde(alias = "DISCONNECT_COLOR")]
    pub disconnect_color: String,
}

impl Default for SettingsSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3000,
            debug: false,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            sqlite_path: PathBuf::from("silo_thermo.db"),
            fixture_path: PathBuf::from("fixture.json"),
        }
    }
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self { max_concurrency: 16 }
    }
}

impl Default for ColorSettings {
    fn default() -> Self {
        Self {
            normal_max: 25.0,
            warn_max: 35.0,
            disconnect_sentinel: -127.0,
            normal_color: "#46d446".to_string(),
            warn_color: "#c7c150".to_string(),
            critical_color: "#d14141".to_string(),
            disconnect_color: "#8c9494".to_string(),
        }
    }
}

impl Settings {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // 1. Load defaults
        let default_settings = Settings::default();
        builder = builder.add_source(config::Config::try_from(&default_settings)?);

        // 2. Load from file if specified
        if let Some(path) = config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path));
            } else {
                warn!("Configuration file not found: {:?}", path);
            }
        } else if let Some(home) = dirs::home_dir() {
            let toml_path = home.join(".silo-thermo").join("settings.toml");
            let yaml_path = home.join(".silo-thermo").join("settings.yaml");

            if toml_path.exists() {
                builder = builder.add_source(File::from(toml_path));
            } else if yaml_path.exists() {
                builder = builder.add_source(File::from(yaml_path));
            }
        }

        // 3. Environment variables
        builder = builder.add_source(
            Environment::with_prefix("SILOTHERMO")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;

        if let Ok(table) = config.clone().try_deserialize::<serde_json::Value>() {
            if let Some(map) = table.as_object() {
                let known_sections = ["settings", "store", "query", "colors"];
                for key in map.keys() {
                    let lower_key = key.to_lowercase();
                    if !known_sections.contains(&lower_key.as_str()) {
                        warn!("Unknown configuration section: {}", key);
                    }
                }
            }
        }

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.query.max_concurrency == 0 {
            return Err(ConfigError::Message(
                "query.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.colors.normal_max > self.colors.warn_max {
            return Err(ConfigError::Message(format!(
                "colors.normal_max ({}) exceeds colors.warn_max ({})",
                self.colors.normal_max, self.colors.warn_max
            )));
        }
        Ok(())
    }

    pub fn dump(&self, format: &str) -> Result<String, Box<dyn std::error::Error>> {
        match format.to_lowercase().as_str() {
            "toml" => Ok(toml::to_string_pretty(self)?),
            "yaml" | "yml" => Ok(serde_yaml::to_string(self)?),
            _ => Err("Unsupported format".into()),
        }
    }
}

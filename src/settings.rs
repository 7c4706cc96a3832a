//! Conversion settings
//!
//! A flat string-keyed configuration surface consulted by the dispatcher and
//! the reconciler. Recognized keys are enumerated below; unknown keys are
//! carried but never consulted. Supports loading from:
//! - Default values
//! - Config file (modelport.toml)
//! - Environment variables (MODELPORT_*)

use std::collections::BTreeMap;

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Receive preview only; no host elements are created
pub const KEY_PREVIEW: &str = "preview";
/// Receive every displayable node as a plain mesh element
pub const KEY_RECEIVE_MESH: &str = "receive-objects-mesh";
/// Send elements that come from linked models
pub const KEY_LINKED_MODELS: &str = "include-linked-models";
/// Mesh fidelity: coarse, medium, fine
pub const KEY_DETAIL_LEVEL: &str = "detail-level";
/// Attach a render appearance to outbound nodes that lack one
pub const KEY_RENDER_APPEARANCE: &str = "attach-render-appearance";

/// All keys the engine consults
pub const KNOWN_KEYS: &[&str] = &[
    KEY_PREVIEW,
    KEY_RECEIVE_MESH,
    KEY_LINKED_MODELS,
    KEY_DETAIL_LEVEL,
    KEY_RENDER_APPEARANCE,
];

/// Mesh fidelity requested for outbound geometry extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Coarse,
    Medium,
    #[default]
    Fine,
}

/// Flat string-keyed settings map
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(flatten)]
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from slug/selection pairs, as handed over by a UI or CLI
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut values = BTreeMap::new();
        for (key, value) in pairs {
            let key = key.into();
            if !KNOWN_KEYS.contains(&key.as_str()) {
                debug!(key = %key, "ignoring unrecognized setting");
            }
            values.insert(key, value.into());
        }
        Self { values }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.parse::<bool>().unwrap_or(false))
            .unwrap_or(false)
    }

    pub fn preview_only(&self) -> bool {
        self.flag(KEY_PREVIEW)
    }

    pub fn receive_as_mesh(&self) -> bool {
        self.flag(KEY_RECEIVE_MESH)
    }

    pub fn include_linked_models(&self) -> bool {
        self.flag(KEY_LINKED_MODELS)
    }

    /// Defaults to true when unset
    pub fn attach_render_appearance(&self) -> bool {
        self.get(KEY_RENDER_APPEARANCE)
            .map(|v| v.parse::<bool>().unwrap_or(true))
            .unwrap_or(true)
    }

    /// Unrecognized values fall back to the default fidelity
    pub fn detail_level(&self) -> DetailLevel {
        match self.get(KEY_DETAIL_LEVEL) {
            Some("coarse") => DetailLevel::Coarse,
            Some("medium") => DetailLevel::Medium,
            Some("fine") => DetailLevel::Fine,
            _ => DetailLevel::default(),
        }
    }

    /// Load settings from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load settings from a specific file, layered over the defaults
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["modelport.toml", ".modelport.toml", "config/modelport.toml"];
        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "modelport", "modelport") {
            let xdg_config = config_dir.config_dir().join("modelport.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(Environment::with_prefix("MODELPORT").separator("__"));

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save settings to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}

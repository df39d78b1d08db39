use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::convert::Locale;
use crate::core::{Result, RowcastError};

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub connections: HashMap<String, ConnectionEntry>,
    pub locale: Option<LocaleConfig>,
}

/// A named connection entry: which provider to use and its connection
/// string.
#[derive(Debug, Deserialize)]
pub struct ConnectionEntry {
    pub provider: String,
    pub connection_string: String,
}

/// Locale overrides for value conversion.
#[derive(Debug, Deserialize)]
pub struct LocaleConfig {
    pub decimal_separator: Option<char>,
    pub grouping_separator: Option<char>,
    pub date_format: Option<String>,
    pub datetime_format: Option<String>,
}

impl Config {
    /// Resolves a named connection entry.
    ///
    /// # Errors
    ///
    /// Returns `RowcastError::Config` when no entry with that name exists;
    /// this is a fatal configuration error raised before any driver work.
    pub fn connection(&self, name: &str) -> Result<&ConnectionEntry> {
        self.connections.get(name).ok_or_else(|| {
            RowcastError::Config(format!(
                "The connection entry '{}' does not exist in the configuration file",
                name
            ))
        })
    }

    /// Builds the configured locale, when a `[locale]` table is present.
    /// Unset fields keep their default value.
    pub fn locale(&self) -> Option<Locale> {
        self.locale.as_ref().map(|overrides| {
            let mut locale = Locale::default();
            if let Some(sep) = overrides.decimal_separator {
                locale.decimal_separator = sep;
            }
            if overrides.grouping_separator.is_some() {
                locale.grouping_separator = overrides.grouping_separator;
            }
            if let Some(format) = &overrides.date_format {
                locale.date_format = format.clone();
            }
            if let Some(format) = &overrides.datetime_format {
                locale.datetime_format = format.clone();
            }
            locale
        })
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| RowcastError::Config(e.to_string()))
}

/// The conventional configuration file location for this library.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("rowcast").join("config.toml"))
}

//! Component configuration surface.
//!
//! Steps carry a flat bag of named settings plus a list of per-attribute
//! settings. Components read both once at start into typed structs.

use crate::error::ConfigError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Flat, string-valued settings of one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(IndexMap<String, String>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|s| s.as_str())
    }

    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// Fetch a setting that must be present and non-blank.
    pub fn require(&self, name: &str) -> Result<&str, ConfigError> {
        match self.get(name) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(ConfigError::MissingSetting(name.to_string())),
        }
    }

    /// Read a single-character setting.
    ///
    /// Absent → `default`; blank → `None` (disabled); one character → that
    /// character; anything longer is invalid.
    pub fn char_or(&self, name: &str, default: Option<char>) -> Result<Option<char>, ConfigError> {
        let Some(raw) = self.get(name) else {
            return Ok(default);
        };
        if raw.is_empty() {
            return Ok(None);
        }
        let mut chars = raw.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(Some(c)),
            _ => Err(ConfigError::InvalidSetting {
                name: name.to_string(),
                value: raw.to_string(),
                reason: "expected a single character".into(),
            }),
        }
    }

    /// Read a non-negative integer setting.
    pub fn usize_or(&self, name: &str, default: usize) -> Result<usize, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => parse_usize(name, raw),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub(crate) fn parse_usize(name: &str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidSetting {
            name: name.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

/// One named setting for one attribute of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSetting {
    pub attribute_id: String,
    pub name: String,
    pub value: String,
}

impl AttributeSetting {
    pub fn new(
        attribute_id: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            attribute_id: attribute_id.into(),
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Kind of value a setting holds, for listing and validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingType {
    Text,
    Char,
    Integer,
    Choice(Vec<String>),
}

/// Declaration of a setting a component understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingDefinition {
    pub name: String,
    pub label: String,
    pub kind: SettingType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
}

impl SettingDefinition {
    pub fn new(name: impl Into<String>, label: impl Into<String>, kind: SettingType) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            kind,
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Check a step's value for this setting against the declaration.
    pub fn check(&self, settings: &Settings) -> Result<(), ConfigError> {
        let Some(raw) = settings.get(&self.name) else {
            if self.required && self.default.is_none() {
                return Err(ConfigError::MissingSetting(self.name.clone()));
            }
            return Ok(());
        };
        match &self.kind {
            SettingType::Text => Ok(()),
            SettingType::Char => settings.char_or(&self.name, None).map(|_| ()),
            SettingType::Integer => parse_usize(&self.name, raw).map(|_| ()),
            SettingType::Choice(options) => {
                if options.iter().any(|o| o.eq_ignore_ascii_case(raw.trim())) {
                    Ok(())
                } else {
                    Err(ConfigError::InvalidSetting {
                        name: self.name.clone(),
                        value: raw.to_string(),
                        reason: format!("expected one of {}", options.join(", ")),
                    })
                }
            }
        }
    }
}

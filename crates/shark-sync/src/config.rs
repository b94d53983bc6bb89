//! `.sharkconfig.json`: the project file carrying the last sync time, default
//! locations and pattern overrides.

use crate::{write_atomic, SyncError};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use shark_core::patterns::{PatternConfig, PatternRegistry};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const CONFIG_FILE_NAME: &str = ".sharkconfig.json";

/// Nearest directory at or above `start` holding a config file.
pub fn find_config(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);
    while let Some(dir) = current {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        current = dir.parent();
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectConfig {
    path: PathBuf,
    /// Every key in the file, so rewrites keep what this crate does not read.
    raw: Map<String, Value>,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub docs_root: Option<String>,
    pub database: Option<String>,
    pub patterns: PatternConfig,
}

impl ProjectConfig {
    /// Reads `path`; a missing file yields an empty config bound to it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref().to_path_buf();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::empty(path)),
            Err(err) => return Err(SyncError::io(&path, err)),
        };
        Self::parse(path, &content)
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            raw: Map::new(),
            last_sync_time: None,
            docs_root: None,
            database: None,
            patterns: PatternConfig::default(),
        }
    }

    fn parse(path: PathBuf, content: &str) -> Result<Self, SyncError> {
        let config_error = |message: String| SyncError::Config {
            path: path.clone(),
            message,
        };
        let value: Value =
            serde_json::from_str(content).map_err(|err| config_error(err.to_string()))?;
        let Value::Object(raw) = value else {
            return Err(config_error("top level must be a JSON object".to_string()));
        };

        let last_sync_time = match raw.get("last_sync_time").and_then(Value::as_str) {
            Some(text) if !text.is_empty() => match DateTime::parse_from_rfc3339(text) {
                Ok(parsed) => Some(parsed.with_timezone(&Utc)),
                Err(err) => {
                    warn!(
                        event = "config_invalid_last_sync",
                        path = %path.display(),
                        value = text,
                        error = %err
                    );
                    None
                }
            },
            _ => None,
        };
        let string_field = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);
        let docs_root = string_field("docs_root");
        let database = string_field("database");
        let patterns = match raw.get("patterns") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|err| config_error(format!("patterns: {err}")))?,
            None => PatternConfig::default(),
        };

        Ok(Self {
            path,
            raw,
            last_sync_time,
            docs_root,
            database,
            patterns,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory the relative paths in this file are anchored to.
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn docs_root_path(&self) -> Option<PathBuf> {
        self.docs_root.as_ref().map(|root| self.base_dir().join(root))
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.database.as_ref().map(|db| self.base_dir().join(db))
    }

    pub fn registry(&self) -> Result<PatternRegistry, SyncError> {
        Ok(PatternRegistry::new(&self.patterns)?)
    }

    /// Records `at` as the last sync time and rewrites the file atomically.
    pub fn update_last_sync_time(&mut self, at: DateTime<Utc>) -> Result<(), SyncError> {
        let stamp = at.to_rfc3339_opts(SecondsFormat::Secs, true);
        self.raw
            .insert("last_sync_time".to_string(), Value::String(stamp));
        let mut content = serde_json::to_string_pretty(&self.raw).map_err(|err| SyncError::Config {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        content.push('\n');
        write_atomic(&self.path, &content).map_err(|err| SyncError::io(&self.path, err))?;
        self.last_sync_time = Some(at);
        Ok(())
    }
}

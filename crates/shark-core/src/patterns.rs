//! Filename-shape registry.
//!
//! Every pattern is a regular expression with optional named capture groups.
//! Patterns are tried in configuration order and the first match wins. Task
//! file patterns that capture `task_key`, or all of `epic_num`, `feature_num`
//! and `number`, carry the task key in the filename itself; every other task
//! pattern relies on the key generator when the document declares no key.

use crate::keys;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid {role} pattern '{pattern}': {source}")]
    InvalidRegex {
        role: PatternRole,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("no {0} patterns configured")]
    Empty(PatternRole),
}

/// Semantic role a filename or folder name can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PatternRole {
    EpicFolder,
    EpicFile,
    FeatureFolder,
    FeatureFile,
    TaskFile,
}

impl PatternRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternRole::EpicFolder => "epic folder",
            PatternRole::EpicFile => "epic file",
            PatternRole::FeatureFolder => "feature folder",
            PatternRole::FeatureFile => "feature file",
            PatternRole::TaskFile => "task file",
        }
    }
}

impl std::fmt::Display for PatternRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityPatterns {
    #[serde(default)]
    pub folder: Vec<String>,
    #[serde(default)]
    pub file: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternConfig {
    #[serde(default = "default_epic_patterns")]
    pub epic: EntityPatterns,
    #[serde(default = "default_feature_patterns")]
    pub feature: EntityPatterns,
    #[serde(default = "default_task_patterns")]
    pub task: EntityPatterns,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            epic: default_epic_patterns(),
            feature: default_feature_patterns(),
            task: default_task_patterns(),
        }
    }
}

fn default_epic_patterns() -> EntityPatterns {
    EntityPatterns {
        folder: vec![
            r"^E(?P<number>\d{2})-(?P<slug>[a-z0-9-]+)$".to_string(),
            r"^(?P<epic_id>tech-debt|bugs|change-cards)$".to_string(),
        ],
        file: vec![r"^epic\.md$".to_string()],
    }
}

fn default_feature_patterns() -> EntityPatterns {
    EntityPatterns {
        folder: vec![
            r"^E(?P<epic_num>\d{2})-(?:P(?P<project_num>\d{2})-)?F(?P<number>\d{2})-(?P<slug>[a-z0-9-]+)$"
                .to_string(),
            r"^F(?P<number>\d{2})-(?P<slug>[a-z0-9-]+)$".to_string(),
        ],
        file: vec![
            r"^prd\.md$".to_string(),
            r"^PRD_F(?P<number>\d{2})-(?P<slug>.+)\.md$".to_string(),
        ],
    }
}

fn default_task_patterns() -> EntityPatterns {
    EntityPatterns {
        folder: Vec::new(),
        file: vec![
            r"^T-E(?P<epic_num>\d{2})-F(?P<feature_num>\d{2})-(?P<number>\d{3}).*\.md$".to_string(),
            r"^(?P<number>\d{3})-(?P<slug>.+)\.md$".to_string(),
            r"^(?P<slug>.+)\.prp\.md$".to_string(),
        ],
    }
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    source: String,
    regex: Regex,
    embeds_task_key: bool,
}

impl CompiledPattern {
    fn compile(role: PatternRole, source: &str) -> Result<Self, PatternError> {
        let regex = Regex::new(source).map_err(|source_err| PatternError::InvalidRegex {
            role,
            pattern: source.to_string(),
            source: source_err,
        })?;
        let names = regex.capture_names().flatten().collect::<Vec<_>>();
        let embeds_task_key = role == PatternRole::TaskFile
            && (names.contains(&"task_key")
                || ["epic_num", "feature_num", "number"]
                    .iter()
                    .all(|name| names.contains(name)));
        Ok(Self {
            source: source.to_string(),
            regex,
            embeds_task_key,
        })
    }
}

/// Outcome of matching one name against a role's patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub role: PatternRole,
    /// Source text of the pattern that matched, used as its identifier.
    pub pattern: String,
    pub captures: BTreeMap<String, String>,
    pub embeds_task_key: bool,
}

impl PatternMatch {
    pub fn capture(&self, name: &str) -> Option<&str> {
        self.captures.get(name).map(String::as_str)
    }

    /// True when the matched pattern promises a task key inside the filename.
    pub fn requires_embedded_key(&self) -> bool {
        self.embeds_task_key
    }

    /// Task key carried by the filename, if the pattern embeds one.
    pub fn embedded_task_key(&self) -> Option<String> {
        if let Some(key) = self.capture("task_key") {
            return Some(key.to_string());
        }
        let epic = self.capture("epic_num")?;
        let feature = self.capture("feature_num")?;
        let number = self.capture("number")?;
        let sequence = number.parse::<u32>().ok()?;
        Some(keys::format_task_key(
            &format!("E{epic}-F{feature}"),
            sequence,
        ))
    }

    pub fn slug(&self) -> Option<&str> {
        self.capture("slug")
    }
}

#[derive(Debug, Clone)]
pub struct PatternRegistry {
    epic_folder: Vec<CompiledPattern>,
    epic_file: Vec<CompiledPattern>,
    feature_folder: Vec<CompiledPattern>,
    feature_file: Vec<CompiledPattern>,
    task_file: Vec<CompiledPattern>,
}

impl PatternRegistry {
    pub fn new(config: &PatternConfig) -> Result<Self, PatternError> {
        let registry = Self {
            epic_folder: compile_all(PatternRole::EpicFolder, &config.epic.folder)?,
            epic_file: compile_all(PatternRole::EpicFile, &config.epic.file)?,
            feature_folder: compile_all(PatternRole::FeatureFolder, &config.feature.folder)?,
            feature_file: compile_all(PatternRole::FeatureFile, &config.feature.file)?,
            task_file: compile_all(PatternRole::TaskFile, &config.task.file)?,
        };
        if registry.task_file.is_empty() {
            return Err(PatternError::Empty(PatternRole::TaskFile));
        }
        Ok(registry)
    }

    pub fn defaults() -> Result<Self, PatternError> {
        Self::new(&PatternConfig::default())
    }

    pub fn match_task_file(&self, file_name: &str) -> Option<PatternMatch> {
        first_match(PatternRole::TaskFile, &self.task_file, file_name)
    }

    pub fn match_epic_folder(&self, folder_name: &str) -> Option<PatternMatch> {
        first_match(PatternRole::EpicFolder, &self.epic_folder, folder_name)
    }

    pub fn match_epic_file(&self, file_name: &str) -> Option<PatternMatch> {
        first_match(PatternRole::EpicFile, &self.epic_file, file_name)
    }

    pub fn match_feature_folder(&self, folder_name: &str) -> Option<PatternMatch> {
        first_match(PatternRole::FeatureFolder, &self.feature_folder, folder_name)
    }

    pub fn match_feature_file(&self, file_name: &str) -> Option<PatternMatch> {
        first_match(PatternRole::FeatureFile, &self.feature_file, file_name)
    }

    /// Priority of a feature metadata document, lower is preferred.
    pub fn feature_file_rank(&self, file_name: &str) -> Option<usize> {
        self.feature_file
            .iter()
            .position(|pattern| pattern.regex.is_match(file_name))
    }

    pub fn task_patterns(&self) -> Vec<&str> {
        self.task_file
            .iter()
            .map(|pattern| pattern.source.as_str())
            .collect()
    }
}

fn compile_all(role: PatternRole, sources: &[String]) -> Result<Vec<CompiledPattern>, PatternError> {
    sources
        .iter()
        .map(|source| CompiledPattern::compile(role, source))
        .collect()
}

fn first_match(role: PatternRole, patterns: &[CompiledPattern], name: &str) -> Option<PatternMatch> {
    patterns.iter().find_map(|pattern| {
        let caps = pattern.regex.captures(name)?;
        let captures = pattern
            .regex
            .capture_names()
            .flatten()
            .filter_map(|group| {
                caps.name(group)
                    .map(|value| (group.to_string(), value.as_str().to_string()))
            })
            .collect();
        Some(PatternMatch {
            role,
            pattern: pattern.source.clone(),
            captures,
            embeds_task_key: pattern.embeds_task_key,
        })
    })
}

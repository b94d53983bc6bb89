//! Parser for the optional `epic-index.md` overview document.
//!
//! The index is a list of markdown links. A link to a single epic directory
//! declares an epic; a link to `<epic dir>/<feature dir>` declares a feature
//! under that epic. Links to the metadata document inside those directories
//! count as links to the directory.

use crate::SyncError;
use regex::Regex;
use serde::Serialize;
use shark_core::keys;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::OnceLock;

pub const DEFAULT_INDEX_FILE: &str = "epic-index.md";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexEpic {
    pub key: String,
    pub title: String,
    pub path: String,
    pub document: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexFeature {
    pub key: String,
    pub epic_key: String,
    pub title: String,
    pub path: String,
    pub document: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EpicIndex {
    /// False when no index file exists; one-sided discovery items are then
    /// not worth a warning.
    pub present: bool,
    pub epics: Vec<IndexEpic>,
    pub features: Vec<IndexFeature>,
}

impl EpicIndex {
    pub fn epic(&self, key: &str) -> Option<&IndexEpic> {
        self.epics.iter().find(|epic| epic.key == key)
    }

    pub fn feature(&self, key: &str) -> Option<&IndexFeature> {
        self.features.iter().find(|feature| feature.key == key)
    }
}

fn link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("valid regex"))
}

fn normalize_link(target: &str) -> &str {
    let target = target.trim();
    let target = target.strip_prefix("./").unwrap_or(target);
    let target = target.strip_prefix('/').unwrap_or(target);
    target.strip_suffix('/').unwrap_or(target)
}

fn is_metadata_document(name: &str) -> bool {
    name == "epic.md" || name == "prd.md" || (name.starts_with("PRD_") && name.ends_with(".md"))
}

/// Reads the index at `path`. A missing file is an empty, absent index.
pub fn parse_index(path: &Path) -> Result<EpicIndex, SyncError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(parse_index_str(&content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(EpicIndex::default()),
        Err(err) => Err(SyncError::io(path, err)),
    }
}

pub fn parse_index_str(content: &str) -> EpicIndex {
    let mut index = EpicIndex {
        present: true,
        ..EpicIndex::default()
    };
    let mut seen_epics = BTreeSet::new();
    let mut seen_features = BTreeSet::new();

    for caps in link_regex().captures_iter(content) {
        let title = caps[1].trim().to_string();
        let target = normalize_link(&caps[2]);
        if target.contains("://") {
            continue;
        }

        let mut segments: Vec<&str> = target.split('/').filter(|seg| !seg.is_empty()).collect();
        let mut document = None;
        if let Some(last) = segments.last().copied() {
            if is_metadata_document(last) {
                document = Some(last.to_string());
                segments.pop();
            } else if last.ends_with(".md") || last.ends_with(".txt") {
                continue;
            }
        }
        let path = segments.join("/");

        match segments.as_slice() {
            [epic_dir] => {
                let Some(key) = keys::epic_key_from_dir_name(epic_dir) else {
                    continue;
                };
                if seen_epics.insert(key.clone()) {
                    index.epics.push(IndexEpic {
                        key,
                        title,
                        path,
                        document,
                    });
                }
            }
            [epic_dir, feature_dir] => {
                let Some(epic_key) = keys::epic_key_from_dir_name(epic_dir) else {
                    continue;
                };
                let Some(key) = keys::feature_key_from_dir_name(feature_dir) else {
                    continue;
                };
                if keys::epic_of_feature(&key) != Some(epic_key.as_str()) {
                    continue;
                }
                if seen_features.insert(key.clone()) {
                    index.features.push(IndexFeature {
                        key,
                        epic_key,
                        title,
                        path,
                        document,
                    });
                }
            }
            _ => {}
        }
    }

    index
}

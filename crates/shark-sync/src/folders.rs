//! Classification of the docs tree into epic and feature folders.

use crate::document;
use crate::SyncError;
use serde::Serialize;
use shark_core::patterns::{PatternMatch, PatternRegistry};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderEpic {
    pub key: String,
    pub slug: Option<String>,
    pub path: PathBuf,
    pub metadata_doc: Option<PathBuf>,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderFeature {
    pub key: String,
    pub epic_key: String,
    pub slug: Option<String>,
    pub path: PathBuf,
    pub metadata_doc: Option<PathBuf>,
    pub related_docs: Vec<PathBuf>,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderScan {
    pub epics: Vec<FolderEpic>,
    pub features: Vec<FolderFeature>,
    pub folders_scanned: usize,
    pub warnings: Vec<String>,
}

impl FolderScan {
    pub fn epic(&self, key: &str) -> Option<&FolderEpic> {
        self.epics.iter().find(|epic| epic.key == key)
    }

    pub fn feature(&self, key: &str) -> Option<&FolderFeature> {
        self.features.iter().find(|feature| feature.key == key)
    }

    pub fn related_docs(&self) -> usize {
        self.features
            .iter()
            .map(|feature| feature.related_docs.len())
            .sum()
    }
}

pub(crate) fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// "sync-engine" -> "Sync Engine"
pub fn title_from_slug(slug: &str) -> String {
    slug.split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn epic_key_of(matched: &PatternMatch) -> Option<String> {
    if let Some(key) = matched
        .capture("epic_key")
        .or_else(|| matched.capture("epic_id"))
    {
        return Some(key.to_string());
    }
    matched.capture("number").map(|number| format!("E{number}"))
}

fn feature_key_of(matched: &PatternMatch, parent_epic: &str) -> Option<String> {
    if let Some(key) = matched.capture("feature_key") {
        return Some(key.to_string());
    }
    let number = matched.capture("number")?;
    let epic = match matched.capture("epic_num") {
        Some(epic_num) => format!("E{epic_num}"),
        None => parent_epic.to_string(),
    };
    Some(match matched.capture("project_num") {
        Some(project) => format!("{epic}-P{project}-F{number}"),
        None => format!("{epic}-F{number}"),
    })
}

/// Markdown files directly inside `dir`, sorted by name.
fn markdown_files(dir: &Path) -> Vec<(String, PathBuf)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<(String, PathBuf)> = entries
        .flatten()
        .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
        .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
        .filter(|(name, _)| name.ends_with(".md") && !name.starts_with('.'))
        .collect();
    files.sort();
    files
}

/// Title and description declared by a metadata document, if readable.
fn describe(doc: Option<&Path>) -> (Option<String>, Option<String>) {
    let Some(content) = doc.and_then(|path| fs::read_to_string(path).ok()) else {
        return (None, None);
    };
    let (meta, _) = document::extract_metadata(&content);
    (meta.title, meta.description)
}

/// Walks `root` depth-first, keeping a stack of enclosing epics so every
/// feature folder is attached to its nearest epic ancestor.
pub fn scan_folders(root: &Path, registry: &PatternRegistry) -> Result<FolderScan, SyncError> {
    fs::read_dir(root).map_err(|err| SyncError::io(root, err))?;

    let mut scan = FolderScan::default();
    let mut epic_stack: Vec<(usize, String)> = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                scan.warnings.push(format!("Failed to read directory entry: {err}"));
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        scan.folders_scanned += 1;

        let depth = entry.depth();
        while epic_stack.last().is_some_and(|(level, _)| *level >= depth) {
            epic_stack.pop();
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path().to_path_buf();

        if let Some(matched) = registry.match_feature_folder(&name) {
            let Some((_, parent)) = epic_stack.last() else {
                scan.warnings.push(format!(
                    "Feature folder {} has no parent epic folder (skipped)",
                    path.display()
                ));
                continue;
            };
            let Some(key) = feature_key_of(&matched, parent) else {
                scan.warnings.push(format!(
                    "Cannot derive a feature key from folder {name} (skipped)"
                ));
                continue;
            };

            let files = markdown_files(&path);
            let metadata_doc = files
                .iter()
                .filter_map(|(file_name, file_path)| {
                    registry
                        .feature_file_rank(file_name)
                        .map(|rank| (rank, file_path.clone()))
                })
                .min_by_key(|(rank, _)| *rank)
                .map(|(_, file_path)| file_path);
            let related_docs = files
                .into_iter()
                .map(|(_, file_path)| file_path)
                .filter(|file_path| Some(file_path) != metadata_doc.as_ref())
                .collect();
            let (title, description) = describe(metadata_doc.as_deref());
            let slug = matched.slug().map(str::to_string);
            let title = title
                .or_else(|| slug.as_deref().map(title_from_slug))
                .unwrap_or_else(|| key.clone());

            scan.features.push(FolderFeature {
                key,
                epic_key: parent.clone(),
                slug,
                path,
                metadata_doc,
                related_docs,
                title,
                description,
            });
            continue;
        }

        if let Some(matched) = registry.match_epic_folder(&name) {
            let Some(key) = epic_key_of(&matched) else {
                scan.warnings.push(format!(
                    "Cannot derive an epic key from folder {name} (skipped)"
                ));
                continue;
            };
            let metadata_doc = markdown_files(&path)
                .into_iter()
                .find(|(file_name, _)| registry.match_epic_file(file_name).is_some())
                .map(|(_, file_path)| file_path);
            let (title, description) = describe(metadata_doc.as_deref());
            let slug = matched.slug().map(str::to_string);
            let title = title
                .or_else(|| slug.as_deref().map(title_from_slug))
                .unwrap_or_else(|| title_from_slug(&key));

            epic_stack.push((depth, key.clone()));
            scan.epics.push(FolderEpic {
                key,
                slug,
                path,
                metadata_doc,
                title,
                description,
            });
        }
    }

    Ok(scan)
}

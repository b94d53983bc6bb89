//! Reconciliation of the epic index with the folder structure, and import of
//! the resulting epics and features.

use crate::folders::{scan_folders, FolderScan};
use crate::index::{parse_index, EpicIndex};
use crate::report::DiscoveryReport;
use crate::SyncError;
use serde::Serialize;
use shark_core::patterns::PatternRegistry;
use shark_core::{keys, DiscoveryStrategy, EpicPriority, ItemStatus};
use shark_storage::{ItemUpdate, NewEpic, NewFeature, Repository};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryConflictKind {
    EpicIndexOnly,
    EpicFolderOnly,
    FeatureIndexOnly,
    FeatureFolderOnly,
    RelationshipMismatch,
}

impl DiscoveryConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryConflictKind::EpicIndexOnly => "epic_index_only",
            DiscoveryConflictKind::EpicFolderOnly => "epic_folder_only",
            DiscoveryConflictKind::FeatureIndexOnly => "feature_index_only",
            DiscoveryConflictKind::FeatureFolderOnly => "feature_folder_only",
            DiscoveryConflictKind::RelationshipMismatch => "relationship_mismatch",
        }
    }
}

impl fmt::Display for DiscoveryConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryConflict {
    pub kind: DiscoveryConflictKind,
    pub key: String,
    pub path: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    Index,
    Folder,
    Merged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredEpic {
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub file_path: Option<String>,
    pub source: DiscoverySource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredFeature {
    pub key: String,
    pub epic_key: String,
    pub title: String,
    pub description: Option<String>,
    pub file_path: Option<String>,
    pub related_docs: Vec<String>,
    pub source: DiscoverySource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovered {
    pub epics: Vec<DiscoveredEpic>,
    pub features: Vec<DiscoveredFeature>,
    pub warnings: Vec<String>,
}

/// Both views of the tree in one shape, keyed for deterministic iteration.
struct Sources {
    index_present: bool,
    index_epics: BTreeMap<String, DiscoveredEpic>,
    folder_epics: BTreeMap<String, DiscoveredEpic>,
    index_features: BTreeMap<String, DiscoveredFeature>,
    folder_features: BTreeMap<String, DiscoveredFeature>,
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl Sources {
    fn new(root: &Path, index: &EpicIndex, folders: &FolderScan) -> Self {
        let index_doc = |path: &str, document: &Option<String>| {
            document
                .as_ref()
                .map(|doc| display_path(&root.join(path).join(doc)))
        };

        let index_epics = index
            .epics
            .iter()
            .map(|epic| {
                (
                    epic.key.clone(),
                    DiscoveredEpic {
                        key: epic.key.clone(),
                        title: epic.title.clone(),
                        description: None,
                        file_path: index_doc(&epic.path, &epic.document),
                        source: DiscoverySource::Index,
                    },
                )
            })
            .collect();
        let folder_epics = folders
            .epics
            .iter()
            .map(|epic| {
                (
                    epic.key.clone(),
                    DiscoveredEpic {
                        key: epic.key.clone(),
                        title: epic.title.clone(),
                        description: epic.description.clone(),
                        file_path: epic.metadata_doc.as_deref().map(display_path),
                        source: DiscoverySource::Folder,
                    },
                )
            })
            .collect();
        let index_features = index
            .features
            .iter()
            .map(|feature| {
                (
                    feature.key.clone(),
                    DiscoveredFeature {
                        key: feature.key.clone(),
                        epic_key: feature.epic_key.clone(),
                        title: feature.title.clone(),
                        description: None,
                        file_path: index_doc(&feature.path, &feature.document),
                        related_docs: Vec::new(),
                        source: DiscoverySource::Index,
                    },
                )
            })
            .collect();
        let folder_features = folders
            .features
            .iter()
            .map(|feature| {
                (
                    feature.key.clone(),
                    DiscoveredFeature {
                        key: feature.key.clone(),
                        epic_key: feature.epic_key.clone(),
                        title: feature.title.clone(),
                        description: feature.description.clone(),
                        file_path: feature.metadata_doc.as_deref().map(display_path),
                        related_docs: feature
                            .related_docs
                            .iter()
                            .map(|doc| display_path(doc))
                            .collect(),
                        source: DiscoverySource::Folder,
                    },
                )
            })
            .collect();

        Self {
            index_present: index.present,
            index_epics,
            folder_epics,
            index_features,
            folder_features,
        }
    }
}

/// Disagreements between the index and the folders, sorted by kind then key.
fn detect(sources: &Sources) -> Vec<DiscoveryConflict> {
    let mut conflicts = Vec::new();
    let path_of = |path: &Option<String>| path.clone().unwrap_or_default();

    for (key, epic) in &sources.index_epics {
        if !sources.folder_epics.contains_key(key) {
            conflicts.push(DiscoveryConflict {
                kind: DiscoveryConflictKind::EpicIndexOnly,
                key: key.clone(),
                path: path_of(&epic.file_path),
                suggestion: format!("Create folder for epic {key} or remove from epic-index.md"),
            });
        }
    }
    for (key, epic) in &sources.folder_epics {
        if !sources.index_epics.contains_key(key) {
            conflicts.push(DiscoveryConflict {
                kind: DiscoveryConflictKind::EpicFolderOnly,
                key: key.clone(),
                path: path_of(&epic.file_path),
                suggestion: format!(
                    "Add epic {key} to epic-index.md or use merge/folder-precedence strategy"
                ),
            });
        }
    }
    for (key, feature) in &sources.index_features {
        match sources.folder_features.get(key) {
            None => conflicts.push(DiscoveryConflict {
                kind: DiscoveryConflictKind::FeatureIndexOnly,
                key: key.clone(),
                path: path_of(&feature.file_path),
                suggestion: format!(
                    "Create folder for feature {key} or remove from epic-index.md"
                ),
            }),
            Some(folder) if folder.epic_key != feature.epic_key => {
                conflicts.push(DiscoveryConflict {
                    kind: DiscoveryConflictKind::RelationshipMismatch,
                    key: key.clone(),
                    path: path_of(&folder.file_path),
                    suggestion: format!(
                        "Feature {key} has parent epic {} in index but {} in folder structure. Move folder or update epic-index.md",
                        feature.epic_key, folder.epic_key
                    ),
                })
            }
            Some(_) => {}
        }
    }
    for (key, feature) in &sources.folder_features {
        if !sources.index_features.contains_key(key) {
            conflicts.push(DiscoveryConflict {
                kind: DiscoveryConflictKind::FeatureFolderOnly,
                key: key.clone(),
                path: path_of(&feature.file_path),
                suggestion: format!(
                    "Add feature {key} to epic-index.md or use merge/folder-precedence strategy"
                ),
            });
        }
    }

    conflicts.sort_by(|a, b| (a.kind, &a.key).cmp(&(b.kind, &b.key)));
    conflicts
}

fn overlay_epic(base: &DiscoveredEpic, other: Option<&DiscoveredEpic>) -> DiscoveredEpic {
    let mut merged = base.clone();
    if let Some(other) = other {
        merged.description = merged.description.or_else(|| other.description.clone());
        merged.file_path = merged.file_path.or_else(|| other.file_path.clone());
        merged.source = DiscoverySource::Merged;
    }
    merged
}

fn overlay_feature(base: &DiscoveredFeature, other: Option<&DiscoveredFeature>) -> DiscoveredFeature {
    let mut merged = base.clone();
    if let Some(other) = other {
        merged.description = merged.description.or_else(|| other.description.clone());
        merged.file_path = merged.file_path.or_else(|| other.file_path.clone());
        if merged.related_docs.is_empty() {
            merged.related_docs = other.related_docs.clone();
        }
        merged.source = DiscoverySource::Merged;
    }
    merged
}

fn resolve(
    sources: &Sources,
    conflicts: &[DiscoveryConflict],
    strategy: DiscoveryStrategy,
) -> Result<Discovered, SyncError> {
    let mut discovered = Discovered::default();
    let warn = sources.index_present;

    match strategy {
        DiscoveryStrategy::IndexPrecedence => {
            for conflict in conflicts {
                let entity = match conflict.kind {
                    DiscoveryConflictKind::EpicIndexOnly => "epic",
                    DiscoveryConflictKind::FeatureIndexOnly => "feature",
                    _ => continue,
                };
                return Err(SyncError::Discovery(format!(
                    "{entity} {} in index but folder missing (index-precedence requires folders)",
                    conflict.key
                )));
            }
            if warn {
                for conflict in conflicts {
                    let entity = match conflict.kind {
                        DiscoveryConflictKind::EpicFolderOnly => "Epic",
                        DiscoveryConflictKind::FeatureFolderOnly => "Feature",
                        _ => continue,
                    };
                    discovered.warnings.push(format!(
                        "{entity} {} in folders but not in index (skipped)",
                        conflict.key
                    ));
                }
            }
            discovered.epics = sources
                .index_epics
                .iter()
                .map(|(key, epic)| overlay_epic(epic, sources.folder_epics.get(key)))
                .collect();
            discovered.features = sources
                .index_features
                .iter()
                .map(|(key, feature)| overlay_feature(feature, sources.folder_features.get(key)))
                .collect();
        }
        DiscoveryStrategy::FolderPrecedence => {
            if warn {
                for conflict in conflicts {
                    let entity = match conflict.kind {
                        DiscoveryConflictKind::EpicIndexOnly => "Epic",
                        DiscoveryConflictKind::FeatureIndexOnly => "Feature",
                        _ => continue,
                    };
                    discovered.warnings.push(format!(
                        "{entity} {} in index but folder missing (skipped)",
                        conflict.key
                    ));
                }
            }
            discovered.epics = sources.folder_epics.values().cloned().collect();
            discovered.features = sources.folder_features.values().cloned().collect();
        }
        DiscoveryStrategy::Merge => {
            let mut epics = sources.folder_epics.clone();
            for (key, index_epic) in &sources.index_epics {
                match sources.folder_epics.get(key) {
                    Some(folder_epic) => {
                        let mut merged = overlay_epic(folder_epic, Some(index_epic));
                        merged.title = index_epic.title.clone();
                        if index_epic.file_path.is_some() {
                            merged.file_path = index_epic.file_path.clone();
                        }
                        epics.insert(key.clone(), merged);
                    }
                    None => {
                        if warn {
                            discovered
                                .warnings
                                .push(format!("Epic {key} in index but folder missing (included anyway)"));
                        }
                        epics.insert(key.clone(), index_epic.clone());
                    }
                }
            }
            if warn {
                for key in sources.folder_epics.keys() {
                    if !sources.index_epics.contains_key(key) {
                        discovered.warnings.push(format!(
                            "Epic {key} in folders but not in index (included anyway)"
                        ));
                    }
                }
            }

            let mut features = sources.folder_features.clone();
            for (key, index_feature) in &sources.index_features {
                match sources.folder_features.get(key) {
                    Some(folder_feature) => {
                        let mut merged = overlay_feature(folder_feature, Some(index_feature));
                        merged.title = index_feature.title.clone();
                        merged.epic_key = index_feature.epic_key.clone();
                        if index_feature.file_path.is_some() {
                            merged.file_path = index_feature.file_path.clone();
                        }
                        if index_feature.epic_key != folder_feature.epic_key {
                            discovered.warnings.push(format!(
                                "Feature {key} has parent epic {} in index but {} in folder (using index parent)",
                                index_feature.epic_key, folder_feature.epic_key
                            ));
                        }
                        features.insert(key.clone(), merged);
                    }
                    None => {
                        if warn {
                            discovered.warnings.push(format!(
                                "Feature {key} in index but folder missing (included anyway)"
                            ));
                        }
                        features.insert(key.clone(), index_feature.clone());
                    }
                }
            }
            if warn {
                for key in sources.folder_features.keys() {
                    if !sources.index_features.contains_key(key) {
                        discovered.warnings.push(format!(
                            "Feature {key} in folders but not in index (included anyway)"
                        ));
                    }
                }
            }

            for feature in features.values() {
                let parent_source = epics.get(&feature.epic_key).map(|epic| epic.source);
                if feature.source == DiscoverySource::Folder
                    && parent_source == Some(DiscoverySource::Index)
                {
                    discovered.warnings.push(format!(
                        "Feature {} in folders has parent epic {} known only from index (using folder parent)",
                        feature.key, feature.epic_key
                    ));
                }
            }

            discovered.epics = epics.into_values().collect();
            discovered.features = features.into_values().collect();
        }
    }

    Ok(discovered)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ImportCounts {
    epics_imported: usize,
    epics_updated: usize,
    features_imported: usize,
    features_updated: usize,
}

fn describe_update(
    title: &str,
    description: &Option<String>,
    file_path: &Option<String>,
    current_title: &str,
    current_description: &Option<String>,
    current_path: &Option<String>,
) -> ItemUpdate {
    ItemUpdate {
        title: (!title.is_empty() && title != current_title).then(|| title.to_string()),
        description: description
            .as_ref()
            .filter(|text| Some(*text) != current_description.as_ref())
            .cloned(),
        file_path: file_path
            .as_ref()
            .filter(|path| Some(*path) != current_path.as_ref())
            .cloned(),
    }
}

fn import(
    repo: &Repository<'_>,
    discovered: &Discovered,
    warnings: &mut Vec<String>,
) -> Result<ImportCounts, SyncError> {
    let mut counts = ImportCounts::default();

    for epic in &discovered.epics {
        if !keys::is_epic_key(&epic.key) {
            warnings.push(format!("Skipping epic with invalid key format: {}", epic.key));
            continue;
        }
        match repo.epic_by_key(&epic.key)? {
            Some(existing) => {
                let update = describe_update(
                    &epic.title,
                    &epic.description,
                    &epic.file_path,
                    &existing.title,
                    &existing.description,
                    &existing.file_path,
                );
                if repo.update_epic(&epic.key, &update)? {
                    counts.epics_updated += 1;
                }
            }
            None => {
                repo.insert_epic(&NewEpic {
                    key: epic.key.clone(),
                    title: epic.title.clone(),
                    description: epic.description.clone(),
                    file_path: epic.file_path.clone(),
                    status: ItemStatus::Active,
                    priority: EpicPriority::Medium,
                })?;
                counts.epics_imported += 1;
            }
        }
    }

    for feature in &discovered.features {
        if !keys::is_feature_key(&feature.key) {
            warnings.push(format!(
                "Skipping feature with invalid key format: {}",
                feature.key
            ));
            continue;
        }
        let Some(parent) = repo.epic_by_key(&feature.epic_key)? else {
            warnings.push(format!(
                "Skipping feature {}: parent epic {} was not discovered",
                feature.key, feature.epic_key
            ));
            continue;
        };
        match repo.feature_by_key(&feature.key)? {
            Some(existing) => {
                let update = describe_update(
                    &feature.title,
                    &feature.description,
                    &feature.file_path,
                    &existing.title,
                    &existing.description,
                    &existing.file_path,
                );
                let reparented = repo.reparent_feature(&feature.key, parent.id)?;
                let updated = repo.update_feature(&feature.key, &update)?;
                if reparented || updated {
                    counts.features_updated += 1;
                }
            }
            None => {
                repo.insert_feature(&NewFeature {
                    epic_id: parent.id,
                    key: feature.key.clone(),
                    title: feature.title.clone(),
                    description: feature.description.clone(),
                    file_path: feature.file_path.clone(),
                    status: ItemStatus::Active,
                })?;
                counts.features_imported += 1;
            }
        }
    }

    Ok(counts)
}

/// Runs discovery against `root` and writes what it finds through `repo`.
///
/// The caller owns the transaction, so a dry run simply rolls back.
pub fn run(
    repo: &Repository<'_>,
    root: &Path,
    index_path: &Path,
    registry: &PatternRegistry,
    strategy: DiscoveryStrategy,
) -> Result<DiscoveryReport, SyncError> {
    let index = parse_index(index_path)?;
    let folders = scan_folders(root, registry)?;
    let sources = Sources::new(root, &index, &folders);
    let conflicts = detect(&sources);
    debug!(
        event = "discovery_sources",
        index_present = index.present,
        index_epics = sources.index_epics.len(),
        folder_epics = sources.folder_epics.len(),
        conflicts = conflicts.len()
    );

    let discovered = resolve(&sources, &conflicts, strategy)?;

    let mut report = DiscoveryReport {
        folders_scanned: folders.folders_scanned,
        epics_from_index: sources.index_epics.len(),
        epics_from_folders: sources.folder_epics.len(),
        epics_discovered: discovered.epics.len(),
        features_from_index: sources.index_features.len(),
        features_from_folders: sources.folder_features.len(),
        features_discovered: discovered.features.len(),
        related_docs_cataloged: discovered
            .features
            .iter()
            .map(|feature| feature.related_docs.len())
            .sum(),
        conflicts_detected: conflicts.len(),
        conflicts,
        ..DiscoveryReport::default()
    };
    report.warnings.extend(folders.warnings);
    report.warnings.extend(discovered.warnings.iter().cloned());

    let counts = import(repo, &discovered, &mut report.warnings)?;
    report.epics_imported = counts.epics_imported;
    report.epics_updated = counts.epics_updated;
    report.features_imported = counts.features_imported;
    report.features_updated = counts.features_updated;

    Ok(report)
}

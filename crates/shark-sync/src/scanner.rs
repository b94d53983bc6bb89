use crate::folders::is_hidden;
use crate::SyncError;
use chrono::{DateTime, Utc};
use shark_core::keys;
use shark_core::patterns::{PatternMatch, PatternRegistry};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Task files larger than this are skipped.
pub const MAX_FILE_SIZE: u64 = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub epic_key: Option<String>,
    pub feature_key: Option<String>,
    pub modified_at: DateTime<Utc>,
    pub size: u64,
    pub pattern: PatternMatch,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub files: Vec<ScannedFile>,
    pub warnings: Vec<String>,
}

/// Epic and feature named by the directories between `dir` and `root`.
///
/// The nearest feature-shaped directory wins. A nested `F##-slug` directory
/// borrows its epic from the closest epic directory above it.
pub fn infer_ancestry(root: &Path, dir: &Path) -> (Option<String>, Option<String>) {
    let mut nested: Option<String> = None;

    for path in dir.ancestors() {
        if path == root || !path.starts_with(root) {
            break;
        }
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if nested.is_none() {
            if let Some(feature) = keys::feature_key_from_dir_name(&name) {
                let epic_key = keys::epic_of_feature(&feature).map(str::to_string);
                return (epic_key, Some(feature));
            }
            if let Some(number) = keys::nested_feature_from_dir_name(&name) {
                nested = Some(number.to_string());
                continue;
            }
        }
        if let Some(epic_key) = keys::epic_key_from_dir_name(&name) {
            let feature = nested.map(|number| format!("{epic_key}-{number}"));
            return (Some(epic_key), feature);
        }
    }

    (None, None)
}

/// Walks `root` for task files. Hidden directories, symlinks and oversized
/// files are skipped; everything found is returned sorted by path.
pub fn scan_task_files(root: &Path, registry: &PatternRegistry) -> Result<ScanOutcome, SyncError> {
    fs::read_dir(root).map_err(|err| SyncError::io(root, err))?;

    let mut outcome = ScanOutcome::default();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                outcome.warnings.push(format!("Failed to read entry: {err}"));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().into_owned();
        let Some(pattern) = registry.match_task_file(&file_name) else {
            continue;
        };
        let path = entry.path().to_path_buf();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                outcome
                    .warnings
                    .push(format!("Failed to stat {}: {err}", path.display()));
                continue;
            }
        };
        if metadata.len() > MAX_FILE_SIZE {
            outcome.warnings.push(format!(
                "Skipping {}: {} bytes exceeds the {MAX_FILE_SIZE} byte limit",
                path.display(),
                metadata.len()
            ));
            continue;
        }
        let modified_at = match metadata.modified() {
            Ok(modified) => DateTime::<Utc>::from(modified),
            Err(err) => {
                outcome.warnings.push(format!(
                    "Failed to read modification time of {}: {err}",
                    path.display()
                ));
                continue;
            }
        };

        let (mut epic_key, mut feature_key) = path
            .parent()
            .map(|dir| infer_ancestry(root, dir))
            .unwrap_or((None, None));
        if feature_key.is_none() {
            if let Some((epic, feature)) = keys::ancestry_from_task_filename(&file_name) {
                epic_key = Some(epic);
                feature_key = Some(feature);
            }
        }

        outcome.files.push(ScannedFile {
            path,
            file_name,
            epic_key,
            feature_key,
            modified_at,
            size: metadata.len(),
            pattern,
        });
    }

    outcome.files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry() -> PatternRegistry {
        PatternRegistry::defaults().expect("default patterns")
    }

    #[test]
    fn ancestry_prefers_the_nearest_feature_directory() {
        let root = Path::new("/docs/plan");
        assert_eq!(
            infer_ancestry(root, &root.join("E04-task-mgmt/E04-F07-sync/tasks")),
            (Some("E04".to_string()), Some("E04-F07".to_string()))
        );
        assert_eq!(
            infer_ancestry(root, &root.join("E04-task-mgmt/F02-login")),
            (Some("E04".to_string()), Some("E04-F02".to_string()))
        );
        assert_eq!(
            infer_ancestry(root, &root.join("E04-task-mgmt/notes")),
            (Some("E04".to_string()), None)
        );
        assert_eq!(infer_ancestry(root, &root.join("loose")), (None, None));
        assert_eq!(
            infer_ancestry(Path::new("/docs/E01-root"), Path::new("/docs/E01-root")),
            (None, None)
        );
    }

    #[test]
    fn scan_finds_task_files_and_skips_noise() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path();
        let feature = root.join("E01-core/E01-F02-parser/tasks");
        fs::create_dir_all(&feature).expect("feature dir");
        fs::create_dir_all(root.join(".archive")).expect("hidden dir");
        fs::write(feature.join("T-E01-F02-001-lexer.md"), "# Lexer\n").expect("task");
        fs::write(feature.join("002-grammar.md"), "# Grammar\n").expect("task");
        fs::write(feature.join("README.md"), "# Readme\n").expect("noise");
        fs::write(root.join(".archive/T-E01-F02-009-old.md"), "# Old\n").expect("hidden");
        fs::write(root.join("T-E03-F04-001-stray.md"), "# Stray\n").expect("stray");
        fs::write(
            feature.join("003-huge.md"),
            "x".repeat(MAX_FILE_SIZE as usize + 1),
        )
        .expect("huge");

        let outcome = scan_task_files(root, &registry()).expect("scan");

        let names: Vec<&str> = outcome
            .files
            .iter()
            .map(|file| file.file_name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["002-grammar.md", "T-E01-F02-001-lexer.md", "T-E03-F04-001-stray.md"]
        );
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("003-huge.md"));

        let numbered = &outcome.files[0];
        assert_eq!(numbered.feature_key.as_deref(), Some("E01-F02"));
        assert_eq!(numbered.epic_key.as_deref(), Some("E01"));
        assert_eq!(numbered.size, "# Grammar\n".len() as u64);

        let stray = &outcome.files[2];
        assert_eq!(stray.feature_key.as_deref(), Some("E03-F04"));
        assert!(stray.pattern.requires_embedded_key());
    }

    #[test]
    fn missing_root_is_fatal() {
        let dir = tempdir().expect("tempdir");
        let err = scan_task_files(&dir.path().join("nope"), &registry()).expect_err("missing");
        assert!(matches!(err, SyncError::Io { .. }));
    }
}

//! Assigns task keys to files that declare none and writes them back.

use crate::document;
use crate::write_atomic;
use shark_core::keys;
use shark_storage::{Repository, StorageError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyGenError {
    #[error("cannot infer a feature for {0}")]
    NoFeature(PathBuf),
    #[error("feature {0} does not exist in the database")]
    UnknownFeature(String),
    #[error("sequence space of feature {0} is exhausted")]
    Exhausted(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedKey {
    pub key: String,
    /// The key was persisted into the file's metadata block.
    pub written: bool,
    /// Why write-back failed, if it did. The key is still valid for this run.
    pub write_error: Option<String>,
}

/// Keeps per-run state so keys stay unique across files in one pass and each
/// file is assigned at most once.
#[derive(Debug, Default)]
pub struct KeyGenerator {
    highest: BTreeMap<String, u32>,
    assigned: BTreeMap<PathBuf, String>,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a key seen in this run so later generated keys skip past it.
    pub fn observe(&mut self, task_key: &str) {
        if let Some(parts) = keys::parse_task_key(task_key) {
            let entry = self.highest.entry(parts.feature_key).or_insert(0);
            *entry = (*entry).max(parts.sequence);
        }
    }

    pub fn generate(
        &mut self,
        repo: &Repository<'_>,
        path: &Path,
        feature_key: Option<&str>,
        dry_run: bool,
    ) -> Result<GeneratedKey, KeyGenError> {
        if let Some(key) = self.assigned.get(path) {
            return Ok(GeneratedKey {
                key: key.clone(),
                written: false,
                write_error: None,
            });
        }

        let feature_key = feature_key.ok_or_else(|| KeyGenError::NoFeature(path.to_path_buf()))?;
        if repo.feature_by_key(feature_key)?.is_none() {
            return Err(KeyGenError::UnknownFeature(feature_key.to_string()));
        }

        let stored = repo.max_task_sequence(feature_key)?.unwrap_or(0);
        let seen = self.highest.get(feature_key).copied().unwrap_or(0);
        let next = stored.max(seen) + 1;
        if next > 999 {
            return Err(KeyGenError::Exhausted(feature_key.to_string()));
        }
        let key = keys::format_task_key(feature_key, next);
        self.highest.insert(feature_key.to_string(), next);
        self.assigned.insert(path.to_path_buf(), key.clone());

        if dry_run {
            return Ok(GeneratedKey {
                key,
                written: false,
                write_error: None,
            });
        }

        let write_error = write_key(path, &key).err();
        Ok(GeneratedKey {
            written: write_error.is_none(),
            key,
            write_error,
        })
    }
}

fn write_key(path: &Path, key: &str) -> Result<(), String> {
    let content = fs::read_to_string(path).map_err(|err| err.to_string())?;
    let updated =
        document::upsert_frontmatter_field(&content, "task_key", key).map_err(|err| err.to_string())?;
    write_atomic(path, &updated).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shark_core::{EpicPriority, ItemStatus, TaskStatus};
    use shark_storage::{NewEpic, NewFeature, NewTask, SyncStore};
    use tempfile::tempdir;

    fn store_with_feature(feature_key: &str) -> (SyncStore, i64) {
        let store = SyncStore::open_in_memory().expect("store");
        let epic = store
            .repo()
            .insert_epic(&NewEpic {
                key: "E01".to_string(),
                title: "Core".to_string(),
                description: None,
                file_path: None,
                status: ItemStatus::Active,
                priority: EpicPriority::Medium,
            })
            .expect("epic");
        let feature = store
            .repo()
            .insert_feature(&NewFeature {
                epic_id: epic.id,
                key: feature_key.to_string(),
                title: "Parser".to_string(),
                description: None,
                file_path: None,
                status: ItemStatus::Active,
            })
            .expect("feature");
        (store, feature.id)
    }

    #[test]
    fn generated_keys_follow_database_and_run_state() {
        let (store, feature_id) = store_with_feature("E01-F02");
        store
            .repo()
            .insert_task(&NewTask {
                feature_id,
                key: "T-E01-F02-004".to_string(),
                title: "Existing".to_string(),
                description: None,
                file_path: None,
                status: TaskStatus::INITIAL,
                priority: 5,
            })
            .expect("task");
        let dir = tempdir().expect("tempdir");
        let first = dir.path().join("010-first.md");
        let second = dir.path().join("011-second.md");
        fs::write(&first, "# First\n").expect("write");
        fs::write(&second, "---\ntitle: Second\n---\nBody\n").expect("write");

        let mut generator = KeyGenerator::new();
        generator.observe("T-E01-F02-006");
        let repo = store.repo();
        let a = generator
            .generate(&repo, &first, Some("E01-F02"), false)
            .expect("first key");
        let b = generator
            .generate(&repo, &second, Some("E01-F02"), false)
            .expect("second key");

        assert_eq!(a.key, "T-E01-F02-007");
        assert!(a.written);
        assert_eq!(b.key, "T-E01-F02-008");
        let written = fs::read_to_string(&second).expect("read back");
        let parsed = document::parse_frontmatter(&written).expect("frontmatter");
        assert_eq!(parsed.task_key.as_deref(), Some("T-E01-F02-008"));
        assert_eq!(parsed.title.as_deref(), Some("Second"));

        let again = generator
            .generate(&repo, &first, Some("E01-F02"), false)
            .expect("repeat");
        assert_eq!(again.key, a.key);
        assert!(!again.written);
    }

    #[test]
    fn dry_run_leaves_files_untouched() {
        let (store, _) = store_with_feature("E01-F02");
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("001-task.md");
        fs::write(&path, "# Task\n").expect("write");

        let mut generator = KeyGenerator::new();
        let generated = generator
            .generate(&store.repo(), &path, Some("E01-F02"), true)
            .expect("key");

        assert_eq!(generated.key, "T-E01-F02-001");
        assert!(!generated.written);
        assert_eq!(fs::read_to_string(&path).expect("read"), "# Task\n");
    }

    #[test]
    fn unknown_or_missing_feature_is_an_error() {
        let (store, _) = store_with_feature("E01-F02");
        let mut generator = KeyGenerator::new();
        let path = Path::new("/tmp/none.md");

        let err = generator
            .generate(&store.repo(), path, None, true)
            .expect_err("no feature");
        assert!(matches!(err, KeyGenError::NoFeature(_)));

        let err = generator
            .generate(&store.repo(), path, Some("E09-F09"), true)
            .expect_err("unknown feature");
        assert!(matches!(err, KeyGenError::UnknownFeature(_)));
    }

    #[test]
    fn write_back_failure_still_yields_a_key() {
        let (store, _) = store_with_feature("E01-F02");
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("gone.prp.md");

        let mut generator = KeyGenerator::new();
        let generated = generator
            .generate(&store.repo(), &path, Some("E01-F02"), false)
            .expect("key");

        assert_eq!(generated.key, "T-E01-F02-001");
        assert!(!generated.written);
        assert!(generated.write_error.is_some());
    }
}

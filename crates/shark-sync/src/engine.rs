//! The sync pipeline: discovery, scan, filter, parse, fetch, apply, cleanup.
//!
//! Every database write of a run happens inside one transaction. A dry run
//! performs the same writes so later phases observe earlier ones, then rolls
//! back. Cancellation and fatal errors roll back as well.

use crate::conflict::{classify_change, detect_conflicts, FieldConflict, SyncDecision};
use crate::discovery;
use crate::document::{extract_metadata, Frontmatter, ParsedMetadata};
use crate::incremental::{filter_changed, FilterOptions};
use crate::index::DEFAULT_INDEX_FILE;
use crate::keygen::{KeyGenError, KeyGenerator};
use crate::report::SyncReport;
use crate::resolver::{resolve_conflicts, ConflictPrompt, LinePrompt};
use crate::scanner::{scan_task_files, ScannedFile};
use crate::SyncError;
use chrono::{DateTime, Utc};
use shark_core::patterns::PatternRegistry;
use shark_core::{
    keys, ConflictStrategy, DiscoveryStrategy, EpicPriority, Feature, ItemStatus, Task,
    TaskStatus, DEFAULT_TASK_PRIORITY,
};
use shark_storage::{ItemUpdate, NewEpic, NewFeature, NewTask, NewTaskHistory, Repository, SyncStore};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const HISTORY_AGENT: &str = "sync";

/// Shared flag a caller flips to stop a run at its next phase boundary.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Discovering,
    Scanning,
    Filtering,
    Parsing,
    Fetching,
    Applying,
    CleaningUp,
    Committing,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Discovering => "discovering",
            SyncPhase::Scanning => "scanning",
            SyncPhase::Filtering => "filtering",
            SyncPhase::Parsing => "parsing",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Applying => "applying",
            SyncPhase::CleaningUp => "cleaning up",
            SyncPhase::Committing => "committing",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed for the engine's lifetime.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub registry: PatternRegistry,
    /// Previous successful sync. `None` disables incremental filtering.
    pub last_sync: Option<DateTime<Utc>>,
    /// Index file name looked up inside the docs root.
    pub index_file: String,
}

impl EngineConfig {
    pub fn new(registry: PatternRegistry) -> Self {
        Self {
            registry,
            last_sync: None,
            index_file: DEFAULT_INDEX_FILE.to_string(),
        }
    }

    pub fn with_last_sync(mut self, last_sync: Option<DateTime<Utc>>) -> Self {
        self.last_sync = last_sync;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(PatternRegistry::defaults().expect("built-in patterns compile"))
    }
}

/// Per-run switches.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub root: PathBuf,
    pub dry_run: bool,
    pub strategy: ConflictStrategy,
    pub discovery_strategy: DiscoveryStrategy,
    pub discovery_enabled: bool,
    /// Overrides `<root>/<index_file>`.
    pub index_path: Option<PathBuf>,
    pub create_missing: bool,
    pub cleanup: bool,
    pub force_full_scan: bool,
    pub cancellation: Option<CancellationToken>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("docs/plan"),
            dry_run: false,
            strategy: ConflictStrategy::default(),
            discovery_strategy: DiscoveryStrategy::default(),
            discovery_enabled: false,
            index_path: None,
            create_missing: false,
            cleanup: false,
            force_full_scan: false,
            cancellation: None,
        }
    }
}

/// A task file with a settled key, ready to apply.
#[derive(Debug, Clone)]
struct TaskDocument {
    key: String,
    metadata: ParsedMetadata,
}

impl TaskDocument {
    fn path(&self) -> String {
        self.metadata.file_path.to_string_lossy().into_owned()
    }
}

pub struct SyncEngine {
    config: EngineConfig,
}

impl SyncEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs a sync, asking on stdin/stdout when the strategy is `manual`.
    pub fn sync(&self, store: &mut SyncStore, options: &SyncOptions) -> Result<SyncReport, SyncError> {
        let mut prompt = LinePrompt::stdio();
        self.sync_with_prompt(store, options, &mut prompt)
    }

    pub fn sync_with_prompt(
        &self,
        store: &mut SyncStore,
        options: &SyncOptions,
        prompt: &mut dyn ConflictPrompt,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport {
            dry_run: options.dry_run,
            ..SyncReport::default()
        };
        info!(
            event = "sync_started",
            root = %options.root.display(),
            dry_run = options.dry_run,
            strategy = %options.strategy,
            discovery = options.discovery_enabled
        );

        let tx = store.transaction()?;
        let outcome = self
            .run(tx.repo(), options, prompt, &mut report)
            .and_then(|()| self.checkpoint(options, SyncPhase::Committing));

        match outcome {
            Ok(()) if options.dry_run => {
                tx.rollback()?;
                debug!(event = "sync_rolled_back", reason = "dry_run");
            }
            Ok(()) => tx.commit()?,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(event = "sync_rollback_failed", error = %rollback_err);
                }
                warn!(event = "sync_failed", error = %err);
                return Err(err);
            }
        }

        info!(
            event = "sync_finished",
            files_scanned = report.files_scanned,
            imported = report.tasks_imported,
            updated = report.tasks_updated,
            deleted = report.tasks_deleted,
            conflicts = report.conflicts_resolved,
            warnings = report.warnings.len(),
            errors = report.errors.len()
        );
        Ok(report)
    }

    fn checkpoint(&self, options: &SyncOptions, phase: SyncPhase) -> Result<(), SyncError> {
        if options
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            return Err(SyncError::Cancelled(phase));
        }
        debug!(event = "sync_phase", phase = %phase);
        Ok(())
    }

    fn run(
        &self,
        repo: Repository<'_>,
        options: &SyncOptions,
        prompt: &mut dyn ConflictPrompt,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let registry = &self.config.registry;
        // Stored task paths are absolute no matter how the root was spelled.
        let root =
            fs::canonicalize(&options.root).map_err(|err| SyncError::io(&options.root, err))?;

        if options.discovery_enabled {
            self.checkpoint(options, SyncPhase::Discovering)?;
            let index_path = options
                .index_path
                .clone()
                .unwrap_or_else(|| root.join(&self.config.index_file));
            let discovered = discovery::run(
                &repo,
                &root,
                &index_path,
                registry,
                options.discovery_strategy,
            )?;
            report.warnings.extend(discovered.warnings.iter().cloned());
            report.discovery = Some(discovered);
        }

        self.checkpoint(options, SyncPhase::Scanning)?;
        let scan = scan_task_files(&root, registry)?;
        report.files_scanned = scan.files.len();
        report.warnings.extend(scan.warnings);
        let scanned_paths: BTreeSet<String> = scan
            .files
            .iter()
            .map(|file| file.path.to_string_lossy().into_owned())
            .collect();

        self.checkpoint(options, SyncPhase::Filtering)?;
        let filter_options = FilterOptions {
            last_sync: self.config.last_sync,
            force_full_scan: options.force_full_scan,
        };
        let known_paths = repo.task_file_paths()?;
        let (files, filtered) = filter_changed(scan.files, &known_paths, filter_options, Utc::now());
        report.files_filtered = filtered.kept;
        report.files_skipped = filtered.skipped;
        report.warnings.extend(filtered.warnings);

        self.checkpoint(options, SyncPhase::Parsing)?;
        let documents = self.parse_files(&repo, &files, options, report)?;

        self.checkpoint(options, SyncPhase::Fetching)?;
        let task_keys: Vec<String> = documents.iter().map(|doc| doc.key.clone()).collect();
        let existing = repo.tasks_by_keys(&task_keys)?;

        self.checkpoint(options, SyncPhase::Applying)?;
        // A full scan only disables the filter; the change quadrants still use
        // the previous sync time.
        let last_sync = self.config.last_sync;
        for doc in &documents {
            match existing.get(&doc.key) {
                None => self.import_task(&repo, doc, options, report)?,
                Some(record) => {
                    self.update_task(&repo, doc, record, options.strategy, last_sync, prompt, report)?
                }
            }
        }

        self.checkpoint(options, SyncPhase::CleaningUp)?;
        self.handle_orphans(&repo, &scanned_paths, options.cleanup, report)?;

        Ok(())
    }

    fn parse_files(
        &self,
        repo: &Repository<'_>,
        files: &[ScannedFile],
        options: &SyncOptions,
        report: &mut SyncReport,
    ) -> Result<Vec<TaskDocument>, SyncError> {
        let mut keygen = KeyGenerator::new();
        let mut parsed: Vec<(&ScannedFile, Frontmatter, Option<String>)> = Vec::new();

        // Declared keys are observed up front so generated ones never collide
        // with a file that appears later in path order.
        for file in files {
            *report
                .pattern_matches
                .entry(file.pattern.pattern.clone())
                .or_insert(0) += 1;
            let content = match fs::read_to_string(&file.path) {
                Ok(content) => content,
                Err(err) => {
                    report.warn(format!("Failed to read file {}: {err}", file.path.display()));
                    continue;
                }
            };
            let (frontmatter, problem) = extract_metadata(&content);
            if let Some(problem) = problem {
                report.warn(format!("{}: {problem}", file.path.display()));
            }
            let key = frontmatter
                .task_key
                .clone()
                .or_else(|| file.pattern.embedded_task_key());
            if let Some(key) = &key {
                keygen.observe(key);
            }
            parsed.push((file, frontmatter, key));
        }

        let mut claimed: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut documents = Vec::with_capacity(parsed.len());
        for (file, frontmatter, key) in parsed {
            let key = match key {
                Some(key) => key,
                None if file.pattern.requires_embedded_key() => {
                    report.warn(format!(
                        "Missing task_key in {} (pattern expects embedded key)",
                        file.path.display()
                    ));
                    continue;
                }
                None => match self.generate_key(repo, &mut keygen, file, options, report)? {
                    Some(key) => key,
                    None => continue,
                },
            };
            if !keys::is_task_key(&key) {
                report.warn(format!(
                    "Could not determine task_key for {}: {key} is not a valid task key",
                    file.path.display()
                ));
                continue;
            }
            if let Some(first) = claimed.get(&key) {
                report.warn(format!(
                    "Duplicate task_key {key} in {} (already claimed by {})",
                    file.path.display(),
                    first.display()
                ));
                continue;
            }
            claimed.insert(key.clone(), file.path.clone());

            documents.push(TaskDocument {
                metadata: ParsedMetadata {
                    task_key: Some(key.clone()),
                    title: frontmatter.title.unwrap_or_default(),
                    description: frontmatter.description,
                    file_path: file.path.clone(),
                    modified_at: file.modified_at,
                },
                key,
            });
        }

        Ok(documents)
    }

    /// Assigns a key to a file that declares none. Storage failures are fatal;
    /// anything else drops the file with a warning.
    fn generate_key(
        &self,
        repo: &Repository<'_>,
        keygen: &mut KeyGenerator,
        file: &ScannedFile,
        options: &SyncOptions,
        report: &mut SyncReport,
    ) -> Result<Option<String>, SyncError> {
        if let Some(feature_key) = file.feature_key.as_deref() {
            if options.create_missing
                && !options.discovery_enabled
                && repo.feature_by_key(feature_key)?.is_none()
            {
                if let Some(epic_key) = keys::epic_of_feature(feature_key) {
                    self.create_missing_feature(repo, epic_key, feature_key)?;
                }
            }
        }

        match keygen.generate(repo, &file.path, file.feature_key.as_deref(), options.dry_run) {
            Ok(generated) => {
                report.keys_generated += 1;
                if let Some(err) = &generated.write_error {
                    report.warn(format!(
                        "Generated key {} for {} but couldn't write to file: {err}",
                        generated.key,
                        file.path.display()
                    ));
                }
                debug!(
                    event = "task_key_generated",
                    key = %generated.key,
                    path = %file.path.display(),
                    written = generated.written
                );
                Ok(Some(generated.key))
            }
            Err(KeyGenError::Storage(err)) => Err(err.into()),
            Err(err) => {
                report.warn(format!(
                    "Failed to generate task_key for {}: {err}",
                    file.path.display()
                ));
                Ok(None)
            }
        }
    }

    fn create_missing_feature(
        &self,
        repo: &Repository<'_>,
        epic_key: &str,
        feature_key: &str,
    ) -> Result<Feature, SyncError> {
        let epic = match repo.epic_by_key(epic_key)? {
            Some(epic) => epic,
            None => repo.insert_epic(&NewEpic {
                key: epic_key.to_string(),
                title: format!("Auto-created epic {epic_key}"),
                description: None,
                file_path: None,
                status: ItemStatus::Active,
                priority: EpicPriority::Medium,
            })?,
        };
        let feature = repo.insert_feature(&NewFeature {
            epic_id: epic.id,
            key: feature_key.to_string(),
            title: format!("Auto-created feature {feature_key}"),
            description: None,
            file_path: None,
            status: ItemStatus::Active,
        })?;
        info!(event = "feature_auto_created", epic = epic_key, feature = feature_key);
        Ok(feature)
    }

    fn import_task(
        &self,
        repo: &Repository<'_>,
        doc: &TaskDocument,
        options: &SyncOptions,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let Some(parts) = keys::parse_task_key(&doc.key) else {
            report.error(format!("invalid task key format {}", doc.key));
            return Ok(());
        };

        let feature = match repo.feature_by_key(&parts.feature_key)? {
            Some(feature) => feature,
            None if options.discovery_enabled => {
                report.error(format!(
                    "feature {} not found (task references undiscovered feature - check epic-index.md or folder structure)",
                    parts.feature_key
                ));
                return Ok(());
            }
            None if options.create_missing => {
                self.create_missing_feature(repo, &parts.epic_key, &parts.feature_key)?
            }
            None => {
                report.error(format!(
                    "feature {} not found (use --create-missing to auto-create)",
                    parts.feature_key
                ));
                return Ok(());
            }
        };

        let task = repo.insert_task(&NewTask {
            feature_id: feature.id,
            key: doc.key.clone(),
            title: doc.metadata.title.clone(),
            description: doc.metadata.description.clone(),
            file_path: Some(doc.path()),
            status: TaskStatus::INITIAL,
            priority: DEFAULT_TASK_PRIORITY,
        })?;
        self.record_history(repo, &task, "Imported from file".to_string(), report);
        report.tasks_imported += 1;
        debug!(event = "task_imported", key = %task.key, path = %doc.path());
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn update_task(
        &self,
        repo: &Repository<'_>,
        doc: &TaskDocument,
        record: &Task,
        strategy: ConflictStrategy,
        last_sync: Option<DateTime<Utc>>,
        prompt: &mut dyn ConflictPrompt,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let path = doc.path();
        let decision = classify_change(doc.metadata.modified_at, record.updated_at, last_sync);

        let (resolved, conflicts): (Task, Vec<FieldConflict>) = match decision {
            SyncDecision::Skip => {
                // A rename keeps the old mtime, so the location may still be stale.
                let mut resolved = record.clone();
                resolved.file_path = Some(path);
                (resolved, Vec::new())
            }
            SyncDecision::FileUpdate => {
                let mut resolved = record.clone();
                if !doc.metadata.title.is_empty() {
                    resolved.title = doc.metadata.title.clone();
                }
                if doc.metadata.description.is_some() {
                    resolved.description = doc.metadata.description.clone();
                }
                resolved.file_path = Some(path);
                (resolved, Vec::new())
            }
            SyncDecision::Compare => {
                let conflicts = detect_conflicts(&doc.metadata, record);
                let mut resolved = if conflicts.is_empty() {
                    record.clone()
                } else {
                    resolve_conflicts(strategy, &conflicts, &doc.metadata, record, prompt)?
                };
                if resolved.description.is_none() {
                    resolved.description = doc.metadata.description.clone();
                }
                (resolved, conflicts)
            }
        };

        let update = changed_fields(record, &resolved);
        if update.is_empty() && conflicts.is_empty() {
            return Ok(());
        }
        repo.update_task(&record.key, &update)?;

        let note = format!("Updated from file ({} conflicts resolved)", conflicts.len());
        self.record_history(repo, record, note, report);
        report.tasks_updated += 1;
        report.conflicts_resolved += conflicts.len();
        report.conflicts.extend(conflicts);
        debug!(event = "task_updated", key = %record.key, decision = ?decision);
        Ok(())
    }

    /// A failed history insert becomes a report warning.
    fn record_history(&self, repo: &Repository<'_>, task: &Task, note: String, report: &mut SyncReport) {
        let entry = NewTaskHistory {
            task_id: task.id,
            old_status: Some(task.status),
            new_status: task.status,
            agent: Some(HISTORY_AGENT.to_string()),
            notes: Some(note),
        };
        if let Err(err) = repo.insert_task_history(&entry) {
            report.warn(format!("Failed to create history for task {}: {err}", task.key));
        }
    }

    fn handle_orphans(
        &self,
        repo: &Repository<'_>,
        scanned_paths: &BTreeSet<String>,
        cleanup: bool,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        for task in repo.tasks_with_file_path()? {
            let Some(path) = task.file_path.as_deref() else {
                continue;
            };
            if scanned_paths.contains(path) || Path::new(path).exists() {
                continue;
            }
            if cleanup {
                if repo.delete_task(&task.key)? {
                    report.tasks_deleted += 1;
                    info!(event = "orphan_deleted", key = %task.key, path = path);
                }
            } else {
                report.warn(format!(
                    "Orphaned task {}: file {path} no longer exists (use --cleanup to delete)",
                    task.key
                ));
            }
        }
        Ok(())
    }
}

/// Columns of `resolved` that differ from `record`. Descriptions are only ever
/// set, never cleared.
fn changed_fields(record: &Task, resolved: &Task) -> ItemUpdate {
    ItemUpdate {
        title: (resolved.title != record.title).then(|| resolved.title.clone()),
        description: resolved
            .description
            .as_ref()
            .filter(|text| Some(*text) != record.description.as_ref())
            .cloned(),
        file_path: resolved
            .file_path
            .as_ref()
            .filter(|path| Some(*path) != record.file_path.as_ref())
            .cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn task() -> Task {
        Task {
            id: 1,
            feature_id: 1,
            key: "T-E01-F01-001".to_string(),
            title: "Title".to_string(),
            description: Some("Text".to_string()),
            status: TaskStatus::InProgress,
            priority: 5,
            assigned_agent: None,
            file_path: Some("/docs/a.md".to_string()),
            created_at: ts(1),
            updated_at: ts(2),
        }
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let handle = token.clone();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancelled_checkpoint_names_the_phase() {
        let engine = SyncEngine::new(EngineConfig::default());
        let token = CancellationToken::new();
        token.cancel();
        let options = SyncOptions {
            cancellation: Some(token),
            ..SyncOptions::default()
        };
        let err = engine
            .checkpoint(&options, SyncPhase::Filtering)
            .expect_err("cancelled");
        assert_eq!(err.to_string(), "sync cancelled before filtering");
    }

    #[test]
    fn changed_fields_ignores_identical_columns() {
        let record = task();
        assert!(changed_fields(&record, &record.clone()).is_empty());

        let mut resolved = record.clone();
        resolved.title = "Renamed".to_string();
        resolved.description = None;
        resolved.file_path = Some("/docs/b.md".to_string());
        let update = changed_fields(&record, &resolved);
        assert_eq!(update.title.as_deref(), Some("Renamed"));
        assert_eq!(update.description, None);
        assert_eq!(update.file_path.as_deref(), Some("/docs/b.md"));
    }

    #[test]
    fn defaults_match_the_documented_behavior() {
        let options = SyncOptions::default();
        assert_eq!(options.root, PathBuf::from("docs/plan"));
        assert_eq!(options.strategy, ConflictStrategy::FileWins);
        assert_eq!(options.discovery_strategy, DiscoveryStrategy::Merge);
        assert!(!options.dry_run && !options.cleanup && !options.create_missing);
        assert_eq!(EngineConfig::default().index_file, "epic-index.md");
    }
}

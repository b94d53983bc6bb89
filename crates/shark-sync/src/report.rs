use crate::conflict::FieldConflict;
use crate::discovery::DiscoveryConflict;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub folders_scanned: usize,
    pub epics_from_index: usize,
    pub epics_from_folders: usize,
    pub epics_discovered: usize,
    pub features_from_index: usize,
    pub features_from_folders: usize,
    pub features_discovered: usize,
    pub epics_imported: usize,
    pub epics_updated: usize,
    pub features_imported: usize,
    pub features_updated: usize,
    pub related_docs_cataloged: usize,
    pub conflicts_detected: usize,
    pub conflicts: Vec<DiscoveryConflict>,
    pub warnings: Vec<String>,
}

/// Outcome of one sync run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub dry_run: bool,
    pub files_scanned: usize,
    /// Files kept by the incremental filter.
    pub files_filtered: usize,
    /// Files the incremental filter judged unchanged.
    pub files_skipped: usize,
    pub tasks_imported: usize,
    pub tasks_updated: usize,
    pub tasks_deleted: usize,
    pub conflicts_resolved: usize,
    pub keys_generated: usize,
    pub pattern_matches: BTreeMap<String, usize>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub conflicts: Vec<FieldConflict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryReport>,
}

impl SyncReport {
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Human-readable summary printed by the CLI.
pub fn format_report(report: &SyncReport) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_report(&mut out, report);
    out
}

fn write_report(out: &mut String, report: &SyncReport) -> fmt::Result {
    if report.dry_run {
        out.push_str("DRY-RUN MODE: No changes will be made\n\n");
    }

    writeln!(out, "Sync Summary:")?;
    writeln!(out, "  Files scanned:      {}", report.files_scanned)?;
    if report.files_skipped > 0 {
        writeln!(out, "  Files unchanged:    {}", report.files_skipped)?;
    }
    writeln!(out, "  Tasks imported:     {}", report.tasks_imported)?;
    writeln!(out, "  Tasks updated:      {}", report.tasks_updated)?;
    writeln!(out, "  Conflicts resolved: {}", report.conflicts_resolved)?;
    if report.tasks_deleted > 0 {
        writeln!(out, "  Tasks deleted:      {}", report.tasks_deleted)?;
    }
    if report.keys_generated > 0 {
        writeln!(out, "  Keys generated:     {}", report.keys_generated)?;
    }
    writeln!(out, "  Warnings:           {}", report.warnings.len())?;
    writeln!(out, "  Errors:             {}", report.errors.len())?;

    if let Some(discovery) = &report.discovery {
        writeln!(out, "\nDiscovery:")?;
        writeln!(out, "  Folders scanned:    {}", discovery.folders_scanned)?;
        writeln!(
            out,
            "  Epics:              {} discovered ({} index, {} folders), {} imported, {} updated",
            discovery.epics_discovered,
            discovery.epics_from_index,
            discovery.epics_from_folders,
            discovery.epics_imported,
            discovery.epics_updated
        )?;
        writeln!(
            out,
            "  Features:           {} discovered ({} index, {} folders), {} imported, {} updated",
            discovery.features_discovered,
            discovery.features_from_index,
            discovery.features_from_folders,
            discovery.features_imported,
            discovery.features_updated
        )?;
        writeln!(out, "  Related documents:  {}", discovery.related_docs_cataloged)?;
        writeln!(out, "  Conflicts detected: {}", discovery.conflicts_detected)?;
    }

    if !report.conflicts.is_empty() {
        writeln!(out, "\nConflicts:")?;
        for conflict in &report.conflicts {
            writeln!(out, "  {}:", conflict.task_key)?;
            writeln!(out, "    Field:    {}", conflict.field)?;
            writeln!(out, "    Database: {:?}", conflict.database_value)?;
            writeln!(out, "    File:     {:?}", conflict.file_value)?;
        }
    }

    if !report.warnings.is_empty() {
        writeln!(out, "\nWarnings:")?;
        for warning in &report.warnings {
            writeln!(out, "  - {warning}")?;
        }
    }

    if !report.errors.is_empty() {
        writeln!(out, "\nErrors:")?;
        for error in &report.errors {
            writeln!(out, "  - {error}")?;
        }
    }

    Ok(())
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_report(self))
    }
}

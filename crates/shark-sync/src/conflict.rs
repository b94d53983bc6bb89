//! Field-level disagreement between a task file and its database record.

use crate::document::ParsedMetadata;
use crate::incremental::modified_since;
use chrono::{DateTime, Utc};
use serde::Serialize;
use shark_core::Task;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictField {
    Title,
    Description,
    FilePath,
}

impl ConflictField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictField::Title => "title",
            ConflictField::Description => "description",
            ConflictField::FilePath => "file_path",
        }
    }
}

impl fmt::Display for ConflictField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldConflict {
    pub task_key: String,
    pub field: ConflictField,
    pub database_value: String,
    pub file_value: String,
}

/// Compares the fields a document is allowed to own. Status, priority and
/// agent never take part.
pub fn detect_conflicts(file: &ParsedMetadata, record: &Task) -> Vec<FieldConflict> {
    let mut conflicts = Vec::new();
    let conflict = |field, database_value: &str, file_value: &str| FieldConflict {
        task_key: record.key.clone(),
        field,
        database_value: database_value.to_string(),
        file_value: file_value.to_string(),
    };

    if !file.title.is_empty() && file.title != record.title {
        conflicts.push(conflict(ConflictField::Title, &record.title, &file.title));
    }

    if let (Some(file_description), Some(database_description)) =
        (&file.description, &record.description)
    {
        if file_description != database_description {
            conflicts.push(conflict(
                ConflictField::Description,
                database_description,
                file_description,
            ));
        }
    }

    let path = file.file_path.to_string_lossy();
    if record.file_path.as_deref() != Some(path.as_ref()) {
        conflicts.push(conflict(
            ConflictField::FilePath,
            record.file_path.as_deref().unwrap_or(""),
            &path,
        ));
    }

    conflicts
}

/// What to do with an existing task once both sides' modification times are
/// known relative to the last sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// Nothing relevant changed, or only the database did.
    Skip,
    /// Only the file changed: take its values without counting conflicts.
    FileUpdate,
    /// Both sides may have changed: compare fields and resolve.
    Compare,
}

pub fn classify_change(
    file_modified: DateTime<Utc>,
    record_updated: DateTime<Utc>,
    last_sync: Option<DateTime<Utc>>,
) -> SyncDecision {
    let Some(last_sync) = last_sync else {
        return SyncDecision::Compare;
    };
    match (
        modified_since(file_modified, last_sync),
        modified_since(record_updated, last_sync),
    ) {
        (false, _) => SyncDecision::Skip,
        (true, false) => SyncDecision::FileUpdate,
        (true, true) => SyncDecision::Compare,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use shark_core::TaskStatus;
    use std::path::PathBuf;

    fn ts(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, min, 0)
            .single()
            .expect("valid timestamp")
    }

    fn record() -> Task {
        Task {
            id: 1,
            feature_id: 1,
            key: "T-E01-F01-001".to_string(),
            title: "Stored title".to_string(),
            description: Some("Stored description".to_string()),
            status: TaskStatus::InProgress,
            priority: 3,
            assigned_agent: Some("agent-7".to_string()),
            file_path: Some("/docs/T-E01-F01-001.md".to_string()),
            created_at: ts(8, 0),
            updated_at: ts(9, 0),
        }
    }

    fn parsed(title: &str, description: Option<&str>, path: &str) -> ParsedMetadata {
        ParsedMetadata {
            task_key: Some("T-E01-F01-001".to_string()),
            title: title.to_string(),
            description: description.map(str::to_string),
            file_path: PathBuf::from(path),
            modified_at: ts(10, 0),
        }
    }

    #[test]
    fn identical_sides_have_no_conflicts() {
        let file = parsed(
            "Stored title",
            Some("Stored description"),
            "/docs/T-E01-F01-001.md",
        );
        assert!(detect_conflicts(&file, &record()).is_empty());
    }

    #[test]
    fn empty_file_title_and_missing_description_are_not_conflicts() {
        let file = parsed("", None, "/docs/T-E01-F01-001.md");
        assert!(detect_conflicts(&file, &record()).is_empty());

        let mut bare = record();
        bare.description = None;
        let file = parsed("Stored title", Some("New text"), "/docs/T-E01-F01-001.md");
        assert!(detect_conflicts(&file, &bare).is_empty());
    }

    #[test]
    fn differing_fields_are_reported_in_order() {
        let file = parsed("Renamed", Some("Rewritten"), "/docs/moved.md");
        let conflicts = detect_conflicts(&file, &record());
        let fields: Vec<ConflictField> = conflicts.iter().map(|c| c.field).collect();
        assert_eq!(
            fields,
            vec![
                ConflictField::Title,
                ConflictField::Description,
                ConflictField::FilePath
            ]
        );
        assert_eq!(conflicts[0].database_value, "Stored title");
        assert_eq!(conflicts[0].file_value, "Renamed");

        let mut unpathed = record();
        unpathed.file_path = None;
        let file = parsed("Stored title", None, "/docs/T-E01-F01-001.md");
        let conflicts = detect_conflicts(&file, &unpathed);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].database_value, "");
    }

    #[test]
    fn change_quadrants() {
        let last_sync = Some(ts(12, 0));
        let old = ts(10, 0);
        let new = ts(13, 0);
        assert_eq!(classify_change(old, old, last_sync), SyncDecision::Skip);
        assert_eq!(classify_change(new, old, last_sync), SyncDecision::FileUpdate);
        assert_eq!(classify_change(old, new, last_sync), SyncDecision::Skip);
        assert_eq!(classify_change(new, new, last_sync), SyncDecision::Compare);
        assert_eq!(classify_change(old, old, None), SyncDecision::Compare);
        // Inside the skew window counts as modified.
        assert_eq!(
            classify_change(ts(11, 59), old, last_sync),
            SyncDecision::FileUpdate
        );
    }
}

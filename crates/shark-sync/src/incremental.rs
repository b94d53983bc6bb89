//! Modification-time filter for incremental runs.

use crate::scanner::ScannedFile;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;

/// Tolerance for clocks that disagree between the machine that edited a file
/// and the one running the sync.
pub const CLOCK_SKEW_SECS: i64 = 60;

pub fn clock_skew() -> Duration {
    Duration::seconds(CLOCK_SKEW_SECS)
}

/// True when `modified_at` falls after the skew-adjusted sync point.
pub fn modified_since(modified_at: DateTime<Utc>, last_sync: DateTime<Utc>) -> bool {
    modified_at > last_sync - clock_skew()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FilterOptions {
    pub last_sync: Option<DateTime<Utc>>,
    pub force_full_scan: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterResult {
    pub total: usize,
    pub kept: usize,
    pub skipped: usize,
    pub new_files: usize,
    pub warnings: Vec<String>,
}

/// Splits off the files that may have changed since the last sync.
///
/// `known_paths` holds every file path the database already tracks; anything
/// outside it is new and always kept.
pub fn filter_changed(
    files: Vec<ScannedFile>,
    known_paths: &BTreeSet<String>,
    options: FilterOptions,
    now: DateTime<Utc>,
) -> (Vec<ScannedFile>, FilterResult) {
    let mut result = FilterResult {
        total: files.len(),
        ..FilterResult::default()
    };

    for file in &files {
        if file.modified_at > now + clock_skew() {
            result.warnings.push(format!(
                "File {} has a modification time in the future, possible clock skew",
                file.path.display()
            ));
        }
    }

    let last_sync = match options.last_sync {
        Some(last_sync) if !options.force_full_scan => last_sync,
        _ => {
            result.kept = files.len();
            return (files, result);
        }
    };

    let mut kept = Vec::with_capacity(files.len());
    for file in files {
        let path = file.path.to_string_lossy();
        if !known_paths.contains(path.as_ref()) {
            result.new_files += 1;
            kept.push(file);
        } else if modified_since(file.modified_at, last_sync) {
            kept.push(file);
        } else {
            result.skipped += 1;
        }
    }
    result.kept = kept.len();

    (kept, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use shark_core::patterns::PatternRegistry;
    use std::path::PathBuf;

    fn ts(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, min, sec)
            .single()
            .expect("valid timestamp")
    }

    fn file(name: &str, modified_at: DateTime<Utc>) -> ScannedFile {
        let registry = PatternRegistry::defaults().expect("patterns");
        ScannedFile {
            path: PathBuf::from(format!("/docs/{name}")),
            file_name: name.to_string(),
            epic_key: None,
            feature_key: None,
            modified_at,
            size: 10,
            pattern: registry.match_task_file(name).expect("task pattern"),
        }
    }

    fn known(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| format!("/docs/{name}")).collect()
    }

    #[test]
    fn no_last_sync_or_forced_scan_keeps_everything() {
        let files = vec![file("001-a.md", ts(9, 0, 0)), file("002-b.md", ts(9, 0, 0))];
        let (kept, result) = filter_changed(
            files.clone(),
            &known(&["001-a.md", "002-b.md"]),
            FilterOptions::default(),
            ts(12, 0, 0),
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(result.kept, 2);

        let (kept, result) = filter_changed(
            files,
            &known(&["001-a.md", "002-b.md"]),
            FilterOptions {
                last_sync: Some(ts(11, 0, 0)),
                force_full_scan: true,
            },
            ts(12, 0, 0),
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(result.skipped, 0);
    }

    #[test]
    fn skew_window_keeps_files_just_before_last_sync() {
        let last_sync = ts(10, 0, 0);
        let files = vec![
            file("001-old.md", ts(9, 58, 59)),
            file("002-edge.md", ts(9, 59, 30)),
            file("003-new-on-disk.md", ts(8, 0, 0)),
            file("004-recent.md", ts(10, 30, 0)),
        ];
        let (kept, result) = filter_changed(
            files,
            &known(&["001-old.md", "002-edge.md", "004-recent.md"]),
            FilterOptions {
                last_sync: Some(last_sync),
                force_full_scan: false,
            },
            ts(11, 0, 0),
        );

        let names: Vec<&str> = kept.iter().map(|file| file.file_name.as_str()).collect();
        assert_eq!(names, vec!["002-edge.md", "003-new-on-disk.md", "004-recent.md"]);
        assert_eq!(result.total, 4);
        assert_eq!(result.kept, 3);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.new_files, 1);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn future_modification_times_are_flagged() {
        let now = ts(10, 0, 0);
        let files = vec![file("001-ahead.md", ts(10, 5, 0)), file("002-ok.md", ts(10, 0, 30))];
        let (_, result) = filter_changed(files, &BTreeSet::new(), FilterOptions::default(), now);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("001-ahead.md"));
    }
}

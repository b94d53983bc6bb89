//! Shapes of the human-readable epic, feature and task keys.
//!
//! Epics are `E##` (or one of the special epics such as `tech-debt`), features
//! are `E##-F##` with an optional project segment (`E##-P##-F##`), and tasks are
//! `T-<feature>-###`.

use regex::Regex;
use std::sync::OnceLock;

pub const SPECIAL_EPICS: [&str; 3] = ["tech-debt", "bugs", "change-cards"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskKeyParts {
    pub epic_key: String,
    pub feature_key: String,
    pub sequence: u32,
}

fn task_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^T-(E\d{2})-((?:P\d{2}-)?F\d{2})-(\d{3})$").expect("valid regex")
    })
}

fn feature_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(E\d{2})-(?:P\d{2}-)?F\d{2}$").expect("valid regex"))
}

fn feature_dir_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(E\d{2})(-P\d{2})?-(F\d{2})(?:-|$)").expect("valid regex"))
}

fn nested_feature_dir_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(F\d{2})-[a-z0-9-]+$").expect("valid regex"))
}

fn epic_dir_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(E\d{2})-[a-z0-9-]+$").expect("valid regex"))
}

fn epic_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^E\d{2}$").expect("valid regex"))
}

fn task_filename_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^T-(E\d{2})-((?:P\d{2}-)?F\d{2})-\d{3}").expect("valid regex"))
}

pub fn is_epic_key(key: &str) -> bool {
    epic_key_regex().is_match(key) || SPECIAL_EPICS.contains(&key)
}

pub fn is_feature_key(key: &str) -> bool {
    feature_key_regex().is_match(key)
}

pub fn is_task_key(key: &str) -> bool {
    task_key_regex().is_match(key)
}

pub fn parse_task_key(key: &str) -> Option<TaskKeyParts> {
    let caps = task_key_regex().captures(key.trim())?;
    let epic_key = caps.get(1)?.as_str().to_string();
    let feature_key = format!("{epic_key}-{}", caps.get(2)?.as_str());
    let sequence = caps.get(3)?.as_str().parse().ok()?;
    Some(TaskKeyParts {
        epic_key,
        feature_key,
        sequence,
    })
}

pub fn format_task_key(feature_key: &str, sequence: u32) -> String {
    format!("T-{feature_key}-{sequence:03}")
}

/// Epic key embedded at the front of a feature key (`E04-F07` -> `E04`).
pub fn epic_of_feature(feature_key: &str) -> Option<&str> {
    feature_key_regex()
        .captures(feature_key)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Feature key named by a directory such as `E04-F07-sync` or `E04-P01-F02`.
pub fn feature_key_from_dir_name(name: &str) -> Option<String> {
    let caps = feature_dir_regex().captures(name)?;
    let project = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    Some(format!("{}{project}-{}", &caps[1], &caps[3]))
}

/// Feature number of a nested `F##-slug` directory, whose epic comes from an ancestor.
pub fn nested_feature_from_dir_name(name: &str) -> Option<&str> {
    nested_feature_dir_regex()
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Epic key named by a directory such as `E04-task-mgmt` or `tech-debt`.
pub fn epic_key_from_dir_name(name: &str) -> Option<String> {
    if SPECIAL_EPICS.contains(&name) {
        return Some(name.to_string());
    }
    epic_dir_regex()
        .captures(name)
        .map(|caps| caps[1].to_string())
}

/// Epic and feature embedded in a task file name (`T-E04-F07-001-setup.md`).
pub fn ancestry_from_task_filename(name: &str) -> Option<(String, String)> {
    let caps = task_filename_regex().captures(name)?;
    let epic = caps[1].to_string();
    let feature = format!("{epic}-{}", &caps[2]);
    Some((epic, feature))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_task_keys_with_and_without_project_segment() {
        let parts = parse_task_key("T-E04-F07-012").expect("valid key");
        assert_eq!(parts.epic_key, "E04");
        assert_eq!(parts.feature_key, "E04-F07");
        assert_eq!(parts.sequence, 12);

        let parts = parse_task_key("T-E01-P02-F03-001").expect("valid key");
        assert_eq!(parts.feature_key, "E01-P02-F03");

        assert!(parse_task_key("T-E4-F07-012").is_none());
        assert!(parse_task_key("E04-F07-012").is_none());
    }

    #[test]
    fn formats_task_keys_with_zero_padding() {
        assert_eq!(format_task_key("E01-F02", 7), "T-E01-F02-007");
        assert!(is_task_key(&format_task_key("E01-P01-F02", 120)));
    }

    #[test]
    fn classifies_directory_names() {
        assert_eq!(
            feature_key_from_dir_name("E04-F07-sync-engine").as_deref(),
            Some("E04-F07")
        );
        assert_eq!(
            feature_key_from_dir_name("E01-P02-F03-api").as_deref(),
            Some("E01-P02-F03")
        );
        assert_eq!(feature_key_from_dir_name("E04-task-mgmt"), None);
        assert_eq!(nested_feature_from_dir_name("F02-login"), Some("F02"));
        assert_eq!(
            epic_key_from_dir_name("E04-task-mgmt").as_deref(),
            Some("E04")
        );
        assert_eq!(
            epic_key_from_dir_name("tech-debt").as_deref(),
            Some("tech-debt")
        );
        assert_eq!(epic_key_from_dir_name("E04-F07-sync"), None);
        assert_eq!(epic_key_from_dir_name("notes"), None);
    }

    #[test]
    fn validates_epic_and_feature_keys() {
        assert!(is_epic_key("E01"));
        assert!(is_epic_key("bugs"));
        assert!(!is_epic_key("E1"));
        assert!(is_feature_key("E01-F01"));
        assert!(is_feature_key("E01-P01-F01"));
        assert!(!is_feature_key("E01"));
        assert_eq!(epic_of_feature("E01-P01-F01"), Some("E01"));
    }

    #[test]
    fn task_filenames_carry_ancestry() {
        assert_eq!(
            ancestry_from_task_filename("T-E04-F07-001-setup.md"),
            Some(("E04".to_string(), "E04-F07".to_string()))
        );
        assert_eq!(ancestry_from_task_filename("001-setup.md"), None);
    }
}

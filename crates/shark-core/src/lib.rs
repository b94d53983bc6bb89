use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod keys;
pub mod patterns;

pub const DEFAULT_TASK_PRIORITY: i64 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    ReadyForReview,
    Completed,
    Archived,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Todo
    }
}

impl TaskStatus {
    /// Status given to every task created from a file.
    pub const INITIAL: TaskStatus = TaskStatus::Todo;

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::ReadyForReview => "ready_for_review",
            TaskStatus::Completed => "completed",
            TaskStatus::Archived => "archived",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Archived)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" | "in-progress" => Ok(TaskStatus::InProgress),
            "blocked" => Ok(TaskStatus::Blocked),
            "ready_for_review" | "ready-for-review" => Ok(TaskStatus::ReadyForReview),
            "completed" => Ok(TaskStatus::Completed),
            "archived" => Ok(TaskStatus::Archived),
            other => Err(format!("Unknown task status: {other}")),
        }
    }
}

/// Lifecycle shared by epics and features.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Draft,
    Active,
    Completed,
    Archived,
}

impl Default for ItemStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Draft => "draft",
            ItemStatus::Active => "active",
            ItemStatus::Completed => "completed",
            ItemStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "draft" => Ok(ItemStatus::Draft),
            "active" => Ok(ItemStatus::Active),
            "completed" => Ok(ItemStatus::Completed),
            "archived" => Ok(ItemStatus::Archived),
            other => Err(format!("Unknown status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EpicPriority {
    High,
    Medium,
    Low,
}

impl Default for EpicPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl EpicPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpicPriority::High => "high",
            EpicPriority::Medium => "medium",
            EpicPriority::Low => "low",
        }
    }
}

impl fmt::Display for EpicPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpicPriority {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "high" => Ok(EpicPriority::High),
            "medium" => Ok(EpicPriority::Medium),
            "low" => Ok(EpicPriority::Low),
            other => Err(format!("Unknown priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epic {
    pub id: i64,
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub status: ItemStatus,
    pub priority: EpicPriority,
    pub file_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub id: i64,
    pub epic_id: i64,
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub status: ItemStatus,
    pub file_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub feature_id: i64,
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: i64,
    pub assigned_agent: Option<String>,
    pub file_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHistoryEntry {
    pub id: i64,
    pub task_id: i64,
    pub old_status: Option<TaskStatus>,
    pub new_status: TaskStatus,
    pub agent: Option<String>,
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// How a field-level disagreement between a task file and its record is settled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    FileWins,
    DatabaseWins,
    NewerWins,
    Manual,
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        Self::FileWins
    }
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::FileWins => "file-wins",
            ConflictStrategy::DatabaseWins => "database-wins",
            ConflictStrategy::NewerWins => "newer-wins",
            ConflictStrategy::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "file-wins" | "file_wins" => Ok(ConflictStrategy::FileWins),
            "database-wins" | "database_wins" | "db-wins" => Ok(ConflictStrategy::DatabaseWins),
            "newer-wins" | "newer_wins" => Ok(ConflictStrategy::NewerWins),
            "manual" => Ok(ConflictStrategy::Manual),
            other => Err(format!(
                "Unknown strategy: {other} (valid: file-wins, database-wins, newer-wins, manual)"
            )),
        }
    }
}

/// How the index document and the folder structure are reconciled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryStrategy {
    IndexPrecedence,
    FolderPrecedence,
    Merge,
}

impl Default for DiscoveryStrategy {
    fn default() -> Self {
        Self::Merge
    }
}

impl DiscoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryStrategy::IndexPrecedence => "index-precedence",
            DiscoveryStrategy::FolderPrecedence => "folder-precedence",
            DiscoveryStrategy::Merge => "merge",
        }
    }
}

impl fmt::Display for DiscoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscoveryStrategy {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "index-precedence" | "index_precedence" => Ok(DiscoveryStrategy::IndexPrecedence),
            "folder-precedence" | "folder_precedence" => Ok(DiscoveryStrategy::FolderPrecedence),
            "merge" => Ok(DiscoveryStrategy::Merge),
            other => Err(format!(
                "Unknown discovery strategy: {other} (valid: index-precedence, folder-precedence, merge)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_round_trips_through_strings() {
        for status in [
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::Blocked,
            TaskStatus::ReadyForReview,
            TaskStatus::Completed,
            TaskStatus::Archived,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>(), Ok(status));
        }
        assert_eq!("In-Progress".parse::<TaskStatus>(), Ok(TaskStatus::InProgress));
        assert!("done-ish".parse::<TaskStatus>().is_err());
        assert_eq!(TaskStatus::INITIAL, TaskStatus::Todo);
    }

    #[test]
    fn strategies_parse_cli_spellings() {
        assert_eq!(
            "database-wins".parse::<ConflictStrategy>(),
            Ok(ConflictStrategy::DatabaseWins)
        );
        assert_eq!(
            " Newer-Wins ".parse::<ConflictStrategy>(),
            Ok(ConflictStrategy::NewerWins)
        );
        assert!("last-writer".parse::<ConflictStrategy>().is_err());
        assert_eq!(DiscoveryStrategy::default(), DiscoveryStrategy::Merge);
        assert_eq!(
            "folder-precedence".parse::<DiscoveryStrategy>(),
            Ok(DiscoveryStrategy::FolderPrecedence)
        );
    }

    #[test]
    fn strategies_serialize_in_kebab_case() {
        let json = serde_json::to_string(&ConflictStrategy::FileWins).expect("serialize");
        assert_eq!(json, "\"file-wins\"");
        let json = serde_json::to_string(&TaskStatus::ReadyForReview).expect("serialize");
        assert_eq!(json, "\"ready_for_review\"");
    }
}

//! Markdown metadata extraction and `task_key` write-back.

use chrono::{DateTime, Utc};
use serde_yaml::Value;
use std::path::PathBuf;
use thiserror::Error;

pub const MAX_DESCRIPTION_CHARS: usize = 500;

const DELIMITER: &str = "---";
const HEADING_PREFIXES: [&str; 4] = ["task:", "prp:", "todo:", "wip:"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrontmatterError {
    #[error("metadata block is missing its closing '---'")]
    Unterminated,
    #[error("invalid YAML in metadata block: {0}")]
    InvalidYaml(String),
    #[error("metadata block is not a key/value mapping")]
    NotAMapping,
}

/// Recognized keys of the leading YAML block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frontmatter {
    pub task_key: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// What a document declares about itself, after all fallbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMetadata {
    pub task_key: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub file_path: PathBuf,
    pub modified_at: DateTime<Utc>,
}

/// Document text split around its metadata block.
struct Sections<'a> {
    yaml: Option<&'a str>,
    body: &'a str,
}

fn is_delimiter(line: &str) -> bool {
    line.trim_end() == DELIMITER
}

fn split_sections(content: &str) -> Result<Sections<'_>, FrontmatterError> {
    let mut lines = content.split_inclusive('\n');
    let Some(first) = lines.next() else {
        return Ok(Sections {
            yaml: None,
            body: content,
        });
    };
    if !is_delimiter(first) {
        return Ok(Sections {
            yaml: None,
            body: content,
        });
    }

    let yaml_start = first.len();
    let mut offset = yaml_start;
    for line in lines {
        if is_delimiter(line) {
            return Ok(Sections {
                yaml: Some(&content[yaml_start..offset]),
                body: &content[offset + line.len()..],
            });
        }
        offset += line.len();
    }
    Err(FrontmatterError::Unterminated)
}

fn scalar_string(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Parses the leading metadata block. A document without one yields the default.
pub fn parse_frontmatter(content: &str) -> Result<Frontmatter, FrontmatterError> {
    let Some(yaml) = split_sections(content)?.yaml else {
        return Ok(Frontmatter::default());
    };
    if yaml.trim().is_empty() {
        return Ok(Frontmatter::default());
    }

    let value: Value =
        serde_yaml::from_str(yaml).map_err(|err| FrontmatterError::InvalidYaml(err.to_string()))?;
    let mapping = match value {
        Value::Mapping(mapping) => mapping,
        Value::Null => return Ok(Frontmatter::default()),
        _ => return Err(FrontmatterError::NotAMapping),
    };
    let field = |name: &str| mapping.get(name).and_then(scalar_string);

    Ok(Frontmatter {
        task_key: field("task_key"),
        title: field("title"),
        description: field("description"),
    })
}

/// Body of the document without its metadata block. Falls back to the whole
/// text when the block is malformed.
fn body_of(content: &str) -> &str {
    split_sections(content)
        .map(|sections| sections.body)
        .unwrap_or(content)
}

fn strip_heading_prefix(title: &str) -> &str {
    for prefix in HEADING_PREFIXES {
        if title.len() > prefix.len()
            && title.is_char_boundary(prefix.len())
            && title[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            return title[prefix.len()..].trim();
        }
    }
    title
}

/// Text of the first `# ` heading, with working prefixes such as `Task:` removed.
pub fn first_heading(content: &str) -> Option<String> {
    body_of(content)
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(|heading| strip_heading_prefix(heading.trim()).to_string())
        .filter(|heading| !heading.is_empty())
}

/// First prose paragraph after the first heading, capped in length.
pub fn first_paragraph(content: &str) -> Option<String> {
    let mut seen_heading = false;
    let mut paragraph: Vec<&str> = Vec::new();

    for line in body_of(content).lines() {
        let trimmed = line.trim();
        if !seen_heading {
            seen_heading = trimmed.starts_with("# ");
            continue;
        }
        if trimmed.starts_with('#') {
            break;
        }
        if trimmed.is_empty() {
            if paragraph.is_empty() {
                continue;
            }
            break;
        }
        paragraph.push(trimmed);
    }

    if paragraph.is_empty() {
        return None;
    }
    let joined = paragraph.join("\n");
    Some(joined.chars().take(MAX_DESCRIPTION_CHARS).collect())
}

/// Title, description and declared key of a document, plus a warning when the
/// metadata block could not be read and structure-based fallbacks were used.
pub fn extract_metadata(content: &str) -> (Frontmatter, Option<FrontmatterError>) {
    let (declared, problem) = match parse_frontmatter(content) {
        Ok(frontmatter) => (frontmatter, None),
        Err(err) => (Frontmatter::default(), Some(err)),
    };

    let title = declared.title.or_else(|| first_heading(content));
    let description = declared.description.or_else(|| first_paragraph(content));

    (
        Frontmatter {
            task_key: declared.task_key,
            title,
            description,
        },
        problem,
    )
}

/// Sets `field: value` in the metadata block, creating the block when absent.
pub fn upsert_frontmatter_field(
    content: &str,
    field: &str,
    value: &str,
) -> Result<String, FrontmatterError> {
    let entry = format!("{field}: {value}\n");
    let sections = split_sections(content)?;
    let Some(yaml) = sections.yaml else {
        return Ok(format!("{DELIMITER}\n{entry}{DELIMITER}\n{content}"));
    };

    let prefix = format!("{field}:");
    let mut replaced = false;
    let mut block = String::with_capacity(yaml.len() + entry.len());
    for line in yaml.split_inclusive('\n') {
        if !replaced && line.starts_with(&prefix) {
            block.push_str(&entry);
            replaced = true;
        } else {
            block.push_str(line);
        }
    }
    if !replaced {
        if !block.is_empty() && !block.ends_with('\n') {
            block.push('\n');
        }
        block.push_str(&entry);
    }

    Ok(format!("{DELIMITER}\n{block}{DELIMITER}\n{}", sections.body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontmatter_wins_over_document_structure() {
        let content = "---\ntask_key: T-E01-F01-001\ntitle: From YAML\ndescription: Declared\n---\n# Heading title\n\nBody paragraph.\n";
        let (meta, problem) = extract_metadata(content);
        assert!(problem.is_none());
        assert_eq!(meta.task_key.as_deref(), Some("T-E01-F01-001"));
        assert_eq!(meta.title.as_deref(), Some("From YAML"));
        assert_eq!(meta.description.as_deref(), Some("Declared"));
    }

    #[test]
    fn heading_and_paragraph_fill_missing_fields() {
        let content = "---\ntask_key: T-E01-F01-002\n---\n\n# Task: Wire the scanner\n\nWalks the docs tree\nand records files.\n\nSecond paragraph.\n";
        let (meta, _) = extract_metadata(content);
        assert_eq!(meta.title.as_deref(), Some("Wire the scanner"));
        assert_eq!(
            meta.description.as_deref(),
            Some("Walks the docs tree\nand records files.")
        );
    }

    #[test]
    fn documents_without_metadata_have_no_title_or_key() {
        let (meta, problem) = extract_metadata("just some notes\n");
        assert!(problem.is_none());
        assert_eq!(meta, Frontmatter::default());
        assert_eq!(first_heading("# WIP: Draft"), Some("Draft".to_string()));
        assert_eq!(first_heading("# TODO:"), Some("TODO:".to_string()));
    }

    #[test]
    fn description_is_capped() {
        let long = "x".repeat(MAX_DESCRIPTION_CHARS + 40);
        let content = format!("# Title\n\n{long}\n");
        let description = first_paragraph(&content).expect("paragraph");
        assert_eq!(description.chars().count(), MAX_DESCRIPTION_CHARS);
    }

    #[test]
    fn malformed_blocks_are_reported_and_fall_back() {
        let content = "---\ntitle: never closed\n# Real title\n\nText.\n";
        assert_eq!(
            parse_frontmatter(content),
            Err(FrontmatterError::Unterminated)
        );
        let (meta, problem) = extract_metadata(content);
        assert_eq!(problem, Some(FrontmatterError::Unterminated));
        assert_eq!(meta.title.as_deref(), Some("Real title"));

        let invalid = "---\ntitle: [unbalanced\n---\n# Heading\n";
        assert!(matches!(
            parse_frontmatter(invalid),
            Err(FrontmatterError::InvalidYaml(_))
        ));
        let (meta, problem) = extract_metadata(invalid);
        assert!(problem.is_some());
        assert_eq!(meta.title.as_deref(), Some("Heading"));
    }

    #[test]
    fn upsert_creates_replaces_or_appends_the_key() {
        let created = upsert_frontmatter_field("# Title\n", "task_key", "T-E01-F01-003")
            .expect("create block");
        assert_eq!(created, "---\ntask_key: T-E01-F01-003\n---\n# Title\n");

        let existing = "---\ntitle: Keep me\ntask_key: T-E01-F01-001\n---\nBody\n";
        let replaced =
            upsert_frontmatter_field(existing, "task_key", "T-E01-F01-009").expect("replace");
        assert_eq!(
            replaced,
            "---\ntitle: Keep me\ntask_key: T-E01-F01-009\n---\nBody\n"
        );

        let appended = upsert_frontmatter_field("---\ntitle: Keep me\n---\nBody\n", "task_key", "T-E01-F01-004")
            .expect("append");
        let parsed = parse_frontmatter(&appended).expect("parse");
        assert_eq!(parsed.task_key.as_deref(), Some("T-E01-F01-004"));
        assert_eq!(parsed.title.as_deref(), Some("Keep me"));
        assert!(appended.ends_with("---\nBody\n"));

        assert_eq!(
            upsert_frontmatter_field("---\ntitle: open\n", "task_key", "x"),
            Err(FrontmatterError::Unterminated)
        );
    }
}

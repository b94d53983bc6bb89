use crate::conflict::{ConflictField, FieldConflict};
use crate::document::ParsedMetadata;
use crate::SyncError;
use shark_core::{ConflictStrategy, Task};
use std::io::{self, BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    File,
    Database,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::File => "file",
            Side::Database => "db",
        }
    }
}

/// Operator decision for one conflict under the `manual` strategy.
pub trait ConflictPrompt {
    fn choose(
        &mut self,
        conflict: &FieldConflict,
        position: usize,
        total: usize,
    ) -> Result<Side, SyncError>;
}

/// Line-oriented prompt over any reader/writer pair.
pub struct LinePrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LinePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn ask(&mut self, conflict: &FieldConflict, position: usize, total: usize) -> io::Result<Option<Side>> {
        writeln!(
            self.output,
            "Conflict {position}/{total} - Task {} - Field: {}",
            conflict.task_key, conflict.field
        )?;
        writeln!(self.output, "----------------------------------------")?;
        writeln!(self.output, "  Database value: {:?}", conflict.database_value)?;
        writeln!(self.output, "  File value:     {:?}", conflict.file_value)?;
        writeln!(self.output)?;

        loop {
            write!(self.output, "Choose resolution (file/db): ")?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let side = match line.trim().to_lowercase().as_str() {
                "file" => Side::File,
                "db" => Side::Database,
                _ => {
                    writeln!(self.output, "Invalid choice. Please enter 'file' or 'db'.")?;
                    continue;
                }
            };
            writeln!(self.output, "  Resolution: Using {} value\n", side.as_str())?;
            return Ok(Some(side));
        }
    }
}

impl LinePrompt<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> ConflictPrompt for LinePrompt<R, W> {
    fn choose(
        &mut self,
        conflict: &FieldConflict,
        position: usize,
        total: usize,
    ) -> Result<Side, SyncError> {
        match self.ask(conflict, position, total) {
            Ok(Some(side)) => Ok(side),
            Ok(None) => Err(SyncError::Prompt("unexpected end of input".to_string())),
            Err(err) => Err(SyncError::Prompt(err.to_string())),
        }
    }
}

fn take_file_value(resolved: &mut Task, field: ConflictField, file: &ParsedMetadata) {
    match field {
        ConflictField::Title => resolved.title = file.title.clone(),
        ConflictField::Description => {
            if let Some(description) = &file.description {
                resolved.description = Some(description.clone());
            }
        }
        ConflictField::FilePath => {
            resolved.file_path = Some(file.file_path.to_string_lossy().into_owned())
        }
    }
}

/// Settles `conflicts` under `strategy`, starting from a copy of the record so
/// every field a document does not own passes through untouched.
pub fn resolve_conflicts(
    strategy: ConflictStrategy,
    conflicts: &[FieldConflict],
    file: &ParsedMetadata,
    record: &Task,
    prompt: &mut dyn ConflictPrompt,
) -> Result<Task, SyncError> {
    let mut resolved = record.clone();

    match strategy {
        ConflictStrategy::FileWins => {
            for conflict in conflicts {
                take_file_value(&mut resolved, conflict.field, file);
            }
        }
        ConflictStrategy::DatabaseWins => {
            take_file_value(&mut resolved, ConflictField::FilePath, file);
        }
        ConflictStrategy::NewerWins => {
            if file.modified_at > record.updated_at {
                for conflict in conflicts {
                    take_file_value(&mut resolved, conflict.field, file);
                }
            }
            take_file_value(&mut resolved, ConflictField::FilePath, file);
        }
        ConflictStrategy::Manual => {
            let total = conflicts.len();
            for (idx, conflict) in conflicts.iter().enumerate() {
                if prompt.choose(conflict, idx + 1, total)? == Side::File {
                    take_file_value(&mut resolved, conflict.field, file);
                }
            }
        }
    }

    Ok(resolved)
}

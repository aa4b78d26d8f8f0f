use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::settings::MergeCommitStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
}

/// A file touched by a change. Added, modified and copied files have a new
/// path only, deleted files an old path only, renamed files both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangedFile {
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
}

impl ChangedFile {
    pub fn added(path: impl Into<String>) -> Self {
        Self {
            change_type: ChangeType::Added,
            new_path: Some(path.into()),
            old_path: None,
        }
    }

    pub fn modified(path: impl Into<String>) -> Self {
        Self {
            change_type: ChangeType::Modified,
            new_path: Some(path.into()),
            old_path: None,
        }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            change_type: ChangeType::Deleted,
            new_path: None,
            old_path: Some(path.into()),
        }
    }

    pub fn renamed(old_path: impl Into<String>, new_path: impl Into<String>) -> Self {
        Self {
            change_type: ChangeType::Renamed,
            new_path: Some(new_path.into()),
            old_path: Some(old_path.into()),
        }
    }

    /// A copy only needs approval for its new path: the source is unchanged.
    pub fn copied(old_path: impl Into<String>, new_path: impl Into<String>) -> Self {
        Self {
            change_type: ChangeType::Copied,
            new_path: Some(new_path.into()),
            old_path: Some(old_path.into()),
        }
    }

    /// The path to sort and page by.
    pub fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or_default()
    }

    /// The old path, if it needs code owner approval.
    pub fn old_path_to_check(&self) -> Option<&str> {
        match self.change_type {
            ChangeType::Deleted | ChangeType::Renamed => self.old_path.as_deref(),
            _ => None,
        }
    }

    /// The new path, if it needs code owner approval.
    pub fn new_path_to_check(&self) -> Option<&str> {
        match self.change_type {
            ChangeType::Deleted => None,
            _ => self.new_path.as_deref(),
        }
    }

    fn touches(&self, path: &str) -> bool {
        self.new_path.as_deref() == Some(path) || self.old_path.as_deref() == Some(path)
    }
}

/// The files a change's current patch set modifies. `files` is the diff
/// against the first parent; for merge commits `other_parent_files` holds
/// one diff per further parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDiff {
    pub files: Vec<ChangedFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other_parent_files: Vec<Vec<ChangedFile>>,
}

impl ChangeDiff {
    pub fn new(files: Vec<ChangedFile>) -> Self {
        Self {
            files,
            other_parent_files: Vec::new(),
        }
    }

    pub fn with_parent_diff(mut self, files: Vec<ChangedFile>) -> Self {
        self.other_parent_files.push(files);
        self
    }

    pub fn is_merge(&self) -> bool {
        !self.other_parent_files.is_empty()
    }

    /// The files that need code owner approval under `strategy`.
    pub fn files_to_check(&self, strategy: MergeCommitStrategy) -> Vec<&ChangedFile> {
        match strategy {
            MergeCommitStrategy::AllChangedFiles => self.files.iter().collect(),
            MergeCommitStrategy::FilesWithConflictResolution => {
                // A file that is identical to one of the parents was taken
                // over as is, not resolved by hand
                let changed_against_others: Vec<HashSet<&str>> = self
                    .other_parent_files
                    .iter()
                    .map(|files| {
                        files
                            .iter()
                            .flat_map(|f| f.new_path.iter().chain(f.old_path.iter()))
                            .map(String::as_str)
                            .collect()
                    })
                    .collect();
                self.files
                    .iter()
                    .filter(|file| {
                        changed_against_others.iter().all(|paths| {
                            paths.iter().any(|path| file.touches(path))
                        })
                    })
                    .collect()
            }
        }
    }
}

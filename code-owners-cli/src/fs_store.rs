use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use code_owners::{
    loader::{FileContent, StorageError},
    owner_config::normalize_branch,
    ProjectAccess, RepoStore, Revision,
};
use tracing::trace;

/// The revision every file of a working tree is read at.
pub const WORKTREE_REVISION: &str = "WORKTREE";

/// Serves one project from checked out working trees, one directory per
/// branch. Only the current state of a tree is readable.
pub struct FsStore {
    project: String,
    branches: BTreeMap<String, PathBuf>,
}

impl FsStore {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            branches: BTreeMap::new(),
        }
    }

    pub fn with_branch(mut self, branch: &str, root: impl Into<PathBuf>) -> Self {
        self.branches.insert(normalize_branch(branch), root.into());
        self
    }

    fn root(
        &self,
        project: &str,
        branch: &str,
        revision: Option<&Revision>,
    ) -> Result<Option<&Path>, StorageError> {
        if project != self.project {
            return Ok(None);
        }
        if let Some(revision) = revision {
            if revision.0 != WORKTREE_REVISION {
                return Err(StorageError(format!(
                    "revision {} is not available, only the working tree can be read",
                    revision
                )));
            }
        }
        Ok(self
            .branches
            .get(&normalize_branch(branch))
            .map(PathBuf::as_path))
    }
}

impl RepoStore for FsStore {
    fn read_file(
        &self,
        project: &str,
        branch: &str,
        path: &str,
        revision: Option<&Revision>,
    ) -> Result<Option<FileContent>, StorageError> {
        let Some(root) = self.root(project, branch, revision)? else {
            return Ok(None);
        };
        let file = root.join(path.trim_start_matches('/'));
        trace!(file = %file.display(), "reading file");
        match fs::read_to_string(&file) {
            Ok(text) => Ok(Some(FileContent {
                revision: Revision::new(WORKTREE_REVISION),
                text,
            })),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError(format!(
                "cannot read {}: {}",
                file.display(),
                err
            ))),
        }
    }

    fn list_files(
        &self,
        project: &str,
        branch: &str,
        revision: Option<&Revision>,
    ) -> Result<Vec<String>, StorageError> {
        let Some(root) = self.root(project, branch, revision)? else {
            return Ok(Vec::new());
        };
        let mut files = Vec::new();
        for entry in walk_files(root) {
            let entry = entry.map_err(|err| StorageError(err.to_string()))?;
            if let Some(path) = repo_path(root, entry.path()) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl ProjectAccess for FsStore {
    fn exists(&self, project: &str) -> bool {
        project == self.project
    }
}

/// Files below `root`, skipping the `.git` directory.
pub fn walk_files(root: &Path) -> impl Iterator<Item = walkdir::Result<walkdir::DirEntry>> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git")
        .filter(|entry| {
            entry
                .as_ref()
                .map_or(true, |entry| !entry.file_type().is_dir())
        })
}

/// The absolute repository path (`/a/b.txt`) of a file below `root`.
pub fn repo_path(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?;
    let mut path = String::new();
    for component in relative.components() {
        path.push('/');
        path.push_str(component.as_os_str().to_str()?);
    }
    (!path.is_empty()).then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_path() {
        let root = Path::new("/work/repo");
        let tests = vec![
            ("/work/repo/OWNERS", Some("/OWNERS")),
            ("/work/repo/a/b/c.txt", Some("/a/b/c.txt")),
            ("/work/repo", None),
            ("/elsewhere/x", None),
        ];
        for (file, expected) in tests {
            assert_eq!(
                repo_path(root, Path::new(file)).as_deref(),
                expected,
                "{}",
                file
            );
        }
    }

    #[test]
    fn test_other_projects_and_branches_are_empty() {
        let store = FsStore::new("p").with_branch("main", "/nonexistent");
        assert_eq!(store.read_file("q", "main", "/OWNERS", None), Ok(None));
        assert_eq!(store.list_files("p", "stable", None), Ok(Vec::new()));
        assert!(store
            .read_file("p", "main", "/OWNERS", Some(&Revision::new("abc")))
            .is_err());
        assert!(store.exists("p"));
        assert!(!store.exists("q"));
    }
}

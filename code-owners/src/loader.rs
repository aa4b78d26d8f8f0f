//! Loading owner configs from the repository. The storage itself is a
//! collaborator behind [`RepoStore`]; [`BackendConfigLoader`] reads a config's
//! file from the store and parses it with a [`Backend`].

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
};

use thiserror::Error;
use tracing::trace;

use crate::{
    backend::{Backend, InvalidConfigError},
    owner_config::{normalize_branch, ConfigKey, OwnerConfig, Revision},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("storage error: {0}")]
pub struct StorageError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The file exists but can't be parsed. Resolution treats the config as
    /// absent; validation reports it.
    #[error(transparent)]
    InvalidConfig(#[from] InvalidConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A file read from the repository, with the revision it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub revision: Revision,
    pub text: String,
}

/// Read access to repository content.
pub trait RepoStore: Send + Sync {
    /// Read the file at `path` on `branch`, at `revision` or at the branch
    /// tip. `Ok(None)` if the branch or file doesn't exist.
    fn read_file(
        &self,
        project: &str,
        branch: &str,
        path: &str,
        revision: Option<&Revision>,
    ) -> Result<Option<FileContent>, StorageError>;

    /// Paths of all files on `branch`, at `revision` or at the branch tip.
    fn list_files(
        &self,
        project: &str,
        branch: &str,
        revision: Option<&Revision>,
    ) -> Result<Vec<String>, StorageError>;
}

impl<S: RepoStore + ?Sized> RepoStore for &S {
    fn read_file(
        &self,
        project: &str,
        branch: &str,
        path: &str,
        revision: Option<&Revision>,
    ) -> Result<Option<FileContent>, StorageError> {
        (**self).read_file(project, branch, path, revision)
    }

    fn list_files(
        &self,
        project: &str,
        branch: &str,
        revision: Option<&Revision>,
    ) -> Result<Vec<String>, StorageError> {
        (**self).list_files(project, branch, revision)
    }
}

/// Project existence and visibility.
pub trait ProjectAccess: Send + Sync {
    fn exists(&self, project: &str) -> bool;

    /// Whether the current user can read the project.
    fn is_readable(&self, project: &str) -> bool {
        self.exists(project)
    }
}

/// Treats every project as existing and readable.
#[cfg(test)]
pub(crate) struct AllProjectsReadable;

#[cfg(test)]
impl ProjectAccess for AllProjectsReadable {
    fn exists(&self, _project: &str) -> bool {
        true
    }
}

pub trait ConfigLoader: Send + Sync {
    /// Load the config for `key`, at `revision` or at the branch tip.
    /// `Ok(None)` if there is no config file.
    fn load(
        &self,
        key: &ConfigKey,
        revision: Option<&Revision>,
    ) -> Result<Option<Arc<OwnerConfig>>, LoadError>;

    /// Name of the file that holds a folder's config.
    fn file_name(&self) -> &str;
}

impl<L: ConfigLoader + ?Sized> ConfigLoader for &L {
    fn load(
        &self,
        key: &ConfigKey,
        revision: Option<&Revision>,
    ) -> Result<Option<Arc<OwnerConfig>>, LoadError> {
        (**self).load(key, revision)
    }

    fn file_name(&self) -> &str {
        (**self).file_name()
    }
}

/// Loads configs by reading their files from a [`RepoStore`] and parsing them
/// with a [`Backend`].
pub struct BackendConfigLoader<S> {
    store: S,
    backend: Arc<dyn Backend>,
}

impl<S: RepoStore> BackendConfigLoader<S> {
    pub fn new(store: S, backend: Arc<dyn Backend>) -> Self {
        Self { store, backend }
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: RepoStore> ConfigLoader for BackendConfigLoader<S> {
    fn load(
        &self,
        key: &ConfigKey,
        revision: Option<&Revision>,
    ) -> Result<Option<Arc<OwnerConfig>>, LoadError> {
        let path = key.file_path(self.backend.file_name());
        let Some(content) = self
            .store
            .read_file(&key.project, &key.branch, &path, revision)?
        else {
            trace!(%key, "no code owner config");
            return Ok(None);
        };

        let config = self.backend.parse(key, &content.revision, &content.text)?;
        trace!(%key, revision = %content.revision, "loaded code owner config");
        Ok(Some(Arc::new(config)))
    }

    fn file_name(&self) -> &str {
        self.backend.file_name()
    }
}

#[derive(Default)]
struct BranchHistory {
    // Each commit is a full snapshot of the branch's files
    commits: Vec<Snapshot>,
}

/// The reference in-memory [`RepoStore`]: a versioned repository where every
/// write creates a new revision of the branch and older revisions stay
/// readable. It also answers [`ProjectAccess`] for the projects it holds.
#[derive(Default)]
pub struct InMemoryRepo {
    branches: RwLock<HashMap<(String, String), BranchHistory>>,
    next_revision: RwLock<u64>,
}

impl InMemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a file, creating a new revision of the branch.
    pub fn write_file(&self, project: &str, branch: &str, path: &str, text: &str) -> Revision {
        let revision = {
            let mut next = self.next_revision.write().expect("valid lock");
            *next += 1;
            Revision::new(format!("{:040x}", *next))
        };

        let mut branches = self.branches.write().expect("valid lock");
        let history = branches
            .entry((project.to_owned(), normalize_branch(branch)))
            .or_default();
        let mut files = history
            .commits
            .last()
            .map(|(_, files)| files.clone())
            .unwrap_or_default();
        files.insert(path.to_owned(), text.to_owned());
        history.commits.push((revision.clone(), files));
        revision
    }
}

type Snapshot = (Revision, BTreeMap<String, String>);

impl InMemoryRepo {
    fn with_snapshot<T>(
        &self,
        project: &str,
        branch: &str,
        revision: Option<&Revision>,
        f: impl FnOnce(&Snapshot) -> T,
    ) -> Result<Option<T>, StorageError> {
        let branches = self.branches.read().expect("valid lock");
        let Some(history) = branches.get(&(project.to_owned(), normalize_branch(branch))) else {
            return Ok(None);
        };

        let snapshot = match revision {
            Some(revision) => history
                .commits
                .iter()
                .find(|(r, _)| r == revision)
                .ok_or_else(|| {
                    StorageError(format!("unknown revision {} of {}:{}", revision, project, branch))
                })?,
            None => match history.commits.last() {
                Some(snapshot) => snapshot,
                None => return Ok(None),
            },
        };
        Ok(Some(f(snapshot)))
    }
}

impl RepoStore for InMemoryRepo {
    fn read_file(
        &self,
        project: &str,
        branch: &str,
        path: &str,
        revision: Option<&Revision>,
    ) -> Result<Option<FileContent>, StorageError> {
        let content = self.with_snapshot(project, branch, revision, |(revision, files)| {
            files.get(path).map(|text| FileContent {
                revision: revision.clone(),
                text: text.clone(),
            })
        })?;
        Ok(content.flatten())
    }

    fn list_files(
        &self,
        project: &str,
        branch: &str,
        revision: Option<&Revision>,
    ) -> Result<Vec<String>, StorageError> {
        let files = self.with_snapshot(project, branch, revision, |(_, files)| {
            files.keys().cloned().collect()
        })?;
        Ok(files.unwrap_or_default())
    }
}

impl ProjectAccess for InMemoryRepo {
    fn exists(&self, project: &str) -> bool {
        let branches = self.branches.read().expect("valid lock");
        branches.keys().any(|(p, _)| p == project)
    }
}

/// A loader over already-parsed configs, keyed by [`ConfigKey`]. Configs
/// can also be registered as invalid to simulate unparsable files.
#[cfg(test)]
pub(crate) struct StaticConfigLoader {
    file_name: String,
    configs: HashMap<ConfigKey, Result<Arc<OwnerConfig>, InvalidConfigError>>,
}

#[cfg(test)]
impl StaticConfigLoader {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            configs: HashMap::new(),
        }
    }

    pub fn add(mut self, config: OwnerConfig) -> Self {
        self.configs.insert(config.key.clone(), Ok(Arc::new(config)));
        self
    }

    pub fn add_invalid(mut self, key: ConfigKey, error: InvalidConfigError) -> Self {
        self.configs.insert(key, Err(error));
        self
    }
}

#[cfg(test)]
impl ConfigLoader for StaticConfigLoader {
    fn load(
        &self,
        key: &ConfigKey,
        _revision: Option<&Revision>,
    ) -> Result<Option<Arc<OwnerConfig>>, LoadError> {
        match self.configs.get(key) {
            Some(Ok(config)) => Ok(Some(config.clone())),
            Some(Err(err)) => Err(LoadError::InvalidConfig(err.clone())),
            None => Ok(None),
        }
    }

    fn file_name(&self) -> &str {
        &self.file_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FindOwnersBackend;

    #[test]
    fn test_in_memory_repo_keeps_history() {
        let repo = InMemoryRepo::new();
        let first = repo.write_file("p", "main", "/OWNERS", "alice@x.com\n");
        let second = repo.write_file("p", "main", "/OWNERS", "bob@x.com\n");

        let at_first = repo.read_file("p", "main", "/OWNERS", Some(&first)).unwrap();
        assert_eq!(at_first.unwrap().text, "alice@x.com\n");
        let at_tip = repo.read_file("p", "main", "/OWNERS", None).unwrap();
        assert_eq!(at_tip.unwrap().revision, second);

        assert_eq!(repo.read_file("p", "main", "/a/OWNERS", None), Ok(None));
        repo.write_file("p", "main", "/a/OWNERS", "carol@x.com\n");
        assert_eq!(
            repo.list_files("p", "main", None).unwrap(),
            vec!["/OWNERS".to_owned(), "/a/OWNERS".to_owned()]
        );
        assert_eq!(
            repo.list_files("p", "main", Some(&first)).unwrap(),
            vec!["/OWNERS".to_owned()]
        );
        assert_eq!(repo.read_file("q", "main", "/OWNERS", None), Ok(None));
        assert!(repo
            .read_file("p", "main", "/OWNERS", Some(&Revision::new("nope")))
            .is_err());
    }

    #[test]
    fn test_backend_loader() {
        let repo = InMemoryRepo::new();
        repo.write_file("p", "main", "/a/OWNERS", "alice@x.com\n");
        repo.write_file("p", "main", "/b/OWNERS", "not an owner\n");
        let loader = BackendConfigLoader::new(repo, Arc::new(FindOwnersBackend));

        let config = loader
            .load(&ConfigKey::new("p", "main", "/a/"), None)
            .unwrap()
            .unwrap();
        assert_eq!(config.owner_sets.len(), 1);

        assert_eq!(loader.load(&ConfigKey::new("p", "main", "/"), None), Ok(None));
        assert!(matches!(
            loader.load(&ConfigKey::new("p", "main", "/b/"), None),
            Err(LoadError::InvalidConfig(_))
        ));
    }
}

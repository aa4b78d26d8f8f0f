//! Code owner approval status of a change. Every file the change touches is
//! resolved and classified on its own; the results are collected into one
//! report, a page at a time.

mod changed_files;
mod classifier;

use std::{
    collections::BTreeSet,
    time::{Duration, Instant},
};

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info_span};

pub use self::changed_files::{ChangeDiff, ChangeType, ChangedFile};
pub use self::classifier::{Approval, ApprovalPolicy, ChangeState};
use crate::{
    accounts::{AccountId, AccountResolver},
    cache::RequestCache,
    loader::{BackendConfigLoader, ProjectAccess, RepoStore, StorageError},
    messages::DebugMessage,
    resolver::{CodeOwnerResolver, ResolveError},
    settings::{CodeOwnersSettings, LabelDefinition, SettingsError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodeOwnerStatus {
    InsufficientReviewers,
    Pending,
    Approved,
}

/// The status of one side (old or new path) of a changed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathCodeOwnerStatus {
    pub path: String,
    pub status: CodeOwnerStatus,
    /// The code owners of the path; `None` if every user is a code owner.
    pub owners: Option<BTreeSet<AccountId>>,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileCodeOwnerStatus {
    pub changed_file: ChangedFile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_path_status: Option<PathCodeOwnerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path_status: Option<PathCodeOwnerStatus>,
}

impl FileCodeOwnerStatus {
    /// The least approved status of the file's paths.
    pub fn status(&self) -> CodeOwnerStatus {
        self.new_path_status
            .iter()
            .chain(self.old_path_status.iter())
            .map(|status| status.status)
            .min()
            .unwrap_or(CodeOwnerStatus::Approved)
    }
}

/// Which part of the sorted file list to compute. Without a limit, a page
/// holds as many files as the max result page size allows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub start: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeOwnerStatusReport {
    pub patch_set: u32,
    pub file_statuses: Vec<FileCodeOwnerStatus>,
    /// More files follow after this page.
    pub more: bool,
    pub messages: Vec<DebugMessage>,
}

impl ChangeOwnerStatusReport {
    /// Whether code owner approval is complete for the files of the report.
    pub fn is_submittable(&self) -> bool {
        self.file_statuses
            .iter()
            .all(|file| file.status() == CodeOwnerStatus::Approved)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("code owners are misconfigured: {0}")]
    Misconfiguration(#[from] SettingsError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("code owners functionality is disabled for branch {branch} of project {project}")]
    Disabled { project: String, branch: String },
    #[error("deadline exceeded while computing code owner statuses")]
    DeadlineExceeded,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<ResolveError> for StatusError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::InvalidPath(_) => StatusError::InvalidArgument(err.to_string()),
            ResolveError::Storage(err) => StatusError::Storage(err),
        }
    }
}

type ComputedFile = (FileCodeOwnerStatus, Vec<DebugMessage>);

/// Computes code owner statuses of changes. Owner configs are read from the
/// store with the backend configured for the change's branch.
pub struct StatusComputation<'a> {
    store: &'a dyn RepoStore,
    projects: &'a dyn ProjectAccess,
    accounts: &'a dyn AccountResolver,
    settings: &'a CodeOwnersSettings,
    labels: &'a [LabelDefinition],
    cache_capacity: Option<usize>,
}

impl<'a> StatusComputation<'a> {
    pub fn new(
        store: &'a dyn RepoStore,
        projects: &'a dyn ProjectAccess,
        accounts: &'a dyn AccountResolver,
        settings: &'a CodeOwnersSettings,
        labels: &'a [LabelDefinition],
    ) -> Self {
        Self {
            store,
            projects,
            accounts,
            settings,
            labels,
            cache_capacity: None,
        }
    }

    /// Bound the number of configs cached during one computation.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    pub fn compute_statuses(
        &self,
        change: &ChangeState,
        diff: &ChangeDiff,
        page: Page,
        deadline: Option<Deadline>,
    ) -> Result<ChangeOwnerStatusReport, StatusError> {
        let span = info_span!(
            "compute_statuses",
            project = %change.project,
            branch = %change.branch
        );
        let _enter = span.enter();

        self.settings.validate(self.labels)?;
        let settings = self.settings.for_branch(&change.branch)?;
        if settings.disabled {
            return Err(StatusError::Disabled {
                project: change.project.clone(),
                branch: settings.branch,
            });
        }
        let policy = ApprovalPolicy::new(&settings, self.labels)?;

        let limit = page
            .limit
            .unwrap_or(settings.max_result_page_size)
            .min(settings.max_result_page_size);
        if limit == 0 {
            return Err(StatusError::InvalidArgument("limit must be positive".to_owned()));
        }

        let mut files = diff.files_to_check(settings.merge_commit_strategy);
        files.sort_by(|a, b| a.path().cmp(b.path()));
        let more = files.len() > page.start.saturating_add(limit);
        let files: Vec<&ChangedFile> = files.into_iter().skip(page.start).take(limit).collect();
        debug!(files = files.len(), more, "computing code owner statuses");

        let loader = BackendConfigLoader::new(self.store, settings.backend.clone());
        let mut cache = RequestCache::new(&loader);
        if let Some(capacity) = self.cache_capacity {
            cache = cache.with_capacity(capacity);
        }
        let resolver = CodeOwnerResolver::new(
            change.project.as_str(),
            &cache,
            self.projects,
            self.accounts,
            &settings,
        );
        let revision = change.base_revision.as_ref();

        let compute_file = |file: &&ChangedFile| -> Result<ComputedFile, StatusError> {
            if deadline.map_or(false, |deadline| deadline.is_expired()) {
                return Err(StatusError::DeadlineExceeded);
            }
            let mut messages = Vec::new();
            let mut classify = |path: Option<&str>| -> Result<_, StatusError> {
                let Some(path) = path else {
                    return Ok(None);
                };
                let owners = resolver.resolve_path_owners(path, revision)?;
                let status = policy.classify(&owners, change);
                messages.extend(owners.messages);
                Ok(Some(status))
            };
            let new_path_status = classify(file.new_path_to_check())?;
            let old_path_status = classify(file.old_path_to_check())?;
            Ok((
                FileCodeOwnerStatus {
                    changed_file: (*file).clone(),
                    new_path_status,
                    old_path_status,
                },
                messages,
            ))
        };

        #[cfg(feature = "parallel")]
        let computed: Result<Vec<_>, _> = files.par_iter().map(compute_file).collect();
        #[cfg(not(feature = "parallel"))]
        let computed: Result<Vec<_>, _> = files.iter().map(compute_file).collect();

        let mut file_statuses = Vec::with_capacity(files.len());
        let mut messages: Vec<DebugMessage> = Vec::new();
        for (status, file_messages) in computed? {
            file_statuses.push(status);
            for message in file_messages {
                if message.user.is_some() && !messages.contains(&message) {
                    messages.push(message);
                }
            }
        }

        Ok(ChangeOwnerStatusReport {
            patch_set: change.current_patch_set,
            file_statuses,
            more,
            messages,
        })
    }
}

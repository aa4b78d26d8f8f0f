//! Resolution of the code owners of a single path.
//!
//! The folders containing the path are visited nearest first. At every level
//! the folder's config is loaded, its imports are resolved, and the owners of
//! the owner sets that apply to the path are added to the result. Owners only
//! ever accumulate: a nearer folder can stop the ascent, but can't take away
//! owners it has already collected.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::{
    accounts::{AccountId, AccountResolver},
    imports::{ImportResolver, UnresolvedImport},
    loader::{ConfigLoader, LoadError, ProjectAccess, StorageError},
    messages::{DebugMessage, OptionalResultWithMessages},
    owner_config::{ConfigKey, OwnerReference, Revision},
    path_expressions::PathExpressionMatcher,
    paths,
    settings::{EffectiveSettings, FallbackCodeOwners, DEFAULT_CONFIG_BRANCH},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("invalid path '{0}': must be a non-empty absolute path")]
    InvalidPath(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The code owners of one path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedOwners {
    pub path: String,
    /// Every owner reference that applies, before account resolution.
    pub owner_refs: BTreeSet<OwnerReference>,
    /// The accounts the owner emails resolved to.
    pub accounts: BTreeSet<AccountId>,
    /// Every user is a code owner, either declared with `*` or by fallback.
    pub owned_by_all_users: bool,
    pub annotations: BTreeMap<OwnerReference, BTreeSet<String>>,
    /// Files of the configs that were consulted, nearest first.
    pub config_file_paths: Vec<String>,
    /// Ownership comes from the fallback policy.
    pub is_default_owner: bool,
    /// Some owners come from the global code owners setting.
    pub is_global_owner: bool,
    pub has_unresolved_imports: bool,
    pub has_unresolved_owners: bool,
    pub unresolved_imports: Vec<UnresolvedImport>,
    pub messages: Vec<DebugMessage>,
}

impl ResolvedOwners {
    /// Whether anyone owns the path.
    pub fn has_owners(&self) -> bool {
        self.owned_by_all_users || !self.accounts.is_empty()
    }
}

/// Ascent state for one path.
#[derive(Default)]
struct Ascent {
    owner_refs: BTreeSet<OwnerReference>,
    annotations: BTreeMap<OwnerReference, BTreeSet<String>>,
    config_file_paths: Vec<String>,
    unresolved_imports: Vec<UnresolvedImport>,
    messages: Vec<DebugMessage>,
    ignore_parent: bool,
    ignore_global: bool,
}

pub struct CodeOwnerResolver<'a> {
    project: String,
    loader: &'a dyn ConfigLoader,
    projects: &'a dyn ProjectAccess,
    accounts: &'a dyn AccountResolver,
    settings: &'a EffectiveSettings,
    matcher: &'static dyn PathExpressionMatcher,
    viewer: Option<AccountId>,
}

impl<'a> CodeOwnerResolver<'a> {
    /// A resolver for paths on `settings.branch` of `project`.
    pub fn new(
        project: impl Into<String>,
        loader: &'a dyn ConfigLoader,
        projects: &'a dyn ProjectAccess,
        accounts: &'a dyn AccountResolver,
        settings: &'a EffectiveSettings,
    ) -> Self {
        Self {
            project: project.into(),
            loader,
            projects,
            accounts,
            settings,
            matcher: settings.path_expressions.matcher(),
            viewer: None,
        }
    }

    /// Only keep owners that `viewer` can see.
    pub fn with_viewer(mut self, viewer: Option<AccountId>) -> Self {
        self.viewer = viewer;
        self
    }

    /// Resolve the code owners of `path`, using the configs at `revision` of
    /// the branch (the branch tip if `None`).
    pub fn resolve_path_owners(
        &self,
        path: &str,
        revision: Option<&Revision>,
    ) -> Result<ResolvedOwners, ResolveError> {
        if !path.starts_with('/') {
            return Err(ResolveError::InvalidPath(path.to_owned()));
        }
        let path = paths::normalize(path)
            .filter(|path| path != "/")
            .ok_or_else(|| ResolveError::InvalidPath(path.to_owned()))?;

        let mut ascent = Ascent::default();
        for folder in paths::ancestor_folders(&path) {
            let key = ConfigKey::new(self.project.as_str(), &self.settings.branch, folder);
            self.visit(&mut ascent, &key, revision, &path)?;
            if ascent.ignore_parent {
                debug!(%path, %key, "ascent stopped, parent owners are ignored");
                break;
            }
        }

        if !ascent.ignore_parent {
            let key = ConfigKey::new(self.project.as_str(), DEFAULT_CONFIG_BRANCH, "/");
            self.visit(&mut ascent, &key, None, &path)?;
        }

        let mut resolved = ResolvedOwners {
            path: path.clone(),
            config_file_paths: ascent.config_file_paths,
            has_unresolved_imports: !ascent.unresolved_imports.is_empty(),
            unresolved_imports: ascent.unresolved_imports,
            messages: ascent.messages,
            annotations: ascent.annotations,
            ..ResolvedOwners::default()
        };
        let mut owner_refs = ascent.owner_refs;

        if !ascent.ignore_global && !self.settings.global_code_owners.is_empty() {
            resolved.is_global_owner = true;
            owner_refs.extend(self.settings.global_code_owners.iter().cloned());
        }

        if owner_refs.is_empty()
            && !ascent.ignore_parent
            && self.settings.fallback_code_owners == FallbackCodeOwners::AllUsers
        {
            debug!(%path, "no code owners declared, all users are fallback code owners");
            resolved.is_default_owner = true;
            resolved.owned_by_all_users = true;
        }

        for owner in &owner_refs {
            match owner {
                OwnerReference::AllUsers => resolved.owned_by_all_users = true,
                OwnerReference::Email(email) => {
                    let account = self.resolve_email(email);
                    resolved.messages.extend(account.messages);
                    match account.value {
                        Some(account) => {
                            resolved.accounts.insert(account);
                        }
                        None => resolved.has_unresolved_owners = true,
                    }
                }
            }
        }
        resolved.owner_refs = owner_refs;

        trace!(%path, owners = ?resolved.owner_refs, "resolved code owners");
        Ok(resolved)
    }

    /// Add the owners declared for `path` by the config of `key`.
    fn visit(
        &self,
        ascent: &mut Ascent,
        key: &ConfigKey,
        revision: Option<&Revision>,
        path: &str,
    ) -> Result<(), ResolveError> {
        let config = match self.loader.load(key, revision) {
            Ok(Some(config)) => config,
            Ok(None) => return Ok(()),
            Err(LoadError::InvalidConfig(err)) => {
                warn!(%key, error = %err, "ignoring invalid code owner config");
                ascent.messages.push(DebugMessage::for_everyone(format!(
                    "ignoring invalid code owner config: {}",
                    err
                )));
                return Ok(());
            }
            Err(LoadError::Storage(err)) => return Err(err.into()),
        };

        let resolved = ImportResolver::new(self.loader, self.projects).resolve(&config, revision)?;
        ascent
            .config_file_paths
            .push(key.file_path(self.loader.file_name()));
        ascent.unresolved_imports.extend(resolved.unresolved_imports);
        ascent.messages.extend(resolved.messages);

        let relative_path = paths::relative_to(path, key.folder());
        let matching: Vec<_> = resolved
            .config
            .owner_sets
            .iter()
            .filter(|owner_set| {
                owner_set.is_global()
                    || owner_set
                        .path_expressions
                        .iter()
                        .any(|expression| self.matcher.matches(expression, relative_path))
            })
            .collect();

        // A matching owner set that ignores global and parent owners also
        // hides the owner sets of its own config that apply to every path
        let ignore_global_and_parent = matching
            .iter()
            .any(|owner_set| owner_set.ignore_global_and_parent);
        for owner_set in matching {
            if ignore_global_and_parent && !owner_set.ignore_global_and_parent {
                continue;
            }
            ascent.owner_refs.extend(owner_set.owners.iter().cloned());
            for (owner, annotations) in &owner_set.annotations {
                if owner_set.owners.contains(owner) {
                    ascent
                        .annotations
                        .entry(owner.clone())
                        .or_default()
                        .extend(annotations.iter().cloned());
                }
            }
        }

        if ignore_global_and_parent {
            ascent.ignore_global = true;
        }
        ascent.ignore_parent |= ignore_global_and_parent || resolved.config.ignore_parent_owners;
        Ok(())
    }

    /// Map a code owner email to a visible, active account.
    fn resolve_email(&self, email: &str) -> OptionalResultWithMessages<AccountId> {
        if !self.settings.is_email_domain_allowed(email) {
            return OptionalResultWithMessages::empty(vec![DebugMessage::for_everyone(format!(
                "domain of email {} is not allowed for code owners",
                email
            ))]);
        }

        let Some(account) = self.accounts.resolve(email) else {
            return OptionalResultWithMessages::empty(vec![DebugMessage::for_everyone(format!(
                "cannot resolve code owner email {}: no account with this email exists",
                email
            ))]);
        };

        if !self.accounts.is_active(account) {
            return OptionalResultWithMessages::empty(vec![DebugMessage::for_everyone(format!(
                "cannot resolve code owner email {}: account {} is inactive",
                email, account
            ))]);
        }

        if !self.accounts.is_visible(account, self.viewer) {
            return OptionalResultWithMessages::empty(vec![DebugMessage {
                admin: format!(
                    "cannot resolve code owner email {}: account {} is not visible",
                    email, account
                ),
                user: Some(format!("cannot resolve code owner email {}", email)),
            }]);
        }

        OptionalResultWithMessages::of(
            account,
            vec![DebugMessage::admin_only(format!(
                "resolved code owner email {} to account {}",
                email, account
            ))],
        )
    }
}

//! Flattening of imports. Resolving a config replaces its config-level
//! imports with the owner sets they pull in, and each owner set's imports
//! with the owners they pull in, following imports transitively.

use std::{collections::HashSet, fmt};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    loader::{ConfigLoader, LoadError, ProjectAccess, StorageError},
    messages::DebugMessage,
    owner_config::{ConfigKey, ConfigReference, ImportMode, OwnerConfig, OwnerSet, Revision},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "kind", content = "details")]
pub enum UnresolvedReason {
    DoesNotExist,
    Cycle,
    ProjectNotFound,
    InvalidPath,
    InvalidConfig(String),
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DoesNotExist => f.write_str("code owner config does not exist"),
            Self::Cycle => f.write_str("import cycle detected"),
            Self::ProjectNotFound => f.write_str("project not found"),
            Self::InvalidPath => f.write_str("import path is outside of the repository"),
            Self::InvalidConfig(message) => write!(f, "invalid code owner config: {}", message),
        }
    }
}

/// An import that couldn't be followed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedImport {
    pub importing: ConfigKey,
    pub reference: ConfigReference,
    pub reason: UnresolvedReason,
}

impl fmt::Display for UnresolvedImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot resolve import of {} in {}: {}",
            self.reference, self.importing, self.reason
        )
    }
}

/// A config with all imports spliced in. `config.imports` and the owner
/// sets' imports are empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOwnerConfig {
    pub config: OwnerConfig,
    pub unresolved_imports: Vec<UnresolvedImport>,
    pub messages: Vec<DebugMessage>,
}

pub struct ImportResolver<'a> {
    loader: &'a dyn ConfigLoader,
    projects: &'a dyn ProjectAccess,
}

struct Resolution<'r> {
    root: &'r ConfigKey,
    revision: Option<&'r Revision>,
    unresolved_imports: Vec<UnresolvedImport>,
    messages: Vec<DebugMessage>,
}

/// One pending import. `chain` holds the keys of the configs on the import
/// path that led here, starting with the config being resolved; an import
/// of any of them is a cycle.
struct Work {
    importing: ConfigKey,
    reference: ConfigReference,
    mode: ImportMode,
    chain: Vec<ConfigKey>,
}

struct Spliced {
    owner_sets: Vec<OwnerSet>,
    ignore_parent_owners: bool,
}

impl<'a> ImportResolver<'a> {
    pub fn new(loader: &'a dyn ConfigLoader, projects: &'a dyn ProjectAccess) -> Self {
        Self { loader, projects }
    }

    /// Resolve the imports of `config`. Imports of configs on the same
    /// project and branch are read at `revision` (the branch tip if `None`),
    /// imports from elsewhere always at their branch tip.
    ///
    /// Only storage failures are errors; imports that can't be followed are
    /// recorded in [`ResolvedOwnerConfig::unresolved_imports`].
    pub fn resolve(
        &self,
        config: &OwnerConfig,
        revision: Option<&Revision>,
    ) -> Result<ResolvedOwnerConfig, StorageError> {
        if !config.has_imports() {
            return Ok(ResolvedOwnerConfig {
                config: config.clone(),
                unresolved_imports: Vec::new(),
                messages: Vec::new(),
            });
        }

        let mut resolution = Resolution {
            root: &config.key,
            revision,
            unresolved_imports: Vec::new(),
            messages: Vec::new(),
        };
        let chain = vec![config.key.clone()];

        let mut owner_sets = Vec::with_capacity(config.owner_sets.len());
        for owner_set in &config.owner_sets {
            owner_sets.push(self.resolve_owner_set(&mut resolution, &config.key, owner_set, &chain)?);
        }
        let spliced = self.splice(&mut resolution, &config.key, &config.imports, &chain)?;
        for owner_set in spliced.owner_sets {
            if !owner_sets.contains(&owner_set) {
                owner_sets.push(owner_set);
            }
        }

        let mut resolved = config.clone();
        resolved.owner_sets = owner_sets;
        resolved.imports.clear();
        resolved.ignore_parent_owners |= spliced.ignore_parent_owners;

        Ok(ResolvedOwnerConfig {
            config: resolved,
            unresolved_imports: resolution.unresolved_imports,
            messages: resolution.messages,
        })
    }

    /// Follow `references` transitively and collect the owner sets they
    /// contribute, each with its own imports resolved.
    fn splice(
        &self,
        resolution: &mut Resolution<'_>,
        importing: &ConfigKey,
        references: &[ConfigReference],
        chain: &[ConfigKey],
    ) -> Result<Spliced, StorageError> {
        let mut spliced = Spliced {
            owner_sets: Vec::new(),
            ignore_parent_owners: false,
        };
        let mut already_spliced: HashSet<(ConfigKey, ImportMode)> = HashSet::new();
        let mut worklist: Vec<Work> = references
            .iter()
            .rev()
            .map(|reference| Work {
                importing: importing.clone(),
                reference: reference.clone(),
                mode: reference.mode,
                chain: chain.to_vec(),
            })
            .collect();

        while let Some(work) = worklist.pop() {
            let Some(target) = self.load_target(resolution, &work)? else {
                continue;
            };
            if !already_spliced.insert((target.key.clone(), work.mode)) {
                // Reached again via another path (e.g. a diamond), nothing new
                continue;
            }
            debug!(importing = %work.importing, imported = %target.key, mode = ?work.mode, "splicing import");

            let mut chain = work.chain;
            chain.push(target.key.clone());
            for owner_set in &target.owner_sets {
                if work.mode == ImportMode::All || owner_set.is_global() {
                    let owner_set = self.resolve_owner_set(resolution, &target.key, owner_set, &chain)?;
                    spliced.owner_sets.push(owner_set);
                }
            }
            if work.mode == ImportMode::All {
                spliced.ignore_parent_owners |= target.ignore_parent_owners;
            }
            for reference in target.imports.iter().rev() {
                worklist.push(Work {
                    importing: target.key.clone(),
                    reference: reference.clone(),
                    mode: work.mode.narrow(reference.mode),
                    chain: chain.clone(),
                });
            }
        }
        Ok(spliced)
    }

    /// Resolve the imports of a single owner set: the owners of the imported
    /// owner sets become owners of this set.
    fn resolve_owner_set(
        &self,
        resolution: &mut Resolution<'_>,
        owner_key: &ConfigKey,
        owner_set: &OwnerSet,
        chain: &[ConfigKey],
    ) -> Result<OwnerSet, StorageError> {
        if owner_set.imports.is_empty() {
            return Ok(owner_set.clone());
        }

        let spliced = self.splice(resolution, owner_key, &owner_set.imports, chain)?;
        let mut resolved = owner_set.clone();
        resolved.imports.clear();
        for imported in spliced.owner_sets {
            resolved.owners.extend(imported.owners);
            for (owner, annotations) in imported.annotations {
                resolved.annotations.entry(owner).or_default().extend(annotations);
            }
        }
        Ok(resolved)
    }

    /// Load the config referenced by `work`, recording why if that's not
    /// possible.
    fn load_target(
        &self,
        resolution: &mut Resolution<'_>,
        work: &Work,
    ) -> Result<Option<std::sync::Arc<OwnerConfig>>, StorageError> {
        let Some(target_key) = work.reference.target_key(&work.importing, self.loader.file_name())
        else {
            self.unresolved(resolution, work, UnresolvedReason::InvalidPath);
            return Ok(None);
        };

        if !self.projects.is_readable(&target_key.project) {
            self.unresolved(resolution, work, UnresolvedReason::ProjectNotFound);
            return Ok(None);
        }

        if work.chain.contains(&target_key) {
            self.unresolved(resolution, work, UnresolvedReason::Cycle);
            return Ok(None);
        }

        let on_root_branch = target_key.project == resolution.root.project
            && target_key.branch == resolution.root.branch;
        let revision = if on_root_branch {
            resolution.revision
        } else {
            None
        };

        match self.loader.load(&target_key, revision) {
            Ok(Some(config)) => Ok(Some(config)),
            Ok(None) => {
                self.unresolved(resolution, work, UnresolvedReason::DoesNotExist);
                Ok(None)
            }
            Err(LoadError::InvalidConfig(err)) => {
                self.unresolved(resolution, work, UnresolvedReason::InvalidConfig(err.to_string()));
                Ok(None)
            }
            Err(LoadError::Storage(err)) => Err(err),
        }
    }

    fn unresolved(&self, resolution: &mut Resolution<'_>, work: &Work, reason: UnresolvedReason) {
        let unresolved = UnresolvedImport {
            importing: work.importing.clone(),
            reference: work.reference.clone(),
            reason,
        };
        warn!(%unresolved, "unresolved import");
        resolution
            .messages
            .push(DebugMessage::for_everyone(unresolved.to_string()));
        resolution.unresolved_imports.push(unresolved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{InvalidConfigError, ParseError},
        loader::{AllProjectsReadable, StaticConfigLoader},
        owner_config::OwnerReference,
    };

    fn key(folder: &str) -> ConfigKey {
        ConfigKey::new("p", "main", folder)
    }

    fn config(folder: &str) -> OwnerConfig {
        OwnerConfig::new(key(folder), Revision::new("r1"))
    }

    fn all(path: &str) -> ConfigReference {
        ConfigReference::new(ImportMode::All, path)
    }

    fn global_only(path: &str) -> ConfigReference {
        ConfigReference::new(ImportMode::GlobalCodeOwnerSetsOnly, path)
    }

    fn owners_of(resolved: &ResolvedOwnerConfig) -> Vec<String> {
        let mut owners: Vec<String> = resolved
            .config
            .owner_sets
            .iter()
            .flat_map(|s| s.owners.iter().map(OwnerReference::to_string))
            .collect();
        owners.sort();
        owners.dedup();
        owners
    }

    fn resolve(loader: &StaticConfigLoader, folder: &str) -> ResolvedOwnerConfig {
        let config = loader.load(&key(folder), None).unwrap().unwrap();
        ImportResolver::new(loader, &AllProjectsReadable)
            .resolve(&config, None)
            .unwrap()
    }

    #[test]
    fn test_config_without_imports_is_unchanged() {
        let loader = StaticConfigLoader::new("OWNERS")
            .add(config("/a/").add_owner_set(OwnerSet::with_owners(["alice@x.com"])));
        let resolved = resolve(&loader, "/a/");
        assert_eq!(&resolved.config, loader.load(&key("/a/"), None).unwrap().unwrap().as_ref());
        assert!(resolved.unresolved_imports.is_empty());
    }

    #[test]
    fn test_import_all() {
        let loader = StaticConfigLoader::new("OWNERS")
            .add(
                config("/a/")
                    .add_owner_set(OwnerSet::with_owners(["alice@x.com"]))
                    .add_import(all("/shared/OWNERS")),
            )
            .add(
                config("/shared/")
                    .ignoring_parent_owners()
                    .add_owner_set(OwnerSet::with_owners(["carol@x.com"]))
                    .add_owner_set(
                        OwnerSet::with_owners(["dave@x.com"]).add_path_expression("*.md"),
                    ),
            );
        let resolved = resolve(&loader, "/a/");
        assert_eq!(owners_of(&resolved), vec!["alice@x.com", "carol@x.com", "dave@x.com"]);
        assert!(resolved.config.ignore_parent_owners);
        assert!(resolved.config.imports.is_empty());
    }

    #[test]
    fn test_import_global_code_owner_sets_only() {
        let loader = StaticConfigLoader::new("OWNERS")
            .add(config("/a/").add_import(global_only("/shared/OWNERS")))
            .add(
                config("/shared/")
                    .ignoring_parent_owners()
                    .add_owner_set(OwnerSet::with_owners(["carol@x.com"]))
                    .add_owner_set(
                        OwnerSet::with_owners(["dave@x.com"]).add_path_expression("*.md"),
                    )
                    .add_import(all("/more/OWNERS")),
            )
            .add(
                config("/more/")
                    .add_owner_set(OwnerSet::with_owners(["erin@x.com"]))
                    .add_owner_set(
                        OwnerSet::with_owners(["frank@x.com"]).add_path_expression("*.txt"),
                    ),
            );
        let resolved = resolve(&loader, "/a/");
        assert_eq!(owners_of(&resolved), vec!["carol@x.com", "erin@x.com"]);
        assert!(resolved.config.owner_sets.iter().all(OwnerSet::is_global));
        assert!(!resolved.config.ignore_parent_owners);
    }

    #[test]
    fn test_self_import_is_a_cycle() {
        let loader = StaticConfigLoader::new("OWNERS").add(
            config("/a/")
                .add_owner_set(OwnerSet::with_owners(["alice@x.com"]))
                .add_import(all("/a/OWNERS")),
        );
        let resolved = resolve(&loader, "/a/");
        assert_eq!(owners_of(&resolved), vec!["alice@x.com"]);
        assert_eq!(resolved.unresolved_imports.len(), 1);
        assert_eq!(resolved.unresolved_imports[0].reason, UnresolvedReason::Cycle);
    }

    #[test]
    fn test_transitive_cycle_terminates() {
        let loader = StaticConfigLoader::new("OWNERS")
            .add(
                config("/a/")
                    .add_owner_set(OwnerSet::with_owners(["alice@x.com"]))
                    .add_import(all("/b/OWNERS")),
            )
            .add(
                config("/b/")
                    .add_owner_set(OwnerSet::with_owners(["bob@x.com"]))
                    .add_import(all("/a/OWNERS")),
            );
        let resolved = resolve(&loader, "/a/");
        assert_eq!(owners_of(&resolved), vec!["alice@x.com", "bob@x.com"]);
        assert_eq!(resolved.unresolved_imports.len(), 1);
        assert_eq!(resolved.unresolved_imports[0].importing, key("/b/"));
        assert_eq!(resolved.unresolved_imports[0].reason, UnresolvedReason::Cycle);
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let loader = StaticConfigLoader::new("OWNERS")
            .add(
                config("/a/")
                    .add_import(all("/b/OWNERS"))
                    .add_import(all("/c/OWNERS")),
            )
            .add(config("/b/").add_import(all("/d/OWNERS")))
            .add(config("/c/").add_import(all("/d/OWNERS")))
            .add(config("/d/").add_owner_set(OwnerSet::with_owners(["dave@x.com"])));
        let resolved = resolve(&loader, "/a/");
        assert_eq!(owners_of(&resolved), vec!["dave@x.com"]);
        assert!(resolved.unresolved_imports.is_empty());
        assert_eq!(resolved.config.owner_sets.len(), 1);
    }

    #[test]
    fn test_missing_and_invalid_imports() {
        let invalid = InvalidConfigError {
            file: "/bad/OWNERS".to_owned(),
            errors: vec![ParseError::new("invalid owner: x", 1, (0, 1))],
        };
        let loader = StaticConfigLoader::new("OWNERS")
            .add(
                config("/a/")
                    .add_owner_set(OwnerSet::with_owners(["alice@x.com"]))
                    .add_import(all("/missing/OWNERS"))
                    .add_import(all("/bad/OWNERS"))
                    .add_import(all("../../OWNERS")),
            )
            .add_invalid(key("/bad/"), invalid);
        let resolved = resolve(&loader, "/a/");
        assert_eq!(owners_of(&resolved), vec!["alice@x.com"]);
        let reasons: Vec<_> = resolved
            .unresolved_imports
            .iter()
            .map(|u| u.reason.clone())
            .collect();
        assert_eq!(
            reasons,
            vec![
                UnresolvedReason::DoesNotExist,
                UnresolvedReason::InvalidConfig(
                    "invalid code owner config file '/bad/OWNERS': line 1: invalid owner: x"
                        .to_owned()
                ),
                UnresolvedReason::InvalidPath,
            ]
        );
        assert_eq!(resolved.messages.len(), 3);
    }

    #[test]
    fn test_owner_set_import_adds_owners_to_that_set_only() {
        let loader = StaticConfigLoader::new("OWNERS")
            .add(
                config("/a/")
                    .add_owner_set(OwnerSet::with_owners(["alice@x.com"]))
                    .add_owner_set(
                        OwnerSet::new()
                            .add_path_expression("BUILD")
                            .add_import(global_only("/build/OWNERS")),
                    ),
            )
            .add(
                config("/build/")
                    .add_owner_set(
                        OwnerSet::with_owners(["bob@x.com"])
                            .add_annotation("bob@x.com", "LAST_RESORT_SUGGESTION"),
                    )
                    .add_owner_set(
                        OwnerSet::with_owners(["carol@x.com"]).add_path_expression("*.bzl"),
                    ),
            );
        let resolved = resolve(&loader, "/a/");
        let sets = &resolved.config.owner_sets;
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0], OwnerSet::with_owners(["alice@x.com"]));
        assert_eq!(
            sets[1],
            OwnerSet::with_owners(["bob@x.com"])
                .add_path_expression("BUILD")
                .add_annotation("bob@x.com", "LAST_RESORT_SUGGESTION")
        );
    }

    #[test]
    fn test_unreadable_project() {
        struct OnlyP;
        impl ProjectAccess for OnlyP {
            fn exists(&self, project: &str) -> bool {
                project == "p"
            }
        }

        let loader = StaticConfigLoader::new("OWNERS").add(
            config("/a/").add_import(all("/OWNERS").with_project("secret")),
        );
        let config = loader.load(&key("/a/"), None).unwrap().unwrap();
        let resolved = ImportResolver::new(&loader, &OnlyP)
            .resolve(&config, None)
            .unwrap();
        assert_eq!(
            resolved.unresolved_imports[0].reason,
            UnresolvedReason::ProjectNotFound
        );
    }
}

//! The owner declaration model: what an OWNERS file says once it has been
//! parsed, independent of the encoding it was stored in.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::paths;

/// The ref that is prepended to branch names that aren't fully qualified.
pub const REFS_HEADS: &str = "refs/heads/";

/// Qualify a short branch name (`main`) as a ref (`refs/heads/main`).
pub fn normalize_branch(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_owned()
    } else {
        format!("{}{}", REFS_HEADS, branch)
    }
}

/// A reference to a code owner: either a user identified by email, or the
/// `*` wildcard meaning that every user is a code owner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OwnerReference {
    AllUsers,
    Email(String),
}

impl OwnerReference {
    pub const ALL_USERS_WILDCARD: &'static str = "*";

    pub fn email(email: impl Into<String>) -> Self {
        Self::Email(email.into())
    }

    pub fn as_email(&self) -> Option<&str> {
        match self {
            Self::Email(email) => Some(email),
            Self::AllUsers => None,
        }
    }
}

impl fmt::Display for OwnerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllUsers => f.write_str(Self::ALL_USERS_WILDCARD),
            Self::Email(email) => f.write_str(email),
        }
    }
}

impl FromStr for OwnerReference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == Self::ALL_USERS_WILDCARD {
            Ok(Self::AllUsers)
        } else if s.is_empty() {
            Err("empty code owner reference".to_owned())
        } else {
            Ok(Self::Email(s.to_owned()))
        }
    }
}

impl TryFrom<String> for OwnerReference {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OwnerReference> for String {
    fn from(owner: OwnerReference) -> Self {
        owner.to_string()
    }
}

/// How much of an imported config is pulled into the importing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportMode {
    /// Every owner set, and the `ignore_parent_owners` flag.
    All,
    /// Only the owner sets without path expressions.
    GlobalCodeOwnerSetsOnly,
}

impl ImportMode {
    /// The mode for a transitive import reached via an edge with mode `self`.
    /// A global-only edge never lets path-scoped owner sets through further
    /// down the import chain.
    pub fn narrow(self, next: ImportMode) -> ImportMode {
        match (self, next) {
            (ImportMode::All, ImportMode::All) => ImportMode::All,
            _ => ImportMode::GlobalCodeOwnerSetsOnly,
        }
    }
}

/// Identifies an owner config: the project, branch and folder it applies to.
/// `file_name` is set only for configs that aren't stored under the
/// backend's default file name, which is the case for some import targets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfigKey {
    pub project: String,
    pub branch: String,
    folder: String,
    file_name: Option<String>,
}

impl ConfigKey {
    pub fn new(project: impl Into<String>, branch: &str, folder: &str) -> Self {
        Self {
            project: project.into(),
            branch: normalize_branch(branch),
            folder: paths::normalize_folder(folder),
            file_name: None,
        }
    }

    /// Key for the config stored in the file at `file_path`. If the file name
    /// is the backend's default file name the key is the same as the folder's
    /// key, so that importing a folder's own OWNERS file is recognized as a
    /// cycle.
    pub fn for_file(
        project: impl Into<String>,
        branch: &str,
        file_path: &str,
        default_file_name: &str,
    ) -> Self {
        let (folder, file_name) = paths::split_file(file_path);
        let key = Self::new(project, branch, folder);
        if file_name == default_file_name {
            key
        } else {
            key.with_file_name(file_name)
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// The full path of the file that stores this config.
    pub fn file_path(&self, default_file_name: &str) -> String {
        format!(
            "{}{}",
            self.folder,
            self.file_name.as_deref().unwrap_or(default_file_name)
        )
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.project, self.branch, self.folder)?;
        if let Some(file_name) = &self.file_name {
            f.write_str(file_name)?;
        }
        Ok(())
    }
}

/// Content-addressed identity of a config version in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub String);

impl Revision {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An import directive. Absent project or branch mean the importer's.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfigReference {
    pub mode: ImportMode,
    pub project: Option<String>,
    pub branch: Option<String>,
    pub file_path: String,
}

impl ConfigReference {
    pub fn new(mode: ImportMode, file_path: impl Into<String>) -> Self {
        Self {
            mode,
            project: None,
            branch: None,
            file_path: file_path.into(),
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_branch(mut self, branch: &str) -> Self {
        self.branch = Some(normalize_branch(branch));
        self
    }

    /// Key of the referenced config, filling in project and branch from the
    /// importing config. Returns `None` if the file path escapes the
    /// repository root.
    pub fn target_key(&self, importing: &ConfigKey, default_file_name: &str) -> Option<ConfigKey> {
        let file_path = paths::join(importing.folder(), &self.file_path)?;
        let project = self.project.as_deref().unwrap_or(&importing.project);
        let branch = self.branch.as_deref().unwrap_or(&importing.branch);
        Some(ConfigKey::for_file(
            project,
            branch,
            &file_path,
            default_file_name,
        ))
    }
}

impl fmt::Display for ConfigReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(project) = &self.project {
            write!(f, "{}:", project)?;
        }
        if let Some(branch) = &self.branch {
            write!(f, "{}:", branch)?;
        }
        f.write_str(&self.file_path)
    }
}

/// A group of code owners, scoped to the paths matched by its path
/// expressions. Without path expressions the set applies to every path in
/// the folder (and its sub-folders) of the containing config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerSet {
    pub owners: BTreeSet<OwnerReference>,
    pub path_expressions: Vec<String>,
    pub imports: Vec<ConfigReference>,
    pub ignore_global_and_parent: bool,
    pub annotations: BTreeMap<OwnerReference, BTreeSet<String>>,
}

impl OwnerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owners<I, O>(owners: I) -> Self
    where
        I: IntoIterator<Item = O>,
        O: Into<OwnerReference>,
    {
        Self {
            owners: owners.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn add_path_expression(mut self, expression: impl Into<String>) -> Self {
        let expression = expression.into();
        if !self.path_expressions.contains(&expression) {
            self.path_expressions.push(expression);
        }
        self
    }

    pub fn add_import(mut self, reference: ConfigReference) -> Self {
        if !self.imports.contains(&reference) {
            self.imports.push(reference);
        }
        self
    }

    pub fn add_annotation(mut self, owner: impl Into<OwnerReference>, annotation: &str) -> Self {
        self.annotations
            .entry(owner.into())
            .or_default()
            .insert(annotation.to_owned());
        self
    }

    pub fn ignoring_global_and_parent(mut self) -> Self {
        self.ignore_global_and_parent = true;
        self
    }

    /// Whether the set applies to every path of its config.
    pub fn is_global(&self) -> bool {
        self.path_expressions.is_empty()
    }
}

impl From<&str> for OwnerReference {
    fn from(s: &str) -> Self {
        if s == Self::ALL_USERS_WILDCARD {
            Self::AllUsers
        } else {
            Self::Email(s.to_owned())
        }
    }
}

/// The parsed content of one OWNERS file at one revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerConfig {
    pub key: ConfigKey,
    pub revision: Revision,
    pub owner_sets: Vec<OwnerSet>,
    pub imports: Vec<ConfigReference>,
    pub ignore_parent_owners: bool,
}

impl OwnerConfig {
    pub fn new(key: ConfigKey, revision: Revision) -> Self {
        Self {
            key,
            revision,
            owner_sets: Vec::new(),
            imports: Vec::new(),
            ignore_parent_owners: false,
        }
    }

    pub fn add_owner_set(mut self, owner_set: OwnerSet) -> Self {
        self.owner_sets.push(owner_set);
        self
    }

    pub fn add_import(mut self, reference: ConfigReference) -> Self {
        if !self.imports.contains(&reference) {
            self.imports.push(reference);
        }
        self
    }

    pub fn ignoring_parent_owners(mut self) -> Self {
        self.ignore_parent_owners = true;
        self
    }

    /// Whether the config has any imports, at config or owner set level.
    pub fn has_imports(&self) -> bool {
        !self.imports.is_empty() || self.owner_sets.iter().any(|s| !s.imports.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_key_normalization() {
        let key = ConfigKey::new("p", "main", "a/b");
        assert_eq!(key.branch, "refs/heads/main");
        assert_eq!(key.folder(), "/a/b/");
        assert_eq!(key.file_path("OWNERS"), "/a/b/OWNERS");
        assert_eq!(key.to_string(), "p:refs/heads/main:/a/b/");
    }

    #[test]
    fn test_config_key_for_default_file_is_folder_key() {
        assert_eq!(
            ConfigKey::for_file("p", "main", "/a/OWNERS", "OWNERS"),
            ConfigKey::new("p", "main", "/a/")
        );
        let other = ConfigKey::for_file("p", "main", "/a/OWNERS_JAVA", "OWNERS");
        assert_eq!(other.file_name(), Some("OWNERS_JAVA"));
        assert_eq!(other.file_path("OWNERS"), "/a/OWNERS_JAVA");
    }

    #[test]
    fn test_target_key_defaults_to_importer() {
        let importing = ConfigKey::new("p", "main", "/a/b/");
        let reference = ConfigReference::new(ImportMode::All, "../OWNERS");
        assert_eq!(
            reference.target_key(&importing, "OWNERS"),
            Some(ConfigKey::new("p", "main", "/a/"))
        );

        let reference = ConfigReference::new(ImportMode::All, "/OWNERS")
            .with_project("q")
            .with_branch("stable");
        assert_eq!(
            reference.target_key(&importing, "OWNERS"),
            Some(ConfigKey::new("q", "refs/heads/stable", "/"))
        );
    }

    #[test]
    fn test_owner_reference_parsing() {
        assert_eq!("*".parse::<OwnerReference>(), Ok(OwnerReference::AllUsers));
        assert_eq!(
            " a@x.com ".parse::<OwnerReference>(),
            Ok(OwnerReference::email("a@x.com"))
        );
        assert!("".parse::<OwnerReference>().is_err());
    }

    #[test]
    fn test_import_mode_narrowing() {
        use ImportMode::*;
        assert_eq!(All.narrow(All), All);
        assert_eq!(All.narrow(GlobalCodeOwnerSetsOnly), GlobalCodeOwnerSetsOnly);
        assert_eq!(GlobalCodeOwnerSetsOnly.narrow(All), GlobalCodeOwnerSetsOnly);
    }

    #[test]
    fn test_owner_set_builders_deduplicate() {
        let set = OwnerSet::with_owners(["a@x.com", "a@x.com"])
            .add_path_expression("*.md")
            .add_path_expression("*.md");
        assert_eq!(set.owners.len(), 1);
        assert_eq!(set.path_expressions, vec!["*.md".to_owned()]);
        assert!(!set.is_global());
    }
}

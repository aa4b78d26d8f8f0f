//! Resolved, typed code owner settings. Settings are project wide and can be
//! overridden per branch; [`CodeOwnersSettings::for_branch`] produces the
//! settings in force for one branch.

use std::{collections::BTreeSet, fmt, str::FromStr, sync::Arc};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    accounts::AccountId,
    backend::{self, Backend},
    owner_config::{normalize_branch, OwnerReference},
    path_expressions::PathExpressions,
};

/// The branch that holds a project's default code owner config.
pub const DEFAULT_CONFIG_BRANCH: &str = "refs/meta/config";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("unknown code owner backend '{0}'")]
    UnknownBackend(String),
    #[error("label '{0}' is not defined")]
    UnknownLabel(String),
    #[error("value {value} is out of range for label '{label}' ({min}..={max})")]
    ValueOutOfRange {
        label: String,
        value: i16,
        min: i16,
        max: i16,
    },
    #[error("invalid approval '{0}', expected <label>+<value>")]
    InvalidApproval(String),
    #[error("invalid branch pattern '{pattern}': {reason}")]
    InvalidBranchPattern { pattern: String, reason: String },
    #[error("invalid global code owner '{0}'")]
    InvalidGlobalCodeOwner(String),
    #[error("max result page size must be greater than 0")]
    InvalidPageSize,
}

/// A label vote that is required, e.g. `Code-Review+1`. Votes at or above
/// `value` satisfy it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequiredApproval {
    pub label: String,
    pub value: i16,
}

impl RequiredApproval {
    pub fn new(label: impl Into<String>, value: i16) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }

    pub fn is_satisfied_by(&self, label: &str, value: i16) -> bool {
        self.label == label && value >= self.value
    }
}

impl fmt::Display for RequiredApproval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:+}", self.label, self.value)
    }
}

impl FromStr for RequiredApproval {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SettingsError::InvalidApproval(s.to_owned());
        // Label names may contain '-', so the value starts at the last sign
        let idx = s.rfind(['+', '-']).ok_or_else(invalid)?;
        let (label, value) = s.split_at(idx);
        if label.is_empty() {
            return Err(invalid());
        }
        let value = value.parse::<i16>().map_err(|_| invalid())?;
        Ok(Self::new(label, value))
    }
}

impl TryFrom<String> for RequiredApproval {
    type Error = SettingsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RequiredApproval> for String {
    fn from(approval: RequiredApproval) -> Self {
        approval.to_string()
    }
}

/// A label as defined on the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LabelDefinition {
    pub name: String,
    pub min: i16,
    pub max: i16,
    /// Votes of the uploader of the current patch set don't count.
    #[serde(default)]
    pub ignore_self_approval: bool,
}

impl LabelDefinition {
    pub fn new(name: impl Into<String>, min: i16, max: i16) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            ignore_self_approval: false,
        }
    }

    pub fn ignoring_self_approval(mut self) -> Self {
        self.ignore_self_approval = true;
        self
    }
}

/// Who owns paths for which no code owners are declared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackCodeOwners {
    #[default]
    None,
    AllUsers,
}

/// Which files of a merge commit need code owner approval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeCommitStrategy {
    /// Every file that differs from the first parent.
    #[default]
    AllChangedFiles,
    /// Only files that differ from every parent, i.e. conflict resolutions.
    FilesWithConflictResolution,
}

/// Overrides for the branches matching `branch`: a full ref name, or a regex
/// when it starts with `^`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BranchSettings {
    pub branch: String,
    pub backend: Option<String>,
    pub path_expressions: Option<PathExpressions>,
    pub required_approval: Option<RequiredApproval>,
    pub override_approvals: Option<Vec<RequiredApproval>>,
    pub fallback_code_owners: Option<FallbackCodeOwners>,
    pub merge_commit_strategy: Option<MergeCommitStrategy>,
    pub enable_implicit_approvals: Option<bool>,
    pub global_code_owners: Option<Vec<String>>,
    pub reject_non_resolvable_imports: Option<bool>,
    pub reject_non_resolvable_code_owners: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CodeOwnersSettings {
    pub disabled: bool,
    pub disabled_branches: Vec<String>,
    pub backend: String,
    /// Dialect of path expressions. Defaults to the backend's.
    pub path_expressions: Option<PathExpressions>,
    pub required_approval: RequiredApproval,
    pub override_approvals: Vec<RequiredApproval>,
    pub fallback_code_owners: FallbackCodeOwners,
    pub merge_commit_strategy: MergeCommitStrategy,
    pub enable_implicit_approvals: bool,
    pub exempted_accounts: BTreeSet<AccountId>,
    pub exempt_pure_reverts: bool,
    pub global_code_owners: Vec<String>,
    /// Email domains code owners must have. Empty allows any domain.
    pub allowed_email_domains: Vec<String>,
    pub max_result_page_size: usize,
    pub reject_non_resolvable_imports: bool,
    pub reject_non_resolvable_code_owners: bool,
    pub branches: Vec<BranchSettings>,
}

impl Default for CodeOwnersSettings {
    fn default() -> Self {
        Self {
            disabled: false,
            disabled_branches: Vec::new(),
            backend: "find-owners".to_owned(),
            path_expressions: None,
            required_approval: RequiredApproval::new("Code-Review", 1),
            override_approvals: Vec::new(),
            fallback_code_owners: FallbackCodeOwners::None,
            merge_commit_strategy: MergeCommitStrategy::AllChangedFiles,
            enable_implicit_approvals: false,
            exempted_accounts: BTreeSet::new(),
            exempt_pure_reverts: false,
            global_code_owners: Vec::new(),
            allowed_email_domains: Vec::new(),
            max_result_page_size: 100,
            reject_non_resolvable_imports: true,
            reject_non_resolvable_code_owners: true,
            branches: Vec::new(),
        }
    }
}

/// The settings in force for one branch, with branch overrides applied and
/// names resolved.
#[derive(Clone)]
pub struct EffectiveSettings {
    pub branch: String,
    pub disabled: bool,
    pub backend: Arc<dyn Backend>,
    pub path_expressions: PathExpressions,
    pub required_approval: RequiredApproval,
    pub override_approvals: Vec<RequiredApproval>,
    pub fallback_code_owners: FallbackCodeOwners,
    pub merge_commit_strategy: MergeCommitStrategy,
    pub enable_implicit_approvals: bool,
    pub exempted_accounts: BTreeSet<AccountId>,
    pub exempt_pure_reverts: bool,
    pub global_code_owners: Vec<OwnerReference>,
    pub allowed_email_domains: Vec<String>,
    pub max_result_page_size: usize,
    pub reject_non_resolvable_imports: bool,
    pub reject_non_resolvable_code_owners: bool,
}

impl fmt::Debug for EffectiveSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectiveSettings")
            .field("branch", &self.branch)
            .field("disabled", &self.disabled)
            .field("backend", &self.backend.id())
            .field("path_expressions", &self.path_expressions)
            .field("required_approval", &self.required_approval)
            .field("override_approvals", &self.override_approvals)
            .field("fallback_code_owners", &self.fallback_code_owners)
            .finish_non_exhaustive()
    }
}

impl EffectiveSettings {
    /// Whether `email` belongs to an allowed domain.
    pub fn is_email_domain_allowed(&self, email: &str) -> bool {
        if self.allowed_email_domains.is_empty() {
            return true;
        }
        let Some((_, domain)) = email.rsplit_once('@') else {
            return false;
        };
        self.allowed_email_domains
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(domain))
    }
}

enum BranchMatch {
    Exact,
    Regex,
}

fn match_branch(pattern: &str, branch: &str) -> Result<Option<BranchMatch>, SettingsError> {
    if pattern.starts_with('^') {
        let regex = Regex::new(pattern).map_err(|err| SettingsError::InvalidBranchPattern {
            pattern: pattern.to_owned(),
            reason: err.to_string(),
        })?;
        Ok(regex.is_match(branch).then_some(BranchMatch::Regex))
    } else {
        Ok((normalize_branch(pattern) == branch).then_some(BranchMatch::Exact))
    }
}

impl CodeOwnersSettings {
    /// The branch override that applies to `branch`. An exact match wins over
    /// regex matches; among regex matches the first declared one wins.
    fn branch_settings(&self, branch: &str) -> Result<Option<&BranchSettings>, SettingsError> {
        let mut first_regex_match = None;
        for settings in &self.branches {
            match match_branch(&settings.branch, branch)? {
                Some(BranchMatch::Exact) => return Ok(Some(settings)),
                Some(BranchMatch::Regex) if first_regex_match.is_none() => {
                    first_regex_match = Some(settings)
                }
                _ => {}
            }
        }
        Ok(first_regex_match)
    }

    pub fn is_disabled(&self, branch: &str) -> Result<bool, SettingsError> {
        if self.disabled {
            return Ok(true);
        }
        let branch = normalize_branch(branch);
        for pattern in &self.disabled_branches {
            if match_branch(pattern, &branch)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The settings in force for `branch`.
    pub fn for_branch(&self, branch: &str) -> Result<EffectiveSettings, SettingsError> {
        let branch = normalize_branch(branch);
        let overrides = self.branch_settings(&branch)?.cloned().unwrap_or_default();

        let backend_id = overrides.backend.as_deref().unwrap_or(&self.backend);
        let backend = backend::registry()
            .get(backend_id)
            .ok_or_else(|| SettingsError::UnknownBackend(backend_id.to_owned()))?;
        let path_expressions = overrides
            .path_expressions
            .or(self.path_expressions)
            .unwrap_or_else(|| backend.default_path_expressions());
        let global_code_owners = overrides
            .global_code_owners
            .as_ref()
            .unwrap_or(&self.global_code_owners)
            .iter()
            .map(|owner| {
                owner
                    .parse::<OwnerReference>()
                    .map_err(|_| SettingsError::InvalidGlobalCodeOwner(owner.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EffectiveSettings {
            disabled: self.is_disabled(&branch)?,
            branch,
            backend,
            path_expressions,
            required_approval: overrides
                .required_approval
                .unwrap_or_else(|| self.required_approval.clone()),
            override_approvals: overrides
                .override_approvals
                .unwrap_or_else(|| self.override_approvals.clone()),
            fallback_code_owners: overrides
                .fallback_code_owners
                .unwrap_or(self.fallback_code_owners),
            merge_commit_strategy: overrides
                .merge_commit_strategy
                .unwrap_or(self.merge_commit_strategy),
            enable_implicit_approvals: overrides
                .enable_implicit_approvals
                .unwrap_or(self.enable_implicit_approvals),
            exempted_accounts: self.exempted_accounts.clone(),
            exempt_pure_reverts: self.exempt_pure_reverts,
            global_code_owners,
            allowed_email_domains: self.allowed_email_domains.clone(),
            max_result_page_size: self.max_result_page_size,
            reject_non_resolvable_imports: overrides
                .reject_non_resolvable_imports
                .unwrap_or(self.reject_non_resolvable_imports),
            reject_non_resolvable_code_owners: overrides
                .reject_non_resolvable_code_owners
                .unwrap_or(self.reject_non_resolvable_code_owners),
        })
    }

    /// Check the settings against the project's labels. Every problem here
    /// is a misconfiguration that has to be fixed by an admin.
    pub fn validate(&self, labels: &[LabelDefinition]) -> Result<(), SettingsError> {
        if self.max_result_page_size == 0 {
            return Err(SettingsError::InvalidPageSize);
        }
        for pattern in &self.disabled_branches {
            match_branch(pattern, "")?;
        }

        let check_approval = |approval: &RequiredApproval| -> Result<(), SettingsError> {
            let label = labels
                .iter()
                .find(|label| label.name == approval.label)
                .ok_or_else(|| SettingsError::UnknownLabel(approval.label.clone()))?;
            if approval.value < label.min || approval.value > label.max || approval.value <= 0 {
                return Err(SettingsError::ValueOutOfRange {
                    label: label.name.clone(),
                    value: approval.value,
                    min: label.min,
                    max: label.max,
                });
            }
            Ok(())
        };

        let check_backend = |id: &str| match backend::registry().get(id) {
            Some(_) => Ok(()),
            None => Err(SettingsError::UnknownBackend(id.to_owned())),
        };
        let check_global_code_owners = |owners: &[String]| {
            owners.iter().try_for_each(|owner| {
                owner
                    .parse::<OwnerReference>()
                    .map(|_| ())
                    .map_err(|_| SettingsError::InvalidGlobalCodeOwner(owner.clone()))
            })
        };

        check_backend(&self.backend)?;
        check_approval(&self.required_approval)?;
        self.override_approvals.iter().try_for_each(check_approval)?;
        check_global_code_owners(&self.global_code_owners)?;
        for branch in &self.branches {
            match_branch(&branch.branch, "")?;
            if let Some(id) = &branch.backend {
                check_backend(id)?;
            }
            if let Some(approval) = &branch.required_approval {
                check_approval(approval)?;
            }
            if let Some(approvals) = &branch.override_approvals {
                approvals.iter().try_for_each(check_approval)?;
            }
            if let Some(owners) = &branch.global_code_owners {
                check_global_code_owners(owners)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<LabelDefinition> {
        vec![
            LabelDefinition::new("Code-Review", -2, 2),
            LabelDefinition::new("Owners-Override", 0, 1),
        ]
    }

    #[test]
    fn test_parse_required_approval() {
        let cases: &[(&str, Option<(&str, i16)>)] = &[
            ("Code-Review+2", Some(("Code-Review", 2))),
            ("Code-Review+1", Some(("Code-Review", 1))),
            ("Verified-1", Some(("Verified", -1))),
            ("Owners-Override+1", Some(("Owners-Override", 1))),
            ("Code-Review", None),
            ("+1", None),
            ("Code-Review+x", None),
        ];
        for (input, expected) in cases {
            let parsed = input.parse::<RequiredApproval>().ok();
            let expected = expected.map(|(label, value)| RequiredApproval::new(label, value));
            assert_eq!(parsed, expected, "parsing {}", input);
        }
        assert_eq!(RequiredApproval::new("Code-Review", 2).to_string(), "Code-Review+2");
    }

    #[test]
    fn test_defaults() {
        let effective = CodeOwnersSettings::default().for_branch("main").unwrap();
        assert_eq!(effective.branch, "refs/heads/main");
        assert_eq!(effective.backend.id(), "find-owners");
        assert_eq!(effective.path_expressions, PathExpressions::FindOwnersGlob);
        assert_eq!(effective.required_approval, RequiredApproval::new("Code-Review", 1));
        assert_eq!(effective.fallback_code_owners, FallbackCodeOwners::None);
        assert!(!effective.disabled);
    }

    #[test]
    fn test_branch_overrides_tie_break() {
        let settings = CodeOwnersSettings {
            branches: vec![
                BranchSettings {
                    branch: "^refs/heads/stable-.*".to_owned(),
                    required_approval: Some(RequiredApproval::new("Code-Review", 2)),
                    ..BranchSettings::default()
                },
                BranchSettings {
                    branch: "^refs/heads/.*".to_owned(),
                    fallback_code_owners: Some(FallbackCodeOwners::AllUsers),
                    ..BranchSettings::default()
                },
                BranchSettings {
                    branch: "stable-1.0".to_owned(),
                    backend: Some("structured".to_owned()),
                    ..BranchSettings::default()
                },
            ],
            ..CodeOwnersSettings::default()
        };

        // Exact match beats the earlier regexes
        let exact = settings.for_branch("stable-1.0").unwrap();
        assert_eq!(exact.backend.id(), "structured");
        assert_eq!(exact.path_expressions, PathExpressions::Simple);
        assert_eq!(exact.required_approval.value, 1);

        // First declared regex wins
        let regex = settings.for_branch("refs/heads/stable-2.0").unwrap();
        assert_eq!(regex.required_approval.value, 2);
        assert_eq!(regex.fallback_code_owners, FallbackCodeOwners::None);

        let other = settings.for_branch("main").unwrap();
        assert_eq!(other.fallback_code_owners, FallbackCodeOwners::AllUsers);
    }

    #[test]
    fn test_disabled_branches() {
        let settings = CodeOwnersSettings {
            disabled_branches: vec!["^refs/heads/experimental/.*".to_owned(), "sandbox".to_owned()],
            ..CodeOwnersSettings::default()
        };
        assert!(settings.is_disabled("refs/heads/experimental/foo").unwrap());
        assert!(settings.is_disabled("sandbox").unwrap());
        assert!(!settings.is_disabled("main").unwrap());
        assert!(settings.for_branch("sandbox").unwrap().disabled);
    }

    #[test]
    fn test_validate() {
        assert_eq!(CodeOwnersSettings::default().validate(&labels()), Ok(()));

        let cases: Vec<(CodeOwnersSettings, SettingsError)> = vec![
            (
                CodeOwnersSettings {
                    required_approval: RequiredApproval::new("Verified", 1),
                    ..CodeOwnersSettings::default()
                },
                SettingsError::UnknownLabel("Verified".to_owned()),
            ),
            (
                CodeOwnersSettings {
                    override_approvals: vec![RequiredApproval::new("Owners-Override", 2)],
                    ..CodeOwnersSettings::default()
                },
                SettingsError::ValueOutOfRange {
                    label: "Owners-Override".to_owned(),
                    value: 2,
                    min: 0,
                    max: 1,
                },
            ),
            (
                CodeOwnersSettings {
                    backend: "proto".to_owned(),
                    branches: vec![BranchSettings {
                        branch: "main".to_owned(),
                        ..BranchSettings::default()
                    }],
                    ..CodeOwnersSettings::default()
                },
                SettingsError::UnknownBackend("proto".to_owned()),
            ),
            (
                CodeOwnersSettings {
                    max_result_page_size: 0,
                    ..CodeOwnersSettings::default()
                },
                SettingsError::InvalidPageSize,
            ),
        ];
        for (settings, expected) in cases {
            assert_eq!(settings.validate(&labels()), Err(expected));
        }

        let bad_pattern = CodeOwnersSettings {
            disabled_branches: vec!["^refs/heads/(".to_owned()],
            ..CodeOwnersSettings::default()
        };
        assert!(matches!(
            bad_pattern.validate(&labels()),
            Err(SettingsError::InvalidBranchPattern { .. })
        ));
    }

    #[test]
    fn test_allowed_email_domains() {
        let mut effective = CodeOwnersSettings::default().for_branch("main").unwrap();
        assert!(effective.is_email_domain_allowed("a@anything.org"));

        effective.allowed_email_domains = vec!["x.com".to_owned()];
        assert!(effective.is_email_domain_allowed("a@x.com"));
        assert!(effective.is_email_domain_allowed("a@X.COM"));
        assert!(!effective.is_email_domain_allowed("a@y.com"));
        assert!(!effective.is_email_domain_allowed("not-an-email"));
    }

    #[test]
    fn test_deserialize_kebab_case() {
        let settings: CodeOwnersSettings = serde_json::from_str(
            r#"{
                "required-approval": "Code-Review+2",
                "fallback-code-owners": "all-users",
                "exempted-accounts": [1000],
                "branches": [{"branch": "main", "path-expressions": "glob"}]
            }"#,
        )
        .unwrap();
        assert_eq!(settings.required_approval, RequiredApproval::new("Code-Review", 2));
        assert_eq!(settings.fallback_code_owners, FallbackCodeOwners::AllUsers);
        assert!(settings.exempted_accounts.contains(&AccountId(1000)));
        assert_eq!(
            settings.for_branch("main").unwrap().path_expressions,
            PathExpressions::Glob
        );
    }
}

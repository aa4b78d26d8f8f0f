//! Validation of owner config files, as done before they are submitted.
//! Parse errors and malformed path expressions are always errors; whether
//! unresolvable imports and code owners are errors or only warnings is up to
//! the branch's settings.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::{
    accounts::AccountResolver,
    imports::ImportResolver,
    loader::{BackendConfigLoader, ConfigLoader, ProjectAccess, RepoStore, StorageError},
    owner_config::{ConfigKey, OwnerConfig, Revision},
    paths,
    settings::EffectiveSettings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
}

impl ValidationIssue {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    fn with_policy(reject: bool, message: impl Into<String>) -> Self {
        Self {
            severity: if reject {
                Severity::Error
            } else {
                Severity::Warning
            },
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub file: String,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn has_errors(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.severity == Severity::Error)
    }
}

pub struct ConfigValidator<'a> {
    project: String,
    loader: BackendConfigLoader<&'a dyn RepoStore>,
    projects: &'a dyn ProjectAccess,
    accounts: &'a dyn AccountResolver,
    settings: &'a EffectiveSettings,
}

impl<'a> ConfigValidator<'a> {
    pub fn new(
        project: impl Into<String>,
        store: &'a dyn RepoStore,
        projects: &'a dyn ProjectAccess,
        accounts: &'a dyn AccountResolver,
        settings: &'a EffectiveSettings,
    ) -> Self {
        Self {
            project: project.into(),
            loader: BackendConfigLoader::new(store, settings.backend.clone()),
            projects,
            accounts,
            settings,
        }
    }

    /// Validate `text` as the new content of the config file of `key`.
    /// Imports are resolved against the branch tip.
    pub fn validate(
        &self,
        key: &ConfigKey,
        revision: &Revision,
        text: &str,
    ) -> Result<ValidationReport, StorageError> {
        let backend = self.loader.backend();
        let file = key.file_path(backend.file_name());
        let mut issues = Vec::new();

        let config = match backend.parse(key, revision, text) {
            Ok(config) => config,
            Err(err) => {
                issues.extend(err.errors.iter().map(|parse_error| {
                    ValidationIssue::error(format!(
                        "invalid code owner config file '{}': {}",
                        file, parse_error
                    ))
                }));
                return Ok(ValidationReport { file, issues });
            }
        };

        self.check_path_expressions(&config, &mut issues);
        self.check_imports(&config, &mut issues)?;
        self.check_owners(&config, &file, &mut issues);

        debug!(%file, issues = issues.len(), "validated code owner config");
        Ok(ValidationReport { file, issues })
    }

    /// Validate every config file on the branch.
    pub fn validate_branch(
        &self,
        revision: Option<&Revision>,
    ) -> Result<Vec<ValidationReport>, StorageError> {
        let store = self.loader.store();
        let file_name = self.loader.file_name();
        let mut reports = Vec::new();
        for path in store.list_files(&self.project, &self.settings.branch, revision)? {
            let (folder, name) = paths::split_file(&path);
            if name != file_name {
                continue;
            }
            let Some(content) =
                store.read_file(&self.project, &self.settings.branch, &path, revision)?
            else {
                continue;
            };
            let key = ConfigKey::new(self.project.as_str(), &self.settings.branch, folder);
            reports.push(self.validate(&key, &content.revision, &content.text)?);
        }
        Ok(reports)
    }

    fn check_path_expressions(&self, config: &OwnerConfig, issues: &mut Vec<ValidationIssue>) {
        let matcher = self.settings.path_expressions.matcher();
        for owner_set in &config.owner_sets {
            for expression in &owner_set.path_expressions {
                if let Err(err) = matcher.check(expression) {
                    issues.push(ValidationIssue::error(err.to_string()));
                }
            }
        }
    }

    fn check_imports(
        &self,
        config: &OwnerConfig,
        issues: &mut Vec<ValidationIssue>,
    ) -> Result<(), StorageError> {
        let resolved = ImportResolver::new(&self.loader, self.projects).resolve(config, None)?;
        for unresolved in resolved.unresolved_imports {
            issues.push(ValidationIssue::with_policy(
                self.settings.reject_non_resolvable_imports,
                unresolved.to_string(),
            ));
        }
        Ok(())
    }

    fn check_owners(&self, config: &OwnerConfig, file: &str, issues: &mut Vec<ValidationIssue>) {
        let emails = config
            .owner_sets
            .iter()
            .flat_map(|owner_set| owner_set.owners.iter())
            .filter_map(|owner| owner.as_email());
        let mut seen = BTreeSet::new();
        for email in emails {
            if !seen.insert(email) {
                continue;
            }
            let problem = if !self.settings.is_email_domain_allowed(email) {
                Some("the domain of the email is not allowed for code owners")
            } else {
                match self.accounts.resolve(email) {
                    None => Some("no account with this email exists"),
                    Some(account) if !self.accounts.is_active(account) => {
                        Some("the account is inactive")
                    }
                    Some(_) => None,
                }
            };
            if let Some(problem) = problem {
                issues.push(ValidationIssue::with_policy(
                    self.settings.reject_non_resolvable_code_owners,
                    format!(
                        "code owner email '{}' in '{}' cannot be resolved: {}",
                        email, file, problem
                    ),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        accounts::{AccountId, InMemoryAccounts},
        loader::InMemoryRepo,
        settings::CodeOwnersSettings,
    };

    fn accounts() -> InMemoryAccounts {
        InMemoryAccounts::new()
            .add("alice@x.com", AccountId(1))
            .add("bob@x.com", AccountId(2))
            .deactivate(AccountId(2))
    }

    fn validate(
        settings: CodeOwnersSettings,
        repo: &InMemoryRepo,
        text: &str,
    ) -> ValidationReport {
        let settings = settings.for_branch("main").unwrap();
        let accounts = accounts();
        ConfigValidator::new("p", repo, repo, &accounts, &settings)
            .validate(&ConfigKey::new("p", "main", "/a/"), &Revision::new("new"), text)
            .unwrap()
    }

    fn messages(report: &ValidationReport, severity: Severity) -> Vec<&str> {
        report
            .issues
            .iter()
            .filter(|issue| issue.severity == severity)
            .map(|issue| issue.message.as_str())
            .collect()
    }

    #[test]
    fn test_valid_config() {
        let repo = InMemoryRepo::new();
        repo.write_file("p", "main", "/shared/OWNERS", "alice@x.com\n");
        let report = validate(
            CodeOwnersSettings::default(),
            &repo,
            "alice@x.com\ninclude /shared/OWNERS\nper-file *.md=alice@x.com\n",
        );
        assert_eq!(report.file, "/a/OWNERS");
        assert!(report.issues.is_empty(), "{:?}", report.issues);
    }

    #[test]
    fn test_parse_errors() {
        let repo = InMemoryRepo::new();
        let report = validate(CodeOwnersSettings::default(), &repo, "alice@x.com\nnot valid\n");
        assert!(report.has_errors());
        assert_eq!(
            messages(&report, Severity::Error),
            vec!["invalid code owner config file '/a/OWNERS': line 2: invalid line: not valid"]
        );
    }

    #[test]
    fn test_reject_policies() {
        let repo = InMemoryRepo::new();
        repo.write_file("p", "main", "/README", "");
        let text = "alice@x.com\nbob@x.com\ncarol@x.com\ninclude /missing/OWNERS\n";
        let expected = vec![
            "cannot resolve import of /missing/OWNERS in p:refs/heads/main:/a/: \
             code owner config does not exist",
            "code owner email 'bob@x.com' in '/a/OWNERS' cannot be resolved: \
             the account is inactive",
            "code owner email 'carol@x.com' in '/a/OWNERS' cannot be resolved: \
             no account with this email exists",
        ];

        let rejecting = validate(CodeOwnersSettings::default(), &repo, text);
        assert_eq!(messages(&rejecting, Severity::Error), expected);

        let lenient = validate(
            CodeOwnersSettings {
                reject_non_resolvable_imports: false,
                reject_non_resolvable_code_owners: false,
                ..CodeOwnersSettings::default()
            },
            &repo,
            text,
        );
        assert!(!lenient.has_errors());
        assert_eq!(messages(&lenient, Severity::Warning), expected);
    }

    #[test]
    fn test_malformed_path_expression() {
        let repo = InMemoryRepo::new();
        let text = "per-file [a-=alice@x.com\n";
        let report = validate(CodeOwnersSettings::default(), &repo, text);
        assert!(report.has_errors());
    }

    #[test]
    fn test_validate_branch() {
        let repo = InMemoryRepo::new();
        repo.write_file("p", "main", "/OWNERS", "alice@x.com\n");
        repo.write_file("p", "main", "/a/OWNERS", "nonsense here\n");
        repo.write_file("p", "main", "/a/main.c", "int main() {}\n");
        let settings = CodeOwnersSettings::default().for_branch("main").unwrap();
        let accounts = accounts();
        let reports = ConfigValidator::new("p", &repo, &repo, &accounts, &settings)
            .validate_branch(None)
            .unwrap();
        let files: Vec<_> = reports
            .iter()
            .map(|report| (report.file.as_str(), report.has_errors()))
            .collect();
        assert_eq!(files, vec![("/OWNERS", false), ("/a/OWNERS", true)]);
    }
}

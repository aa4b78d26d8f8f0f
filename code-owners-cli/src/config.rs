use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
};

use anyhow::{Context, Result};
use code_owners::{AccountId, CodeOwnersSettings, LabelDefinition};
use serde::Deserialize;

/// The CLI's TOML config file. Everything is optional; a missing file means
/// default settings and a single `Code-Review` label.
///
/// ```toml
/// [settings]
/// required-approval = "Code-Review+2"
/// fallback-code-owners = "all-users"
///
/// [[labels]]
/// name = "Code-Review"
/// min = -2
/// max = 2
///
/// [accounts]
/// "alice@example.com" = 1
/// ```
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Config {
    pub settings: CodeOwnersSettings,
    pub labels: Vec<LabelDefinition>,
    pub accounts: BTreeMap<String, AccountId>,
    pub inactive_accounts: BTreeSet<AccountId>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings: CodeOwnersSettings::default(),
            labels: vec![LabelDefinition::new("Code-Review", -2, 2)],
            accounts: BTreeMap::new(),
            inactive_accounts: BTreeSet::new(),
        }
    }
}

impl Config {
    pub fn parse(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::parse(&source).with_context(|| format!("invalid config file {}", path.display()))
    }
}

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u32);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps code owner emails to accounts.
pub trait AccountResolver: Send + Sync {
    fn resolve(&self, email: &str) -> Option<AccountId>;

    fn is_active(&self, _account: AccountId) -> bool {
        true
    }

    /// Whether `viewer` (or an anonymous caller) may see `account`.
    fn is_visible(&self, _account: AccountId, _viewer: Option<AccountId>) -> bool {
        true
    }
}

/// Accounts held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAccounts {
    by_email: HashMap<String, AccountId>,
    inactive: HashSet<AccountId>,
    hidden: HashSet<AccountId>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, email: &str, account: AccountId) -> Self {
        self.by_email.insert(email.to_owned(), account);
        self
    }

    pub fn deactivate(mut self, account: AccountId) -> Self {
        self.inactive.insert(account);
        self
    }

    /// Hide an account from everyone but itself.
    pub fn hide(mut self, account: AccountId) -> Self {
        self.hidden.insert(account);
        self
    }
}

impl AccountResolver for InMemoryAccounts {
    fn resolve(&self, email: &str) -> Option<AccountId> {
        self.by_email.get(email).copied()
    }

    fn is_active(&self, account: AccountId) -> bool {
        !self.inactive.contains(&account)
    }

    fn is_visible(&self, account: AccountId, viewer: Option<AccountId>) -> bool {
        !self.hidden.contains(&account) || viewer == Some(account)
    }
}

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::RwLock,
};

use code_owners::{AccountId, AccountResolver};

/// First id handed out to emails that aren't listed in the config.
const FIRST_INTERNED_ID: u32 = 1_000_000;

/// Accounts for local use. Emails listed in the config map to their
/// configured ids; any other email gets a fresh id on first use, so every
/// well-formed email is treated as an existing account.
pub struct InterningAccounts {
    ids: RwLock<HashMap<String, AccountId>>,
    next_id: RwLock<u32>,
    inactive: BTreeSet<AccountId>,
}

impl InterningAccounts {
    pub fn new(known: &BTreeMap<String, AccountId>, inactive: &BTreeSet<AccountId>) -> Self {
        let ids = known
            .iter()
            .map(|(email, id)| (email.to_lowercase(), *id))
            .collect();
        Self {
            ids: RwLock::new(ids),
            next_id: RwLock::new(FIRST_INTERNED_ID),
            inactive: inactive.clone(),
        }
    }
}

impl AccountResolver for InterningAccounts {
    fn resolve(&self, email: &str) -> Option<AccountId> {
        let (local, domain) = email.split_once('@')?;
        if local.is_empty() || domain.is_empty() {
            return None;
        }
        let email = email.to_lowercase();
        if let Some(id) = self.ids.read().expect("valid lock").get(&email) {
            return Some(*id);
        }

        let mut ids = self.ids.write().expect("valid lock");
        // Another thread may have interned it in the meantime
        if let Some(id) = ids.get(&email) {
            return Some(*id);
        }
        let mut next_id = self.next_id.write().expect("valid lock");
        let id = AccountId(*next_id);
        *next_id += 1;
        ids.insert(email, id);
        Some(id)
    }

    fn is_active(&self, account: AccountId) -> bool {
        !self.inactive.contains(&account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let known = BTreeMap::from([("alice@x.com".to_owned(), AccountId(1))]);
        let inactive = BTreeSet::from([AccountId(1)]);
        let accounts = InterningAccounts::new(&known, &inactive);

        assert_eq!(accounts.resolve("Alice@x.com"), Some(AccountId(1)));
        let bob = accounts.resolve("bob@x.com");
        assert_eq!(bob, Some(AccountId(FIRST_INTERNED_ID)));
        assert_eq!(accounts.resolve("bob@x.com"), bob);
        assert_eq!(accounts.resolve("carol@x.com"), Some(AccountId(FIRST_INTERNED_ID + 1)));
        assert_eq!(accounts.resolve("not-an-email"), None);
        assert_eq!(accounts.resolve("@x.com"), None);

        assert!(!accounts.is_active(AccountId(1)));
        assert!(accounts.is_active(AccountId(FIRST_INTERNED_ID)));
    }
}

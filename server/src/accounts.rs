use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

/// A registered account, only what the purge needs to know about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(email: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            verified: false,
            created_at,
        }
    }
}

/// In-memory account store.
#[derive(Debug, Default)]
pub struct AccountStore {
    accounts: RwLock<HashMap<Uuid, Account>>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, account: Account) -> Uuid {
        let id = account.id;
        self.accounts.write().insert(id, account);
        id
    }

    /// Marks an account as verified.
    ///
    /// # Returns
    /// Whether the account exists.
    pub fn verify(&self, id: Uuid) -> bool {
        match self.accounts.write().get_mut(&id) {
            Some(account) => {
                account.verified = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Account> {
        self.accounts.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }

    /// Removes every unverified account created more than `ttl` before `now`.
    ///
    /// # Returns
    /// How many accounts were removed.
    pub fn purge_unverified(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let cutoff = now - ttl;
        let mut accounts = self.accounts.write();
        let before = accounts.len();
        accounts.retain(|_, a| a.verified || a.created_at > cutoff);
        before - accounts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purges_only_stale_unverified_accounts() {
        let store = AccountStore::new();
        let now = Utc::now();
        let ttl = Duration::hours(24);

        let stale = store.insert(Account::new("stale@example.com", now - Duration::hours(25)));
        let fresh = store.insert(Account::new("fresh@example.com", now - Duration::hours(1)));
        let verified = store.insert(Account::new("old@example.com", now - Duration::days(30)));
        assert!(store.verify(verified));
        assert!(!store.verify(Uuid::new_v4()));

        assert_eq!(store.purge_unverified(now, ttl), 1);
        assert!(store.get(stale).is_none());
        assert!(store.get(fresh).is_some());
        assert!(store.get(verified).is_some_and(|a| a.verified));
        assert_eq!(store.purge_unverified(now, ttl), 0);
    }
}

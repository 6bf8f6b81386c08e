//! User directory collaborator: resolves and persists identities and contact relationships.
//! Connection establishment never depends on it; callers log failures and carry on.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use crate::identity::{ContactId, UserIdentity};

pub trait UserDirectory: Send + Sync {
    fn lookup_user(&self, user_id: &ContactId) -> Result<UserIdentity, DirectoryError>;

    fn register_user(&self, user: &UserIdentity) -> Result<(), DirectoryError>;

    fn add_contact_relationship(
        &self,
        local_id: &ContactId,
        contact_id: &ContactId,
    ) -> Result<(), DirectoryError>;

    /// Contacts previously related to `local_id`, used to seed the contact list at startup.
    fn contacts_of(&self, local_id: &ContactId) -> Result<Vec<UserIdentity>, DirectoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("user not found: {0}")]
    NotFound(ContactId),
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

#[derive(Default)]
struct Tables {
    users: HashMap<ContactId, UserIdentity>,
    relations: HashMap<ContactId, BTreeSet<ContactId>>,
}

/// In-process directory. Relationships are stored one-way, keyed by the local user.
#[derive(Default)]
pub struct MemoryDirectory {
    tables: Mutex<Tables>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<std::sync::MutexGuard<'_, Tables>, DirectoryError> {
        self.tables
            .lock()
            .map_err(|_| DirectoryError::Unavailable("directory lock poisoned".into()))
    }
}

impl UserDirectory for MemoryDirectory {
    fn lookup_user(&self, user_id: &ContactId) -> Result<UserIdentity, DirectoryError> {
        self.tables()?
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(user_id.clone()))
    }

    fn register_user(&self, user: &UserIdentity) -> Result<(), DirectoryError> {
        self.tables()?
            .users
            .insert(user.contact_id.clone(), user.clone());
        Ok(())
    }

    fn add_contact_relationship(
        &self,
        local_id: &ContactId,
        contact_id: &ContactId,
    ) -> Result<(), DirectoryError> {
        let mut t = self.tables()?;
        if !t.users.contains_key(contact_id) {
            return Err(DirectoryError::NotFound(contact_id.clone()));
        }
        t.relations
            .entry(local_id.clone())
            .or_default()
            .insert(contact_id.clone());
        Ok(())
    }

    fn contacts_of(&self, local_id: &ContactId) -> Result<Vec<UserIdentity>, DirectoryError> {
        let t = self.tables()?;
        Ok(t.relations
            .get(local_id)
            .map(|ids| ids.iter().filter_map(|id| t.users.get(id).cloned()).collect())
            .unwrap_or_default())
    }
}

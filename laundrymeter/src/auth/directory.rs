//! Directory backed by the configuration file.
//!
//! Stands in for an LDAP bind in small installations. Any other
//! directory plugs in behind [`IdentityProvider`].

use async_trait::async_trait;
use serde::Deserialize;

use super::{AuthError, IdentityProvider};
use crate::user::UserIdentity;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub users: Vec<DirectoryEntry>,
}

#[derive(Clone, Deserialize)]
pub struct DirectoryEntry {
    pub username: String,
    pub password: String,
    pub name: String,
    pub email: String,
}

impl std::fmt::Debug for DirectoryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryEntry")
            .field("username", &self.username)
            .field("name", &self.name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct StaticDirectory {
    entries: Vec<DirectoryEntry>,
}

impl StaticDirectory {
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            entries: config.users,
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticDirectory {
    async fn verify(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserIdentity>, AuthError> {
        Ok(self
            .entries
            .iter()
            .find(|e| e.username == username && e.password == password)
            .map(|e| UserIdentity {
                username: e.username.clone(),
                name: e.name.clone(),
                email: e.email.clone(),
            }))
    }
}

//! Identity resolution from a fixed token table.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::collaborators::{CollabResult, IdentityResolver};
use crate::types::ContributorProfile;

/// Resolves tokens from a map loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityResolver {
    profiles: HashMap<String, ContributorProfile>,
}

impl StaticIdentityResolver {
    pub fn new(profiles: HashMap<String, ContributorProfile>) -> Self {
        Self { profiles }
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, token: &str) -> CollabResult<Option<ContributorProfile>> {
        Ok(self.profiles.get(token).cloned())
    }
}

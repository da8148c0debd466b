use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Members of this group bypass every permission check.
pub const ADMIN_GROUP: &str = "tikiadmins";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub members: BTreeSet<String>,
    #[serde(default)]
    pub access_perms: AccessPerms,
    #[serde(default)]
    pub domain_scope: DomainScope,
}

impl Group {
    #[must_use]
    pub fn has_member(&self, email: &str) -> bool {
        self.members.contains(email)
    }

    #[must_use]
    pub fn is_admin_group(&self) -> bool {
        self.name == ADMIN_GROUP
    }
}

/// Operation name to allowed flag, per resource kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AccessPerms {
    #[serde(default)]
    pub group: HashMap<String, bool>,
    #[serde(default)]
    pub domain: HashMap<String, bool>,
    #[serde(default)]
    pub ticket: HashMap<String, bool>,
    #[serde(default)]
    pub secret_ticket: HashMap<String, bool>,
}

/// Path prefix binding a group to a subtree of ticket and domain paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DomainScope {
    #[serde(default)]
    pub root: String,
    #[serde(default)]
    pub info: String,
}

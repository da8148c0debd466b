//! Yes/no authorization decisions over group membership, domain scopes and bans.
//!
//! Nothing here writes. Store failures deny: a ban lookup that errors counts
//! as banned, a group lookup that errors counts as no groups.

use crate::{
    model::Group,
    store::{DurableStore, StoreResult},
};
use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Group,
    Domain,
    Ticket,
    SecretTicket,
}

impl ResourceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Domain => "domain",
            Self::Ticket => "ticket",
            Self::SecretTicket => "secretTicket",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseError {
    kind: &'static str,
    value: String,
}

impl FromStr for ResourceKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "group" => Ok(Self::Group),
            "domain" => Ok(Self::Domain),
            "ticket" => Ok(Self::Ticket),
            "secretTicket" => Ok(Self::SecretTicket),
            other => Err(ParseError {
                kind: "resource kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Operation names as they appear in a group's `accessPerms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Delete,
    Add,
    AddMember,
    DelMember,
    SetSecret,
    GetSecret,
    List,
    Show,
    Info,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Add => "add",
            Self::AddMember => "addMember",
            Self::DelMember => "delMember",
            Self::SetSecret => "setSecret",
            Self::GetSecret => "getSecret",
            Self::List => "list",
            Self::Show => "show",
            Self::Info => "info",
        }
    }

    /// Read-only operations are open to every authenticated identity.
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::List | Self::Show | Self::Info)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "delete" => Ok(Self::Delete),
            "add" => Ok(Self::Add),
            "addMember" => Ok(Self::AddMember),
            "delMember" => Ok(Self::DelMember),
            "setSecret" => Ok(Self::SetSecret),
            "getSecret" => Ok(Self::GetSecret),
            "list" => Ok(Self::List),
            "show" => Ok(Self::Show),
            "info" => Ok(Self::Info),
            other => Err(ParseError {
                kind: "operation",
                value: other.to_string(),
            }),
        }
    }
}

/// Operations gated by a group's domain scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopedOperation {
    CreateTicket,
    DeleteTicket,
    AssumeTicket,
    CreateDomain,
    DeleteDomain,
}

impl ScopedOperation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateTicket => "createTicket",
            Self::DeleteTicket => "deleteTicket",
            Self::AssumeTicket => "assumeTicket",
            Self::CreateDomain => "createDomain",
            Self::DeleteDomain => "deleteDomain",
        }
    }
}

impl fmt::Display for ScopedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopedOperation {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createTicket" => Ok(Self::CreateTicket),
            "deleteTicket" => Ok(Self::DeleteTicket),
            "assumeTicket" => Ok(Self::AssumeTicket),
            "createDomain" => Ok(Self::CreateDomain),
            "deleteDomain" => Ok(Self::DeleteDomain),
            other => Err(ParseError {
                kind: "scoped operation",
                value: other.to_string(),
            }),
        }
    }
}

/// A denied decision, rendered for audit and for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{email} is not allowed to {operation} on {resource}")]
pub struct PermissionDenied {
    pub email: String,
    pub resource: String,
    pub operation: String,
}

#[derive(Clone)]
pub struct PermissionEvaluator {
    store: Arc<dyn DurableStore>,
}

impl fmt::Debug for PermissionEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionEvaluator").finish_non_exhaustive()
    }
}

impl PermissionEvaluator {
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// Raw ban lookup, for callers that need to tell a store failure apart.
    ///
    /// # Errors
    /// Returns the store error unchanged.
    pub async fn ban_status(&self, email: &str) -> StoreResult<bool> {
        self.store.is_banned(email).await
    }

    /// True when `email` is banned or the ban list cannot be read.
    pub async fn is_banned(&self, email: &str) -> bool {
        match self.ban_status(email).await {
            Ok(banned) => banned,
            Err(err) => {
                warn!(email, error = %err, "ban lookup failed, treating identity as banned");
                true
            }
        }
    }

    /// Groups `email` belongs to.
    ///
    /// # Errors
    /// Returns the store error unchanged.
    pub async fn groups_of(&self, email: &str) -> StoreResult<Vec<Group>> {
        self.store.get_groups_containing(email).await
    }

    pub async fn is_admin(&self, email: &str) -> bool {
        self.member_groups(email).await.iter().any(Group::is_admin_group)
    }

    /// Decide whether `email` may run `operation` on `kind`.
    pub async fn can_perform(&self, email: &str, kind: ResourceKind, operation: Operation) -> bool {
        if self.is_banned(email).await {
            return false;
        }
        let groups = self.member_groups(email).await;
        let allowed = decide(&groups, kind, operation);
        debug!(email, resource = %kind, operation = %operation, allowed, "permission decision");
        allowed
    }

    /// Decide whether `email` may run a scoped operation under `path`. The
    /// first group whose non-empty `domainScope.root` prefixes `path` grants it.
    pub async fn allowed_by_domain_scope(
        &self,
        email: &str,
        path: &str,
        operation: ScopedOperation,
    ) -> bool {
        if self.is_banned(email).await {
            return false;
        }
        let groups = self.member_groups(email).await;
        let allowed = decide_scope(&groups, path);
        debug!(email, path, operation = %operation, allowed, "domain scope decision");
        allowed
    }

    /// `can_perform` as a `Result`, for handlers that reject on deny.
    ///
    /// # Errors
    /// Returns `PermissionDenied` naming the identity, resource and operation.
    pub async fn require(
        &self,
        email: &str,
        kind: ResourceKind,
        operation: Operation,
    ) -> Result<(), PermissionDenied> {
        if self.can_perform(email, kind, operation).await {
            Ok(())
        } else {
            Err(PermissionDenied {
                email: email.to_string(),
                resource: kind.to_string(),
                operation: operation.to_string(),
            })
        }
    }

    async fn member_groups(&self, email: &str) -> Vec<Group> {
        self.groups_of(email).await.unwrap_or_else(|err| {
            warn!(email, error = %err, "group lookup failed, treating identity as groupless");
            Vec::new()
        })
    }
}

fn perms_for(group: &Group, kind: ResourceKind) -> &HashMap<String, bool> {
    let perms = &group.access_perms;
    match kind {
        ResourceKind::Group => &perms.group,
        ResourceKind::Domain => &perms.domain,
        ResourceKind::Ticket => &perms.ticket,
        ResourceKind::SecretTicket => &perms.secret_ticket,
    }
}

fn decide(groups: &[Group], kind: ResourceKind, operation: Operation) -> bool {
    if groups.iter().any(Group::is_admin_group) || operation.is_read_only() {
        return true;
    }
    groups.iter().any(|group| {
        perms_for(group, kind)
            .get(operation.as_str())
            .copied()
            .unwrap_or(false)
    })
}

fn decide_scope(groups: &[Group], path: &str) -> bool {
    if groups.iter().any(Group::is_admin_group) {
        return true;
    }
    groups
        .iter()
        .any(|g| !g.domain_scope.root.is_empty() && path.starts_with(&g.domain_scope.root))
}

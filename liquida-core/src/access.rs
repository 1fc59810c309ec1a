//! Capability checks applied by every ledger operation.
//!
//! Authentication happens upstream; the engine receives an already resolved
//! [`Actor`] and only decides whether that actor may touch a given tenant.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ActorId, TenantId};

/// Role attached to an authenticated session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Platform owner. Not bound to a single tenant.
    Owner,
    TenantAdmin,
    Agent,
    Venue,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::TenantAdmin => "tenant_admin",
            Role::Agent => "agent",
            Role::Venue => "venue",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "tenant_admin" => Ok(Role::TenantAdmin),
            "agent" => Ok(Role::Agent),
            "venue" => Ok(Role::Venue),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The resolved `{tenant, role, actor}` triple handed over by the auth layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
    pub tenant: TenantId,
}

impl Actor {
    pub fn new(id: ActorId, role: Role, tenant: TenantId) -> Self {
        Self { id, role, tenant }
    }

    pub fn owner(id: ActorId) -> Self {
        Self::new(id, Role::Owner, TenantId::default())
    }
}

/// Raised when an actor lacks the role or tenant required by a [`Policy`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("actor {actor} ({role}) may not {action} for tenant {tenant}")]
pub struct AccessDenied {
    pub actor: ActorId,
    pub role: Role,
    pub tenant: TenantId,
    pub action: &'static str,
}

/// Capability required by one family of operations.
#[derive(Clone, Copy, Debug)]
pub struct Policy {
    pub action: &'static str,
    pub roles: &'static [Role],
    /// Whether an owner may act on any tenant.
    pub owner_bypasses_tenant: bool,
}

impl Policy {
    pub const MANAGE_RULES: Policy = Policy {
        action: "manage commission rules",
        roles: &[Role::Owner],
        owner_bypasses_tenant: true,
    };

    pub const MANAGE_CONTRACTS: Policy = Policy {
        action: "manage contracts",
        roles: &[Role::Owner, Role::TenantAdmin],
        owner_bypasses_tenant: true,
    };

    pub const WRITE_LEDGER: Policy = Policy {
        action: "write ledger entries",
        roles: &[Role::Owner, Role::TenantAdmin],
        owner_bypasses_tenant: true,
    };

    pub const READ_LEDGER: Policy = Policy {
        action: "read ledger entries",
        roles: &[Role::Owner, Role::TenantAdmin, Role::Agent, Role::Venue],
        owner_bypasses_tenant: true,
    };

    pub const MANAGE_SETTLEMENTS: Policy = Policy {
        action: "manage settlements",
        roles: &[Role::Owner, Role::TenantAdmin],
        owner_bypasses_tenant: true,
    };

    pub const VIEW_REPORTS: Policy = Policy {
        action: "view commission reports",
        roles: &[Role::Owner, Role::TenantAdmin],
        owner_bypasses_tenant: true,
    };

    /// Check `actor` against this policy for an operation scoped to `tenant`.
    ///
    /// `tenant` is `None` for operations on global data (global rules); only
    /// roles that bypass tenant scoping may perform those.
    pub fn authorize(&self, actor: &Actor, tenant: Option<TenantId>) -> Result<(), AccessDenied> {
        let denied = || AccessDenied {
            actor: actor.id,
            role: actor.role,
            tenant: tenant.unwrap_or_default(),
            action: self.action,
        };
        if !self.roles.contains(&actor.role) {
            return Err(denied());
        }
        let bypass = self.owner_bypasses_tenant && actor.role == Role::Owner;
        match tenant {
            _ if bypass => Ok(()),
            Some(scope) if scope == actor.tenant => Ok(()),
            _ => Err(denied()),
        }
    }
}

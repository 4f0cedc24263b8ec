use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use gatehouse_core::RoleId;

use crate::Permission;

/// Role name used for RBAC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role granted to every self-registered user, when it exists.
pub const DEFAULT_ROLE: Role = Role::from_static("user");

/// A persisted role with the ordered permissions it grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub id: RoleId,
    pub name: Role,
    pub permissions: Vec<Permission>,
}

impl RoleDefinition {
    pub fn new(name: impl Into<Cow<'static, str>>, permissions: Vec<Permission>) -> Self {
        Self {
            id: RoleId::new(),
            name: Role::new(name),
            permissions,
        }
    }
}

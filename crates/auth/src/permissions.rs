use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use gatehouse_core::PermissionId;

/// Permission identifier.
///
/// Permissions are bare capability strings (e.g. `"edit role"`). Matching is
/// exact; there is no wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
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

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Permission {
    fn from(value: &'static str) -> Self {
        Self::from_static(value)
    }
}

/// A persisted permission record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDefinition {
    pub id: PermissionId,
    pub name: Permission,
}

impl PermissionDefinition {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            id: PermissionId::new(),
            name: Permission::new(name),
        }
    }
}

/// Capabilities the core itself checks.
pub mod catalog {
    use super::Permission;

    pub const VIEW_USER: Permission = Permission::from_static("view user");
    pub const UPDATE_USER: Permission = Permission::from_static("update user");
    pub const DELETE_USER: Permission = Permission::from_static("delete user");

    pub const VIEW_ROLE: Permission = Permission::from_static("view role");
    pub const GRANT_ROLE: Permission = Permission::from_static("grant role");
    pub const REVOKE_ROLE: Permission = Permission::from_static("revoke role");

    pub const VIEW_PERMISSION: Permission = Permission::from_static("view permission");
    pub const GRANT_PERMISSION: Permission = Permission::from_static("grant permission");
    pub const REVOKE_PERMISSION: Permission = Permission::from_static("revoke permission");
}

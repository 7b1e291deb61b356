//! Type-specific payloads understood by the warehouse renderers

use crate::models::ObjectDesignation;
use serde::{Deserialize, Serialize};

/// `type: role`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleSpec {
    /// Roles to create; each is granted to the default execution role
    pub roles: Vec<String>,
    pub grants: Vec<RoleGrant>,
    #[serde(alias = "revokes")]
    pub revoke: Vec<RoleGrant>,
}

/// Grant of `role` to a role or user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleGrant {
    pub role: String,
    #[serde(alias = "to")]
    pub object: ObjectDesignation,
}

/// `type: database | schema | warehouse`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceSpec {
    pub owner: ObjectDesignation,
    pub usage: UsageSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSpec {
    pub grants: Vec<ObjectDesignation>,
    #[serde(alias = "revokes")]
    pub revoke: Vec<ObjectDesignation>,
}

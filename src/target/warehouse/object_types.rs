//! Object-type catalog for the warehouse target

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(i64)]
pub enum ObjectType {
    Unknown = 0,
    Warehouse,
    Database,
    Schema,
    Table,
    View,
    Procedure,
    UserDefinedFunction,
    Role,
    Security,
    ResourceMonitor,
    Stage,
    Pipe,
    Stream,
    Task,
    Sequence,
    User,
}

impl ObjectType {
    pub const ALL: [ObjectType; 17] = [
        ObjectType::Unknown,
        ObjectType::Warehouse,
        ObjectType::Database,
        ObjectType::Schema,
        ObjectType::Table,
        ObjectType::View,
        ObjectType::Procedure,
        ObjectType::UserDefinedFunction,
        ObjectType::Role,
        ObjectType::Security,
        ObjectType::ResourceMonitor,
        ObjectType::Stage,
        ObjectType::Pipe,
        ObjectType::Stream,
        ObjectType::Task,
        ObjectType::Sequence,
        ObjectType::User,
    ];

    /// Dependency order in which types are validated, rendered and applied
    pub const EXECUTION_ORDER: [ObjectType; 14] = [
        ObjectType::Role,
        ObjectType::Warehouse,
        ObjectType::Database,
        ObjectType::Schema,
        ObjectType::Table,
        ObjectType::View,
        ObjectType::Procedure,
        ObjectType::UserDefinedFunction,
        ObjectType::ResourceMonitor,
        ObjectType::Stage,
        ObjectType::Pipe,
        ObjectType::Stream,
        ObjectType::Task,
        ObjectType::Sequence,
    ];

    pub fn id(self) -> i64 {
        self as i64
    }

    pub fn from_id(id: i64) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.id() == id)
            .unwrap_or(ObjectType::Unknown)
    }

    /// Parse a declarative type name; separators and case are ignored
    pub fn parse(name: &str) -> Self {
        let normalized: String = name
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "warehouse" => ObjectType::Warehouse,
            "database" => ObjectType::Database,
            "schema" => ObjectType::Schema,
            "table" => ObjectType::Table,
            "view" => ObjectType::View,
            "procedure" | "sproc" | "storedprocedure" => ObjectType::Procedure,
            "udf" | "userdefinedfunction" => ObjectType::UserDefinedFunction,
            "role" => ObjectType::Role,
            "security" => ObjectType::Security,
            "resourcemonitor" => ObjectType::ResourceMonitor,
            "stage" => ObjectType::Stage,
            "pipe" => ObjectType::Pipe,
            "stream" => ObjectType::Stream,
            "task" => ObjectType::Task,
            "sequence" | "seq" => ObjectType::Sequence,
            "user" => ObjectType::User,
            _ => ObjectType::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ObjectType::Unknown => "unknown",
            ObjectType::Warehouse => "warehouse",
            ObjectType::Database => "database",
            ObjectType::Schema => "schema",
            ObjectType::Table => "table",
            ObjectType::View => "view",
            ObjectType::Procedure => "procedure",
            ObjectType::UserDefinedFunction => "udf",
            ObjectType::Role => "role",
            ObjectType::Security => "security",
            ObjectType::ResourceMonitor => "resource_monitor",
            ObjectType::Stage => "stage",
            ObjectType::Pipe => "pipe",
            ObjectType::Stream => "stream",
            ObjectType::Task => "task",
            ObjectType::Sequence => "sequence",
            ObjectType::User => "user",
        }
    }
}

/// Object-type translator for the warehouse target
pub fn translate(name: &str) -> i64 {
    ObjectType::parse(name).id()
}

pub fn execution_order() -> Vec<i64> {
    ObjectType::EXECUTION_ORDER.iter().map(|t| t.id()).collect()
}

/// Roles declarative input may reference but never assume or grant
pub const PROTECTED_ROLES: [&str; 4] = ["SYSADMIN", "ACCOUNTADMIN", "SECURITYADMIN", "USERADMIN"];

pub fn is_protected_role(role: &str) -> bool {
    let role = role.trim().trim_matches('"').to_uppercase();
    PROTECTED_ROLES.contains(&role.as_str())
}

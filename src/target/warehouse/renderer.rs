//! Warehouse renderer
//!
//! Dispatches on canonical type: roles, databases, schemas and warehouses
//! get dedicated statement sequences, every other type is rendered from its
//! `pre`/`init`/`change`/`post` blocks.

use super::coordinator::ResourceCoordinator;
use super::object_types::{is_protected_role, ObjectType};
use super::specs::{NamespaceSpec, RoleSpec, UsageSpec};
use super::statements::*;
use crate::error::{AppError, AppResult};
use crate::models::{ApplyScope, ChangeItem, GenericSpec, ObjectDesignation, VariableSource};
use crate::target::rendering::{check_identifier, render_statement, scope_from_block, RenderValues};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

pub struct WarehouseRenderer {
    default_role: String,
    coordinator: ResourceCoordinator,
    /// Owner of the item being rendered; registered once every scope rendered
    pending_owner: Option<String>,
}

/// Object kinds usage grants can target
#[derive(Debug, Clone, Copy)]
enum UsageObject {
    Database,
    Schema,
    Warehouse,
}

impl UsageObject {
    fn keyword(self) -> &'static str {
        match self {
            UsageObject::Database => "DATABASE",
            UsageObject::Schema => "SCHEMA",
            UsageObject::Warehouse => "WAREHOUSE",
        }
    }
}

/// Object name from the render values, screened as an identifier
fn identifier<'a>(values: &'a RenderValues, key: &str) -> AppResult<&'a str> {
    check_identifier(values.get(key).and_then(JsonValue::as_str).unwrap_or_default())
}

impl WarehouseRenderer {
    pub fn new(default_role: &str, warehouse: &str) -> Self {
        Self {
            default_role: default_role.to_string(),
            coordinator: ResourceCoordinator::new(warehouse, default_role),
            pending_owner: None,
        }
    }

    pub fn coordinator(&self) -> &ResourceCoordinator {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut ResourceCoordinator {
        &mut self.coordinator
    }

    /// Render an item into its ordered scopes
    pub fn render(&mut self, item: &ChangeItem, source: &VariableSource<'_>) -> AppResult<Vec<ApplyScope>> {
        let values = item.spec.extract_variable_values(source)?;
        let object_type = ObjectType::from_id(item.object_type);
        debug!("Rendering {} {}", object_type.name(), item.spec.object.name);

        self.pending_owner = None;
        let rendered = match object_type {
            ObjectType::Role => self.render_role(item).map(|scope| vec![scope]),
            ObjectType::Database => self.render_database(item, &values).map(|scope| vec![scope]),
            ObjectType::Schema => self.render_schema(item, &values).map(|scope| vec![scope]),
            ObjectType::Warehouse => self.render_warehouse(item, &values).map(|scope| vec![scope]),
            _ => self.render_generic(item, &values),
        };

        // Owners of items that fail to render get no warehouse grant.
        let owner = self.pending_owner.take();
        let scopes = rendered?;
        if let Some(owner) = owner {
            self.coordinator.register_owner(&owner);
        }
        Ok(scopes)
    }

    fn use_role(&self, role: &str) -> AppResult<String> {
        render_statement(USE_ROLE, &[("ROLE", role)])
    }

    /// Screen a role owner and hold it for registration; protected roles are refused
    fn claim_owner(&mut self, owner: &ObjectDesignation) -> AppResult<Option<String>> {
        if !owner.is_role() || owner.id.trim().is_empty() {
            return Ok(None);
        }
        let role = check_identifier(&owner.id)?;
        if is_protected_role(role) {
            return Err(AppError::DisallowedPrivilegedRole(owner.id.clone()));
        }
        self.pending_owner = Some(role.to_string());
        Ok(Some(role.to_string()))
    }

    // ------------------------------------------------------------------
    // Generic
    // ------------------------------------------------------------------

    fn render_generic(&mut self, item: &ChangeItem, values: &RenderValues) -> AppResult<Vec<ApplyScope>> {
        let spec: GenericSpec = item.spec.payload()?;
        let mut scopes = Vec::new();

        if let Some(owner) = self.claim_owner(&spec.meta.owner)? {
            scopes.push(ApplyScope::new("security", vec![self.use_role(&owner)?]));
        }

        if let Some(pre) = &spec.pre {
            scopes.push(scope_from_block("pre", pre, values)?);
        }

        match (item.exists, &spec.change, &spec.init) {
            // A change only applies to objects that also declare how they are created.
            (true, Some(change), Some(_)) => scopes.push(scope_from_block("change", change, values)?),
            (false, _, Some(init)) => scopes.push(scope_from_block("init", init, values)?),
            _ => debug!("No init/change block applies to {}", item.spec.object.name),
        }

        if let Some(post) = &spec.post {
            scopes.push(scope_from_block("post", post, values)?);
        }

        Ok(scopes)
    }

    // ------------------------------------------------------------------
    // Roles
    // ------------------------------------------------------------------

    fn render_role(&mut self, item: &ChangeItem) -> AppResult<ApplyScope> {
        let spec: RoleSpec = item.spec.payload()?;
        let mut statements = vec![self.use_role(SECURITY_ADMIN_ROLE)?];

        for role in spec.roles.iter().map(|r| r.trim()).filter(|r| !r.is_empty()) {
            let role = check_identifier(role)?;
            if is_protected_role(role) {
                warn!("Skipping creation of protected role {}", role);
                continue;
            }
            statements.push(render_statement(CREATE_ROLE, &[("ROLE", role)])?);
            statements.push(render_statement(
                GRANT_ROLE_TO_ROLE,
                &[("ROLE", role), ("GRANTEE", self.default_role.as_str())],
            )?);
        }

        for (grants, to_role, to_user) in [
            (&spec.grants, GRANT_ROLE_TO_ROLE, GRANT_ROLE_TO_USER),
            (&spec.revoke, REVOKE_ROLE_FROM_ROLE, REVOKE_ROLE_FROM_USER),
        ] {
            for grant in grants {
                if is_protected_role(&grant.role) {
                    warn!("Skipping grant change on protected role {}", grant.role);
                    continue;
                }
                let template = if grant.object.is_role() {
                    to_role
                } else if grant.object.is_user() {
                    to_user
                } else {
                    warn!("Skipping grant of {} to unsupported {}", grant.role, grant.object.kind);
                    continue;
                };
                statements.push(render_statement(
                    template,
                    &[
                        ("ROLE", check_identifier(&grant.role)?),
                        ("GRANTEE", check_identifier(&grant.object.id)?),
                    ],
                )?);
            }
        }

        statements.push(self.use_role(&self.default_role)?);
        Ok(ApplyScope::new("role", statements))
    }

    // ------------------------------------------------------------------
    // Namespaces
    // ------------------------------------------------------------------

    fn usage_statements(
        &self,
        object: UsageObject,
        name: &str,
        usage: &UsageSpec,
    ) -> AppResult<Vec<String>> {
        let mut statements = Vec::new();
        for (entries, template) in [(&usage.grants, GRANT_USAGE), (&usage.revoke, REVOKE_USAGE)] {
            for grantee in entries {
                let kind = if grantee.is_role() {
                    "ROLE"
                } else if grantee.is_user() {
                    "USER"
                } else {
                    warn!("Skipping usage change for unsupported grantee {}", grantee.kind);
                    continue;
                };
                statements.push(render_statement(
                    template,
                    &[
                        ("OBJECT", object.keyword()),
                        ("NAME", name),
                        ("KIND", kind),
                        ("GRANTEE", check_identifier(&grantee.id)?),
                    ],
                )?);
            }
        }
        Ok(statements)
    }

    fn render_database(&mut self, item: &ChangeItem, values: &RenderValues) -> AppResult<ApplyScope> {
        let spec: NamespaceSpec = item.spec.payload()?;
        let owner = self.claim_owner(&spec.owner)?;
        let name = identifier(values, "NAME")?;
        let mut statements = Vec::new();

        if item.spec.options.drop {
            if let Some(owner) = &owner {
                statements.push(self.use_role(owner)?);
            }
            statements.push(render_statement(DROP_DATABASE, &[("NAME", name)])?);
            return Ok(ApplyScope::new("database", statements));
        }

        if !item.exists {
            statements.push(render_statement(CREATE_DATABASE, &[("NAME", name)])?);
            statements.push(render_statement(DROP_DEFAULT_PUBLIC_SCHEMA, &[("NAME", name)])?);
            if let Some(owner) = &owner {
                statements.push(render_statement(
                    GRANT_DATABASE_OWNERSHIP,
                    &[("NAME", name), ("ROLE", owner.as_str())],
                )?);
            }
        }
        if let Some(owner) = &owner {
            statements.push(self.use_role(owner)?);
            if !item.exists {
                statements.extend(self.usage_statements(
                    UsageObject::Database,
                    name,
                    &UsageSpec {
                        grants: vec![ObjectDesignation {
                            kind: "role".into(),
                            id: self.default_role.clone(),
                        }],
                        revoke: Vec::new(),
                    },
                )?);
            }
        }

        statements.extend(self.usage_statements(UsageObject::Database, name, &spec.usage)?);
        Ok(ApplyScope::new("database", statements))
    }

    fn render_schema(&mut self, item: &ChangeItem, values: &RenderValues) -> AppResult<ApplyScope> {
        let spec: NamespaceSpec = item.spec.payload()?;
        let owner = self.claim_owner(&spec.owner)?;
        let name = identifier(values, "NAME")?;
        let database = identifier(values, "DATABASE")?;
        let qualified = format!("{}.{}", database, name);
        let mut statements = Vec::new();

        if let Some(owner) = &owner {
            statements.push(self.use_role(owner)?);
        }

        if item.spec.options.drop {
            statements.push(render_statement(
                DROP_SCHEMA,
                &[("DATABASE", database), ("NAME", name)],
            )?);
            return Ok(ApplyScope::new("schema", statements));
        }

        if !item.exists {
            statements.push(render_statement(
                CREATE_SCHEMA,
                &[("DATABASE", database), ("NAME", name)],
            )?);
            statements.extend(self.usage_statements(
                UsageObject::Schema,
                &qualified,
                &UsageSpec {
                    grants: vec![ObjectDesignation {
                        kind: "role".into(),
                        id: self.default_role.clone(),
                    }],
                    revoke: Vec::new(),
                },
            )?);
        }

        statements.extend(self.usage_statements(UsageObject::Schema, &qualified, &spec.usage)?);
        Ok(ApplyScope::new("schema", statements))
    }

    fn render_warehouse(&mut self, item: &ChangeItem, values: &RenderValues) -> AppResult<ApplyScope> {
        let spec: NamespaceSpec = item.spec.payload()?;
        self.claim_owner(&spec.owner)?;
        let name = identifier(values, "NAME")?;

        let mut statements = vec![self.use_role(&self.default_role)?];
        statements.extend(self.usage_statements(UsageObject::Warehouse, name, &spec.usage)?);
        Ok(ApplyScope::new("warehouse", statements))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::change_log::ChangeMetadata;
    use crate::models::{ChangeAction, CodeBlockSpec};
    use crate::secrets::testing::StaticSecretStore;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn item(yaml: &str, exists: bool) -> ChangeItem {
        let spec: CodeBlockSpec = serde_yaml::from_str(yaml).unwrap();
        let object_type = super::super::object_types::translate(&spec.object_type);
        let mut item = ChangeItem::new(
            object_type,
            spec,
            ChangeMetadata::from_path(ChangeAction::Add, "x.yaml", "h"),
            0,
        );
        item.exists = exists;
        item
    }

    fn render(renderer: &mut WarehouseRenderer, item: &ChangeItem) -> AppResult<Vec<ApplyScope>> {
        let secrets = StaticSecretStore::default();
        let vars = HashMap::new();
        renderer.render(
            item,
            &VariableSource {
                config_vars: &vars,
                secrets: &secrets,
            },
        )
    }

    fn names(scopes: &[ApplyScope]) -> Vec<&str> {
        scopes.iter().map(|s| s.name.as_str()).collect()
    }

    const TABLE: &str = r#"
type: table
object: {name: ORDERS, database: SALES, schema: CORE}
spec:
  meta:
    owner: {type: role, id: LOADER}
  pre: ALTER SESSION SET TIMEZONE = 'UTC'
  init: CREATE TABLE {{ DATABASE }}.{{ SCHEMA }}.{{ NAME }} (ID NUMBER)
  change: ALTER TABLE {{ DATABASE }}.{{ SCHEMA }}.{{ NAME }} ADD COLUMN NAME VARCHAR
  post: GRANT SELECT ON {{ DATABASE }}.{{ SCHEMA }}.{{ NAME }} TO ROLE READER
"#;

    #[test]
    fn test_generic_new_object_renders_init() {
        let mut renderer = WarehouseRenderer::new("DEPLOYER", "LOAD_WH");
        let scopes = render(&mut renderer, &item(TABLE, false)).unwrap();

        assert_eq!(names(&scopes), vec!["security", "pre", "init", "post"]);
        assert_eq!(scopes[0].statements, vec!["USE ROLE LOADER".to_string()]);
        assert_eq!(
            scopes[2].statements,
            vec!["CREATE TABLE SALES.CORE.ORDERS (ID NUMBER)".to_string()]
        );
        assert_eq!(renderer.coordinator().owners(), &["LOADER".to_string()]);
    }

    #[test]
    fn test_generic_existing_object_renders_change() {
        let mut renderer = WarehouseRenderer::new("DEPLOYER", "LOAD_WH");
        let scopes = render(&mut renderer, &item(TABLE, true)).unwrap();
        assert_eq!(names(&scopes), vec!["security", "pre", "change", "post"]);
    }

    #[test]
    fn test_change_without_init_on_new_object() {
        let yaml = "type: view\nobject: {name: V}\nspec:\n  change: ALTER VIEW V SET COMMENT = 'x'\n  post: SELECT 1\n";
        let mut renderer = WarehouseRenderer::new("DEPLOYER", "LOAD_WH");
        let scopes = render(&mut renderer, &item(yaml, false)).unwrap();
        assert_eq!(names(&scopes), vec!["post"]);
    }

    #[test]
    fn test_change_without_init_on_existing_object() {
        let yaml = "type: view\nobject: {name: V}\nspec:\n  change: ALTER VIEW V SET COMMENT = 'x'\n  post: SELECT 1\n";
        let mut renderer = WarehouseRenderer::new("DEPLOYER", "LOAD_WH");
        let scopes = render(&mut renderer, &item(yaml, true)).unwrap();
        assert_eq!(names(&scopes), vec!["post"]);
    }

    #[test]
    fn test_owner_with_second_statement_is_refused() {
        let yaml = TABLE.replace("id: LOADER", "id: 'LOADER; USE ROLE ACCOUNTADMIN'");
        let mut renderer = WarehouseRenderer::new("DEPLOYER", "LOAD_WH");
        assert!(matches!(
            render(&mut renderer, &item(&yaml, false)),
            Err(AppError::InvalidIdentifier(_))
        ));
        assert!(renderer.coordinator().owners().is_empty());
    }

    #[test]
    fn test_database_name_with_second_statement_is_refused() {
        let yaml = "type: database\nobject: {name: 'X; USE ROLE ACCOUNTADMIN; DROP DATABASE PROD'}\nspec:\n  owner: {type: role, id: LOADER}\n";
        let mut renderer = WarehouseRenderer::new("DEPLOYER", "LOAD_WH");
        assert!(matches!(
            render(&mut renderer, &item(yaml, false)),
            Err(AppError::InvalidIdentifier(_))
        ));
        assert!(renderer.coordinator().owners().is_empty());
    }

    #[test]
    fn test_grantee_with_second_statement_is_refused() {
        let yaml = "type: warehouse\nobject: {name: BI_WH}\nspec:\n  usage:\n    grants:\n      - {type: role, id: 'READER; USE ROLE SYSADMIN'}\n";
        let mut renderer = WarehouseRenderer::new("DEPLOYER", "LOAD_WH");
        assert!(matches!(
            render(&mut renderer, &item(yaml, true)),
            Err(AppError::InvalidIdentifier(_))
        ));

        let yaml = "type: role\nobject: {name: R}\nspec:\n  grants:\n    - role: ANALYST\n      object: {type: user, id: 'JDOE; DROP USER ADMIN'}\n";
        assert!(matches!(
            render(&mut renderer, &item(yaml, false)),
            Err(AppError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_quoted_names_render() {
        let yaml = "type: schema\nobject: {name: '\"Core Data\"', database: SALES}\nspec: {}\n";
        let mut renderer = WarehouseRenderer::new("DEPLOYER", "LOAD_WH");
        let scopes = render(&mut renderer, &item(yaml, true)).unwrap();
        assert!(scopes[0].statements.is_empty());
    }

    #[test]
    fn test_protected_owner_is_refused() {
        let yaml = TABLE.replace("id: LOADER", "id: sysadmin");
        let mut renderer = WarehouseRenderer::new("DEPLOYER", "LOAD_WH");
        assert!(matches!(
            render(&mut renderer, &item(&yaml, false)),
            Err(AppError::DisallowedPrivilegedRole(_))
        ));
    }

    #[test]
    fn test_role_switch_in_block_fails_the_render() {
        let yaml = TABLE.replace("ALTER SESSION SET TIMEZONE = 'UTC'", "USE ROLE ACCOUNTADMIN");
        let mut renderer = WarehouseRenderer::new("DEPLOYER", "LOAD_WH");
        assert!(matches!(
            render(&mut renderer, &item(&yaml, false)),
            Err(AppError::UnapprovedCommand(_))
        ));
    }

    #[test]
    fn test_owner_registered_only_after_every_block_renders() {
        let mut renderer = WarehouseRenderer::new("DEPLOYER", "LOAD_WH");
        let yaml = TABLE.replace("TO ROLE READER", "TO ROLE READER; USE ROLE ACCOUNTADMIN");
        assert!(render(&mut renderer, &item(&yaml, false)).is_err());
        assert!(renderer.coordinator().owners().is_empty());

        render(&mut renderer, &item(TABLE, false)).unwrap();
        assert_eq!(renderer.coordinator().owners(), &["LOADER".to_string()]);
    }

    #[test]
    fn test_role_renderer() {
        let yaml = r#"
type: role
object: {name: ANALYST_ROLES}
spec:
  roles: [ANALYST, SYSADMIN]
  grants:
    - role: ANALYST
      object: {type: user, id: JDOE}
    - role: ACCOUNTADMIN
      object: {type: user, id: JDOE}
  revoke:
    - role: ANALYST
      object: {type: role, id: LEGACY}
"#;
        let mut renderer = WarehouseRenderer::new("DEPLOYER", "LOAD_WH");
        let scopes = render(&mut renderer, &item(yaml, false)).unwrap();

        assert_eq!(names(&scopes), vec!["role"]);
        assert_eq!(
            scopes[0].statements,
            vec![
                "USE ROLE SECURITYADMIN",
                "CREATE ROLE IF NOT EXISTS ANALYST",
                "GRANT ROLE ANALYST TO ROLE DEPLOYER",
                "GRANT ROLE ANALYST TO USER JDOE",
                "REVOKE ROLE ANALYST FROM ROLE LEGACY",
                "USE ROLE DEPLOYER",
            ]
        );
    }

    #[test]
    fn test_new_database() {
        let yaml = r#"
type: database
object: {name: SALES}
spec:
  owner: {type: role, id: LOADER}
  usage:
    grants:
      - {type: role, id: READER}
"#;
        let mut renderer = WarehouseRenderer::new("DEPLOYER", "LOAD_WH");
        let scopes = render(&mut renderer, &item(yaml, false)).unwrap();

        assert_eq!(
            scopes[0].statements,
            vec![
                "CREATE DATABASE IF NOT EXISTS SALES",
                "DROP SCHEMA IF EXISTS SALES.PUBLIC",
                "GRANT OWNERSHIP ON DATABASE SALES TO ROLE LOADER COPY CURRENT GRANTS",
                "USE ROLE LOADER",
                "GRANT USAGE ON DATABASE SALES TO ROLE DEPLOYER",
                "GRANT USAGE ON DATABASE SALES TO ROLE READER",
            ]
        );
        assert_eq!(renderer.coordinator().owners(), &["LOADER".to_string()]);
    }

    #[test]
    fn test_drop_database() {
        let yaml = "type: database\nobject: {name: SALES}\noptions: {drop: true}\nspec:\n  owner: {type: role, id: LOADER}\n";
        let mut renderer = WarehouseRenderer::new("DEPLOYER", "LOAD_WH");
        let scopes = render(&mut renderer, &item(yaml, true)).unwrap();
        assert_eq!(
            scopes[0].statements,
            vec!["USE ROLE LOADER", "DROP DATABASE IF EXISTS SALES"]
        );
    }

    #[test]
    fn test_existing_schema_only_changes_usage() {
        let yaml = r#"
type: schema
object: {name: CORE, database: SALES}
spec:
  owner: {type: role, id: LOADER}
  usage:
    revoke:
      - {type: user, id: JDOE}
"#;
        let mut renderer = WarehouseRenderer::new("DEPLOYER", "LOAD_WH");
        let scopes = render(&mut renderer, &item(yaml, true)).unwrap();
        assert_eq!(
            scopes[0].statements,
            vec!["USE ROLE LOADER", "REVOKE USAGE ON SCHEMA SALES.CORE FROM USER JDOE"]
        );
    }

    #[test]
    fn test_warehouse_usage() {
        let yaml = "type: warehouse\nobject: {name: BI_WH}\nspec:\n  usage:\n    grants:\n      - {type: role, id: READER}\n";
        let mut renderer = WarehouseRenderer::new("DEPLOYER", "LOAD_WH");
        let scopes = render(&mut renderer, &item(yaml, true)).unwrap();
        assert_eq!(
            scopes[0].statements,
            vec!["USE ROLE DEPLOYER", "GRANT USAGE ON WAREHOUSE BI_WH TO ROLE READER"]
        );
    }
}

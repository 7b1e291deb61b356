//! Existence validator
//!
//! Loads the catalog of every database the change log references once per
//! run, then marks each item whose declared object is already present.

use super::object_types::ObjectType;
use super::statements::{LIST_DATABASES, LIST_SCHEMAS, LIST_TABLES_AND_VIEWS};
use crate::error::{AppError, AppResult};
use crate::models::{ChangeItem, ChangeLog, ObjectTypeTranslator, Severity, ValidationStep};
use crate::target::metadata::{CatalogObject, Metadata};
use crate::target::rendering::render_statement;
use crate::target::session::Session;
use crate::target::validation::Validator;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

pub const EXISTS_VALIDATOR: &str = "exists";

pub struct ExistsValidator {
    session: Arc<dyn Session>,
    /// Database whose information schema lists the account's databases
    catalog_database: String,
    translator: ObjectTypeTranslator,
    metadata: Option<Metadata>,
}

impl ExistsValidator {
    pub fn new(session: Arc<dyn Session>, catalog_database: &str, translator: ObjectTypeTranslator) -> Self {
        Self {
            session,
            catalog_database: catalog_database.to_string(),
            translator,
            metadata: None,
        }
    }

    /// Lower-cased names of the databases items live in (or are)
    fn referenced_databases(changes: &ChangeLog) -> BTreeSet<String> {
        changes
            .items()
            .map(|item| {
                if ObjectType::from_id(item.object_type) == ObjectType::Database {
                    &item.spec.object.name
                } else {
                    &item.spec.object.database
                }
            })
            .map(|name| name.trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect()
    }

    async fn load_database(&self, metadata: &mut Metadata, database: &str) -> AppResult<()> {
        metadata.add(
            ObjectType::Database.id(),
            CatalogObject::new(database, "", ""),
        );

        let schemas = self
            .session
            .query(&render_statement(LIST_SCHEMAS, &[("DATABASE", database)])?)
            .await?;
        for row in &schemas {
            metadata.add(
                ObjectType::Schema.id(),
                CatalogObject::new(row.text(0)?, database, ""),
            );
        }

        let relations = self
            .session
            .query(&render_statement(LIST_TABLES_AND_VIEWS, &[("DATABASE", database)])?)
            .await?;
        for row in &relations {
            let kind = if row.get(2).unwrap_or_default().to_uppercase().contains("VIEW") {
                ObjectType::View
            } else {
                ObjectType::Table
            };
            metadata.add(
                kind.id(),
                CatalogObject::new(row.text(1)?, database, row.text(0)?),
            );
        }

        debug!(
            "Loaded {} schemas and {} relations from {}",
            schemas.len(),
            relations.len(),
            database
        );
        Ok(())
    }
}

#[async_trait]
impl Validator for ExistsValidator {
    fn designation(&self) -> &str {
        EXISTS_VALIDATOR
    }

    async fn init(&mut self, changes: &ChangeLog) -> AppResult<()> {
        let referenced = Self::referenced_databases(changes);
        let mut metadata = Metadata::new(self.translator);

        if !referenced.is_empty() {
            let rows = self
                .session
                .query(&render_statement(
                    LIST_DATABASES,
                    &[("DATABASE", self.catalog_database.as_str())],
                )?)
                .await?;

            for row in &rows {
                let database = row.text(0)?;
                if referenced.contains(&database.trim().to_lowercase()) {
                    self.load_database(&mut metadata, database.trim()).await?;
                }
            }
        }

        info!(
            "Catalog loaded: {} objects across {} referenced databases",
            metadata.len(),
            referenced.len()
        );
        self.metadata = Some(metadata);
        Ok(())
    }

    async fn validate(&mut self, item: &mut ChangeItem) -> AppResult<()> {
        let Some(metadata) = &self.metadata else {
            item.validation.add_step(ValidationStep::failed(
                EXISTS_VALIDATOR,
                Severity::Critical,
                "catalog metadata was not loaded",
            ));
            return Err(AppError::Validation(format!(
                "catalog metadata unavailable while validating {}",
                item.metadata.name
            )));
        };

        item.exists = metadata.find_object_from_spec(&item.spec).is_some();
        debug!(
            "{} {} exists: {}",
            item.spec.object_type, item.spec.object.name, item.exists
        );
        item.validation.add_step(ValidationStep::passed(EXISTS_VALIDATOR));
        Ok(())
    }

    async fn destroy(&mut self) -> AppResult<()> {
        self.metadata = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::object_types::translate;
    use super::*;
    use crate::models::{ChangeAction, ChangeMetadata, ChangeReference};
    use crate::target::session::testing::RecordingSession;
    use pretty_assertions::assert_eq;

    fn change_log(docs: &[&str]) -> ChangeLog {
        let mut log = ChangeLog::new(translate);
        let bundle = log.add_bundle(ChangeReference::new("c1", "first"));
        for (i, doc) in docs.iter().enumerate() {
            bundle
                .add_item(
                    doc.as_bytes(),
                    ChangeMetadata::from_path(ChangeAction::Add, &format!("{}.yaml", i), "h"),
                )
                .unwrap();
        }
        log
    }

    fn session() -> Arc<RecordingSession> {
        Arc::new(
            RecordingSession::default()
                .respond(
                    "INFORMATION_SCHEMA.DATABASES",
                    vec![vec![Some("SALES")], vec![Some("FINANCE")]],
                )
                .respond("SALES.INFORMATION_SCHEMA.SCHEMATA", vec![vec![Some("CORE")]])
                .respond(
                    "SALES.INFORMATION_SCHEMA.TABLES",
                    vec![
                        vec![Some("CORE"), Some("ORDERS"), Some("BASE TABLE")],
                        vec![Some("CORE"), Some("V_ORDERS"), Some("VIEW")],
                    ],
                ),
        )
    }

    #[tokio::test]
    async fn test_marks_existing_objects() {
        let session = session();
        let mut validator = ExistsValidator::new(session.clone(), "MGMT", translate);
        let mut log = change_log(&[
            "type: table\nobject: {name: orders, database: sales, schema: core}\n",
            "type: table\nobject: {name: ORDERS, database: SALES, schema: STAGING}\n",
            "type: view\nobject: {name: V_ORDERS, database: SALES, schema: CORE}\n",
            "type: database\nobject: {name: SALES}\n",
            "type: schema\nobject: {name: CORE, database: SALES}\n",
            "type: table\nobject: {name: GL, database: LEDGER, schema: CORE}\n",
        ]);

        validator.init(&log).await.unwrap();
        for item in log.items_mut() {
            validator.validate(item).await.unwrap();
        }

        let exists: Vec<bool> = log.items().map(|i| i.exists).collect();
        assert_eq!(exists, vec![true, false, true, true, true, false]);
        assert!(log.items().all(|i| i.validation.passed_validation()));

        // FINANCE is not referenced, LEDGER does not exist.
        let queries = session.queries();
        assert_eq!(queries.len(), 3);
        assert!(queries[0].starts_with("SELECT DATABASE_NAME FROM MGMT."));
        assert!(!queries.iter().any(|q| q.contains("FINANCE")));
    }

    #[tokio::test]
    async fn test_no_referenced_databases_skips_catalog_queries() {
        let session = session();
        let mut validator = ExistsValidator::new(session.clone(), "MGMT", translate);
        let mut log = change_log(&["type: role\nobject: {name: ANALYSTS}\n"]);

        validator.init(&log).await.unwrap();
        let item = log.items_mut().next().unwrap();
        validator.validate(item).await.unwrap();

        assert!(!item.exists);
        assert!(session.queries().is_empty());
    }

    #[tokio::test]
    async fn test_validate_without_init_is_critical() {
        let mut validator = ExistsValidator::new(session(), "MGMT", translate);
        let mut log = change_log(&["type: table\nobject: {name: T, database: SALES, schema: CORE}\n"]);
        let item = log.items_mut().next().unwrap();

        assert!(validator.validate(item).await.is_err());
        assert_eq!(item.validation.critical, 1);
    }
}

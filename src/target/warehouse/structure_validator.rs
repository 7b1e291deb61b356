//! Structural validator
//!
//! Exercises a table's statement blocks against shadow objects in the
//! management database. The live table is cloned into `ORIGIN` and its
//! `change` block applied there; the `init` block builds a fresh copy in
//! `VALIDATE`. Both must end up with the same columns.

use super::statements::*;
use crate::error::AppResult;
use crate::models::{ChangeItem, ChangeLog, GenericSpec, Severity, ValidationStep, VariableSource};
use crate::secrets::SecretStore;
use crate::target::rendering::{
    check_identifier, render_statement, scope_from_block, segment_statements, RenderValues,
};
use crate::target::session::Session;
use crate::target::validation::Validator;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const STRUCTURE_VALIDATOR: &str = "structure";

/// One row of the column comparison
#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnPair {
    origin: Option<(String, String)>,
    validate: Option<(String, String)>,
}

impl ColumnPair {
    fn mismatch(&self) -> Option<String> {
        match (&self.origin, &self.validate) {
            (Some((on, ot)), Some((vn, vt))) => {
                if !on.eq_ignore_ascii_case(vn) {
                    Some(format!("column name {} != {}", on, vn))
                } else if !ot.eq_ignore_ascii_case(vt) {
                    Some(format!("column {} type {} != {}", on, ot, vt))
                } else {
                    None
                }
            }
            (Some((on, _)), None) => Some(format!("column {} missing after init", on)),
            (None, Some((vn, _))) => Some(format!("column {} missing after change", vn)),
            (None, None) => None,
        }
    }
}

pub struct StructureValidator {
    session: Arc<dyn Session>,
    secrets: Arc<dyn SecretStore>,
    vars: HashMap<String, String>,
    mgmt_database: String,
    prepared: bool,
}

impl StructureValidator {
    pub fn new(
        session: Arc<dyn Session>,
        secrets: Arc<dyn SecretStore>,
        vars: HashMap<String, String>,
        mgmt_database: &str,
    ) -> Self {
        Self {
            session,
            secrets,
            vars,
            mgmt_database: mgmt_database.to_string(),
            prepared: false,
        }
    }

    async fn execute_all(&self, text: &str) -> AppResult<()> {
        for statement in segment_statements(text) {
            self.session.execute(&statement).await?;
        }
        Ok(())
    }

    fn shadow_values(&self, item: &ChangeItem) -> AppResult<Vec<(&'static str, String)>> {
        let object = &item.spec.object;
        let mut values = vec![("MGMT_DATABASE", self.mgmt_database.clone())];
        for (key, raw) in [("NAME", &object.name), ("DATABASE", &object.database), ("SCHEMA", &object.schema)] {
            let value = match raw.trim() {
                "" => "",
                id => check_identifier(id)?,
            };
            values.push((key, value.to_string()));
        }
        Ok(values)
    }

    async fn cleanup(&self, item: &ChangeItem) {
        let result = match self.shadow_values(item) {
            Ok(values) => {
                let pairs: Vec<(&str, &str)> = values.iter().map(|(k, v)| (*k, v.as_str())).collect();
                match render_statement(SHADOW_CLEANUP, &pairs) {
                    Ok(text) => self.execute_all(&text).await,
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Shadow cleanup for {} failed: {}", item.spec.object.name, e);
        }
    }

    /// Values for a block rendered into one of the shadow schemas
    fn block_values(&self, base: &RenderValues, schema: &str) -> RenderValues {
        let mut values = base.clone();
        values.insert("DATABASE".into(), JsonValue::String(self.mgmt_database.clone()));
        values.insert("SCHEMA".into(), JsonValue::String(schema.to_string()));
        values
    }

    async fn probe(&self, item: &ChangeItem, init: &str, change: &str) -> AppResult<Vec<ColumnPair>> {
        let base = item.spec.extract_variable_values(&VariableSource {
            config_vars: &self.vars,
            secrets: self.secrets.as_ref(),
        })?;
        let init = scope_from_block("init", init, &self.block_values(&base, VALIDATE_SCHEMA))?;
        let change = scope_from_block("change", change, &self.block_values(&base, ORIGIN_SCHEMA))?;

        let values = self.shadow_values(item)?;
        let pairs: Vec<(&str, &str)> = values.iter().map(|(k, v)| (*k, v.as_str())).collect();

        self.execute_all(&render_statement(SHADOW_CLEANUP, &pairs)?).await?;
        self.session
            .execute(&render_statement(SHADOW_CLONE_ORIGIN, &pairs)?)
            .await?;
        for statement in init.statements.iter().chain(change.statements.iter()) {
            self.session.execute(statement).await?;
        }

        let rows = self
            .session
            .query(&render_statement(SHADOW_COMPARE_COLUMNS, &pairs)?)
            .await?;
        let column = |row: &crate::target::session::Row, at: usize| {
            match (row.get(at), row.get(at + 1)) {
                (Some(name), Some(kind)) => Some((name.to_string(), kind.to_string())),
                _ => None,
            }
        };
        Ok(rows
            .iter()
            .map(|row| ColumnPair {
                origin: column(row, 0),
                validate: column(row, 2),
            })
            .collect())
    }
}

#[async_trait]
impl Validator for StructureValidator {
    fn designation(&self) -> &str {
        STRUCTURE_VALIDATOR
    }

    async fn init(&mut self, _changes: &ChangeLog) -> AppResult<()> {
        let prepared = match render_statement(
            SHADOW_PREPARE,
            &[("MGMT_DATABASE", self.mgmt_database.as_str())],
        ) {
            Ok(text) => self.execute_all(&text).await,
            Err(e) => Err(e),
        };
        self.prepared = match prepared {
            Ok(()) => true,
            Err(e) => {
                warn!("Unable to prepare shadow schemas in {}: {}", self.mgmt_database, e);
                false
            }
        };
        Ok(())
    }

    async fn validate(&mut self, item: &mut ChangeItem) -> AppResult<()> {
        let options = &item.spec.options;
        if !(options.validate && options.check_exists) {
            item.validation.add_step(ValidationStep::failed(
                STRUCTURE_VALIDATOR,
                Severity::Info,
                "structural validation not requested",
            ));
            return Ok(());
        }
        if !item.exists {
            item.validation.add_step(ValidationStep::failed(
                STRUCTURE_VALIDATOR,
                Severity::Warning,
                "object does not exist yet; structural validation skipped",
            ));
            return Ok(());
        }

        let spec: GenericSpec = match item.spec.payload() {
            Ok(spec) => spec,
            Err(e) => {
                item.validation.add_step(ValidationStep::failed(
                    STRUCTURE_VALIDATOR,
                    Severity::Critical,
                    e.to_string(),
                ));
                return Ok(());
            }
        };
        let (Some(init), Some(change)) = (&spec.init, &spec.change) else {
            item.validation.add_step(ValidationStep::failed(
                STRUCTURE_VALIDATOR,
                Severity::Critical,
                "structural validation requires both init and change blocks",
            ));
            return Ok(());
        };
        if !self.prepared {
            item.validation.add_step(ValidationStep::failed(
                STRUCTURE_VALIDATOR,
                Severity::Critical,
                "shadow schemas are unavailable",
            ));
            return Ok(());
        }

        debug!("Probing structure of {}", item.spec.object.name);
        let probed = self.probe(item, init, change).await;
        self.cleanup(item).await;

        let step = match probed {
            Err(e) => ValidationStep::failed(STRUCTURE_VALIDATOR, Severity::Critical, e.to_string()),
            Ok(columns) if columns.is_empty() => ValidationStep::failed(
                STRUCTURE_VALIDATOR,
                Severity::Critical,
                "no comparable columns",
            ),
            Ok(columns) => {
                let mismatches: Vec<String> = columns.iter().filter_map(ColumnPair::mismatch).collect();
                if mismatches.is_empty() {
                    ValidationStep::passed(STRUCTURE_VALIDATOR)
                } else {
                    ValidationStep::failed(STRUCTURE_VALIDATOR, Severity::Critical, mismatches.join("; "))
                }
            }
        };
        item.validation.add_step(step);
        Ok(())
    }

    async fn destroy(&mut self) -> AppResult<()> {
        self.prepared = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::object_types::translate;
    use super::*;
    use crate::models::{ChangeAction, ChangeLog, ChangeMetadata, ChangeReference};
    use crate::secrets::testing::StaticSecretStore;
    use crate::target::session::testing::RecordingSession;
    use pretty_assertions::assert_eq;

    const ORDERS: &str = r#"
type: table
object: {name: ORDERS, database: SALES, schema: CORE}
options: {checkExists: true, validate: true}
spec:
  init: CREATE TABLE {{ DATABASE }}.{{ SCHEMA }}.{{ NAME }} (ID NUMBER, NAME VARCHAR)
  change: ALTER TABLE {{ DATABASE }}.{{ SCHEMA }}.{{ NAME }} ADD COLUMN NAME VARCHAR
"#;

    fn item(doc: &str, exists: bool) -> ChangeItem {
        let mut log = ChangeLog::new(translate);
        log.add_bundle(ChangeReference::new("c1", "first"))
            .add_item(doc.as_bytes(), ChangeMetadata::from_path(ChangeAction::Add, "orders.yaml", "h"))
            .unwrap();
        let mut item = log.bundles[0].items[0].clone();
        item.exists = exists;
        item
    }

    async fn validator(session: &Arc<RecordingSession>) -> StructureValidator {
        let mut v = StructureValidator::new(
            session.clone(),
            Arc::new(StaticSecretStore::default()),
            HashMap::new(),
            "MGMT",
        );
        v.init(&ChangeLog::new(translate)).await.unwrap();
        v
    }

    fn step(item: &ChangeItem) -> &ValidationStep {
        item.validation.step(STRUCTURE_VALIDATOR).unwrap()
    }

    #[tokio::test]
    async fn test_matching_columns_pass() {
        let session = Arc::new(RecordingSession::default().respond(
            "INFORMATION_SCHEMA.COLUMNS",
            vec![
                vec![Some("ID"), Some("NUMBER"), Some("ID"), Some("NUMBER")],
                vec![Some("NAME"), Some("VARCHAR"), Some("name"), Some("varchar")],
            ],
        ));
        let mut v = validator(&session).await;
        let mut item = item(ORDERS, true);

        v.validate(&mut item).await.unwrap();

        assert!(step(&item).success);
        let executed = session.executed();
        assert!(executed.contains(&"CREATE TABLE MGMT.ORIGIN.ORDERS CLONE SALES.CORE.ORDERS".to_string()));
        assert!(executed.contains(&"CREATE TABLE MGMT.VALIDATE.ORDERS (ID NUMBER, NAME VARCHAR)".to_string()));
        assert!(executed.contains(&"ALTER TABLE MGMT.ORIGIN.ORDERS ADD COLUMN NAME VARCHAR".to_string()));
        assert_eq!(
            executed.last().map(String::as_str),
            Some("DROP TABLE IF EXISTS MGMT.VALIDATE.ORDERS")
        );
    }

    #[tokio::test]
    async fn test_type_mismatch_is_critical() {
        let session = Arc::new(RecordingSession::default().respond(
            "INFORMATION_SCHEMA.COLUMNS",
            vec![
                vec![Some("ID"), Some("NUMBER"), Some("ID"), Some("NUMBER")],
                vec![Some("NAME"), Some("VARCHAR"), Some("NAME"), Some("TEXT")],
            ],
        ));
        let mut v = validator(&session).await;
        let mut item = item(ORDERS, true);

        v.validate(&mut item).await.unwrap();

        assert_eq!(step(&item).severity, Severity::Critical);
        assert!(step(&item).error.as_deref().unwrap_or_default().contains("NAME"));
        assert!(!item.validation.passed_validation());
    }

    #[tokio::test]
    async fn test_no_columns_is_critical() {
        let session = Arc::new(RecordingSession::default());
        let mut v = validator(&session).await;
        let mut item = item(ORDERS, true);

        v.validate(&mut item).await.unwrap();
        assert_eq!(step(&item).severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_missing_column_on_one_side_is_critical() {
        let session = Arc::new(RecordingSession::default().respond(
            "INFORMATION_SCHEMA.COLUMNS",
            vec![vec![Some("ID"), Some("NUMBER"), None, None]],
        ));
        let mut v = validator(&session).await;
        let mut item = item(ORDERS, true);

        v.validate(&mut item).await.unwrap();
        assert_eq!(
            step(&item).error.as_deref(),
            Some("column ID missing after init")
        );
    }

    #[tokio::test]
    async fn test_skips_when_object_missing_or_not_requested() {
        let session = Arc::new(RecordingSession::default());
        let mut v = validator(&session).await;

        let mut missing = item(ORDERS, false);
        v.validate(&mut missing).await.unwrap();
        assert_eq!(step(&missing).severity, Severity::Warning);

        let mut plain = item(&ORDERS.replace("validate: true", "validate: false"), true);
        v.validate(&mut plain).await.unwrap();
        assert_eq!(step(&plain).severity, Severity::Info);

        // Only the shadow schema preparation ran.
        assert_eq!(session.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_change_block_is_critical() {
        let session = Arc::new(RecordingSession::default());
        let mut v = validator(&session).await;
        let doc = ORDERS
            .lines()
            .filter(|l| !l.trim_start().starts_with("change:"))
            .collect::<Vec<_>>()
            .join("\n");
        let mut item = item(&doc, true);

        v.validate(&mut item).await.unwrap();
        assert_eq!(step(&item).severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_shadow_failure_is_recorded_and_cleaned_up() {
        let session = Arc::new(RecordingSession::default().fail_on("CLONE"));
        let mut v = validator(&session).await;
        let mut item = item(ORDERS, true);

        v.validate(&mut item).await.unwrap();

        assert_eq!(step(&item).severity, Severity::Critical);
        assert!(session.queries().is_empty());
        assert_eq!(
            session.executed().last().map(String::as_str),
            Some("DROP TABLE IF EXISTS MGMT.VALIDATE.ORDERS")
        );
    }

    #[tokio::test]
    async fn test_object_name_with_second_statement_never_reaches_the_session() {
        let session = Arc::new(RecordingSession::default());
        let mut v = validator(&session).await;
        let doc = ORDERS.replace("name: ORDERS", "name: 'ORDERS; DROP DATABASE PROD'");
        let mut item = item(&doc, true);

        v.validate(&mut item).await.unwrap();

        assert_eq!(step(&item).severity, Severity::Critical);
        assert!(step(&item).error.as_deref().unwrap_or_default().contains("Invalid identifier"));
        assert!(session.executed().iter().all(|s| !s.contains("DROP DATABASE")));
    }
}

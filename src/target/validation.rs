//! Validation pipeline
//!
//! Global validators run for every item, typed validators only for items of
//! their canonical type. Findings are recorded as steps on the item; an
//! `Err` from a validator is a hard failure and stops the pass.

use crate::error::AppResult;
use crate::models::{ChangeItem, ChangeLog, ObjectTypeTranslator};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[async_trait]
pub trait Validator: Send + Sync {
    /// Step name recorded on validated items
    fn designation(&self) -> &str;

    /// Called once per run before any item is validated
    async fn init(&mut self, changes: &ChangeLog) -> AppResult<()>;

    async fn validate(&mut self, item: &mut ChangeItem) -> AppResult<()>;

    async fn destroy(&mut self) -> AppResult<()>;
}

pub struct ValidationHandler {
    translator: ObjectTypeTranslator,
    global: Vec<Box<dyn Validator>>,
    typed: BTreeMap<i64, Vec<Box<dyn Validator>>>,
}

impl ValidationHandler {
    pub fn new(translator: ObjectTypeTranslator) -> Self {
        Self {
            translator,
            global: Vec::new(),
            typed: BTreeMap::new(),
        }
    }

    pub fn add_global(&mut self, validator: Box<dyn Validator>) {
        self.global.push(validator);
    }

    pub fn add_for_type(&mut self, object_type: i64, validator: Box<dyn Validator>) {
        self.typed.entry(object_type).or_default().push(validator);
    }

    fn all_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Validator>> {
        self.global
            .iter_mut()
            .chain(self.typed.values_mut().flat_map(|v| v.iter_mut()))
    }

    /// Global validators first, then typed, each in registration order
    pub async fn initialize(&mut self, changes: &ChangeLog) -> AppResult<()> {
        for validator in self.all_mut() {
            debug!("Initializing validator {}", validator.designation());
            validator.init(changes).await?;
        }
        Ok(())
    }

    /// Run every applicable validator; the first error short-circuits
    pub async fn validate(&mut self, item: &mut ChangeItem) -> AppResult<()> {
        for validator in self.global.iter_mut() {
            validator.validate(item).await?;
        }

        let object_type = (self.translator)(&item.spec.object_type);
        if let Some(validators) = self.typed.get_mut(&object_type) {
            for validator in validators.iter_mut() {
                validator.validate(item).await?;
            }
        }
        Ok(())
    }

    /// Release validator resources; failures are only logged
    pub async fn destroy(&mut self) {
        for validator in self.all_mut() {
            if let Err(e) = validator.destroy().await {
                warn!("Validator {} cleanup failed: {}", validator.designation(), e);
            }
        }
    }

    /// Validate every bundle in dependency order, marking each as validated
    pub async fn validate_change_log(&mut self, changes: &mut ChangeLog, order: &[i64]) -> AppResult<()> {
        let result = self.run(changes, order).await;
        self.destroy().await;
        result
    }

    async fn run(&mut self, changes: &mut ChangeLog, order: &[i64]) -> AppResult<()> {
        self.initialize(changes).await?;

        for bundle in changes.bundles.iter_mut() {
            info!(
                "Validating bundle {} ({} items)",
                bundle.reference.hash,
                bundle.items.len()
            );
            for &object_type in order {
                for position in bundle.indices_of_type(object_type) {
                    self.validate(&mut bundle.items[position]).await?;
                }
            }
            bundle.validated = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::change_log::fixtures::{spec_yaml, translate};
    use crate::models::{ChangeAction, ChangeMetadata, ChangeReference, Severity, ValidationStep};
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    type Calls = Arc<Mutex<Vec<String>>>;

    struct Probe {
        name: String,
        calls: Calls,
        fail_on: Option<String>,
        critical_on: Option<String>,
    }

    impl Probe {
        fn boxed(name: &str, calls: &Calls) -> Box<dyn Validator> {
            Box::new(Probe {
                name: name.to_string(),
                calls: calls.clone(),
                fail_on: None,
                critical_on: None,
            })
        }
    }

    #[async_trait]
    impl Validator for Probe {
        fn designation(&self) -> &str {
            &self.name
        }

        async fn init(&mut self, _changes: &ChangeLog) -> AppResult<()> {
            self.calls.lock().unwrap().push(format!("init:{}", self.name));
            Ok(())
        }

        async fn validate(&mut self, item: &mut ChangeItem) -> AppResult<()> {
            let object = item.spec.object.name.clone();
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, object));
            if self.fail_on.as_deref() == Some(object.as_str()) {
                return Err(AppError::Validation(format!("{} broke", object)));
            }
            if self.critical_on.as_deref() == Some(object.as_str()) {
                item.validation
                    .add_step(ValidationStep::failed(&self.name, Severity::Critical, "mismatch"));
            } else {
                item.validation.add_step(ValidationStep::passed(&self.name));
            }
            Ok(())
        }

        async fn destroy(&mut self) -> AppResult<()> {
            self.calls.lock().unwrap().push(format!("destroy:{}", self.name));
            Ok(())
        }
    }

    fn change_log() -> ChangeLog {
        let mut log = ChangeLog::new(translate);
        let bundle = log.add_bundle(ChangeReference::new("c1", "first"));
        for (kind, name) in [("view", "V1"), ("table", "T1"), ("role", "R1"), ("table", "T2")] {
            bundle
                .add_item(
                    spec_yaml(kind, name).as_bytes(),
                    ChangeMetadata::from_path(ChangeAction::Add, &format!("{}.yaml", name), "h"),
                )
                .unwrap();
        }
        log
    }

    #[tokio::test]
    async fn test_items_validated_in_dependency_order() {
        let calls = Calls::default();
        let mut handler = ValidationHandler::new(translate);
        handler.add_global(Probe::boxed("exists", &calls));
        handler.add_for_type(4, Probe::boxed("structure", &calls));

        let mut log = change_log();
        handler.validate_change_log(&mut log, &[8, 4, 5]).await.unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "init:exists",
                "init:structure",
                "exists:R1",
                "exists:T1",
                "structure:T1",
                "exists:T2",
                "structure:T2",
                "exists:V1",
                "destroy:exists",
                "destroy:structure",
            ]
        );
        assert!(log.bundles[0].validated);
        assert!(log.items().all(|i| i.validation.passed_validation()));
    }

    #[tokio::test]
    async fn test_critical_finding_does_not_stop_the_pass() {
        let calls = Calls::default();
        let mut handler = ValidationHandler::new(translate);
        handler.add_global(Box::new(Probe {
            name: "exists".into(),
            calls: calls.clone(),
            fail_on: None,
            critical_on: Some("T1".into()),
        }));

        let mut log = change_log();
        handler.validate_change_log(&mut log, &[8, 4, 5]).await.unwrap();

        let failed: Vec<&str> = log
            .items()
            .filter(|i| !i.validation.passed_validation())
            .map(|i| i.spec.object.name.as_str())
            .collect();
        assert_eq!(failed, vec!["T1"]);
        assert!(log.bundles[0].validated);
    }

    #[tokio::test]
    async fn test_error_halts_and_still_destroys() {
        let calls = Calls::default();
        let mut handler = ValidationHandler::new(translate);
        handler.add_global(Box::new(Probe {
            name: "exists".into(),
            calls: calls.clone(),
            fail_on: Some("T1".into()),
            critical_on: None,
        }));

        let mut log = change_log();
        let result = handler.validate_change_log(&mut log, &[8, 4, 5]).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(!log.bundles[0].validated);
        let calls = calls.lock().unwrap();
        assert!(!calls.contains(&"exists:T2".to_string()));
        assert_eq!(calls.last().map(String::as_str), Some("destroy:exists"));
    }
}

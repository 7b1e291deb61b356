//! Catalog metadata
//!
//! Objects known to exist on the target, keyed by canonical type and
//! lower-cased name. Filled by the exists validator, queried per item.

use crate::models::{CodeBlockSpec, ObjectTypeTranslator};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogObject {
    pub name: String,
    pub database: String,
    pub schema: String,
}

impl CatalogObject {
    pub fn new(name: &str, database: &str, schema: &str) -> Self {
        Self {
            name: name.to_string(),
            database: database.to_string(),
            schema: schema.to_string(),
        }
    }

    fn matches(&self, name: &str, database: &str, schema: &str) -> bool {
        self.name.eq_ignore_ascii_case(name.trim())
            && self.database.eq_ignore_ascii_case(database.trim())
            && self.schema.eq_ignore_ascii_case(schema.trim())
    }
}

#[derive(Debug, Clone)]
pub struct Metadata {
    translator: ObjectTypeTranslator,
    objects: HashMap<(i64, String), Vec<CatalogObject>>,
}

impl Metadata {
    pub fn new(translator: ObjectTypeTranslator) -> Self {
        Self {
            translator,
            objects: HashMap::new(),
        }
    }

    pub fn add(&mut self, object_type: i64, object: CatalogObject) {
        self.objects
            .entry((object_type, object.name.to_lowercase()))
            .or_default()
            .push(object);
    }

    pub fn find(&self, object_type: i64, name: &str, database: &str, schema: &str) -> Option<&CatalogObject> {
        self.objects
            .get(&(object_type, name.trim().to_lowercase()))?
            .iter()
            .find(|o| o.matches(name, database, schema))
    }

    /// Look up the object a document declares
    pub fn find_object_from_spec(&self, spec: &CodeBlockSpec) -> Option<&CatalogObject> {
        let object_type = (self.translator)(&spec.object_type);
        self.find(
            object_type,
            &spec.object.name,
            &spec.object.database,
            &spec.object.schema,
        )
    }

    pub fn len(&self) -> usize {
        self.objects.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::change_log::fixtures::{spec_yaml, translate};

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut metadata = Metadata::new(translate);
        metadata.add(4, CatalogObject::new("ORDERS", "SALES", "CORE"));
        metadata.add(4, CatalogObject::new("ORDERS", "SALES", "STAGING"));

        let found = metadata.find(4, "orders", "sales", "staging").unwrap();
        assert_eq!(found.schema, "STAGING");
        assert!(metadata.find(5, "ORDERS", "SALES", "CORE").is_none());
        assert!(metadata.find(4, "ORDERS", "OTHER", "CORE").is_none());
        assert_eq!(metadata.len(), 2);
    }

    #[test]
    fn test_find_object_from_spec() {
        let mut metadata = Metadata::new(translate);
        metadata.add(4, CatalogObject::new("ORDERS", "SALES", "CORE"));

        let spec: CodeBlockSpec = serde_yaml::from_str(&spec_yaml("Table", "Orders")).unwrap();
        assert!(metadata.find_object_from_spec(&spec).is_some());

        let spec: CodeBlockSpec = serde_yaml::from_str(&spec_yaml("view", "ORDERS")).unwrap();
        assert!(metadata.find_object_from_spec(&spec).is_none());
    }
}

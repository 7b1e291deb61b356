//! Change log, bundles and items

use crate::error::{AppError, AppResult};
use crate::models::apply::ApplyEffectInformation;
use crate::models::spec::CodeBlockSpec;
use crate::models::validation::ValidationInfo;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

/// Translates a declarative `type` string into a canonical type id
pub type ObjectTypeTranslator = fn(&str) -> i64;

/// How a file changed between two commits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    #[default]
    Undetermined,
    Update,
    Add,
}

/// Discovery-time facts about one changed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMetadata {
    pub action: ChangeAction,
    /// Repository path of the file
    pub name: String,
    pub identifier_hash: String,
    /// Blob identity in the source repository
    pub git_hash: String,
}

impl ChangeMetadata {
    /// Metadata for a file found in the repository; fingerprinted by path
    pub fn from_path(action: ChangeAction, path: &str, git_hash: &str) -> Self {
        Self {
            action,
            name: path.to_string(),
            identifier_hash: fingerprint(path.as_bytes()),
            git_hash: git_hash.to_string(),
        }
    }

    /// Metadata for externally supplied bytes; fingerprinted by content
    pub fn manual(name: &str, bytes: &[u8]) -> Self {
        let hash = fingerprint(bytes);
        Self {
            action: ChangeAction::Undetermined,
            name: name.to_string(),
            identifier_hash: hash.clone(),
            git_hash: hash,
        }
    }
}

/// Hex SHA-256 of the given bytes
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Commit (or snapshot) a bundle was built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeReference {
    pub hash: String,
    pub message: String,
}

impl ChangeReference {
    pub fn new(hash: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            message: message.into(),
        }
    }

    /// Reference used for single-file invocations
    pub fn manual() -> Self {
        Self::new(fingerprint(b"manual"), "manual")
    }
}

/// One parsed declarative document and everything learned about it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeItem {
    pub object_type: i64,
    pub spec: CodeBlockSpec,
    pub metadata: ChangeMetadata,
    /// Set by validation when the declared object exists on the target
    pub exists: bool,
    pub validation: ValidationInfo,
    pub apply: ApplyEffectInformation,
    /// Index of the owning bundle within its change log
    pub bundle: usize,
}

impl ChangeItem {
    pub fn new(object_type: i64, spec: CodeBlockSpec, metadata: ChangeMetadata, bundle: usize) -> Self {
        Self {
            object_type,
            spec,
            metadata,
            exists: false,
            validation: ValidationInfo::default(),
            apply: ApplyEffectInformation::default(),
            bundle,
        }
    }
}

/// True when `name` follows the declarative-spec file convention
pub fn is_possible_code_file(name: &str) -> bool {
    let name = name.trim().to_lowercase();
    name.ends_with(".yaml") || name.ends_with(".yml")
}

/// Changes originating from one commit
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogBundle {
    pub index: usize,
    pub reference: ChangeReference,
    pub items: Vec<ChangeItem>,
    #[serde(skip)]
    type_index: HashMap<i64, Vec<usize>>,
    pub validated: bool,
    #[serde(skip)]
    translator: ObjectTypeTranslator,
}

impl ChangeLogBundle {
    fn new(index: usize, reference: ChangeReference, translator: ObjectTypeTranslator) -> Self {
        Self {
            index,
            reference,
            items: Vec::new(),
            type_index: HashMap::new(),
            validated: false,
            translator,
        }
    }

    /// Parse `bytes` and append the result as a new item.
    ///
    /// Returns `Ok(false)` when the file is not a declarative spec (wrong
    /// extension, not a mapping, or no `type`). A document that looks like a
    /// spec but does not deserialize is an error.
    pub fn add_item(&mut self, bytes: &[u8], metadata: ChangeMetadata) -> AppResult<bool> {
        if !is_possible_code_file(&metadata.name) {
            debug!("Skipping {}: not a specification file", metadata.name);
            return Ok(false);
        }

        let document: serde_yaml::Value =
            serde_yaml::from_slice(bytes).map_err(|source| AppError::SpecParse {
                file: metadata.name.clone(),
                source,
            })?;

        let declares_type = document
            .as_mapping()
            .map(|m| m.contains_key("type"))
            .unwrap_or(false);
        if !declares_type {
            debug!("Skipping {}: no object type declared", metadata.name);
            return Ok(false);
        }

        let spec: CodeBlockSpec =
            serde_yaml::from_value(document).map_err(|source| AppError::SpecParse {
                file: metadata.name.clone(),
                source,
            })?;

        if spec.object_type.trim().is_empty() {
            debug!("Skipping {}: empty object type", metadata.name);
            return Ok(false);
        }

        let object_type = (self.translator)(&spec.object_type);
        let position = self.items.len();
        self.items
            .push(ChangeItem::new(object_type, spec, metadata, self.index));
        self.type_index.entry(object_type).or_default().push(position);

        Ok(true)
    }

    /// Positions of the items of the given canonical type, in insertion order
    pub fn indices_of_type(&self, type_id: i64) -> Vec<usize> {
        self.type_index
            .get(&type_id)
            .map(|positions| {
                positions
                    .iter()
                    .copied()
                    .filter(|&p| (self.translator)(&self.items[p].spec.object_type) == type_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Items of the given canonical type, in insertion order
    pub fn changes_of_type(&self, type_id: i64) -> Vec<&ChangeItem> {
        self.indices_of_type(type_id)
            .into_iter()
            .map(|p| &self.items[p])
            .collect()
    }

    pub fn translator(&self) -> ObjectTypeTranslator {
        self.translator
    }
}

/// Root of one run's discovered work
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLog {
    pub bundles: Vec<ChangeLogBundle>,
    #[serde(skip)]
    translator: ObjectTypeTranslator,
}

impl ChangeLog {
    pub fn new(translator: ObjectTypeTranslator) -> Self {
        Self {
            bundles: Vec::new(),
            translator,
        }
    }

    /// Append an empty bundle and return it for population
    pub fn add_bundle(&mut self, reference: ChangeReference) -> &mut ChangeLogBundle {
        let index = self.bundles.len();
        self.bundles
            .push(ChangeLogBundle::new(index, reference, self.translator));
        &mut self.bundles[index]
    }

    pub fn translator(&self) -> ObjectTypeTranslator {
        self.translator
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn total_items(&self) -> usize {
        self.bundles.iter().map(|b| b.items.len()).sum()
    }

    pub fn items(&self) -> impl Iterator<Item = &ChangeItem> {
        self.bundles.iter().flat_map(|b| b.items.iter())
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut ChangeItem> {
        self.bundles.iter_mut().flat_map(|b| b.items.iter_mut())
    }
}

//! Declarative specification documents and variable resolution

use crate::error::{AppError, AppResult};
use crate::secrets::SecretStore;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use std::collections::{BTreeMap, HashMap};

/// Config-map definitions may nest; deeper chains are rejected as cycles.
const MAX_VARIABLE_DEPTH: usize = 8;

/// Parsed declarative unit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodeBlockSpec {
    pub definition_style: String,
    #[serde(rename = "type")]
    pub object_type: String,
    pub object: ObjectSpec,
    pub options: OptionsSpec,
    #[serde(alias = "vars")]
    pub variables: BTreeMap<String, YamlValue>,
    /// Type-specific payload
    pub spec: YamlValue,
}

/// The object a document declares
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectSpec {
    pub name: String,
    pub database: String,
    pub schema: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptionsSpec {
    pub check_exists: bool,
    pub validate: bool,
    pub drop: bool,
}

/// Typed reference to a principal or object (`{type: role, id: LOADER}`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectDesignation {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl ObjectDesignation {
    pub fn is(&self, kind: &str) -> bool {
        self.kind.trim().eq_ignore_ascii_case(kind)
    }

    pub fn is_role(&self) -> bool {
        self.is("role")
    }

    pub fn is_user(&self) -> bool {
        self.is("user")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecMeta {
    pub owner: ObjectDesignation,
}

/// Payload of types without a dedicated renderer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenericSpec {
    pub meta: SpecMeta,
    pub pre: Option<String>,
    pub init: Option<String>,
    pub change: Option<String>,
    pub post: Option<String>,
}

/// Where variable values come from
pub struct VariableSource<'a> {
    pub config_vars: &'a HashMap<String, String>,
    pub secrets: &'a dyn SecretStore,
}

impl CodeBlockSpec {
    /// Deserialize the type-specific payload
    pub fn payload<T: serde::de::DeserializeOwned + Default>(&self) -> AppResult<T> {
        if self.spec.is_null() {
            return Ok(T::default());
        }
        serde_yaml::from_value(self.spec.clone())
            .map_err(|e| AppError::InvalidSpecPayload(format!("{}: {}", self.object.name, e)))
    }

    /// Resolve every declared variable, then add the implicit
    /// `NAME`/`DATABASE`/`SCHEMA` values of the declared object.
    pub fn extract_variable_values(
        &self,
        source: &VariableSource<'_>,
    ) -> AppResult<BTreeMap<String, JsonValue>> {
        let mut values = BTreeMap::new();

        for (name, definition) in &self.variables {
            let value = resolve_variable(name, definition, source, 0)?;
            values.insert(name.clone(), value);
        }

        for (key, value) in [
            ("NAME", &self.object.name),
            ("DATABASE", &self.object.database),
            ("SCHEMA", &self.object.schema),
        ] {
            let value = value.trim();
            if !value.is_empty() {
                values.insert(key.to_string(), JsonValue::String(value.to_string()));
            }
        }

        Ok(values)
    }
}

fn resolve_variable(
    name: &str,
    definition: &YamlValue,
    source: &VariableSource<'_>,
    depth: usize,
) -> AppResult<JsonValue> {
    if depth > MAX_VARIABLE_DEPTH {
        return Err(AppError::VariableUndefined(format!("{} (config map nesting too deep)", name)));
    }

    // Shorthand: a bare scalar or list is a literal value.
    let Some(mapping) = definition.as_mapping() else {
        return to_json(name, definition);
    };

    let kind = mapping
        .get("type")
        .and_then(YamlValue::as_str)
        .unwrap_or("value")
        .trim()
        .to_lowercase();

    match kind.as_str() {
        "value" => match mapping.get("value") {
            Some(value) => to_json(name, value),
            None => Err(AppError::VariableUndefined(name.to_string())),
        },
        "secret" => {
            let key = mapping
                .get("secret")
                .and_then(YamlValue::as_str)
                .ok_or_else(|| AppError::VariableUndefined(name.to_string()))?;
            source
                .secrets
                .get_secret(key)
                .map(JsonValue::String)
                .map_err(|_| AppError::VariableUndefined(name.to_string()))
        }
        "configmap" => {
            let item = mapping
                .get("configItem")
                .and_then(YamlValue::as_str)
                .ok_or_else(|| AppError::VariableUndefined(name.to_string()))?;
            let selector = source
                .config_vars
                .get(item)
                .ok_or_else(|| AppError::VariableUndefined(name.to_string()))?;
            let nested = mapping
                .get("map")
                .and_then(YamlValue::as_mapping)
                .and_then(|map| {
                    map.iter()
                        .find(|(key, _)| scalar_text(key).as_deref() == Some(selector.as_str()))
                        .map(|(_, value)| value)
                })
                .ok_or_else(|| AppError::VariableUndefined(name.to_string()))?;
            resolve_variable(name, nested, source, depth + 1)
        }
        other => Err(AppError::InvalidSpecPayload(format!(
            "variable {} has unknown type {}",
            name, other
        ))),
    }
}

fn scalar_text(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn to_json(name: &str, value: &YamlValue) -> AppResult<JsonValue> {
    serde_json::to_value(value)
        .map_err(|e| AppError::InvalidSpecPayload(format!("variable {}: {}", name, e)))
}

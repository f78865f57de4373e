//! Schema model consumed by the relation graph.
//!
//! Schemas are authored elsewhere; muninn only needs models, their fields,
//! id fields and relation metadata. The JSON form mirrors the lite schema
//! emitted by the schema compiler:
//!
//! ```json
//! {
//!   "models": {
//!     "User": {
//!       "fields": {
//!         "id": { "type": "String", "id": true },
//!         "posts": { "type": "Post", "array": true }
//!       }
//!     },
//!     "Post": {
//!       "fields": {
//!         "id": { "type": "String", "id": true },
//!         "authorId": { "type": "String" },
//!         "author": {
//!           "type": "User",
//!           "relation": { "fields": ["authorId"], "references": ["id"], "onDelete": "Cascade" }
//!         }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! A field is a relation field iff its `type` names a model of the schema.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{MuninnError, Result};

/// Referential action applied to dependents when the referenced row goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferentialAction {
    Cascade,
    Restrict,
    NoAction,
    SetNull,
    SetDefault,
}

/// Owning side of a relation: which local fields reference which fields of
/// the target model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDef {
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ReferentialAction>,
}

/// Default value of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldDefault {
    /// Generated by a function such as `now`, `uuid` or `autoincrement`.
    Call { call: String },
    /// A literal value.
    Value(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub array: bool,
    #[serde(default)]
    pub id: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<FieldDefault>,
    #[serde(default)]
    pub updated_at: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<RelationDef>,
}

impl FieldDef {
    /// Scalar field of the given type (`String`, `Int`, `DateTime`, ...).
    pub fn scalar(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            optional: false,
            array: false,
            id: false,
            default: None,
            updated_at: false,
            relation: None,
        }
    }

    /// Relation field pointing at `target`. Add `.array()` for to-many.
    pub fn relation(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::scalar(name, target)
    }

    pub fn id(mut self) -> Self {
        self.id = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn updated_at(mut self) -> Self {
        self.updated_at = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(FieldDefault::Value(value));
        self
    }

    pub fn default_call(mut self, call: impl Into<String>) -> Self {
        self.default = Some(FieldDefault::Call { call: call.into() });
        self
    }

    /// Owning-side foreign keys: `fields[i]` references `references[i]`.
    pub fn references(mut self, fields: &[&str], references: &[&str]) -> Self {
        let relation = self.relation.get_or_insert_with(RelationDef::default);
        relation.fields = fields.iter().map(|f| f.to_string()).collect();
        relation.references = references.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.relation
            .get_or_insert_with(RelationDef::default)
            .on_delete = Some(action);
        self
    }

    /// Whether the field holds an integer type usable for sequential ids.
    pub fn is_integer(&self) -> bool {
        matches!(self.ty.as_str(), "Int" | "BigInt")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDef>,
    /// Primary key fields. Derived from fields flagged `id` when empty.
    #[serde(default)]
    pub id_fields: Vec<String>,
}

impl ModelDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    /// Id field definitions, in declaration order of `id_fields`.
    pub fn id_field_defs(&self) -> impl Iterator<Item = &FieldDef> {
        self.id_fields.iter().filter_map(|name| self.fields.get(name))
    }
}

/// Immutable schema description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub models: BTreeMap<String, ModelDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a model (builder style). Call [`Schema::finish`] when done.
    pub fn model(mut self, model: ModelDef) -> Self {
        self.models.insert(model.name.clone(), model);
        self
    }

    /// Fill derived data (names, id fields) and validate.
    pub fn finish(mut self) -> Result<Self> {
        self.normalize();
        self.validate()?;
        Ok(self)
    }

    /// Copy model and field names from their map keys and derive id fields
    /// from `id` flags where none are listed.
    pub fn normalize(&mut self) {
        for (model_name, model) in self.models.iter_mut() {
            model.name = model_name.clone();
            for (field_name, field) in model.fields.iter_mut() {
                field.name = field_name.clone();
            }
            if model.id_fields.is_empty() {
                model.id_fields = model
                    .fields
                    .values()
                    .filter(|f| f.id)
                    .map(|f| f.name.clone())
                    .collect();
            }
        }
    }

    /// Whether [`Schema::normalize`] would change nothing.
    pub fn is_normalized(&self) -> bool {
        self.models.iter().all(|(model_name, model)| {
            model.name == *model_name
                && model.fields.iter().all(|(name, field)| field.name == *name)
                && (!model.id_fields.is_empty() || !model.fields.values().any(|f| f.id))
        })
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let schema: Schema = serde_json::from_value(value)?;
        schema.finish()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let schema: Schema = serde_json::from_str(json)?;
        schema.finish()
    }

    /// Load a JSON schema file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Reject dangling id fields and malformed relation metadata.
    pub fn validate(&self) -> Result<()> {
        for (model_name, model) in &self.models {
            for id in &model.id_fields {
                if !model.fields.contains_key(id) {
                    return Err(MuninnError::InvalidSchema(format!(
                        "id field '{id}' of model '{model_name}' does not exist"
                    )));
                }
            }

            for field in model.fields.values() {
                let Some(relation) = &field.relation else {
                    continue;
                };
                if !self.models.contains_key(&field.ty) {
                    return Err(MuninnError::InvalidSchema(format!(
                        "relation '{model_name}.{}' targets unknown model '{}'",
                        field.name, field.ty
                    )));
                }
                if relation.fields.len() != relation.references.len() {
                    return Err(MuninnError::InvalidSchema(format!(
                        "relation '{model_name}.{}' has {} fields but {} references",
                        field.name,
                        relation.fields.len(),
                        relation.references.len()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get_model(&self, name: &str) -> Option<&ModelDef> {
        self.models.get(name)
    }

    /// Look up a model by exact name, then case-insensitively.
    pub fn resolve_model(&self, name: &str) -> Result<&ModelDef> {
        self.models
            .get(name)
            .or_else(|| {
                self.models
                    .values()
                    .find(|m| m.name.eq_ignore_ascii_case(name))
            })
            .ok_or_else(|| MuninnError::UnknownModel(name.to_string()))
    }

    /// Whether `field` of `model` is a relation field.
    pub fn is_relation(&self, field: &FieldDef) -> bool {
        self.models.contains_key(&field.ty)
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}

use std::collections::BTreeMap;

use rusqlite::types::Value;

use crate::error::SeqrError;

/// Storage kind of a model field. Field names double as column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    AutoId,
    Boolean,
    Char { max_length: usize },
    Text,
    ForeignKey { to_table: &'static str },
}

/// A single field as it exists at some point of the migration history.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub null: bool,
    pub unique: bool,
    pub default: Option<Value>,
    pub choices: &'static [(&'static str, &'static str)],
}

impl FieldDef {
    const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            null: false,
            unique: false,
            default: None,
            choices: &[],
        }
    }

    pub const fn auto_id() -> Self {
        Self::new("id", FieldKind::AutoId)
    }

    pub fn boolean(name: &'static str, default: bool) -> Self {
        Self::new(name, FieldKind::Boolean).default(Value::from(default))
    }

    pub const fn char(name: &'static str, max_length: usize) -> Self {
        Self::new(name, FieldKind::Char { max_length })
    }

    pub const fn text(name: &'static str) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub const fn foreign_key(name: &'static str, to_table: &'static str) -> Self {
        Self::new(name, FieldKind::ForeignKey { to_table })
    }

    pub fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn choices(mut self, choices: &'static [(&'static str, &'static str)]) -> Self {
        self.choices = choices;
        self
    }

    pub fn max_length(&self) -> Option<usize> {
        match self.kind {
            FieldKind::Char { max_length } => Some(max_length),
            _ => None,
        }
    }

    pub fn is_auto(&self) -> bool {
        self.kind == FieldKind::AutoId
    }

    /// Resolve the value stored for this field, applying the default when no value
    /// was given and validating choices and length.
    pub fn clean(&self, value: Option<Value>) -> Result<Value, SeqrError> {
        let value = match value {
            Some(value) => value,
            None => match (&self.default, self.null) {
                (Some(default), _) => default.clone(),
                (None, true) => Value::Null,
                (None, false) => {
                    return Err(SeqrError::Error(format!(
                        "Field '{}' requires a value",
                        self.name
                    )))
                }
            },
        };

        match &value {
            Value::Null if !self.null => Err(SeqrError::Error(format!(
                "Field '{}' cannot be null",
                self.name
            ))),
            Value::Text(text) => {
                if let Some(max_length) = self.max_length() {
                    if text.chars().count() > max_length {
                        return Err(SeqrError::ValueTooLong {
                            field: self.name.to_owned(),
                            max_length,
                        });
                    }
                }
                if !self.choices.is_empty() && !self.choices.iter().any(|(code, _)| code == text) {
                    return Err(SeqrError::InvalidChoice {
                        field: self.name.to_owned(),
                        value: text.clone(),
                    });
                }
                Ok(value)
            }
            _ => Ok(value),
        }
    }
}

/// Many-to-many relation stored in a dedicated through table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManyToMany {
    pub name: &'static str,
    pub through: &'static str,
    pub source_column: &'static str,
    pub target_column: &'static str,
    pub target_table: &'static str,
}

/// Frozen definition of a model at a given migration point.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelState {
    pub app_label: &'static str,
    pub name: &'static str,
    pub table: &'static str,
    pub fields: Vec<FieldDef>,
    pub many_to_many: Vec<ManyToMany>,
}

impl ModelState {
    pub fn new(app_label: &'static str, name: &'static str, table: &'static str) -> Self {
        Self {
            app_label,
            name,
            table,
            fields: vec![FieldDef::auto_id()],
            many_to_many: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_many_to_many(mut self, relation: ManyToMany) -> Self {
        self.many_to_many.push(relation);
        self
    }

    pub fn label(&self) -> String {
        format!("{}.{}", self.app_label, self.name)
    }

    pub fn field(&self, name: &str) -> Result<&FieldDef, SeqrError> {
        self.fields.iter().find(|f| f.name == name).ok_or_else(|| {
            SeqrError::Error(format!("{} has no field named '{}'", self.label(), name))
        })
    }

    pub fn relation(&self, name: &str) -> Result<&ManyToMany, SeqrError> {
        self.many_to_many
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| {
                SeqrError::Error(format!("{} has no relation named '{}'", self.label(), name))
            })
    }

    fn add_field(&mut self, field: FieldDef) -> Result<(), SeqrError> {
        if self.fields.iter().any(|f| f.name == field.name) {
            return Err(SeqrError::Error(format!(
                "{} already has a field named '{}'",
                self.label(),
                field.name
            )));
        }
        self.fields.push(field);
        Ok(())
    }

    fn remove_field(&mut self, name: &str) -> Result<FieldDef, SeqrError> {
        let pos = self
            .fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| {
                SeqrError::Error(format!("{} has no field named '{}'", self.label(), name))
            })?;
        Ok(self.fields.remove(pos))
    }

    fn alter_field(&mut self, field: FieldDef) -> Result<(), SeqrError> {
        let label = self.label();
        let existing = self
            .fields
            .iter_mut()
            .find(|f| f.name == field.name)
            .ok_or_else(|| {
                SeqrError::Error(format!("{} has no field named '{}'", label, field.name))
            })?;
        *existing = field;
        Ok(())
    }
}

/// Registry of historical models keyed by (app label, lowercased model name).
///
/// Each migration operation is handed the state as it was at that point of the
/// history rather than the live model definitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectState {
    models: BTreeMap<(String, String), ModelState>,
}

impl ProjectState {
    fn key(app_label: &str, model: &str) -> (String, String) {
        (app_label.to_owned(), model.to_ascii_lowercase())
    }

    pub fn get_model(&self, app_label: &str, model: &str) -> Result<&ModelState, SeqrError> {
        self.models
            .get(&Self::key(app_label, model))
            .ok_or_else(|| SeqrError::LookupError {
                app: app_label.to_owned(),
                model: model.to_owned(),
            })
    }

    fn model_mut(&mut self, app_label: &str, model: &str) -> Result<&mut ModelState, SeqrError> {
        self.models
            .get_mut(&Self::key(app_label, model))
            .ok_or_else(|| SeqrError::LookupError {
                app: app_label.to_owned(),
                model: model.to_owned(),
            })
    }

    pub fn add_model(&mut self, model: ModelState) -> Result<(), SeqrError> {
        let key = Self::key(model.app_label, model.name);
        if self.models.contains_key(&key) {
            return Err(SeqrError::Error(format!(
                "Model {} is already defined",
                model.label()
            )));
        }
        self.models.insert(key, model);
        Ok(())
    }

    pub fn add_field(&mut self, app_label: &str, model: &str, field: FieldDef) -> Result<(), SeqrError> {
        self.model_mut(app_label, model)?.add_field(field)
    }

    pub fn remove_field(&mut self, app_label: &str, model: &str, name: &str) -> Result<FieldDef, SeqrError> {
        self.model_mut(app_label, model)?.remove_field(name)
    }

    pub fn alter_field(&mut self, app_label: &str, model: &str, field: FieldDef) -> Result<(), SeqrError> {
        self.model_mut(app_label, model)?.alter_field(field)
    }
}

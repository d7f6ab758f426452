use log::debug;
use rusqlite::types::Value;
use rusqlite::Connection;

use super::query::{QuerySet, RelatedSet};
use super::state::{FieldDef, FieldKind, ManyToMany, ModelState};
use crate::error::SeqrError;

/// Translates model-level schema changes into SQLite DDL on the connection that
/// the running migration owns.
///
/// Choice lists are enforced with `BEFORE INSERT` / `BEFORE UPDATE` triggers so
/// that future writes are constrained while rows already on disk are left alone.
pub struct SchemaEditor<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SchemaEditor<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    /// Query set over all rows of `model`.
    pub fn objects<'a>(&self, model: &'a ModelState) -> QuerySet<'a>
    where
        'conn: 'a,
    {
        QuerySet::new(self.conn, model)
    }

    /// Handle on the `relation` many-to-many set of the row `owner_id`.
    pub fn related<'a>(
        &self,
        model: &'a ModelState,
        relation: &str,
        owner_id: i64,
    ) -> Result<RelatedSet<'a>, SeqrError>
    where
        'conn: 'a,
    {
        Ok(RelatedSet::new(self.conn, model.relation(relation)?, owner_id))
    }

    fn execute(&self, sql: &str) -> Result<(), SeqrError> {
        debug!("schema: {}", sql);
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn create_model(&self, model: &ModelState) -> Result<(), SeqrError> {
        let columns: Vec<String> = model.fields.iter().map(column_definition).collect();
        self.execute(&format!(
            "CREATE TABLE {} (\n    {}\n);",
            quote_ident(model.table),
            columns.join(",\n    ")
        ))?;

        for relation in &model.many_to_many {
            self.create_through_table(model, relation)?;
        }

        for field in &model.fields {
            self.install_choice_triggers(model, field)?;
        }
        Ok(())
    }

    pub fn delete_model(&self, model: &ModelState) -> Result<(), SeqrError> {
        for relation in &model.many_to_many {
            self.execute(&format!("DROP TABLE {};", quote_ident(relation.through)))?;
        }
        // Triggers go away with their table
        self.execute(&format!("DROP TABLE {};", quote_ident(model.table)))
    }

    pub fn add_field(&self, model: &ModelState, field: &FieldDef) -> Result<(), SeqrError> {
        if field.unique || field.is_auto() {
            return Err(SeqrError::Error(format!(
                "Cannot add unique column '{}' to existing table {}",
                field.name, model.table
            )));
        }
        if !field.null && field.default.is_none() {
            return Err(SeqrError::Error(format!(
                "Non-nullable column '{}' needs a default to be added to {}",
                field.name, model.table
            )));
        }
        self.execute(&format!(
            "ALTER TABLE {} ADD COLUMN {};",
            quote_ident(model.table),
            column_definition(field)
        ))?;
        self.install_choice_triggers(model, field)
    }

    pub fn remove_field(&self, model: &ModelState, field: &FieldDef) -> Result<(), SeqrError> {
        self.drop_choice_triggers(model, field)?;
        self.execute(&format!(
            "ALTER TABLE {} DROP COLUMN {};",
            quote_ident(model.table),
            quote_ident(field.name)
        ))
    }

    /// Redefine a field in place. Only changes that SQLite can express without a
    /// table rebuild are supported: choices, max length, nullability of the model
    /// layer and the model-level default.
    pub fn alter_field(
        &self,
        model: &ModelState,
        old: &FieldDef,
        new: &FieldDef,
    ) -> Result<(), SeqrError> {
        if old.name != new.name {
            return Err(SeqrError::Error(format!(
                "Renaming {}.{} is not supported by alter_field",
                model.table, old.name
            )));
        }
        let storage_compatible = matches!(
            (old.kind, new.kind),
            (FieldKind::Char { .. }, FieldKind::Char { .. })
        ) || old.kind == new.kind;
        if !storage_compatible {
            return Err(SeqrError::Error(format!(
                "Changing the storage kind of {}.{} is not supported",
                model.table, old.name
            )));
        }

        self.drop_choice_triggers(model, old)?;
        self.install_choice_triggers(model, new)
    }

    fn create_through_table(&self, model: &ModelState, relation: &ManyToMany) -> Result<(), SeqrError> {
        self.execute(&format!(
            "CREATE TABLE {through} (
    \"id\" INTEGER PRIMARY KEY AUTOINCREMENT,
    {source} INTEGER NOT NULL REFERENCES {owner}(\"id\") ON DELETE CASCADE,
    {target} INTEGER NOT NULL REFERENCES {target_table}(\"id\") ON DELETE CASCADE,
    UNIQUE ({source}, {target})
);",
            through = quote_ident(relation.through),
            source = quote_ident(relation.source_column),
            owner = quote_ident(model.table),
            target = quote_ident(relation.target_column),
            target_table = quote_ident(relation.target_table),
        ))
    }

    fn install_choice_triggers(&self, model: &ModelState, field: &FieldDef) -> Result<(), SeqrError> {
        if field.choices.is_empty() {
            return Ok(());
        }

        let column = quote_ident(field.name);
        let allowed: Vec<String> = field
            .choices
            .iter()
            .map(|(code, _)| quote_literal(code))
            .collect();
        let mut violation = format!("NEW.{} NOT IN ({})", column, allowed.join(", "));
        if let Some(max_length) = field.max_length() {
            violation = format!("{} OR length(NEW.{}) > {}", violation, column, max_length);
        }
        let message = quote_literal(&format!(
            "invalid value for {}.{}",
            model.table, field.name
        ));

        let (insert_trigger, update_trigger) = trigger_names(model, field);
        self.execute(&format!(
            "CREATE TRIGGER {name} BEFORE INSERT ON {table}
WHEN NEW.{column} IS NOT NULL AND ({violation})
BEGIN SELECT RAISE(ABORT, {message}); END;",
            name = quote_ident(&insert_trigger),
            table = quote_ident(model.table),
            column = column,
            violation = violation,
            message = message,
        ))?;
        self.execute(&format!(
            "CREATE TRIGGER {name} BEFORE UPDATE OF {column} ON {table}
WHEN NEW.{column} IS NOT NULL AND ({violation})
BEGIN SELECT RAISE(ABORT, {message}); END;",
            name = quote_ident(&update_trigger),
            table = quote_ident(model.table),
            column = column,
            violation = violation,
            message = message,
        ))
    }

    fn drop_choice_triggers(&self, model: &ModelState, field: &FieldDef) -> Result<(), SeqrError> {
        let (insert_trigger, update_trigger) = trigger_names(model, field);
        self.execute(&format!(
            "DROP TRIGGER IF EXISTS {};\nDROP TRIGGER IF EXISTS {};",
            quote_ident(&insert_trigger),
            quote_ident(&update_trigger)
        ))
    }
}

fn trigger_names(model: &ModelState, field: &FieldDef) -> (String, String) {
    let base = format!("{}_{}_choices", model.table, field.name);
    (format!("{}_insert", base), format!("{}_update", base))
}

pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn default_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_owned(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => quote_literal(s),
        Value::Blob(b) => format!(
            "X'{}'",
            b.iter().map(|byte| format!("{:02X}", byte)).collect::<String>()
        ),
    }
}

fn column_definition(field: &FieldDef) -> String {
    let name = quote_ident(field.name);
    let mut def = match field.kind {
        FieldKind::AutoId => return format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", name),
        FieldKind::Boolean => format!("{} BOOLEAN", name),
        FieldKind::Char { max_length } => format!("{} VARCHAR({})", name, max_length),
        FieldKind::Text => format!("{} TEXT", name),
        FieldKind::ForeignKey { .. } => format!("{} INTEGER", name),
    };

    if !field.null {
        def.push_str(" NOT NULL");
    }
    if field.unique {
        def.push_str(" UNIQUE");
    }
    if let Some(default) = &field.default {
        def.push_str(" DEFAULT ");
        def.push_str(&default_literal(default));
    }
    if let FieldKind::ForeignKey { to_table } = field.kind {
        def.push_str(&format!(" REFERENCES {}(\"id\")", quote_ident(to_table)));
    }
    def
}

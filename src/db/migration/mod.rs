pub mod executor;
pub mod progress;

use std::fmt;

pub use executor::{MigrationExecutor, MigrationStatus, Target};
pub use progress::MigrationProgress;

use super::state::{FieldDef, ModelState, ProjectState};
use super::SchemaEditor;
use crate::error::SeqrError;

/// Data transform run inside a migration, given the historical models and the
/// editor bound to the migration's transaction.
pub type RunCodeFn = Box<dyn Fn(&ProjectState, &SchemaEditor<'_>) -> Result<(), SeqrError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MigrationKey {
    pub app_label: &'static str,
    pub name: &'static str,
}

impl MigrationKey {
    pub const fn new(app_label: &'static str, name: &'static str) -> Self {
        Self { app_label, name }
    }
}

impl fmt::Display for MigrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.name)
    }
}

/// One step of a migration.
///
/// Schema operations evolve the historical `ProjectState` and apply the
/// matching DDL; `RunCode` transforms data against the state at its position.
pub enum Operation {
    CreateModel(ModelState),
    AddField {
        app_label: &'static str,
        model: &'static str,
        field: FieldDef,
    },
    RemoveField {
        app_label: &'static str,
        model: &'static str,
        name: &'static str,
    },
    AlterField {
        app_label: &'static str,
        model: &'static str,
        field: FieldDef,
    },
    RunCode {
        description: &'static str,
        forward: RunCodeFn,
        reverse: Option<RunCodeFn>,
    },
}

impl Operation {
    pub fn run_code<F, R>(description: &'static str, forward: F, reverse: R) -> Self
    where
        F: Fn(&ProjectState, &SchemaEditor<'_>) -> Result<(), SeqrError> + 'static,
        R: Fn(&ProjectState, &SchemaEditor<'_>) -> Result<(), SeqrError> + 'static,
    {
        Operation::RunCode {
            description,
            forward: Box::new(forward),
            reverse: Some(Box::new(reverse)),
        }
    }

    #[cfg(test)]
    pub fn run_code_irreversible<F>(description: &'static str, forward: F) -> Self
    where
        F: Fn(&ProjectState, &SchemaEditor<'_>) -> Result<(), SeqrError> + 'static,
    {
        Operation::RunCode {
            description,
            forward: Box::new(forward),
            reverse: None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Operation::CreateModel(model) => format!("Create model {}", model.name),
            Operation::AddField { model, field, .. } => {
                format!("Add field {} to {}", field.name, model)
            }
            Operation::RemoveField { model, name, .. } => {
                format!("Remove field {} from {}", name, model)
            }
            Operation::AlterField { model, field, .. } => {
                format!("Alter field {} on {}", field.name, model)
            }
            Operation::RunCode { description, .. } => format!("Run code: {}", description),
        }
    }

    pub fn is_reversible(&self) -> bool {
        match self {
            Operation::RunCode { reverse, .. } => reverse.is_some(),
            _ => true,
        }
    }

    pub fn state_forwards(&self, state: &mut ProjectState) -> Result<(), SeqrError> {
        match self {
            Operation::CreateModel(model) => state.add_model(model.clone()),
            Operation::AddField {
                app_label,
                model,
                field,
            } => state.add_field(app_label, model, field.clone()),
            Operation::RemoveField {
                app_label,
                model,
                name,
            } => state.remove_field(app_label, model, name).map(|_| ()),
            Operation::AlterField {
                app_label,
                model,
                field,
            } => state.alter_field(app_label, model, field.clone()),
            Operation::RunCode { .. } => Ok(()),
        }
    }

    /// Apply this operation. `before` is the state preceding it, `after` the state
    /// produced by `state_forwards`.
    pub fn database_forwards(
        &self,
        editor: &SchemaEditor<'_>,
        before: &ProjectState,
        after: &ProjectState,
    ) -> Result<(), SeqrError> {
        match self {
            Operation::CreateModel(model) => {
                editor.create_model(after.get_model(model.app_label, model.name)?)
            }
            Operation::AddField {
                app_label,
                model,
                field,
            } => {
                let to_model = after.get_model(app_label, model)?;
                editor.add_field(to_model, to_model.field(field.name)?)
            }
            Operation::RemoveField {
                app_label,
                model,
                name,
            } => {
                let from_model = before.get_model(app_label, model)?;
                editor.remove_field(from_model, from_model.field(name)?)
            }
            Operation::AlterField {
                app_label,
                model,
                field,
            } => {
                let from_field = before.get_model(app_label, model)?.field(field.name)?;
                let to_model = after.get_model(app_label, model)?;
                editor.alter_field(to_model, from_field, to_model.field(field.name)?)
            }
            Operation::RunCode { forward, .. } => forward(before, editor),
        }
    }

    /// Undo this operation. Takes the same `before`/`after` pair as
    /// `database_forwards`.
    pub fn database_backwards(
        &self,
        editor: &SchemaEditor<'_>,
        before: &ProjectState,
        after: &ProjectState,
    ) -> Result<(), SeqrError> {
        match self {
            Operation::CreateModel(model) => {
                editor.delete_model(after.get_model(model.app_label, model.name)?)
            }
            Operation::AddField {
                app_label,
                model,
                field,
            } => {
                let to_model = after.get_model(app_label, model)?;
                editor.remove_field(to_model, to_model.field(field.name)?)
            }
            Operation::RemoveField {
                app_label,
                model,
                name,
            } => {
                let from_model = before.get_model(app_label, model)?;
                editor.add_field(from_model, from_model.field(name)?)
            }
            Operation::AlterField {
                app_label,
                model,
                field,
            } => {
                let from_model = before.get_model(app_label, model)?;
                let to_field = after.get_model(app_label, model)?.field(field.name)?;
                editor.alter_field(from_model, to_field, from_model.field(field.name)?)
            }
            Operation::RunCode { reverse, .. } => match reverse {
                Some(reverse) => reverse(before, editor),
                None => Err(SeqrError::Error(format!(
                    "{} has no reverse code",
                    self.describe()
                ))),
            },
        }
    }
}

/// A named, ordered unit of schema and data change.
pub struct Migration {
    pub key: MigrationKey,
    pub dependencies: Vec<MigrationKey>,
    pub operations: Vec<Operation>,
}

impl Migration {
    pub fn is_reversible(&self) -> bool {
        self.operations.iter().all(Operation::is_reversible)
    }

    /// Fold this migration's operations into `state`.
    pub fn apply_state(&self, state: &mut ProjectState) -> Result<(), SeqrError> {
        for op in &self.operations {
            op.state_forwards(state)?;
        }
        Ok(())
    }
}

use rusqlite::Error as RusqliteError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SeqrError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error), // Converts io::Error into SeqrError automatically

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError), // Converts rusqlite::Error automatically

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors

    #[error("{model} matching query does not exist ({lookup})")]
    DoesNotExist { model: String, lookup: String },

    #[error("Query for {model} returned more than one row ({lookup})")]
    MultipleObjectsReturned { model: String, lookup: String },

    #[error("No installed model '{app}.{model}' at this point in the migration history")]
    LookupError { app: String, model: String },

    #[error("Value '{value}' is not a valid choice for {field}")]
    InvalidChoice { field: String, value: String },

    #[error("Value for {field} exceeds the maximum length of {max_length}")]
    ValueTooLong { field: String, max_length: usize },

    #[error("Migration {migration} cannot be reversed")]
    Irreversible { migration: String },

    #[error("Unknown migration: {0}")]
    UnknownMigration(String),

    #[error("Migration dependency error: {0}")]
    DependencyError(String),
}

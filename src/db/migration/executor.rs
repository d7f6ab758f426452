use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use log::{debug, info, Level};
use logging_timer::timer;
use rusqlite::{params, Connection};
use serde::Serialize;

use super::{Migration, MigrationKey, MigrationProgress};
use crate::db::state::ProjectState;
use crate::db::{migration_info, Database, SchemaEditor};
use crate::error::SeqrError;

/// Where `migrate` should leave the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Apply everything not yet applied.
    Latest,
    /// Unapply everything.
    Zero,
    /// Migrate forwards or backwards until exactly this migration is the last applied.
    Named(String),
}

impl Target {
    pub fn parse(target: Option<&str>) -> Self {
        match target {
            None => Target::Latest,
            Some("zero") => Target::Zero,
            Some(name) => Target::Named(name.to_owned()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forwards,
    Backwards,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub applied: Vec<String>,
    pub unapplied: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub app: String,
    pub name: String,
    pub applied: bool,
    pub applied_at: Option<String>,
}

/// Applies and unapplies registered migrations, one transaction per migration.
///
/// Migrations run in registration order. The executor does not reorder them;
/// it only checks that the order agrees with their declared dependencies.
pub struct MigrationExecutor<'db> {
    db: &'db Database,
    migrations: Vec<Migration>,
}

impl<'db> MigrationExecutor<'db> {
    pub fn new(db: &'db Database, migrations: Vec<Migration>) -> Result<Self, SeqrError> {
        Self::validate_registry(&migrations)?;
        Ok(Self { db, migrations })
    }

    fn validate_registry(migrations: &[Migration]) -> Result<(), SeqrError> {
        let mut seen = BTreeSet::new();
        for migration in migrations {
            for dependency in &migration.dependencies {
                if !seen.contains(dependency) {
                    let registered = migrations.iter().any(|m| m.key == *dependency);
                    return Err(SeqrError::DependencyError(if registered {
                        format!(
                            "{} depends on {}, which is registered after it",
                            migration.key, dependency
                        )
                    } else {
                        format!(
                            "{} depends on unknown migration {}",
                            migration.key, dependency
                        )
                    }));
                }
            }
            if !seen.insert(migration.key) {
                return Err(SeqrError::DependencyError(format!(
                    "{} is registered twice",
                    migration.key
                )));
            }
        }
        Ok(())
    }

    fn applied_at(&self) -> Result<BTreeMap<(String, String), String>, SeqrError> {
        let mut stmt = self
            .db
            .conn()
            .prepare("SELECT app, name, applied_at FROM seqr_migrations")?;
        let rows: BTreeMap<(String, String), String> = stmt
            .query_map([], |row| Ok(((row.get(0)?, row.get(1)?), row.get(2)?)))?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    fn applied_keys(&self) -> Result<BTreeSet<MigrationKey>, SeqrError> {
        let applied = self.applied_at()?;
        Ok(self
            .migrations
            .iter()
            .filter(|m| {
                applied.contains_key(&(m.key.app_label.to_owned(), m.key.name.to_owned()))
            })
            .map(|m| m.key)
            .collect())
    }

    pub fn status(&self) -> Result<Vec<MigrationStatus>, SeqrError> {
        let applied = self.applied_at()?;
        Ok(self
            .migrations
            .iter()
            .map(|m| {
                let applied_at = applied
                    .get(&(m.key.app_label.to_owned(), m.key.name.to_owned()))
                    .cloned();
                MigrationStatus {
                    app: m.key.app_label.to_owned(),
                    name: m.key.name.to_owned(),
                    applied: applied_at.is_some(),
                    applied_at,
                }
            })
            .collect())
    }

    /// Resolve a migration name or unique name prefix to its registry index.
    pub fn resolve(&self, name: &str) -> Result<usize, SeqrError> {
        if let Some(idx) = self.migrations.iter().position(|m| m.key.name == name) {
            return Ok(idx);
        }
        let matches: Vec<usize> = self
            .migrations
            .iter()
            .enumerate()
            .filter(|(_, m)| m.key.name.starts_with(name))
            .map(|(idx, _)| idx)
            .collect();
        match matches.as_slice() {
            [idx] => Ok(*idx),
            [] => Err(SeqrError::UnknownMigration(name.to_owned())),
            _ => Err(SeqrError::UnknownMigration(format!(
                "'{}' matches more than one migration",
                name
            ))),
        }
    }

    fn plan(&self, target: &Target) -> Result<Vec<(usize, Direction)>, SeqrError> {
        let applied = self.applied_keys()?;
        let is_applied = |idx: usize| applied.contains(&self.migrations[idx].key);
        let count = self.migrations.len();

        let forwards_through = |last: usize| -> Vec<(usize, Direction)> {
            (0..=last)
                .filter(|idx| !is_applied(*idx))
                .map(|idx| (idx, Direction::Forwards))
                .collect()
        };
        let backwards_after = |first: usize| -> Vec<(usize, Direction)> {
            (first..count)
                .rev()
                .filter(|idx| is_applied(*idx))
                .map(|idx| (idx, Direction::Backwards))
                .collect()
        };

        Ok(match target {
            Target::Latest if count == 0 => Vec::new(),
            Target::Latest => forwards_through(count - 1),
            Target::Zero => backwards_after(0),
            Target::Named(name) => {
                let idx = self.resolve(name)?;
                if is_applied(idx) {
                    backwards_after(idx + 1)
                } else {
                    forwards_through(idx)
                }
            }
        })
    }

    /// Historical state right before the migration at `idx`.
    fn state_before(&self, idx: usize) -> Result<ProjectState, SeqrError> {
        let mut state = ProjectState::default();
        for migration in &self.migrations[..idx] {
            migration.apply_state(&mut state)?;
        }
        Ok(state)
    }

    /// Bring the database to `target`.
    ///
    /// With `fake`, only the ledger is updated; no operation runs.
    pub fn migrate(&self, target: &Target, fake: bool) -> Result<MigrationReport, SeqrError> {
        let plan = self.plan(target)?;
        let mut report = MigrationReport::default();

        if plan.is_empty() {
            migration_info("No migrations to apply.");
            MigrationProgress::send_complete();
            return Ok(report);
        }

        for (idx, direction) in plan {
            let key = self.migrations[idx].key;
            let result = match direction {
                Direction::Forwards => self.apply(idx, fake),
                Direction::Backwards => self.unapply(idx, fake),
            };
            if let Err(err) = result {
                MigrationProgress::send_failed(&format!("{}: {}", key, err));
                return Err(err);
            }
            match direction {
                Direction::Forwards => report.applied.push(key.to_string()),
                Direction::Backwards => report.unapplied.push(key.to_string()),
            }
        }

        MigrationProgress::send_complete();
        Ok(report)
    }

    fn apply(&self, idx: usize, fake: bool) -> Result<(), SeqrError> {
        let migration = &self.migrations[idx];
        let _tmr = timer!(Level::Trace; "MigrationExecutor::apply", "{}", migration.key);

        let applied = self.applied_keys()?;
        if let Some(missing) = migration
            .dependencies
            .iter()
            .find(|dep| !applied.contains(dep))
        {
            return Err(SeqrError::DependencyError(format!(
                "{} requires {} to be applied first",
                migration.key, missing
            )));
        }

        migration_info(&format!(
            "Applying {}{}",
            migration.key,
            if fake { " (fake)" } else { "" }
        ));
        let mut state = self.state_before(idx)?;

        Database::immediate_transaction(self.db.conn(), |conn| {
            if !fake {
                let editor = SchemaEditor::new(conn);
                for op in &migration.operations {
                    let before = state.clone();
                    op.state_forwards(&mut state)?;
                    debug!("{}: {}", migration.key, op.describe());
                    op.database_forwards(&editor, &before, &state)?;
                }
            }
            record_applied(conn, migration.key)
        })?;

        info!("Applied {}", migration.key);
        Ok(())
    }

    fn unapply(&self, idx: usize, fake: bool) -> Result<(), SeqrError> {
        let migration = &self.migrations[idx];
        let _tmr = timer!(Level::Trace; "MigrationExecutor::unapply", "{}", migration.key);

        if !fake && !migration.is_reversible() {
            return Err(SeqrError::Irreversible {
                migration: migration.key.to_string(),
            });
        }

        let applied = self.applied_keys()?;
        if let Some(dependant) = self
            .migrations
            .iter()
            .find(|m| applied.contains(&m.key) && m.dependencies.contains(&migration.key))
        {
            return Err(SeqrError::DependencyError(format!(
                "{} is still applied and depends on {}",
                dependant.key, migration.key
            )));
        }

        migration_info(&format!(
            "Unapplying {}{}",
            migration.key,
            if fake { " (fake)" } else { "" }
        ));

        // states[i] is the state right before operation i
        let mut states = vec![self.state_before(idx)?];
        for op in &migration.operations {
            let mut next = states[states.len() - 1].clone();
            op.state_forwards(&mut next)?;
            states.push(next);
        }

        Database::immediate_transaction(self.db.conn(), |conn| {
            if !fake {
                let editor = SchemaEditor::new(conn);
                for (i, op) in migration.operations.iter().enumerate().rev() {
                    debug!("{}: reverse {}", migration.key, op.describe());
                    op.database_backwards(&editor, &states[i], &states[i + 1])?;
                }
            }
            erase_applied(conn, migration.key)
        })?;

        info!("Unapplied {}", migration.key);
        Ok(())
    }
}

fn record_applied(conn: &Connection, key: MigrationKey) -> Result<(), SeqrError> {
    conn.execute(
        "INSERT INTO seqr_migrations (app, name, applied_at) VALUES (?, ?, ?)",
        params![key.app_label, key.name, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn erase_applied(conn: &Connection, key: MigrationKey) -> Result<(), SeqrError> {
    conn.execute(
        "DELETE FROM seqr_migrations WHERE app = ? AND name = ?",
        params![key.app_label, key.name],
    )?;
    Ok(())
}

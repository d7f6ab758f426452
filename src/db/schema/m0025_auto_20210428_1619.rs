use rusqlite::types::Value;

use crate::db::migration::{Migration, MigrationKey, Operation};
use crate::db::state::FieldDef;

use super::m0024_varianttag_metadata as m0024;

pub const KEY: MigrationKey = MigrationKey::new("seqr", "0025_auto_20210428_1619");

pub const ANALYSIS_STATUS_MAX_LENGTH: usize = 10;
pub const ANALYSIS_STATUS_DEFAULT: &str = "Q";

/// Allowed `Family.analysis_status` codes, each paired with its display category.
pub const ANALYSIS_STATUS_CHOICES: &[(&str, &str)] = &[
    ("S", "S"),
    ("S_kgfp", "S"),
    ("S_kgdp", "S"),
    ("S_ng", "S"),
    ("ES", "E"),
    ("Sc_kgfp", "S"),
    ("Sc_kgdp", "S"),
    ("Sc_ng", "S"),
    ("Rcpc", "R"),
    ("Rncc", "R"),
    ("C", "C"),
    ("I", "A"),
    ("Q", "W"),
];

/// Redefine the allowed analysis statuses.
///
/// Only future writes are constrained. Rows already holding a code outside the
/// list are neither checked nor rewritten.
pub fn migration() -> Migration {
    Migration {
        key: KEY,
        dependencies: vec![m0024::KEY],
        operations: vec![Operation::AlterField {
            app_label: "seqr",
            model: "Family",
            field: FieldDef::char("analysis_status", ANALYSIS_STATUS_MAX_LENGTH)
                .choices(ANALYSIS_STATUS_CHOICES)
                .default(Value::Text(ANALYSIS_STATUS_DEFAULT.to_owned())),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis_status::AnalysisStatus;
    use strum::IntoEnumIterator;
    use crate::db::migration::{MigrationExecutor, Target};
    use crate::db::query::{text, QuerySet};
    use crate::db::schema::{all_migrations, m0019_auto_20201221_1718 as m0019};
    use crate::db::state::ProjectState;
    use crate::db::Database;
    use crate::error::SeqrError;
    use pretty_assertions::assert_eq;
    use rusqlite::Connection;

    fn executor(db: &Database) -> MigrationExecutor<'_> {
        MigrationExecutor::new(db, all_migrations(&Default::default())).unwrap()
    }

    fn seed_project(conn: &Connection) -> i64 {
        conn.execute(
            "INSERT INTO seqr_project (guid, name) VALUES ('R0001_p1', 'P1')",
            [],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    fn insert_family(conn: &Connection, project_id: i64, guid: &str, status: &str) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO seqr_family (guid, project_id, family_id, analysis_status) VALUES (?, ?, ?, ?)",
            rusqlite::params![guid, project_id, guid, status],
        )
    }

    fn family_state() -> ProjectState {
        let mut state = ProjectState::default();
        for migration in all_migrations(&Default::default()) {
            migration.apply_state(&mut state).unwrap();
        }
        state
    }

    #[test]
    fn test_choices_match_analysis_status_codes() {
        let expected: Vec<(&str, &str)> = AnalysisStatus::iter()
            .map(|status| (status.code(), status.category()))
            .collect();
        assert_eq!(ANALYSIS_STATUS_CHOICES.to_vec(), expected);
        assert_eq!(ANALYSIS_STATUS_CHOICES.len(), 13);
        assert!(ANALYSIS_STATUS_CHOICES
            .iter()
            .all(|(code, _)| code.len() <= ANALYSIS_STATUS_MAX_LENGTH));
    }

    #[test]
    fn test_baseline_lacks_external_solve() {
        assert_eq!(m0019::ANALYSIS_STATUS_CHOICES.len(), 12);
        assert!(!m0019::ANALYSIS_STATUS_CHOICES.iter().any(|(code, _)| *code == "ES"));
    }

    #[test]
    fn test_rcpc_maps_to_reviewed_category() {
        let state = family_state();
        let field = state
            .get_model("seqr", "Family")
            .unwrap()
            .field("analysis_status")
            .unwrap();

        assert_eq!(field.clean(Some(text("Rcpc"))).unwrap(), text("Rcpc"));
        let category = field
            .choices
            .iter()
            .find(|(code, _)| *code == "Rcpc")
            .map(|(_, category)| *category);
        assert_eq!(category, Some("R"));
    }

    #[test]
    fn test_unknown_codes_rejected_and_default_is_q() {
        let db = Database::open_in_memory().unwrap();
        executor(&db).migrate(&Target::Latest, false).unwrap();
        let project_id = seed_project(db.conn());

        // Database-level enforcement
        assert!(insert_family(db.conn(), project_id, "F1", "Rcpc").is_ok());
        assert!(insert_family(db.conn(), project_id, "F2", "ES").is_ok());
        assert!(insert_family(db.conn(), project_id, "F3", "X").is_err());
        assert!(insert_family(db.conn(), project_id, "F4", "Solved").is_err());

        // Model-level enforcement and default
        let state = family_state();
        let family = state.get_model("seqr", "Family").unwrap();
        let families = QuerySet::new(db.conn(), family);
        let created = families
            .create(&[
                ("guid", text("F5")),
                ("project_id", Value::Integer(project_id)),
                ("family_id", text("F5")),
            ])
            .unwrap();
        assert_eq!(created.get_str("analysis_status"), Some("Q"));
        assert!(matches!(
            families.create(&[
                ("guid", text("F6")),
                ("project_id", Value::Integer(project_id)),
                ("family_id", text("F6")),
                ("analysis_status", text("Rxyz")),
            ]),
            Err(SeqrError::InvalidChoice { .. })
        ));
    }

    #[test]
    fn test_external_solve_only_accepted_after_remap() {
        let db = Database::open_in_memory().unwrap();
        let executor = executor(&db);
        executor.migrate(&Target::Named(m0024::KEY.name.to_owned()), false).unwrap();
        let project_id = seed_project(db.conn());

        assert!(insert_family(db.conn(), project_id, "F1", "ES").is_err());
        executor.migrate(&Target::Latest, false).unwrap();
        assert!(insert_family(db.conn(), project_id, "F1", "ES").is_ok());
    }

    #[test]
    fn test_rollback_does_not_scan_existing_rows() {
        let db = Database::open_in_memory().unwrap();
        let executor = executor(&db);
        executor.migrate(&Target::Latest, false).unwrap();
        let project_id = seed_project(db.conn());
        insert_family(db.conn(), project_id, "F1", "ES").unwrap();

        executor.migrate(&Target::Named(m0024::KEY.name.to_owned()), false).unwrap();

        let stored: String = db
            .conn()
            .query_row("SELECT analysis_status FROM seqr_family", [], |row| row.get(0))
            .unwrap();
        assert_eq!(stored, "ES");
        assert!(insert_family(db.conn(), project_id, "F2", "ES").is_err());
    }
}

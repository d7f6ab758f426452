use rusqlite::types::Value;

use crate::db::migration::{Migration, MigrationKey, Operation};
use crate::db::state::{FieldDef, ManyToMany, ModelState};

pub const KEY: MigrationKey = MigrationKey::new("seqr", "0019_auto_20201221_1718");

/// Family analysis statuses as they stood before external solves were tracked.
pub const ANALYSIS_STATUS_CHOICES: &[(&str, &str)] = &[
    ("S", "S"),
    ("S_kgfp", "S"),
    ("S_kgdp", "S"),
    ("S_ng", "S"),
    ("Sc_kgfp", "S"),
    ("Sc_kgdp", "S"),
    ("Sc_ng", "S"),
    ("Rcpc", "R"),
    ("Rncc", "R"),
    ("C", "C"),
    ("I", "A"),
    ("Q", "W"),
];

/// Baseline: the data model as of December 2020.
///
/// Databases created before this tool existed already hold these tables; mark
/// them with `migrate 0019 --fake` instead of applying this migration.
pub fn migration() -> Migration {
    Migration {
        key: KEY,
        dependencies: vec![],
        operations: vec![
            Operation::CreateModel(
                ModelState::new("auth", "User", "auth_user")
                    .with_field(FieldDef::char("username", 150).unique())
                    .with_field(FieldDef::char("email", 254).default(Value::Text(String::new())))
                    .with_field(FieldDef::boolean("is_staff", false))
                    .with_field(FieldDef::boolean("is_active", true)),
            ),
            Operation::CreateModel(
                ModelState::new("auth", "Group", "auth_group")
                    .with_field(FieldDef::char("name", 150).unique())
                    .with_many_to_many(ManyToMany {
                        name: "user_set",
                        through: "auth_user_groups",
                        source_column: "group_id",
                        target_column: "user_id",
                        target_table: "auth_user",
                    }),
            ),
            Operation::CreateModel(
                ModelState::new("seqr", "Project", "seqr_project")
                    .with_field(FieldDef::char("guid", 30).unique())
                    .with_field(FieldDef::char("name", 140))
                    .with_field(FieldDef::boolean("disable_staff_access", false)),
            ),
            Operation::CreateModel(
                ModelState::new("seqr", "ProjectCategory", "seqr_projectcategory")
                    .with_field(FieldDef::char("guid", 30).nullable().unique())
                    .with_field(FieldDef::char("name", 128))
                    .with_many_to_many(ManyToMany {
                        name: "projects",
                        through: "seqr_projectcategory_projects",
                        source_column: "projectcategory_id",
                        target_column: "project_id",
                        target_table: "seqr_project",
                    }),
            ),
            Operation::CreateModel(
                ModelState::new("seqr", "Family", "seqr_family")
                    .with_field(FieldDef::char("guid", 30).unique())
                    .with_field(FieldDef::foreign_key("project_id", "seqr_project"))
                    .with_field(FieldDef::char("family_id", 100))
                    .with_field(
                        FieldDef::char("analysis_status", 10)
                            .choices(ANALYSIS_STATUS_CHOICES)
                            .default(Value::Text("Q".into())),
                    ),
            ),
            Operation::CreateModel(
                ModelState::new("seqr", "VariantTag", "seqr_varianttag")
                    .with_field(FieldDef::char("guid", 30).unique())
                    .with_field(FieldDef::foreign_key("family_id", "seqr_family"))
                    .with_field(FieldDef::char("name", 100)),
            ),
        ],
    }
}

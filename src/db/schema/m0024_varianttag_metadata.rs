use crate::db::migration::{Migration, MigrationKey, Operation};
use crate::db::state::FieldDef;

use super::m0020_remove_project_disable_staff_access as m0020;

pub const KEY: MigrationKey = MigrationKey::new("seqr", "0024_varianttag_metadata");

/// Free-form metadata attached to a variant tag.
pub fn migration() -> Migration {
    Migration {
        key: KEY,
        dependencies: vec![m0020::KEY],
        operations: vec![Operation::AddField {
            app_label: "seqr",
            model: "VariantTag",
            field: FieldDef::text("metadata").nullable(),
        }],
    }
}

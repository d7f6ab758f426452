pub mod m0019_auto_20201221_1718;
pub mod m0020_remove_project_disable_staff_access;
pub mod m0024_varianttag_metadata;
pub mod m0025_auto_20210428_1619;

use crate::config::AccessConfig;
use crate::db::migration::Migration;

/// Every migration this tool knows about, in the order they must be applied.
///
/// Names of the analyst category and user groups come from `access` so the
/// data transforms never read global settings.
pub fn all_migrations(access: &AccessConfig) -> Vec<Migration> {
    vec![
        m0019_auto_20201221_1718::migration(),
        m0020_remove_project_disable_staff_access::migration(access),
        m0024_varianttag_metadata::migration(),
        m0025_auto_20210428_1619::migration(),
    ]
}

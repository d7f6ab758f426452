use log::warn;

use crate::config::AccessConfig;
use crate::db::migration::{Migration, MigrationKey, Operation};
use crate::db::query::text;
use crate::db::state::ProjectState;
use crate::db::{migration_info, SchemaEditor};
use crate::error::SeqrError;

use super::m0019_auto_20201221_1718 as m0019;

pub const KEY: MigrationKey = MigrationKey::new("seqr", "0020_remove_project_disable_staff_access");

/// How the project half of the rollback treats `disable_staff_access` on
/// projects outside the analyst category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaffAccessRestore {
    /// Flag the loaded rows but never write them back. Matches the historical
    /// rollback: after it runs every project reads `disable_staff_access = false`.
    InMemory,
    /// Save the flag so non-analyst projects read `disable_staff_access = true`.
    Persist,
}

impl StaffAccessRestore {
    pub fn from_config(access: &AccessConfig) -> Self {
        if access.persist_staff_access_restore {
            StaffAccessRestore::Persist
        } else {
            StaffAccessRestore::InMemory
        }
    }
}

/// Replace the per-project staff access flag with an analyst project category,
/// and staff users with analyst / project manager groups.
pub fn migration(access: &AccessConfig) -> Migration {
    let category = access.analyst_project_category.clone();
    let category_rev = category.clone();
    let restore = StaffAccessRestore::from_config(access);

    let analyst_group = access.analyst_user_group.clone();
    let pm_group = access.pm_user_group.clone();
    let analyst_group_rev = analyst_group.clone();
    let pm_group_rev = pm_group.clone();

    Migration {
        key: KEY,
        dependencies: vec![m0019::KEY],
        operations: vec![
            Operation::run_code(
                "create analyst project category",
                move |state, editor| create_analyst_project_group(state, editor, &category),
                move |state, editor| {
                    remove_analyst_project_group(state, editor, &category_rev, restore)
                },
            ),
            Operation::run_code(
                "create permission groups",
                move |state, editor| {
                    create_permission_groups(state, editor, &analyst_group, &pm_group)
                },
                move |state, editor| {
                    remove_permission_groups(state, editor, &analyst_group_rev, &pm_group_rev)
                },
            ),
            Operation::RemoveField {
                app_label: "seqr",
                model: "Project",
                name: "disable_staff_access",
            },
        ],
    }
}

pub fn create_analyst_project_group(
    state: &ProjectState,
    editor: &SchemaEditor<'_>,
    category_name: &str,
) -> Result<(), SeqrError> {
    let project_model = state.get_model("seqr", "Project")?;
    let category_model = state.get_model("seqr", "ProjectCategory")?;

    let analyst_projects = editor
        .objects(project_model)
        .filter("disable_staff_access", false)
        .ids()?;
    if analyst_projects.is_empty() {
        return Ok(());
    }

    migration_info(&format!(
        "Creating analyst project category with {} projects",
        analyst_projects.len()
    ));
    let category = editor
        .objects(category_model)
        .create(&[("name", text(category_name))])?;
    editor
        .related(category_model, "projects", category.id())?
        .set(&analyst_projects)
}

pub fn remove_analyst_project_group(
    state: &ProjectState,
    editor: &SchemaEditor<'_>,
    category_name: &str,
    restore: StaffAccessRestore,
) -> Result<(), SeqrError> {
    let project_model = state.get_model("seqr", "Project")?;
    let category_model = state.get_model("seqr", "ProjectCategory")?;

    let category = match editor
        .objects(category_model)
        .filter("name", text(category_name))
        .first()?
    {
        Some(category) => category,
        None => return Ok(()),
    };

    let analyst_projects = editor.related(category_model, "projects", category.id())?;
    let mut non_staff_projects = editor
        .objects(project_model)
        .exclude_related(&analyst_projects)
        .fetch()?;

    if !non_staff_projects.is_empty() {
        migration_info(&format!(
            "Updating staff disabled for {} projects",
            non_staff_projects.len()
        ));
        for project in non_staff_projects.iter_mut() {
            project.set("disable_staff_access", true);
            if restore == StaffAccessRestore::Persist {
                project.save(editor.connection(), project_model)?;
            }
        }
        if restore == StaffAccessRestore::InMemory {
            warn!(
                "disable_staff_access was not written back for {} projects; set access.persist_staff_access_restore to save it",
                non_staff_projects.len()
            );
        }
    }

    migration_info("Removing analyst project category");
    editor
        .objects(category_model)
        .filter_ids(&[category.id()])
        .delete()?;
    Ok(())
}

pub fn create_permission_groups(
    state: &ProjectState,
    editor: &SchemaEditor<'_>,
    analyst_group_name: &str,
    pm_group_name: &str,
) -> Result<(), SeqrError> {
    let user_model = state.get_model("auth", "User")?;
    let group_model = state.get_model("auth", "Group")?;

    let staff_users = editor.objects(user_model).filter("is_staff", true);
    let staff_count = staff_users.count()?;
    if staff_count == 0 {
        return Ok(());
    }

    migration_info("Creating user groups");
    let groups = editor.objects(group_model);
    let analyst_group = groups.create(&[("name", text(analyst_group_name))])?;
    groups.create(&[("name", text(pm_group_name))])?;

    let active_staff_users = editor
        .objects(user_model)
        .filter("is_staff", true)
        .filter("is_active", true)
        .ids()?;
    migration_info(&format!("Adding {} analysts", active_staff_users.len()));
    editor
        .related(group_model, "user_set", analyst_group.id())?
        .set(&active_staff_users)?;

    migration_info(&format!("Updating {} staff users", staff_count));
    staff_users.update("is_staff", false)?;
    Ok(())
}

/// Reverse of `create_permission_groups`. Both groups must exist.
pub fn remove_permission_groups(
    state: &ProjectState,
    editor: &SchemaEditor<'_>,
    analyst_group_name: &str,
    pm_group_name: &str,
) -> Result<(), SeqrError> {
    let user_model = state.get_model("auth", "User")?;
    let group_model = state.get_model("auth", "Group")?;

    let analyst_group = editor
        .objects(group_model)
        .filter("name", text(analyst_group_name))
        .get()?;
    let members = editor.related(group_model, "user_set", analyst_group.id())?;
    let analysts = editor.objects(user_model).filter_related(&members);
    let analyst_count = analysts.count()?;
    if analyst_count > 0 {
        migration_info(&format!("Updating {} staff users", analyst_count));
        analysts.update("is_staff", true)?;
    }

    migration_info("Deleting user groups");
    editor
        .objects(group_model)
        .filter_ids(&[analyst_group.id()])
        .delete()?;
    let pm_group = editor
        .objects(group_model)
        .filter("name", text(pm_group_name))
        .get()?;
    editor
        .objects(group_model)
        .filter_ids(&[pm_group.id()])
        .delete()?;
    Ok(())
}

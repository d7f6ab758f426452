use std::collections::{BTreeMap, BTreeSet};

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use super::schema_editor::quote_ident;
use super::state::{ManyToMany, ModelState};
use crate::error::SeqrError;

/// Text value helper for filters and inserts.
pub fn text(value: &str) -> Value {
    Value::Text(value.to_owned())
}

#[derive(Debug, Clone)]
enum Filter {
    Eq(String, Value),
    InIds(Vec<i64>),
    /// Rows linked to `owner_id` through `relation`, resolved as a subquery so
    /// the membership is never bound one parameter per id.
    InRelated(ManyToMany, i64),
    NotInRelated(ManyToMany, i64),
}

/// Lazily evaluated set of rows of a single historical model.
///
/// Filters are combined with AND. Nothing touches the database until a
/// terminal method (`ids`, `fetch`, `update`, ...) is called.
#[derive(Debug, Clone)]
pub struct QuerySet<'a> {
    conn: &'a Connection,
    model: &'a ModelState,
    filters: Vec<Filter>,
}

impl<'a> QuerySet<'a> {
    pub fn new(conn: &'a Connection, model: &'a ModelState) -> Self {
        Self {
            conn,
            model,
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(field.to_owned(), value.into()));
        self
    }

    pub fn filter_ids(mut self, ids: &[i64]) -> Self {
        self.filters.push(Filter::InIds(ids.to_vec()));
        self
    }

    /// Keep only rows that are members of `related`.
    pub fn filter_related(mut self, related: &RelatedSet<'_>) -> Self {
        self.filters
            .push(Filter::InRelated(related.relation.clone(), related.owner_id));
        self
    }

    /// Drop rows that are members of `related`.
    pub fn exclude_related(mut self, related: &RelatedSet<'_>) -> Self {
        self.filters
            .push(Filter::NotInRelated(related.relation.clone(), related.owner_id));
        self
    }

    fn lookup_description(&self) -> String {
        let parts: Vec<String> = self
            .filters
            .iter()
            .map(|filter| match filter {
                Filter::Eq(field, Value::Text(s)) => format!("{}={}", field, s),
                Filter::Eq(field, Value::Integer(i)) => format!("{}={}", field, i),
                Filter::Eq(field, other) => format!("{}={:?}", field, other),
                Filter::InIds(ids) => format!("id__in={:?}", ids),
                Filter::InRelated(relation, owner) => format!("{}__owner={}", relation.name, owner),
                Filter::NotInRelated(relation, owner) => {
                    format!("{}__owner!={}", relation.name, owner)
                }
            })
            .collect();
        parts.join(", ")
    }

    fn where_clause(&self) -> Result<(String, Vec<Value>), SeqrError> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        for filter in &self.filters {
            match filter {
                Filter::Eq(field, value) => {
                    self.model.field(field)?;
                    if *value == Value::Null {
                        clauses.push(format!("{} IS NULL", quote_ident(field)));
                    } else {
                        clauses.push(format!("{} = ?", quote_ident(field)));
                        params.push(value.clone());
                    }
                }
                Filter::InIds(ids) if ids.is_empty() => clauses.push("0".to_owned()),
                Filter::InIds(ids) => {
                    clauses.push(format!("\"id\" IN ({})", placeholders(ids.len())));
                    params.extend(ids.iter().map(|id| Value::Integer(*id)));
                }
                Filter::InRelated(relation, owner) => {
                    clauses.push(format!("\"id\" IN ({})", member_subquery(relation)));
                    params.push(Value::Integer(*owner));
                }
                Filter::NotInRelated(relation, owner) => {
                    clauses.push(format!("\"id\" NOT IN ({})", member_subquery(relation)));
                    params.push(Value::Integer(*owner));
                }
            }
        }

        if clauses.is_empty() {
            Ok(("1".to_owned(), params))
        } else {
            Ok((clauses.join(" AND "), params))
        }
    }

    pub fn ids(&self) -> Result<Vec<i64>, SeqrError> {
        let (clause, params) = self.where_clause()?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT \"id\" FROM {} WHERE {} ORDER BY \"id\"",
            quote_ident(self.model.table),
            clause
        ))?;
        let ids = stmt
            .query_map(params_from_iter(params.iter()), |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    pub fn count(&self) -> Result<usize, SeqrError> {
        let (clause, params) = self.where_clause()?;
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT count(*) FROM {} WHERE {}",
                quote_ident(self.model.table),
                clause
            ),
            params_from_iter(params.iter()),
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn fetch_limited(&self, limit: Option<usize>) -> Result<Vec<Record>, SeqrError> {
        let (clause, params) = self.where_clause()?;
        let columns: Vec<String> = self
            .model
            .fields
            .iter()
            .map(|f| quote_ident(f.name))
            .collect();
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY \"id\"",
            columns.join(", "),
            quote_ident(self.model.table),
            clause
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                let mut values = BTreeMap::new();
                for (idx, field) in self.model.fields.iter().enumerate() {
                    values.insert(field.name.to_owned(), row.get::<_, Value>(idx)?);
                }
                Ok(values)
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(Record::from_values)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Load every matching row into memory.
    pub fn fetch(&self) -> Result<Vec<Record>, SeqrError> {
        self.fetch_limited(None)
    }

    /// Lowest-id matching row, if any.
    pub fn first(&self) -> Result<Option<Record>, SeqrError> {
        Ok(self.fetch_limited(Some(1))?.into_iter().next())
    }

    /// Exactly one matching row.
    ///
    /// # Errors
    /// `DoesNotExist` when nothing matches, `MultipleObjectsReturned` when more than one row does.
    pub fn get(&self) -> Result<Record, SeqrError> {
        let mut records = self.fetch_limited(Some(2))?;
        match records.len() {
            1 => Ok(records.remove(0)),
            0 => Err(SeqrError::DoesNotExist {
                model: self.model.name.to_owned(),
                lookup: self.lookup_description(),
            }),
            _ => Err(SeqrError::MultipleObjectsReturned {
                model: self.model.name.to_owned(),
                lookup: self.lookup_description(),
            }),
        }
    }

    /// Persist `field = value` on every matching row in a single statement.
    pub fn update(&self, field: &str, value: impl Into<Value>) -> Result<usize, SeqrError> {
        let value = self.model.field(field)?.clean(Some(value.into()))?;
        let (clause, mut params) = self.where_clause()?;
        params.insert(0, value);
        let changed = self.conn.execute(
            &format!(
                "UPDATE {} SET {} = ? WHERE {}",
                quote_ident(self.model.table),
                quote_ident(field),
                clause
            ),
            params_from_iter(params.iter()),
        )?;
        Ok(changed)
    }

    /// Delete every matching row. Through-table rows cascade.
    pub fn delete(&self) -> Result<usize, SeqrError> {
        let (clause, params) = self.where_clause()?;
        let deleted = self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE {}",
                quote_ident(self.model.table),
                clause
            ),
            params_from_iter(params.iter()),
        )?;
        Ok(deleted)
    }

    /// Insert a new row. Unspecified fields take their default.
    pub fn create(&self, values: &[(&str, Value)]) -> Result<Record, SeqrError> {
        for (name, _) in values {
            self.model.field(name)?;
        }

        let mut columns = Vec::new();
        let mut params = Vec::new();
        for field in self.model.fields.iter().filter(|f| !f.is_auto()) {
            let supplied = values
                .iter()
                .find(|(name, _)| *name == field.name)
                .map(|(_, value)| value.clone());
            columns.push(quote_ident(field.name));
            params.push(field.clean(supplied)?);
        }

        self.conn.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(self.model.table),
                columns.join(", "),
                placeholders(params.len())
            ),
            params_from_iter(params.iter()),
        )?;
        let id = self.conn.last_insert_rowid();

        QuerySet::new(self.conn, self.model).filter_ids(&[id]).get()
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn member_subquery(relation: &ManyToMany) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = ?",
        quote_ident(relation.target_column),
        quote_ident(relation.through),
        quote_ident(relation.source_column)
    )
}

/// One row loaded into memory.
///
/// `set` only changes the in-memory copy; nothing reaches the database until
/// `save` is called.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: i64,
    values: BTreeMap<String, Value>,
    dirty: BTreeSet<String>,
}

impl Record {
    fn from_values(values: BTreeMap<String, Value>) -> Result<Self, SeqrError> {
        let id = match values.get("id") {
            Some(Value::Integer(id)) => *id,
            other => {
                return Err(SeqrError::Error(format!(
                    "Row is missing an integer id: {:?}",
                    other
                )))
            }
        };
        Ok(Self {
            id,
            values,
            dirty: BTreeSet::new(),
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    #[cfg(test)]
    pub fn get_bool(&self, field: &str) -> Option<bool> {
        match self.values.get(field) {
            Some(Value::Integer(i)) => Some(*i != 0),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn get_str(&self, field: &str) -> Option<&str> {
        match self.values.get(field) {
            Some(Value::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.values.insert(field.to_owned(), value.into());
        self.dirty.insert(field.to_owned());
    }

    #[cfg(test)]
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Write the fields changed through `set` back to the row.
    pub fn save(&mut self, conn: &Connection, model: &ModelState) -> Result<(), SeqrError> {
        if self.dirty.is_empty() {
            return Ok(());
        }

        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for name in &self.dirty {
            let value = self.values.get(name).cloned().unwrap_or(Value::Null);
            params.push(model.field(name)?.clean(Some(value))?);
            assignments.push(format!("{} = ?", quote_ident(name)));
        }
        params.push(Value::Integer(self.id));

        conn.execute(
            &format!(
                "UPDATE {} SET {} WHERE \"id\" = ?",
                quote_ident(model.table),
                assignments.join(", ")
            ),
            params_from_iter(params.iter()),
        )?;
        self.dirty.clear();
        Ok(())
    }
}

/// The many-to-many set hanging off one owner row.
pub struct RelatedSet<'a> {
    conn: &'a Connection,
    relation: &'a ManyToMany,
    owner_id: i64,
}

impl<'a> RelatedSet<'a> {
    pub fn new(conn: &'a Connection, relation: &'a ManyToMany, owner_id: i64) -> Self {
        Self {
            conn,
            relation,
            owner_id,
        }
    }

    /// Ids of the related rows, ascending.
    pub fn all(&self) -> Result<Vec<i64>, SeqrError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {target} FROM {through} WHERE {source} = ? ORDER BY {target}",
            target = quote_ident(self.relation.target_column),
            through = quote_ident(self.relation.through),
            source = quote_ident(self.relation.source_column),
        ))?;
        let ids = stmt
            .query_map([self.owner_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    pub fn add(&self, ids: &[i64]) -> Result<(), SeqrError> {
        let mut stmt = self.conn.prepare(&format!(
            "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?, ?)",
            quote_ident(self.relation.through),
            quote_ident(self.relation.source_column),
            quote_ident(self.relation.target_column),
        ))?;
        for id in ids {
            stmt.execute([self.owner_id, *id])?;
        }
        Ok(())
    }

    pub fn remove(&self, ids: &[i64]) -> Result<(), SeqrError> {
        let mut stmt = self.conn.prepare(&format!(
            "DELETE FROM {} WHERE {} = ? AND {} = ?",
            quote_ident(self.relation.through),
            quote_ident(self.relation.source_column),
            quote_ident(self.relation.target_column),
        ))?;
        for id in ids {
            stmt.execute([self.owner_id, *id])?;
        }
        Ok(())
    }

    /// Replace the whole membership with `ids`.
    ///
    /// Rows already related and still wanted are kept; the final state depends only
    /// on `ids`, never on what was there before.
    pub fn set(&self, ids: &[i64]) -> Result<(), SeqrError> {
        let wanted: BTreeSet<i64> = ids.iter().copied().collect();
        let current: BTreeSet<i64> = self.all()?.into_iter().collect();

        let stale: Vec<i64> = current.difference(&wanted).copied().collect();
        let missing: Vec<i64> = wanted.difference(&current).copied().collect();
        self.remove(&stale)?;
        self.add(&missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::state::FieldDef;
    use crate::db::{Database, SchemaEditor};
    use pretty_assertions::assert_eq;

    fn project_model() -> ModelState {
        ModelState::new("seqr", "Project", "seqr_project")
            .with_field(FieldDef::char("name", 140))
            .with_field(FieldDef::boolean("disable_staff_access", false))
    }

    fn category_model() -> ModelState {
        ModelState::new("seqr", "ProjectCategory", "seqr_projectcategory")
            .with_field(FieldDef::char("name", 128).unique())
            .with_many_to_many(ManyToMany {
                name: "projects",
                through: "seqr_projectcategory_projects",
                source_column: "projectcategory_id",
                target_column: "project_id",
                target_table: "seqr_project",
            })
    }

    fn setup() -> (Database, ModelState, ModelState) {
        let db = Database::open_in_memory().unwrap();
        let project = project_model();
        let category = category_model();
        let editor = SchemaEditor::new(db.conn());
        editor.create_model(&project).unwrap();
        editor.create_model(&category).unwrap();
        (db, project, category)
    }

    #[test]
    fn test_create_applies_defaults() {
        let (db, project, _) = setup();
        let record = QuerySet::new(db.conn(), &project)
            .create(&[("name", text("P1"))])
            .unwrap();
        assert_eq!(record.get_str("name"), Some("P1"));
        assert_eq!(record.get_bool("disable_staff_access"), Some(false));
    }

    #[test]
    fn test_create_rejects_unknown_field() {
        let (db, project, _) = setup();
        assert!(QuerySet::new(db.conn(), &project)
            .create(&[("nme", text("P1"))])
            .is_err());
    }

    #[test]
    fn test_filter_exclude_and_update() {
        let (db, project, _) = setup();
        let projects = QuerySet::new(db.conn(), &project);
        let p1 = projects.create(&[("name", text("P1"))]).unwrap();
        let p2 = projects
            .create(&[("name", text("P2")), ("disable_staff_access", true.into())])
            .unwrap();
        let p3 = projects.create(&[("name", text("P3"))]).unwrap();

        let enabled = projects.clone().filter("disable_staff_access", false);
        assert_eq!(enabled.ids().unwrap(), vec![p1.id(), p3.id()]);
        assert_eq!(
            projects.clone().filter_ids(&[p2.id(), p3.id()]).ids().unwrap(),
            vec![p2.id(), p3.id()]
        );
        assert_eq!(projects.clone().filter_ids(&[]).count().unwrap(), 0);

        let changed = enabled.update("disable_staff_access", true).unwrap();
        assert_eq!(changed, 2);
        assert_eq!(
            projects
                .clone()
                .filter("disable_staff_access", false)
                .count()
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_filter_and_exclude_related() {
        let (db, project, category) = setup();
        let projects = QuerySet::new(db.conn(), &project);
        let ids: Vec<i64> = (1..=4)
            .map(|n| {
                projects
                    .create(&[("name", text(&format!("P{}", n)))])
                    .unwrap()
                    .id()
            })
            .collect();
        let owner = QuerySet::new(db.conn(), &category)
            .create(&[("name", text("analyst-projects"))])
            .unwrap();
        let members = RelatedSet::new(db.conn(), category.relation("projects").unwrap(), owner.id());

        // Empty membership: nothing matches, nothing is excluded
        assert_eq!(projects.clone().filter_related(&members).count().unwrap(), 0);
        assert_eq!(projects.clone().exclude_related(&members).count().unwrap(), 4);

        members.set(&[ids[0], ids[2]]).unwrap();
        assert_eq!(
            projects.clone().filter_related(&members).ids().unwrap(),
            vec![ids[0], ids[2]]
        );
        assert_eq!(
            projects.clone().exclude_related(&members).ids().unwrap(),
            vec![ids[1], ids[3]]
        );

        let changed = projects
            .clone()
            .exclude_related(&members)
            .update("disable_staff_access", true)
            .unwrap();
        assert_eq!(changed, 2);
        assert_eq!(
            projects
                .clone()
                .filter("disable_staff_access", true)
                .ids()
                .unwrap(),
            vec![ids[1], ids[3]]
        );
    }

    #[test]
    fn test_get_reports_missing_and_multiple() {
        let (db, project, _) = setup();
        let projects = QuerySet::new(db.conn(), &project);
        projects.create(&[("name", text("P1"))]).unwrap();
        projects.create(&[("name", text("P1"))]).unwrap();

        match projects.clone().filter("name", text("P9")).get() {
            Err(SeqrError::DoesNotExist { model, lookup }) => {
                assert_eq!(model, "Project");
                assert_eq!(lookup, "name=P9");
            }
            other => panic!("expected DoesNotExist, got {:?}", other),
        }
        assert!(matches!(
            projects.clone().filter("name", text("P1")).get(),
            Err(SeqrError::MultipleObjectsReturned { .. })
        ));
        assert!(projects.clone().filter("name", text("P9")).first().unwrap().is_none());
    }

    #[test]
    fn test_filter_on_unknown_field_fails() {
        let (db, project, _) = setup();
        assert!(QuerySet::new(db.conn(), &project)
            .filter("staff_access", true)
            .ids()
            .is_err());
    }

    #[test]
    fn test_record_set_is_in_memory_until_saved() {
        let (db, project, _) = setup();
        let projects = QuerySet::new(db.conn(), &project);
        let mut record = projects.create(&[("name", text("P1"))]).unwrap();

        record.set("disable_staff_access", true);
        assert!(record.is_dirty());
        let on_disk = projects.clone().filter_ids(&[record.id()]).get().unwrap();
        assert_eq!(on_disk.get_bool("disable_staff_access"), Some(false));

        record.save(db.conn(), &project).unwrap();
        assert!(!record.is_dirty());
        let on_disk = projects.clone().filter_ids(&[record.id()]).get().unwrap();
        assert_eq!(on_disk.get_bool("disable_staff_access"), Some(true));
    }

    #[test]
    fn test_related_set_replaces_membership() {
        let (db, project, category) = setup();
        let projects = QuerySet::new(db.conn(), &project);
        let ids: Vec<i64> = (1..=4)
            .map(|n| {
                projects
                    .create(&[("name", text(&format!("P{}", n)))])
                    .unwrap()
                    .id()
            })
            .collect();
        let owner = QuerySet::new(db.conn(), &category)
            .create(&[("name", text("analyst-projects"))])
            .unwrap();
        let related = RelatedSet::new(db.conn(), category.relation("projects").unwrap(), owner.id());

        related.add(&[ids[0], ids[1]]).unwrap();
        related.set(&[ids[1], ids[2], ids[3]]).unwrap();
        assert_eq!(related.all().unwrap(), vec![ids[1], ids[2], ids[3]]);

        // Same input twice yields the same final state
        related.set(&[ids[1], ids[2], ids[3]]).unwrap();
        assert_eq!(related.all().unwrap(), vec![ids[1], ids[2], ids[3]]);

        related.set(&[]).unwrap();
        assert!(related.all().unwrap().is_empty());
    }

    #[test]
    fn test_delete_cascades_through_rows() {
        let (db, project, category) = setup();
        let p1 = QuerySet::new(db.conn(), &project)
            .create(&[("name", text("P1"))])
            .unwrap();
        let categories = QuerySet::new(db.conn(), &category);
        let owner = categories.create(&[("name", text("analyst-projects"))]).unwrap();
        RelatedSet::new(db.conn(), category.relation("projects").unwrap(), owner.id())
            .set(&[p1.id()])
            .unwrap();

        assert_eq!(categories.clone().filter_ids(&[owner.id()]).delete().unwrap(), 1);
        let links: i64 = db
            .conn()
            .query_row(
                "SELECT count(*) FROM seqr_projectcategory_projects",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(links, 0);
    }
}

//! Object processing: entity-tree maintenance, schema building, and
//! insertion batching.
//!
//! The processor owns the entity tree and the buffer of rows not yet
//! written. It marks the schema dirty whenever a new field, a new entity,
//! or an incompatible value is observed; the runner reacts by flushing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};

use rowforge_config::IngestConfig;
use rowforge_core::{
    Column, IngestError, IngestResult, Kind, KindDetector, MONOTABLE_NAME,
    MungeFn, Table,
};

use crate::column_order::{COL_SCOPE_SEP, column_order_flat};
use crate::entity::{EntityId, EntityTree};
use crate::insertion::Insertion;

/// The set of values for one decoded top-level object, keyed by entity so
/// duplicate flattened columns can be detected per entity.
pub type ObjectValueSet = HashMap<EntityId, HashMap<String, Value>>;

/// The table definitions the JSON is ingested into, plus the entity-to-
/// table assignment and per-column munging functions.
#[derive(Debug)]
pub struct IngestSchema {
    pub tables: Vec<Table>,
    pub entity_tables: HashMap<EntityId, String>,
    pub col_munge_fns: HashMap<String, MungeFn>,
}

impl IngestSchema {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }
}

pub struct Processor {
    tree: EntityTree,
    cur_schema: Option<Arc<IngestSchema>>,
    dirty_entities: HashSet<EntityId>,
    cur_obj_vals: ObjectValueSet,
    unwritten: Vec<ObjectValueSet>,
    col_names_ordered: Vec<String>,
    flatten: bool,
    sample_size: usize,
}

impl Processor {
    pub fn new(cfg: &IngestConfig) -> Self {
        Self {
            tree: EntityTree::new(MONOTABLE_NAME),
            cur_schema: None,
            dirty_entities: HashSet::new(),
            cur_obj_vals: ObjectValueSet::new(),
            unwritten: Vec::new(),
            col_names_ordered: Vec::new(),
            flatten: cfg.flatten,
            sample_size: cfg.sample_size,
        }
    }

    /// Process one decoded object plus its raw byte chunk. Returns true if
    /// the object changed the schema's structure.
    pub fn process_object(
        &mut self,
        obj: &Map<String, Value>,
        chunk: &[u8],
    ) -> IngestResult<bool> {
        self.cur_obj_vals = ObjectValueSet::new();
        let res = self.add_object(EntityTree::ROOT, obj);
        let dirty = !self.dirty_entities.is_empty();
        res?;

        let vals = std::mem::take(&mut self.cur_obj_vals);
        self.unwritten.push(vals);

        if dirty {
            self.update_col_names(chunk)?;
        }
        Ok(dirty)
    }

    /// Extend the ordered column-name list with names newly observed in
    /// `chunk`. Existing order is preserved; new names append in document
    /// order.
    fn update_col_names(&mut self, chunk: &[u8]) -> IngestResult<()> {
        for name in column_order_flat(chunk)? {
            if !self.col_names_ordered.contains(&name) {
                self.col_names_ordered.push(name);
            }
        }
        Ok(())
    }

    fn mark_dirty(&mut self, ent: EntityId) {
        self.dirty_entities.insert(ent);
    }

    pub fn mark_schema_clean(&mut self) {
        self.dirty_entities.clear();
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty_entities.is_empty()
    }

    pub fn pending_rows(&self) -> usize {
        self.unwritten.len()
    }

    /// Swap in the schema the runner just materialized.
    pub fn set_schema(&mut self, schema: Arc<IngestSchema>) {
        self.cur_schema = Some(schema);
    }

    /// Column names in first-seen document order.
    pub fn col_names_ordered(&self) -> &[String] {
        &self.col_names_ordered
    }

    fn structural_conflict(
        &self,
        ent: EntityId,
        field: &str,
        details: &'static str,
    ) -> IngestError {
        IngestError::StructuralConflict {
            entity: self.tree.qualified_name(ent),
            field: field.to_string(),
            details: details.into(),
        }
    }

    fn add_object(
        &mut self,
        ent: EntityId,
        obj: &Map<String, Value>,
    ) -> IngestResult<()> {
        for (field, val) in obj {
            match val {
                Value::Object(child_map) => {
                    match self.tree.child_named(ent, field) {
                        Some(child)
                            if self.tree.entity(child).is_array =>
                        {
                            return Err(self.structural_conflict(
                                ent,
                                field,
                                "previously detected as array, but now detected as object",
                            ));
                        }
                        Some(child) => self.add_object(child, child_map)?,
                        None => {
                            if self
                                .tree
                                .entity(ent)
                                .detectors
                                .contains_key(field)
                            {
                                return Err(self.structural_conflict(
                                    ent,
                                    field,
                                    "previously detected as scalar, but now detected as object",
                                ));
                            }
                            self.mark_dirty(ent);
                            let e = self.tree.entity_mut(ent);
                            if !e.field_names.iter().any(|f| f == field) {
                                e.field_names.push(field.clone());
                            }
                            let child =
                                self.tree.add_child(ent, field.clone(), false);
                            self.add_object(child, child_map)?;
                        }
                    }
                }

                Value::Array(_) => {
                    match self.tree.child_named(ent, field) {
                        Some(child)
                            if !self.tree.entity(child).is_array =>
                        {
                            return Err(self.structural_conflict(
                                ent,
                                field,
                                "previously detected as object, but now detected as array",
                            ));
                        }
                        Some(_) => {}
                        None => {
                            if self
                                .tree
                                .entity(ent)
                                .detectors
                                .contains_key(field)
                            {
                                return Err(self.structural_conflict(
                                    ent,
                                    field,
                                    "previously detected as scalar, but now detected as array",
                                ));
                            }
                            self.mark_dirty(ent);
                            let e = self.tree.entity_mut(ent);
                            if !e.field_names.iter().any(|f| f == field) {
                                e.field_names.push(field.clone());
                            }
                            self.tree.add_child(ent, field.clone(), true);
                        }
                    }

                    // Array cells occupy one flat column, stored as JSON
                    // text.
                    let col = self.calc_col_name(ent, field);
                    let text = serde_json::to_string(val).map_err(|e| {
                        IngestError::Decode {
                            details: e.to_string().into(),
                        }
                    })?;
                    self.cur_obj_vals
                        .entry(ent)
                        .or_default()
                        .insert(col, Value::String(text));
                }

                scalar => {
                    if self.tree.child_named(ent, field).is_some() {
                        return Err(self.structural_conflict(
                            ent,
                            field,
                            "previously detected as a nested field (object or array), but now detected as scalar",
                        ));
                    }

                    if !self.tree.entity(ent).detectors.contains_key(field) {
                        self.mark_dirty(ent);
                        let sample_size = self.sample_size;
                        let e = self.tree.entity_mut(ent);
                        e.field_names.push(field.clone());
                        e.detectors.insert(
                            field.clone(),
                            KindDetector::new(sample_size),
                        );
                    }

                    let col = self.calc_col_name(ent, field);
                    self.cur_obj_vals
                        .entry(ent)
                        .or_default()
                        .insert(col.clone(), scalar.clone());

                    let col_def = self.col_def(ent, &col);
                    let detector = self
                        .tree
                        .entity_mut(ent)
                        .detectors
                        .get_mut(field)
                        .ok_or_else(|| IngestError::KindDetection {
                            details: format!(
                                "no detector registered for field {field}"
                            )
                            .into(),
                        })?;

                    match col_def {
                        // No column materialized yet; keep sampling.
                        None => {
                            if !scalar.is_null() {
                                detector.sample(scalar);
                            }
                        }
                        Some(col_def) => {
                            if !field_val_allowed(detector, &col_def, scalar)
                            {
                                self.mark_dirty(ent);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// The materialized column definition for `col`, if a current schema
    /// exists and covers this entity.
    fn col_def(&self, ent: EntityId, col: &str) -> Option<Column> {
        let schema = self.cur_schema.as_ref()?;
        let table_name = schema.entity_tables.get(&ent)?;
        schema.table(table_name)?.find_col(col).cloned()
    }

    /// The DB column name for a field. Under flatten the name is prefixed
    /// with the entity chain: `root.child.grandchild.field` becomes
    /// `child_grandchild_field`.
    fn calc_col_name(&self, ent: EntityId, field: &str) -> String {
        if !self.flatten {
            return field.to_string();
        }

        let mut name = field.to_string();
        let mut cur = ent;
        while let Some(parent) = self.tree.entity(cur).parent {
            name = format!(
                "{}{}{}",
                self.tree.entity(cur).name,
                COL_SCOPE_SEP,
                name
            );
            cur = parent;
        }
        name
    }

    /// Build a flat (single table) schema from the entity tree.
    pub fn build_schema_flat(&mut self) -> IngestResult<IngestSchema> {
        if !self.flatten {
            return Err(IngestError::Unsupported {
                details:
                    "multi-table (non-flattened) schema construction is not implemented"
                        .into(),
            });
        }

        let mut table = Table::new(MONOTABLE_NAME);
        let mut col_defs: Vec<Column> = Vec::new();
        let mut col_munge_fns: HashMap<String, MungeFn> = HashMap::new();
        let mut entity_tables: HashMap<EntityId, String> = HashMap::new();

        for id in self.tree.walk() {
            entity_tables.insert(id, MONOTABLE_NAME.to_string());

            let fields = self.tree.entity(id).field_names.clone();
            for field in fields {
                let detected = self
                    .tree
                    .entity(id)
                    .detectors
                    .get(&field)
                    .map(|d| d.detect());
                if let Some((mut kind, munger)) = detected {
                    if kind == Kind::Null {
                        kind = Kind::Text;
                    }
                    self.tree
                        .entity_mut(id)
                        .kinds
                        .insert(field.clone(), kind);

                    let name = self.calc_col_name(id, &field);
                    if let Some(munger) = munger {
                        col_munge_fns.insert(name.clone(), munger);
                    }
                    col_defs.push(Column::new(name, kind));
                } else if let Some(child) = self.tree.child_named(id, &field)
                {
                    if self.tree.entity(child).is_array {
                        // One flat Text column per array field, holding
                        // JSON text.
                        col_defs.push(Column::new(
                            self.calc_col_name(id, &field),
                            Kind::Text,
                        ));
                    }
                }
            }
        }

        // Order columns by first occurrence in the documents; columns
        // absent from the ordered list are dropped.
        for name in &self.col_names_ordered {
            if let Some(col) = col_defs.iter().find(|c| c.name == *name) {
                table.cols.push(col.clone());
            }
        }

        Ok(IngestSchema {
            tables: vec![table],
            entity_tables,
            col_munge_fns,
        })
    }

    /// Fold the unwritten object value sets into insertions. On success
    /// the unwritten buffer is empty.
    pub fn build_insertions_flat(
        &mut self,
        schema: &IngestSchema,
    ) -> IngestResult<Vec<Insertion>> {
        let [table] = &schema.tables[..] else {
            return Err(IngestError::Unsupported {
                details: format!(
                    "expected 1 table for flat JSON processing but got {}",
                    schema.tables.len()
                )
                .into(),
            });
        };

        let mut insertions = Vec::with_capacity(self.unwritten.len());
        for obj_vals in &self.unwritten {
            let mut col_names: Vec<String> = Vec::new();
            let mut col_vals: HashMap<String, Value> = HashMap::new();

            for (ent, field_vals) in obj_vals {
                for (col, val) in field_vals {
                    if col_vals.contains_key(col) {
                        return Err(IngestError::DuplicateColumn {
                            entity: self.tree.qualified_name(*ent),
                            column: col.clone(),
                        });
                    }
                    let val = match schema.col_munge_fns.get(col) {
                        Some(munger) => munger(val)?,
                        None => val.clone(),
                    };
                    col_vals.insert(col.clone(), val);
                    col_names.push(col.clone());
                }
            }

            // Sort so the statement fingerprint is stable across objects
            // with the same column set.
            col_names.sort_unstable();
            let vals = col_names
                .iter()
                .map(|c| col_vals.remove(c).unwrap_or(Value::Null))
                .collect();
            insertions.push(Insertion::new(
                table.name.clone(),
                col_names,
                vals,
            ));
        }

        self.unwritten.clear();
        Ok(insertions)
    }
}

/// Whether `val` is compatible with the declared kind of `col`. Columns of
/// kind Null, Unknown, or Text accept every value.
fn field_val_allowed(
    detector: &mut KindDetector,
    col: &Column,
    val: &Value,
) -> bool {
    if val.is_null() {
        return true;
    }
    if matches!(col.kind, Kind::Null | Kind::Unknown | Kind::Text) {
        return true;
    }

    detector.sample(val);
    detector.detect().0 == col.kind
}

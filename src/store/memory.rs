use itertools::Itertools;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::error::StoreError;
use crate::model::{EntityTypeDef, Id, SchemaRegistry};
use crate::store::traits::*;

#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<Id, Row>,
    next_id: Id,
}

impl Table {
    fn allocate(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }
}

/// Rows of every registered entity type, kept in process memory.
///
/// Change sets are applied against a staged copy of the tables and only
/// swapped in once every constraint holds.
#[derive(Debug)]
pub struct MemoryRepository {
    registry: Arc<SchemaRegistry>,
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryRepository {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        let tables = registry
            .types()
            .map(|def| (def.name.clone(), Table::default()))
            .collect();
        Self {
            registry,
            tables: RwLock::new(tables),
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn count(&self, entity_type: &str) -> usize {
        self.tables
            .read()
            .get(entity_type)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    fn definition(&self, entity_type: &str) -> Result<&EntityTypeDef, StoreError> {
        self.registry
            .get(entity_type)
            .ok_or_else(|| StoreError::UnknownEntity(entity_type.to_string()))
    }

    /// Value of `attribute` on a row, treating the identifier as an attribute.
    fn value_of(def: &EntityTypeDef, id: Id, row: &Row, attribute: &str) -> Option<StoredValue> {
        if attribute == def.identifier {
            Some(StoredValue::Integer(id))
        } else {
            row.get(attribute).cloned()
        }
    }

    fn check_constraints(
        &self,
        tables: &HashMap<String, Table>,
        touched: &[(String, Id)],
    ) -> Result<(), StoreError> {
        for (entity_type, id) in touched {
            let def = self.definition(entity_type)?;
            let table = tables
                .get(entity_type)
                .ok_or_else(|| StoreError::UnknownEntity(entity_type.clone()))?;
            let Some(row) = table.rows.get(id) else {
                continue;
            };

            for attr in &def.attributes {
                let value = row.get(&attr.name);
                if attr.required && value.map(StoredValue::is_null).unwrap_or(true) {
                    return Err(StoreError::NotNullViolation {
                        entity_type: entity_type.clone(),
                        attribute: attr.name.clone(),
                    });
                }
                if attr.unique {
                    let Some(value) = value.filter(|v| !v.is_null()) else {
                        continue;
                    };
                    let clash = table
                        .rows
                        .iter()
                        .any(|(other, row)| other != id && row.get(&attr.name) == Some(value));
                    if clash {
                        return Err(StoreError::UniqueViolation {
                            entity_type: entity_type.clone(),
                            attribute: attr.name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Clears references to deleted rows from the rows left behind.
    fn detach_deleted(&self, tables: &mut HashMap<String, Table>, deleted: &HashSet<(String, Id)>) {
        for def in self.registry.types() {
            let Some(table) = tables.get_mut(&def.name) else {
                continue;
            };
            for attr in &def.attributes {
                let Some(target) = attr.kind.target() else {
                    continue;
                };
                let gone = |r: &RowRef| {
                    matches!(r, RowRef::Id(id) if deleted.contains(&(target.to_string(), *id)))
                };
                for row in table.rows.values_mut() {
                    let Some(value) = row.get_mut(&attr.name) else {
                        continue;
                    };
                    let dangling = match value {
                        StoredValue::Reference(r) => gone(r),
                        StoredValue::References(refs) => {
                            refs.retain(|r| !gone(r));
                            false
                        }
                        _ => false,
                    };
                    if dangling {
                        *value = StoredValue::Null;
                    }
                }
            }
        }
    }
}

fn resolve_ref(key: RowRef, assigned: &HashMap<usize, Id>) -> Option<RowRef> {
    match key {
        RowRef::Id(_) => Some(key),
        RowRef::Pending(k) => assigned.get(&k).map(|id| RowRef::Id(*id)),
    }
}

fn resolve_values(values: Row, assigned: &HashMap<usize, Id>) -> Row {
    values
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                StoredValue::Reference(key) => resolve_ref(key, assigned)
                    .map(StoredValue::Reference)
                    .unwrap_or(StoredValue::Null),
                StoredValue::References(keys) => StoredValue::References(
                    keys.into_iter()
                        .filter_map(|k| resolve_ref(k, assigned))
                        .collect(),
                ),
                other => other,
            };
            (name, value)
        })
        .collect()
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl Repository for MemoryRepository {
    fn load(&self, entity_type: &str, id: Id) -> Result<Option<Row>, StoreError> {
        let tables = self.tables.read();
        let table = tables
            .get(entity_type)
            .ok_or_else(|| StoreError::UnknownEntity(entity_type.to_string()))?;
        Ok(table.rows.get(&id).cloned())
    }

    fn apply(&self, changes: ChangeSet) -> Result<AppliedChanges, StoreError> {
        let mut guard = self.tables.write();
        let mut staged = guard.clone();
        let mut applied = AppliedChanges::default();

        for write in &changes.writes {
            if let RowRef::Pending(k) = write.key {
                let table = staged
                    .get_mut(&write.entity_type)
                    .ok_or_else(|| StoreError::UnknownEntity(write.entity_type.clone()))?;
                applied.assigned.insert(k, table.allocate());
            }
        }

        let mut touched = Vec::with_capacity(changes.writes.len());
        for write in changes.writes {
            let values = resolve_values(write.values, &applied.assigned);
            let table = staged
                .get_mut(&write.entity_type)
                .ok_or_else(|| StoreError::UnknownEntity(write.entity_type.clone()))?;
            let id = match write.key {
                RowRef::Pending(k) => {
                    let id = applied.assigned.get(&k).copied().ok_or_else(|| {
                        StoreError::UnknownEntity(write.entity_type.clone())
                    })?;
                    table.rows.insert(id, values);
                    id
                }
                RowRef::Id(id) => {
                    let row = table.rows.get_mut(&id).ok_or_else(|| StoreError::MissingRow {
                        entity_type: write.entity_type.clone(),
                        id,
                    })?;
                    row.extend(values);
                    applied.updated += 1;
                    id
                }
            };
            touched.push((write.entity_type, id));
        }

        let deleted = changes.deletes.iter().cloned().collect::<HashSet<_>>();
        for (entity_type, id) in changes.deletes {
            let table = staged
                .get_mut(&entity_type)
                .ok_or_else(|| StoreError::UnknownEntity(entity_type.clone()))?;
            if table.rows.remove(&id).is_none() {
                return Err(StoreError::MissingRow { entity_type, id });
            }
            applied.deleted += 1;
        }
        if !deleted.is_empty() {
            self.detach_deleted(&mut staged, &deleted);
        }

        self.check_constraints(&staged, &touched)?;
        *guard = staged;

        log::debug!(
            "Applied change set: {} inserted, {} updated, {} deleted",
            applied.assigned.len(),
            applied.updated,
            applied.deleted
        );
        Ok(applied)
    }

    fn find_by_value(
        &self,
        entity_type: &str,
        attribute: &str,
        value: &StoredValue,
    ) -> Result<Vec<Id>, StoreError> {
        let def = self.definition(entity_type)?;
        let tables = self.tables.read();
        let table = tables
            .get(entity_type)
            .ok_or_else(|| StoreError::UnknownEntity(entity_type.to_string()))?;
        Ok(table
            .rows
            .iter()
            .filter(|(id, row)| Self::value_of(def, **id, row, attribute).as_ref() == Some(value))
            .map(|(id, _)| *id)
            .collect())
    }

    fn search(&self, entity_type: &str, criteria: &SearchCriteria) -> Result<SearchPage, StoreError> {
        let def = self.definition(entity_type)?;
        let tables = self.tables.read();
        let table = tables
            .get(entity_type)
            .ok_or_else(|| StoreError::UnknownEntity(entity_type.to_string()))?;

        let visible = table
            .rows
            .iter()
            .filter(|(_, row)| {
                criteria
                    .hide_inactive
                    .as_ref()
                    .map(|soft| !is_inactive(row, soft))
                    .unwrap_or(true)
            })
            .collect::<Vec<_>>();
        let total = visible.len();

        let matches = |id: Id, row: &Row| {
            let filters_hold = criteria.filters.iter().all(|(attribute, needle)| {
                Self::value_of(def, id, row, attribute)
                    .and_then(|v| v.search_text())
                    .map(|text| contains_ci(&text, needle))
                    .unwrap_or(false)
            });
            let search_all_holds = match &criteria.search_all {
                Some(needle) if !needle.is_empty() => {
                    contains_ci(&id.to_string(), needle)
                        || row
                            .values()
                            .filter_map(StoredValue::search_text)
                            .any(|text| contains_ci(&text, needle))
                }
                _ => true,
            };
            filters_hold && search_all_holds
        };

        let filtered = visible
            .into_iter()
            .filter(|(id, row)| matches(**id, row))
            .sorted_by(|(a_id, a), (b_id, b)| {
                criteria
                    .order_by
                    .iter()
                    .map(|(attribute, direction)| {
                        let ordering = StoredValue::compare(
                            Self::value_of(def, **a_id, a, attribute).as_ref(),
                            Self::value_of(def, **b_id, b, attribute).as_ref(),
                        );
                        match direction {
                            SortDirection::Asc => ordering,
                            SortDirection::Desc => ordering.reverse(),
                        }
                    })
                    .find(|o| o.is_ne())
                    .unwrap_or_else(|| a_id.cmp(b_id))
            })
            .collect::<Vec<_>>();

        let rows = filtered
            .iter()
            .skip(criteria.start)
            .take(criteria.length.unwrap_or(usize::MAX))
            .map(|(id, row)| (**id, (*row).clone()))
            .collect();

        Ok(SearchPage {
            total,
            filtered: filtered.len(),
            rows,
        })
    }
}

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::error::StoreError;
use crate::model::{AttributeValue, Entity, EntityHandle, Id, SoftDelete, SoftDeleteKind};

/// Unit-of-work view of the persistence store used by population.
///
/// Lookups and registrations only stage changes in memory; nothing becomes
/// durable before [`EntityStore::commit`].
pub trait EntityStore {
    /// Loads an entity by identifier, reusing an already tracked instance.
    fn find(&mut self, entity_type: &str, id: Id) -> Result<Option<EntityHandle>, StoreError>;
    /// Constructs a new, not yet registered entity.
    fn create(&mut self, entity_type: &str) -> EntityHandle;
    fn entity(&self, handle: EntityHandle) -> &Entity;
    fn entity_mut(&mut self, handle: EntityHandle) -> &mut Entity;
    /// Stages an entity for insert or update.
    fn register(&mut self, handle: EntityHandle);
    /// Stages an entity for deletion.
    fn remove(&mut self, handle: EntityHandle);
    fn is_removed(&self, handle: EntityHandle) -> bool;
    /// False for a tracked entity whose attributes have not been read yet.
    fn is_loaded(&self, handle: EntityHandle) -> bool;
    /// Writes every staged change atomically.
    fn commit(&mut self) -> Result<CommitSummary, StoreError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Row reference inside a change set: an existing id or a row being inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowRef {
    Id(Id),
    Pending(usize),
}

/// Attribute value as stored by a repository; relations are identifiers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Null,
    Bool(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
    DateTime(NaiveDateTime),
    Reference(RowRef),
    References(Vec<RowRef>),
}

pub type Row = BTreeMap<String, StoredValue>;

pub const DATE_TIME_DISPLAY: &str = "%Y-%m-%d %H:%M:%S";

impl StoredValue {
    /// Scalar attribute values; relations have no stored form without ids.
    pub fn from_scalar(value: &AttributeValue) -> Option<StoredValue> {
        Some(match value {
            AttributeValue::Null => StoredValue::Null,
            AttributeValue::Bool(v) => StoredValue::Bool(*v),
            AttributeValue::Integer(v) => StoredValue::Integer(*v),
            AttributeValue::Decimal(v) => StoredValue::Decimal(*v),
            AttributeValue::Text(v) => StoredValue::Text(v.clone()),
            AttributeValue::DateTime(v) => StoredValue::DateTime(*v),
            AttributeValue::Reference(_) | AttributeValue::Collection(_) => return None,
        })
    }

    pub fn to_scalar(&self) -> Option<AttributeValue> {
        Some(match self {
            StoredValue::Null => AttributeValue::Null,
            StoredValue::Bool(v) => AttributeValue::Bool(*v),
            StoredValue::Integer(v) => AttributeValue::Integer(*v),
            StoredValue::Decimal(v) => AttributeValue::Decimal(*v),
            StoredValue::Text(v) => AttributeValue::Text(v.clone()),
            StoredValue::DateTime(v) => AttributeValue::DateTime(*v),
            StoredValue::Reference(_) | StoredValue::References(_) => return None,
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StoredValue::Null)
    }

    /// Text used for `contains` matching in searches.
    pub fn search_text(&self) -> Option<String> {
        match self {
            StoredValue::Bool(v) => Some(if *v { "1" } else { "0" }.to_string()),
            StoredValue::Integer(v) => Some(v.to_string()),
            StoredValue::Decimal(v) => Some(v.to_string()),
            StoredValue::Text(v) => Some(v.clone()),
            StoredValue::DateTime(v) => Some(v.format(DATE_TIME_DISPLAY).to_string()),
            StoredValue::Reference(RowRef::Id(id)) => Some(id.to_string()),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Value};
        match self {
            StoredValue::Null => Value::Null,
            StoredValue::Bool(v) => json!(v),
            StoredValue::Integer(v) => json!(v),
            StoredValue::Decimal(v) => json!(v),
            StoredValue::Text(v) => json!(v),
            StoredValue::DateTime(v) => json!(v.format(DATE_TIME_DISPLAY).to_string()),
            StoredValue::Reference(RowRef::Id(id)) => json!(id),
            StoredValue::Reference(RowRef::Pending(_)) => Value::Null,
            StoredValue::References(refs) => Value::Array(
                refs.iter()
                    .filter_map(|r| match r {
                        RowRef::Id(id) => Some(json!(id)),
                        RowRef::Pending(_) => None,
                    })
                    .collect(),
            ),
        }
    }

    /// Ordering for sorted searches; nulls sort first.
    pub fn compare(a: Option<&StoredValue>, b: Option<&StoredValue>) -> Ordering {
        use StoredValue::*;
        match (a, b) {
            (None | Some(Null), None | Some(Null)) => Ordering::Equal,
            (None | Some(Null), _) => Ordering::Less,
            (_, None | Some(Null)) => Ordering::Greater,
            (Some(Integer(x)), Some(Integer(y))) => x.cmp(y),
            (Some(Decimal(x)), Some(Decimal(y))) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
            (Some(Integer(x)), Some(Decimal(y))) => {
                (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal)
            }
            (Some(Decimal(x)), Some(Integer(y))) => {
                x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal)
            }
            (Some(Bool(x)), Some(Bool(y))) => x.cmp(y),
            (Some(DateTime(x)), Some(DateTime(y))) => x.cmp(y),
            (Some(x), Some(y)) => x
                .search_text()
                .unwrap_or_default()
                .to_lowercase()
                .cmp(&y.search_text().unwrap_or_default().to_lowercase()),
        }
    }
}

/// One row to insert (`RowRef::Pending`) or overwrite (`RowRef::Id`).
#[derive(Debug, Clone, PartialEq)]
pub struct RowWrite {
    pub entity_type: String,
    pub key: RowRef,
    pub values: Row,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub writes: Vec<RowWrite>,
    pub deletes: Vec<(String, Id)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedChanges {
    /// Identifier given to each pending row, keyed by its pending key.
    pub assigned: HashMap<usize, Id>,
    pub updated: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchCriteria {
    /// Attribute must contain the value, case-insensitively.
    pub filters: Vec<(String, String)>,
    /// Any scalar attribute must contain the value.
    pub search_all: Option<String>,
    pub order_by: Vec<(String, SortDirection)>,
    pub start: usize,
    /// `None` returns every remaining row.
    pub length: Option<usize>,
    /// Rows soft-deleted through this capability are left out.
    pub hide_inactive: Option<SoftDelete>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub total: usize,
    pub filtered: usize,
    pub rows: Vec<(Id, Row)>,
}

/// True when a row was soft-deleted through `soft`.
pub fn is_inactive(row: &Row, soft: &SoftDelete) -> bool {
    match (soft.kind, row.get(&soft.attribute)) {
        (SoftDeleteKind::StatusTuple, Some(StoredValue::Integer(status))) => {
            *status == crate::model::INACTIVE_STATUS
        }
        (SoftDeleteKind::ActiveFlag, Some(StoredValue::Bool(active))) => !active,
        _ => false,
    }
}

/// Durable storage behind a unit of work.
pub trait Repository: Send + Sync {
    fn load(&self, entity_type: &str, id: Id) -> Result<Option<Row>, StoreError>;

    /// Applies all writes and deletes, or none of them.
    fn apply(&self, changes: ChangeSet) -> Result<AppliedChanges, StoreError>;

    /// Identifiers of rows whose `attribute` equals `value`.
    fn find_by_value(
        &self,
        entity_type: &str,
        attribute: &str,
        value: &StoredValue,
    ) -> Result<Vec<Id>, StoreError>;

    fn search(&self, entity_type: &str, criteria: &SearchCriteria) -> Result<SearchPage, StoreError>;

    /// Inserts one row outside of any unit of work.
    fn insert(&self, entity_type: &str, values: Row) -> Result<Id, StoreError> {
        let applied = self.apply(ChangeSet {
            writes: vec![RowWrite {
                entity_type: entity_type.to_string(),
                key: RowRef::Pending(0),
                values,
            }],
            deletes: Vec::new(),
        })?;
        applied
            .assigned
            .get(&0)
            .copied()
            .ok_or_else(|| StoreError::UnknownEntity(entity_type.to_string()))
    }
}

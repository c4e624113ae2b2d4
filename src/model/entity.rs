use chrono::NaiveDateTime;
use std::collections::BTreeMap;

use crate::model::{EntityHandle, Id};

/// In-memory value of an entity attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
    DateTime(NaiveDateTime),
    /// To-one relation; also used for back-references to a parent.
    Reference(EntityHandle),
    Collection(Vec<EntityHandle>),
}

impl AttributeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    pub fn as_reference(&self) -> Option<EntityHandle> {
        match self {
            AttributeValue::Reference(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&[EntityHandle]> {
        match self {
            AttributeValue::Collection(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<f64> {
        match self {
            AttributeValue::Decimal(v) => Some(*v),
            AttributeValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// A domain object tracked by a unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub entity_type: String,
    /// `None` until the entity is first committed.
    pub id: Option<Id>,
    attributes: BTreeMap<String, AttributeValue>,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_id(entity_type: impl Into<String>, id: Id) -> Self {
        Self {
            id: Some(id),
            ..Self::new(entity_type)
        }
    }

    pub fn get(&self, attribute: &str) -> Option<&AttributeValue> {
        self.attributes.get(attribute)
    }

    pub fn set(&mut self, attribute: &str, value: AttributeValue) {
        self.attributes.insert(attribute.to_string(), value);
    }

    /// Appends to a collection attribute, creating it when unset.
    /// Returns `false` if the handle was already present.
    pub fn add_to_collection(&mut self, attribute: &str, handle: EntityHandle) -> bool {
        let slot = self
            .attributes
            .entry(attribute.to_string())
            .or_insert_with(|| AttributeValue::Collection(Vec::new()));
        if !matches!(slot, AttributeValue::Collection(_)) {
            *slot = AttributeValue::Collection(Vec::new());
        }
        match slot {
            AttributeValue::Collection(items) if !items.contains(&handle) => {
                items.push(handle);
                true
            }
            _ => false,
        }
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.attributes.iter()
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }
}

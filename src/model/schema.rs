use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::SchemaMismatchError;

/// Status value marking a row as removed.
pub const INACTIVE_STATUS: i64 = 0;
/// Status value marking a row as protected from removal.
pub const PROTECTED_STATUS: i64 = 2;

/// Attribute name that marks a type as a lookup table.
pub const LOOKUP_MARKER: &str = "term";

fn default_identifier() -> String {
    "id".to_string()
}

/// Declared kind of an attribute, as written in schema files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AttributeKind {
    Text,
    Integer,
    Decimal,
    Boolean,
    DateTime,
    OneToOne {
        target: String,
    },
    ManyToOne {
        target: String,
    },
    ManyToMany {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        join_column: Option<String>,
    },
    Collection {
        target: String,
    },
    /// Entity-typed attribute without a relation annotation.
    Nested {
        target: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScalarKind {
    Text,
    Integer,
    Decimal,
    Boolean,
    DateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    OneToOne,
    ManyToOne,
    ManyToMany,
    Collection,
    Nested,
}

impl RelationKind {
    pub fn is_collection(&self) -> bool {
        matches!(self, RelationKind::ManyToMany | RelationKind::Collection)
    }
}

/// Static relation metadata for one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub kind: RelationKind,
    /// Related type; the element type for collections.
    pub target: String,
    /// Join column of a many-to-many relation (e.g. `tag_id`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_column: Option<String>,
}

/// What the resolver reports for an attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeDescriptor {
    Scalar(ScalarKind),
    Relation(RelationDescriptor),
}

impl AttributeKind {
    pub fn descriptor(&self) -> AttributeDescriptor {
        let relation = |kind, target: &String, join_column: Option<String>| {
            AttributeDescriptor::Relation(RelationDescriptor {
                kind,
                target: target.clone(),
                join_column,
            })
        };
        match self {
            AttributeKind::Text => AttributeDescriptor::Scalar(ScalarKind::Text),
            AttributeKind::Integer => AttributeDescriptor::Scalar(ScalarKind::Integer),
            AttributeKind::Decimal => AttributeDescriptor::Scalar(ScalarKind::Decimal),
            AttributeKind::Boolean => AttributeDescriptor::Scalar(ScalarKind::Boolean),
            AttributeKind::DateTime => AttributeDescriptor::Scalar(ScalarKind::DateTime),
            AttributeKind::OneToOne { target } => relation(RelationKind::OneToOne, target, None),
            AttributeKind::ManyToOne { target } => relation(RelationKind::ManyToOne, target, None),
            AttributeKind::ManyToMany {
                target,
                join_column,
            } => relation(RelationKind::ManyToMany, target, join_column.clone()),
            AttributeKind::Collection { target } => {
                relation(RelationKind::Collection, target, None)
            }
            AttributeKind::Nested { target } => relation(RelationKind::Nested, target, None),
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            AttributeKind::OneToOne { target }
            | AttributeKind::ManyToOne { target }
            | AttributeKind::ManyToMany { target, .. }
            | AttributeKind::Collection { target }
            | AttributeKind::Nested { target } => Some(target),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    /// camelCase attribute name.
    pub name: String,
    #[serde(flatten)]
    pub kind: AttributeKind,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    /// Human readable label used in error messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl AttributeDef {
    pub fn new(name: &str, kind: AttributeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            unique: false,
            required: false,
            title: None,
        }
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, AttributeKind::Text)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, AttributeKind::Integer)
    }

    pub fn decimal(name: &str) -> Self {
        Self::new(name, AttributeKind::Decimal)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, AttributeKind::Boolean)
    }

    pub fn date_time(name: &str) -> Self {
        Self::new(name, AttributeKind::DateTime)
    }

    pub fn one_to_one(name: &str, target: &str) -> Self {
        Self::new(name, AttributeKind::OneToOne { target: target.into() })
    }

    pub fn many_to_one(name: &str, target: &str) -> Self {
        Self::new(name, AttributeKind::ManyToOne { target: target.into() })
    }

    pub fn many_to_many(name: &str, target: &str, join_column: &str) -> Self {
        Self::new(
            name,
            AttributeKind::ManyToMany {
                target: target.into(),
                join_column: Some(join_column.into()),
            },
        )
    }

    pub fn collection(name: &str, target: &str) -> Self {
        Self::new(name, AttributeKind::Collection { target: target.into() })
    }

    pub fn nested(name: &str, target: &str) -> Self {
        Self::new(name, AttributeKind::Nested { target: target.into() })
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn titled(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// Label for messages: the title when set, the name otherwise.
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SoftDeleteKind {
    /// Integer status: `0` removed, `2` protected.
    StatusTuple,
    /// Boolean active flag set to `false` on removal.
    ActiveFlag,
}

/// Soft-delete capability of an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftDelete {
    pub attribute: String,
    pub kind: SoftDeleteKind,
}

/// Soft-delete attributes checked at registration, in priority order.
const SOFT_DELETE_CANDIDATES: [(&str, SoftDeleteKind); 3] = [
    ("statusTuple", SoftDeleteKind::StatusTuple),
    ("isActive", SoftDeleteKind::ActiveFlag),
    ("flActive", SoftDeleteKind::ActiveFlag),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeDef {
    pub name: String,
    #[serde(default = "default_identifier")]
    pub identifier: String,
    pub attributes: Vec<AttributeDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_delete: Option<SoftDelete>,
    /// Reference/lookup table, never mutated through population.
    #[serde(default)]
    pub lookup: bool,
}

impl EntityTypeDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            identifier: default_identifier(),
            attributes: Vec::new(),
            soft_delete: None,
            lookup: false,
        }
    }

    pub fn identified_by(mut self, identifier: &str) -> Self {
        self.identifier = identifier.to_string();
        self
    }

    pub fn attribute(mut self, attribute: AttributeDef) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn soft_delete(mut self, attribute: &str, kind: SoftDeleteKind) -> Self {
        self.soft_delete = Some(SoftDelete {
            attribute: attribute.to_string(),
            kind,
        });
        self
    }

    pub fn get_attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Fills in capabilities that were not declared explicitly.
    fn resolve_capabilities(&mut self) {
        if self.soft_delete.is_none() {
            self.soft_delete = SOFT_DELETE_CANDIDATES.iter().find_map(|(name, kind)| {
                let attr = self.get_attribute(name)?;
                let fits = match kind {
                    SoftDeleteKind::StatusTuple => attr.kind == AttributeKind::Integer,
                    SoftDeleteKind::ActiveFlag => attr.kind == AttributeKind::Boolean,
                };
                fits.then(|| SoftDelete {
                    attribute: name.to_string(),
                    kind: *kind,
                })
            });
        }
        if self.get_attribute(LOOKUP_MARKER).is_some() {
            self.lookup = true;
        }
    }
}

/// All entity types known to the application, validated at construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    types: BTreeMap<String, EntityTypeDef>,
}

impl SchemaRegistry {
    pub fn new(definitions: Vec<EntityTypeDef>) -> Result<Self, SchemaMismatchError> {
        let mut types = BTreeMap::new();
        for mut def in definitions {
            def.resolve_capabilities();
            if types.contains_key(&def.name) {
                return Err(SchemaMismatchError::new(
                    &def.name,
                    "*",
                    "entity type registered twice",
                ));
            }
            types.insert(def.name.clone(), def);
        }

        let registry = Self { types };
        registry.check_consistency()?;
        Ok(registry)
    }

    /// Loads definitions from a JSON file holding an array of entity types.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema file {}", path.display()))?;
        let definitions: Vec<EntityTypeDef> =
            serde_json::from_str(&raw).context("Failed to parse schema file")?;
        Ok(Self::new(definitions)?)
    }

    fn check_consistency(&self) -> Result<(), SchemaMismatchError> {
        for def in self.types.values() {
            let mut seen = std::collections::HashSet::new();
            for attr in &def.attributes {
                if !seen.insert(attr.name.as_str()) {
                    return Err(SchemaMismatchError::new(
                        &def.name,
                        &attr.name,
                        "attribute declared twice",
                    ));
                }
                if attr.name == def.identifier {
                    return Err(SchemaMismatchError::new(
                        &def.name,
                        &attr.name,
                        "identifier must not be declared as an attribute",
                    ));
                }
                if let Some(target) = attr.kind.target() {
                    if !self.types.contains_key(target) {
                        return Err(SchemaMismatchError::new(
                            &def.name,
                            &attr.name,
                            format!("relation targets unknown type {}", target),
                        ));
                    }
                }
            }
            if let Some(soft) = &def.soft_delete {
                if def.get_attribute(&soft.attribute).is_none() {
                    return Err(SchemaMismatchError::new(
                        &def.name,
                        &soft.attribute,
                        "soft-delete attribute is not declared",
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, entity_type: &str) -> Option<&EntityTypeDef> {
        self.types.get(entity_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &EntityTypeDef> {
        self.types.values()
    }
}

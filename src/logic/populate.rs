//! Maps submitted value trees onto entity graphs.
//!
//! Population walks the schema of the target type, pulls the matching key out
//! of the submitted map and converts it according to the attribute kind.
//! Related entities are loaded by identifier, created, or marked for removal
//! (`idDel`), and every derived entity apart from lookup rows is registered
//! with the store. Nothing
//! is persisted here; the caller commits the unit of work.

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::error::{
    NotRemovableError, PopulateResult, PopulationError, SchemaMismatchError,
};
use crate::logic::coerce::coerce_scalar;
use crate::logic::resolver::MetadataResolver;
use crate::model::{
    parse_id, AttributeDef, AttributeDescriptor, AttributeValue, EntityHandle, KeyConvention,
    RelationDescriptor, RelationKind, SchemaRegistry, SoftDeleteKind, SubmittedValue, ValueSource,
    INACTIVE_STATUS, PROTECTED_STATUS, REMOVAL_KEY,
};
use crate::store::EntityStore;

/// What to populate: a type to instantiate or an already tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'t> {
    Type(&'t str),
    Instance(EntityHandle),
}

pub struct EntityPopulator<'a> {
    resolver: MetadataResolver<'a>,
    convention: KeyConvention,
}

impl<'a> EntityPopulator<'a> {
    pub fn new(registry: &'a SchemaRegistry, convention: KeyConvention) -> Self {
        Self {
            resolver: MetadataResolver::new(registry),
            convention,
        }
    }

    pub fn resolver(&self) -> &MetadataResolver<'a> {
        &self.resolver
    }

    /// Populates a root entity from both request namespaces, body first.
    pub fn populate_root<S: EntityStore + ?Sized>(
        &self,
        store: &mut S,
        source: &ValueSource,
        root: EntityHandle,
    ) -> PopulateResult<EntityHandle> {
        let entity_type = store.entity(root).entity_type.clone();
        log::info!("Populating root entity of type {}", entity_type);

        let values = source.merged();
        let handle = self
            .populate(store, Some(&values), Target::Instance(root), None)?
            .unwrap_or(root);

        log::info!("Finished populating root entity of type {}", entity_type);
        Ok(handle)
    }

    /// Populates `target` from `values`, recursing into relations.
    ///
    /// Returns `None` when there is nothing to populate or when the node was
    /// a removal directive. With a `parent`, the node may instead resolve to
    /// an existing entity (identifier present) which is then updated, or to
    /// an untouched lookup-table row.
    pub fn populate<S: EntityStore + ?Sized>(
        &self,
        store: &mut S,
        values: Option<&SubmittedValue>,
        target: Target<'_>,
        parent: Option<EntityHandle>,
    ) -> PopulateResult<Option<EntityHandle>> {
        let Some(values) = values.filter(|v| !v.is_null()) else {
            return Ok(None);
        };

        let entity_type = match target {
            Target::Type(name) => name.to_string(),
            Target::Instance(handle) => store.entity(handle).entity_type.clone(),
        };

        if parent.is_some() {
            if let Some(directive) = values.get(REMOVAL_KEY).filter(|v| v.is_truthy()) {
                self.remove_by_directive(store, &entity_type, directive)?;
                return Ok(None);
            }
        }

        let identifier = self.resolver.describe_identifier(&entity_type)?;
        let values = match values {
            // a bare scalar stands for the identifier of the related entity
            SubmittedValue::Scalar(raw) => Cow::Owned(SubmittedValue::Map(BTreeMap::from([(
                self.submitted_key(identifier),
                SubmittedValue::scalar(raw.clone()),
            )]))),
            other => Cow::Borrowed(other),
        };

        let mut back_reference = None;
        let handle = match parent {
            None => self.resolve_target(store, target),
            Some(parent) => {
                let handle = match self.identifier_value(&values, identifier) {
                    Some(raw) => {
                        let handle = self.load(store, &entity_type, identifier, raw)?;
                        if self.resolver.is_lookup(&entity_type)? {
                            log::debug!("Lookup entity {} #{} used as-is", entity_type, raw);
                            return Ok(Some(handle));
                        }
                        handle
                    }
                    None => {
                        log::debug!("Creating {} to be populated", entity_type);
                        self.resolve_target(store, target)
                    }
                };
                back_reference = self.link_parent(store, handle, parent)?;
                handle
            }
        };

        self.populate_attributes(store, handle, &values, back_reference.as_deref())?;
        store.register(handle);
        Ok(Some(handle))
    }

    /// Soft-deletes the entity when its type supports it, otherwise stages a
    /// hard delete.
    pub fn mark_for_removal<S: EntityStore + ?Sized>(
        &self,
        store: &mut S,
        handle: EntityHandle,
    ) -> PopulateResult<()> {
        let (entity_type, id) = {
            let entity = store.entity(handle);
            (entity.entity_type.clone(), entity.id)
        };

        let Some(soft) = self.resolver.soft_delete(&entity_type)? else {
            log::debug!("Removing {} #{:?}", entity_type, id);
            store.remove(handle);
            return Ok(());
        };

        let entity = store.entity_mut(handle);
        match soft.kind {
            SoftDeleteKind::StatusTuple => {
                let status = entity.get(&soft.attribute).and_then(|v| v.as_integer());
                if status == Some(PROTECTED_STATUS) {
                    return Err(NotRemovableError {
                        entity_type,
                        id: id.unwrap_or_default(),
                    }
                    .into());
                }
                entity.set(&soft.attribute, AttributeValue::Integer(INACTIVE_STATUS));
            }
            SoftDeleteKind::ActiveFlag => {
                entity.set(&soft.attribute, AttributeValue::Bool(false));
            }
        }
        log::debug!("Soft-deleted {} #{:?} through {}", entity_type, id, soft.attribute);
        store.register(handle);
        Ok(())
    }

    fn resolve_target<S: EntityStore + ?Sized>(&self, store: &mut S, target: Target<'_>) -> EntityHandle {
        match target {
            Target::Instance(handle) => handle,
            Target::Type(name) => store.create(name),
        }
    }

    fn remove_by_directive<S: EntityStore + ?Sized>(
        &self,
        store: &mut S,
        entity_type: &str,
        directive: &SubmittedValue,
    ) -> PopulateResult<()> {
        let raw = directive.as_scalar().unwrap_or_default();
        let id = parse_id(raw).ok_or_else(|| {
            SchemaMismatchError::new(entity_type, REMOVAL_KEY, format!("invalid identifier {:?}", raw))
        })?;

        match store.find(entity_type, id)? {
            Some(handle) => {
                log::info!("Marking {} #{} for removal", entity_type, id);
                self.mark_for_removal(store, handle)
            }
            None => {
                log::warn!("{} #{} was submitted for removal but does not exist", entity_type, id);
                Ok(())
            }
        }
    }

    /// Submitted value for `attribute`, trying each accepted key spelling.
    fn lookup<'v>(&self, values: &'v SubmittedValue, attribute: &str) -> Option<&'v SubmittedValue> {
        self.convention
            .candidates(attribute)
            .iter()
            .find_map(|key| values.get(key).filter(|v| !v.is_null()))
    }

    /// Spelling under which a copied entry is found again by `lookup`.
    fn submitted_key(&self, attribute: &str) -> String {
        self.convention
            .candidates(attribute)
            .into_iter()
            .next()
            .unwrap_or_else(|| attribute.to_string())
    }

    fn identifier_value<'v>(&self, values: &'v SubmittedValue, identifier: &str) -> Option<&'v str> {
        self.lookup(values, identifier)
            .and_then(|v| v.as_scalar())
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
    }

    fn load<S: EntityStore + ?Sized>(
        &self,
        store: &mut S,
        entity_type: &str,
        identifier: &str,
        raw: &str,
    ) -> PopulateResult<EntityHandle> {
        let id = parse_id(raw).ok_or_else(|| {
            SchemaMismatchError::new(entity_type, identifier, format!("invalid identifier {:?}", raw))
        })?;
        match store.find(entity_type, id)? {
            Some(handle) => Ok(handle),
            None => {
                log::error!("{} #{} does not exist, check the mapping", entity_type, id);
                Err(SchemaMismatchError::new(
                    entity_type,
                    identifier,
                    format!("no row with identifier {}", id),
                )
                .into())
            }
        }
    }

    /// Points the child back at its parent and returns the attribute used.
    fn link_parent<S: EntityStore + ?Sized>(
        &self,
        store: &mut S,
        child: EntityHandle,
        parent: EntityHandle,
    ) -> PopulateResult<Option<String>> {
        let parent_type = store.entity(parent).entity_type.clone();
        let child_type = store.entity(child).entity_type.clone();
        let Some(attr) = self.resolver.back_reference(&child_type, &parent_type)? else {
            return Ok(None);
        };

        let to_many = matches!(
            attr.kind.descriptor(),
            AttributeDescriptor::Relation(rel) if rel.kind.is_collection()
        );
        if !to_many {
            store
                .entity_mut(child)
                .set(&attr.name, AttributeValue::Reference(parent));
        }
        Ok(Some(attr.name.clone()))
    }

    fn populate_attributes<S: EntityStore + ?Sized>(
        &self,
        store: &mut S,
        handle: EntityHandle,
        values: &SubmittedValue,
        back_reference: Option<&str>,
    ) -> PopulateResult<()> {
        let entity_type = store.entity(handle).entity_type.clone();

        for attr in self.resolver.attributes(&entity_type)? {
            if back_reference == Some(attr.name.as_str()) {
                continue;
            }
            let Some(raw) = self.lookup(values, &attr.name) else {
                continue;
            };
            log::debug!("Populating {}::{}", entity_type, attr.name);

            match attr.kind.descriptor() {
                AttributeDescriptor::Scalar(kind) => {
                    let value = coerce_scalar(kind, raw).map_err(|reason| PopulationError {
                        entity_type: entity_type.clone(),
                        attribute: attr.name.clone(),
                        value: display_value(raw),
                        reason,
                    })?;
                    store.entity_mut(handle).set(&attr.name, value);
                }
                AttributeDescriptor::Relation(rel) => {
                    self.populate_relation(store, handle, attr, &rel, raw)?;
                }
            }
        }
        Ok(())
    }

    fn populate_relation<S: EntityStore + ?Sized>(
        &self,
        store: &mut S,
        owner: EntityHandle,
        attr: &AttributeDef,
        rel: &RelationDescriptor,
        raw: &SubmittedValue,
    ) -> PopulateResult<()> {
        match rel.kind {
            RelationKind::Collection | RelationKind::ManyToMany => {
                self.populate_collection(store, owner, attr, rel, raw)
            }
            RelationKind::Nested => {
                if !matches!(raw, SubmittedValue::Map(_)) {
                    log::warn!("{} expects a nested map, ignoring submitted value", attr.name);
                    return Ok(());
                }
                let child = self.populate(store, Some(raw), Target::Type(&rel.target), Some(owner))?;
                self.set_reference(store, owner, &attr.name, child);
                Ok(())
            }
            RelationKind::OneToOne => {
                let identifier = self.resolver.describe_identifier(&rel.target)?;
                let directive = self.lookup(raw, identifier).is_some()
                    || raw.get(REMOVAL_KEY).is_some_and(|v| !v.is_null());
                if !directive {
                    log::debug!(
                        "No identifier submitted for one-to-one {}, keeping current value",
                        attr.name
                    );
                    return Ok(());
                }
                let child = self.populate(store, Some(raw), Target::Type(&rel.target), Some(owner))?;
                self.set_reference(store, owner, &attr.name, child);
                Ok(())
            }
            RelationKind::ManyToOne => {
                let identifier = self.resolver.describe_identifier(&rel.target)?;
                let submitted_id = match raw {
                    SubmittedValue::Map(_) => {
                        self.lookup(raw, identifier).or_else(|| raw.get("id"))
                    }
                    other => Some(other),
                }
                .and_then(|v| v.as_scalar())
                .map(str::trim)
                .filter(|id| !id.is_empty());

                let value = match submitted_id {
                    Some(id) => {
                        AttributeValue::Reference(self.load(store, &rel.target, identifier, id)?)
                    }
                    None => AttributeValue::Null,
                };
                store.entity_mut(owner).set(&attr.name, value);
                Ok(())
            }
        }
    }

    fn populate_collection<S: EntityStore + ?Sized>(
        &self,
        store: &mut S,
        owner: EntityHandle,
        attr: &AttributeDef,
        rel: &RelationDescriptor,
        raw: &SubmittedValue,
    ) -> PopulateResult<()> {
        let Some(elements) = raw.indexed_elements() else {
            log::warn!(
                "Collection {} was submitted without sequential indexes, skipping",
                attr.name
            );
            return Ok(());
        };

        let identifier = self.resolver.describe_identifier(&rel.target)?;
        let join_key = MetadataResolver::join_key(rel);

        for element in elements {
            // many-to-many elements carry the foreign key under the join column
            let element = match join_key.as_deref().and_then(|key| self.lookup(element, key)) {
                Some(foreign_key) => Cow::Owned(
                    element.with_entry(&self.submitted_key(identifier), foreign_key.clone()),
                ),
                None => Cow::Borrowed(element),
            };

            let child = self.populate(
                store,
                Some(element.as_ref()),
                Target::Type(&rel.target),
                Some(owner),
            )?;
            if let Some(child) = child {
                store.entity_mut(owner).add_to_collection(&attr.name, child);
            }
        }
        Ok(())
    }

    fn set_reference<S: EntityStore + ?Sized>(
        &self,
        store: &mut S,
        owner: EntityHandle,
        attribute: &str,
        child: Option<EntityHandle>,
    ) {
        let value = match child {
            Some(child) => AttributeValue::Reference(child),
            None => AttributeValue::Null,
        };
        store.entity_mut(owner).set(attribute, value);
    }
}

fn display_value(value: &SubmittedValue) -> String {
    value
        .as_scalar()
        .map(str::to_string)
        .unwrap_or_else(|| value.to_json().to_string())
}

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{AttributeValue, Entity, EntityHandle, Id, SchemaRegistry};
use crate::store::traits::*;

/// Relation hops from a looked-up entity that are hydrated along with it.
const HYDRATION_DEPTH: usize = 2;

/// Tracks the entities touched by one request and writes them in one go.
///
/// References are followed through the identity map, so every `(type, id)`
/// pair maps to exactly one handle. Entities further than
/// [`HYDRATION_DEPTH`] hops from the one looked up are tracked unloaded and
/// hydrated once `find` reaches them.
pub struct UnitOfWork<'r, R: Repository + ?Sized> {
    id: Uuid,
    repository: &'r R,
    registry: &'r SchemaRegistry,
    entities: Vec<Entity>,
    identity: HashMap<(String, Id), EntityHandle>,
    registered: Vec<EntityHandle>,
    removed: HashSet<EntityHandle>,
    unloaded: HashSet<EntityHandle>,
}

impl<'r, R: Repository + ?Sized> UnitOfWork<'r, R> {
    pub fn new(repository: &'r R, registry: &'r SchemaRegistry) -> Self {
        let id = Uuid::new_v4();
        log::debug!("Opened unit of work {}", id);
        Self {
            id,
            repository,
            registry,
            entities: Vec::new(),
            identity: HashMap::new(),
            registered: Vec::new(),
            removed: HashSet::new(),
            unloaded: HashSet::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn registry(&self) -> &'r SchemaRegistry {
        self.registry
    }

    pub fn is_registered(&self, handle: EntityHandle) -> bool {
        self.registered.contains(&handle)
    }

    /// Number of entities loaded or created so far.
    pub fn tracked_count(&self) -> usize {
        self.entities.len()
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.registered.is_empty() || !self.removed.is_empty()
    }

    fn track(&mut self, entity: Entity) -> EntityHandle {
        let handle = EntityHandle(self.entities.len());
        if let Some(id) = entity.id {
            self.identity.insert((entity.entity_type.clone(), id), handle);
        }
        self.entities.push(entity);
        handle
    }

    /// Handle for a stored row reached `depth` hops from a lookup.
    fn resolve(
        &mut self,
        entity_type: &str,
        id: Id,
        depth: usize,
    ) -> Result<Option<EntityHandle>, StoreError> {
        if let Some(handle) = self.identity.get(&(entity_type.to_string(), id)).copied() {
            if depth < HYDRATION_DEPTH && self.unloaded.remove(&handle) {
                if let Some(row) = self.repository.load(entity_type, id)? {
                    self.hydrate(handle, row, depth)?;
                }
            }
            return Ok(Some(handle));
        }
        let Some(row) = self.repository.load(entity_type, id)? else {
            return Ok(None);
        };

        // tracked before hydration so cycles resolve to this handle
        let handle = self.track(Entity::with_id(entity_type, id));
        if depth < HYDRATION_DEPTH {
            self.hydrate(handle, row, depth)?;
            log::debug!("[{}] loaded {} #{}", self.id, entity_type, id);
        } else {
            self.unloaded.insert(handle);
        }
        Ok(Some(handle))
    }

    fn hydrate(&mut self, handle: EntityHandle, row: Row, depth: usize) -> Result<(), StoreError> {
        let entity_type = self.entities[handle.0].entity_type.clone();
        let registry = self.registry;
        let def = registry
            .get(&entity_type)
            .ok_or_else(|| StoreError::UnknownEntity(entity_type.clone()))?;

        for attr in &def.attributes {
            let Some(stored) = row.get(&attr.name) else {
                continue;
            };
            let value = match (stored, attr.kind.target()) {
                (StoredValue::Reference(RowRef::Id(id)), Some(target)) => self
                    .resolve(target, *id, depth + 1)?
                    .map(AttributeValue::Reference)
                    .unwrap_or(AttributeValue::Null),
                (StoredValue::References(refs), Some(target)) => {
                    let mut handles = Vec::with_capacity(refs.len());
                    for r in refs {
                        if let RowRef::Id(id) = r {
                            if let Some(h) = self.resolve(target, *id, depth + 1)? {
                                handles.push(h);
                            }
                        }
                    }
                    AttributeValue::Collection(handles)
                }
                (stored, _) => stored.to_scalar().unwrap_or(AttributeValue::Null),
            };
            self.entities[handle.0].set(&attr.name, value);
        }
        Ok(())
    }

    /// Stored form of a related entity, if it will exist after commit.
    fn row_ref(&self, handle: EntityHandle, pending: &HashMap<EntityHandle, usize>) -> Option<RowRef> {
        if self.removed.contains(&handle) {
            return None;
        }
        match self.entities[handle.0].id {
            Some(id) => Some(RowRef::Id(id)),
            None => pending.get(&handle).map(|k| RowRef::Pending(*k)),
        }
    }

    fn row_values(&self, entity: &Entity, pending: &HashMap<EntityHandle, usize>) -> Row {
        entity
            .attributes()
            .map(|(name, value)| {
                let stored = match value {
                    AttributeValue::Reference(h) => self
                        .row_ref(*h, pending)
                        .map(StoredValue::Reference)
                        .unwrap_or(StoredValue::Null),
                    AttributeValue::Collection(items) => StoredValue::References(
                        items.iter().filter_map(|h| self.row_ref(*h, pending)).collect(),
                    ),
                    scalar => StoredValue::from_scalar(scalar).unwrap_or(StoredValue::Null),
                };
                (name.clone(), stored)
            })
            .collect()
    }

    fn references_removed(&self, entity: &Entity) -> bool {
        entity.attributes().any(|(_, value)| match value {
            AttributeValue::Reference(h) => self.removed.contains(h),
            AttributeValue::Collection(items) => items.iter().any(|h| self.removed.contains(h)),
            _ => false,
        })
    }

    fn build_change_set(&self) -> (ChangeSet, HashMap<EntityHandle, usize>) {
        let mut writes_for = self
            .registered
            .iter()
            .copied()
            .filter(|h| !self.removed.contains(h))
            .collect::<Vec<_>>();

        // persisted entities still pointing at removed ones are rewritten too
        if !self.removed.is_empty() {
            for (index, entity) in self.entities.iter().enumerate() {
                let handle = EntityHandle(index);
                if !entity.is_new()
                    && !self.removed.contains(&handle)
                    && !writes_for.contains(&handle)
                    && self.references_removed(entity)
                {
                    writes_for.push(handle);
                }
            }
        }

        let pending = writes_for
            .iter()
            .filter(|h| self.entities[h.0].is_new())
            .enumerate()
            .map(|(k, h)| (*h, k))
            .collect::<HashMap<_, _>>();

        let writes = writes_for
            .iter()
            .map(|h| {
                let entity = &self.entities[h.0];
                RowWrite {
                    entity_type: entity.entity_type.clone(),
                    key: match entity.id {
                        Some(id) => RowRef::Id(id),
                        None => RowRef::Pending(pending[h]),
                    },
                    values: self.row_values(entity, &pending),
                }
            })
            .collect();

        let mut deletes = self
            .removed
            .iter()
            .filter_map(|h| {
                let entity = &self.entities[h.0];
                entity.id.map(|id| (entity.entity_type.clone(), id))
            })
            .collect::<Vec<_>>();
        deletes.sort();

        (ChangeSet { writes, deletes }, pending)
    }
}

impl<'r, R: Repository + ?Sized> EntityStore for UnitOfWork<'r, R> {
    fn find(&mut self, entity_type: &str, id: Id) -> Result<Option<EntityHandle>, StoreError> {
        self.resolve(entity_type, id, 0)
    }

    fn create(&mut self, entity_type: &str) -> EntityHandle {
        self.track(Entity::new(entity_type))
    }

    fn entity(&self, handle: EntityHandle) -> &Entity {
        &self.entities[handle.0]
    }

    fn entity_mut(&mut self, handle: EntityHandle) -> &mut Entity {
        &mut self.entities[handle.0]
    }

    fn register(&mut self, handle: EntityHandle) {
        if !self.registered.contains(&handle) {
            self.registered.push(handle);
        }
    }

    fn remove(&mut self, handle: EntityHandle) {
        self.removed.insert(handle);
    }

    fn is_removed(&self, handle: EntityHandle) -> bool {
        self.removed.contains(&handle)
    }

    fn is_loaded(&self, handle: EntityHandle) -> bool {
        !self.unloaded.contains(&handle)
    }

    fn commit(&mut self) -> Result<CommitSummary, StoreError> {
        let (changes, pending) = self.build_change_set();
        if changes.is_empty() {
            self.registered.clear();
            return Ok(CommitSummary::default());
        }

        let applied = self.repository.apply(changes)?;

        for (handle, k) in pending {
            if let Some(id) = applied.assigned.get(&k) {
                let entity = &mut self.entities[handle.0];
                entity.id = Some(*id);
                self.identity.insert((entity.entity_type.clone(), *id), handle);
            }
        }
        for handle in self.removed.drain() {
            let entity = &self.entities[handle.0];
            if let Some(id) = entity.id {
                self.identity.remove(&(entity.entity_type.clone(), id));
            }
        }
        self.registered.clear();

        let summary = CommitSummary {
            inserted: applied.assigned.len(),
            updated: applied.updated,
            deleted: applied.deleted,
        };
        log::info!(
            "[{}] committed: {} inserted, {} updated, {} deleted",
            self.id,
            summary.inserted,
            summary.updated,
            summary.deleted
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeDef, EntityTypeDef};
    use crate::store::MemoryRepository;
    use std::sync::Arc;

    fn setup() -> MemoryRepository {
        let registry = SchemaRegistry::new(vec![
            EntityTypeDef::new("Invoice")
                .attribute(AttributeDef::text("number").unique())
                .attribute(AttributeDef::collection("lines", "Line")),
            EntityTypeDef::new("Line")
                .attribute(AttributeDef::text("description"))
                .attribute(AttributeDef::many_to_one("invoice", "Invoice")),
        ])
        .unwrap();
        MemoryRepository::new(Arc::new(registry))
    }

    fn seed_invoice(repo: &MemoryRepository) -> (Id, Id) {
        let registry = repo.registry().clone();
        let mut uow = UnitOfWork::new(repo, &registry);
        let invoice = uow.create("Invoice");
        let line = uow.create("Line");
        uow.entity_mut(invoice).set("number", AttributeValue::Text("INV-1".into()));
        uow.entity_mut(invoice).add_to_collection("lines", line);
        uow.entity_mut(line).set("invoice", AttributeValue::Reference(invoice));
        uow.register(line);
        uow.register(invoice);
        let summary = uow.commit().unwrap();
        assert_eq!(summary.inserted, 2);
        (
            uow.entity(invoice).id.unwrap(),
            uow.entity(line).id.unwrap(),
        )
    }

    #[test]
    fn test_cyclic_graph_hydrates_through_identity_map() {
        let repo = setup();
        let (invoice_id, line_id) = seed_invoice(&repo);
        let registry = repo.registry().clone();

        let mut uow = UnitOfWork::new(&repo, &registry);
        let invoice = uow.find("Invoice", invoice_id).unwrap().unwrap();
        let line = uow.find("Line", line_id).unwrap().unwrap();

        assert_eq!(
            uow.entity(invoice).get("lines").and_then(|v| v.as_collection()),
            Some(&[line][..])
        );
        assert_eq!(
            uow.entity(line).get("invoice").and_then(|v| v.as_reference()),
            Some(invoice)
        );
        assert!(uow.find("Invoice", 99).unwrap().is_none());
    }

    #[test]
    fn test_removed_entity_is_dropped_from_referencing_rows() {
        let repo = setup();
        let (invoice_id, line_id) = seed_invoice(&repo);
        let registry = repo.registry().clone();

        let mut uow = UnitOfWork::new(&repo, &registry);
        let line = uow.find("Line", line_id).unwrap().unwrap();
        uow.remove(line);
        let summary = uow.commit().unwrap();

        assert_eq!(summary.deleted, 1);
        assert!(repo.load("Line", line_id).unwrap().is_none());
        let invoice = repo.load("Invoice", invoice_id).unwrap().unwrap();
        assert_eq!(invoice.get("lines"), Some(&StoredValue::References(vec![])));
    }

    #[test]
    fn test_nothing_is_written_before_commit() {
        let repo = setup();
        let registry = repo.registry().clone();

        let mut uow = UnitOfWork::new(&repo, &registry);
        let invoice = uow.create("Invoice");
        uow.entity_mut(invoice).set("number", AttributeValue::Text("INV-9".into()));
        uow.register(invoice);
        assert!(uow.has_pending_changes());
        assert_eq!(repo.count("Invoice"), 0);
        drop(uow);
        assert_eq!(repo.count("Invoice"), 0);
    }

    #[test]
    fn test_failed_commit_keeps_repository_unchanged() {
        let repo = setup();
        seed_invoice(&repo);
        let registry = repo.registry().clone();

        let mut uow = UnitOfWork::new(&repo, &registry);
        let duplicate = uow.create("Invoice");
        let line = uow.create("Line");
        uow.entity_mut(duplicate).set("number", AttributeValue::Text("INV-1".into()));
        uow.entity_mut(duplicate).add_to_collection("lines", line);
        uow.register(line);
        uow.register(duplicate);

        assert!(matches!(uow.commit(), Err(StoreError::UniqueViolation { .. })));
        assert_eq!(repo.count("Invoice"), 1);
        assert_eq!(repo.count("Line"), 1);
        assert!(uow.entity(duplicate).is_new());
    }

    #[test]
    fn test_hydration_stops_at_depth_and_resumes_on_find() {
        let registry = SchemaRegistry::new(vec![EntityTypeDef::new("Node")
            .attribute(AttributeDef::text("label"))
            .attribute(AttributeDef::many_to_one("next", "Node"))])
        .unwrap();
        let repo = MemoryRepository::new(Arc::new(registry));
        let mut next = None;
        for label in ["e", "d", "c", "b", "a"] {
            let mut row = Row::new();
            row.insert("label".into(), StoredValue::Text(label.into()));
            if let Some(id) = next {
                row.insert("next".into(), StoredValue::Reference(RowRef::Id(id)));
            }
            next = Some(repo.insert("Node", row).unwrap());
        }
        // a(5) -> b(4) -> c(3) -> d(2) -> e(1)
        let registry = repo.registry().clone();
        let mut uow = UnitOfWork::new(&repo, &registry);

        let a = uow.find("Node", 5).unwrap().unwrap();
        let b = uow.entity(a).get("next").and_then(|v| v.as_reference()).unwrap();
        let c = uow.entity(b).get("next").and_then(|v| v.as_reference()).unwrap();
        assert_eq!(uow.tracked_count(), 3);
        assert!(uow.is_loaded(b));
        assert!(!uow.is_loaded(c));
        assert_eq!(uow.entity(c).id, Some(3));
        assert!(uow.entity(c).get("label").is_none());

        assert_eq!(uow.find("Node", 3).unwrap(), Some(c));
        assert!(uow.is_loaded(c));
        assert_eq!(
            uow.entity(c).get("label").and_then(|v| v.as_text()),
            Some("c")
        );
        assert_eq!(uow.tracked_count(), 5);

        // an untouched stub keeps its stored row
        let mut uow = UnitOfWork::new(&repo, &registry);
        let a = uow.find("Node", 5).unwrap().unwrap();
        uow.entity_mut(a).set("label", AttributeValue::Text("A".into()));
        uow.register(a);
        uow.commit().unwrap();
        let stored = repo.load("Node", 3).unwrap().unwrap();
        assert_eq!(stored.get("label"), Some(&StoredValue::Text("c".into())));
        assert_eq!(stored.get("next"), Some(&StoredValue::Reference(RowRef::Id(2))));
    }
}

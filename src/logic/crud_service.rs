//! Save, remove, view and search pipeline for one root entity type.
//!
//! Every call opens its own unit of work. A save runs, in this order:
//! `pre_save`, root resolution, population, unique check, `validate`,
//! `verify`, `handle_uploads`, commit and `post_save`. Hooks report problems
//! by adding to an [`ErrorList`]; the first stage that leaves errors behind
//! aborts the save before anything is written.

use serde_json::Value;
use std::sync::Arc;

use crate::error::{ErrorList, PopulateError, ServiceError, ServiceResult, StoreError};
use crate::logic::populate::EntityPopulator;
use crate::logic::resolver::MetadataResolver;
use crate::logic::search::{GridResponse, SearchRequest};
use crate::logic::view::{empty_template, entity_to_json};
use crate::model::{
    parse_id, Entity, EntityHandle, EntityTypeDef, Id, KeyConvention, SchemaRegistry, ValueSource,
};
use crate::store::{CommitSummary, EntityStore, Repository, StoredValue, UnitOfWork};

/// State handed to hooks while a save is in progress.
pub struct SaveContext<'c> {
    pub entity_type: &'c str,
    pub source: &'c ValueSource,
    pub store: &'c dyn EntityStore,
    pub root: EntityHandle,
}

impl<'c> SaveContext<'c> {
    pub fn root(&self) -> &Entity {
        self.store.entity(self.root)
    }

    pub fn entity(&self, handle: EntityHandle) -> &Entity {
        self.store.entity(handle)
    }
}

/// Per-type customization points of [`EntityService`].
///
/// Every method has a permissive no-op default.
pub trait ServiceHooks: Send + Sync {
    /// Cleans submitted data before anything else runs (masks, formatting).
    fn pre_save(&self, _source: &mut ValueSource) {}

    /// Data type and format rules.
    fn validate(&self, _ctx: &SaveContext<'_>, _errors: &mut ErrorList) {}

    /// Business rules, possibly against already persisted data.
    fn verify(&self, _ctx: &SaveContext<'_>, _errors: &mut ErrorList) {}

    fn handle_uploads(&self, _ctx: &SaveContext<'_>, _errors: &mut ErrorList) {}

    /// Runs after a successful commit (notifications, audit trails).
    fn post_save(&self, _entity_type: &str, _id: Id) {}

    fn can_view(&self, _id: Id) -> bool {
        true
    }

    fn can_edit(&self, _id: Option<Id>) -> bool {
        true
    }

    fn can_delete(&self, _id: Id) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl ServiceHooks for DefaultHooks {}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct SaveOutcome {
    pub id: Id,
    pub created: bool,
    pub changes: CommitSummary,
}

pub struct EntityService<R: Repository + ?Sized> {
    entity_type: String,
    registry: Arc<SchemaRegistry>,
    repository: Arc<R>,
    hooks: Arc<dyn ServiceHooks>,
    convention: KeyConvention,
    id_key: String,
}

impl<R: Repository + ?Sized> EntityService<R> {
    pub fn new(
        entity_type: &str,
        registry: Arc<SchemaRegistry>,
        repository: Arc<R>,
    ) -> ServiceResult<Self> {
        let id_key = registry
            .get(entity_type)
            .map(|def| def.identifier.clone())
            .ok_or_else(|| ServiceError::UnknownType(entity_type.to_string()))?;
        Ok(Self {
            entity_type: entity_type.to_string(),
            registry,
            repository,
            hooks: Arc::new(DefaultHooks),
            convention: KeyConvention::default(),
            id_key,
        })
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ServiceHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_convention(mut self, convention: KeyConvention) -> Self {
        self.convention = convention;
        self
    }

    /// Request key carrying the root identifier; the type's identifier by default.
    pub fn with_id_key(mut self, id_key: &str) -> Self {
        self.id_key = id_key.to_string();
        self
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn schema(&self) -> ServiceResult<&EntityTypeDef> {
        self.registry
            .get(&self.entity_type)
            .ok_or_else(|| ServiceError::UnknownType(self.entity_type.clone()))
    }

    fn resolver(&self) -> MetadataResolver<'_> {
        MetadataResolver::new(&self.registry)
    }

    fn not_found(&self, id: Id) -> ServiceError {
        ServiceError::NotFound {
            entity_type: self.entity_type.clone(),
            id,
        }
    }

    fn mapping_error(&self, err: PopulateError) -> ServiceError {
        if err.is_mapping_error() {
            log::error!("Mapping error while populating {}: {}", self.entity_type, err);
        }
        err.into()
    }

    fn root_id(&self, source: &ValueSource) -> ServiceResult<Option<Id>> {
        let raw = source
            .get(&self.id_key)
            .and_then(|v| v.as_scalar())
            .map(str::trim)
            .unwrap_or_default();
        if raw.is_empty() {
            return Ok(None);
        }
        parse_id(raw).map(Some).ok_or_else(|| {
            ServiceError::Mapping(
                crate::error::SchemaMismatchError::new(
                    &self.entity_type,
                    &self.id_key,
                    format!("invalid identifier {:?}", raw),
                )
                .into(),
            )
        })
    }

    fn load_root(&self, uow: &mut UnitOfWork<'_, R>, id: Id) -> ServiceResult<EntityHandle> {
        uow.find(&self.entity_type, id)?
            .ok_or_else(|| self.not_found(id))
    }

    /// Runs the full save pipeline and returns the root identifier.
    pub fn save(&self, mut source: ValueSource) -> ServiceResult<SaveOutcome> {
        self.hooks.pre_save(&mut source);

        let root_id = self.root_id(&source)?;
        if !self.hooks.can_edit(root_id) {
            return Err(ServiceError::Forbidden {
                entity_type: self.entity_type.clone(),
            });
        }

        let mut uow = UnitOfWork::new(self.repository.as_ref(), &self.registry);
        let root = match root_id {
            Some(id) => self.load_root(&mut uow, id)?,
            None => uow.create(&self.entity_type),
        };
        uow.register(root);

        EntityPopulator::new(&self.registry, self.convention)
            .populate_root(&mut uow, &source, root)
            .map_err(|e| self.mapping_error(e))?;

        let mut errors = ErrorList::new();
        self.check_unique(&uow, root, &mut errors)?;
        if !errors.is_empty() {
            return Err(ServiceError::Unique(errors));
        }

        {
            let ctx = SaveContext {
                entity_type: &self.entity_type,
                source: &source,
                store: &uow,
                root,
            };
            self.hooks.validate(&ctx, &mut errors);
            if !errors.is_empty() {
                return Err(ServiceError::Validation(errors));
            }
            self.hooks.verify(&ctx, &mut errors);
            if !errors.is_empty() {
                return Err(ServiceError::Verification(errors));
            }
            self.hooks.handle_uploads(&ctx, &mut errors);
            if !errors.is_empty() {
                return Err(ServiceError::Upload(errors));
            }
        }

        let changes = uow.commit()?;
        let id = committed_id(uow.entity(root))?;
        self.hooks.post_save(&self.entity_type, id);

        log::info!("Saved {} #{} (unit of work {})", self.entity_type, id, uow.id());
        Ok(SaveOutcome {
            id,
            created: root_id.is_none(),
            changes,
        })
    }

    /// Unique attributes of the root must not collide with another row.
    fn check_unique(
        &self,
        uow: &UnitOfWork<'_, R>,
        root: EntityHandle,
        errors: &mut ErrorList,
    ) -> ServiceResult<()> {
        let entity = uow.entity(root);
        for attr in self.schema()?.attributes.iter().filter(|a| a.unique) {
            let Some(value) = entity
                .get(&attr.name)
                .and_then(StoredValue::from_scalar)
                .filter(|v| !v.is_null())
            else {
                continue;
            };
            let clashes = self
                .repository
                .find_by_value(&self.entity_type, &attr.name, &value)?
                .into_iter()
                .any(|id| Some(id) != entity.id);
            if clashes {
                errors.add(
                    "verification",
                    format!("A record with the given {} already exists.", attr.label()),
                );
            }
        }
        Ok(())
    }

    /// Soft-deletes the root when its type supports it, removes it otherwise.
    pub fn remove_entity(&self, id: Id) -> ServiceResult<()> {
        if !self.hooks.can_delete(id) {
            return Err(ServiceError::Forbidden {
                entity_type: self.entity_type.clone(),
            });
        }

        let mut uow = UnitOfWork::new(self.repository.as_ref(), &self.registry);
        let root = self.load_root(&mut uow, id)?;
        EntityPopulator::new(&self.registry, self.convention)
            .mark_for_removal(&mut uow, root)
            .map_err(|e| self.mapping_error(e))?;
        uow.commit()?;

        log::info!("Removed {} #{}", self.entity_type, id);
        Ok(())
    }

    pub fn entity_data(&self, id: Id) -> ServiceResult<Value> {
        if !self.hooks.can_view(id) {
            return Err(ServiceError::Forbidden {
                entity_type: self.entity_type.clone(),
            });
        }

        let mut uow = UnitOfWork::new(self.repository.as_ref(), &self.registry);
        let root = self.load_root(&mut uow, id)?;
        entity_to_json(&self.resolver(), &uow, root)
            .map_err(|e| ServiceError::Mapping(e.into()))
    }

    pub fn new_entity_data(&self) -> ServiceResult<Value> {
        empty_template(&self.resolver(), &self.entity_type)
            .map_err(|e| ServiceError::Mapping(e.into()))
    }

    pub fn search(&self, source: &ValueSource) -> ServiceResult<GridResponse> {
        let request = SearchRequest::from_source(source);
        let criteria = request
            .criteria(&self.resolver(), &self.entity_type)
            .map_err(|e| ServiceError::Mapping(e.into()))?;
        let page = self.repository.search(&self.entity_type, &criteria)?;
        Ok(GridResponse::new(&request, &self.schema()?.identifier, page))
    }
}

/// Identifier a committed entity was written under.
fn committed_id(entity: &Entity) -> Result<Id, StoreError> {
    entity
        .id
        .ok_or_else(|| StoreError::NotPersisted(entity.entity_type.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SubmittedValue;
    use crate::seed::{demo_registry, load_seed_data};
    use crate::store::MemoryRepository;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> (Arc<SchemaRegistry>, Arc<MemoryRepository>) {
        let registry = Arc::new(demo_registry().unwrap());
        let repository = Arc::new(MemoryRepository::new(registry.clone()));
        load_seed_data(repository.as_ref()).unwrap();
        (registry, repository)
    }

    fn service(entity_type: &str) -> (EntityService<MemoryRepository>, Arc<MemoryRepository>) {
        let (registry, repository) = setup();
        (
            EntityService::new(entity_type, registry, repository.clone()).unwrap(),
            repository,
        )
    }

    fn body(value: Value) -> ValueSource {
        ValueSource::from_body(SubmittedValue::from_json(&value))
    }

    struct InvoiceRules {
        post_saves: AtomicUsize,
    }

    impl ServiceHooks for InvoiceRules {
        fn pre_save(&self, source: &mut ValueSource) {
            // strip the currency mask before coercion
            if let Some(total) = source.body.get("total").and_then(|v| v.as_scalar()) {
                let cleaned = total.trim_start_matches("R$").trim().to_string();
                source.body = source.body.with_entry("total", SubmittedValue::scalar(cleaned));
            }
        }

        fn validate(&self, ctx: &SaveContext<'_>, errors: &mut ErrorList) {
            if ctx.root().get("total").and_then(|v| v.as_decimal()).unwrap_or(0.0) < 0.0 {
                errors.add("validation", "total must not be negative");
            }
            if ctx.root().get("number").and_then(|v| v.as_text()) == Some("") {
                errors.add("validation", "number is required");
            }
        }

        fn verify(&self, ctx: &SaveContext<'_>, errors: &mut ErrorList) {
            let lines = ctx.root().get("lines").and_then(|v| v.as_collection()).unwrap_or(&[]);
            if lines.len() > 3 {
                errors.add("verification", "an invoice holds at most 3 lines");
            }
        }

        fn post_save(&self, _entity_type: &str, _id: Id) {
            self.post_saves.fetch_add(1, Ordering::SeqCst);
        }

        fn can_delete(&self, id: Id) -> bool {
            id != 99
        }
    }

    #[test]
    fn test_save_creates_root_with_nested_graph() {
        let (service, repository) = service("Invoice");
        let outcome = service
            .save(body(json!({
                "number": "INV-0002",
                "issued_at": "05/04/2024",
                "customer": "1",
                "status": {"id": "1"},
                "lines": [{"description": "Setup", "qty": "1", "unit_price": "1.500,00"}],
                "tags": [{"tagId": "2"}, {"tagId": "3"}]
            })))
            .unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.id, 2);
        assert_eq!(outcome.changes.inserted, 2);

        let view = service.entity_data(outcome.id).unwrap();
        assert_eq!(view["number"], json!("INV-0002"));
        assert_eq!(view["issuedAt"], json!("2024-04-05 00:00:00"));
        assert_eq!(view["customer"], json!(1));
        assert_eq!(view["lines"][0]["unitPrice"], json!(1500.0));
        assert_eq!(view["lines"][0]["invoice"], json!(2));
        assert_eq!(view["tags"].as_array().map(|t| t.len()), Some(2));
        assert_eq!(repository.count("InvoiceLine"), 3);
    }

    #[test]
    fn test_save_updates_existing_root() {
        let (service, repository) = service("Invoice");
        let outcome = service
            .save(body(json!({
                "id": "1",
                "paid": "1",
                "lines": {"0": {"id": "2", "qty": "3"}, "1": {"idDel": "1"}}
            })))
            .unwrap();

        assert!(!outcome.created);
        assert_eq!(outcome.id, 1);
        assert_eq!(outcome.changes.deleted, 1);

        let view = service.entity_data(1).unwrap();
        assert_eq!(view["paid"], json!(true));
        assert_eq!(view["number"], json!("INV-0001"));
        assert_eq!(view["lines"].as_array().map(|l| l.len()), Some(1));
        assert_eq!(view["lines"][0]["qty"], json!(3.0));
        assert!(repository.load("InvoiceLine", 1).unwrap().is_none());
    }

    #[test]
    fn test_missing_root_is_not_found() {
        let (service, _) = service("Invoice");
        let err = service.save(body(json!({"id": "42"}))).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { id: 42, .. }));
        assert!(matches!(
            service.entity_data(42),
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[test]
    fn test_unique_attributes_are_checked_before_commit() {
        let (service, repository) = service("Customer");
        let err = service
            .save(body(json!({"name": "Copy", "email": "ada@example.com"})))
            .unwrap_err();

        match err {
            ServiceError::Unique(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(
                    errors.joined(),
                    "A record with the given E-mail already exists."
                );
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(repository.count("Customer"), 2);

        // saving the owner of the value again is fine
        service
            .save(body(json!({"id": "1", "email": "ada@example.com"})))
            .unwrap();
    }

    #[test]
    fn test_hooks_run_in_order_and_abort_on_errors() {
        let (registry, repository) = setup();
        let rules = Arc::new(InvoiceRules {
            post_saves: AtomicUsize::new(0),
        });
        let service = EntityService::new("Invoice", registry, repository.clone())
            .unwrap()
            .with_hooks(rules.clone());

        let err = service
            .save(body(json!({"number": "", "total": "-1"})))
            .unwrap_err();
        match err {
            ServiceError::Validation(errors) => {
                assert_eq!(
                    errors.to_string(),
                    "total must not be negative|number is required"
                );
            }
            other => panic!("unexpected error {:?}", other),
        }

        let lines = (0..4).map(|i| json!({"description": format!("L{}", i)})).collect::<Vec<_>>();
        let err = service
            .save(body(json!({"number": "INV-9", "lines": lines})))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Verification(_)));
        assert_eq!(repository.count("Invoice"), 1);
        assert_eq!(rules.post_saves.load(Ordering::SeqCst), 0);

        let outcome = service
            .save(body(json!({"number": "INV-9", "total": "R$ 1.234,56"})))
            .unwrap();
        assert_eq!(rules.post_saves.load(Ordering::SeqCst), 1);
        let view = service.entity_data(outcome.id).unwrap();
        assert_eq!(view["total"], json!(1234.56));

        assert!(matches!(
            service.remove_entity(99),
            Err(ServiceError::Forbidden { .. })
        ));
    }

    #[test]
    fn test_required_attribute_surfaces_as_entity_error() {
        let (service, repository) = service("Customer");
        let err = service.save(body(json!({"email": "new@example.com"}))).unwrap_err();
        let errors = err.errors().expect("store failures carry an error list");
        assert!(errors.joined().contains("name"));
        assert_eq!(repository.count("Customer"), 2);
    }

    #[test]
    fn test_unpersisted_root_surfaces_as_entity_error() {
        let mut entity = Entity::new("Invoice");
        let err = ServiceError::from(committed_id(&entity).unwrap_err());
        match &err {
            ServiceError::Entity(errors) => {
                assert_eq!(errors.joined(), "Invoice was not assigned an identifier by the commit");
            }
            other => panic!("unexpected error {:?}", other),
        }

        entity.id = Some(7);
        assert_eq!(committed_id(&entity), Ok(7));
    }

    #[test]
    fn test_remove_entity() {
        let (customers, repository) = service("Customer");
        customers.remove_entity(1).unwrap();
        let row = repository.load("Customer", 1).unwrap().unwrap();
        assert_eq!(row.get("statusTuple"), Some(&StoredValue::Integer(0)));

        let err = customers.remove_entity(2).unwrap_err();
        assert!(matches!(err, ServiceError::NotRemovable(_)));
        let row = repository.load("Customer", 2).unwrap().unwrap();
        assert_eq!(row.get("statusTuple"), Some(&StoredValue::Integer(2)));

        let (registry, _) = setup();
        let lines = EntityService::new("InvoiceLine", registry, repository.clone()).unwrap();
        lines.remove_entity(1).unwrap();
        assert!(repository.load("InvoiceLine", 1).unwrap().is_none());
    }

    #[test]
    fn test_search_hides_soft_deleted_rows() {
        let (customers, _) = service("Customer");
        customers.remove_entity(1).unwrap();

        let grid = customers
            .search(&ValueSource::new(
                SubmittedValue::from_pairs(vec![("draw", "4")]),
                SubmittedValue::empty_map(),
            ))
            .unwrap();
        assert_eq!(grid.draw, 4);
        assert_eq!(grid.records_total, 1);
        assert_eq!(grid.data[0].g["name"], json!("Internal Billing"));
    }

    #[test]
    fn test_unknown_type_and_new_template() {
        let (registry, repository) = setup();
        assert!(matches!(
            EntityService::new("Nope", registry.clone(), repository.clone()),
            Err(ServiceError::UnknownType(_))
        ));
        let service = EntityService::new("Invoice", registry, repository).unwrap();
        let template = service.new_entity_data().unwrap();
        assert_eq!(template["lines"], json!([]));
    }
}

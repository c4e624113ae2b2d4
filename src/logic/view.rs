//! JSON views of entity graphs.

use serde_json::{json, Map, Value};

use crate::error::SchemaMismatchError;
use crate::logic::resolver::MetadataResolver;
use crate::model::{AttributeDescriptor, AttributeValue, EntityHandle, RelationKind};
use crate::store::{EntityStore, DATE_TIME_DISPLAY};

/// Serializes an entity and everything reachable from it.
///
/// To-one relations and collections are expanded into nested objects,
/// many-to-one relations are rendered as the related identifier. An entity
/// already being rendered higher up the tree, or one the store has not
/// loaded, is rendered as its identifier.
pub fn entity_to_json<S: EntityStore + ?Sized>(
    resolver: &MetadataResolver<'_>,
    store: &S,
    handle: EntityHandle,
) -> Result<Value, SchemaMismatchError> {
    let mut path = Vec::new();
    render(resolver, store, handle, &mut path)
}

fn render<S: EntityStore + ?Sized>(
    resolver: &MetadataResolver<'_>,
    store: &S,
    handle: EntityHandle,
    path: &mut Vec<EntityHandle>,
) -> Result<Value, SchemaMismatchError> {
    let entity = store.entity(handle);
    if path.contains(&handle) || !store.is_loaded(handle) {
        return Ok(json!(entity.id));
    }
    path.push(handle);

    let mut object = Map::new();
    object.insert(
        resolver.describe_identifier(&entity.entity_type)?.to_string(),
        json!(entity.id),
    );

    for attr in resolver.attributes(&entity.entity_type)? {
        let descriptor = attr.kind.descriptor();
        let value = match (entity.get(&attr.name), &descriptor) {
            (None, AttributeDescriptor::Relation(rel)) if rel.kind.is_collection() => json!([]),
            (None, _) => Value::Null,
            (Some(AttributeValue::Reference(related)), AttributeDescriptor::Relation(rel)) => {
                if rel.kind == RelationKind::ManyToOne || store.is_removed(*related) {
                    json!(store.entity(*related).id)
                } else {
                    render(resolver, store, *related, path)?
                }
            }
            (Some(AttributeValue::Collection(items)), _) => {
                let mut rendered = Vec::with_capacity(items.len());
                for item in items.iter().filter(|h| !store.is_removed(**h)) {
                    rendered.push(render(resolver, store, *item, path)?);
                }
                Value::Array(rendered)
            }
            (Some(value), _) => scalar_to_json(value),
        };
        object.insert(attr.name.clone(), value);
    }

    path.pop();
    Ok(Value::Object(object))
}

pub fn scalar_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Null => Value::Null,
        AttributeValue::Bool(v) => json!(v),
        AttributeValue::Integer(v) => json!(v),
        AttributeValue::Decimal(v) => json!(v),
        AttributeValue::Text(v) => json!(v),
        AttributeValue::DateTime(v) => json!(v.format(DATE_TIME_DISPLAY).to_string()),
        AttributeValue::Reference(_) | AttributeValue::Collection(_) => Value::Null,
    }
}

/// Blank form template for a new entity of `entity_type`.
pub fn empty_template(
    resolver: &MetadataResolver<'_>,
    entity_type: &str,
) -> Result<Value, SchemaMismatchError> {
    let mut object = Map::new();
    object.insert(resolver.describe_identifier(entity_type)?.to_string(), Value::Null);
    for attr in resolver.attributes(entity_type)? {
        let value = match attr.kind.descriptor() {
            AttributeDescriptor::Relation(rel) if rel.kind.is_collection() => json!([]),
            _ => Value::Null,
        };
        object.insert(attr.name.clone(), value);
    }
    Ok(Value::Object(object))
}

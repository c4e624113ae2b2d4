use crate::error::SchemaMismatchError;
use crate::model::{
    snake_to_camel, AttributeDef, AttributeDescriptor, EntityTypeDef,
    RelationDescriptor, RelationKind, SchemaRegistry, SoftDelete,
};

/// Answers questions about entity types from the static schema registry.
#[derive(Debug, Clone, Copy)]
pub struct MetadataResolver<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> MetadataResolver<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    pub fn entity_type(&self, entity_type: &str) -> Result<&'a EntityTypeDef, SchemaMismatchError> {
        self.registry
            .get(entity_type)
            .ok_or_else(|| SchemaMismatchError::unknown_type(entity_type))
    }

    pub fn attributes(&self, entity_type: &str) -> Result<&'a [AttributeDef], SchemaMismatchError> {
        Ok(&self.entity_type(entity_type)?.attributes)
    }

    /// Looks an attribute up by its camelCase or snake_case name.
    pub fn attribute(
        &self,
        entity_type: &str,
        attribute: &str,
    ) -> Result<&'a AttributeDef, SchemaMismatchError> {
        let def = self.entity_type(entity_type)?;
        def.get_attribute(attribute)
            .or_else(|| def.get_attribute(&snake_to_camel(attribute)))
            .ok_or_else(|| {
                SchemaMismatchError::new(entity_type, attribute, "no such attribute")
            })
    }

    pub fn describe_attribute(
        &self,
        entity_type: &str,
        attribute: &str,
    ) -> Result<AttributeDescriptor, SchemaMismatchError> {
        Ok(self.attribute(entity_type, attribute)?.kind.descriptor())
    }

    pub fn describe_identifier(&self, entity_type: &str) -> Result<&'a str, SchemaMismatchError> {
        Ok(&self.entity_type(entity_type)?.identifier)
    }

    pub fn soft_delete(&self, entity_type: &str) -> Result<Option<&'a SoftDelete>, SchemaMismatchError> {
        Ok(self.entity_type(entity_type)?.soft_delete.as_ref())
    }

    pub fn is_lookup(&self, entity_type: &str) -> Result<bool, SchemaMismatchError> {
        Ok(self.entity_type(entity_type)?.lookup)
    }

    /// The attribute of `child_type` that points back at `parent_type`.
    ///
    /// Attributes named `id<Parent>` or `<parent>` win; otherwise the first
    /// to-one relation targeting the parent, then any relation targeting it.
    pub fn back_reference(
        &self,
        child_type: &str,
        parent_type: &str,
    ) -> Result<Option<&'a AttributeDef>, SchemaMismatchError> {
        let child = self.entity_type(child_type)?;
        let targets_parent = |attr: &&AttributeDef| attr.kind.target() == Some(parent_type);

        let preferred = [format!("id{}", parent_type), lcfirst(parent_type)];
        if let Some(attr) = preferred
            .iter()
            .find_map(|name| child.get_attribute(name).filter(targets_parent))
        {
            return Ok(Some(attr));
        }

        let to_one = child
            .attributes
            .iter()
            .filter(targets_parent)
            .find(|attr| !relation_kind(attr).map(|k| k.is_collection()).unwrap_or(false));
        Ok(to_one.or_else(|| child.attributes.iter().find(targets_parent)))
    }

    /// Key under which a many-to-many element carries its foreign key,
    /// derived from the join column (`tag_id` -> `tagId`).
    pub fn join_key(relation: &RelationDescriptor) -> Option<String> {
        match relation.kind {
            RelationKind::ManyToMany => relation
                .join_column
                .as_deref()
                .map(snake_to_camel)
                .or_else(|| Some(format!("{}Id", lcfirst(&relation.target)))),
            _ => None,
        }
    }
}

fn relation_kind(attr: &AttributeDef) -> Option<RelationKind> {
    match attr.kind.descriptor() {
        AttributeDescriptor::Relation(rel) => Some(rel.kind),
        AttributeDescriptor::Scalar(_) => None,
    }
}

fn lcfirst(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeDef, EntityTypeDef, ScalarKind};

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new(vec![
            EntityTypeDef::new("Invoice")
                .attribute(AttributeDef::text("number"))
                .attribute(AttributeDef::collection("lines", "InvoiceLine"))
                .attribute(AttributeDef::many_to_many("tags", "Tag", "tag_id")),
            EntityTypeDef::new("InvoiceLine")
                .attribute(AttributeDef::decimal("qty"))
                .attribute(AttributeDef::many_to_one("invoice", "Invoice")),
            EntityTypeDef::new("Tag")
                .identified_by("tagCode")
                .attribute(AttributeDef::text("label"))
                .attribute(AttributeDef::many_to_many("invoices", "Invoice", "invoice_id")),
        ])
        .unwrap()
    }

    #[test]
    fn test_describe_attribute() {
        let registry = registry();
        let resolver = MetadataResolver::new(&registry);

        assert_eq!(
            resolver.describe_attribute("InvoiceLine", "qty").unwrap(),
            AttributeDescriptor::Scalar(ScalarKind::Decimal)
        );
        match resolver.describe_attribute("Invoice", "tags").unwrap() {
            AttributeDescriptor::Relation(rel) => {
                assert_eq!(rel.kind, RelationKind::ManyToMany);
                assert_eq!(rel.target, "Tag");
                assert_eq!(MetadataResolver::join_key(&rel).as_deref(), Some("tagId"));
            }
            other => panic!("unexpected descriptor {:?}", other),
        }
    }

    #[test]
    fn test_unknown_attribute_is_schema_mismatch() {
        let registry = registry();
        let resolver = MetadataResolver::new(&registry);

        let err = resolver.describe_attribute("Invoice", "missing").unwrap_err();
        assert_eq!(err.entity_type, "Invoice");
        assert_eq!(err.attribute, "missing");
        assert!(resolver.describe_attribute("Nope", "x").is_err());
    }

    #[test]
    fn test_identifier_defaults_to_id() {
        let registry = registry();
        let resolver = MetadataResolver::new(&registry);

        assert_eq!(resolver.describe_identifier("Invoice").unwrap(), "id");
        assert_eq!(resolver.describe_identifier("Tag").unwrap(), "tagCode");
    }

    #[test]
    fn test_back_reference_resolution() {
        let registry = registry();
        let resolver = MetadataResolver::new(&registry);

        let back = resolver.back_reference("InvoiceLine", "Invoice").unwrap().unwrap();
        assert_eq!(back.name, "invoice");

        // the inverse side of a many-to-many is still reported, as a collection
        let back = resolver.back_reference("Tag", "Invoice").unwrap().unwrap();
        assert_eq!(back.name, "invoices");

        assert!(resolver.back_reference("Invoice", "Tag").unwrap().is_some());
        assert!(resolver.back_reference("InvoiceLine", "Tag").unwrap().is_none());
    }

    #[test]
    fn test_snake_case_attribute_lookup() {
        let registry = SchemaRegistry::new(vec![
            EntityTypeDef::new("Event").attribute(AttributeDef::date_time("startsAt"))
        ])
        .unwrap();
        let resolver = MetadataResolver::new(&registry);

        assert_eq!(resolver.attribute("Event", "starts_at").unwrap().name, "startsAt");
        assert_eq!(resolver.attribute("Event", "startsAt").unwrap().name, "startsAt");
    }
}

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::model::{AttributeDef, EntityTypeDef, Id, SchemaRegistry, PROTECTED_STATUS};
use crate::store::{Repository, Row, RowRef, StoredValue};

/// Invoicing schema used by the demo server and the test suites.
pub fn demo_definitions() -> Vec<EntityTypeDef> {
    vec![
        EntityTypeDef::new("InvoiceStatus")
            .attribute(AttributeDef::text("term").required())
            .attribute(AttributeDef::text("description")),
        EntityTypeDef::new("Customer")
            .attribute(AttributeDef::text("name").required().titled("Name"))
            .attribute(AttributeDef::text("email").unique().titled("E-mail"))
            .attribute(AttributeDef::integer("statusTuple"))
            .attribute(AttributeDef::one_to_one("profile", "CustomerProfile")),
        EntityTypeDef::new("CustomerProfile")
            .attribute(AttributeDef::text("phone"))
            .attribute(AttributeDef::date_time("birthDate"))
            .attribute(AttributeDef::one_to_one("customer", "Customer")),
        EntityTypeDef::new("Tag")
            .attribute(AttributeDef::text("label").unique().titled("Label"))
            .attribute(AttributeDef::boolean("isActive"))
            .attribute(AttributeDef::many_to_many("invoices", "Invoice", "invoice_id")),
        EntityTypeDef::new("Invoice")
            .attribute(AttributeDef::text("number").required().unique().titled("Invoice number"))
            .attribute(AttributeDef::date_time("issuedAt"))
            .attribute(AttributeDef::decimal("total"))
            .attribute(AttributeDef::boolean("paid"))
            .attribute(AttributeDef::integer("statusTuple"))
            .attribute(AttributeDef::many_to_one("customer", "Customer"))
            .attribute(AttributeDef::many_to_one("status", "InvoiceStatus"))
            .attribute(AttributeDef::nested("shipping", "ShippingAddress"))
            .attribute(AttributeDef::collection("lines", "InvoiceLine"))
            .attribute(AttributeDef::many_to_many("tags", "Tag", "tag_id")),
        EntityTypeDef::new("InvoiceLine")
            .attribute(AttributeDef::text("description"))
            .attribute(AttributeDef::decimal("qty"))
            .attribute(AttributeDef::decimal("unitPrice"))
            .attribute(AttributeDef::many_to_one("invoice", "Invoice")),
        EntityTypeDef::new("ShippingAddress")
            .attribute(AttributeDef::text("street"))
            .attribute(AttributeDef::text("city"))
            .attribute(AttributeDef::one_to_one("invoice", "Invoice")),
    ]
}

pub fn demo_registry() -> Result<SchemaRegistry> {
    SchemaRegistry::new(demo_definitions()).context("Demo schema is inconsistent")
}

fn row<const N: usize>(values: [(&str, StoredValue); N]) -> Row {
    values
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

fn text(value: &str) -> StoredValue {
    StoredValue::Text(value.to_string())
}

fn reference(id: Id) -> StoredValue {
    StoredValue::Reference(RowRef::Id(id))
}

fn references(ids: &[Id]) -> StoredValue {
    StoredValue::References(ids.iter().map(|id| RowRef::Id(*id)).collect())
}

/// Inserts a small invoicing data set.
///
/// Customer 2 carries the protected status and cannot be removed.
pub fn load_seed_data<R: Repository + ?Sized>(repository: &R) -> Result<()> {
    for (term, description) in [
        ("open", "Awaiting payment"),
        ("paid", "Settled"),
        ("archived", "Closed for edits"),
    ] {
        repository.insert(
            "InvoiceStatus",
            row([("term", text(term)), ("description", text(description))]),
        )?;
    }

    let customer = repository.insert(
        "Customer",
        row([
            ("name", text("Ada Lovelace")),
            ("email", text("ada@example.com")),
            ("statusTuple", StoredValue::Integer(1)),
        ]),
    )?;
    repository.insert(
        "Customer",
        row([
            ("name", text("Internal Billing")),
            ("email", text("billing@example.com")),
            ("statusTuple", StoredValue::Integer(PROTECTED_STATUS)),
        ]),
    )?;

    let mut tags = Vec::new();
    for label in ["urgent", "export", "recurring"] {
        tags.push(repository.insert(
            "Tag",
            row([("label", text(label)), ("isActive", StoredValue::Bool(true))]),
        )?);
    }

    let issued = NaiveDate::from_ymd_opt(2024, 3, 1)
        .and_then(|d| d.and_hms_opt(9, 30, 0))
        .context("Invalid seed date")?;
    let invoice = repository.insert(
        "Invoice",
        row([
            ("number", text("INV-0001")),
            ("issuedAt", StoredValue::DateTime(issued)),
            ("total", StoredValue::Decimal(150.0)),
            ("paid", StoredValue::Bool(false)),
            ("statusTuple", StoredValue::Integer(1)),
            ("customer", reference(customer)),
            ("status", reference(1)),
            ("tags", references(&tags[..1])),
        ]),
    )?;

    let mut lines = Vec::new();
    for (description, qty, price) in [("Consulting", 2.0, 50.0), ("Support", 1.0, 50.0)] {
        lines.push(repository.insert(
            "InvoiceLine",
            row([
                ("description", text(description)),
                ("qty", StoredValue::Decimal(qty)),
                ("unitPrice", StoredValue::Decimal(price)),
                ("invoice", reference(invoice)),
            ]),
        )?);
    }
    repository.apply(crate::store::ChangeSet {
        writes: vec![crate::store::RowWrite {
            entity_type: "Invoice".to_string(),
            key: RowRef::Id(invoice),
            values: row([("lines", references(&lines))]),
        }],
        deletes: Vec::new(),
    })?;

    log::info!(
        "Seeded invoice #{} with {} lines and {} tags",
        invoice,
        lines.len(),
        tags.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRepository;
    use std::sync::Arc;

    #[test]
    fn test_demo_schema_capabilities() {
        let registry = demo_registry().unwrap();

        assert!(registry.get("InvoiceStatus").unwrap().lookup);
        assert!(!registry.get("Invoice").unwrap().lookup);
        assert_eq!(
            registry.get("Tag").unwrap().soft_delete.as_ref().map(|s| s.attribute.as_str()),
            Some("isActive")
        );
        assert!(registry.get("InvoiceLine").unwrap().soft_delete.is_none());
    }

    #[test]
    fn test_seed_data_loads() {
        let repository = MemoryRepository::new(Arc::new(demo_registry().unwrap()));
        load_seed_data(&repository).unwrap();

        assert_eq!(repository.count("InvoiceStatus"), 3);
        assert_eq!(repository.count("Tag"), 3);
        let invoice = repository.load("Invoice", 1).unwrap().unwrap();
        assert_eq!(
            invoice.get("lines"),
            Some(&StoredValue::References(vec![RowRef::Id(1), RowRef::Id(2)]))
        );
        assert_eq!(invoice.get("number"), Some(&text("INV-0001")));
    }
}

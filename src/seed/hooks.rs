use std::sync::Arc;

use crate::error::ErrorList;
use crate::logic::{SaveContext, ServiceHooks};
use crate::model::{SubmittedValue, ValueSource, INACTIVE_STATUS};

/// Save rules of the demo `Invoice` type.
#[derive(Debug, Default)]
pub struct InvoiceHooks;

impl ServiceHooks for InvoiceHooks {
    /// Drops the currency mask the invoice form puts on `total`.
    fn pre_save(&self, source: &mut ValueSource) {
        for namespace in [&mut source.body, &mut source.query] {
            let Some(total) = namespace.get("total").and_then(|v| v.as_scalar()) else {
                continue;
            };
            let unmasked = total.trim().trim_start_matches("R$").trim().to_string();
            *namespace = namespace.with_entry("total", SubmittedValue::scalar(unmasked));
        }
    }

    fn validate(&self, ctx: &SaveContext<'_>, errors: &mut ErrorList) {
        let lines = ctx.root().get("lines").and_then(|v| v.as_collection()).unwrap_or(&[]);
        for (position, line) in lines.iter().enumerate() {
            if ctx.store.is_removed(*line) {
                continue;
            }
            let qty = ctx.entity(*line).get("qty").and_then(|v| v.as_decimal());
            if qty.is_some_and(|qty| qty <= 0.0) {
                errors.add(
                    "validation",
                    format!("Line {} must have a positive quantity.", position + 1),
                );
            }
        }
    }

    fn verify(&self, ctx: &SaveContext<'_>, errors: &mut ErrorList) {
        let Some(customer) = ctx.root().get("customer").and_then(|v| v.as_reference()) else {
            return;
        };
        let status = ctx.entity(customer).get("statusTuple").and_then(|v| v.as_integer());
        if status == Some(INACTIVE_STATUS) {
            errors.add("verification", "The selected customer is inactive.");
        }
    }
}

/// Hooks registered per entity type for the demo server.
pub fn demo_hooks() -> Vec<(&'static str, Arc<dyn ServiceHooks>)> {
    vec![("Invoice", Arc::new(InvoiceHooks) as Arc<dyn ServiceHooks>)]
}

use serde::{Deserialize, Serialize};

/// Identifier value of a persisted entity.
pub type Id = i64;

/// Position of an entity inside a unit of work.
///
/// Handles are only meaningful for the unit of work that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityHandle(pub usize);

/// Which spelling of attribute keys is accepted in submitted data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyConvention {
    /// Only `camelCase` keys.
    Camel,
    /// Only `snake_case` keys.
    Snake,
    /// Either spelling, preferring the one present.
    #[default]
    Both,
}

impl KeyConvention {
    /// Candidate keys in lookup order for a camelCase attribute name.
    pub fn candidates(&self, attribute: &str) -> Vec<String> {
        let snake = camel_to_snake(attribute);
        match self {
            KeyConvention::Camel => vec![attribute.to_string()],
            KeyConvention::Snake => vec![snake],
            KeyConvention::Both if snake == attribute => vec![snake],
            KeyConvention::Both => vec![attribute.to_string(), snake],
        }
    }
}

/// `idInvoice` -> `id_invoice`
pub fn camel_to_snake(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// `tag_id` -> `tagId`
pub fn snake_to_camel(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut upper = false;
    for c in s.chars() {
        if c == '_' {
            upper = !out.is_empty();
        } else if upper {
            out.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Parses an identifier from its submitted text form.
pub fn parse_id(raw: &str) -> Option<Id> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<Id>().ok()
}

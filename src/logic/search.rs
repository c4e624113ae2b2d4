//! Grid search requests in the DataTables wire shape.
//!
//! Filters come from `searchData` (a list of `{name, value}` pairs or a
//! single free-text string) or, when that key is missing, from every scalar
//! the client submitted. Ordering indexes into the submitted `columns`.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::SchemaMismatchError;
use crate::logic::resolver::MetadataResolver;
use crate::model::{Id, SubmittedValue, ValueSource};
use crate::store::{Row, SearchCriteria, SearchPage, SortDirection};

pub const DEFAULT_PAGE_LENGTH: usize = 20;

/// Free-text filter key inside `searchData`.
pub const SEARCH_ALL_KEY: &str = "searchAll";

/// Grid column reserved for row actions; never sortable.
const ACTIONS_COLUMN: &str = "g.acoes";

/// Request keys that steer paging rather than filter rows.
const CONTROL_KEYS: [&str; 6] = ["draw", "start", "length", "columns", "order", "search"];

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub search_data: Vec<(String, String)>,
    pub order_by: Vec<(String, SortDirection)>,
    pub start: usize,
    /// `None` when the client asked for every row (`length=-1`).
    pub length: Option<usize>,
    pub draw: u64,
}

impl SearchRequest {
    pub fn from_source(source: &ValueSource) -> Self {
        let search_data = match source.get("searchData") {
            Some(data) => search_pairs(data),
            None => submitted_scalars(&source.merged()),
        };

        let length = match source.get_scalar_or("length", "").trim() {
            "" => Some(DEFAULT_PAGE_LENGTH),
            raw => match raw.parse::<i64>() {
                Ok(n) if n > 0 => Some(n as usize),
                Ok(_) => None,
                Err(_) => Some(DEFAULT_PAGE_LENGTH),
            },
        };

        Self {
            search_data,
            order_by: order_by(source),
            start: source.get_scalar_or("start", "0").trim().parse().unwrap_or(0),
            length,
            draw: source.get_scalar_or("draw", "1").trim().parse().unwrap_or(1),
        }
    }

    /// Criteria for `entity_type`; keys that are not attributes are dropped.
    pub fn criteria(
        &self,
        resolver: &MetadataResolver<'_>,
        entity_type: &str,
    ) -> Result<SearchCriteria, SchemaMismatchError> {
        let identifier = resolver.describe_identifier(entity_type)?;
        let attribute_name = |key: &str| -> Option<String> {
            if key == identifier {
                return Some(identifier.to_string());
            }
            resolver.attribute(entity_type, key).ok().map(|a| a.name.clone())
        };

        let mut criteria = SearchCriteria {
            start: self.start,
            length: self.length,
            hide_inactive: resolver.soft_delete(entity_type)?.cloned(),
            ..Default::default()
        };

        for (key, value) in &self.search_data {
            if value.trim().is_empty() {
                continue;
            }
            if key == SEARCH_ALL_KEY {
                criteria.search_all = Some(value.trim().to_string());
            } else if let Some(name) = attribute_name(key) {
                criteria.filters.push((name, value.trim().to_string()));
            } else {
                log::debug!("Ignoring search key {} for {}", key, entity_type);
            }
        }

        criteria.order_by = self
            .order_by
            .iter()
            .filter_map(|(column, direction)| {
                let key = column.strip_prefix("g.").unwrap_or(column);
                attribute_name(key).map(|name| (name, *direction))
            })
            .collect();

        Ok(criteria)
    }
}

fn search_pairs(data: &SubmittedValue) -> Vec<(String, String)> {
    match data {
        SubmittedValue::Scalar(text) => vec![(SEARCH_ALL_KEY.to_string(), text.clone())],
        nested => nested
            .indexed_elements()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|pair| {
                let name = pair.get("name")?.as_scalar()?;
                let value = pair.get("value").and_then(|v| v.as_scalar()).unwrap_or_default();
                Some((name.to_string(), value.to_string()))
            })
            .collect(),
    }
}

fn submitted_scalars(values: &SubmittedValue) -> Vec<(String, String)> {
    values
        .as_map()
        .map(|map| {
            map.iter()
                .filter(|(key, _)| !CONTROL_KEYS.contains(&key.as_str()))
                .filter_map(|(key, value)| Some((key.clone(), value.as_scalar()?.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn order_by(source: &ValueSource) -> Vec<(String, SortDirection)> {
    let (Some(order), Some(columns)) = (source.get("order"), source.get("columns")) else {
        return Vec::new();
    };

    order
        .indexed_elements()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| {
            let index = entry.get("column")?.as_scalar()?.trim();
            let column = columns.get(index)?;
            let data = column.get("data").and_then(|v| v.as_scalar()).unwrap_or_default();
            if data == ACTIONS_COLUMN {
                return None;
            }
            let name = column
                .get("name")
                .and_then(|v| v.as_scalar())
                .filter(|n| !n.is_empty())
                .unwrap_or(data);
            if name.is_empty() {
                return None;
            }
            let direction = match entry.get("dir").and_then(|v| v.as_scalar()) {
                Some(dir) if dir.eq_ignore_ascii_case("desc") => SortDirection::Desc,
                _ => SortDirection::Asc,
            };
            Some((name.to_string(), direction))
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct GridRow {
    pub g: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridResponse {
    pub draw: u64,
    pub records_filtered: usize,
    pub records_total: usize,
    pub page_length: usize,
    pub page_count: usize,
    pub data: Vec<GridRow>,
}

impl GridResponse {
    pub fn new(request: &SearchRequest, identifier: &str, page: SearchPage) -> Self {
        let page_length = request.length.unwrap_or(page.filtered.max(1));
        Self {
            draw: request.draw,
            records_filtered: page.filtered,
            records_total: page.total,
            page_length,
            page_count: page.filtered.div_ceil(page_length.max(1)),
            data: page
                .rows
                .into_iter()
                .map(|(id, row)| GridRow {
                    g: row_to_json(identifier, id, &row),
                })
                .collect(),
        }
    }
}

pub fn row_to_json(identifier: &str, id: Id, row: &Row) -> Value {
    let mut object = Map::new();
    object.insert(identifier.to_string(), Value::from(id));
    for (name, value) in row {
        object.insert(name.clone(), value.to_json());
    }
    Value::Object(object)
}

use serde_json::Value;
use std::collections::BTreeMap;

/// Key on a nested map asking for removal of the related entity.
pub const REMOVAL_KEY: &str = "idDel";

/// Submitted data, parsed once from the request payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SubmittedValue {
    #[default]
    Null,
    Scalar(String),
    Map(BTreeMap<String, SubmittedValue>),
    Sequence(Vec<SubmittedValue>),
}

impl SubmittedValue {
    pub fn scalar(value: impl Into<String>) -> Self {
        SubmittedValue::Scalar(value.into())
    }

    pub fn empty_map() -> Self {
        SubmittedValue::Map(BTreeMap::new())
    }

    /// Converts a JSON document; booleans become `"1"`/`"0"`.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SubmittedValue::Null,
            Value::Bool(b) => SubmittedValue::Scalar(if *b { "1" } else { "0" }.to_string()),
            Value::Number(n) => SubmittedValue::Scalar(n.to_string()),
            Value::String(s) => SubmittedValue::Scalar(s.clone()),
            Value::Array(items) => {
                SubmittedValue::Sequence(items.iter().map(SubmittedValue::from_json).collect())
            }
            Value::Object(map) => SubmittedValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), SubmittedValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Builds a tree from form pairs in bracket notation
    /// (`lines[0][qty]=2`, `tags[]=3`).
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut root = SubmittedValue::empty_map();
        for (key, value) in pairs {
            let path = split_bracket_key(key.as_ref());
            if path.is_empty() {
                continue;
            }
            insert_path(&mut root, &path, value.into());
        }
        root
    }

    pub fn get(&self, key: &str) -> Option<&SubmittedValue> {
        match self {
            SubmittedValue::Map(map) => map.get(key),
            SubmittedValue::Sequence(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            SubmittedValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, SubmittedValue>> {
        match self {
            SubmittedValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SubmittedValue::Null)
    }

    /// Form truthiness: empty, `"0"` and empty containers are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            SubmittedValue::Null => false,
            SubmittedValue::Scalar(s) => {
                let s = s.trim();
                !s.is_empty() && s != "0"
            }
            SubmittedValue::Map(map) => !map.is_empty(),
            SubmittedValue::Sequence(items) => !items.is_empty(),
        }
    }

    /// Elements of an indexed collection in index order.
    ///
    /// Sequences always qualify; maps only when their keys are exactly
    /// `0..n-1`. Anything else yields `None`.
    pub fn indexed_elements(&self) -> Option<Vec<&SubmittedValue>> {
        match self {
            SubmittedValue::Sequence(items) => Some(items.iter().collect()),
            SubmittedValue::Map(map) => {
                let mut indexed = Vec::with_capacity(map.len());
                for (key, value) in map {
                    let index = canonical_index(key)?;
                    indexed.push((index, value));
                }
                indexed.sort_by_key(|(index, _)| *index);
                let sequential = indexed.iter().enumerate().all(|(pos, (index, _))| pos == *index);
                sequential.then(|| indexed.into_iter().map(|(_, v)| v).collect())
            }
            _ => None,
        }
    }

    /// Copy of this map with `key` set to `value`; non-maps are returned as-is.
    pub fn with_entry(&self, key: &str, value: SubmittedValue) -> SubmittedValue {
        match self {
            SubmittedValue::Map(map) => {
                let mut map = map.clone();
                map.insert(key.to_string(), value);
                SubmittedValue::Map(map)
            }
            other => other.clone(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            SubmittedValue::Null => Value::Null,
            SubmittedValue::Scalar(s) => Value::String(s.clone()),
            SubmittedValue::Map(map) => {
                Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
            SubmittedValue::Sequence(items) => {
                Value::Array(items.iter().map(SubmittedValue::to_json).collect())
            }
        }
    }
}

/// Integer key without sign or leading zeros.
fn canonical_index(key: &str) -> Option<usize> {
    let index = key.parse::<usize>().ok()?;
    (index.to_string() == key).then_some(index)
}

fn split_bracket_key(key: &str) -> Vec<String> {
    let key = key.trim();
    let Some(open) = key.find('[') else {
        return if key.is_empty() { Vec::new() } else { vec![key.to_string()] };
    };

    let mut path = vec![key[..open].to_string()];
    let mut rest = &key[open..];
    while let Some(stripped) = rest.strip_prefix('[') {
        let Some(close) = stripped.find(']') else {
            break;
        };
        path.push(stripped[..close].to_string());
        rest = &stripped[close + 1..];
    }
    path
}

fn insert_path(node: &mut SubmittedValue, path: &[String], value: String) {
    let SubmittedValue::Map(map) = node else {
        return;
    };

    let (head, tail) = match path.split_first() {
        Some(split) => split,
        None => return,
    };

    // `key[]` appends at the next free index
    let head = if head.is_empty() {
        next_free_index(map).to_string()
    } else {
        head.clone()
    };

    if tail.is_empty() {
        map.insert(head, SubmittedValue::Scalar(value));
        return;
    }

    let child = map.entry(head).or_insert_with(SubmittedValue::empty_map);
    if !matches!(child, SubmittedValue::Map(_)) {
        *child = SubmittedValue::empty_map();
    }
    insert_path(child, tail, value);
}

fn next_free_index(map: &BTreeMap<String, SubmittedValue>) -> usize {
    map.keys()
        .filter_map(|k| k.parse::<usize>().ok())
        .max()
        .map(|max| max + 1)
        .unwrap_or(0)
}

/// Query parameters and body fields of one request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValueSource {
    pub query: SubmittedValue,
    pub body: SubmittedValue,
}

impl ValueSource {
    pub fn new(query: SubmittedValue, body: SubmittedValue) -> Self {
        Self { query, body }
    }

    pub fn from_body(body: SubmittedValue) -> Self {
        Self {
            query: SubmittedValue::empty_map(),
            body,
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.body.has(key) || self.query.has(key)
    }

    /// Body value first, then query.
    pub fn get(&self, key: &str) -> Option<&SubmittedValue> {
        self.body.get(key).or_else(|| self.query.get(key))
    }

    pub fn get_scalar_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).and_then(|v| v.as_scalar()).unwrap_or(default)
    }

    /// Both namespaces merged into one map, body keys winning.
    pub fn merged(&self) -> SubmittedValue {
        let mut merged = BTreeMap::new();
        for source in [&self.query, &self.body] {
            if let SubmittedValue::Map(map) = source {
                for (k, v) in map {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
        SubmittedValue::Map(merged)
    }
}

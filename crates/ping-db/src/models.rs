//! Store-level types. Distinct from ping-types models so the document layer
//! stays schema-agnostic.

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A stored document: its id within the collection plus JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub collection: String,
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone())
            .with_context(|| format!("Corrupt document {}/{}", self.collection, self.id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Written,
    Deleted,
}

/// A committed change, published on the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChange {
    pub collection: String,
    pub id: String,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Query over a single collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(field.into(), value.into()));
        self
    }

    pub fn where_in<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.filters
            .push(Filter::In(field.into(), values.into_iter().map(Into::into).collect()));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// True when `change` can affect this query's result.
    pub fn affected_by(&self, change: &DocumentChange) -> bool {
        change.collection == self.collection
    }
}

/// One write in an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create or fully replace.
    Set {
        collection: String,
        id: String,
        data: Value,
    },
    /// Insert `on_create` if absent, otherwise merge `on_update` into the
    /// existing body.
    Upsert {
        collection: String,
        id: String,
        on_create: Value,
        on_update: Value,
    },
    /// Merge into an existing document; fails the batch if it is missing.
    Update {
        collection: String,
        id: String,
        patch: Value,
    },
    Delete {
        collection: String,
        id: String,
    },
    /// Remove every document of a collection (child collections on delete).
    DeleteCollection { collection: String },
}

impl WriteOp {
    pub fn collection(&self) -> &str {
        match self {
            Self::Set { collection, .. }
            | Self::Upsert { collection, .. }
            | Self::Update { collection, .. }
            | Self::Delete { collection, .. }
            | Self::DeleteCollection { collection } => collection,
        }
    }
}

/// Field paths are spliced into json_extract expressions, so only plain
/// identifiers are accepted.
pub(crate) fn check_field(field: &str) -> Result<()> {
    let valid = !field.is_empty()
        && field
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if !valid {
        bail!("Invalid field path: {:?}", field);
    }
    Ok(())
}

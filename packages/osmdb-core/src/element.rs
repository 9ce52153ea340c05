//! Map feature data model.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result, ValidationError};
use crate::ids::Id;
use crate::version::Version;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Node,
    Way,
    Relation,
    Changeset,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Node => "node",
            ElementKind::Way => "way",
            ElementKind::Relation => "relation",
            ElementKind::Changeset => "changeset",
        }
    }

    /// Nodes, ways, and relations belong to a changeset; changesets themselves do not.
    pub fn is_feature(&self) -> bool {
        !matches!(self, ElementKind::Changeset)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a relation's membership list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Member {
    pub fn new(kind: ElementKind, id: impl Into<Id>) -> Self {
        Self {
            kind,
            id: id.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A single element value as written to the log.
///
/// Coordinates are kept as decimal strings and only parsed when compared spatially.
/// Fields this crate does not interpret are preserved in `extra`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Element {
    #[serde(rename = "type")]
    pub kind: ElementKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changeset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<Vec<Id>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<Member>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Element {
    pub fn new(kind: ElementKind) -> Self {
        Self {
            kind,
            changeset: None,
            timestamp: None,
            lat: None,
            lon: None,
            refs: None,
            members: None,
            tags: None,
            deleted: false,
            extra: Map::new(),
        }
    }

    pub fn node(changeset: impl Into<String>, lat: impl ToString, lon: impl ToString) -> Self {
        Self {
            changeset: Some(changeset.into()),
            lat: Some(lat.to_string()),
            lon: Some(lon.to_string()),
            ..Self::new(ElementKind::Node)
        }
    }

    pub fn way<I, T>(changeset: impl Into<String>, refs: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Id>,
    {
        Self {
            changeset: Some(changeset.into()),
            refs: Some(refs.into_iter().map(Into::into).collect()),
            ..Self::new(ElementKind::Way)
        }
    }

    pub fn relation(
        changeset: impl Into<String>,
        tags: BTreeMap<String, String>,
        members: Vec<Member>,
    ) -> Self {
        Self {
            changeset: Some(changeset.into()),
            tags: Some(tags),
            members: Some(members),
            ..Self::new(ElementKind::Relation)
        }
    }

    pub fn changeset() -> Self {
        Self::new(ElementKind::Changeset)
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Parse an element from loosely-typed JSON, reporting shape problems as validation errors.
    pub fn from_json(value: Value) -> Result<Self> {
        let field = match &value {
            Value::Object(map) => match map.get("type") {
                None => return Err(ValidationError::new("type", "is missing").into()),
                Some(Value::String(_)) => "element",
                Some(_) => return Err(ValidationError::new("type", "must be a string").into()),
            },
            _ => return Err(ValidationError::new("element", "must be an object").into()),
        };
        serde_json::from_value(value)
            .map_err(|e| Error::Validation(ValidationError::new(field, e.to_string())))
    }

    /// Numeric `(lat, lon)` when both coordinates are present and parse as finite numbers.
    pub fn point(&self) -> Option<(f64, f64)> {
        let lat = self.lat.as_deref()?.trim().parse::<f64>().ok()?;
        let lon = self.lon.as_deref()?.trim().parse::<f64>().ok()?;
        (lat.is_finite() && lon.is_finite()).then_some((lat, lon))
    }

    /// Ids this element names in its geometry (way) or membership (relation) list.
    pub fn referenced_ids(&self) -> Vec<&Id> {
        match self.kind {
            ElementKind::Way => self.refs.iter().flatten().collect(),
            ElementKind::Relation => self.members.iter().flatten().map(|m| &m.id).collect(),
            _ => Vec::new(),
        }
    }
}

/// An element enriched with the id and version it was stored under.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub id: Id,
    pub version: Version,
    #[serde(flatten)]
    pub element: Element,
}

impl Revision {
    pub fn kind(&self) -> ElementKind {
        self.element.kind
    }

    pub fn is_deleted(&self) -> bool {
        self.element.deleted
    }
}

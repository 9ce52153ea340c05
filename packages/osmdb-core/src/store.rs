//! Element CRUD over the log, keyed by logical id.

use std::sync::Arc;

use serde_json::Value;

use crate::element::{Element, Revision};
use crate::error::{Error, Result, ValidationError};
use crate::ids::Id;
use crate::log::{Entry, Log};
use crate::validate::{populate_defaults, DefaultValidator, Validator};
use crate::version::Version;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchOpKind {
    Put,
    Del,
}

/// One operation of [`ElementStore::batch`].
#[derive(Clone, Debug, PartialEq)]
pub struct BatchOp {
    pub kind: BatchOpKind,
    pub id: Option<Id>,
    pub value: Element,
}

impl BatchOp {
    pub fn put(id: Option<Id>, value: Element) -> Self {
        Self {
            kind: BatchOpKind::Put,
            id,
            value,
        }
    }

    pub fn del(id: Id, value: Element) -> Self {
        Self {
            kind: BatchOpKind::Del,
            id: Some(id),
            value,
        }
    }

    /// Parse `{type: "put" | "del", id?, value}`.
    pub fn from_json(op: Value) -> Result<Self> {
        let Value::Object(mut map) = op else {
            return Err(ValidationError::new("op", "must be an object").into());
        };
        let kind = match map.get("type").and_then(Value::as_str) {
            Some("put") => BatchOpKind::Put,
            Some("del") => BatchOpKind::Del,
            Some(other) => return Err(Error::UnknownOpType(other.to_string())),
            None => return Err(Error::UnknownOpType(String::new())),
        };
        let id = match map.remove("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(Id(id)),
            Some(_) => return Err(ValidationError::new("id", "must be a string").into()),
        };
        let value = Element::from_json(map.remove("value").unwrap_or(Value::Null))?;
        Ok(Self { kind, id, value })
    }
}

fn revision(entry: Entry) -> Revision {
    Revision {
        id: entry.id(),
        version: entry.version(),
        element: entry.value,
    }
}

pub struct ElementStore<L> {
    log: Arc<L>,
    validator: Box<dyn Validator>,
}

impl<L: Log> ElementStore<L> {
    pub fn new(log: Arc<L>) -> Self {
        Self::with_validator(log, Box::new(DefaultValidator))
    }

    pub fn with_validator(log: Arc<L>, validator: Box<dyn Validator>) -> Self {
        Self { log, validator }
    }

    pub fn log(&self) -> &Arc<L> {
        &self.log
    }

    fn check(&self, element: &mut Element) -> Result<()> {
        populate_defaults(element);
        match self.validator.validate(element).into_iter().next() {
            Some(err) => Err(Error::Validation(err)),
            None => Ok(()),
        }
    }

    pub async fn create(&self, mut element: Element) -> Result<Revision> {
        self.check(&mut element)?;
        let id = Id::random();
        let entry = self.log.put(&id.log_key(), element).await?;
        Ok(revision(entry))
    }

    /// All current heads of `id`; empty if it was never written.
    pub async fn get(&self, id: &Id) -> Result<Vec<Revision>> {
        Ok(self
            .log
            .get(&id.log_key())
            .await?
            .into_iter()
            .map(revision)
            .collect())
    }

    pub async fn get_by_version(&self, version: &Version) -> Result<Revision> {
        self.log
            .entry(&version.writer, version.seq)
            .await?
            .map(revision)
            .ok_or_else(|| Error::NotFound(format!("version {version}")))
    }

    /// Like [`ElementStore::get_by_version`] for a printable version token.
    pub async fn get_by_token(&self, token: &str) -> Result<Revision> {
        let version: Version = token.parse()?;
        self.get_by_version(&version).await
    }

    async fn require_heads(&self, id: &Id) -> Result<()> {
        if self.log.get(&id.log_key()).await?.is_empty() {
            return Err(Error::NotFound(format!("element {id}")));
        }
        Ok(())
    }

    /// Append a new revision of an existing id.
    ///
    /// The element kind may differ from the superseded heads.
    pub async fn put(&self, id: &Id, mut element: Element) -> Result<Revision> {
        self.require_heads(id).await?;
        self.check(&mut element)?;
        let entry = self.log.put(&id.log_key(), element).await?;
        Ok(revision(entry))
    }

    /// Append a tombstone revision.
    pub async fn del(&self, id: &Id, mut patch: Element) -> Result<Revision> {
        patch.deleted = true;
        self.put(id, patch).await
    }

    /// Apply every op in one atomic log append; results are in input order.
    ///
    /// Nothing is appended unless every op is valid.
    pub async fn batch(&self, ops: Vec<BatchOp>) -> Result<Vec<Revision>> {
        let mut writes = Vec::with_capacity(ops.len());
        for op in ops {
            let mut value = op.value;
            let id = match op.kind {
                BatchOpKind::Put => op.id.unwrap_or_else(Id::random),
                BatchOpKind::Del => {
                    let id = op
                        .id
                        .ok_or_else(|| ValidationError::new("id", "is required to delete"))?;
                    self.require_heads(&id).await?;
                    value.deleted = true;
                    id
                }
            };
            self.check(&mut value)?;
            writes.push((id.log_key(), value));
        }
        if writes.is_empty() {
            return Ok(Vec::new());
        }
        let entries = self.log.batch(writes).await?;
        Ok(entries.into_iter().map(revision).collect())
    }
}

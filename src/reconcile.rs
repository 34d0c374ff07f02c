//! Decides what happens to one normalized record.

use std::fmt;

use log::trace;
use serde::Serialize;

use crate::{
    entity::{IngestMode, NaturalKey, NormalizedRecord},
    error::StoreError,
    store::RecordStore,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "message")]
pub enum Rejection {
    /// A required natural-key field is null or empty.
    MissingKey,
    /// Append mode hit an existing natural key.
    Duplicate,
    /// Any other storage failure.
    Storage(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingKey => f.write_str("missing natural key"),
            Rejection::Duplicate => f.write_str("duplicate natural key"),
            Rejection::Storage(message) => write!(f, "storage error: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    New,
    Updated,
    Rejected(Rejection),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub outcome: Outcome,
    /// Storage id of the written entity; `None` for rejections.
    pub entity_id: Option<i64>,
    /// Natural key of the record, when it had one.
    pub key: Option<NaturalKey>,
}

impl Reconciled {
    fn rejected(rejection: Rejection, key: Option<NaturalKey>) -> Self {
        Self {
            outcome: Outcome::Rejected(rejection),
            entity_id: None,
            key,
        }
    }
}

/// Applies the merge policy of an [`IngestMode`] through a [`RecordStore`].
pub struct Reconciler<'s, S: RecordStore + ?Sized> {
    store: &'s S,
}

impl<'s, S: RecordStore + ?Sized> Reconciler<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    pub fn reconcile(&self, record: &NormalizedRecord, mode: IngestMode) -> Reconciled {
        let Some(key) = record.natural_key() else {
            trace!("Rejecting {} record without a natural key", record.kind());
            return Reconciled::rejected(Rejection::MissingKey, None);
        };

        let written = match mode {
            IngestMode::Merge => self.store.upsert(record).map(|upserted| {
                let outcome = if upserted.created {
                    Outcome::New
                } else {
                    Outcome::Updated
                };
                (outcome, upserted.id)
            }),
            IngestMode::Append => self.store.insert(record).map(|id| (Outcome::New, id)),
        };

        match written {
            Ok((outcome, id)) => {
                trace!("{} {key}: {outcome:?} (id {id})", record.kind());
                Reconciled {
                    outcome,
                    entity_id: Some(id),
                    key: Some(key),
                }
            }
            Err(StoreError::UniqueViolation(_)) => {
                Reconciled::rejected(Rejection::Duplicate, Some(key))
            }
            Err(err) => Reconciled::rejected(Rejection::Storage(err.to_string()), Some(key)),
        }
    }
}

//! Reconcile status, finalizer sets and the metadata shared by every
//! reconciled entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Persisted outcome of the last reconcile cycle of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ReconcileStatus {
    Ok,
    Error,
    /// Reconciler-defined state such as `Deleting`
    Custom(String),
}

impl ReconcileStatus {
    /// Status of a row that was never reconciled
    pub fn pending() -> Self {
        Self::Custom("Pending".to_string())
    }

    pub fn deleting() -> Self {
        Self::Custom("Deleting".to_string())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Ok => "Ok",
            Self::Error => "Error",
            Self::Custom(s) => s,
        }
    }
}

impl Default for ReconcileStatus {
    fn default() -> Self {
        Self::pending()
    }
}

impl From<String> for ReconcileStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Ok" => Self::Ok,
            "Error" => Self::Error,
            _ => Self::Custom(value),
        }
    }
}

impl From<ReconcileStatus> for String {
    fn from(value: ReconcileStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ReconcileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of finalizer keys blocking the hard delete of a row.
///
/// Kept sorted so that the serialized form is canonical; an empty set
/// serializes to `[]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Finalizers(BTreeSet<String>);

impl Finalizers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the key was not present before.
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        self.0.insert(key.into())
    }

    /// Returns true when the key was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl<S: Into<String>> FromIterator<S> for Finalizers {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Bookkeeping columns carried by every reconciled row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub finalizers: Finalizers,
    pub change_seq: i64,
    pub status: ReconcileStatus,
    pub status_details: String,
}

impl ObjectMeta {
    pub fn new(created_at: DateTime<Utc>, change_seq: i64) -> Self {
        Self {
            created_at,
            deleted_at: None,
            finalizers: Finalizers::new(),
            change_seq,
            status: ReconcileStatus::pending(),
            status_details: String::new(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

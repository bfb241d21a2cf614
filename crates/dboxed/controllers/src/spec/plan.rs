//! Diff between mapped objects and a spec document
//!
//! Pure: takes what the mappings say exists and what the document declares,
//! returns which logical objects to delete, create and update.

use std::collections::BTreeMap;

use dboxed_types::models::MappedObjectType;
use serde_json::Value;

/// Logical identity of an object within one spec source
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub object_type: MappedObjectType,
    pub name: String,
}

impl ObjectKey {
    pub fn new(object_type: MappedObjectType, name: impl Into<String>) -> Self {
        Self {
            object_type,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.object_type.as_str(), self.name)
    }
}

/// A mapped object as last applied
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingObject {
    pub recreate_key: String,
    pub fragment: Value,
    /// The object row is soft-deleted and on its way out
    pub deleting: bool,
}

/// An object as declared by the document
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredObject {
    pub recreate_key: String,
    pub fragment: Value,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Boxes before volumes
    pub deletes: Vec<ObjectKey>,
    /// Volumes before boxes
    pub creates: Vec<ObjectKey>,
    pub updates: Vec<ObjectKey>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.creates.is_empty() && self.updates.is_empty()
    }
}

/// Compute the plan.
///
/// An existing object is deleted when the document no longer declares it,
/// when its recreate key changed, or when it is already being deleted. A
/// declared object is created only if nothing is mapped under its key, so a
/// recreate happens over two passes: delete now, create once the old object
/// and its mapping are gone.
pub fn plan(
    existing: &BTreeMap<ObjectKey, ExistingObject>,
    desired: &BTreeMap<ObjectKey, DesiredObject>,
) -> Plan {
    let mut result = Plan::default();

    for (key, current) in existing {
        match desired.get(key) {
            Some(want) if !current.deleting && want.recreate_key == current.recreate_key => {
                if want.fragment != current.fragment {
                    result.updates.push(key.clone());
                }
            }
            _ => result.deletes.push(key.clone()),
        }
    }

    for key in desired.keys() {
        if !existing.contains_key(key) {
            result.creates.push(key.clone());
        }
    }

    // BTreeMap iteration is already volumes-first
    result.deletes.reverse();
    result
}

//! Declarative spec reconciliation
//!
//! A spec source (a [`DboxedSpec`](dboxed_types::models::DboxedSpec) or a
//! [`GitSpec`](dboxed_types::models::GitSpec) row) points at a YAML document
//! declaring volumes and boxes by logical name. [`SpecReconciler`] fetches
//! the document, diffs it against the spec mappings of the source and
//! creates, updates or deletes objects until they match.

mod apply;
pub mod kind;
pub mod plan;
mod reconciler;
pub mod source;

pub use kind::SpecSource;
pub use plan::{plan, ObjectKey, Plan};
pub use reconciler::SpecReconciler;
pub use source::{DirectoryFetcher, InMemoryFetcher, SourceError, SourceFetcher, SourceLocation};

//! # dboxed-types
//!
//! Core types for the dboxed control plane.
//!
//! This crate provides:
//! - Strongly-typed entity identifiers
//! - Entity models (networks, boxes, volumes, replica sets, specs)
//! - Reconcile status, finalizer sets and shared row metadata
//! - The declarative spec document model

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod ids;
pub mod models;
pub mod spec_doc;
pub mod status;

pub use ids::*;
pub use models::*;
pub use spec_doc::{
    BoxSpec, BoxVolumeSpec, IngressSpec, PortForwardSpec, SpecDocument, SpecFragment,
    SpecParseError, VolumeSpec,
};
pub use status::{Finalizers, ObjectMeta, ReconcileStatus};

//! # dboxed-reconciler
//!
//! Generic control-loop runtime over the dboxed entity store.
//!
//! A [`ReconcileLoop`] discovers changed rows of one entity kind through the
//! global change sequence, hands their ids to a pool of workers through a
//! delayed [`WorkQueue`], runs the [`Reconciler`] for each and persists the
//! outcome. Rows that are soft-deleted and have no finalizers left are
//! hard-deleted by the loop.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod control_loop;
pub mod error;
pub mod queue;
pub mod reconciler;
pub mod result;

pub use config::LoopConfig;
pub use control_loop::ReconcileLoop;
pub use error::ReconcileError;
pub use queue::WorkQueue;
pub use reconciler::Reconciler;
pub use result::ReconcileResult;

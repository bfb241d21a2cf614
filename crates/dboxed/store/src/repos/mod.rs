//! Resource repositories
//!
//! Functions here take a `&mut SqliteConnection` and stamp the change
//! sequence on every reconciled row they mutate.

pub mod boxes;
pub mod networks;
pub mod replica_sets;
pub mod specs;
pub mod volumes;
pub mod workspaces;

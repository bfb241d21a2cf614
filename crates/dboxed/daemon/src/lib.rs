//! # dboxed-daemon
//!
//! Process wiring of the dboxed control plane: layered configuration, the
//! [`Supervisor`] that opens the store and runs every reconcile loop, and
//! signal handling for graceful shutdown. The `dboxedd` binary adds the CLI
//! and logging setup.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod error;
pub mod supervisor;

pub use config::DaemonConfig;
pub use error::{DaemonError, DaemonResult};
pub use supervisor::{shutdown_signal, Supervisor};

//! # sdux-supervisor
//!
//! Launcher registry and process supervision for the SDUX session runtime.
//!
//! This crate provides:
//!
//! - [`LauncherRegistry`]: application id to immutable [`LaunchSpec`](sdux_core::LaunchSpec)
//! - [`Supervisor`]: the managed-process table, exit classification and restart policy
//! - [`ProcessBackend`]: the seam to the OS, with [`OsProcessBackend`] for real processes
//!
//! ## Architecture
//!
//! Layer 1: depends only on `sdux-core`. The supervisor is a plain state
//! machine; whoever owns it executes the returned [`SupervisorAction`]s, so
//! spawning and signalling never run on the event path.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod registry;
pub mod supervisor;
pub mod testing;

pub use backend::{OsProcessBackend, ProcessBackend, ENV_APP_ID, ENV_SESSION_ID};
pub use registry::LauncherRegistry;
pub use supervisor::{SpawnRequest, StopSignal, Supervisor, SupervisorAction, SupervisorConfig};

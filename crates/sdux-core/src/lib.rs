//! # sdux-core
//!
//! Core types for the SDUX session runtime.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other sdux crates. It provides:
//!
//! - Identifier types (SessionId, ProcessId, WindowHandle)
//! - The session data model (Session, ManagedProcess, ManagedWindow)
//! - Launch specifications and restart policy
//! - Closed event enums for the windowing and process sources
//! - State deltas, notifications and snapshots published to subscribers
//! - Error types
//! - Configuration loading
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other sdux crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod delta;
pub mod display;
pub mod error;
pub mod event;
pub mod geometry;
pub mod launch;
pub mod process;
pub mod session;
pub mod window;

// Re-export commonly used types
pub use config::{
    ApplicationConfig, AuthSettings, BusSettings, LoggingSettings, SessionSettings, ShellConfig,
    SupervisorSettings, WindowingSettings,
};
pub use delta::{Notification, NotificationLevel, SessionSnapshot, StateDelta};
pub use display::DisplayServer;
pub use error::{Error, Result};
pub use event::{ProcessEvent, Termination, WindowEvent, WindowProperty};
pub use geometry::Geometry;
pub use launch::{BackoffSchedule, LaunchRequest, LaunchSpec, RestartPolicy};
pub use process::{ManagedProcess, ProcessDirectory, ProcessId, ProcessStatus};
pub use session::{Session, SessionId, SessionPhase};
pub use window::{ManagedWindow, Visibility, WindowHandle};

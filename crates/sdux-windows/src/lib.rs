//! # sdux-windows
//!
//! Window state tracking for the SDUX session runtime.
//!
//! - [`WindowTracker`]: one [`ManagedWindow`](sdux_core::ManagedWindow) per
//!   live window, visibility/focus state machine, correlation to managed
//!   processes, MRU switcher order
//! - [`WindowEventSource`]: the seam to the display server, with
//!   [`X11Source`] for X11 and [`ScriptedSource`] for tests
//!
//! ## Architecture
//!
//! Layer 1: depends only on `sdux-core`. Correlation reads the process table
//! through [`ProcessDirectory`](sdux_core::ProcessDirectory) and never calls
//! into the supervisor.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod source;
pub mod tracker;
pub mod x11;

pub use source::{ScriptedSource, WindowEventSource, WindowSourceEvent};
pub use tracker::WindowTracker;
pub use x11::X11Source;

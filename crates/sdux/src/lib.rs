//! SDUX session runtime.
//!
//! This library contains the session bus service. The `sdux` binary in
//! main.rs wires it to the dispatcher, the process backend and the X11
//! window source.

pub mod bus;

// Re-export commonly used types
pub use bus::{BusServer, SERVICE_NAME};

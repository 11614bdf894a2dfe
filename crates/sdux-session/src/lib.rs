//! # sdux-session
//!
//! Session state and the event dispatcher for the SDUX session runtime.
//!
//! This crate provides:
//!
//! - [`SessionState`]: the aggregate of session record, launcher registry,
//!   process table and window set, with its consistency check
//! - [`Dispatcher`]: the single loop that owns the state and serializes every
//!   process, window and command event
//! - [`SessionHandle`]: the cloneable in-process API and delta subscription
//! - [`Authenticator`]: the unlock credential check
//!
//! ## Architecture
//!
//! Layer 2: depends on `sdux-core`, `sdux-supervisor` and `sdux-windows`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod dispatcher;
pub mod handle;
pub mod state;

pub use auth::{Authenticator, HelperAuthenticator};
pub use dispatcher::{Command, Dispatcher, DispatcherConfig, LaunchReceipt, SessionOutcome};
pub use handle::SessionHandle;
pub use state::SessionState;

//! Session bus service.
//!
//! Exposes the session lifecycle operations as the `org.sdux.Session1`
//! interface over a Unix-domain socket.

pub mod introspect;
pub mod methods;
pub mod server;

pub use introspect::{describe, InterfaceDescription, MethodDescription};
pub use methods::{BusError, BusEvent, BusMethod, BusRequest, BusResponse, SERVICE_NAME};
pub use server::BusServer;

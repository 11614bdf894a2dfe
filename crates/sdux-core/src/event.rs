//! Events produced by the windowing system and the process layer.
//!
//! Every source hands the dispatcher one of these closed enums so the
//! consumer can match exhaustively.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::geometry::Geometry;
use crate::process::ProcessId;
use crate::window::WindowHandle;

/// How an OS process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Termination {
    /// Process called exit with this code
    Code(i32),
    /// Process was killed by this signal
    Signal(i32),
}

impl Termination {
    /// Exit code 0.
    pub fn is_clean(&self) -> bool {
        matches!(self, Termination::Code(0))
    }

    /// Shell-style exit code (128 + signal for signal deaths).
    pub fn exit_code(&self) -> i32 {
        match self {
            Termination::Code(code) => *code,
            Termination::Signal(signal) => 128 + signal,
        }
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Code(code) => write!(f, "exit code {code}"),
            Termination::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// A property of a window that changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowProperty {
    /// Window title
    Title(String),
    /// Window class / app id
    Class(String),
    /// OS pid the client reports for itself
    Pid(u32),
    /// Minimized (iconified) state
    Minimized(bool),
    /// Workspace / virtual desktop index
    Workspace(u32),
}

/// Notification from the windowing system about a top-level window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowEvent {
    /// A top-level window was created
    Create {
        /// Window handle
        handle: WindowHandle,
        /// Reported owning pid, if the protocol exposes it
        pid: Option<u32>,
        /// Window class, if already set
        class: Option<String>,
        /// Title, if already set
        title: Option<String>,
        /// Initial geometry
        geometry: Geometry,
    },
    /// Window was destroyed
    Destroy(WindowHandle),
    /// Window became mapped
    Map(WindowHandle),
    /// Window became unmapped
    Unmap(WindowHandle),
    /// Title, class or another property changed
    PropertyChange(WindowHandle, WindowProperty),
    /// Input focus moved (None = no window focused)
    FocusChange(Option<WindowHandle>),
    /// Window moved or resized
    GeometryChange(WindowHandle, Geometry),
}

impl WindowEvent {
    /// The window this event is about, if any.
    pub fn handle(&self) -> Option<WindowHandle> {
        match self {
            WindowEvent::Create { handle, .. } => Some(*handle),
            WindowEvent::Destroy(handle)
            | WindowEvent::Map(handle)
            | WindowEvent::Unmap(handle)
            | WindowEvent::PropertyChange(handle, _)
            | WindowEvent::GeometryChange(handle, _) => Some(*handle),
            WindowEvent::FocusChange(handle) => *handle,
        }
    }
}

/// Notification from the process layer (backend results and timers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// The OS created the process
    Spawned {
        /// Managed entry
        id: ProcessId,
        /// OS pid
        pid: u32,
    },
    /// The OS refused to create the process
    SpawnFailed {
        /// Managed entry
        id: ProcessId,
        /// Why spawning failed
        reason: String,
    },
    /// The process was reaped
    Exited {
        /// Managed entry
        id: ProcessId,
        /// OS pid of the incarnation that ended
        pid: u32,
        /// Exit code or signal
        termination: Termination,
    },
    /// Backoff delay elapsed; the entry may be started again
    RestartDue {
        /// Managed entry
        id: ProcessId,
    },
    /// Graceful stop timeout elapsed; escalate to a forceful kill
    EscalationDue {
        /// Managed entry
        id: ProcessId,
        /// Incarnation the graceful signal was sent to
        pid: u32,
    },
}

impl ProcessEvent {
    /// The managed entry this event is about.
    pub fn process_id(&self) -> ProcessId {
        match self {
            ProcessEvent::Spawned { id, .. }
            | ProcessEvent::SpawnFailed { id, .. }
            | ProcessEvent::Exited { id, .. }
            | ProcessEvent::RestartDue { id }
            | ProcessEvent::EscalationDue { id, .. } => *id,
        }
    }
}

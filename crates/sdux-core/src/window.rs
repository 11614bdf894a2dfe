//! Managed window model.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::geometry::Geometry;
use crate::process::ProcessId;

/// Opaque window id from the windowing system.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct WindowHandle(pub u32);

impl std::fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Visibility of a window. Focus is tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
pub enum Visibility {
    /// Created or unmapped
    #[default]
    Unmapped,
    /// Mapped on screen
    Mapped,
    /// Iconified
    Minimized,
}

/// One tracked top-level window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ManagedWindow {
    /// Window handle
    pub handle: WindowHandle,
    /// Owning managed process, `None` while unowned
    pub owner: Option<ProcessId>,
    /// OS pid the client reported, if any
    pub reported_pid: Option<u32>,
    /// Window title
    pub title: String,
    /// Window class / app id
    pub class: Option<String>,
    /// Visibility state
    pub visibility: Visibility,
    /// Whether the window holds input focus (only while mapped)
    pub focused: bool,
    /// Workspace index, if the window manager publishes one
    pub workspace: Option<u32>,
    /// Position and size
    pub geometry: Geometry,
}

impl ManagedWindow {
    /// Create an unowned, unmapped window entry.
    pub fn new(handle: WindowHandle) -> Self {
        Self {
            handle,
            owner: None,
            reported_pid: None,
            title: String::new(),
            class: None,
            visibility: Visibility::Unmapped,
            focused: false,
            workspace: None,
            geometry: Geometry::default(),
        }
    }

    /// Whether the window has been matched to a managed process.
    pub fn is_owned(&self) -> bool {
        self.owner.is_some()
    }

    /// Whether the window is mapped on screen.
    pub fn is_mapped(&self) -> bool {
        self.visibility == Visibility::Mapped
    }

    /// Whether the window class matches `expected` (ASCII case-insensitive).
    pub fn class_matches(&self, expected: &str) -> bool {
        self.class
            .as_deref()
            .is_some_and(|class| class.eq_ignore_ascii_case(expected))
    }
}

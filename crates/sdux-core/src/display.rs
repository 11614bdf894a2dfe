//! Display server detection.
//!
//! The window tracker needs an X11-style connection; this module figures out
//! what the environment offers before the shell tries to connect.

use serde::{Deserialize, Serialize};

/// Display servers the shell can find itself running under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayServer {
    /// X11 display (value of `DISPLAY`, e.g. ":0")
    X11(String),
    /// Wayland socket name (`WAYLAND_DISPLAY`)
    Wayland(String),
    /// No display server advertised
    Headless,
}

impl DisplayServer {
    /// Detect the display server from the process environment.
    ///
    /// # Detection Logic
    ///
    /// - An explicit display name (e.g. from `--display`) always wins and is
    ///   treated as X11
    /// - `DISPLAY` set ⇒ X11 (this also covers XWayland sessions)
    /// - only `WAYLAND_DISPLAY` set ⇒ Wayland
    /// - neither ⇒ headless
    pub fn detect(explicit: Option<&str>) -> Self {
        Self::detect_from(
            explicit,
            std::env::var("DISPLAY").ok().as_deref(),
            std::env::var("WAYLAND_DISPLAY").ok().as_deref(),
        )
    }

    fn detect_from(explicit: Option<&str>, display: Option<&str>, wayland: Option<&str>) -> Self {
        fn non_empty(value: Option<&str>) -> Option<&str> {
            value.map(str::trim).filter(|v| !v.is_empty())
        }

        if let Some(name) = non_empty(explicit) {
            return DisplayServer::X11(name.to_string());
        }
        if let Some(name) = non_empty(display) {
            return DisplayServer::X11(name.to_string());
        }
        if let Some(name) = non_empty(wayland) {
            return DisplayServer::Wayland(name.to_string());
        }
        DisplayServer::Headless
    }

    /// The X11 display name, when running under X11.
    pub fn x11_display(&self) -> Option<&str> {
        match self {
            DisplayServer::X11(name) => Some(name),
            _ => None,
        }
    }

    /// Human-readable name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            DisplayServer::X11(_) => "X11",
            DisplayServer::Wayland(_) => "Wayland",
            DisplayServer::Headless => "headless",
        }
    }
}

impl std::fmt::Display for DisplayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayServer::X11(name) | DisplayServer::Wayland(name) => {
                write!(f, "{} ({})", self.name(), name)
            }
            DisplayServer::Headless => f.write_str(self.name()),
        }
    }
}

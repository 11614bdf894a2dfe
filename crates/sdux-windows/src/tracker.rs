//! Window state tracker.
//!
//! Keeps one [`ManagedWindow`] per live window handle, applies windowing
//! events to it and correlates windows to managed processes. Every mutation
//! returns the [`StateDelta`]s describing it.
//!
//! # Correlation
//!
//! A window is matched to a process in this order:
//!
//! 1. the OS pid the window reports equals the current pid of a live entry
//! 2. otherwise the oldest `Spawning`/`Running` entry whose expected window
//!    class equals the window class (ASCII case-insensitive) and that owns no
//!    window yet
//!
//! Unmatched windows stay unowned and are retried when they report a class or
//! pid later, or when a process with their pid starts running.

use std::collections::BTreeMap;

use sdux_core::{
    Geometry, ManagedWindow, ProcessDirectory, ProcessId, StateDelta, Visibility, WindowEvent,
    WindowHandle, WindowProperty,
};
use tracing::{debug, info};

/// Authoritative per-window state.
#[derive(Debug, Default)]
pub struct WindowTracker {
    windows: BTreeMap<WindowHandle, ManagedWindow>,
    focused: Option<WindowHandle>,
    /// Most recently focused first.
    focus_history: Vec<WindowHandle>,
}

impl WindowTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one windowing event.
    pub fn apply<D>(&mut self, event: WindowEvent, processes: &D) -> Vec<StateDelta>
    where
        D: ProcessDirectory + ?Sized,
    {
        match event {
            WindowEvent::Create {
                handle,
                pid,
                class,
                title,
                geometry,
            } => self.on_create(handle, pid, class, title, geometry, processes),
            WindowEvent::Destroy(handle) => self.on_destroy(handle),
            WindowEvent::Map(handle) => self.mutate(handle, |w| {
                w.visibility = Visibility::Mapped;
            }),
            WindowEvent::Unmap(handle) => self.mutate(handle, |w| {
                if w.visibility == Visibility::Mapped {
                    w.visibility = Visibility::Unmapped;
                }
            }),
            WindowEvent::PropertyChange(handle, property) => {
                self.on_property(handle, property, processes)
            }
            WindowEvent::FocusChange(Some(handle)) => self.focus(handle),
            WindowEvent::FocusChange(None) => self.clear_focus(),
            WindowEvent::GeometryChange(handle, geometry) => self.mutate(handle, |w| {
                w.geometry = geometry;
            }),
        }
    }

    /// Give unowned windows reporting `pid` to `id` (process just started running).
    pub fn adopt_pid(&mut self, id: ProcessId, pid: u32) -> Vec<StateDelta> {
        let mut deltas = Vec::new();
        for window in self.windows.values_mut() {
            if window.owner.is_none() && window.reported_pid == Some(pid) {
                window.owner = Some(id);
                info!("Window {} correlated to {} by pid {}", window.handle, id, pid);
                deltas.push(StateDelta::WindowChanged(window.clone()));
            }
        }
        deltas
    }

    /// Mark every window owned by `id` as unowned (process left the live set).
    pub fn disown(&mut self, id: ProcessId) -> Vec<StateDelta> {
        let mut deltas = Vec::new();
        for window in self.windows.values_mut() {
            if window.owner == Some(id) {
                window.owner = None;
                info!("Window {} is now unowned ({} is gone)", window.handle, id);
                deltas.push(StateDelta::WindowChanged(window.clone()));
            }
        }
        deltas
    }

    /// Look up a window.
    pub fn get(&self, handle: WindowHandle) -> Option<&ManagedWindow> {
        self.windows.get(&handle)
    }

    /// All windows ordered by handle.
    pub fn windows(&self) -> impl Iterator<Item = &ManagedWindow> {
        self.windows.values()
    }

    /// Copy of the window set.
    pub fn snapshot(&self) -> Vec<ManagedWindow> {
        self.windows.values().cloned().collect()
    }

    /// The focused window.
    pub fn focused(&self) -> Option<WindowHandle> {
        self.focused
    }

    /// Number of tracked windows.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no window is tracked.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Reverse index: windows per owning process, rebuilt from the window set.
    pub fn windows_by_owner(&self) -> BTreeMap<ProcessId, Vec<WindowHandle>> {
        let mut index: BTreeMap<ProcessId, Vec<WindowHandle>> = BTreeMap::new();
        for window in self.windows.values() {
            if let Some(owner) = window.owner {
                index.entry(owner).or_default().push(window.handle);
            }
        }
        index
    }

    /// Windows owned by `id`.
    pub fn windows_of(&self, id: ProcessId) -> Vec<WindowHandle> {
        self.windows
            .values()
            .filter(|w| w.owner == Some(id))
            .map(|w| w.handle)
            .collect()
    }

    /// Mapped windows for the switcher, most recently focused first.
    pub fn cycle_order(&self) -> Vec<WindowHandle> {
        let mapped =
            |handle: &WindowHandle| self.windows.get(handle).is_some_and(|w| w.is_mapped());

        let mut order: Vec<WindowHandle> = self
            .focus_history
            .iter()
            .copied()
            .filter(|h| mapped(h))
            .collect();
        for handle in self.windows.keys() {
            if mapped(handle) && !order.contains(handle) {
                order.push(*handle);
            }
        }
        order
    }

    fn on_create<D>(
        &mut self,
        handle: WindowHandle,
        pid: Option<u32>,
        class: Option<String>,
        title: Option<String>,
        geometry: Geometry,
        processes: &D,
    ) -> Vec<StateDelta>
    where
        D: ProcessDirectory + ?Sized,
    {
        let existing = self.windows.get(&handle).cloned();
        let window = self
            .windows
            .entry(handle)
            .or_insert_with(|| ManagedWindow::new(handle));
        if pid.is_some() {
            window.reported_pid = pid;
        }
        if class.is_some() {
            window.class = class;
        }
        if let Some(title) = title {
            window.title = title;
        }
        window.geometry = geometry;

        self.try_correlate(handle, processes);
        let Some(window) = self.windows.get(&handle).cloned() else {
            return Vec::new();
        };

        match existing {
            None => {
                info!(
                    "Window {} created (class {:?}, owner {:?})",
                    handle, window.class, window.owner
                );
                vec![StateDelta::WindowAdded(window)]
            }
            Some(before) if before != window => {
                debug!("Duplicate create for window {}, updated in place", handle);
                vec![StateDelta::WindowChanged(window)]
            }
            Some(_) => Vec::new(),
        }
    }

    fn on_destroy(&mut self, handle: WindowHandle) -> Vec<StateDelta> {
        if self.windows.remove(&handle).is_none() {
            debug!("Destroy for unknown window {}", handle);
            return Vec::new();
        }
        if self.focused == Some(handle) {
            self.focused = None;
        }
        self.focus_history.retain(|h| *h != handle);
        info!("Window {} destroyed", handle);
        vec![StateDelta::WindowRemoved(handle)]
    }

    fn on_property<D>(
        &mut self,
        handle: WindowHandle,
        property: WindowProperty,
        processes: &D,
    ) -> Vec<StateDelta>
    where
        D: ProcessDirectory + ?Sized,
    {
        let retry = matches!(property, WindowProperty::Class(_) | WindowProperty::Pid(_));
        let mut deltas = self.mutate(handle, |w| match property {
            WindowProperty::Title(title) => w.title = title,
            WindowProperty::Class(class) => w.class = Some(class),
            WindowProperty::Pid(pid) => w.reported_pid = Some(pid),
            WindowProperty::Minimized(true) => w.visibility = Visibility::Minimized,
            WindowProperty::Minimized(false) => {
                if w.visibility == Visibility::Minimized {
                    w.visibility = Visibility::Unmapped;
                }
            }
            WindowProperty::Workspace(workspace) => w.workspace = Some(workspace),
        });

        if retry && self.try_correlate(handle, processes) {
            if let Some(window) = self.windows.get(&handle) {
                deltas.retain(|d| !matches!(d, StateDelta::WindowChanged(_)));
                deltas.push(StateDelta::WindowChanged(window.clone()));
            }
        }
        deltas
    }

    fn focus(&mut self, handle: WindowHandle) -> Vec<StateDelta> {
        match self.windows.get(&handle) {
            None => {
                debug!("Focus moved to untracked window {}", handle);
                return Vec::new();
            }
            Some(window) if !window.is_mapped() => {
                debug!("Ignoring focus for {} window {}", visibility_name(window), handle);
                return Vec::new();
            }
            Some(_) if self.focused == Some(handle) => return Vec::new(),
            Some(_) => {}
        }

        let mut deltas = self.clear_focus();
        if let Some(window) = self.windows.get_mut(&handle) {
            window.focused = true;
            deltas.push(StateDelta::WindowChanged(window.clone()));
        }
        self.focused = Some(handle);
        self.focus_history.retain(|h| *h != handle);
        self.focus_history.insert(0, handle);
        debug!("Focus on window {}", handle);
        deltas
    }

    fn clear_focus(&mut self) -> Vec<StateDelta> {
        let Some(previous) = self.focused.take() else {
            return Vec::new();
        };
        match self.windows.get_mut(&previous) {
            Some(window) if window.focused => {
                window.focused = false;
                vec![StateDelta::WindowChanged(window.clone())]
            }
            _ => Vec::new(),
        }
    }

    /// Mutate a window in place; publishes a change only when something changed.
    fn mutate(
        &mut self,
        handle: WindowHandle,
        f: impl FnOnce(&mut ManagedWindow),
    ) -> Vec<StateDelta> {
        let Some(window) = self.windows.get_mut(&handle) else {
            debug!("Event for unknown window {}", handle);
            return Vec::new();
        };
        let before = window.clone();
        f(window);

        // Focus is only meaningful while mapped.
        if window.focused && !window.is_mapped() {
            window.focused = false;
        }
        let changed = *window != before;
        let snapshot = window.clone();
        if self.focused == Some(handle) && !snapshot.focused {
            self.focused = None;
        }

        if changed {
            if before.visibility != snapshot.visibility {
                info!("Window {} {}", handle, visibility_name(&snapshot));
            }
            vec![StateDelta::WindowChanged(snapshot)]
        } else {
            Vec::new()
        }
    }

    /// Try to find an owner for an unowned window. Returns whether one was set.
    fn try_correlate<D>(&mut self, handle: WindowHandle, processes: &D) -> bool
    where
        D: ProcessDirectory + ?Sized,
    {
        let owner = match self.windows.get(&handle) {
            Some(window) if window.owner.is_none() => self.correlate(window, processes),
            _ => None,
        };
        let Some(owner) = owner else {
            return false;
        };
        if let Some(window) = self.windows.get_mut(&handle) {
            window.owner = Some(owner);
            info!("Window {} correlated to {}", handle, owner);
        }
        true
    }

    fn correlate<D>(&self, window: &ManagedWindow, processes: &D) -> Option<ProcessId>
    where
        D: ProcessDirectory + ?Sized,
    {
        if let Some(id) = window.reported_pid.and_then(|pid| processes.live_by_pid(pid)) {
            return Some(id);
        }
        let class = window.class.as_deref()?;
        processes
            .awaiting_class(class)
            .into_iter()
            .find(|id| !self.windows.values().any(|w| w.owner == Some(*id)))
    }
}

fn visibility_name(window: &ManagedWindow) -> &'static str {
    match window.visibility {
        Visibility::Unmapped => "unmapped",
        Visibility::Mapped => "mapped",
        Visibility::Minimized => "minimized",
    }
}

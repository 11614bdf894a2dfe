//! X11 window event source.
//!
//! Watches the root window with `SUBSTRUCTURE_NOTIFY` and every top-level
//! client with `STRUCTURE_NOTIFY | PROPERTY_CHANGE | FOCUS_CHANGE`, reading
//! EWMH/ICCCM properties (`_NET_WM_PID`, `WM_CLASS`, `_NET_WM_NAME`/`WM_NAME`,
//! `_NET_WM_STATE_HIDDEN`, `_NET_WM_DESKTOP`) to build [`WindowEvent`]s.
//! Override-redirect windows (menus, tooltips) are never tracked.
//!
//! The connection is blocking, so the event loop runs on its own thread and
//! forwards into the bounded window queue with `blocking_send`.

use std::collections::HashSet;

use sdux_core::{Error, Geometry, Result, WindowEvent, WindowHandle, WindowProperty};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use x11rb::connection::Connection;
use x11rb::errors::{ConnectionError, ReplyError};
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ChangeWindowAttributesAux, ConnectionExt as _, EventMask, GetPropertyReply,
    MapState, NotifyMode, Window,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use crate::source::{WindowEventSource, WindowSourceEvent};

x11rb::atom_manager! {
    Atoms: AtomsCookie {
        _NET_WM_PID,
        _NET_WM_NAME,
        _NET_WM_STATE,
        _NET_WM_STATE_HIDDEN,
        _NET_WM_DESKTOP,
        _NET_ACTIVE_WINDOW,
        UTF8_STRING,
    }
}

type X11Result<T> = std::result::Result<T, ConnectionError>;

/// Event source backed by an X11 connection.
pub struct X11Source {
    conn: RustConnection,
    root: Window,
    atoms: Atoms,
    tracked: HashSet<Window>,
}

impl X11Source {
    /// Connect to `display` (default: `DISPLAY`) and subscribe to the root window.
    pub fn connect(display: Option<&str>) -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(display)
            .map_err(|e| Error::WindowingConnectionLost(format!("cannot connect: {e}")))?;
        let root = conn.setup().roots[screen_num].root;
        let atoms = Atoms::new(&conn)
            .map_err(lost)?
            .reply()
            .map_err(|e| Error::WindowingConnectionLost(e.to_string()))?;

        conn.change_window_attributes(
            root,
            &ChangeWindowAttributesAux::new()
                .event_mask(EventMask::SUBSTRUCTURE_NOTIFY | EventMask::PROPERTY_CHANGE),
        )
        .map_err(lost)?
        .check()
        .map_err(|e| Error::WindowingConnectionLost(e.to_string()))?;

        info!("Connected to X server, screen {}, root window {}", screen_num, root);
        Ok(Self {
            conn,
            root,
            atoms,
            tracked: HashSet::new(),
        })
    }

    /// Blocking event loop.
    fn run(mut self, queue: mpsc::Sender<WindowSourceEvent>) {
        let initial = match self.scan() {
            Ok(events) => events,
            Err(e) => {
                let _ = queue.blocking_send(WindowSourceEvent::ConnectionLost(e.to_string()));
                return;
            }
        };
        debug!("Initial scan found {} windows", self.tracked.len());
        for event in initial {
            if queue.blocking_send(WindowSourceEvent::Event(event)).is_err() {
                return;
            }
        }

        loop {
            let result = self
                .conn
                .flush()
                .and_then(|()| self.conn.wait_for_event())
                .and_then(|event| self.translate(event));
            match result {
                Ok(events) => {
                    for event in events {
                        if queue.blocking_send(WindowSourceEvent::Event(event)).is_err() {
                            debug!("Window queue closed, stopping X11 source");
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("X11 connection lost: {}", e);
                    let _ = queue.blocking_send(WindowSourceEvent::ConnectionLost(e.to_string()));
                    return;
                }
            }
        }
    }

    /// Report every existing top-level window.
    fn scan(&mut self) -> X11Result<Vec<WindowEvent>> {
        let tree = match self.conn.query_tree(self.root)?.reply() {
            Ok(tree) => tree,
            Err(e) => return Err(connection_error(e)),
        };

        let mut events = Vec::new();
        for window in tree.children {
            let Some(attrs) = reply_or_none(self.conn.get_window_attributes(window)?.reply())?
            else {
                continue;
            };
            if attrs.override_redirect {
                continue;
            }
            let Some(geometry) = reply_or_none(self.conn.get_geometry(window)?.reply())? else {
                continue;
            };

            events.push(self.track(
                window,
                Geometry::new(
                    geometry.x.into(),
                    geometry.y.into(),
                    geometry.width.into(),
                    geometry.height.into(),
                ),
            )?);
            if self.is_hidden(window)? {
                events.push(WindowEvent::PropertyChange(
                    WindowHandle(window),
                    WindowProperty::Minimized(true),
                ));
            }
            if let Some(desktop) = self.cardinal(window, self.atoms._NET_WM_DESKTOP)? {
                events.push(WindowEvent::PropertyChange(
                    WindowHandle(window),
                    WindowProperty::Workspace(desktop),
                ));
            }
            if attrs.map_state == MapState::VIEWABLE {
                events.push(WindowEvent::Map(WindowHandle(window)));
            }
        }
        events.push(WindowEvent::FocusChange(self.active_window()?));
        Ok(events)
    }

    /// Start tracking `window` and describe it as a create event.
    fn track(&mut self, window: Window, geometry: Geometry) -> X11Result<WindowEvent> {
        // Errors for windows that vanished meanwhile arrive as events.
        self.conn.change_window_attributes(
            window,
            &ChangeWindowAttributesAux::new().event_mask(
                EventMask::STRUCTURE_NOTIFY | EventMask::PROPERTY_CHANGE | EventMask::FOCUS_CHANGE,
            ),
        )?;
        self.tracked.insert(window);

        Ok(WindowEvent::Create {
            handle: WindowHandle(window),
            pid: self.cardinal(window, self.atoms._NET_WM_PID)?,
            class: self.class(window)?,
            title: self.title(window)?,
            geometry,
        })
    }

    fn translate(&mut self, event: Event) -> X11Result<Vec<WindowEvent>> {
        let events = match event {
            Event::CreateNotify(e) if e.parent == self.root && !e.override_redirect => {
                let geometry = Geometry::new(
                    e.x.into(),
                    e.y.into(),
                    e.width.into(),
                    e.height.into(),
                );
                vec![self.track(e.window, geometry)?]
            }
            Event::DestroyNotify(e) if e.event == e.window && self.tracked.contains(&e.window) => {
                self.tracked.remove(&e.window);
                vec![WindowEvent::Destroy(WindowHandle(e.window))]
            }
            Event::MapNotify(e) if e.event == e.window && self.tracked.contains(&e.window) => {
                vec![WindowEvent::Map(WindowHandle(e.window))]
            }
            Event::UnmapNotify(e) if e.event == e.window && self.tracked.contains(&e.window) => {
                vec![WindowEvent::Unmap(WindowHandle(e.window))]
            }
            Event::ConfigureNotify(e)
                if e.event == e.window && self.tracked.contains(&e.window) =>
            {
                vec![WindowEvent::GeometryChange(
                    WindowHandle(e.window),
                    Geometry::new(e.x.into(), e.y.into(), e.width.into(), e.height.into()),
                )]
            }
            Event::ReparentNotify(e) if e.event == e.window && self.tracked.contains(&e.window) => {
                match reparented_frame(e.parent, self.root, &self.tracked) {
                    Some(frame) => {
                        self.tracked.remove(&frame);
                        debug!("Window {} is a frame of {}", frame, e.window);
                        vec![WindowEvent::Destroy(WindowHandle(frame))]
                    }
                    None => Vec::new(),
                }
            }
            Event::PropertyNotify(e) if e.window == self.root => {
                if e.atom == self.atoms._NET_ACTIVE_WINDOW {
                    vec![WindowEvent::FocusChange(self.active_window()?)]
                } else {
                    Vec::new()
                }
            }
            Event::PropertyNotify(e) if self.tracked.contains(&e.window) => {
                self.property_change(e.window, e.atom)?
                    .map(|property| WindowEvent::PropertyChange(WindowHandle(e.window), property))
                    .into_iter()
                    .collect()
            }
            Event::FocusIn(e)
                if e.mode == NotifyMode::NORMAL && self.tracked.contains(&e.event) =>
            {
                vec![WindowEvent::FocusChange(Some(WindowHandle(e.event)))]
            }
            Event::Error(e) => {
                debug!("X11 error: {:?}", e);
                Vec::new()
            }
            _ => Vec::new(),
        };
        Ok(events)
    }

    fn property_change(&self, window: Window, atom: Atom) -> X11Result<Option<WindowProperty>> {
        let atoms = &self.atoms;
        let property = if atom == atoms._NET_WM_NAME || atom == u32::from(AtomEnum::WM_NAME) {
            self.title(window)?.map(WindowProperty::Title)
        } else if atom == u32::from(AtomEnum::WM_CLASS) {
            self.class(window)?.map(WindowProperty::Class)
        } else if atom == atoms._NET_WM_PID {
            self.cardinal(window, atoms._NET_WM_PID)?.map(WindowProperty::Pid)
        } else if atom == atoms._NET_WM_STATE {
            Some(WindowProperty::Minimized(self.is_hidden(window)?))
        } else if atom == atoms._NET_WM_DESKTOP {
            self.cardinal(window, atoms._NET_WM_DESKTOP)?
                .map(WindowProperty::Workspace)
        } else {
            None
        };
        Ok(property)
    }

    fn property(
        &self,
        window: Window,
        atom: impl Into<Atom>,
        kind: impl Into<Atom>,
    ) -> X11Result<Option<GetPropertyReply>> {
        let reply = self
            .conn
            .get_property(false, window, atom, kind, 0, 1024)?
            .reply();
        reply_or_none(reply)
    }

    fn cardinal(&self, window: Window, atom: Atom) -> X11Result<Option<u32>> {
        Ok(self
            .property(window, atom, AtomEnum::CARDINAL)?
            .and_then(|reply| reply.value32().and_then(|mut values| values.next())))
    }

    fn class(&self, window: Window) -> X11Result<Option<String>> {
        let Some(reply) = self.property(window, AtomEnum::WM_CLASS, AtomEnum::STRING)? else {
            return Ok(None);
        };
        Ok(parse_wm_class(&reply.value))
    }

    fn title(&self, window: Window) -> X11Result<Option<String>> {
        let reply = match self.property(window, self.atoms._NET_WM_NAME, self.atoms.UTF8_STRING)? {
            Some(reply) if !reply.value.is_empty() => Some(reply),
            _ => self.property(window, AtomEnum::WM_NAME, AtomEnum::STRING)?,
        };
        Ok(reply
            .filter(|reply| !reply.value.is_empty())
            .map(|reply| String::from_utf8_lossy(&reply.value).into_owned()))
    }

    fn is_hidden(&self, window: Window) -> X11Result<bool> {
        let hidden = self.atoms._NET_WM_STATE_HIDDEN;
        Ok(self
            .property(window, self.atoms._NET_WM_STATE, AtomEnum::ATOM)?
            .and_then(|reply| reply.value32().map(|mut atoms| atoms.any(|a| a == hidden)))
            .unwrap_or(false))
    }

    fn active_window(&self) -> X11Result<Option<WindowHandle>> {
        let active = self
            .property(self.root, self.atoms._NET_ACTIVE_WINDOW, AtomEnum::WINDOW)?
            .and_then(|reply| reply.value32().and_then(|mut values| values.next()));
        Ok(active
            .filter(|window| *window != 0 && self.tracked.contains(window))
            .map(WindowHandle))
    }
}

impl WindowEventSource for X11Source {
    fn name(&self) -> &'static str {
        "x11"
    }

    fn start(self: Box<Self>, queue: mpsc::Sender<WindowSourceEvent>) -> JoinHandle<()> {
        tokio::task::spawn_blocking(move || {
            let source = *self;
            source.run(queue);
            warn!("X11 event source stopped");
        })
    }
}

/// Pick the class from a `WM_CLASS` value (`instance\0class\0`), falling
/// back to the instance when the class part is missing.
fn parse_wm_class(value: &[u8]) -> Option<String> {
    let mut parts = value
        .split(|b| *b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned());
    let instance = parts.next();
    parts.next().or(instance)
}

/// A tracked client reparented into another tracked window: that parent is
/// window manager decoration and stops being tracked.
fn reparented_frame(parent: Window, root: Window, tracked: &HashSet<Window>) -> Option<Window> {
    (parent != root && tracked.contains(&parent)).then_some(parent)
}

/// X11 errors (e.g. BadWindow for a window that just vanished) become `None`;
/// only connection failures propagate.
fn reply_or_none<T>(reply: std::result::Result<T, ReplyError>) -> X11Result<Option<T>> {
    match reply {
        Ok(value) => Ok(Some(value)),
        Err(ReplyError::X11Error(e)) => {
            debug!("X11 request failed: {:?}", e.error_kind);
            Ok(None)
        }
        Err(ReplyError::ConnectionError(e)) => Err(e),
    }
}

fn connection_error(error: ReplyError) -> ConnectionError {
    match error {
        ReplyError::ConnectionError(e) => e,
        ReplyError::X11Error(_) => ConnectionError::UnknownError,
    }
}

fn lost(error: ConnectionError) -> Error {
    Error::WindowingConnectionLost(error.to_string())
}

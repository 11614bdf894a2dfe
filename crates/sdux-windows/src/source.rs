//! Windowing event sources.

use sdux_core::WindowEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What a source hands to the dispatcher's window queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowSourceEvent {
    /// A windowing event
    Event(WindowEvent),
    /// The display server connection is gone; no further events will arrive
    ConnectionLost(String),
}

/// A connection to the display server that streams top-level window events.
///
/// `start` consumes the source and forwards events into `queue` until the
/// connection ends (reported as [`WindowSourceEvent::ConnectionLost`]) or the
/// queue is closed.
pub trait WindowEventSource: Send + 'static {
    /// Human-readable name for logs.
    fn name(&self) -> &'static str;

    /// Start forwarding events.
    fn start(self: Box<Self>, queue: mpsc::Sender<WindowSourceEvent>) -> JoinHandle<()>;
}

/// Source replaying a fixed list of events, then staying connected.
///
/// Used for tests and for running the session without a display server.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    events: Vec<WindowSourceEvent>,
}

impl ScriptedSource {
    /// Source that replays `events` in order.
    pub fn new(events: Vec<WindowSourceEvent>) -> Self {
        Self { events }
    }
}

impl WindowEventSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn start(self: Box<Self>, queue: mpsc::Sender<WindowSourceEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            for event in self.events {
                if queue.send(event).await.is_err() {
                    return;
                }
            }
            queue.closed().await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdux_core::WindowHandle;

    #[tokio::test]
    async fn test_scripted_source_replays_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let source = Box::new(ScriptedSource::new(vec![
            WindowSourceEvent::Event(WindowEvent::Map(WindowHandle(1))),
            WindowSourceEvent::ConnectionLost("eof".into()),
        ]));
        assert_eq!(source.name(), "scripted");
        let task = source.start(tx);

        assert_eq!(
            rx.recv().await,
            Some(WindowSourceEvent::Event(WindowEvent::Map(WindowHandle(1))))
        );
        assert_eq!(
            rx.recv().await,
            Some(WindowSourceEvent::ConnectionLost("eof".into()))
        );
        drop(rx);
        task.await.unwrap();
    }
}

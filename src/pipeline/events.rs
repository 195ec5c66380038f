//! Pipeline event system.
//!
//! Events are emitted by the pipeline while it is driven and can be
//! received by any number of subscribers.

use super::PipelineState;
use crate::scheduler::IterateState;
use std::fmt;
use tokio::sync::broadcast;

/// Events emitted by a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// The pipeline moved between states.
    StateChanged {
        /// State before the change.
        from: PipelineState,
        /// New state.
        to: PipelineState,
    },

    /// One call to `iterate` finished.
    Iterated {
        /// What `iterate` reported.
        state: IterateState,
    },

    /// A sweep stopped early for a state change or an element interrupt.
    Interrupted,

    /// End of stream reached (no chain has anything left to run).
    Eos,

    /// An element failed.
    Error {
        /// Rendered error.
        message: String,
        /// Name of the failing element, when the error came from one.
        element: Option<String>,
    },
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineEvent::StateChanged { from, to } => write!(f, "state {from:?} -> {to:?}"),
            PipelineEvent::Iterated { state } => write!(f, "iterated ({state:?})"),
            PipelineEvent::Interrupted => f.write_str("interrupted"),
            PipelineEvent::Eos => f.write_str("end of stream"),
            PipelineEvent::Error {
                message,
                element: Some(element),
            } => write!(f, "{element} failed: {message}"),
            PipelineEvent::Error {
                message,
                element: None,
            } => write!(f, "failed: {message}"),
        }
    }
}

/// Sending half of the pipeline event broadcast, owned by the pipeline.
#[derive(Clone)]
pub struct EventSender {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventSender {
    /// Broadcast with room for `capacity` unread events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event.
    ///
    /// Returns the number of receivers that got the event; 0 when nobody
    /// is listening.
    pub fn send(&self, event: PipelineEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Report end of stream.
    pub fn send_eos(&self) {
        self.send(PipelineEvent::Eos);
    }

    /// Report a failure.
    pub fn send_error(&self, message: impl Into<String>, element: Option<String>) {
        self.send(PipelineEvent::Error {
            message: message.into(),
            element,
        });
    }

    /// Report a state change.
    pub fn send_state_changed(&self, from: PipelineState, to: PipelineState) {
        self.send(PipelineEvent::StateChanged { from, to });
    }

    /// New receiver seeing events sent from now on.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new(256)
    }
}

impl fmt::Debug for EventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

/// Receiving half of the pipeline event broadcast.
///
/// Receivers that fall behind skip the events they missed.
pub struct EventReceiver {
    receiver: broadcast::Receiver<PipelineEvent>,
}

impl EventReceiver {
    /// Wait for the next event, `None` once the pipeline is gone.
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                // Missed some events; move on to the next one.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The next event if one is waiting.
    pub fn try_recv(&mut self) -> Option<PipelineEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Collect every event available right now.
    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_receivers() {
        let sender = EventSender::default();
        assert_eq!(sender.send(PipelineEvent::Eos), 0);
    }

    #[test]
    fn test_subscribe_and_try_recv() {
        let sender = EventSender::new(8);
        let mut rx = sender.subscribe();
        sender.send_state_changed(PipelineState::Null, PipelineState::Ready);
        sender.send_eos();
        assert_eq!(
            rx.try_recv(),
            Some(PipelineEvent::StateChanged {
                from: PipelineState::Null,
                to: PipelineState::Ready
            })
        );
        assert_eq!(rx.try_recv(), Some(PipelineEvent::Eos));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_lagged_receiver_skips_ahead() {
        let sender = EventSender::new(2);
        let mut rx = sender.subscribe();
        for _ in 0..5 {
            sender.send(PipelineEvent::Interrupted);
        }
        sender.send_eos();
        let events = rx.drain();
        assert_eq!(events.last(), Some(&PipelineEvent::Eos));
        assert!(events.len() <= 2);
    }

    #[test]
    fn test_display() {
        let event = PipelineEvent::Error {
            message: "boom".into(),
            element: Some("src".into()),
        };
        assert_eq!(event.to_string(), "src failed: boom");
        assert_eq!(PipelineEvent::Eos.to_string(), "end of stream");
        assert_eq!(
            PipelineEvent::Iterated {
                state: IterateState::More
            }
            .to_string(),
            "iterated (More)"
        );
    }
}
